//! Core types for EC Relate.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod commerce;
pub mod email;
pub mod id;

pub use commerce::{CartHandle, CommerceIdError, CustomerId, LineId, MerchandiseId, Quantity};
pub use email::{Email, EmailError};
pub use id::*;
