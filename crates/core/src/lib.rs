//! EC Relate Core - Shared types library.
//!
//! This crate provides the types shared by the bridge components:
//! - `storefront` - HTTP service that syncs carts and customer identity
//! - `cli` - Command-line tools for migrations and maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. Validation of identifiers that arrive from browsers
//! (cart handles, line ids, quantities) lives here so every layer above
//! works with values that are already known to be well formed.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for host ids, emails, and commerce handles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
