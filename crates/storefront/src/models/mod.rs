//! Domain models for the bridge.

pub mod session;
pub mod user;

pub use session::{CurrentUser, keys};
pub use user::{NewPendingUser, PendingUser, User};
