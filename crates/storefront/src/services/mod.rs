//! Business logic services for the bridge.
//!
//! # Services
//!
//! - `auth` - Host registration (pending users) and password login
//! - `cart` - Cart reconciliation and buyer identity binding
//! - `client_state` - Per-browser state kept in the session
//! - `crypto` - Random tokens, PKCE and HMAC signatures
//! - `identity` - Where a visitor's cart handle lives
//! - `mutation_guard` - Per-cart serialization of mutations
//! - `token_exchange` - OAuth login and signed logout links
//! - `validation` - Customer validation gate

pub mod auth;
pub mod cart;
pub mod client_state;
pub mod crypto;
pub mod identity;
pub mod mutation_guard;
pub mod token_exchange;
pub mod validation;
