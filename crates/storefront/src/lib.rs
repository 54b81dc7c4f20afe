//! EC Relate storefront bridge library.
//!
//! Keeps a host site's visitors and their Shopify carts in sync: cart
//! reconciliation, customer login via the Customer Account API, and the
//! validation gate that ties a commerce customer to a host account.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;
