//! mysite core - shared domain types.
//!
//! Types used by every mysite component:
//! - `web` - the HTTP server (shop, accounts, blog, feeds, REST API)
//! - `cli` - management commands and migrations
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP.
//! Database encoding is available behind the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, discounts and usernames

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
