//! Business logic services.
//!
//! # Services
//!
//! - `auth` - Username/password registration and login
//! - `csv` - CSV export and all-or-nothing import
//! - `exports` - JSON export payloads
//! - `media` - Uploaded file storage

pub mod auth;
pub mod csv;
pub mod exports;
pub mod media;
