//! # trackproc Common Library
//!
//! Shared code for the track processing worker and the producers that feed it:
//! - Error type
//! - Bootstrap configuration (TOML file, secrets file, environment overlay)
//! - Database schema initialization

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
