//! Database access shared by the worker and job producers

pub mod init;

pub use init::{init_database, init_schema};
