//! Common utilities and types shared across the DriveBlobs crates.
//!
//! This module provides the error type and the small value types that the
//! storage layer and the CLI agree on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BlobKey, Secret};
