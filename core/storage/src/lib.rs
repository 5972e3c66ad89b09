//! Blob storage for DriveBlobs.
//!
//! This module provides a blob-store interface (write, read, exists, remove,
//! mkdir) and its Google Drive backend.
//!
//! # Design Principles
//! - Key addressing: blobs are found by their remote title
//! - Async operations: All I/O operations are async
//! - Streaming support: uploads and downloads are byte streams
//! - One retry: an auth failure refreshes the token and retries once

pub mod gdrive;
pub mod provider;

pub use gdrive::{create_gdrive_store, Endpoints, GDriveBlobStore, GDriveConfig};
pub use provider::{BlobInfo, BlobStore, ByteStream, MkdirOptions, WriteOptions};
