//! Google Drive blob store for DriveBlobs.
//!
//! This module provides a blob store backed by the Drive v2 API with:
//! - OAuth2 refresh-token authentication, refreshed and retried once on 401
//! - Resumable (two-step) streaming uploads
//! - Title-based lookup with the content checksum recorded as a file property
//! - Full BlobStore trait implementation

pub mod auth;
pub mod client;
pub mod provider;

pub use auth::{
    AccessToken, AuthConfig, AuthManager, GrantedTokens, PastedAuthorization, TokenManager,
};
pub use client::{DriveClient, DriveFile, Endpoints};
pub use provider::{create_gdrive_store, GDriveBlobStore, GDriveConfig};
