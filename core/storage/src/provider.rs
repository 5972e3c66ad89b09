//! Blob store trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use driveblobs_common::{BlobKey, Error, Result};

/// Metadata for a stored blob or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Unique identifier for the object (provider-specific).
    pub id: String,
    /// Title the object is stored under.
    pub title: Option<String>,
    /// MIME type reported by the provider.
    pub mime_type: Option<String>,
    /// Parent folder identifier.
    pub parent: Option<String>,
    /// Content checksum, used as the blob's content key.
    pub key: Option<String>,
    /// Size in bytes (None for folders).
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

/// Options for writing a blob.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Key (filename) to store the blob under.
    pub key: Option<BlobKey>,
    /// Folder to place the blob in.
    pub parent: Option<String>,
    /// Total size, when known ahead of time.
    pub size: Option<u64>,
}

impl WriteOptions {
    /// Options for a blob stored under `key`.
    pub fn with_key(key: BlobKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }
}

/// Options for creating a folder.
#[derive(Debug, Clone, Default)]
pub struct MkdirOptions {
    /// Folder to create the new folder in.
    pub parent: Option<String>,
}

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Blob store over a remote service.
///
/// Implementations must handle their own authentication.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "gdrive").
    fn name(&self) -> &str;

    /// Write a stream under the key given in `options`.
    ///
    /// # Postconditions
    /// - Blob is readable by its key
    /// - Returned metadata carries the content checksum as `key`
    ///
    /// # Errors
    /// - Authentication errors
    /// - Network/API errors, including a failure mid-stream
    async fn write(&self, options: WriteOptions, data: ByteStream) -> Result<BlobInfo>;

    /// Stream a blob's content.
    ///
    /// # Errors
    /// - `NotFound` if no blob has this key
    async fn read(&self, key: &BlobKey) -> Result<ByteStream>;

    /// Check if a blob exists.
    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    /// Remove a blob.
    ///
    /// # Errors
    /// - `NotFound` if no blob has this key
    async fn remove(&self, key: &BlobKey) -> Result<()>;

    /// Create a folder.
    async fn mkdir(&self, name: &str, options: MkdirOptions) -> Result<BlobInfo>;

    /// Look up a blob's metadata by key.
    async fn get(&self, key: &BlobKey) -> Result<Option<BlobInfo>>;

    /// Write an in-memory buffer.
    async fn write_bytes(&self, options: WriteOptions, data: Vec<u8>) -> Result<BlobInfo> {
        let options = WriteOptions {
            size: Some(data.len() as u64),
            ..options
        };
        let body = stream::once(async move { Ok::<_, Error>(Bytes::from(data)) });
        self.write(options, Box::pin(body)).await
    }

    /// Read a blob fully into memory.
    async fn read_bytes(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let mut stream = self.read(key).await?;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}
