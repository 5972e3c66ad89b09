//! Google Drive blob store implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use driveblobs_common::{BlobKey, Error, Result, Secret};

use crate::provider::{BlobInfo, BlobStore, ByteStream, MkdirOptions, WriteOptions};

use super::auth::{AuthConfig, AuthManager, TokenManager};
use super::client::{DriveClient, DriveFile, Endpoints, NewFile, ParentReference};

/// Name of the file property holding the content checksum.
const KEY_PROPERTY: &str = "key";

/// Content type sent when the key's extension says nothing.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Google Drive store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GDriveConfig {
    /// OAuth2 client credentials.
    pub auth: AuthConfig,
    /// Long-lived refresh token.
    pub refresh_token: Secret,
    /// Folder new blobs go to when the write names none.
    #[serde(default)]
    pub parent: Option<String>,
    /// Remote endpoints.
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Google Drive blob store.
///
/// Blobs are Drive files addressed by title.
pub struct GDriveBlobStore {
    config: GDriveConfig,
    client: DriveClient,
    token_manager: Arc<TokenManager>,
}

impl GDriveBlobStore {
    /// Create a new Google Drive store.
    ///
    /// No request is made until the first operation.
    ///
    /// # Errors
    /// - Empty refresh token
    /// - Invalid endpoint URLs
    pub fn new(config: GDriveConfig) -> Result<Self> {
        if config.refresh_token.is_empty() {
            return Err(Error::InvalidInput(
                "A Google refresh token is required".to_string(),
            ));
        }

        let auth_manager = AuthManager::new(config.auth.clone(), &config.endpoints)?;
        let token_manager = Arc::new(TokenManager::new(
            auth_manager,
            config.refresh_token.clone(),
        ));
        let client = DriveClient::new(config.endpoints.clone(), token_manager.clone())?;

        Ok(Self {
            config,
            client,
            token_manager,
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &GDriveConfig {
        &self.config
    }

    /// Token manager (useful for inspecting the current access token).
    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    /// Find the file behind `key`, failing if there is none.
    async fn require(&self, key: &BlobKey) -> Result<DriveFile> {
        self.client
            .find_by_title(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", key)))
    }
}

/// MIME type implied by a key's extension.
fn guess_mime_type(key: &BlobKey) -> Option<String> {
    mime_guess::from_path(key.as_str())
        .first()
        .map(|mime| mime.essence_str().to_string())
}

impl From<DriveFile> for BlobInfo {
    fn from(file: DriveFile) -> Self {
        let size = file.size_bytes();
        let parent = file.parent_id().map(str::to_string);
        Self {
            id: file.id,
            title: file.title,
            mime_type: file.mime_type,
            parent,
            key: file.md5_checksum,
            size,
            modified: file.modified_date,
        }
    }
}

#[async_trait]
impl BlobStore for GDriveBlobStore {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn write(&self, options: WriteOptions, data: ByteStream) -> Result<BlobInfo> {
        // The upload body cannot be replayed, so start with a fresh token.
        self.token_manager.refresh().await?;

        let mime_type = options.key.as_ref().and_then(guess_mime_type);
        let content_type = mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let parent = options.parent.or_else(|| self.config.parent.clone());

        let metadata = NewFile {
            title: options.key.as_ref().map(|k| k.to_string()),
            mime_type,
            parents: parent.map(ParentReference::link).into_iter().collect(),
        };

        let upload_id = self
            .client
            .start_resumable_upload(&metadata, &content_type, options.size)
            .await?;
        debug!(upload_id = %upload_id, "Resumable upload session started");

        let file = self
            .client
            .upload_content(&upload_id, &content_type, options.size, data)
            .await?;

        let checksum = file.md5_checksum.clone().ok_or_else(|| {
            Error::Storage(format!("Upload of {} returned no md5Checksum", file.id))
        })?;
        self.client
            .add_property(&file.id, KEY_PROPERTY, &checksum)
            .await?;

        info!(id = %file.id, key = %checksum, "Blob written");
        Ok(file.into())
    }

    async fn read(&self, key: &BlobKey) -> Result<ByteStream> {
        debug!(key = %key, "Reading blob");
        let file = self.require(key).await?;
        self.client.download_stream(&file).await
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.client.find_by_title(key).await?.is_some())
    }

    async fn remove(&self, key: &BlobKey) -> Result<()> {
        let file = self.require(key).await?;
        self.client.delete(&file.id).await?;
        info!(id = %file.id, key = %key, "Blob removed");
        Ok(())
    }

    async fn mkdir(&self, name: &str, options: MkdirOptions) -> Result<BlobInfo> {
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Folder name cannot be empty".to_string(),
            ));
        }

        let parent = options.parent.or_else(|| self.config.parent.clone());
        let folder = self.client.create_folder(name, parent.as_deref()).await?;
        Ok(folder.into())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<BlobInfo>> {
        Ok(self.client.find_by_title(key).await?.map(BlobInfo::from))
    }
}

/// Create a Google Drive store from configuration.
pub fn create_gdrive_store(config: serde_json::Value) -> Result<Arc<dyn BlobStore>> {
    let gdrive_config: GDriveConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid GDrive config: {}", e)))?;

    Ok(Arc::new(GDriveBlobStore::new(gdrive_config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_config() -> GDriveConfig {
        GDriveConfig {
            auth: AuthConfig::new("test_client", Secret::new("test_secret")),
            refresh_token: Secret::new("test_refresh"),
            parent: Some("default_folder".to_string()),
            endpoints: Endpoints::default(),
        }
    }

    #[test]
    fn test_gdrive_config_serialization() {
        let config = create_test_config();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: GDriveConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.parent, config.parent);
        assert_eq!(deserialized.refresh_token, config.refresh_token);
        assert_eq!(deserialized.endpoints, Endpoints::default());
    }

    #[test]
    fn test_create_store() {
        let store = GDriveBlobStore::new(create_test_config()).unwrap();
        assert_eq!(store.name(), "gdrive");
        assert_eq!(store.config().parent.as_deref(), Some("default_folder"));
    }

    #[test]
    fn test_create_store_requires_refresh_token() {
        let mut config = create_test_config();
        config.refresh_token = Secret::new("");

        let result = GDriveBlobStore::new(config);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_guess_mime_type() {
        let key = BlobKey::new("photo.JPG").unwrap();
        assert_eq!(guess_mime_type(&key).as_deref(), Some("image/jpeg"));

        let key = BlobKey::new("README").unwrap();
        assert_eq!(guess_mime_type(&key), None);
    }

    #[test]
    fn test_blob_info_from_drive_file() {
        let file = DriveFile {
            id: "file_id".to_string(),
            title: Some("test.txt".to_string()),
            mime_type: Some("text/plain".to_string()),
            file_size: Some("1024".to_string()),
            md5_checksum: Some("md5hash".to_string()),
            download_url: None,
            parents: vec![ParentReference::link("parent_id")],
            modified_date: Some(Utc::now()),
        };

        let info = BlobInfo::from(file);

        assert_eq!(info.id, "file_id");
        assert_eq!(info.title.as_deref(), Some("test.txt"));
        assert_eq!(info.size, Some(1024));
        assert_eq!(info.key.as_deref(), Some("md5hash"));
        assert_eq!(info.parent.as_deref(), Some("parent_id"));
    }

    #[test]
    fn test_create_gdrive_store_factory() {
        let config_json = serde_json::json!({
            "auth": {"client_id": "id", "client_secret": "secret"},
            "refresh_token": "1//token"
        });

        let store = create_gdrive_store(config_json).unwrap();
        assert_eq!(store.name(), "gdrive");
    }

    #[test]
    fn test_create_gdrive_store_invalid_config() {
        let invalid_config = serde_json::json!({
            "invalid": "config"
        });

        let result = create_gdrive_store(invalid_config);
        assert!(result.is_err());
    }
}
