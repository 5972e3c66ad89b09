//! Google Drive v2 API client.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Body, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use driveblobs_common::{BlobKey, Error, Result};

use super::auth::TokenManager;
use crate::provider::ByteStream;

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v2";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v2";
/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Base URLs for every remote endpoint the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Metadata API, e.g. `https://www.googleapis.com/drive/v2`.
    pub api_base: String,
    /// Media upload API.
    pub upload_base: String,
    /// OAuth2 consent page.
    pub auth_url: String,
    /// OAuth2 token exchange.
    pub token_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

/// Reference from a file to one of its parent folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub id: String,
}

impl ParentReference {
    /// Link to the folder `id`.
    pub fn link(id: impl Into<String>) -> Self {
        Self {
            kind: Some("drive#fileLink".to_string()),
            id: id.into(),
        }
    }
}

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File title.
    #[serde(default)]
    pub title: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File size in bytes, as a decimal string (absent for folders).
    #[serde(default)]
    pub file_size: Option<String>,
    /// MD5 checksum (only for binary content).
    #[serde(default)]
    pub md5_checksum: Option<String>,
    /// Short-lived URL serving the content.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Parent folders.
    #[serde(default)]
    pub parents: Vec<ParentReference>,
    /// Modified time.
    #[serde(default)]
    pub modified_date: Option<DateTime<Utc>>,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.file_size.as_ref().and_then(|s| s.parse().ok())
    }

    /// First parent folder ID.
    pub fn parent_id(&self) -> Option<&str> {
        self.parents.first().map(|p| p.id.as_str())
    }
}

/// Metadata sent when creating a file or folder.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<ParentReference>,
}

/// Custom key/value attached to a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: Some("drive#property".to_string()),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    items: Vec<DriveFile>,
}

/// Drive search expression matching a non-trashed file titled `key`.
pub fn title_query(key: &BlobKey) -> String {
    format!("title = '{}' and trashed = false", key.query_literal())
}

/// Extract the session ID from a resumable upload `Location` header.
pub fn upload_id_from_location(location: &str) -> Result<String> {
    let url = Url::parse(location)
        .map_err(|e| Error::Storage(format!("Invalid upload location '{}': {}", location, e)))?;

    url.query_pairs()
        .find(|(name, _)| name == "upload_id")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| Error::Storage(format!("No upload_id in upload location '{}'", location)))
}

/// Google Drive API client.
///
/// Every call goes through [`DriveClient::send_authorized`], which refreshes
/// the token and retries once when Drive answers 401.
pub struct DriveClient {
    http: Client,
    endpoints: Endpoints,
    token_manager: Arc<TokenManager>,
}

impl DriveClient {
    /// Create a new Drive client.
    ///
    /// # Errors
    /// - HTTP client construction failure
    pub fn new(endpoints: Endpoints, token_manager: Arc<TokenManager>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("DriveBlobs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints,
            token_manager,
        })
    }

    /// Send a request built by `build` with a bearer token.
    ///
    /// On 401 the token is refreshed and a freshly built request is sent
    /// once more. The second response is returned whatever its status.
    pub async fn send_authorized<F>(&self, action: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.token_manager.access_token().await?;
        let response = self
            .send(action, build(&self.http).bearer_auth(token.expose()))
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(action, "Drive rejected the access token, refreshing and retrying once");
        let token = self.token_manager.refresh_rejected(&token).await?;
        self.send(action, build(&self.http).bearer_auth(token.expose()))
            .await
    }

    async fn send(&self, action: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", action, e)))?;

        debug!(action, status = %response.status(), url = %response.url(), "Drive response");
        Ok(response)
    }

    /// Find a non-trashed file by title.
    pub async fn find_by_title(&self, key: &BlobKey) -> Result<Option<DriveFile>> {
        let url = format!("{}/files", self.endpoints.api_base);
        let query = title_query(key);

        let response = self
            .send_authorized("find file", |http| {
                http.get(&url)
                    .query(&[("q", query.as_str()), ("maxResults", "1")])
            })
            .await?;

        let list: FileList = handle_response(response).await?;
        Ok(list.items.into_iter().next())
    }

    /// Start a resumable upload session and return its upload ID.
    pub async fn start_resumable_upload(
        &self,
        metadata: &NewFile,
        content_type: &str,
        size: Option<u64>,
    ) -> Result<String> {
        let url = format!("{}/files", self.endpoints.upload_base);

        let response = self
            .send_authorized("start resumable upload", |http| {
                let mut request = http
                    .post(&url)
                    .query(&[("uploadType", "resumable")])
                    .header("X-Upload-Content-Type", content_type)
                    .json(metadata);
                if let Some(size) = size {
                    request = request.header("X-Upload-Content-Length", size.to_string());
                }
                request
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        // Extract upload session from Location header
        let location = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::Storage("No upload location in response".to_string()))?
            .to_str()
            .map_err(|e| Error::Storage(format!("Invalid upload location: {}", e)))?;

        upload_id_from_location(location)
    }

    /// Stream content into a resumable upload session.
    ///
    /// The body can only be sent once, so this request is not retried.
    pub async fn upload_content(
        &self,
        upload_id: &str,
        content_type: &str,
        size: Option<u64>,
        body: ByteStream,
    ) -> Result<DriveFile> {
        let url = format!("{}/files", self.endpoints.upload_base);
        let token = self.token_manager.access_token().await?;

        let mut request = self
            .http
            .put(&url)
            .query(&[("uploadType", "resumable"), ("upload_id", upload_id)])
            .bearer_auth(token.expose())
            .header(header::CONTENT_TYPE, content_type);
        if let Some(size) = size {
            request = request.header(header::CONTENT_LENGTH, size);
        }

        let response = self
            .send("upload content", request.body(Body::wrap_stream(body)))
            .await?;

        handle_response(response).await
    }

    /// Attach a custom property to a file.
    pub async fn add_property(&self, file_id: &str, key: &str, value: &str) -> Result<Property> {
        let url = format!("{}/files/{}/properties", self.endpoints.api_base, file_id);
        let property = Property::new(key, value);

        let response = self
            .send_authorized("add property", |http| http.post(&url).json(&property))
            .await?;

        handle_response(response).await
    }

    /// Stream a file's content.
    pub async fn download_stream(&self, file: &DriveFile) -> Result<ByteStream> {
        let url = match &file.download_url {
            Some(url) => url.clone(),
            None => format!("{}/files/{}?alt=media", self.endpoints.api_base, file.id),
        };

        let response = self
            .send_authorized("download file", |http| http.get(&url))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| Error::Network(format!("Stream read error: {}", e))));

        Ok(Box::pin(stream))
    }

    /// Create a folder.
    pub async fn create_folder(&self, title: &str, parent_id: Option<&str>) -> Result<DriveFile> {
        let url = format!("{}/files", self.endpoints.api_base);
        let metadata = NewFile {
            title: Some(title.to_string()),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: parent_id.map(ParentReference::link).into_iter().collect(),
        };

        let response = self
            .send_authorized("create folder", |http| http.post(&url).json(&metadata))
            .await?;

        handle_response(response).await
    }

    /// Delete a file permanently.
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.endpoints.api_base, file_id);

        let response = self
            .send_authorized("delete file", |http| http.delete(&url))
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Parse a successful JSON response or map the failure status.
async fn handle_response<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    } else {
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Resource not found: {}", body)),
        StatusCode::UNAUTHORIZED => Error::Authentication("Invalid or expired token".to_string()),
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("Access denied: {}", body)),
        _ => Error::Api {
            status: status.as_u16(),
            body,
        },
    }
}
