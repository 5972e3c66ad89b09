//! Configuration file and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use driveblobs_common::Secret;
use driveblobs_storage::gdrive::AuthConfig;
use driveblobs_storage::{Endpoints, GDriveConfig};

/// Config file name inside the per-user config directory.
const CONFIG_FILE_NAME: &str = "config.json";

/// Default location: `<config_dir>/driveblobs/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("driveblobs").join(CONFIG_FILE_NAME))
}

/// On-disk configuration. Every field may be missing; flags fill the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Folder new blobs go to by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub refresh_token: Option<Secret>,
    pub parent: Option<String>,
}

impl FileConfig {
    /// OAuth2 client settings, flags taking precedence over the file.
    pub fn auth_config(&self, overrides: &Overrides) -> Result<AuthConfig> {
        let client_id = overrides
            .client_id
            .clone()
            .or_else(|| self.client_id.clone())
            .context("No OAuth2 client ID configured (use --client-id)")?;
        let client_secret = overrides
            .client_secret
            .clone()
            .or_else(|| self.client_secret.clone())
            .context("No OAuth2 client secret configured (use --client-secret)")?;

        let mut auth = AuthConfig::new(client_id, client_secret);
        if let Some(redirect_url) = &self.redirect_url {
            auth.redirect_url = redirect_url.clone();
        }
        Ok(auth)
    }

    /// Build the store configuration, flags taking precedence over the file.
    pub fn resolve(self, overrides: &Overrides) -> Result<GDriveConfig> {
        let auth = self.auth_config(overrides)?;
        let refresh_token = overrides
            .refresh_token
            .clone()
            .or(self.refresh_token)
            .context("No refresh token configured (run `driveblobs login` or use --refresh-token)")?;

        Ok(GDriveConfig {
            auth,
            refresh_token,
            parent: overrides.parent.clone().or(self.parent),
            endpoints: self.endpoints,
        })
    }
}

/// Load the config file; a missing file yields an empty configuration.
pub async fn load(path: &Path) -> Result<FileConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .with_context(|| format!("Invalid config file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read config file {}", path.display())),
    }
}

/// Write the config file, creating its directory if needed.
pub async fn save(path: &Path, config: &FileConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;

    // The file holds the refresh token and client secret.
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("Failed to open config file {}", path.display()))?;

    // An existing file keeps its old mode on open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
    }

    file.write_all(&json)
        .await
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    file.flush().await?;
    Ok(())
}
