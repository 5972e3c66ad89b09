//! DriveBlobs CLI - Command line interface for blob operations on Google Drive.
//!
//! Blobs are addressed by key (the Drive file title). Credentials come from
//! the config file written by `driveblobs login`, flags or the environment.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use driveblobs_common::{BlobKey, Error, Secret};
use driveblobs_storage::gdrive::{AuthManager, PastedAuthorization};
use driveblobs_storage::{BlobStore, ByteStream, GDriveBlobStore, MkdirOptions, WriteOptions};

use config::Overrides;

#[derive(Parser)]
#[command(name = "driveblobs")]
#[command(about = "DriveBlobs - Blob storage on Google Drive")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/driveblobs/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CredentialArgs {
    /// OAuth2 client ID.
    #[arg(long, global = true, env = "DRIVEBLOBS_CLIENT_ID")]
    client_id: Option<String>,

    /// OAuth2 client secret.
    #[arg(long, global = true, env = "DRIVEBLOBS_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// OAuth2 refresh token.
    #[arg(long, global = true, env = "DRIVEBLOBS_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Folder ID new blobs and folders go to.
    #[arg(short, long, global = true, env = "DRIVEBLOBS_PARENT")]
    parent: Option<String>,
}

impl CredentialArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone().map(Secret::new),
            refresh_token: self.refresh_token.clone().map(Secret::new),
            parent: self.parent.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize access to Google Drive and store the refresh token.
    Login {
        /// Print the consent URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },

    /// Upload a blob.
    Write {
        /// Key (filename) to store the blob under.
        #[arg(short, long)]
        key: String,

        /// File to upload (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Download a blob.
    Read {
        /// Key of the blob.
        #[arg(short, long)]
        key: String,

        /// Destination file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check whether a blob exists (exit code 1 if not).
    Exists {
        /// Key of the blob.
        #[arg(short, long)]
        key: String,
    },

    /// Delete a blob.
    Remove {
        /// Key of the blob.
        #[arg(short, long)]
        key: String,
    },

    /// Create a folder.
    Mkdir {
        /// Folder name.
        #[arg(short, long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for blob data
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()
            .context("Could not determine the config directory; pass --config")?,
    };
    let overrides = cli.credentials.overrides();

    match cli.command {
        Commands::Login { no_browser } => cmd_login(&config_path, &overrides, no_browser).await?,

        Commands::Write { key, input } => {
            let store = open_store(&config_path, &overrides).await?;
            cmd_write(&store, &key, input.as_deref()).await?
        }

        Commands::Read { key, output } => {
            let store = open_store(&config_path, &overrides).await?;
            cmd_read(&store, &key, output.as_deref()).await?
        }

        Commands::Exists { key } => {
            let store = open_store(&config_path, &overrides).await?;
            if !cmd_exists(&store, &key).await? {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Remove { key } => {
            let store = open_store(&config_path, &overrides).await?;
            cmd_remove(&store, &key).await?
        }

        Commands::Mkdir { name } => {
            let store = open_store(&config_path, &overrides).await?;
            cmd_mkdir(&store, &name).await?
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Build the Drive store from the config file and overrides.
async fn open_store(config_path: &Path, overrides: &Overrides) -> Result<GDriveBlobStore> {
    let file_config = config::load(config_path).await?;
    let gdrive_config = file_config.resolve(overrides)?;
    GDriveBlobStore::new(gdrive_config).context("Failed to set up Google Drive store")
}

fn parse_key(key: &str) -> Result<BlobKey> {
    BlobKey::new(key).with_context(|| format!("Invalid key '{}'", key))
}

fn byte_stream<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::new(reader).map(|chunk| chunk.map_err(Error::from)))
}

/// Run the consent flow and save the refresh token.
async fn cmd_login(config_path: &Path, overrides: &Overrides, no_browser: bool) -> Result<()> {
    let mut file_config = config::load(config_path).await?;
    let auth_config = file_config.auth_config(overrides)?;

    let manager = AuthManager::new(auth_config.clone(), &file_config.endpoints)
        .context("Invalid OAuth2 configuration")?;
    let (url, csrf_token) = manager.authorization_url();

    println!("Open this URL to authorize DriveBlobs:\n\n  {}\n", url);
    if !no_browser {
        if let Err(e) = open::that(&url) {
            warn!("Could not open a browser: {}", e);
        }
    }

    let pasted = rpassword::prompt_password("Paste the authorization code or redirect URL: ")
        .context("Failed to read authorization code")?;
    let pasted = PastedAuthorization::parse(&pasted)?;
    pasted.verify_state(&csrf_token)?;

    let tokens = manager
        .exchange_code(&pasted.code)
        .await
        .context("Failed to exchange authorization code")?;

    file_config.client_id = Some(auth_config.client_id);
    file_config.client_secret = Some(auth_config.client_secret);
    file_config.refresh_token = Some(tokens.refresh_token);
    config::save(config_path, &file_config).await?;

    println!("Refresh token saved to {}", config_path.display());
    Ok(())
}

/// Upload a file or stdin.
async fn cmd_write(
    store: &GDriveBlobStore,
    key: &str,
    input: Option<&Path>,
) -> Result<()> {
    let key = parse_key(key)?;
    info!("Writing blob {}", key);

    let (body, size) = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let size = file.metadata().await?.len();
            (byte_stream(file), Some(size))
        }
        None => (byte_stream(tokio::io::stdin()), None),
    };

    // The parent comes from the resolved store config
    let options = WriteOptions {
        key: Some(key),
        parent: None,
        size,
    };
    let blob = store
        .write(options, body)
        .await
        .context("Failed to write blob")?;

    println!("{}", serde_json::to_string_pretty(&blob)?);
    Ok(())
}

/// Download a blob to a file or stdout.
async fn cmd_read(store: &GDriveBlobStore, key: &str, output: Option<&Path>) -> Result<()> {
    let key = parse_key(key)?;
    let mut stream = store.read(&key).await.context("Failed to read blob")?;

    let written = match output {
        Some(path) => download_to_file(&mut stream, path).await?,
        None => copy_stream(&mut stream, &mut tokio::io::stdout()).await?,
    };

    info!("Read {} bytes from {}", written, key);
    Ok(())
}

/// Drain `stream` into `out`, returning the number of bytes written.
async fn copy_stream<W>(stream: &mut ByteStream, out: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Download interrupted")?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

/// Sibling path a download is staged at until it completes.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Download into `path`, leaving no file behind if the stream fails.
async fn download_to_file(stream: &mut ByteStream, path: &Path) -> Result<u64> {
    let partial = partial_path(path);
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;

    let written = match copy_stream(stream, &mut file).await {
        Ok(written) => written,
        Err(e) => {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                warn!("Could not remove {}: {}", partial.display(), remove_err);
            }
            return Err(e);
        }
    };
    drop(file);

    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("Failed to move download into {}", path.display()))?;
    Ok(written)
}

/// Print whether a blob exists.
async fn cmd_exists(store: &GDriveBlobStore, key: &str) -> Result<bool> {
    let key = parse_key(key)?;
    let exists = store
        .exists(&key)
        .await
        .context("Failed to look up blob")?;

    println!("{}", exists);
    Ok(exists)
}

/// Delete a blob.
async fn cmd_remove(store: &GDriveBlobStore, key: &str) -> Result<()> {
    let key = parse_key(key)?;
    store
        .remove(&key)
        .await
        .context("Failed to remove blob")?;

    println!("Blob removed: {}", key);
    Ok(())
}

/// Create a folder.
async fn cmd_mkdir(store: &GDriveBlobStore, name: &str) -> Result<()> {
    let folder = store
        .mkdir(name, MkdirOptions::default())
        .await
        .context("Failed to create folder")?;

    println!("{}", serde_json::to_string_pretty(&folder)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn chunks(items: Vec<driveblobs_common::Result<Bytes>>) -> ByteStream {
        Box::pin(stream::iter(items))
    }

    #[test]
    fn test_parent_flag_is_global() {
        let cli = Cli::try_parse_from([
            "driveblobs", "write", "--key", "a.txt", "--parent", "folder-1",
        ])
        .unwrap();

        assert_eq!(cli.credentials.parent.as_deref(), Some("folder-1"));
        assert_eq!(cli.credentials.overrides().parent.as_deref(), Some("folder-1"));
        assert!(matches!(cli.command, Commands::Write { .. }));
    }

    #[test]
    fn test_partial_path_is_sibling() {
        let path = Path::new("/tmp/out/blob.bin");
        assert_eq!(partial_path(path), PathBuf::from("/tmp/out/blob.bin.part"));
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let mut body = chunks(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);

        let written = download_to_file(&mut body, &path).await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let mut body = chunks(vec![
            Ok(Bytes::from_static(b"hello ")),
            Err(Error::Network("connection reset".to_string())),
        ]);

        let result = download_to_file(&mut body, &path).await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }
}
