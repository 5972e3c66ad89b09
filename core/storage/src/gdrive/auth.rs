//! OAuth2 authentication and token management for Google Drive.

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use driveblobs_common::{Error, Result, Secret};

use super::client::Endpoints;

/// Redirect URL for OAuth2 flow (localhost for desktop apps).
const REDIRECT_URL: &str = "http://localhost:8080/callback";

/// Google Drive OAuth2 scope.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Lifetime assumed when the token endpoint does not report one.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Bearer token with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Token sent in the `Authorization` header.
    pub secret: Secret,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Tokens minted by the consent flow.
#[derive(Debug, Clone)]
pub struct GrantedTokens {
    /// Short-lived access token.
    pub access: AccessToken,
    /// Long-lived refresh token to store in the configuration.
    pub refresh_token: Secret,
}

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OAuth2 client ID.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: Secret,
    /// Redirect URL for OAuth2 callback.
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    /// Scope requested during the consent flow.
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_redirect_url() -> String {
    REDIRECT_URL.to_string()
}

fn default_scope() -> String {
    DRIVE_SCOPE.to_string()
}

impl AuthConfig {
    /// Create a configuration with the default redirect URL and scope.
    pub fn new(client_id: impl Into<String>, client_secret: Secret) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_url: default_redirect_url(),
            scope: default_scope(),
        }
    }
}

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: GoogleClient,
    http: oauth2::reqwest::Client,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager.
    ///
    /// # Errors
    /// - Invalid auth, token or redirect URL
    /// - HTTP client construction failure
    pub fn new(config: AuthConfig, endpoints: &Endpoints) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                config.client_secret.expose().to_string(),
            ))
            .set_auth_uri(
                AuthUrl::new(endpoints.auth_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(endpoints.token_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
            )
            .set_auth_type(AuthType::RequestBody);

        // Token endpoints must not be followed through redirects.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
        })
    }

    /// Generate the authorization URL for the user to visit.
    ///
    /// Returns the URL and a CSRF token that should be verified on callback.
    pub fn authorization_url(&self) -> (String, String) {
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(self.config.scope.clone()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        (auth_url.to_string(), csrf_token.secret().clone())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - Invalid authorization code
    /// - No refresh token in the response
    /// - Network errors
    pub async fn exchange_code(&self, code: &str) -> Result<GrantedTokens> {
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        let refresh_token = token_result
            .refresh_token()
            .ok_or_else(|| {
                Error::Authentication(
                    "No refresh token received. Ensure 'offline' access and 'consent' prompt were requested.".to_string(),
                )
            })?
            .secret()
            .clone();

        Ok(GrantedTokens {
            access: access_token_from(token_result.access_token().secret(), token_result.expires_in()),
            refresh_token: Secret::new(refresh_token),
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    /// - Invalid or revoked refresh token
    /// - Network errors
    pub async fn refresh_token(&self, refresh_token: &Secret) -> Result<AccessToken> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        Ok(access_token_from(
            token_result.access_token().secret(),
            token_result.expires_in(),
        ))
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

fn access_token_from(secret: &str, expires_in: Option<std::time::Duration>) -> AccessToken {
    let lifetime = expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

    AccessToken {
        secret: Secret::new(secret),
        expires_at: Utc::now() + lifetime,
    }
}

/// Authorization code pasted back by the user after consent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastedAuthorization {
    /// The authorization code.
    pub code: String,
    /// The `state` parameter, present when a full redirect URL was pasted.
    pub state: Option<String>,
}

impl PastedAuthorization {
    /// Parse what the user pasted.
    ///
    /// Accepts either the bare code or the full redirect URL carrying a
    /// `code` query parameter.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidInput(
                "Authorization code cannot be empty".to_string(),
            ));
        }

        let Ok(url) = url::Url::parse(input) else {
            return Ok(Self {
                code: input.to_string(),
                state: None,
            });
        };

        let param = |wanted: &str| {
            url.query_pairs()
                .find(|(name, _)| name == wanted)
                .map(|(_, value)| value.into_owned())
        };

        let code = param("code").ok_or_else(|| {
            Error::InvalidInput("Redirect URL has no 'code' parameter".to_string())
        })?;

        Ok(Self {
            code,
            state: param("state"),
        })
    }

    /// Check the returned state against the CSRF token we issued.
    ///
    /// A bare code carries no state and is accepted.
    pub fn verify_state(&self, csrf_token: &str) -> Result<()> {
        match &self.state {
            Some(state) if state != csrf_token => Err(Error::Authentication(
                "OAuth2 state mismatch; restart the login".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Holds the refresh token and the in-memory access token.
pub struct TokenManager {
    auth_manager: AuthManager,
    refresh_token: Secret,
    current: RwLock<Option<AccessToken>>,
}

impl TokenManager {
    /// Create a token manager; no access token is held until first use.
    pub fn new(auth_manager: AuthManager, refresh_token: Secret) -> Self {
        Self {
            auth_manager,
            refresh_token,
            current: RwLock::new(None),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - Token refresh failed
    pub async fn access_token(&self) -> Result<Secret> {
        {
            let current = self.current.read().await;
            if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.secret.clone());
            }
        }

        let mut current = self.current.write().await;

        // Double-check after acquiring write lock
        if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.secret.clone());
        }

        info!("Obtaining access token");
        let token = self.auth_manager.refresh_token(&self.refresh_token).await?;
        let secret = token.secret.clone();
        *current = Some(token);

        Ok(secret)
    }

    /// Exchange the refresh token for a new access token, regardless of
    /// whether the current one still looks valid.
    ///
    /// # Errors
    /// - Token refresh failed
    pub async fn refresh(&self) -> Result<Secret> {
        let mut current = self.current.write().await;

        info!("Refreshing access token");
        let token = self.auth_manager.refresh_token(&self.refresh_token).await?;
        let secret = token.secret.clone();
        *current = Some(token);

        Ok(secret)
    }

    /// Replace an access token the server rejected.
    ///
    /// If another caller already swapped in a different, unexpired token
    /// while we waited for the lock, that token is returned without a new
    /// exchange.
    ///
    /// # Errors
    /// - Token refresh failed
    pub async fn refresh_rejected(&self, rejected: &Secret) -> Result<Secret> {
        let mut current = self.current.write().await;

        if let Some(token) = current
            .as_ref()
            .filter(|t| t.secret != *rejected && !t.is_expired())
        {
            return Ok(token.secret.clone());
        }

        info!("Refreshing rejected access token");
        let token = self.auth_manager.refresh_token(&self.refresh_token).await?;
        let secret = token.secret.clone();
        *current = Some(token);

        Ok(secret)
    }

    /// Get the current access token, if any.
    pub async fn current(&self) -> Option<AccessToken> {
        self.current.read().await.clone()
    }
}
