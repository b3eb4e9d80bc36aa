//! OAuth identity provider abstraction.
//!
//! Discord in production; tests substitute a canned provider so the flow can
//! run without network access.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RelayError;
use crate::models::identity::ProviderIdentity;

const DISCORD_API: &str = "https://discord.com/api/v10";
const DISCORD_AUTHORIZE: &str = "https://discord.com/oauth2/authorize";

/// Tokens returned from the authorization-code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The URL the browser is redirected to, carrying our state token.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, RelayError>;

    /// Fetch the identity behind an access token.
    async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, RelayError>;

    /// Whether the provider still accepts this access token.
    async fn validate_token(&self, access_token: &str) -> Result<bool, RelayError>;
}

// ---------------------------------------------------------------------------
// Discord implementation
// ---------------------------------------------------------------------------

pub struct DiscordOAuth {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl DiscordOAuth {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    avatar: Option<String>,
}

#[async_trait]
impl IdentityProvider for DiscordOAuth {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{DISCORD_AUTHORIZE}?client_id={}&redirect_uri={}&response_type=code&scope=identify&state={}",
            self.client_id,
            urlencode(&self.redirect_uri),
            state
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, RelayError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let resp = self
            .client
            .post(format!("{DISCORD_API}/oauth2/token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RelayError::NoAccessToken);
        }

        let tokens: TokenSet = resp
            .json()
            .await
            .map_err(|_| RelayError::NoAccessToken)?;
        if tokens.access_token.is_empty() {
            return Err(RelayError::NoAccessToken);
        }
        Ok(tokens)
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, RelayError> {
        let resp = self
            .client
            .get(format!("{DISCORD_API}/users/@me"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RelayError::NoIdentity);
        }

        let user: DiscordUser = resp.json().await.map_err(|_| RelayError::NoIdentity)?;
        Ok(ProviderIdentity {
            id: user.id,
            username: user.username,
            avatar: user.avatar,
        })
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool, RelayError> {
        let resp = self
            .client
            .get(format!("{DISCORD_API}/users/@me"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(resp.status().is_success())
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
