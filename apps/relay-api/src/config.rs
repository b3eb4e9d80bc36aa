/// Relay API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Public origin of this deployment (e.g. `https://support.example.com`).
    /// Used to build the OAuth redirect URI.
    pub base_url: String,
    /// Discord bot token.
    pub discord_token: String,
    /// OAuth application client ID.
    pub discord_client_id: String,
    /// OAuth application client secret.
    pub discord_client_secret: String,
    /// Guild where support channels are created.
    pub guild_id: u64,
    /// Category the per-visitor support channels are placed under.
    pub support_category_id: u64,
    /// Privileged channel where moderation commands are accepted.
    pub support_channel_id: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            base_url: required_var("BASE_URL"),
            discord_token: required_var("DISCORD_TOKEN"),
            discord_client_id: required_var("DISCORD_CLIENT_ID"),
            discord_client_secret: required_var("DISCORD_CLIENT_SECRET"),
            guild_id: required_id("GUILD_ID"),
            support_category_id: required_id("SUPPORT_CATEGORY_ID"),
            support_channel_id: required_id("SUPPORT_CHANNEL_ID"),
        }
    }

    /// The redirect URI registered with the OAuth application.
    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/auth/discord/callback", self.base_url)
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn required_id(name: &str) -> u64 {
    required_var(name)
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a numeric Discord ID"))
}
