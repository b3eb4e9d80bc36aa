use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The identity attributes fetched from the provider during sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Provider-assigned subject ID (Discord snowflake).
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
}

/// Identity attributes safe to expose to the browser.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicIdentity {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
}

impl From<ProviderIdentity> for PublicIdentity {
    fn from(identity: ProviderIdentity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            avatar: identity.avatar,
        }
    }
}
