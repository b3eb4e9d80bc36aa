//! Sign-in routes: OAuth redirect, callback, session introspection.

use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::BeginAuth;
use crate::error::{ApiError, RelayError};
use crate::models::block::BlockStatus;
use crate::models::identity::PublicIdentity;
use crate::AppState;

const SESSION_COOKIE: &str = "sessionId";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/discord", get(begin))
        .route("/auth/discord/callback", get(callback))
        .route("/auth/session", get(session))
        .route("/auth/logout", post(logout))
        .route("/auth/check-block/{subject_id}", get(check_block))
}

/// Address a sign-in attempt is rate limited by: the first hop of
/// `X-Forwarded-For` when a proxy supplied one, otherwise the peer address
/// of the connection.
struct ClientAddr(String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientAddr(resolve_client_addr(&parts.headers, peer)))
    }
}

fn resolve_client_addr(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (forwarded, peer) {
        (Some(hop), _) => hop.to_string(),
        (None, Some(ip)) => ip.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

// ---------------------------------------------------------------------------
// GET /auth/discord
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/auth/discord",
    tag = "Auth",
    responses(
        (status = 303, description = "Redirect to the provider, or home when already signed in"),
        (status = 429, description = "Too many sign-in attempts"),
    ),
)]
pub async fn begin(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    // A browser with a live session has nothing to do here.
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state
            .gateway
            .check_session(cookie.value())
            .await
            .unwrap_or(None)
            .is_some()
        {
            return Ok(Redirect::to("/").into_response());
        }
    }

    match state.gateway.begin_auth(&addr).await? {
        BeginAuth::Redirect(url) => Ok(Redirect::to(&url).into_response()),
        BeginAuth::RateLimited => Err(ApiError::too_many_requests(
            "Too many sign-in attempts. Try again in a few minutes.",
        )),
    }
}

// ---------------------------------------------------------------------------
// GET /auth/discord/callback
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    if params.error.is_some() {
        return Redirect::to("/?error=auth_failed").into_response();
    }
    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Redirect::to("/?error=no_code").into_response();
    };

    match state.gateway.complete_auth(&oauth_state, &code).await {
        Ok((session_id, user)) => {
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Strict)
                .max_age(time::Duration::hours(
                    crate::auth::sessions::SESSION_TTL_HOURS,
                ))
                .path("/");
            (jar.add(cookie), Html(auth_success_page(&user))).into_response()
        }
        Err(err) => {
            let tag = match err {
                RelayError::StateMismatch => "invalid_state",
                RelayError::NoAccessToken => "no_access_token",
                RelayError::NoIdentity => "no_user_data",
                _ => {
                    tracing::warn!(%err, "sign-in completion failed");
                    "auth_failed"
                }
            };
            Redirect::to(&format!("/?error={tag}")).into_response()
        }
    }
}

/// Page served in the popup: hands the identity to the opener and closes.
fn auth_success_page(user: &PublicIdentity) -> String {
    let user_json = serde_json::to_string(user).unwrap_or_else(|_| "null".to_string());
    format!(
        r#"<!DOCTYPE html>
<html><head><title>Signed in</title></head>
<body>
<p>Signed in. You can close this window.</p>
<script>
  if (window.opener) {{
    window.opener.postMessage({{ type: "authSuccess", user: {user_json} }}, "*");
  }}
  window.close();
</script>
</body></html>"#
    )
}

// ---------------------------------------------------------------------------
// GET /auth/session
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicIdentity>,
}

#[utoipa::path(
    get,
    path = "/auth/session",
    tag = "Auth",
    responses(
        (status = 200, description = "Session state", body = SessionResponse),
    ),
)]
pub async fn session(State(state): State<AppState>, jar: CookieJar) -> Json<SessionResponse> {
    let user = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state
            .gateway
            .check_session(cookie.value())
            .await
            .unwrap_or(None),
        None => None,
    };
    Json(SessionResponse {
        authenticated: user.is_some(),
        user,
    })
}

// ---------------------------------------------------------------------------
// POST /auth/logout
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Session removed"),
    ),
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.gateway.logout(cookie.value()).await?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, Json(serde_json::json!({ "success": true }))))
}

// ---------------------------------------------------------------------------
// GET /auth/check-block/{subject_id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/auth/check-block/{subject_id}",
    tag = "Auth",
    params(("subject_id" = String, Path, description = "Provider subject ID")),
    responses(
        (status = 200, description = "Block state", body = BlockStatus),
    ),
)]
pub async fn check_block(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<BlockStatus>, ApiError> {
    Ok(Json(state.blocks.check(&subject_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", value.parse().unwrap());
        headers
    }

    #[test]
    fn forwarded_header_first_hop_wins() {
        let peer = Some("127.0.0.1".parse().unwrap());
        let addr = resolve_client_addr(&forwarded("203.0.113.7, 10.0.0.1"), peer);
        assert_eq!(addr, "203.0.113.7");
    }

    #[test]
    fn direct_connections_fall_back_to_the_peer_address() {
        let peer = Some("192.0.2.33".parse().unwrap());
        assert_eq!(resolve_client_addr(&HeaderMap::new(), peer), "192.0.2.33");
    }

    #[test]
    fn empty_forwarded_header_is_ignored() {
        let peer = Some("192.0.2.33".parse().unwrap());
        assert_eq!(resolve_client_addr(&forwarded("  "), peer), "192.0.2.33");
    }

    #[test]
    fn no_header_and_no_peer_is_unknown() {
        assert_eq!(resolve_client_addr(&HeaderMap::new(), None), "unknown");
    }
}
