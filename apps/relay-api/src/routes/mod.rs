pub mod auth;
pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(crate::relay::server::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::begin,
        auth::session,
        auth::logout,
        auth::check_block,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::models::block::BlockStatus,
            crate::models::identity::PublicIdentity,
            auth::SessionResponse,
        )
    ),
    tags(
        (name = "Auth", description = "Sign-in and session management"),
    )
)]
pub struct ApiDoc;
