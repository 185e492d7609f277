//! HTTP API layer mapping routes onto the hub services.

use asset_hub_core::assets::AssetService;
use asset_hub_core::auth::{CredentialHasher, Hs256Keys, TokenVerifier};
use asset_hub_core::authz::Authorizer;
use asset_hub_core::identity::IdentityService;
use asset_hub_core::importer::BulkImporter;
use asset_hub_core::model::Actor;
use asset_hub_core::storage::Store;
use asset_hub_core::teams::TeamService;
use asset_hub_core::HubError;
use axum::{
    extract::{self, FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::Config;

mod assets;
mod identity;
mod import;
mod teams;

/// Shared application state: the services plus the token verifier.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityService>,
    pub teams: Arc<TeamService>,
    pub assets: Arc<AssetService>,
    pub importer: Arc<BulkImporter>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub import_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::with_hasher(store, config, Arc::new(CredentialHasher::default()))
    }

    /// State with an explicit hasher, so tests can use cheap parameters.
    pub fn with_hasher(
        store: Arc<dyn Store>,
        config: &Config,
        hasher: Arc<CredentialHasher>,
    ) -> Self {
        let keys = Arc::new(Hs256Keys::new(&config.jwt_secret));
        let authz = Authorizer::new(store.clone());
        Self {
            identity: Arc::new(IdentityService::new(
                store.clone(),
                hasher.clone(),
                keys.clone(),
            )),
            teams: Arc::new(TeamService::new(store.clone(), authz.clone())),
            assets: Arc::new(AssetService::new(store.clone(), authz)),
            importer: Arc::new(
                BulkImporter::new(store, hasher).with_workers(config.import_workers),
            ),
            verifier: keys,
            import_timeout: config.import_timeout,
        }
    }
}

/// Error returned by every handler, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Hub(HubError),
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError::Hub(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Hub(err) => match &err {
                HubError::Validation(_) | HubError::Precondition(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                HubError::Denied(_) => (StatusCode::FORBIDDEN, err.to_string()),
                HubError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                HubError::InvalidCredentials => (StatusCode::UNAUTHORIZED, err.to_string()),
                _ => {
                    error!("request failed: {err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_string(),
                    )
                }
            },
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Authenticated actor taken from a `Bearer` token.
#[derive(Clone, Copy, Debug)]
pub struct AuthContext(pub Actor);

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;
        let claims = state
            .verifier
            .verify(token.trim())
            .await
            .ok_or(ApiError::Unauthorized)?;
        Ok(Self(claims.actor()))
    }
}

/// Authenticated actor holding the global `manager` role.
#[derive(Clone, Copy, Debug)]
pub struct ManagerContext(pub Actor);

impl FromRequestParts<AppState> for ManagerContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthContext(actor) = AuthContext::from_request_parts(parts, state).await?;
        if !actor.is_manager() {
            return Err(HubError::denied("manager role required").into());
        }
        Ok(Self(actor))
    }
}

/// JSON request body whose rejections render like every other API error.
pub struct Body<T>(pub T);

impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Path parameters; a malformed id is a JSON 400 rather than plain text.
pub struct Path<T>(pub T);

impl<S, T> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let extract::Path(value) = extract::Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Query string, rejected the same way as [`Path`].
pub struct Query<T>(pub T);

impl<S, T> FromRequestParts<S> for Query<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let extract::Query(value) = extract::Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users", get(identity::list_users))
        .route("/profile", get(identity::profile))
        .route("/my-teams", get(teams::my_teams))
        .route("/my-folders", get(assets::my_folders))
        .route("/teams", get(teams::search_teams).post(teams::create_team))
        .route("/teams/all", get(teams::all_teams))
        .route("/teams/{team_id}", get(teams::get_team))
        .route("/teams/{team_id}/assets", get(assets::team_assets))
        .route("/teams/{team_id}/members", post(teams::add_member))
        .route(
            "/teams/{team_id}/members/{user_id}",
            delete(teams::remove_member),
        )
        .route("/teams/{team_id}/managers", post(teams::add_manager))
        .route(
            "/teams/{team_id}/managers/{user_id}",
            delete(teams::remove_manager),
        )
        .route("/folders", post(assets::create_folder))
        .route(
            "/folders/{folder_id}",
            get(assets::get_folder)
                .put(assets::update_folder)
                .delete(assets::delete_folder),
        )
        .route("/folders/{folder_id}/notes", post(assets::create_note))
        .route(
            "/folders/{folder_id}/share",
            get(assets::folder_shares).post(assets::share_folder),
        )
        .route(
            "/folders/{folder_id}/share/{user_id}",
            delete(assets::revoke_folder_share),
        )
        .route(
            "/notes/{note_id}",
            get(assets::get_note)
                .put(assets::update_note)
                .delete(assets::delete_note),
        )
        .route(
            "/notes/{note_id}/share",
            get(assets::note_shares).post(assets::share_note),
        )
        .route(
            "/notes/{note_id}/share/{user_id}",
            delete(assets::revoke_note_share),
        )
        .route("/users/{user_id}/assets", get(assets::user_assets))
        .route("/import-users", post(import::import_users));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/auth/register", post(identity::register))
        .route("/auth/login", post(identity::login))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body as HttpBody};
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn app() -> Router {
        let store: Arc<dyn Store> = Arc::new(asset_hub_core::storage::MemoryStore::new());
        router(AppState::new(store, &Config::default()))
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let resp = app()
            .oneshot(Request::builder().uri("/health").body(HttpBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_or_bad_tokens() {
        let app = app();
        for auth in [None, Some("Bearer nonsense"), Some("Basic abc")] {
            let mut req = Request::builder().uri("/api/profile");
            if let Some(value) = auth {
                req = req.header("Authorization", value);
            }
            let resp = app
                .clone()
                .oneshot(req.body(HttpBody::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            let body = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(v["error"], "unauthorized");
        }
    }

    #[test]
    fn hub_errors_map_to_status_codes() {
        let cases = [
            (HubError::validation("bad"), StatusCode::BAD_REQUEST),
            (HubError::Precondition("last".into()), StatusCode::BAD_REQUEST),
            (HubError::denied("no"), StatusCode::FORBIDDEN),
            (HubError::NotFound("folder"), StatusCode::NOT_FOUND),
            (HubError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (HubError::Credential("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
