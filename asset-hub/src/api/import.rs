use asset_hub_core::importer::ImportResult;
use axum::{extract::State, Json};
use bytes::Bytes;
use tokio::time::Instant;

use super::{ApiResult, AppState, ManagerContext};

/// Import users from a raw CSV request body.
pub async fn import_users(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
    body: Bytes,
) -> ApiResult<Json<ImportResult>> {
    let deadline = state.import_timeout.map(|timeout| Instant::now() + timeout);
    Ok(Json(
        state.importer.import_csv(&actor, &body, deadline).await?,
    ))
}
