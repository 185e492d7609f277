use asset_hub_core::assets::CreateNote;
use asset_hub_core::model::{
    AccessLevel, Actor, Folder, FolderId, FolderListing, FolderWithNotes, Note, NoteChanges, NoteId,
    Share, ShareTarget, TeamId, UserId,
};
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{ApiResult, AppState, AuthContext, Body, Path};

#[derive(Deserialize)]
pub struct FolderRequest {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    user_id: UserId,
    access: String,
}

async fn share(
    state: &AppState,
    actor: &Actor,
    target: ShareTarget,
    req: ShareRequest,
) -> ApiResult<Json<Share>> {
    let access: AccessLevel = req.access.trim().parse()?;
    Ok(Json(
        state.assets.share(actor, target, req.user_id, access).await?,
    ))
}

pub async fn create_folder(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Body(req): Body<FolderRequest>,
) -> ApiResult<(StatusCode, Json<Folder>)> {
    let folder = state.assets.create_folder(&actor, &req.name).await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn get_folder(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(folder_id): Path<FolderId>,
) -> ApiResult<Json<FolderWithNotes>> {
    Ok(Json(state.assets.get_folder(&actor, folder_id).await?))
}

pub async fn update_folder(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(folder_id): Path<FolderId>,
    Body(req): Body<FolderRequest>,
) -> ApiResult<Json<Folder>> {
    Ok(Json(
        state
            .assets
            .rename_folder(&actor, folder_id, &req.name)
            .await?,
    ))
}

pub async fn delete_folder(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(folder_id): Path<FolderId>,
) -> ApiResult<StatusCode> {
    state.assets.delete_folder(&actor, folder_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_note(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(folder_id): Path<FolderId>,
    Body(req): Body<CreateNote>,
) -> ApiResult<(StatusCode, Json<Note>)> {
    let note = state.assets.create_note(&actor, folder_id, req).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn get_note(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(note_id): Path<NoteId>,
) -> ApiResult<Json<Note>> {
    Ok(Json(state.assets.get_note(&actor, note_id).await?))
}

pub async fn update_note(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(note_id): Path<NoteId>,
    Body(changes): Body<NoteChanges>,
) -> ApiResult<Json<Note>> {
    Ok(Json(
        state.assets.update_note(&actor, note_id, changes).await?,
    ))
}

pub async fn delete_note(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(note_id): Path<NoteId>,
) -> ApiResult<StatusCode> {
    state.assets.delete_note(&actor, note_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share_folder(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(folder_id): Path<FolderId>,
    Body(req): Body<ShareRequest>,
) -> ApiResult<Json<Share>> {
    share(&state, &actor, ShareTarget::Folder(folder_id), req).await
}

pub async fn share_note(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(note_id): Path<NoteId>,
    Body(req): Body<ShareRequest>,
) -> ApiResult<Json<Share>> {
    share(&state, &actor, ShareTarget::Note(note_id), req).await
}

pub async fn folder_shares(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(folder_id): Path<FolderId>,
) -> ApiResult<Json<Vec<Share>>> {
    Ok(Json(
        state
            .assets
            .shares(&actor, ShareTarget::Folder(folder_id))
            .await?,
    ))
}

pub async fn note_shares(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(note_id): Path<NoteId>,
) -> ApiResult<Json<Vec<Share>>> {
    Ok(Json(
        state.assets.shares(&actor, ShareTarget::Note(note_id)).await?,
    ))
}

pub async fn revoke_folder_share(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path((folder_id, user_id)): Path<(FolderId, UserId)>,
) -> ApiResult<StatusCode> {
    state
        .assets
        .revoke(&actor, ShareTarget::Folder(folder_id), user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_note_share(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path((note_id, user_id)): Path<(NoteId, UserId)>,
) -> ApiResult<StatusCode> {
    state
        .assets
        .revoke(&actor, ShareTarget::Note(note_id), user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_folders(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
) -> ApiResult<Json<FolderListing>> {
    Ok(Json(state.assets.my_folders(&actor).await?))
}

pub async fn user_assets(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<FolderListing>> {
    Ok(Json(state.assets.user_assets(&actor, user_id).await?))
}

pub async fn team_assets(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(team_id): Path<TeamId>,
) -> ApiResult<Json<FolderListing>> {
    Ok(Json(state.assets.team_assets(&actor, team_id).await?))
}
