use asset_hub_core::model::{Team, TeamDetail, TeamId, UserId, UserTeams};
use asset_hub_core::teams::CreateTeam;
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{ApiResult, AppState, AuthContext, Body, ManagerContext, Path, Query};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerRef {
    manager_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRef {
    member_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    team_name: String,
    #[serde(default)]
    managers: Vec<ManagerRef>,
    #[serde(default)]
    members: Vec<MemberRef>,
}

impl From<CreateTeamRequest> for CreateTeam {
    fn from(req: CreateTeamRequest) -> Self {
        CreateTeam {
            name: req.team_name,
            managers: req.managers.into_iter().map(|m| m.manager_id).collect(),
            members: req.members.into_iter().map(|m| m.member_id).collect(),
        }
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    name: String,
}

pub async fn create_team(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
    Body(req): Body<CreateTeamRequest>,
) -> ApiResult<(StatusCode, Json<Team>)> {
    let team = state.teams.create_team(&actor, req.into()).await?;
    Ok((StatusCode::CREATED, Json(team)))
}

pub async fn add_member(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
    Path(team_id): Path<TeamId>,
    Body(req): Body<MemberRef>,
) -> ApiResult<StatusCode> {
    state.teams.add_member(&actor, team_id, req.member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
    Path((team_id, user_id)): Path<(TeamId, UserId)>,
) -> ApiResult<StatusCode> {
    state.teams.remove_member(&actor, team_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_manager(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
    Path(team_id): Path<TeamId>,
    Body(req): Body<ManagerRef>,
) -> ApiResult<StatusCode> {
    state.teams.add_manager(&actor, team_id, req.manager_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_manager(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
    Path((team_id, user_id)): Path<(TeamId, UserId)>,
) -> ApiResult<StatusCode> {
    state.teams.remove_manager(&actor, team_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_team(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Path(team_id): Path<TeamId>,
) -> ApiResult<Json<TeamDetail>> {
    Ok(Json(state.teams.get_team(&actor, team_id).await?))
}

pub async fn all_teams(
    State(state): State<AppState>,
    ManagerContext(actor): ManagerContext,
) -> ApiResult<Json<Vec<Team>>> {
    Ok(Json(state.teams.all_teams(&actor).await?))
}

pub async fn search_teams(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Team>>> {
    Ok(Json(state.teams.search_teams(&actor, &query.name).await?))
}

pub async fn my_teams(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
) -> ApiResult<Json<UserTeams>> {
    Ok(Json(state.teams.user_teams(&actor).await?))
}
