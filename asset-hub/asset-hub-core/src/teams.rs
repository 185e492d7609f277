//! Team graph: teams, their manager and member rosters.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::authz::Authorizer;
use crate::error::{required, HubError, Result};
use crate::model::{Actor, Team, TeamDetail, TeamId, TeamRole, UserId, UserProfile, UserTeams};
use crate::storage::{ManagerRemoval, Store, StoreError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateTeam {
    pub name: String,
    #[serde(default)]
    pub managers: Vec<UserId>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Keep the first occurrence of each id.
fn dedup(ids: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// A roster insert naming a user that does not exist is a lookup failure,
/// not a store fault.
fn missing_user(err: StoreError) -> HubError {
    match err {
        StoreError::MissingReference { entity: "user", .. } => HubError::NotFound("user"),
        StoreError::MissingReference { entity: "team", .. } => HubError::NotFound("team"),
        other => other.into(),
    }
}

pub struct TeamService {
    store: Arc<dyn Store>,
    authz: Authorizer,
}

impl TeamService {
    pub fn new(store: Arc<dyn Store>, authz: Authorizer) -> Self {
        Self { store, authz }
    }

    async fn team(&self, id: TeamId) -> Result<Team> {
        self.store
            .get_team(id)
            .await?
            .ok_or(HubError::NotFound("team"))
    }

    /// Load the team and require `actor` to manage it.
    async fn managed_team(&self, actor: &Actor, id: TeamId) -> Result<Team> {
        let team = self.team(id).await?;
        if !self.authz.is_team_manager_of(actor.id, id).await? {
            return Err(HubError::denied("only team managers can change the team"));
        }
        Ok(team)
    }

    async fn profiles(&self, team: TeamId, role: TeamRole) -> Result<Vec<UserProfile>> {
        let ids = self.store.team_users(team, role).await?;
        Ok(self
            .store
            .users_by_ids(&ids)
            .await?
            .iter()
            .map(UserProfile::from)
            .collect())
    }

    /// Create a team. The creator always ends up among the managers.
    pub async fn create_team(&self, actor: &Actor, req: CreateTeam) -> Result<Team> {
        if !actor.is_manager() {
            return Err(HubError::denied("only managers can create teams"));
        }
        let name = required("name", &req.name)?;
        let managers = dedup(std::iter::once(actor.id).chain(req.managers));
        let members = dedup(req.members);

        let now = Utc::now();
        let team = Team {
            id: Uuid::new_v4(),
            name,
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert_team(team.clone(), &managers, &members)
            .await
            .map_err(missing_user)?;
        info!(
            team = %team.id,
            creator = %actor.id,
            managers = managers.len(),
            members = members.len(),
            "created team"
        );
        Ok(team)
    }

    pub async fn add_manager(&self, actor: &Actor, team: TeamId, user: UserId) -> Result<()> {
        self.managed_team(actor, team).await?;
        let added = self
            .store
            .add_team_user(team, user, TeamRole::Manager)
            .await
            .map_err(missing_user)?;
        if !added {
            return Err(HubError::Precondition("user is already a manager".to_string()));
        }
        info!(%team, %user, by = %actor.id, "added team manager");
        Ok(())
    }

    /// Adding an existing member changes nothing and succeeds.
    pub async fn add_member(&self, actor: &Actor, team: TeamId, user: UserId) -> Result<()> {
        self.managed_team(actor, team).await?;
        let added = self
            .store
            .add_team_user(team, user, TeamRole::Member)
            .await
            .map_err(missing_user)?;
        if added {
            info!(%team, %user, by = %actor.id, "added team member");
        } else {
            debug!(%team, %user, "user already a member");
        }
        Ok(())
    }

    pub async fn remove_manager(&self, actor: &Actor, team: TeamId, user: UserId) -> Result<()> {
        self.managed_team(actor, team).await?;
        match self.store.remove_team_manager(team, user).await? {
            ManagerRemoval::Removed => {
                info!(%team, %user, by = %actor.id, "removed team manager");
                Ok(())
            }
            ManagerRemoval::NotAManager => {
                debug!(%team, %user, "user was not a manager");
                Ok(())
            }
            ManagerRemoval::LastManager => Err(HubError::Precondition(
                "cannot remove the last manager".to_string(),
            )),
        }
    }

    pub async fn remove_member(&self, actor: &Actor, team: TeamId, user: UserId) -> Result<()> {
        self.managed_team(actor, team).await?;
        if self.store.remove_team_member(team, user).await? {
            info!(%team, %user, by = %actor.id, "removed team member");
        }
        Ok(())
    }

    /// Team with both rosters; visible to its managers and members.
    pub async fn get_team(&self, actor: &Actor, id: TeamId) -> Result<TeamDetail> {
        let team = self.team(id).await?;
        let visible = self.authz.is_team_manager_of(actor.id, id).await?
            || self.authz.is_team_member_of(actor.id, id).await?;
        if !visible {
            return Err(HubError::denied("not a member of this team"));
        }
        Ok(TeamDetail {
            managers: self.profiles(id, TeamRole::Manager).await?,
            members: self.profiles(id, TeamRole::Member).await?,
            team,
        })
    }

    pub async fn all_teams(&self, actor: &Actor) -> Result<Vec<Team>> {
        if !actor.is_manager() {
            return Err(HubError::denied("only managers can list all teams"));
        }
        Ok(self.store.list_teams().await?)
    }

    pub async fn user_teams(&self, actor: &Actor) -> Result<UserTeams> {
        Ok(UserTeams {
            manager_teams: self.store.teams_for_user(actor.id, TeamRole::Manager).await?,
            member_teams: self.store.teams_for_user(actor.id, TeamRole::Member).await?,
        })
    }

    /// Case-insensitive name filter over the teams `actor` belongs to.
    pub async fn search_teams(&self, actor: &Actor, query: &str) -> Result<Vec<Team>> {
        let needle = query.trim().to_lowercase();
        let UserTeams {
            manager_teams,
            member_teams,
        } = self.user_teams(actor).await?;
        let mut seen = HashSet::new();
        let mut teams: Vec<Team> = manager_teams
            .into_iter()
            .chain(member_teams)
            .filter(|team| seen.insert(team.id))
            .filter(|team| team.name.to_lowercase().contains(&needle))
            .collect();
        teams.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(teams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, User};
    use crate::storage::MemoryStore;

    struct Fixture {
        store: Arc<dyn Store>,
        teams: TeamService,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            Self {
                teams: TeamService::new(store.clone(), Authorizer::new(store.clone())),
                store,
            }
        }

        async fn user(&self, name: &str, role: Role) -> Actor {
            let now = Utc::now();
            let user = User {
                id: Uuid::new_v4(),
                username: name.to_string(),
                email: format!("{name}@example.com"),
                credential_hash: String::new(),
                role,
                created_at: now,
                updated_at: now,
            };
            let actor = Actor::new(user.id, role);
            self.store.insert_user(user).await.unwrap();
            actor
        }

        async fn managers(&self, team: TeamId) -> HashSet<UserId> {
            self.store
                .team_users(team, TeamRole::Manager)
                .await
                .unwrap()
                .into_iter()
                .collect()
        }
    }

    fn named(name: &str) -> CreateTeam {
        CreateTeam {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn last_manager_scenario() {
        let fx = Fixture::new();
        let a = fx.user("a", Role::Manager).await;
        let b = fx.user("b", Role::Member).await;
        let c = fx.user("c", Role::Manager).await;

        let team = fx.teams.create_team(&a, named("Alpha")).await.unwrap().id;
        fx.teams.add_member(&a, team, b.id).await.unwrap();

        let err = fx.teams.remove_manager(&a, team, a.id).await.unwrap_err();
        assert!(matches!(err, HubError::Precondition(_)));
        assert_eq!(fx.managers(team).await, HashSet::from([a.id]));

        fx.teams.add_manager(&a, team, c.id).await.unwrap();
        fx.teams.remove_manager(&a, team, a.id).await.unwrap();
        assert_eq!(fx.managers(team).await, HashSet::from([c.id]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_step_downs_keep_one_manager() {
        let fx = Fixture::new();
        let teams = Arc::new(TeamService::new(
            fx.store.clone(),
            Authorizer::new(fx.store.clone()),
        ));
        for round in 0..20 {
            let a = fx.user(&format!("a{round}"), Role::Manager).await;
            let c = fx.user(&format!("c{round}"), Role::Manager).await;
            let team = teams.create_team(&a, named("Pair")).await.unwrap().id;
            teams.add_manager(&a, team, c.id).await.unwrap();

            let step_down = |actor: Actor| {
                let teams = teams.clone();
                tokio::spawn(async move { teams.remove_manager(&actor, team, actor.id).await })
            };
            let (first, second) = tokio::join!(step_down(a), step_down(c));
            let outcomes = [first.unwrap(), second.unwrap()];

            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
            assert_eq!(
                outcomes
                    .iter()
                    .filter(|r| matches!(r, Err(HubError::Precondition(_))))
                    .count(),
                1
            );
            assert_eq!(fx.managers(team).await.len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn managers_removing_each_other_leave_one_behind() {
        let fx = Fixture::new();
        let teams = Arc::new(TeamService::new(
            fx.store.clone(),
            Authorizer::new(fx.store.clone()),
        ));
        for round in 0..20 {
            let a = fx.user(&format!("a{round}"), Role::Manager).await;
            let c = fx.user(&format!("c{round}"), Role::Manager).await;
            let team = teams.create_team(&a, named("Pair")).await.unwrap().id;
            teams.add_manager(&a, team, c.id).await.unwrap();

            let remove = |actor: Actor, target: UserId| {
                let teams = teams.clone();
                tokio::spawn(async move { teams.remove_manager(&actor, team, target).await })
            };
            let (first, second) = tokio::join!(remove(a, c.id), remove(c, a.id));
            let outcomes = [first.unwrap(), second.unwrap()];

            // The loser either lost its manager role first or hit the last one.
            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(outcomes.iter().all(|r| matches!(
                r,
                Ok(()) | Err(HubError::Precondition(_)) | Err(HubError::Denied(_))
            )));
            let managers = fx.managers(team).await;
            assert_eq!(managers.len(), 1);
            assert!(managers.contains(&a.id) || managers.contains(&c.id));
        }
    }

    #[tokio::test]
    async fn creator_is_always_a_manager_and_duplicates_collapse() {
        let fx = Fixture::new();
        let a = fx.user("a", Role::Manager).await;
        let b = fx.user("b", Role::Member).await;

        let team = fx
            .teams
            .create_team(
                &a,
                CreateTeam {
                    name: "Beta".into(),
                    managers: vec![a.id, a.id],
                    members: vec![b.id, b.id],
                },
            )
            .await
            .unwrap();

        let detail = fx.teams.get_team(&b, team.id).await.unwrap();
        assert_eq!(detail.managers.len(), 1);
        assert_eq!(detail.managers[0].id, a.id);
        assert_eq!(detail.members.len(), 1);
    }

    #[tokio::test]
    async fn only_global_managers_create_teams() {
        let fx = Fixture::new();
        let b = fx.user("b", Role::Member).await;
        let err = fx.teams.create_team(&b, named("Gamma")).await.unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));

        let a = fx.user("a", Role::Manager).await;
        let err = fx.teams.create_team(&a, named("  ")).await.unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_initial_user_fails_the_whole_creation() {
        let fx = Fixture::new();
        let a = fx.user("a", Role::Manager).await;
        let err = fx
            .teams
            .create_team(
                &a,
                CreateTeam {
                    name: "Delta".into(),
                    managers: vec![],
                    members: vec![Uuid::new_v4()],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound("user")));
        assert!(fx.teams.all_teams(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn roster_changes_require_team_manager() {
        let fx = Fixture::new();
        let a = fx.user("a", Role::Manager).await;
        let outsider = fx.user("o", Role::Manager).await;
        let b = fx.user("b", Role::Member).await;
        let team = fx.teams.create_team(&a, named("Alpha")).await.unwrap().id;

        let err = fx.teams.add_member(&outsider, team, b.id).await.unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));
        let err = fx
            .teams
            .add_member(&a, Uuid::new_v4(), b.id)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound("team")));
    }

    #[tokio::test]
    async fn add_member_is_idempotent_add_manager_is_not() {
        let fx = Fixture::new();
        let a = fx.user("a", Role::Manager).await;
        let b = fx.user("b", Role::Member).await;
        let team = fx.teams.create_team(&a, named("Alpha")).await.unwrap().id;

        fx.teams.add_member(&a, team, b.id).await.unwrap();
        fx.teams.add_member(&a, team, b.id).await.unwrap();

        fx.teams.add_manager(&a, team, b.id).await.unwrap();
        let err = fx.teams.add_manager(&a, team, b.id).await.unwrap_err();
        assert!(matches!(err, HubError::Precondition(_)));

        fx.teams.remove_member(&a, team, b.id).await.unwrap();
        fx.teams.remove_member(&a, team, b.id).await.unwrap();
        assert!(fx.teams.get_team(&b, team).await.unwrap().members.is_empty());
    }

    #[tokio::test]
    async fn team_views_respect_membership() {
        let fx = Fixture::new();
        let a = fx.user("a", Role::Manager).await;
        let b = fx.user("b", Role::Member).await;
        let stranger = fx.user("s", Role::Member).await;
        let alpha = fx.teams.create_team(&a, named("Alpha Squad")).await.unwrap();
        let beta = fx.teams.create_team(&a, named("Beta")).await.unwrap();
        fx.teams.add_member(&a, alpha.id, b.id).await.unwrap();

        let err = fx.teams.get_team(&stranger, alpha.id).await.unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));

        let mine = fx.teams.user_teams(&b).await.unwrap();
        assert!(mine.manager_teams.is_empty());
        assert_eq!(mine.member_teams, vec![alpha.clone()]);

        let found = fx.teams.search_teams(&a, "SQUAD").await.unwrap();
        assert_eq!(found, vec![alpha.clone()]);
        assert_eq!(fx.teams.search_teams(&a, "").await.unwrap().len(), 2);
        assert!(fx.teams.search_teams(&stranger, "").await.unwrap().is_empty());

        assert!(fx.teams.all_teams(&b).await.is_err());
        let all = fx.teams.all_teams(&a).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&alpha) && all.contains(&beta));
    }
}
