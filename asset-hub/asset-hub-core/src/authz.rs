//! Access-control decisions.
//!
//! Every check is a read-only query against the current store state; nothing
//! is cached between calls, so a grant revoked a moment ago is already
//! reflected in the next decision. A decision is a plain `bool`; `Err` only
//! carries store faults.
//!
//! The rules compose three facts and nothing else:
//!
//! * ownership of the folder or note itself,
//! * share grants naming the actor on that exact resource,
//! * team-scoped roles for team views.
//!
//! Folder grants never flow down to the notes inside the folder, and no grant
//! ever confers mutation of a folder or the right to re-share.

use std::sync::Arc;

use crate::model::{AccessLevel, Actor, FolderId, NoteId, ShareTarget, TeamId, TeamRole, UserId};
use crate::storage::{Relation, Store, StoreError};

pub type Decision = Result<bool, StoreError>;

#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn Store>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn owns_folder(&self, actor: UserId, folder: FolderId) -> Decision {
        self.store
            .exists(Relation::FolderOwner {
                folder,
                user: actor,
            })
            .await
    }

    pub async fn owns_note(&self, actor: UserId, note: NoteId) -> Decision {
        self.store
            .exists(Relation::NoteOwner { note, user: actor })
            .await
    }

    /// Ownership of whichever resource `target` names.
    pub async fn owns(&self, actor: UserId, target: ShareTarget) -> Decision {
        match target {
            ShareTarget::Folder(folder) => self.owns_folder(actor, folder).await,
            ShareTarget::Note(note) => self.owns_note(actor, note).await,
        }
    }

    async fn has_grant(&self, actor: UserId, target: ShareTarget, min_access: AccessLevel) -> Decision {
        self.store
            .exists(Relation::Grant {
                target,
                user: actor,
                min_access,
            })
            .await
    }

    async fn owns_or_granted(
        &self,
        actor: UserId,
        target: ShareTarget,
        min_access: AccessLevel,
    ) -> Decision {
        if self.owns(actor, target).await? {
            return Ok(true);
        }
        self.has_grant(actor, target, min_access).await
    }

    pub async fn can_read_folder(&self, actor: UserId, folder: FolderId) -> Decision {
        self.owns_or_granted(actor, ShareTarget::Folder(folder), AccessLevel::Read)
            .await
    }

    /// Rename or otherwise mutate the folder row. Grants never satisfy this.
    pub async fn can_write_folder(&self, actor: UserId, folder: FolderId) -> Decision {
        self.owns_folder(actor, folder).await
    }

    pub async fn can_create_note_in_folder(&self, actor: UserId, folder: FolderId) -> Decision {
        self.owns_or_granted(actor, ShareTarget::Folder(folder), AccessLevel::Write)
            .await
    }

    pub async fn can_read_note(&self, actor: UserId, note: NoteId) -> Decision {
        self.owns_or_granted(actor, ShareTarget::Note(note), AccessLevel::Read)
            .await
    }

    pub async fn can_write_note(&self, actor: UserId, note: NoteId) -> Decision {
        self.owns_or_granted(actor, ShareTarget::Note(note), AccessLevel::Write)
            .await
    }

    pub async fn can_delete_folder(&self, actor: UserId, folder: FolderId) -> Decision {
        self.owns_folder(actor, folder).await
    }

    pub async fn can_delete_note(&self, actor: UserId, note: NoteId) -> Decision {
        self.owns_note(actor, note).await
    }

    pub async fn can_share_folder(&self, actor: UserId, folder: FolderId) -> Decision {
        self.owns_folder(actor, folder).await
    }

    pub async fn can_share_note(&self, actor: UserId, note: NoteId) -> Decision {
        self.owns_note(actor, note).await
    }

    pub async fn can_revoke_share(&self, actor: UserId, target: ShareTarget) -> Decision {
        self.owns(actor, target).await
    }

    pub async fn is_team_manager_of(&self, actor: UserId, team: TeamId) -> Decision {
        self.store
            .exists(Relation::TeamRole {
                team,
                user: actor,
                role: TeamRole::Manager,
            })
            .await
    }

    pub async fn is_team_member_of(&self, actor: UserId, team: TeamId) -> Decision {
        self.store
            .exists(Relation::TeamRole {
                team,
                user: actor,
                role: TeamRole::Member,
            })
            .await
    }

    pub async fn can_view_team_assets(&self, actor: UserId, team: TeamId) -> Decision {
        self.is_team_manager_of(actor, team).await
    }

    /// Global managers may view anyone's assets, regardless of team.
    pub fn can_view_user_assets(actor: &Actor, target: UserId) -> bool {
        actor.is_manager() || actor.id == target
    }
}
