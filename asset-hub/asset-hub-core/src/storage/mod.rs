//! Persistence boundary for users, teams, folders, notes and share grants.
//!
//! The store is the single source of truth. Nothing above it caches
//! membership or share state, so every authorization decision re-reads it.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    AccessLevel, Folder, FolderId, Note, NoteChanges, NoteId, Share, ShareTarget, Team, TeamId,
    TeamRole, User, UserId,
};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{field} already exists: {value}")]
    UniqueViolation { field: &'static str, value: String },
    #[error("{entity} {id} does not exist")]
    MissingReference { entity: &'static str, id: Uuid },
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A relation whose existence can be checked without loading rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    FolderOwner { folder: FolderId, user: UserId },
    NoteOwner { note: NoteId, user: UserId },
    /// A grant on `target` for `user` at `min_access` or above.
    Grant {
        target: ShareTarget,
        user: UserId,
        min_access: AccessLevel,
    },
    TeamRole {
        team: TeamId,
        user: UserId,
        role: TeamRole,
    },
}

/// Result of the conditional last-manager-protected removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerRemoval {
    Removed,
    /// The user held no manager row; nothing changed.
    NotAManager,
    /// Removal would leave the team without managers; nothing changed.
    LastManager,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn exists(&self, relation: Relation) -> Result<bool, StoreError>;

    /// Insert a user. Email uniqueness is enforced here and is authoritative.
    async fn insert_user(&self, user: User) -> Result<(), StoreError>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    /// Insert a team together with its initial membership in one step.
    async fn insert_team(
        &self,
        team: Team,
        managers: &[UserId],
        members: &[UserId],
    ) -> Result<(), StoreError>;
    async fn get_team(&self, id: TeamId) -> Result<Option<Team>, StoreError>;
    async fn list_teams(&self) -> Result<Vec<Team>, StoreError>;
    async fn teams_for_user(&self, user: UserId, role: TeamRole) -> Result<Vec<Team>, StoreError>;
    async fn team_users(&self, team: TeamId, role: TeamRole) -> Result<Vec<UserId>, StoreError>;
    /// Returns `false` when the user already held the role.
    async fn add_team_user(
        &self,
        team: TeamId,
        user: UserId,
        role: TeamRole,
    ) -> Result<bool, StoreError>;
    async fn remove_team_member(&self, team: TeamId, user: UserId) -> Result<bool, StoreError>;
    /// Count check and delete happen atomically.
    async fn remove_team_manager(
        &self,
        team: TeamId,
        user: UserId,
    ) -> Result<ManagerRemoval, StoreError>;

    async fn insert_folder(&self, folder: Folder) -> Result<(), StoreError>;
    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>, StoreError>;
    async fn rename_folder(&self, id: FolderId, name: String) -> Result<Option<Folder>, StoreError>;
    /// Deletes note shares, notes, folder shares, then the folder.
    async fn delete_folder(&self, id: FolderId) -> Result<bool, StoreError>;
    async fn folders_owned_by(&self, users: &[UserId]) -> Result<Vec<Folder>, StoreError>;
    async fn folders_shared_with(&self, users: &[UserId]) -> Result<Vec<Folder>, StoreError>;

    async fn insert_note(&self, note: Note) -> Result<(), StoreError>;
    async fn get_note(&self, id: NoteId) -> Result<Option<Note>, StoreError>;
    async fn update_note(&self, id: NoteId, changes: NoteChanges)
        -> Result<Option<Note>, StoreError>;
    /// Deletes the note's shares, then the note.
    async fn delete_note(&self, id: NoteId) -> Result<bool, StoreError>;
    async fn notes_in_folder(&self, folder: FolderId) -> Result<Vec<Note>, StoreError>;

    /// Insert or replace the grant for `(target, share.user_id)`.
    /// Returns the access level that was replaced, if any.
    async fn upsert_share(
        &self,
        target: ShareTarget,
        share: Share,
    ) -> Result<Option<AccessLevel>, StoreError>;
    async fn remove_share(&self, target: ShareTarget, user: UserId) -> Result<bool, StoreError>;
    async fn shares_of(&self, target: ShareTarget) -> Result<Vec<Share>, StoreError>;
}
