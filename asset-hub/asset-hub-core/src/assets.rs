//! Asset tree: folders, notes and the share grants on them.
//!
//! Every mutation asks the [`Authorizer`] first and only then touches the
//! store. Lookups resolve existence before authorization, so a missing
//! resource reads as `NotFound` for everyone.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::authz::Authorizer;
use crate::error::{required, HubError, Result};
use crate::model::{
    AccessLevel, Actor, Folder, FolderId, FolderListing, FolderWithNotes, Note, NoteChanges,
    NoteId, Share, ShareTarget, TeamId, TeamRole, UserId,
};
use crate::storage::Store;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateNote {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Which notes of a folder a listing carries.
#[derive(Clone, Copy)]
enum NoteScope {
    /// Only notes the actor could open directly.
    ReadableBy(UserId),
    All,
}

pub struct AssetService {
    store: Arc<dyn Store>,
    authz: Authorizer,
}

impl AssetService {
    pub fn new(store: Arc<dyn Store>, authz: Authorizer) -> Self {
        Self { store, authz }
    }

    async fn folder(&self, id: FolderId) -> Result<Folder> {
        self.store
            .get_folder(id)
            .await?
            .ok_or(HubError::NotFound("folder"))
    }

    async fn note(&self, id: NoteId) -> Result<Note> {
        self.store
            .get_note(id)
            .await?
            .ok_or(HubError::NotFound("note"))
    }

    /// Owner of the share target, or `NotFound` when it does not exist.
    async fn target_owner(&self, target: ShareTarget) -> Result<UserId> {
        Ok(match target {
            ShareTarget::Folder(id) => self.folder(id).await?.owner_id,
            ShareTarget::Note(id) => self.note(id).await?.owner_id,
        })
    }

    async fn with_notes(&self, folder: Folder, scope: NoteScope) -> Result<FolderWithNotes> {
        let mut notes = self.store.notes_in_folder(folder.id).await?;
        if let NoteScope::ReadableBy(actor) = scope {
            let mut readable = Vec::with_capacity(notes.len());
            for note in notes {
                if self.authz.can_read_note(actor, note.id).await? {
                    readable.push(note);
                }
            }
            notes = readable;
        }
        Ok(FolderWithNotes { folder, notes })
    }

    async fn listing(&self, users: &[UserId], scope: NoteScope) -> Result<FolderListing> {
        let owned = self.store.folders_owned_by(users).await?;
        let owned_ids: HashSet<FolderId> = owned.iter().map(|f| f.id).collect();
        let shared = self
            .store
            .folders_shared_with(users)
            .await?
            .into_iter()
            .filter(|f| !owned_ids.contains(&f.id));

        let mut listing = FolderListing::default();
        for folder in owned {
            listing.owned_folders.push(self.with_notes(folder, scope).await?);
        }
        for folder in shared {
            listing.shared_folders.push(self.with_notes(folder, scope).await?);
        }
        Ok(listing)
    }

    pub async fn create_folder(&self, actor: &Actor, name: &str) -> Result<Folder> {
        let name = required("name", name)?;
        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            name,
            owner_id: actor.id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_folder(folder.clone()).await?;
        info!(folder = %folder.id, owner = %actor.id, "created folder");
        Ok(folder)
    }

    /// The folder with the notes inside it that `actor` may read.
    pub async fn get_folder(&self, actor: &Actor, id: FolderId) -> Result<FolderWithNotes> {
        let folder = self.folder(id).await?;
        if !self.authz.can_read_folder(actor.id, id).await? {
            return Err(HubError::denied("no access to this folder"));
        }
        self.with_notes(folder, NoteScope::ReadableBy(actor.id)).await
    }

    pub async fn rename_folder(&self, actor: &Actor, id: FolderId, name: &str) -> Result<Folder> {
        let name = required("name", name)?;
        self.folder(id).await?;
        if !self.authz.can_write_folder(actor.id, id).await? {
            return Err(HubError::denied("only the owner can update this folder"));
        }
        self.store
            .rename_folder(id, name)
            .await?
            .ok_or(HubError::NotFound("folder"))
    }

    pub async fn delete_folder(&self, actor: &Actor, id: FolderId) -> Result<()> {
        self.folder(id).await?;
        if !self.authz.can_delete_folder(actor.id, id).await? {
            return Err(HubError::denied("only the owner can delete this folder"));
        }
        self.store.delete_folder(id).await?;
        info!(folder = %id, by = %actor.id, "deleted folder");
        Ok(())
    }

    /// Create a note owned by `actor`, who need not own the folder.
    pub async fn create_note(&self, actor: &Actor, folder: FolderId, req: CreateNote) -> Result<Note> {
        let title = required("title", &req.title)?;
        self.folder(folder).await?;
        if !self.authz.can_create_note_in_folder(actor.id, folder).await? {
            return Err(HubError::denied("no write access to this folder"));
        }
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            title,
            body: req.body,
            folder_id: folder,
            owner_id: actor.id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_note(note.clone()).await?;
        info!(note = %note.id, %folder, owner = %actor.id, "created note");
        Ok(note)
    }

    pub async fn get_note(&self, actor: &Actor, id: NoteId) -> Result<Note> {
        let note = self.note(id).await?;
        if !self.authz.can_read_note(actor.id, id).await? {
            return Err(HubError::denied("no access to this note"));
        }
        Ok(note)
    }

    /// Apply the non-empty fields of `changes`; empty strings are ignored.
    pub async fn update_note(&self, actor: &Actor, id: NoteId, changes: NoteChanges) -> Result<Note> {
        let note = self.note(id).await?;
        if !self.authz.can_write_note(actor.id, id).await? {
            return Err(HubError::denied("no write access to this note"));
        }
        let changes = NoteChanges {
            title: changes.title.filter(|t| !t.trim().is_empty()),
            body: changes.body.filter(|b| !b.is_empty()),
        };
        if changes.is_empty() {
            return Ok(note);
        }
        self.store
            .update_note(id, changes)
            .await?
            .ok_or(HubError::NotFound("note"))
    }

    pub async fn delete_note(&self, actor: &Actor, id: NoteId) -> Result<()> {
        self.note(id).await?;
        if !self.authz.can_delete_note(actor.id, id).await? {
            return Err(HubError::denied("only the owner can delete this note"));
        }
        self.store.delete_note(id).await?;
        info!(note = %id, by = %actor.id, "deleted note");
        Ok(())
    }

    /// Grant `grantee` access to `target`, replacing any earlier grant.
    pub async fn share(
        &self,
        actor: &Actor,
        target: ShareTarget,
        grantee: UserId,
        access: AccessLevel,
    ) -> Result<Share> {
        let owner = self.target_owner(target).await?;
        let allowed = match target {
            ShareTarget::Folder(id) => self.authz.can_share_folder(actor.id, id).await?,
            ShareTarget::Note(id) => self.authz.can_share_note(actor.id, id).await?,
        };
        if !allowed {
            return Err(HubError::denied(format!(
                "only the owner can share this {}",
                target.kind()
            )));
        }
        if grantee == owner {
            return Err(HubError::validation("cannot share with the owner"));
        }
        if self.store.get_user(grantee).await?.is_none() {
            return Err(HubError::NotFound("user"));
        }

        let share = Share {
            user_id: grantee,
            access,
            created_at: Utc::now(),
        };
        let previous = self.store.upsert_share(target, share.clone()).await?;
        info!(
            kind = target.kind(),
            target = %target.id(),
            %grantee,
            %access,
            replaced = ?previous,
            "granted share"
        );
        Ok(share)
    }

    /// Remove the grant for `(target, user)`. A missing grant is not an error.
    pub async fn revoke(&self, actor: &Actor, target: ShareTarget, user: UserId) -> Result<()> {
        self.target_owner(target).await?;
        if !self.authz.can_revoke_share(actor.id, target).await? {
            return Err(HubError::denied(format!(
                "only the owner can revoke shares on this {}",
                target.kind()
            )));
        }
        if self.store.remove_share(target, user).await? {
            info!(kind = target.kind(), target = %target.id(), %user, "revoked share");
        }
        Ok(())
    }

    pub async fn shares(&self, actor: &Actor, target: ShareTarget) -> Result<Vec<Share>> {
        self.target_owner(target).await?;
        if !self.authz.owns(actor.id, target).await? {
            return Err(HubError::denied(format!(
                "only the owner can list shares on this {}",
                target.kind()
            )));
        }
        Ok(self.store.shares_of(target).await?)
    }

    pub async fn my_folders(&self, actor: &Actor) -> Result<FolderListing> {
        self.listing(&[actor.id], NoteScope::ReadableBy(actor.id)).await
    }

    pub async fn user_assets(&self, actor: &Actor, user: UserId) -> Result<FolderListing> {
        if !Authorizer::can_view_user_assets(actor, user) {
            return Err(HubError::denied("not allowed to view this user's assets"));
        }
        if self.store.get_user(user).await?.is_none() {
            return Err(HubError::NotFound("user"));
        }
        self.listing(&[user], NoteScope::All).await
    }

    /// Folders owned by or shared with any member of the team.
    pub async fn team_assets(&self, actor: &Actor, team: TeamId) -> Result<FolderListing> {
        if self.store.get_team(team).await?.is_none() {
            return Err(HubError::NotFound("team"));
        }
        if !self.authz.can_view_team_assets(actor.id, team).await? {
            return Err(HubError::denied("only team managers can view team assets"));
        }
        let members = self.store.team_users(team, TeamRole::Member).await?;
        if members.is_empty() {
            return Ok(FolderListing::default());
        }
        self.listing(&members, NoteScope::All).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, Team, User};
    use crate::storage::MemoryStore;

    struct Fixture {
        store: Arc<dyn Store>,
        assets: AssetService,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            Self {
                assets: AssetService::new(store.clone(), Authorizer::new(store.clone())),
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

        async fn note(&self, actor: &Actor, folder: FolderId, title: &str) -> Note {
            self.assets
                .create_note(
                    actor,
                    folder,
                    CreateNote {
                        title: title.to_string(),
                        body: "body".to_string(),
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn write_share_holder_owns_the_notes_they_create() {
        let fx = Fixture::new();
        let owner = fx.user("owner", Role::Member).await;
        let writer = fx.user("writer", Role::Member).await;
        let folder = fx.assets.create_folder(&owner, "Plans").await.unwrap();

        let err = fx
            .assets
            .create_note(&writer, folder.id, CreateNote { title: "x".into(), body: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));

        fx.assets
            .share(&owner, ShareTarget::Folder(folder.id), writer.id, AccessLevel::Write)
            .await
            .unwrap();
        let note = fx.note(&writer, folder.id, "mine").await;
        assert_eq!(note.owner_id, writer.id);

        // Folder ownership does not reach the writer's note.
        let err = fx.assets.get_note(&owner, note.id).await.unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));
        let view = fx.assets.get_folder(&owner, folder.id).await.unwrap();
        assert!(view.notes.is_empty());

        // The writer still cannot rename or delete the folder.
        assert!(fx.assets.rename_folder(&writer, folder.id, "Mine").await.is_err());
        assert!(fx.assets.delete_folder(&writer, folder.id).await.is_err());

        fx.assets
            .revoke(&owner, ShareTarget::Folder(folder.id), writer.id)
            .await
            .unwrap();
        let err = fx
            .assets
            .create_note(&writer, folder.id, CreateNote { title: "y".into(), body: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));
    }

    #[tokio::test]
    async fn resharing_replaces_the_access_level() {
        let fx = Fixture::new();
        let owner = fx.user("owner", Role::Member).await;
        let reader = fx.user("reader", Role::Member).await;
        let folder = fx.assets.create_folder(&owner, "Docs").await.unwrap();
        let note = fx.note(&owner, folder.id, "n").await;
        let target = ShareTarget::Note(note.id);

        fx.assets.share(&owner, target, reader.id, AccessLevel::Write).await.unwrap();
        fx.assets.share(&owner, target, reader.id, AccessLevel::Read).await.unwrap();

        let shares = fx.assets.shares(&owner, target).await.unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].access, AccessLevel::Read);

        let err = fx
            .assets
            .update_note(&reader, note.id, NoteChanges { title: Some("t".into()), body: None })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));
        assert_eq!(fx.assets.get_note(&reader, note.id).await.unwrap().id, note.id);
    }

    #[tokio::test]
    async fn only_owner_shares_and_grantee_must_exist() {
        let fx = Fixture::new();
        let owner = fx.user("owner", Role::Member).await;
        let other = fx.user("other", Role::Manager).await;
        let folder = fx.assets.create_folder(&owner, "Docs").await.unwrap();
        let target = ShareTarget::Folder(folder.id);

        let err = fx
            .assets
            .share(&other, target, other.id, AccessLevel::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));
        let err = fx
            .assets
            .share(&owner, target, Uuid::new_v4(), AccessLevel::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound("user")));
        let err = fx
            .assets
            .share(&owner, target, owner.id, AccessLevel::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
        let err = fx
            .assets
            .share(&owner, ShareTarget::Note(Uuid::new_v4()), other.id, AccessLevel::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound("note")));

        // Revoking something never granted is fine.
        fx.assets.revoke(&owner, target, other.id).await.unwrap();
        assert!(fx.assets.revoke(&other, target, other.id).await.is_err());
    }

    #[tokio::test]
    async fn update_ignores_empty_fields() {
        let fx = Fixture::new();
        let owner = fx.user("owner", Role::Member).await;
        let folder = fx.assets.create_folder(&owner, "Docs").await.unwrap();
        let note = fx.note(&owner, folder.id, "title").await;

        let updated = fx
            .assets
            .update_note(
                &owner,
                note.id,
                NoteChanges { title: Some(String::new()), body: Some("new body".into()) },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "title");
        assert_eq!(updated.body, "new body");
    }

    #[tokio::test]
    async fn deleting_a_folder_removes_its_notes() {
        let fx = Fixture::new();
        let owner = fx.user("owner", Role::Member).await;
        let reader = fx.user("reader", Role::Member).await;
        let folder = fx.assets.create_folder(&owner, "Docs").await.unwrap();
        let note = fx.note(&owner, folder.id, "n").await;
        fx.assets
            .share(&owner, ShareTarget::Note(note.id), reader.id, AccessLevel::Read)
            .await
            .unwrap();

        fx.assets.delete_folder(&owner, folder.id).await.unwrap();
        assert!(matches!(
            fx.assets.get_note(&reader, note.id).await,
            Err(HubError::NotFound("note"))
        ));
        assert!(matches!(
            fx.assets.get_folder(&owner, folder.id).await,
            Err(HubError::NotFound("folder"))
        ));
    }

    #[tokio::test]
    async fn listings_split_owned_and_shared() {
        let fx = Fixture::new();
        let alice = fx.user("alice", Role::Member).await;
        let bob = fx.user("bob", Role::Member).await;
        let boss = fx.user("boss", Role::Manager).await;
        let own = fx.assets.create_folder(&bob, "Bob's").await.unwrap();
        let theirs = fx.assets.create_folder(&alice, "Alice's").await.unwrap();
        fx.note(&alice, theirs.id, "hidden").await;
        fx.assets
            .share(&alice, ShareTarget::Folder(theirs.id), bob.id, AccessLevel::Read)
            .await
            .unwrap();

        let mine = fx.assets.my_folders(&bob).await.unwrap();
        assert_eq!(mine.owned_folders.len(), 1);
        assert_eq!(mine.owned_folders[0].folder.id, own.id);
        assert_eq!(mine.shared_folders.len(), 1);
        assert!(mine.shared_folders[0].notes.is_empty());

        assert!(fx.assets.user_assets(&alice, bob.id).await.is_err());
        let seen = fx.assets.user_assets(&boss, bob.id).await.unwrap();
        assert_eq!(seen.shared_folders[0].notes.len(), 1);
    }

    #[tokio::test]
    async fn team_assets_cover_member_folders_for_team_managers() {
        let fx = Fixture::new();
        let lead = fx.user("lead", Role::Manager).await;
        let member = fx.user("member", Role::Member).await;
        let outsider = fx.user("outsider", Role::Member).await;
        let now = Utc::now();
        let team = Team {
            id: Uuid::new_v4(),
            name: "Alpha".into(),
            created_at: now,
            updated_at: now,
        };
        let team_id = team.id;
        fx.store.insert_team(team, &[lead.id], &[member.id]).await.unwrap();

        let owned = fx.assets.create_folder(&member, "Work").await.unwrap();
        let foreign = fx.assets.create_folder(&outsider, "Shared").await.unwrap();
        fx.assets
            .share(&outsider, ShareTarget::Folder(foreign.id), member.id, AccessLevel::Read)
            .await
            .unwrap();
        fx.assets.create_folder(&outsider, "Private").await.unwrap();

        let assets = fx.assets.team_assets(&lead, team_id).await.unwrap();
        assert_eq!(assets.owned_folders.len(), 1);
        assert_eq!(assets.owned_folders[0].folder.id, owned.id);
        assert_eq!(assets.shared_folders.len(), 1);
        assert_eq!(assets.shared_folders[0].folder.id, foreign.id);

        let err = fx.assets.team_assets(&member, team_id).await.unwrap_err();
        assert!(matches!(err, HubError::Denied(_)));
    }
}
