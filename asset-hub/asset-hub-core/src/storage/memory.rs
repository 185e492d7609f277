//! In-memory [`Store`] with optional JSON persistence.
//! All tables sit behind one lock, so every trait method is atomic. When
//! opened on a directory the tables are loaded at startup and rewritten
//! after each mutation. A mutation only becomes visible once the file
//! write has succeeded.
//!
//! Every persisted write copies and rewrites the whole data set, so this
//! store suits small deployments only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};
use uuid::Uuid;

use super::{ManagerRemoval, Relation, Store, StoreError};
use crate::model::{
    AccessLevel, Folder, FolderId, Note, NoteChanges, NoteId, Share, ShareTarget, Team, TeamId,
    TeamRole, User, UserId,
};

const STORE_FILE: &str = "store.json";

type Roster = HashMap<TeamId, BTreeSet<UserId>>;
type Grants = HashMap<Uuid, BTreeMap<UserId, Share>>;

#[derive(Clone, Default, Serialize, Deserialize)]
struct Tables {
    users: HashMap<UserId, User>,
    teams: HashMap<TeamId, Team>,
    team_managers: Roster,
    team_members: Roster,
    folders: HashMap<FolderId, Folder>,
    notes: HashMap<NoteId, Note>,
    folder_shares: Grants,
    note_shares: Grants,
}

impl Tables {
    fn roster(&self, role: TeamRole) -> &Roster {
        match role {
            TeamRole::Manager => &self.team_managers,
            TeamRole::Member => &self.team_members,
        }
    }

    fn roster_mut(&mut self, role: TeamRole) -> &mut Roster {
        match role {
            TeamRole::Manager => &mut self.team_managers,
            TeamRole::Member => &mut self.team_members,
        }
    }

    fn grants(&self, target: ShareTarget) -> Option<&BTreeMap<UserId, Share>> {
        match target {
            ShareTarget::Folder(id) => self.folder_shares.get(&id),
            ShareTarget::Note(id) => self.note_shares.get(&id),
        }
    }

    fn grants_mut(&mut self, target: ShareTarget) -> Option<&mut BTreeMap<UserId, Share>> {
        match target {
            ShareTarget::Folder(id) => self.folder_shares.get_mut(&id),
            ShareTarget::Note(id) => self.note_shares.get_mut(&id),
        }
    }

    fn target_exists(&self, target: ShareTarget) -> bool {
        match target {
            ShareTarget::Folder(id) => self.folders.contains_key(&id),
            ShareTarget::Note(id) => self.notes.contains_key(&id),
        }
    }

    fn require_user(&self, id: UserId) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::MissingReference { entity: "user", id })
        }
    }
}

/// Rows listed by the store come back oldest first.
trait Chronological {
    fn order_key(&self) -> (DateTime<Utc>, Uuid);
}

macro_rules! impl_chronological {
    ($($ty:ty),*) => {
        $(impl Chronological for $ty {
            fn order_key(&self) -> (DateTime<Utc>, Uuid) {
                (self.created_at, self.id)
            }
        })*
    };
}

impl_chronological!(User, Team, Folder, Note);

fn chronological<T: Chronological>(mut rows: Vec<T>) -> Vec<T> {
    rows.sort_by_key(|row| row.order_key());
    rows
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            path: None,
        }
    }

    /// Open (or create) a store persisted under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(STORE_FILE);
        let tables = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Tables::default()
        };
        tracing::debug!(path = %path.display(), "opened store");
        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
        })
    }

    /// File backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&*self.tables.read())
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.write();
        let Some(path) = &self.path else {
            return f(&mut tables);
        };
        let mut next = tables.clone();
        let out = f(&mut next)?;
        persist(path, &next)?;
        *tables = next;
        Ok(out)
    }
}

/// Write `tables` to a temp file and rename it over `path`.
fn persist(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(tables)?;
    let tmp = path.with_extension("json.tmp");
    blocking(|| {
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, path)
    })?;
    Ok(())
}

/// Run blocking file IO without stalling other tasks on a multi-threaded
/// runtime. `block_in_place` is unavailable on the current-thread runtime,
/// where the call simply runs inline.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, relation: Relation) -> Result<bool, StoreError> {
        Ok(self.read(|t| match relation {
            Relation::FolderOwner { folder, user } => {
                t.folders.get(&folder).is_some_and(|f| f.owner_id == user)
            }
            Relation::NoteOwner { note, user } => {
                t.notes.get(&note).is_some_and(|n| n.owner_id == user)
            }
            Relation::Grant {
                target,
                user,
                min_access,
            } => t
                .grants(target)
                .and_then(|grants| grants.get(&user))
                .is_some_and(|share| share.access.satisfies(min_access)),
            Relation::TeamRole { team, user, role } => t
                .roster(role)
                .get(&team)
                .is_some_and(|users| users.contains(&user)),
        }))
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        self.write(|t| {
            if t
                .users
                .values()
                .any(|u| u.email.eq_ignore_ascii_case(&user.email))
            {
                return Err(StoreError::UniqueViolation {
                    field: "email",
                    value: user.email,
                });
            }
            t.users.insert(user.id, user);
            Ok(())
        })
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read(|t| t.users.get(&id).cloned()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read(|t| {
            t.users
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned()
        }))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(chronological(
            self.read(|t| t.users.values().cloned().collect()),
        ))
    }

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        Ok(self.read(|t| ids.iter().filter_map(|id| t.users.get(id).cloned()).collect()))
    }

    async fn insert_team(
        &self,
        team: Team,
        managers: &[UserId],
        members: &[UserId],
    ) -> Result<(), StoreError> {
        self.write(|t| {
            for id in managers.iter().chain(members) {
                t.require_user(*id)?;
            }
            t.team_managers
                .insert(team.id, managers.iter().copied().collect());
            t.team_members
                .insert(team.id, members.iter().copied().collect());
            t.teams.insert(team.id, team);
            Ok(())
        })
    }

    async fn get_team(&self, id: TeamId) -> Result<Option<Team>, StoreError> {
        Ok(self.read(|t| t.teams.get(&id).cloned()))
    }

    async fn list_teams(&self) -> Result<Vec<Team>, StoreError> {
        Ok(chronological(
            self.read(|t| t.teams.values().cloned().collect()),
        ))
    }

    async fn teams_for_user(&self, user: UserId, role: TeamRole) -> Result<Vec<Team>, StoreError> {
        Ok(chronological(self.read(|t| {
            t.roster(role)
                .iter()
                .filter(|(_, users)| users.contains(&user))
                .filter_map(|(team, _)| t.teams.get(team).cloned())
                .collect()
        })))
    }

    async fn team_users(&self, team: TeamId, role: TeamRole) -> Result<Vec<UserId>, StoreError> {
        Ok(self.read(|t| {
            t.roster(role)
                .get(&team)
                .map(|users| users.iter().copied().collect())
                .unwrap_or_default()
        }))
    }

    async fn add_team_user(
        &self,
        team: TeamId,
        user: UserId,
        role: TeamRole,
    ) -> Result<bool, StoreError> {
        self.write(|t| {
            if !t.teams.contains_key(&team) {
                return Err(StoreError::MissingReference {
                    entity: "team",
                    id: team,
                });
            }
            t.require_user(user)?;
            Ok(t.roster_mut(role).entry(team).or_default().insert(user))
        })
    }

    async fn remove_team_member(&self, team: TeamId, user: UserId) -> Result<bool, StoreError> {
        self.write(|t| {
            Ok(t
                .team_members
                .get_mut(&team)
                .is_some_and(|users| users.remove(&user)))
        })
    }

    async fn remove_team_manager(
        &self,
        team: TeamId,
        user: UserId,
    ) -> Result<ManagerRemoval, StoreError> {
        self.write(|t| {
            let Some(managers) = t.team_managers.get_mut(&team) else {
                return Ok(ManagerRemoval::NotAManager);
            };
            if !managers.contains(&user) {
                return Ok(ManagerRemoval::NotAManager);
            }
            if managers.len() <= 1 {
                return Ok(ManagerRemoval::LastManager);
            }
            managers.remove(&user);
            Ok(ManagerRemoval::Removed)
        })
    }

    async fn insert_folder(&self, folder: Folder) -> Result<(), StoreError> {
        self.write(|t| {
            t.require_user(folder.owner_id)?;
            t.folders.insert(folder.id, folder);
            Ok(())
        })
    }

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>, StoreError> {
        Ok(self.read(|t| t.folders.get(&id).cloned()))
    }

    async fn rename_folder(&self, id: FolderId, name: String) -> Result<Option<Folder>, StoreError> {
        self.write(|t| {
            Ok(t.folders.get_mut(&id).map(|folder| {
                folder.name = name;
                folder.updated_at = Utc::now();
                folder.clone()
            }))
        })
    }

    async fn delete_folder(&self, id: FolderId) -> Result<bool, StoreError> {
        self.write(|t| {
            if !t.folders.contains_key(&id) {
                return Ok(false);
            }
            let note_ids: Vec<NoteId> = t
                .notes
                .values()
                .filter(|n| n.folder_id == id)
                .map(|n| n.id)
                .collect();
            for note in &note_ids {
                t.note_shares.remove(note);
            }
            for note in &note_ids {
                t.notes.remove(note);
            }
            t.folder_shares.remove(&id);
            t.folders.remove(&id);
            Ok(true)
        })
    }

    async fn folders_owned_by(&self, users: &[UserId]) -> Result<Vec<Folder>, StoreError> {
        Ok(chronological(self.read(|t| {
            t.folders
                .values()
                .filter(|f| users.contains(&f.owner_id))
                .cloned()
                .collect()
        })))
    }

    async fn folders_shared_with(&self, users: &[UserId]) -> Result<Vec<Folder>, StoreError> {
        Ok(chronological(self.read(|t| {
            t.folder_shares
                .iter()
                .filter(|(_, grants)| users.iter().any(|u| grants.contains_key(u)))
                .filter_map(|(folder, _)| t.folders.get(folder).cloned())
                .collect()
        })))
    }

    async fn insert_note(&self, note: Note) -> Result<(), StoreError> {
        self.write(|t| {
            if !t.folders.contains_key(&note.folder_id) {
                return Err(StoreError::MissingReference {
                    entity: "folder",
                    id: note.folder_id,
                });
            }
            t.require_user(note.owner_id)?;
            t.notes.insert(note.id, note);
            Ok(())
        })
    }

    async fn get_note(&self, id: NoteId) -> Result<Option<Note>, StoreError> {
        Ok(self.read(|t| t.notes.get(&id).cloned()))
    }

    async fn update_note(
        &self,
        id: NoteId,
        changes: NoteChanges,
    ) -> Result<Option<Note>, StoreError> {
        self.write(|t| {
            Ok(t.notes.get_mut(&id).map(|note| {
                if let Some(title) = changes.title {
                    note.title = title;
                }
                if let Some(body) = changes.body {
                    note.body = body;
                }
                note.updated_at = Utc::now();
                note.clone()
            }))
        })
    }

    async fn delete_note(&self, id: NoteId) -> Result<bool, StoreError> {
        self.write(|t| {
            t.note_shares.remove(&id);
            Ok(t.notes.remove(&id).is_some())
        })
    }

    async fn notes_in_folder(&self, folder: FolderId) -> Result<Vec<Note>, StoreError> {
        Ok(chronological(self.read(|t| {
            t.notes
                .values()
                .filter(|n| n.folder_id == folder)
                .cloned()
                .collect()
        })))
    }

    async fn upsert_share(
        &self,
        target: ShareTarget,
        share: Share,
    ) -> Result<Option<AccessLevel>, StoreError> {
        self.write(|t| {
            if !t.target_exists(target) {
                return Err(StoreError::MissingReference {
                    entity: target.kind(),
                    id: target.id(),
                });
            }
            t.require_user(share.user_id)?;
            let grants = match target {
                ShareTarget::Folder(id) => t.folder_shares.entry(id).or_default(),
                ShareTarget::Note(id) => t.note_shares.entry(id).or_default(),
            };
            match grants.get_mut(&share.user_id) {
                Some(existing) => {
                    let previous = existing.access;
                    existing.access = share.access;
                    Ok(Some(previous))
                }
                None => {
                    grants.insert(share.user_id, share);
                    Ok(None)
                }
            }
        })
    }

    async fn remove_share(&self, target: ShareTarget, user: UserId) -> Result<bool, StoreError> {
        self.write(|t| {
            Ok(t
                .grants_mut(target)
                .is_some_and(|grants| grants.remove(&user).is_some()))
        })
    }

    async fn shares_of(&self, target: ShareTarget) -> Result<Vec<Share>, StoreError> {
        Ok(self.read(|t| {
            t.grants(target)
                .map(|grants| grants.values().cloned().collect())
                .unwrap_or_default()
        }))
    }
}
