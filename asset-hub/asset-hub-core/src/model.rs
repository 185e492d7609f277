//! Records shared by the identity store, team graph and asset tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::HubError;

pub type UserId = Uuid;
pub type TeamId = Uuid;
pub type FolderId = Uuid;
pub type NoteId = Uuid;

/// Global role of a user, independent of any team-scoped role.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manager" => Ok(Role::Manager),
            "member" => Ok(Role::Member),
            _ => Err(HubError::Validation(
                "invalid role, must be 'manager' or 'member'".to_string(),
            )),
        }
    }
}

/// Access carried by a share grant. `Write` implies `Read`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        }
    }

    /// Whether a grant at this level satisfies a request for `required`.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            _ => Err(HubError::Validation(
                "access must be 'read' or 'write'".to_string(),
            )),
        }
    }
}

/// Membership relation of a user inside one team.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Manager,
    Member,
}

/// The authenticated identity behind a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub credential_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a [`User`]; never carries the credential hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub body: String,
    pub folder_id: FolderId,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field updates for a note; `None` leaves the field unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl NoteChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }
}

/// The resource a share grant is attached to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ShareTarget {
    Folder(FolderId),
    Note(NoteId),
}

impl ShareTarget {
    pub fn id(&self) -> Uuid {
        match self {
            ShareTarget::Folder(id) | ShareTarget::Note(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ShareTarget::Folder(_) => "folder",
            ShareTarget::Note(_) => "note",
        }
    }
}

/// A FolderShare or NoteShare grant, keyed by its target and `user_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub user_id: UserId,
    pub access: AccessLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderWithNotes {
    #[serde(flatten)]
    pub folder: Folder,
    pub notes: Vec<Note>,
}

/// Folders owned by a set of users plus folders shared with them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    pub owned_folders: Vec<FolderWithNotes>,
    pub shared_folders: Vec<FolderWithNotes>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamDetail {
    pub team: Team,
    pub managers: Vec<UserProfile>,
    pub members: Vec<UserProfile>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserTeams {
    pub manager_teams: Vec<Team>,
    pub member_teams: Vec<Team>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_rejects_unknown_values() {
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!("member".parse::<Role>().unwrap(), Role::Member);
        assert!(matches!(
            "admin".parse::<Role>(),
            Err(HubError::Validation(_))
        ));
        assert!("Manager".parse::<Role>().is_err());
    }

    #[test]
    fn write_access_satisfies_read() {
        assert!(AccessLevel::Write.satisfies(AccessLevel::Read));
        assert!(AccessLevel::Write.satisfies(AccessLevel::Write));
        assert!(AccessLevel::Read.satisfies(AccessLevel::Read));
        assert!(!AccessLevel::Read.satisfies(AccessLevel::Write));
    }

    #[test]
    fn profile_hides_credential_hash() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            credential_hash: "$argon2id$secret".into(),
            role: Role::Member,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(UserProfile::from(&user)).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["role"], "member");
        assert!(json.get("credentialHash").is_none());
    }
}
