//! Identity store operations: registration, login and profile lookups.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{CredentialHasher, Hs256Keys};
use crate::error::{required, HubError, Result};
use crate::model::{Actor, Role, User, UserProfile};
use crate::storage::{Store, StoreError};

pub(crate) const DUPLICATE_EMAIL: &str = "email already exists";

/// A candidate user as submitted by registration or a bulk import row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

/// Validate, hash and insert a user.
///
/// Order: role, required fields, email existence, hashing, insert. The
/// existence check is only a fast path; the store's unique constraint
/// decides, and a violation there reads the same as a failed check.
pub(crate) async fn create_user(
    store: &dyn Store,
    hasher: &Arc<CredentialHasher>,
    new: NewUser,
) -> Result<User> {
    let role: Role = new.role.trim().parse()?;
    let username = required("username", &new.username)?;
    let email = required("email", &new.email)?;
    if new.password.is_empty() {
        return Err(HubError::validation("password is required"));
    }

    if store.find_user_by_email(&email).await?.is_some() {
        return Err(HubError::Precondition(DUPLICATE_EMAIL.to_string()));
    }

    let hasher = hasher.clone();
    let password = new.password;
    let credential_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| HubError::Credential(e.to_string()))??;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username,
        email,
        credential_hash,
        role,
        created_at: now,
        updated_at: now,
    };
    match store.insert_user(user.clone()).await {
        Ok(()) => Ok(user),
        Err(StoreError::UniqueViolation { field: "email", .. }) => {
            Err(HubError::Precondition(DUPLICATE_EMAIL.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub struct IdentityService {
    store: Arc<dyn Store>,
    hasher: Arc<CredentialHasher>,
    keys: Arc<Hs256Keys>,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>, hasher: Arc<CredentialHasher>, keys: Arc<Hs256Keys>) -> Self {
        Self {
            store,
            hasher,
            keys,
        }
    }

    pub async fn register(&self, new: NewUser) -> Result<UserProfile> {
        let user = create_user(self.store.as_ref(), &self.hasher, new).await?;
        info!(user = %user.id, role = %user.role, "registered user");
        Ok(UserProfile::from(&user))
    }

    /// Exchange an email/password pair for a signed token.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let Some(user) = self.store.find_user_by_email(email.trim()).await? else {
            return Err(HubError::InvalidCredentials);
        };
        let hasher = self.hasher.clone();
        let candidate = password.to_string();
        let hash = user.credential_hash.clone();
        let valid = tokio::task::spawn_blocking(move || hasher.verify(&candidate, &hash))
            .await
            .map_err(|e| HubError::Credential(e.to_string()))?;
        if !valid {
            return Err(HubError::InvalidCredentials);
        }
        let token = self.keys.issue(user.id, user.role)?;
        Ok(LoginResponse {
            token,
            user: UserProfile::from(&user),
        })
    }

    pub async fn profile(&self, actor: &Actor) -> Result<UserProfile> {
        self.store
            .get_user(actor.id)
            .await?
            .map(|u| UserProfile::from(&u))
            .ok_or(HubError::NotFound("user"))
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>> {
        Ok(self
            .store
            .list_users()
            .await?
            .iter()
            .map(UserProfile::from)
            .collect())
    }
}
