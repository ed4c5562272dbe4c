//! Users repository

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::AppResult,
    ids::IdGenerator,
    key,
    models::user::{normalize_email, NewUser, UpdateUser, User},
    store::{Key, KvStore},
};

pub const USERS: &str = "users";
pub const USERS_BY_EMAIL: &str = "users_by_email";

pub fn user_key(id: &str) -> Key {
    key![USERS, id]
}

/// Index key for an email, lowercased.
pub fn email_key(email: &str) -> Key {
    key![USERS_BY_EMAIL, normalize_email(email)]
}

#[derive(Clone)]
pub struct UsersRepository {
    store: KvStore,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl UsersRepository {
    pub fn new(store: KvStore, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Create a new user. Email uniqueness is the caller's concern.
    pub async fn create(&self, new: NewUser) -> AppResult<User> {
        let user = User::from_new(self.ids.generate(), new, self.clock.now());

        self.store.set(&user_key(&user.id), &user).await?;
        self.store.set(&email_key(&user.email), &user.id).await?;

        tracing::debug!(user_id = %user.id, "User created");
        Ok(user)
    }

    /// Get user by ID
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self
            .store
            .get::<User>(&user_key(id))
            .await?
            .map(|entry| entry.value))
    }

    /// Get user by email, case-insensitively
    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let Some(id) = self.store.get::<String>(&email_key(email)).await? else {
            return Ok(None);
        };

        let wanted = normalize_email(email);
        Ok(self
            .find_by_id(&id.value)
            .await?
            .filter(|user| user.email_key() == wanted))
    }

    /// List users in key order
    pub async fn find_all(&self) -> AppResult<Vec<User>> {
        let entries = self.store.list::<User>(&key![USERS], 2).await?;
        Ok(entries.into_iter().map(|entry| entry.value).collect())
    }

    /// Update a user; `None` when it does not exist
    pub async fn update(&self, id: &str, patch: UpdateUser) -> AppResult<Option<User>> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let updated = existing.apply(patch, self.clock.now());
        self.store.set(&user_key(id), &updated).await?;

        if updated.email_key() != existing.email_key() {
            self.remove_email_entry(&existing.email, id).await?;
            self.store.set(&email_key(&updated.email), &updated.id).await?;
            tracing::debug!(user_id = %id, "Email index moved");
        }

        Ok(Some(updated))
    }

    /// Delete a user and its email index entry; `false` when absent
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        self.remove_email_entry(&existing.email, id).await?;
        self.store.delete(&user_key(id)).await?;

        tracing::debug!(user_id = %id, "User deleted");
        Ok(true)
    }

    async fn remove_email_entry(&self, email: &str, id: &str) -> AppResult<()> {
        let key = email_key(email);
        if let Some(owner) = self.store.get::<String>(&key).await? {
            if owner.value == id {
                self.store.delete(&key).await?;
            }
        }
        Ok(())
    }
}
