//! Credential storage: the `UserStore` backends and the `Users` facade every
//! read goes through.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;

pub mod memory;
pub mod postgres;
pub mod repo_types;

pub use repo_types::{NewUser, Role, UserRecord};

/// Key for a single-record lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Id(Uuid),
    Email(String),
    ResetTokenHash(String),
}

/// Whether a read may return soft-deleted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    ActiveOnly,
    IncludingInactive,
}

impl Visibility {
    pub(crate) fn admits(self, record: &UserRecord) -> bool {
        self == Self::IncludingInactive || record.active
    }
}

/// Keyed record storage with uniqueness on `username` and `email`.
///
/// Reads take an explicit `Visibility`; application code reads through
/// `Users`, which names the two variants.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `UniquenessConflict` if the username or email is taken.
    async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError>;

    async fn find(&self, lookup: &Lookup, visibility: Visibility)
        -> Result<Option<UserRecord>, AppError>;

    async fn list(&self, visibility: Visibility) -> Result<Vec<UserRecord>, AppError>;

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError>;

    /// Stores a reset digest and its expiry, replacing any pending one.
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError>;

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError>;

    /// Atomically matches an active record holding `token_hash` with an
    /// expiry after `now`, installs the new password hash and clears both
    /// reset fields. Returns `None` when nothing matched, so at most one of
    /// several concurrent callers with the same token succeeds.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AppError>;
}

/// The application's handle on the store.
#[derive(Clone)]
pub struct Users {
    store: Arc<dyn UserStore>,
}

impl Users {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn find_active(&self, lookup: &Lookup) -> Result<Option<UserRecord>, AppError> {
        self.store.find(lookup, Visibility::ActiveOnly).await
    }

    pub async fn find_including_inactive(
        &self,
        lookup: &Lookup,
    ) -> Result<Option<UserRecord>, AppError> {
        self.store.find(lookup, Visibility::IncludingInactive).await
    }

    pub async fn list_active(&self) -> Result<Vec<UserRecord>, AppError> {
        self.store.list(Visibility::ActiveOnly).await
    }

    pub async fn list_including_inactive(&self) -> Result<Vec<UserRecord>, AppError> {
        self.store.list(Visibility::IncludingInactive).await
    }

    pub async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError> {
        self.store.insert(user).await
    }

    pub async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError> {
        self.store.update_password(id, password_hash, changed_at).await
    }

    pub async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        self.store.set_reset_token(id, token_hash, expires_at).await
    }

    pub async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError> {
        self.store.clear_reset_token(id).await
    }

    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError> {
        self.store
            .consume_reset_token(token_hash, now, password_hash, changed_at)
            .await
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AppError> {
        self.store.set_active(id, active).await
    }
}

pub(crate) const USERNAME_TAKEN: &str = "This username is taken, Please provide other username";
pub(crate) const EMAIL_TAKEN: &str = "This email is already used, Please provide another one";
