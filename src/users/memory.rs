use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Lookup, NewUser, UserRecord, UserStore, Visibility, EMAIL_TAKEN, USERNAME_TAKEN};
use crate::{auth::reset_token::digests_match, error::AppError};

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryUserStore {
    records: RwLock<HashMap<Uuid, UserRecord>>,
}

fn matches(record: &UserRecord, lookup: &Lookup) -> bool {
    match lookup {
        Lookup::Id(id) => record.id == *id,
        Lookup::Email(email) => record.email == *email,
        Lookup::ResetTokenHash(hash) => record
            .password_reset_token_hash
            .as_deref()
            .is_some_and(|stored| digests_match(stored, hash)),
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.username == user.username) {
            return Err(AppError::UniquenessConflict {
                field: "username",
                message: USERNAME_TAKEN,
            });
        }
        if records.values().any(|r| r.email == user.email) {
            return Err(AppError::UniquenessConflict {
                field: "email",
                message: EMAIL_TAKEN,
            });
        }
        let record = user.into_record(Uuid::new_v4());
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find(
        &self,
        lookup: &Lookup,
        visibility: Visibility,
    ) -> Result<Option<UserRecord>, AppError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| visibility.admits(r) && matches(r, lookup))
            .cloned())
    }

    async fn list(&self, visibility: Visibility) -> Result<Vec<UserRecord>, AppError> {
        let records = self.records.read().await;
        let mut users: Vec<UserRecord> = records
            .values()
            .filter(|r| visibility.admits(r))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError> {
        let mut records = self.records.write().await;
        Ok(records.get_mut(&id).map(|record| {
            record.password_hash = password_hash.to_string();
            record.password_changed_at = Some(changed_at);
            record.clone()
        }))
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(AppError::NotFound("User not found"))?;
        record.password_reset_token_hash = Some(token_hash.to_string());
        record.password_reset_expires_at = Some(expires_at);
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            record.password_reset_token_hash = None;
            record.password_reset_expires_at = None;
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError> {
        let lookup = Lookup::ResetTokenHash(token_hash.to_string());
        let mut records = self.records.write().await;
        let Some(record) = records.values_mut().find(|r| {
            r.active
                && matches(r, &lookup)
                && r.password_reset_expires_at.is_some_and(|expires| expires > now)
        }) else {
            return Ok(None);
        };
        record.password_hash = password_hash.to_string();
        record.password_changed_at = Some(changed_at);
        record.password_reset_token_hash = None;
        record.password_reset_expires_at = None;
        Ok(Some(record.clone()))
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(AppError::NotFound("User not found"))?;
        record.active = active;
        Ok(())
    }
}
