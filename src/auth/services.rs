use std::sync::Arc;

use anyhow::Context;
use time::Duration;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        password::PasswordHasher,
        reset_token,
        secret::Secret,
        validation::{normalize_email, validate_registration, Registration},
    },
    clock::Clock,
    error::AppError,
    users::{Lookup, NewUser, UserRecord, Users},
};

/// Lifetime of a password reset token.
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

/// `password_changed_at` is recorded this far in the past, so a session
/// token minted right after the change still passes the staleness check.
pub const PASSWORD_CHANGE_SKEW: Duration = Duration::seconds(1);

/// Credential lifecycle: registration, password changes, staleness checks,
/// reset tokens and soft deletion.
#[derive(Clone)]
pub struct Credentials {
    users: Users,
    hasher: PasswordHasher,
    clock: Arc<dyn Clock>,
}

impl Credentials {
    pub fn new(users: Users, hasher: PasswordHasher, clock: Arc<dyn Clock>) -> Self {
        Self {
            users,
            hasher,
            clock,
        }
    }

    #[instrument(skip_all, fields(username = %candidate.username))]
    pub async fn register(&self, mut candidate: Registration) -> Result<UserRecord, AppError> {
        validate_registration(&mut candidate)?;
        let Registration {
            first_name,
            last_name,
            username,
            email,
            password,
            password_confirm,
            role,
        } = candidate;
        drop(password_confirm);

        let password_hash = self.hash(password).await?;
        let user = self
            .users
            .insert(NewUser {
                first_name,
                last_name,
                username,
                email,
                role,
                password_hash,
            })
            .await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Looks up an active user by email and checks the password.
    pub async fn authenticate(&self, email: &str, password: Secret) -> Result<UserRecord, AppError> {
        let email = normalize_email(email);
        let user = self.users.find_active(&Lookup::Email(email)).await?;
        let Some(user) = user else {
            warn!("login for unknown email");
            return Err(AppError::Unauthorized("Incorrect email or password"));
        };
        if !self.verify_password(&user, password).await? {
            warn!(user_id = %user.id, "login with wrong password");
            return Err(AppError::Unauthorized("Incorrect email or password"));
        }
        Ok(user)
    }

    pub async fn verify_password(&self, user: &UserRecord, password: Secret) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let digest = user.password_hash.clone();
        let ok = tokio::task::spawn_blocking(move || hasher.verify(&password, &digest))
            .await
            .context("password verification task failed")?;
        Ok(ok)
    }

    /// Replaces the password of an existing record and back-dates
    /// `password_changed_at` by `PASSWORD_CHANGE_SKEW`.
    #[instrument(skip_all, fields(user_id = %record.id))]
    pub async fn change_password(
        &self,
        record: &UserRecord,
        new_password: Secret,
    ) -> Result<UserRecord, AppError> {
        let password_hash = self.hash(new_password).await?;
        let changed_at = self.clock.now() - PASSWORD_CHANGE_SKEW;
        let user = self
            .users
            .update_password(record.id, &password_hash, changed_at)
            .await?
            .ok_or(AppError::NotFound("User not found"))?;
        info!("password changed");
        Ok(user)
    }

    /// Staleness check: `true` means a session token issued at
    /// `token_issued_at` (epoch seconds) must be rejected.
    pub fn was_password_changed_after(record: &UserRecord, token_issued_at: i64) -> bool {
        match record.password_changed_at {
            Some(changed_at) => changed_at.unix_timestamp() > token_issued_at,
            None => false,
        }
    }

    /// Stores the digest of a fresh reset token, replacing any pending one,
    /// and returns the token for delivery.
    #[instrument(skip_all, fields(user_id = %record.id))]
    pub async fn issue_reset_token(&self, record: &UserRecord) -> Result<Secret, AppError> {
        let (token, token_hash) = reset_token::generate();
        let expires_at = self.clock.now() + RESET_TOKEN_TTL;
        self.users
            .set_reset_token(record.id, &token_hash, expires_at)
            .await?;
        info!(%expires_at, "password reset token issued");
        Ok(token)
    }

    pub async fn cancel_reset_token(&self, record: &UserRecord) -> Result<(), AppError> {
        self.users.clear_reset_token(record.id).await
    }

    /// Sets a new password for the holder of a valid reset token. The match,
    /// the password update and the clearing of the token are one store write.
    #[instrument(skip_all)]
    pub async fn consume_reset_token(
        &self,
        token: &str,
        new_password: Secret,
    ) -> Result<UserRecord, AppError> {
        let token_hash = reset_token::digest(token);
        let now = self.clock.now();

        // Fail fast before paying for a password hash.
        let pending = self
            .users
            .find_active(&Lookup::ResetTokenHash(token_hash.clone()))
            .await?;
        let live = pending
            .as_ref()
            .and_then(|u| u.password_reset_expires_at)
            .is_some_and(|expires_at| expires_at > now);
        if !live {
            warn!("reset token rejected");
            return Err(AppError::TokenInvalidOrExpired);
        }

        let password_hash = self.hash(new_password).await?;
        let changed_at = self.clock.now() - PASSWORD_CHANGE_SKEW;
        let user = self
            .users
            .consume_reset_token(&token_hash, now, &password_hash, changed_at)
            .await?
            .ok_or(AppError::TokenInvalidOrExpired)?;
        info!(user_id = %user.id, "password reset completed");
        Ok(user)
    }

    /// Soft delete.
    pub async fn deactivate(&self, record: &UserRecord) -> Result<(), AppError> {
        self.users.set_active(record.id, false).await?;
        info!(user_id = %record.id, "user deactivated");
        Ok(())
    }

    pub async fn find_active(&self, lookup: &Lookup) -> Result<Option<UserRecord>, AppError> {
        self.users.find_active(lookup).await
    }

    pub async fn find_including_inactive(
        &self,
        lookup: &Lookup,
    ) -> Result<Option<UserRecord>, AppError> {
        self.users.find_including_inactive(lookup).await
    }

    pub async fn list_active(&self) -> Result<Vec<UserRecord>, AppError> {
        self.users.list_active().await
    }

    pub async fn list_including_inactive(&self) -> Result<Vec<UserRecord>, AppError> {
        self.users.list_including_inactive().await
    }

    async fn hash(&self, password: Secret) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task failed")??;
        Ok(hash)
    }
}
