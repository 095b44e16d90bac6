use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo_types::UserRow, Lookup, NewUser, UserRecord, UserStore, Visibility, EMAIL_TAKEN,
    USERNAME_TAKEN,
};
use crate::error::AppError;

const COLUMNS: &str = "id, first_name, last_name, username, email, role, password_hash, \
    password_changed_at, password_reset_token_hash, password_reset_expires_at, active";

/// `users` table in PostgreSQL; schema in `migrations/`.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn active_clause(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::ActiveOnly => " AND active",
        Visibility::IncludingInactive => "",
    }
}

/// Maps the named unique constraints onto field-attributed conflicts.
fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some("users_username_key") => {
                    return AppError::UniquenessConflict {
                        field: "username",
                        message: USERNAME_TAKEN,
                    }
                }
                Some("users_email_key") => {
                    return AppError::UniquenessConflict {
                        field: "email",
                        message: EMAIL_TAKEN,
                    }
                }
                _ => {}
            }
        }
    }
    AppError::Database(err)
}

fn into_record(row: Option<UserRow>) -> Result<Option<UserRecord>, AppError> {
    row.map(UserRecord::try_from).transpose().map_err(AppError::from)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, first_name, last_name, username, email, role, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(UserRecord::try_from(row)?)
    }

    async fn find(
        &self,
        lookup: &Lookup,
        visibility: Visibility,
    ) -> Result<Option<UserRecord>, AppError> {
        let active = active_clause(visibility);
        let query = match lookup {
            Lookup::Id(_) => format!("SELECT {COLUMNS} FROM users WHERE id = $1{active}"),
            Lookup::Email(_) => format!("SELECT {COLUMNS} FROM users WHERE email = $1{active}"),
            Lookup::ResetTokenHash(_) => format!(
                "SELECT {COLUMNS} FROM users WHERE password_reset_token_hash = $1{active}"
            ),
        };
        let query = sqlx::query_as::<_, UserRow>(&query);
        let query = match lookup {
            Lookup::Id(id) => query.bind(*id),
            Lookup::Email(value) | Lookup::ResetTokenHash(value) => {
                query.bind(value.clone())
            }
        };
        into_record(query.fetch_optional(&self.db).await?)
    }

    async fn list(&self, visibility: Visibility) -> Result<Vec<UserRecord>, AppError> {
        let filter = match visibility {
            Visibility::ActiveOnly => "WHERE active",
            Visibility::IncludingInactive => "",
        };
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {COLUMNS} FROM users {filter} ORDER BY username"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|row| UserRecord::try_from(row).map_err(AppError::from))
            .collect()
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET password_hash = $2, password_changed_at = $3
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?;
        into_record(row)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token_hash = $2, password_reset_expires_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found"));
        }
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token_hash = NULL, password_reset_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<UserRecord>, AppError> {
        // Match and clear in one statement; a second caller finds no row.
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                password_changed_at = $4,
                password_reset_token_hash = NULL,
                password_reset_expires_at = NULL
            WHERE password_reset_token_hash = $1
              AND password_reset_expires_at > $2
              AND active
            RETURNING {COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?;
        into_record(row)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found"));
        }
        Ok(())
    }
}
