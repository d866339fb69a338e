//! PostgreSQL implementation for user account storage

use super::{column, join_scope};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{Result, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};

/// PostgreSQL implementation of user storage
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &PgRow) -> Result<User> {
        let scope: Option<String> = column(row, "scope")?;

        Ok(User {
            id: column(row, "id")?,
            username: column(row, "username")?,
            email: column(row, "email")?,
            password_hash: column(row, "password_hash")?,
            role: column(row, "role")?,
            scope: scope.as_deref().map(parse_scope),
            is_banned: column(row, "is_banned")?,
            is_restricted: column(row, "is_restricted")?,
            global_logout_at: column(row, "global_logout_at")?,
            created_at: column(row, "created_at")?,
        })
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn store_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, email, password_hash, role, scope,
                is_banned, is_restricted, global_logout_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                role = EXCLUDED.role,
                scope = EXCLUDED.scope,
                is_banned = EXCLUDED.is_banned,
                is_restricted = EXCLUDED.is_restricted,
                global_logout_at = EXCLUDED.global_logout_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.scope.as_deref().map(join_scope))
        .bind(user.is_banned)
        .bind(user.is_restricted)
        .bind(user.global_logout_at)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn set_global_logout(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET global_logout_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("User not found: {}", user_id)));
        }

        Ok(())
    }
}
