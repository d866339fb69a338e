//! PostgreSQL implementation for issued token storage

use super::{column, join_scope};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{Result, TokenStore};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;

/// PostgreSQL implementation of token storage
pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert PostgreSQL row to Token
    fn row_to_token(row: &PgRow) -> Result<Token> {
        let scope: String = column(row, "scope")?;
        let client: Json<ClientSnapshot> = column(row, "client")?;
        let owner: Json<TokenUser> = column(row, "owner")?;

        Ok(Token {
            access_token: column(row, "access_token")?,
            access_token_expires_at: column(row, "access_token_expires_at")?,
            refresh_token: column(row, "refresh_token")?,
            refresh_token_expires_at: column(row, "refresh_token_expires_at")?,
            scope: parse_scope(&scope),
            client: client.0,
            user: owner.0,
            registered_at: column(row, "registered_at")?,
        })
    }

    async fn find_one(&self, query: &str, value: &str) -> Result<Option<Token>> {
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_token).transpose()
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn store_token(&self, token: &Token) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                access_token, access_token_expires_at, refresh_token, refresh_token_expires_at,
                scope, client, owner, registered_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&token.access_token)
        .bind(token.access_token_expires_at)
        .bind(&token.refresh_token)
        .bind(token.refresh_token_expires_at)
        .bind(join_scope(&token.scope))
        .bind(Json(&token.client))
        .bind(Json(token.user.stored()))
        .bind(token.registered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn find_by_access_token(&self, access_token: &str) -> Result<Option<Token>> {
        self.find_one("SELECT * FROM tokens WHERE access_token = $1", access_token)
            .await
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>> {
        self.find_one(
            "SELECT * FROM tokens WHERE refresh_token = $1",
            refresh_token,
        )
        .await
    }

    async fn delete_by_access_token(&self, access_token: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE access_token = $1")
            .bind(access_token)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE refresh_token = $1")
            .bind(refresh_token)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE access_token_expires_at <= $1
              AND (refresh_token_expires_at IS NULL OR refresh_token_expires_at <= $1)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}
