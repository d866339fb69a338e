//! PostgreSQL implementation for authorization code storage

use super::{column, join_scope};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{AuthorizationCodeStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;

/// PostgreSQL implementation of authorization code storage
pub struct PostgresAuthorizationCodeStore {
    pool: PgPool,
}

impl PostgresAuthorizationCodeStore {
    /// Create a new PostgreSQL authorization code store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert PostgreSQL row to AuthorizationCode
    fn row_to_authorization_code(row: &PgRow) -> Result<AuthorizationCode> {
        let scope: String = column(row, "scope")?;
        let client: Json<ClientSnapshot> = column(row, "client")?;
        let owner: Json<TokenUser> = column(row, "owner")?;

        Ok(AuthorizationCode {
            authorization_code: column(row, "authorization_code")?,
            expires_at: column(row, "expires_at")?,
            redirect_uri: column(row, "redirect_uri")?,
            code_challenge: column(row, "code_challenge")?,
            code_challenge_method: column(row, "code_challenge_method")?,
            scope: parse_scope(&scope),
            client: client.0,
            user: owner.0,
            created_at: column(row, "created_at")?,
        })
    }
}

#[async_trait]
impl AuthorizationCodeStore for PostgresAuthorizationCodeStore {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO authorization_codes (
                authorization_code, expires_at, redirect_uri, code_challenge,
                code_challenge_method, scope, client, owner, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&code.authorization_code)
        .bind(code.expires_at)
        .bind(&code.redirect_uri)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(join_scope(&code.scope))
        .bind(Json(&code.client))
        .bind(Json(code.user.stored()))
        .bind(code.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let row = sqlx::query("SELECT * FROM authorization_codes WHERE authorization_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref()
            .map(Self::row_to_authorization_code)
            .transpose()
    }

    async fn delete_code(&self, code: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM authorization_codes WHERE authorization_code = $1")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        let now = Utc::now();

        let result = sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}
