//! PostgreSQL implementation for OAuth client storage

use super::{column, join_scope};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{ClientStore, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;

/// PostgreSQL implementation of OAuth client storage
pub struct PostgresClientStore {
    pool: PgPool,
}

impl PostgresClientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert PostgreSQL row to Client
    fn row_to_client(row: &PgRow) -> Result<Client> {
        let scope: String = column(row, "scope")?;
        let grants: Json<Vec<GrantType>> = column(row, "grants")?;
        let redirect_uris: Json<Vec<String>> = column(row, "redirect_uris")?;

        Ok(Client {
            id: column(row, "id")?,
            client_id: column(row, "client_id")?,
            client_secret: column(row, "client_secret")?,
            name: column(row, "name")?,
            role: column(row, "role")?,
            scope: parse_scope(&scope),
            grants: grants.0,
            redirect_uris: redirect_uris.0,
            created_at: column(row, "created_at")?,
        })
    }
}

#[async_trait]
impl ClientStore for PostgresClientStore {
    async fn store_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (
                id, client_id, client_secret, name, role, scope, grants, redirect_uris, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (client_id) DO UPDATE SET
                client_secret = EXCLUDED.client_secret,
                name = EXCLUDED.name,
                role = EXCLUDED.role,
                scope = EXCLUDED.scope,
                grants = EXCLUDED.grants,
                redirect_uris = EXCLUDED.redirect_uris
            "#,
        )
        .bind(&client.id)
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.name)
        .bind(&client.role)
        .bind(join_scope(&client.scope))
        .bind(Json(&client.grants))
        .bind(Json(&client.redirect_uris))
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_client).transpose()
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM clients WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "Client not found: {}",
                client_id
            )));
        }

        Ok(())
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query("SELECT * FROM clients ORDER BY created_at LIMIT $1")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM clients ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_client).collect()
    }
}
