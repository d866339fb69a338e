//! PostgreSQL implementation for role storage

use super::{column, join_scope};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{Result, RoleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};

/// PostgreSQL implementation of role storage
pub struct PostgresRoleStore {
    pool: PgPool,
}

impl PostgresRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn string_to_kind(s: &str) -> Result<RoleKind> {
        match s {
            "user" => Ok(RoleKind::User),
            "client" => Ok(RoleKind::Client),
            _ => Err(StorageError::InvalidData(format!("Unknown role kind: {}", s))),
        }
    }

    fn row_to_role(row: &PgRow) -> Result<Role> {
        let scope: String = column(row, "scope")?;
        let kind: String = column(row, "kind")?;

        Ok(Role {
            id: column(row, "id")?,
            name: column(row, "name")?,
            ranking: column(row, "ranking")?,
            scope: parse_scope(&scope),
            kind: Self::string_to_kind(&kind)?,
            description: column(row, "description")?,
        })
    }
}

#[async_trait]
impl RoleStore for PostgresRoleStore {
    async fn store_role(&self, role: &Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, ranking, scope, kind, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                ranking = EXCLUDED.ranking,
                scope = EXCLUDED.scope,
                kind = EXCLUDED.kind,
                description = EXCLUDED.description
            "#,
        )
        .bind(&role.id)
        .bind(&role.name)
        .bind(role.ranking)
        .bind(join_scope(&role.scope))
        .bind(role.kind.as_str())
        .bind(&role.description)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get_role(&self, role_id: &str) -> Result<Option<Role>> {
        let row = sqlx::query("SELECT * FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_role).transpose()
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query("SELECT * FROM roles ORDER BY ranking")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_role).collect()
    }

    async fn delete_role(&self, role_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn set_role_invalidated_at(&self, role_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_invalidations (role_id, invalidated_at) VALUES ($1, $2)
            ON CONFLICT (role_id) DO UPDATE SET invalidated_at = EXCLUDED.invalidated_at
            "#,
        )
        .bind(role_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get_role_invalidated_at(&self, role_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT invalidated_at FROM role_invalidations WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        row.as_ref()
            .map(|row| column(row, "invalidated_at"))
            .transpose()
    }
}
