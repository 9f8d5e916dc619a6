//! Postgres-backed user store. Deletes are hard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use stagetrack_core::domain::user::{Role, User};
use stagetrack_core::error::{Result, TrackError};
use stagetrack_core::ports::UserStore;

use crate::map_db_err;

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = TrackError;

    fn try_from(row: UserRow) -> Result<User> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: String| TrackError::Internal(anyhow::anyhow!(e)))?;
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "id, name, email, password_hash, role, created_at, updated_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;

        let limit = if limit > 0 { limit } else { i64::MAX };
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM users ORDER BY created_at, id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        let users = rows
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((users, total))
    }

    async fn get(&self, id: &str) -> Result<User> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        row.ok_or_else(|| TrackError::NotFound(format!("user {id}")))?
            .try_into()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        row.map(User::try_from).transpose()
    }

    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn update(&self, id: &str, user: &User) -> Result<User> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET name = $2, email = $3, password_hash = $4, role = $5, \
             updated_at = $6 WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.ok_or_else(|| TrackError::NotFound(format!("user {id}")))?
            .try_into()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(TrackError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}
