//! Postgres-backed client store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use stagetrack_core::domain::client::{AppStatus, Client, ClientFilters, Contract};
use stagetrack_core::error::{Result, TrackError};
use stagetrack_core::ports::ClientStore;

use crate::map_db_err;

pub struct PgClientStore {
    pool: PgPool,
}

impl PgClientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: String,
    name: Option<String>,
    email: Option<String>,
    current_stage: String,
    registration_date: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    is_active: bool,
    source: Option<String>,
    channel: Option<String>,
    app: String,
    last_login: Option<DateTime<Utc>>,
    contracts: Json<Vec<Contract>>,
}

impl TryFrom<ClientRow> for Client {
    type Error = TrackError;

    fn try_from(row: ClientRow) -> Result<Client> {
        let app: AppStatus = row
            .app
            .parse()
            .map_err(|e: String| TrackError::Internal(anyhow::anyhow!(e)))?;
        Ok(Client {
            id: row.id,
            name: row.name,
            email: row.email,
            current_stage: row.current_stage,
            registration_date: row.registration_date,
            last_updated: row.last_updated,
            is_active: row.is_active,
            source: row.source,
            channel: row.channel,
            app,
            last_login: row.last_login,
            contracts: row.contracts.0,
        })
    }
}

const COLUMNS: &str = "id, name, email, current_stage, registration_date, last_updated, \
                       is_active, source, channel, app, last_login, contracts";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &ClientFilters) {
    qb.push(" WHERE TRUE");
    if let Some(id) = &filters.id {
        qb.push(" AND id = ").push_bind(id.clone());
    }
    if let Some(stage) = &filters.stage {
        qb.push(" AND current_stage = ").push_bind(stage.clone());
    }
    if let Some(source) = &filters.source {
        qb.push(" AND source = ").push_bind(source.clone());
    }
    if let Some(channel) = &filters.channel {
        qb.push(" AND channel = ").push_bind(channel.clone());
    }
    if let Some(app) = &filters.app {
        qb.push(" AND app = ").push_bind(app.as_str());
    }
    if let Some(active) = filters.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(after) = filters.updated_after {
        qb.push(" AND last_updated >= ").push_bind(after);
    }
    if let Some(before) = filters.updated_before {
        qb.push(" AND last_updated <= ").push_bind(before);
    }
    if let Some(after) = filters.last_login_after {
        qb.push(" AND last_login >= ").push_bind(after);
    }
}

#[async_trait]
impl ClientStore for PgClientStore {
    async fn list(
        &self,
        filters: &ClientFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Client>, i64)> {
        let total = self.count(filters).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM clients"));
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY registration_date, id");
        if limit > 0 {
            qb.push(" LIMIT ").push_bind(limit);
        }
        qb.push(" OFFSET ").push_bind(offset.max(0));

        let rows: Vec<ClientRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        let clients = rows
            .into_iter()
            .map(Client::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((clients, total))
    }

    async fn get(&self, id: &str) -> Result<Client> {
        let row: Option<ClientRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM clients WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        row.ok_or_else(|| TrackError::NotFound(format!("client {id}")))?
            .try_into()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Client>> {
        let row: Option<ClientRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM clients WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        row.map(Client::try_from).transpose()
    }

    async fn insert(&self, client: &Client) -> Result<()> {
        sqlx::query(
            "INSERT INTO clients (id, name, email, current_stage, registration_date, \
             last_updated, is_active, source, channel, app, last_login, contracts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.current_stage)
        .bind(client.registration_date)
        .bind(client.last_updated)
        .bind(client.is_active)
        .bind(&client.source)
        .bind(&client.channel)
        .bind(client.app.as_str())
        .bind(client.last_login)
        .bind(Json(&client.contracts))
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn update(&self, id: &str, client: &Client) -> Result<Client> {
        let row: Option<ClientRow> = sqlx::query_as(&format!(
            "UPDATE clients SET name = $2, email = $3, current_stage = $4, \
             registration_date = $5, last_updated = $6, is_active = $7, source = $8, \
             channel = $9, app = $10, last_login = $11, contracts = $12 \
             WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.current_stage)
        .bind(client.registration_date)
        .bind(client.last_updated)
        .bind(client.is_active)
        .bind(&client.source)
        .bind(&client.channel)
        .bind(client.app.as_str())
        .bind(client.last_login)
        .bind(Json(&client.contracts))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.ok_or_else(|| TrackError::NotFound(format!("client {id}")))?
            .try_into()
    }

    async fn deactivate(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE clients SET is_active = FALSE, last_updated = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(TrackError::NotFound(format!("client {id}")));
        }
        Ok(())
    }

    async fn count(&self, filters: &ClientFilters) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM clients");
        push_filters(&mut qb, filters);
        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(count)
    }
}
