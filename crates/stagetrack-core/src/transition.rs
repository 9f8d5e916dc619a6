//! Client state transition service.
//!
//! Validates and applies stage moves, owns client lifecycle (create,
//! update, soft deactivation) and reports rollback transitions to the
//! metric engine. Same-client updates are not serialized here; the store
//! is the source of truth under concurrent writers.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::client::{Client, ClientFilters, ClientRequest, Contract};
use crate::engine::MetricEngine;
use crate::error::{Result, TrackError};
use crate::graph::{StageGraph, DIRECTION_PREV};
use crate::ports::ClientStore;

/// Default page size for list queries.
pub const DEFAULT_LIMIT: i64 = 50;

pub struct TransitionService {
    clients: Arc<dyn ClientStore>,
    graph: Arc<StageGraph>,
    engine: Arc<MetricEngine>,
    email_format: Regex,
}

impl TransitionService {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        graph: Arc<StageGraph>,
        engine: Arc<MetricEngine>,
    ) -> Self {
        Self {
            clients,
            graph,
            engine,
            email_format: Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$")
                .expect("email regex is valid"),
        }
    }

    /// Create a client on its initial stage.
    pub async fn create(&self, req: ClientRequest) -> Result<Client> {
        let email = req
            .email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| TrackError::InvalidInput("email: cannot be blank".into()))?;
        if !self.email_format.is_match(email) {
            return Err(TrackError::InvalidInput("email: invalid format".into()));
        }
        if self.clients.find_by_email(email).await?.is_some() {
            return Err(TrackError::Conflict(format!(
                "client with email {email} already exists"
            )));
        }

        let stage = self.graph.resolve("", &req.stage)?;

        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4().to_string(),
            name: req.name.filter(|n| !n.is_empty()),
            email: Some(email.to_string()),
            current_stage: stage,
            registration_date: Some(now),
            last_updated: now,
            is_active: true,
            source: req.source,
            channel: req.channel,
            app: req.app.unwrap_or_default(),
            last_login: req.last_login,
            contracts: assign_contract_ids(req.contracts)?,
        };

        self.clients.insert(&client).await?;
        info!(client_id = %client.id, stage = %client.current_stage, "client created");
        Ok(client)
    }

    /// Apply a stage transition (and any attribute updates) to a client.
    pub async fn update(&self, id: &str, req: ClientRequest) -> Result<Client> {
        let existing = self.clients.get(id).await?;

        let next_stage = self
            .graph
            .resolve(&existing.current_stage, &req.stage)
            .map_err(|e| match e {
                err @ (TrackError::InvalidTransition { .. } | TrackError::InvalidDirection(_)) => {
                    err
                }
                other => TrackError::InvalidTransition {
                    from: existing.current_stage.clone(),
                    direction: req.stage.clone(),
                    reason: other.to_string(),
                },
            })?;

        let name = req
            .name
            .filter(|n| !n.is_empty())
            .or(existing.name.clone())
            .unwrap_or_else(|| format!("Guest_{id}"));

        let updated = Client {
            id: existing.id.clone(),
            name: Some(name),
            email: req.email.filter(|e| !e.is_empty()).or(existing.email),
            current_stage: next_stage,
            // Never overwritten after the first successful create.
            registration_date: existing.registration_date,
            last_updated: Utc::now(),
            is_active: req.is_active.unwrap_or(existing.is_active),
            source: req.source.or(existing.source),
            channel: req.channel.or(existing.channel),
            app: req.app.unwrap_or(existing.app),
            last_login: req.last_login.or(existing.last_login),
            contracts: if req.contracts.is_empty() {
                existing.contracts
            } else {
                assign_contract_ids(req.contracts)?
            },
        };

        let stored = self.clients.update(id, &updated).await?;
        info!(client_id = %id, stage = %stored.current_stage, "client updated");

        if req.stage == DIRECTION_PREV {
            if let Err(e) = self.engine.record_rollback(stored.last_updated).await {
                warn!(client_id = %id, error = %e, "failed to record rollback metric");
            }
        }

        Ok(stored)
    }

    /// Filtered, paginated listing. Out-of-range paging values fall back
    /// to the defaults; `is_active` defaults to true.
    pub async fn list(
        &self,
        mut filters: ClientFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Client>, i64)> {
        let limit = if limit <= 0 { DEFAULT_LIMIT } else { limit };
        let offset = offset.max(0);
        if filters.is_active.is_none() {
            filters.is_active = Some(true);
        }
        self.clients.list(&filters, limit, offset).await
    }

    pub async fn get(&self, id: &str) -> Result<Client> {
        self.clients.get(id).await
    }

    /// Soft delete: the client is deactivated, never removed.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.clients.deactivate(id).await?;
        info!(client_id = %id, "client deactivated");
        Ok(())
    }
}

/// Assign ids to contracts that lack one and enforce uniqueness within
/// the client.
fn assign_contract_ids(contracts: Vec<Contract>) -> Result<Vec<Contract>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(contracts.len());
    for mut contract in contracts {
        if contract.id.is_empty() {
            contract.id = Uuid::new_v4().to_string();
        }
        if !seen.insert(contract.id.clone()) {
            return Err(TrackError::InvalidInput(format!(
                "duplicate contract id '{}'",
                contract.id
            )));
        }
        out.push(contract);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::{Interval, MetricFilters, MetricType};
    use crate::domain::stage::{Stage, StageRecord};
    use crate::ports::MetricStore;
    use crate::sink::MetricSink;
    use crate::store::{MemoryClientStore, MemoryMetricStore};

    struct Fixture {
        clients: Arc<MemoryClientStore>,
        metrics: Arc<MemoryMetricStore>,
        service: TransitionService,
    }

    fn stage(id: &str, order: u32, transitions: &[&str]) -> Stage {
        Stage::from(StageRecord {
            id: id.into(),
            name: id.to_uppercase(),
            order,
            transitions: transitions.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn fixture() -> Fixture {
        let graph = Arc::new(
            StageGraph::new(vec![
                stage("registration", 1, &["registration", "onboarding"]),
                stage("onboarding", 2, &["registration", "active"]),
                stage("active", 3, &["onboarding", "active"]),
            ])
            .unwrap(),
        );
        let clients = Arc::new(MemoryClientStore::new());
        let metrics = Arc::new(MemoryMetricStore::new());
        let engine = Arc::new(MetricEngine::new(
            clients.clone(),
            metrics.clone(),
            graph.clone(),
            Arc::new(MetricSink::new().unwrap()),
        ));
        let service = TransitionService::new(clients.clone(), graph, engine);
        Fixture {
            clients,
            metrics,
            service,
        }
    }

    fn request(email: &str, stage: &str) -> ClientRequest {
        ClientRequest {
            name: Some("A".into()),
            email: Some(email.into()),
            stage: stage.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_bootstraps_on_named_stage() {
        let f = fixture();
        let client = f.service.create(request("a@x.io", "registration")).await.unwrap();
        assert_eq!(client.current_stage, "registration");
        assert!(client.registration_date.is_some());
        assert!(client.is_active);
    }

    #[tokio::test]
    async fn create_rejects_directions_and_unknown_stages() {
        let f = fixture();
        for direction in ["next", "prev", "nowhere"] {
            let err = f
                .service
                .create(request(&format!("{direction}@x.io"), direction))
                .await
                .unwrap_err();
            assert!(matches!(err, TrackError::InvalidDirection(_)), "{direction}");
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let f = fixture();
        f.service.create(request("dup@x.io", "registration")).await.unwrap();
        let err = f
            .service
            .create(request("dup@x.io", "registration"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_rejects_malformed_email() {
        let f = fixture();
        let err = f.service.create(request("not-an-email", "registration")).await.unwrap_err();
        assert!(matches!(err, TrackError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_forces_active_and_assigns_contract_ids() {
        let f = fixture();
        let mut req = request("c@x.io", "registration");
        req.is_active = Some(false);
        req.contracts = vec![Contract::default(), Contract::default()];
        let client = f.service.create(req).await.unwrap();
        assert!(client.is_active, "create always activates");
        assert_eq!(client.contracts.len(), 2);
        assert!(client.contracts.iter().all(|c| !c.id.is_empty()));
        assert_ne!(client.contracts[0].id, client.contracts[1].id);
    }

    #[tokio::test]
    async fn update_moves_forward() {
        let f = fixture();
        let created = f.service.create(request("b@x.io", "registration")).await.unwrap();
        let updated = f
            .service
            .update(&created.id, request("b@x.io", "next"))
            .await
            .unwrap();
        assert_eq!(updated.current_stage, "onboarding");
    }

    #[tokio::test]
    async fn update_preserves_registration_date() {
        let f = fixture();
        let created = f.service.create(request("c2@x.io", "registration")).await.unwrap();
        let updated = f
            .service
            .update(&created.id, request("c2@x.io", "next"))
            .await
            .unwrap();
        assert_eq!(updated.registration_date, created.registration_date);
    }

    #[tokio::test]
    async fn update_missing_client_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .update("ghost", request("g@x.io", "next"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_falls_back_to_guest_name() {
        let f = fixture();
        let mut req = request("d@x.io", "registration");
        req.name = None;
        let created = f.service.create(req).await.unwrap();
        assert!(created.name.is_none());

        let mut update = request("d@x.io", "next");
        update.name = Some(String::new());
        let updated = f.service.update(&created.id, update).await.unwrap();
        assert_eq!(updated.name.as_deref(), Some(format!("Guest_{}", created.id).as_str()));
    }

    #[tokio::test]
    async fn rollback_update_records_daily_metric() {
        let f = fixture();
        let created = f.service.create(request("e@x.io", "registration")).await.unwrap();
        f.service
            .update(&created.id, request("e@x.io", "next"))
            .await
            .unwrap();

        let rolled = f
            .service
            .update(&created.id, request("e@x.io", "prev"))
            .await
            .unwrap();
        assert_eq!(rolled.current_stage, "registration");

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::RollbackCount, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 1.0);

        // A second rollback the same day bumps the same row.
        f.service
            .update(&created.id, request("e@x.io", "onboarding"))
            .await
            .unwrap();
        f.service
            .update(&created.id, request("e@x.io", "prev"))
            .await
            .unwrap();
        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::RollbackCount, Some(Interval::Day)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 2.0);
    }

    #[tokio::test]
    async fn forward_moves_do_not_record_rollbacks() {
        let f = fixture();
        let created = f.service.create(request("f@x.io", "registration")).await.unwrap();
        // A jump to the explicit predecessor id is not a "prev" move.
        f.service
            .update(&created.id, request("f@x.io", "next"))
            .await
            .unwrap();
        f.service
            .update(&created.id, request("f@x.io", "registration"))
            .await
            .unwrap();

        let rows = f
            .metrics
            .list(&MetricFilters::new(MetricType::RollbackCount, Some(Interval::Day)))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn update_is_idempotent_except_last_updated() {
        let f = fixture();
        let created = f.service.create(request("g@x.io", "registration")).await.unwrap();
        let first = f
            .service
            .update(&created.id, request("g@x.io", "next"))
            .await
            .unwrap();
        let second = f
            .service
            .update(&created.id, request("g@x.io", "onboarding"))
            .await
            .unwrap();

        assert_eq!(first.current_stage, second.current_stage);
        assert_eq!(first.name, second.name);
        assert_eq!(first.email, second.email);
        assert_eq!(first.registration_date, second.registration_date);
        assert!(second.last_updated >= first.last_updated);
    }

    #[tokio::test]
    async fn list_defaults_and_clamps_pagination() {
        let f = fixture();
        for i in 0..3 {
            f.service
                .create(request(&format!("l{i}@x.io"), "registration"))
                .await
                .unwrap();
        }
        let (page, total) = f
            .service
            .list(ClientFilters::default(), -1, -10)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 3);
    }

    #[tokio::test]
    async fn list_defaults_to_active_clients() {
        let f = fixture();
        let kept = f.service.create(request("k@x.io", "registration")).await.unwrap();
        let dropped = f.service.create(request("d2@x.io", "registration")).await.unwrap();
        f.service.delete(&dropped.id).await.unwrap();

        let (page, total) = f.service.list(ClientFilters::default(), 0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].id, kept.id);

        let (all, _) = f
            .service
            .list(
                ClientFilters {
                    is_active: Some(false),
                    ..Default::default()
                },
                0,
                0,
            )
            .await
            .unwrap();
        assert_eq!(all[0].id, dropped.id);
    }

    #[tokio::test]
    async fn delete_deactivates_instead_of_removing() {
        let f = fixture();
        let created = f.service.create(request("h@x.io", "registration")).await.unwrap();
        f.service.delete(&created.id).await.unwrap();
        let after = f.clients.get(&created.id).await.unwrap();
        assert!(!after.is_active);
    }

    #[tokio::test]
    async fn current_stage_is_always_a_graph_node() {
        let f = fixture();
        let created = f.service.create(request("i@x.io", "registration")).await.unwrap();
        for direction in ["next", "active", "prev", "onboarding"] {
            let updated = f
                .service
                .update(&created.id, request("i@x.io", direction))
                .await
                .unwrap();
            assert!(
                ["registration", "onboarding", "active"].contains(&updated.current_stage.as_str())
            );
        }
    }
}
