use std::collections::BTreeMap;
use std::time::Instant;

use lix_store::{LedgerStore, StoreTransaction, TableSpec};
use lix_types::LedgerExtension;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domains::enabled_projectors;
use crate::error::{ProjectionError, ProjectionResult};
use crate::projector::Projector;
use crate::resolver::EntityResolver;
use crate::sequences::SequenceAllocator;
use crate::session::{cancellable, Session};
use crate::sink::BulkSink;

/// Wall time spent in one stage of an invocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageTiming {
    pub name: &'static str,
    pub elapsed_ms: f64,
}

/// Outcome of one committed invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExtensionReport {
    pub invocation_id: Uuid,
    /// First and last state version of the extension.
    pub state_versions: Option<(i64, i64)>,
    pub events: usize,
    pub entities_resolved: usize,
    pub ids_allocated: i64,
    pub rows_written: BTreeMap<String, u64>,
    pub stages: Vec<StageTiming>,
}

impl ExtensionReport {
    /// Rows written across all tables.
    pub fn total_rows(&self) -> u64 {
        self.rows_written.values().sum()
    }
}

/// Projects ledger extensions into history tables.
///
/// Each call to [`extend`](Self::extend) is one invocation: every enabled
/// domain is driven through the same transaction, which commits only if all
/// of them succeed.
pub struct ProjectionEngine<S: LedgerStore> {
    store: S,
    config: EngineConfig,
}

impl<S: LedgerStore> ProjectionEngine<S> {
    /// An engine writing to `store` with the domains enabled in `config`.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Project `extension` in a single transaction.
    ///
    /// Any error rolls the transaction back and is returned unchanged; the
    /// same extension can then be retried from scratch. An extension without
    /// events opens no transaction and allocates no ids.
    pub async fn extend(
        &self,
        extension: &LedgerExtension,
        cancel: &CancellationToken,
    ) -> ProjectionResult<ExtensionReport> {
        let invocation_id = Uuid::now_v7();
        let span = info_span!(
            "extend",
            %invocation_id,
            state_versions = ?extension.state_version_range()
        );
        self.extend_in_span(invocation_id, extension, cancel)
            .instrument(span)
            .await
    }

    async fn extend_in_span(
        &self,
        invocation_id: Uuid,
        extension: &LedgerExtension,
        cancel: &CancellationToken,
    ) -> ProjectionResult<ExtensionReport> {
        let mut report = ExtensionReport {
            invocation_id,
            state_versions: extension.state_version_range(),
            events: extension.event_count(),
            ..ExtensionReport::default()
        };
        if extension.is_empty() {
            debug!("no events to project");
            return Ok(report);
        }

        let mut tx = cancellable(cancel, "begin", async {
            self.store.begin().await.map_err(ProjectionError::store("begin"))
        })
        .await?;

        let outcome = {
            let mut session = Session::new(&mut tx, cancel);
            self.run(extension, &mut session, &mut report).await
        };
        let outcome = outcome.and_then(|()| {
            if cancel.is_cancelled() {
                return Err(ProjectionError::Cancelled { stage: "commit" });
            }
            Ok(())
        });

        if let Err(err) = outcome {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            warn!(error = %err, retryable = err.is_retryable(), "extension rolled back");
            return Err(err);
        }

        let started = Instant::now();
        tx.commit().await.map_err(ProjectionError::store("commit"))?;
        self.finish_stage(&mut report, "commit", started);

        info!(
            events = report.events,
            entities = report.entities_resolved,
            ids = report.ids_allocated,
            rows = report.total_rows(),
            "extension committed"
        );
        Ok(report)
    }

    async fn run(
        &self,
        extension: &LedgerExtension,
        session: &mut Session<'_>,
        report: &mut ExtensionReport,
    ) -> ProjectionResult<()> {
        let cancel = session.cancel_token().clone();
        let mut projectors: Vec<Box<dyn Projector>> = enabled_projectors(&self.config);
        let tables: Vec<&'static TableSpec> = projectors.iter().flat_map(|p| p.tables()).collect();

        let started = Instant::now();
        let sequences = SequenceAllocator::load(session, &tables).await?;
        self.finish_stage(report, "load_sequences", started);

        let started = Instant::now();
        let mut resolver = EntityResolver::new();
        for (state_version, event) in extension.events() {
            let substate = &event.substate;
            let Some(domain) = substate.domain() else {
                return Err(ProjectionError::UnsupportedSubstateShape {
                    domain: "dispatch",
                    entity: event.entity.clone(),
                    state_version,
                    type_name: substate.type_name(),
                });
            };
            let Some(projector) = projectors.iter_mut().find(|p| p.domain() == domain) else {
                continue;
            };
            let entity = cancellable(
                &cancel,
                "resolve",
                resolver.resolve(session.transaction(), &event.entity, state_version),
            )
            .await?;
            for address in substate.referenced_addresses() {
                cancellable(
                    &cancel,
                    "resolve",
                    resolver.resolve(session.transaction(), address, state_version),
                )
                .await?;
            }
            projector.visit(state_version, &entity, substate, &resolver)?;
        }
        report.entities_resolved = resolver.len();
        self.finish_stage(report, "resolve", started);

        let started = Instant::now();
        for projector in projectors.iter_mut() {
            projector.load_prior_state(session).await?;
        }
        self.finish_stage(report, "load_prior_state", started);

        let started = Instant::now();
        for projector in projectors.iter_mut() {
            session.checkpoint("process")?;
            projector.process(&sequences)?;
        }
        report.ids_allocated = sequences.total_allocated();
        self.finish_stage(report, "process", started);

        let started = Instant::now();
        let mut sink = BulkSink::new();
        for projector in projectors.iter_mut() {
            projector.write(session, &mut sink).await?;
        }
        report.rows_written = sink
            .written()
            .iter()
            .map(|(table, rows)| (table.to_string(), *rows))
            .collect();
        self.finish_stage(report, "write", started);

        let started = Instant::now();
        sequences.persist(session).await?;
        self.finish_stage(report, "persist_sequences", started);
        Ok(())
    }

    fn finish_stage(&self, report: &mut ExtensionReport, name: &'static str, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if self.config.stage_timings {
            debug!(stage = name, elapsed_ms, "stage complete");
        }
        report.stages.push(StageTiming { name, elapsed_ms });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{authorized_depositor, metadata, resource_preference, role_assignment};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use lix_store::{
        ColumnValue, EntityDirectory, InMemoryStore, InMemoryTransaction, MostRecentQuery, Row,
        StoreError, StoreResult,
    };
    use lix_types::{
        CommittedTransaction, DepositorBadge, EntityAddress, EntityId, ResourcePreference, Substate,
        SubstateEvent,
    };
    use serde_json::json;

    fn addr(s: &str) -> EntityAddress {
        s.parse().unwrap()
    }

    fn event(entity: &str, substate: Substate) -> SubstateEvent {
        SubstateEvent::new(addr(entity), substate)
    }

    fn meta(key: &str, value: Option<&str>) -> Substate {
        Substate::MetadataEntry {
            key: key.to_string(),
            value: value.map(|v| v.as_bytes().to_vec()),
            is_locked: false,
        }
    }

    fn at(state_version: i64, events: Vec<SubstateEvent>) -> CommittedTransaction {
        CommittedTransaction { state_version, events }
    }

    /// Cancels the armed token during the first batch copied afterwards.
    #[derive(Clone, Default)]
    struct CancelOnCopy {
        inner: InMemoryStore,
        armed: Arc<Mutex<Option<CancellationToken>>>,
    }

    impl CancelOnCopy {
        fn arm(&self, cancel: &CancellationToken) {
            *self.armed.lock().expect("lock poisoned") = Some(cancel.clone());
        }
    }

    struct CancelOnCopyTransaction {
        inner: InMemoryTransaction,
        armed: Arc<Mutex<Option<CancellationToken>>>,
    }

    #[async_trait]
    impl LedgerStore for CancelOnCopy {
        type Transaction = CancelOnCopyTransaction;

        async fn begin(&self) -> StoreResult<CancelOnCopyTransaction> {
            Ok(CancelOnCopyTransaction {
                inner: self.inner.begin().await?,
                armed: Arc::clone(&self.armed),
            })
        }
    }

    #[async_trait]
    impl StoreTransaction for CancelOnCopyTransaction {
        async fn next_sequence_values(&mut self, tables: &[&'static TableSpec]) -> StoreResult<Vec<i64>> {
            self.inner.next_sequence_values(tables).await
        }

        async fn set_sequence_values(&mut self, values: &[(&'static TableSpec, i64)]) -> StoreResult<()> {
            self.inner.set_sequence_values(values).await
        }

        async fn most_recent(&mut self, query: &MostRecentQuery<'_>) -> StoreResult<Vec<Row>> {
            self.inner.most_recent(query).await
        }

        async fn copy_in(&mut self, table: &'static TableSpec, stream: Bytes) -> StoreResult<u64> {
            let armed = self.armed.lock().expect("lock poisoned").take();
            if let Some(cancel) = armed {
                cancel.cancel();
            }
            self.inner.copy_in(table, stream).await
        }

        async fn commit(self) -> StoreResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self) -> StoreResult<()> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl EntityDirectory for CancelOnCopyTransaction {
        async fn resolve_entity(
            &mut self,
            address: &EntityAddress,
            state_version: i64,
        ) -> StoreResult<lix_types::ReferencedEntity> {
            self.inner.resolve_entity(address, state_version).await
        }
    }

    fn engine() -> ProjectionEngine<InMemoryStore> {
        ProjectionEngine::new(InMemoryStore::new(), EngineConfig::default())
    }

    fn entry_ids(row: &[ColumnValue]) -> Vec<i64> {
        row[3].as_i64_array().unwrap().to_vec()
    }

    #[tokio::test]
    async fn metadata_delete_and_set_across_invocations() {
        let engine = engine();
        let cancel = CancellationToken::new();

        let first = LedgerExtension::new(vec![at(10, vec![event("account_a", meta("name", Some("x")))])]);
        engine.extend(&first, &cancel).await.unwrap();

        let second = LedgerExtension::new(vec![at(
            11,
            vec![
                event("account_a", meta("name", None)),
                event("account_a", meta("icon", Some("y"))),
            ],
        )]);
        let report = engine.extend(&second, &cancel).await.unwrap();
        assert_eq!(report.rows_written["entity_metadata_entry_history"], 2);
        assert_eq!(report.rows_written["entity_metadata_aggregate_history"], 1);

        let entries = engine.store().rows(metadata::METADATA_ENTRY_HISTORY.name);
        let ids: Vec<i64> = entries.iter().map(|r| r[0].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(entries[1][5], ColumnValue::Bool(true));

        let aggregates = engine.store().rows(metadata::METADATA_AGGREGATE_HISTORY.name);
        assert_eq!(aggregates.len(), 2);
        assert_eq!(entry_ids(&aggregates[0]), vec![1]);
        assert_eq!(aggregates[1][1], ColumnValue::Int8(11));
        assert_eq!(entry_ids(&aggregates[1]), vec![3]);

        assert_eq!(
            engine.store().sequence_value(&metadata::METADATA_ENTRY_HISTORY.sequence_name()),
            Some(3)
        );
    }

    #[tokio::test]
    async fn one_aggregate_per_entity_and_version() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![
            at(
                5,
                vec![
                    event("account_a", meta("a", Some("1"))),
                    event("account_b", meta("a", Some("2"))),
                    event("account_a", meta("b", Some("3"))),
                ],
            ),
            at(6, vec![event("account_a", meta("a", Some("4")))]),
        ]);
        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.entities_resolved, 2);
        let aggregates = engine.store().rows(metadata::METADATA_AGGREGATE_HISTORY.name);
        assert_eq!(aggregates.len(), 3);
        // account_a at 5, account_b at 5, account_a at 6.
        assert_eq!(entry_ids(&aggregates[0]), vec![2, 1]);
        assert_eq!(entry_ids(&aggregates[1]), vec![3]);
        assert_eq!(entry_ids(&aggregates[2]), vec![4, 2]);
    }

    #[tokio::test]
    async fn empty_extension_touches_nothing() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![at(3, Vec::new())]);
        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.total_rows(), 0);
        assert_eq!(report.ids_allocated, 0);
        assert!(report.stages.is_empty());
        assert_eq!(report.state_versions, Some((3, 3)));
        assert_eq!(
            engine.store().sequence_value(&metadata::METADATA_ENTRY_HISTORY.sequence_name()),
            None
        );
    }

    #[tokio::test]
    async fn cancelled_invocation_commits_nothing() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let extension = LedgerExtension::new(vec![at(1, vec![event("account_a", meta("a", Some("1")))])]);

        let err = engine.extend(&extension, &cancel).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Cancelled { .. }));
        assert!(err.is_retryable());
        assert!(engine.store().rows(metadata::METADATA_ENTRY_HISTORY.name).is_empty());
    }

    #[tokio::test]
    async fn cancellation_while_writing_rolls_back() {
        let engine = ProjectionEngine::new(CancelOnCopy::default(), EngineConfig::default());
        let cancel = CancellationToken::new();
        engine.store().arm(&cancel);
        let extension = LedgerExtension::new(vec![at(1, vec![event("account_a", meta("a", Some("1")))])]);

        // The entry batch lands in the transaction; the aggregate batch sees the token.
        let err = engine.extend(&extension, &cancel).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Cancelled { stage: "write" }));
        let store = &engine.store().inner;
        assert!(store.rows(metadata::METADATA_ENTRY_HISTORY.name).is_empty());
        assert!(store.rows(metadata::METADATA_AGGREGATE_HISTORY.name).is_empty());
        assert_eq!(store.entity_count(), 0);

        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_rows(), 2);
        assert_eq!(store.rows(metadata::METADATA_ENTRY_HISTORY.name).len(), 1);
        assert_eq!(store.rows(metadata::METADATA_AGGREGATE_HISTORY.name).len(), 1);
    }

    #[tokio::test]
    async fn copy_failure_rolls_back_every_domain() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![at(
            1,
            vec![
                event("account_a", meta("a", Some("1"))),
                event("account_a", Substate::DefaultDepositRule {
                    rule: lix_types::DefaultDepositRule::Reject,
                }),
            ],
        )]);
        engine.store().fail_next_copy();

        let err = engine.extend(&extension, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Store { stage: "write", source: StoreError::Transport(_) }));
        assert!(engine.store().rows(metadata::METADATA_ENTRY_HISTORY.name).is_empty());
        assert!(engine.store().rows("account_default_deposit_rule_history").is_empty());
        assert_eq!(engine.store().entity_count(), 0);

        // A retry of the same extension succeeds on fresh ids.
        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_rows(), 3);
        let ids: Vec<i64> = engine
            .store()
            .rows(metadata::METADATA_ENTRY_HISTORY.name)
            .iter()
            .map(|r| r[0].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn disabled_domain_is_skipped() {
        let mut config = EngineConfig::default();
        config.domains.metadata = false;
        let engine = ProjectionEngine::new(InMemoryStore::new(), config);
        let extension = LedgerExtension::new(vec![at(
            1,
            vec![
                event("account_a", meta("a", Some("1"))),
                event("component_c", Substate::ComponentState { state: json!({"n": 1}) }),
            ],
        )]);

        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.rows_written.len(), 1);
        assert_eq!(report.rows_written["state_history"], 1);
        // Only the entity of an enabled domain was resolved.
        assert_eq!(report.entities_resolved, 1);
    }

    #[tokio::test]
    async fn role_rules_without_owner_role_fail() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![at(
            7,
            vec![event("component_c", Substate::RoleAssignmentRule {
                role_key: "minter".into(),
                module: lix_types::ModuleId::Main,
                rule: Some(json!("allow_all")),
            })],
        )]);

        let err = engine.extend(&extension, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::InvariantViolation { domain: "role_assignment", state_version: 7, .. }
        ));
        assert!(!err.is_retryable());
        assert!(engine.store().rows(role_assignment::ROLE_ASSIGNMENT_ENTRY_HISTORY.name).is_empty());
    }

    #[tokio::test]
    async fn owner_role_persists_across_invocations() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let first = LedgerExtension::new(vec![at(
            1,
            vec![event("component_c", Substate::RoleAssignmentOwner { owner_role: json!("owner") })],
        )]);
        engine.extend(&first, &cancel).await.unwrap();

        let second = LedgerExtension::new(vec![at(
            2,
            vec![event("component_c", Substate::RoleAssignmentRule {
                role_key: "minter".into(),
                module: lix_types::ModuleId::Main,
                rule: Some(json!("allow_all")),
            })],
        )]);
        engine.extend(&second, &cancel).await.unwrap();

        let aggregates = engine.store().rows(role_assignment::ROLE_ASSIGNMENT_AGGREGATE_HISTORY.name);
        assert_eq!(aggregates.len(), 2);
        // owner_role_id carried from version 1. The entry sequence was
        // advanced once by the first invocation without being used.
        assert_eq!(aggregates[1][3], aggregates[0][3]);
        assert_eq!(aggregates[1][4], ColumnValue::Int8Array(vec![2]));
    }

    #[tokio::test]
    async fn resource_preferences_keyed_by_resolved_resource() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![
            at(
                1,
                vec![event("account_a", Substate::ResourcePreference {
                    resource: addr("resource_xrd"),
                    preference: Some(ResourcePreference::Allowed),
                })],
            ),
            at(
                2,
                vec![event("account_a", Substate::ResourcePreference {
                    resource: addr("resource_xrd"),
                    preference: None,
                })],
            ),
        ]);
        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.entities_resolved, 2);

        let entries = engine.store().rows(resource_preference::RESOURCE_PREFERENCE_ENTRY_HISTORY.name);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0][2], ColumnValue::from(EntityId(1)));
        assert_eq!(entries[0][3], ColumnValue::from(EntityId(2)));
        let aggregates = engine.store().rows(resource_preference::RESOURCE_PREFERENCE_AGGREGATE_HISTORY.name);
        assert_eq!(aggregates[1][3], ColumnValue::Int8Array(Vec::new()));
    }

    #[tokio::test]
    async fn authorized_depositor_badges_resolve_their_resource() {
        let engine = engine();
        let badge = |local_id: Option<&str>| match local_id {
            Some(local_id) => DepositorBadge::NonFungible {
                resource: addr("resource_badge"),
                local_id: local_id.to_string(),
            },
            None => DepositorBadge::Resource {
                resource: addr("resource_badge"),
            },
        };
        let extension = LedgerExtension::new(vec![at(
            3,
            vec![
                event("account_a", Substate::AuthorizedDepositor { badge: badge(None), is_deleted: false }),
                event("account_a", Substate::AuthorizedDepositor { badge: badge(Some("#1#")), is_deleted: false }),
            ],
        )]);
        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.entities_resolved, 2);

        let entries = engine.store().rows(authorized_depositor::AUTHORIZED_DEPOSITOR_ENTRY_HISTORY.name);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0][5], ColumnValue::from(EntityId(2)));
        assert!(entries[0][6].is_null());
        assert_eq!(entries[1][6], ColumnValue::from("#1#"));

        // Removing the resource badge later keeps the non-fungible one.
        let removal = LedgerExtension::new(vec![at(
            4,
            vec![event("account_a", Substate::AuthorizedDepositor { badge: badge(None), is_deleted: true })],
        )]);
        engine.extend(&removal, &CancellationToken::new()).await.unwrap();
        let aggregates = engine.store().rows(authorized_depositor::AUTHORIZED_DEPOSITOR_AGGREGATE_HISTORY.name);
        assert_eq!(entry_ids(&aggregates[0]), vec![2, 1]);
        assert_eq!(entry_ids(&aggregates[1]), vec![2]);
    }

    #[tokio::test]
    async fn unknown_substate_is_surfaced() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![at(4, vec![event("account_a", Substate::Unknown)])]);

        let err = engine.extend(&extension, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::UnsupportedSubstateShape { domain: "dispatch", state_version: 4, .. }
        ));
    }

    #[tokio::test]
    async fn report_lists_every_stage() {
        let engine = engine();
        let extension = LedgerExtension::new(vec![at(1, vec![event("account_a", meta("a", Some("1")))])]);
        let report = engine.extend(&extension, &CancellationToken::new()).await.unwrap();

        let names: Vec<_> = report.stages.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["load_sequences", "resolve", "load_prior_state", "process", "write", "persist_sequences", "commit"]
        );
        assert_eq!(report.ids_allocated, 2);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rows_written"]["entity_metadata_entry_history"], 1);
    }
}
