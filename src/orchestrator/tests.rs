//! Tests for orchestrator module

use super::*;
use crate::config::InvalidCursorPolicy;
use crate::position::PositionMarker;
use crate::source::{FixtureDefinition, FixtureFailures, FixtureSource, FixtureTable};
use crate::state::{MemoryStateStore, SnapshotProgress};
use crate::types::SourceKind;
use pretty_assertions::assert_eq;
use serde_json::json;

fn pos(value: u64) -> LogPosition {
    LogPosition::from_u64(value)
}

fn t(name: &str) -> TableId {
    TableId::new("public", name)
}

fn config() -> CdcConfig {
    CdcConfig::new("conn", "airbyte_slot", "airbyte_pub").with_tables(["public.users", "public.orders"])
}

fn definition() -> FixtureDefinition {
    FixtureDefinition::new("airbyte_slot", pos(100), pos(500))
        .with_table(
            FixtureTable::new("public.users")
                .with_rows(4)
                .with_rows_per_page(2)
                .with_file_node(7),
        )
        .with_table(FixtureTable::new("public.orders").with_rows(2))
        .with_change("public.users", pos(510), json!({"id": 1, "op": "u"}))
}

struct Harness {
    source: Arc<FixtureSource>,
    store: Arc<MemoryStateStore>,
    orchestrator: Orchestrator,
}

fn harness(config: CdcConfig, definition: FixtureDefinition, state: Option<GlobalSyncState>) -> Harness {
    let source = Arc::new(FixtureSource::new(definition).unwrap());
    let identity = SyncIdentity::new(&config.connection_id, &config.replication_slot);
    let store = Arc::new(match state {
        Some(state) => MemoryStateStore::with_state(&identity, state),
        None => MemoryStateStore::new(),
    });
    let orchestrator = Orchestrator::new(
        config,
        SourceCollaborators::from_source(source.clone()),
        store.clone(),
    );
    Harness {
        source,
        store,
        orchestrator,
    }
}

fn completed_state(position: u64, tables: &[&str]) -> GlobalSyncState {
    let mut state = GlobalSyncState::fresh(pos(position));
    for table in tables {
        state.set_table_state(t(table), TableSyncState::SnapshotComplete);
    }
    state
}

async fn drain(stream: &mut SyncStream) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(message) = stream.next().await.unwrap() {
        messages.push(message);
    }
    messages
}

// ============================================================================
// Plan Tests
// ============================================================================

#[tokio::test]
async fn test_plan_has_no_side_effects() {
    let h = harness(config(), definition(), Some(completed_state(200, &["users"])));
    let plan = h.orchestrator.plan().await.unwrap();

    assert_eq!(plan.committed, None);
    assert!(h.source.commits().is_empty());
    assert_eq!(h.source.advance_count(), 0);
    assert!(h.source.opened().is_empty());
    assert_eq!(plan.phases, vec![Phase::Init, Phase::Validated, Phase::Classified]);
}

#[tokio::test]
async fn test_first_run_snapshots_everything() {
    let h = harness(config(), definition(), None);
    let plan = h.orchestrator.plan().await.unwrap();

    assert_eq!(plan.handoff, Handoff::SnapshotThenLog);
    assert_eq!(plan.resolution, Resolution::Resnapshot);
    assert_eq!(plan.snapshot_tables, vec![t("users"), t("orders")]);
    assert_eq!(plan.log_start, pos(500));
    assert_eq!(
        plan.stages,
        vec![
            StageDescriptor::snapshot(t("users")),
            StageDescriptor::snapshot(t("orders")),
            StageDescriptor::log_tail(vec![t("users"), t("orders")]),
        ]
    );
}

#[tokio::test]
async fn test_all_complete_is_log_only() {
    let h = harness(
        config(),
        definition(),
        Some(completed_state(200, &["users", "orders"])),
    );
    let plan = h.orchestrator.plan().await.unwrap();

    assert_eq!(plan.handoff, Handoff::LogOnly);
    assert_eq!(plan.log_start, pos(200));
    assert_eq!(
        plan.stages,
        vec![StageDescriptor::log_tail(vec![t("users"), t("orders")])]
    );
}

#[tokio::test]
async fn test_empty_table_list_is_config_error() {
    let config = CdcConfig::new("conn", "airbyte_slot", "airbyte_pub");
    let h = harness(config, definition(), None);
    let err = h.orchestrator.plan().await.unwrap_err();
    assert!(matches!(err, Error::MissingConfigField { ref field } if field == "tables"));
}

// ============================================================================
// Retention Tests
// ============================================================================

#[tokio::test]
async fn test_fail_policy_stops_before_any_side_effect() {
    let h = harness(config(), definition(), Some(completed_state(50, &["users"])));
    let err = h.orchestrator.run().await.unwrap_err();

    assert!(matches!(err, Error::RetentionViolation { .. }));
    assert!(h.source.commits().is_empty());
    assert_eq!(h.source.advance_count(), 0);
    assert!(h.source.opened().is_empty());
}

#[tokio::test]
async fn test_degrade_policy_resnapshots_with_warning() {
    let config = config().with_invalid_cursor_policy(InvalidCursorPolicy::Degrade);
    let h = harness(config, definition(), Some(completed_state(50, &["users", "orders"])));

    let mut output = h.orchestrator.run().await.unwrap();
    assert_eq!(output.plan.handoff, Handoff::SnapshotThenLog);
    assert_eq!(output.plan.committed, None);
    assert_eq!(output.plan.log_start, pos(500));

    let first = output.stream.next().await.unwrap().unwrap();
    assert!(first.is_log());
}

#[tokio::test]
async fn test_valid_checkpoint_is_committed() {
    let h = harness(config(), definition(), Some(completed_state(200, &["users", "orders"])));
    let output = h.orchestrator.run().await.unwrap();

    assert_eq!(output.plan.committed, Some(pos(200)));
    assert_eq!(h.source.commits(), vec![pos(200)]);
    assert_eq!(h.source.advance_count(), 1);
}

#[tokio::test]
async fn test_dry_run_skips_commit() {
    let h = harness(
        config().with_dry_run(true),
        definition(),
        Some(completed_state(200, &["users", "orders"])),
    );
    let output = h.orchestrator.run().await.unwrap();
    assert_eq!(output.plan.committed, None);
    assert!(h.source.commits().is_empty());
}

// ============================================================================
// Run Tests
// ============================================================================

#[tokio::test]
async fn test_run_is_lazy() {
    let h = harness(config(), definition(), None);
    let output = h.orchestrator.run().await.unwrap();

    assert!(h.source.opened().is_empty());
    assert_eq!(
        output.plan.phases,
        vec![
            Phase::Init,
            Phase::Validated,
            Phase::Classified,
            Phase::Scanning,
            Phase::HandoffDecision,
            Phase::TailingLog,
            Phase::Done,
        ]
    );
}

#[tokio::test]
async fn test_first_run_end_to_end() {
    let h = harness(config(), definition(), None);
    let mut output = h.orchestrator.run().await.unwrap();
    let messages = drain(&mut output.stream).await;

    let kinds: Vec<(String, SourceKind)> = messages
        .iter()
        .filter_map(Message::as_record)
        .map(|r| (r.table.name.clone(), r.kind))
        .collect();
    assert_eq!(kinds.len(), 7);
    assert!(kinds[..4].iter().all(|(n, k)| n == "users" && *k == SourceKind::Snapshot));
    assert!(kinds[4..6].iter().all(|(n, k)| n == "orders" && *k == SourceKind::Snapshot));
    assert_eq!(kinds[6], ("users".to_string(), SourceKind::LogTail));

    assert_eq!(
        h.source.opened(),
        vec!["scan:public.users", "scan:public.orders", "feed"]
    );
    assert_eq!(h.source.open_cursor_count(), 0);

    let saved = h
        .store
        .load(&h.orchestrator.identity())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.completed_tables().count(), 2);
    assert_eq!(saved.last_known_log_position, pos(510));
}

#[tokio::test]
async fn test_excluded_table_keeps_progress() {
    let def = FixtureDefinition::new("airbyte_slot", pos(100), pos(500))
        .with_table(FixtureTable::new("public.users").with_rows(2))
        .with_table(FixtureTable::new("public.orders").with_rows(2).under_maintenance());
    let mut state = GlobalSyncState::fresh(pos(200));
    let progress = SnapshotProgress::new(PositionMarker::new(0, 1), None);
    state.set_table_state(t("orders"), TableSyncState::SnapshotInProgress(progress));

    let h = harness(config(), def, Some(state));
    let mut output = h.orchestrator.run().await.unwrap();
    assert_eq!(output.plan.handoff, Handoff::SnapshotOnly);
    assert_eq!(output.plan.stages, vec![StageDescriptor::snapshot(t("users"))]);

    let messages = drain(&mut output.stream).await;
    assert!(messages[0].is_log());
    assert!(messages
        .iter()
        .filter_map(Message::as_record)
        .all(|r| r.table == t("users") && r.kind == SourceKind::Snapshot));

    let state = output.stream.into_state();
    assert_eq!(
        state.table_state(&t("orders")),
        TableSyncState::ExcludedThisRun {
            reason: crate::eligibility::UNDER_MAINTENANCE.to_string(),
            resume: Some(progress),
        }
    );
    assert_eq!(state.table_state(&t("users")), TableSyncState::SnapshotComplete);
    assert!(!h.source.opened().contains(&"feed".to_string()));
}

#[tokio::test]
async fn test_caught_up_tables_tail_log_while_others_excluded() {
    let def = FixtureDefinition::new("airbyte_slot", pos(100), pos(500))
        .with_table(FixtureTable::new("public.users").with_rows(2).under_maintenance())
        .with_table(FixtureTable::new("public.orders").with_rows(2))
        .with_change("public.users", pos(510), json!({"id": 1}))
        .with_change("public.orders", pos(520), json!({"id": 2}));
    let mut state = completed_state(200, &["orders"]);
    let progress = SnapshotProgress::new(PositionMarker::new(0, 1), None);
    state.set_table_state(t("users"), TableSyncState::SnapshotInProgress(progress));

    let h = harness(config(), def, Some(state));
    let mut output = h.orchestrator.run().await.unwrap();
    assert_eq!(output.plan.handoff, Handoff::LogOnly);
    assert_eq!(
        output.plan.stages,
        vec![StageDescriptor::log_tail(vec![t("orders")])]
    );
    assert_eq!(output.plan.excluded.len(), 1);

    let messages = drain(&mut output.stream).await;
    assert!(messages[0].is_log());
    let rows: Vec<_> = messages.iter().filter_map(Message::as_record).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].table, t("orders"));
    assert_eq!(rows[0].kind, SourceKind::LogTail);
    assert_eq!(h.source.opened(), vec!["feed".to_string()]);

    // the checkpoint moved on, so the partial scan cannot be resumed
    let state = output.stream.into_state();
    assert_eq!(state.last_known_log_position, pos(520));
    assert_eq!(
        state.table_state(&t("users")),
        TableSyncState::ExcludedThisRun {
            reason: crate::eligibility::UNDER_MAINTENANCE.to_string(),
            resume: None,
        }
    );
}

#[tokio::test]
async fn test_everything_excluded_runs_nothing() {
    let def = FixtureDefinition::new("airbyte_slot", pos(100), pos(500))
        .with_table(FixtureTable::new("public.users").with_rows(2).under_maintenance())
        .with_table(FixtureTable::new("public.orders").with_rows(2).under_maintenance());

    let h = harness(config(), def, None);
    let plan = h.orchestrator.plan().await.unwrap();
    assert_eq!(plan.handoff, Handoff::SnapshotOnly);
    assert!(plan.stages.is_empty());
}

#[tokio::test]
async fn test_previously_excluded_table_resumes() {
    let progress = SnapshotProgress::new(PositionMarker::new(1, 1), Some(7));
    let mut state = completed_state(200, &["orders"]);
    state.set_table_state(
        t("users"),
        TableSyncState::ExcludedThisRun {
            reason: "vacuum".to_string(),
            resume: Some(progress),
        },
    );

    let h = harness(config(), definition(), Some(state));
    let mut output = h.orchestrator.run().await.unwrap();
    assert_eq!(
        output.stream.state().table_state(&t("users")),
        TableSyncState::SnapshotInProgress(progress)
    );

    let messages = drain(&mut output.stream).await;
    let snapshot_rows = messages
        .iter()
        .filter_map(Message::as_record)
        .filter(|r| r.kind == SourceKind::Snapshot)
        .count();
    // only (1,2) lies past the resume marker (1,1)
    assert_eq!(snapshot_rows, 1);
}

#[tokio::test]
async fn test_file_node_change_restarts_snapshot() {
    let mut state = completed_state(200, &["orders"]);
    state.set_table_state(
        t("users"),
        TableSyncState::SnapshotInProgress(SnapshotProgress::new(PositionMarker::new(1, 1), Some(3))),
    );

    let h = harness(config(), definition(), Some(state));
    let mut output = h.orchestrator.run().await.unwrap();
    assert_eq!(
        output.stream.state().table_state(&t("users")),
        TableSyncState::NotStarted
    );

    let messages = drain(&mut output.stream).await;
    let snapshot_rows = messages
        .iter()
        .filter_map(Message::as_record)
        .filter(|r| r.kind == SourceKind::Snapshot)
        .count();
    assert_eq!(snapshot_rows, 4);
}

#[tokio::test]
async fn test_layout_failure_is_transient() {
    let def = definition().with_failures(FixtureFailures {
        layout: true,
        ..FixtureFailures::default()
    });
    let h = harness(config(), def, None);
    let err = h.orchestrator.run().await.unwrap_err();

    assert!(err.is_retryable());
    assert!(h.source.opened().is_empty());
}

#[tokio::test]
async fn test_missing_layout_names_table() {
    let config = config().with_tables(["public.users", "public.ghost"]);
    let h = harness(config, definition(), None);
    let err = h.orchestrator.run().await.unwrap_err();
    assert!(err.to_string().contains("public.ghost"));
}

#[tokio::test]
async fn test_advance_failure_is_transient() {
    let def = definition().with_failures(FixtureFailures {
        advance: true,
        ..FixtureFailures::default()
    });
    let h = harness(config(), def, None);
    let err = h.orchestrator.run().await.unwrap_err();
    assert!(err.to_string().starts_with("log advance failed"));
}

// ============================================================================
// Check Tests
// ============================================================================

#[tokio::test]
async fn test_check_reports_invalid_checkpoint() {
    let h = harness(config(), definition(), Some(completed_state(50, &[])));
    let report = h.orchestrator.check().await.unwrap();

    assert!(!report.success);
    assert!(!report.still_valid);
    assert!(report.message.unwrap().contains("reset the connection"));
}

#[tokio::test]
async fn test_check_ok() {
    let h = harness(config(), definition(), None);
    let report = h.orchestrator.check().await.unwrap();
    assert!(report.success);
    assert_eq!(report.tables, vec![t("users"), t("orders")]);
}
