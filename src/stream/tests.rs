//! Tests for stream module

use super::*;
use crate::position::{LogPosition, PositionMarker};
use crate::state::{MemoryStateStore, SnapshotProgress};
use crate::types::Record;
use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Mutex;

type Journal = Arc<Mutex<Vec<String>>>;

/// Stage replaying a fixed list of events, journaling open/close calls
struct ScriptedStage {
    name: &'static str,
    descriptor: StageDescriptor,
    events: VecDeque<Result<StageEvent>>,
    journal: Journal,
    fail_open: bool,
}

impl ScriptedStage {
    fn new(name: &'static str, descriptor: StageDescriptor, journal: &Journal) -> Self {
        Self {
            name,
            descriptor,
            events: VecDeque::new(),
            journal: Arc::clone(journal),
            fail_open: false,
        }
    }

    fn event(mut self, event: StageEvent) -> Self {
        self.events.push_back(Ok(event));
        self
    }

    fn error(mut self, error: Error) -> Self {
        self.events.push_back(Err(error));
        self
    }

    fn boxed(self) -> Box<dyn Stage> {
        Box::new(self)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn describe(&self) -> StageDescriptor {
        self.descriptor.clone()
    }

    async fn open(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(format!("open {}", self.name));
        if self.fail_open {
            return Err(Error::transient("open", None, "refused"));
        }
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<StageEvent>> {
        self.events.pop_front().transpose()
    }

    async fn close(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(format!("close {}", self.name));
        Ok(())
    }
}

fn users() -> TableId {
    TableId::new("public", "users")
}

fn orders() -> TableId {
    TableId::new("public", "orders")
}

fn snapshot_record(table: TableId, page: u64, tuple: u32) -> StageEvent {
    StageEvent::Record {
        record: Record::snapshot(table, json!({"page": page, "tuple": tuple})),
        progress: Some(SnapshotProgress::new(PositionMarker::new(page, tuple), None)),
    }
}

fn log_record(table: TableId, position: u64) -> StageEvent {
    StageEvent::Record {
        record: Record::log_tail(table, json!({}), LogPosition::from_u64(position)),
        progress: None,
    }
}

fn fresh_state() -> GlobalSyncState {
    GlobalSyncState::fresh(LogPosition::from_u64(100))
}

async fn drain(stream: &mut SyncStream) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(message) = stream.next().await.unwrap() {
        messages.push(message);
    }
    messages
}

// ============================================================================
// Sequencing Tests
// ============================================================================

#[tokio::test]
async fn test_stages_run_strictly_in_sequence() {
    let journal = Journal::default();
    let stages = vec![
        ScriptedStage::new("a", StageDescriptor::snapshot(users()), &journal)
            .event(StageEvent::SnapshotComplete(users()))
            .boxed(),
        ScriptedStage::new("b", StageDescriptor::log_tail(vec![users()]), &journal).boxed(),
    ];

    let mut stream = SyncStream::new(stages, fresh_state());
    assert!(journal.lock().unwrap().is_empty());

    drain(&mut stream).await;
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["open a", "close a", "open b", "close b"]
    );
    assert_eq!(stream.stats().stages_opened, 2);
    assert!(stream.is_finished());
}

#[tokio::test]
async fn test_empty_stream_emits_final_state() {
    let mut stream = SyncStream::new(Vec::new(), fresh_state());
    let messages = drain(&mut stream).await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_state());
}

#[tokio::test]
async fn test_leading_messages_come_first() {
    let mut stream =
        SyncStream::new(Vec::new(), fresh_state()).with_leading_messages([Message::warn("careful")]);
    let messages = drain(&mut stream).await;
    assert!(messages[0].is_log());
    assert!(messages[1].is_state());
}

// ============================================================================
// State Tests
// ============================================================================

#[tokio::test]
async fn test_snapshot_events_update_state() {
    let journal = Journal::default();
    let stages = vec![
        ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
            .event(snapshot_record(users(), 0, 1))
            .event(snapshot_record(users(), 0, 2))
            .event(StageEvent::SnapshotComplete(users()))
            .boxed(),
        ScriptedStage::new("orders", StageDescriptor::snapshot(orders()), &journal)
            .event(snapshot_record(orders(), 3, 1))
            .boxed(),
    ];

    let mut stream = SyncStream::new(stages, fresh_state());
    let messages = drain(&mut stream).await;

    let records = messages.iter().filter(|m| m.is_record()).count();
    assert_eq!(records, 3);

    let state = stream.into_state();
    assert_eq!(state.table_state(&users()), TableSyncState::SnapshotComplete);
    assert_eq!(
        state.table_state(&orders()),
        TableSyncState::SnapshotInProgress(SnapshotProgress::new(PositionMarker::new(3, 1), None))
    );
}

#[tokio::test]
async fn test_checkpoint_interval() {
    let journal = Journal::default();
    let stages = vec![ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
        .event(snapshot_record(users(), 0, 1))
        .event(snapshot_record(users(), 0, 2))
        .event(snapshot_record(users(), 0, 3))
        .boxed()];

    let mut stream = SyncStream::new(stages, fresh_state()).with_checkpoint_interval(2);
    let kinds: Vec<&str> = drain(&mut stream)
        .await
        .iter()
        .map(|m| if m.is_record() { "record" } else { "state" })
        .collect();

    assert_eq!(kinds, vec!["record", "record", "state", "record", "state"]);
}

#[tokio::test]
async fn test_log_checkpoints_only_move_forward() {
    let journal = Journal::default();
    let stages = vec![ScriptedStage::new("tail", StageDescriptor::log_tail(vec![users()]), &journal)
        .event(log_record(users(), 120))
        .event(StageEvent::LogCheckpoint(LogPosition::from_u64(120)))
        .event(StageEvent::LogCheckpoint(LogPosition::from_u64(90)))
        .boxed()];

    let mut stream = SyncStream::new(stages, fresh_state());
    let messages = drain(&mut stream).await;

    // record, state@120, final state
    assert_eq!(messages.len(), 3);
    assert_eq!(
        stream.state().last_known_log_position,
        LogPosition::from_u64(120)
    );
    assert_eq!(stream.stats().log_records, 1);
}

#[tokio::test]
async fn test_log_record_before_snapshot_completes_is_rejected() {
    let journal = Journal::default();
    let stages = vec![
        ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
            .event(snapshot_record(users(), 0, 1))
            .boxed(),
        ScriptedStage::new("tail", StageDescriptor::log_tail(vec![users()]), &journal)
            .event(log_record(users(), 120))
            .boxed(),
    ];

    let mut stream = SyncStream::new(stages, fresh_state());
    let err = loop {
        match stream.next().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected an invariant violation"),
            Err(e) => break e,
        }
    };

    assert!(matches!(err, Error::InvariantViolation { .. }));
    assert_eq!(journal.lock().unwrap().last().unwrap(), "close tail");
}

// ============================================================================
// Failure and Close Tests
// ============================================================================

#[tokio::test]
async fn test_stage_error_closes_and_persists() {
    let journal = Journal::default();
    let store = Arc::new(MemoryStateStore::new());
    let identity = SyncIdentity::new("conn", "slot");

    let stages = vec![
        ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
            .event(snapshot_record(users(), 0, 1))
            .error(Error::transient("snapshot scan", Some("public.users".into()), "reset"))
            .boxed(),
        ScriptedStage::new("never", StageDescriptor::snapshot(orders()), &journal).boxed(),
    ];

    let mut stream =
        SyncStream::new(stages, fresh_state()).with_store(store.clone(), identity.clone());

    assert!(stream.next().await.unwrap().unwrap().is_record());
    let err = stream.next().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(stream.next().await.unwrap().is_none());

    assert_eq!(*journal.lock().unwrap(), vec!["open users", "close users"]);

    let saved = store.load(&identity).await.unwrap().unwrap();
    assert_eq!(
        saved.table_state(&users()),
        TableSyncState::SnapshotInProgress(SnapshotProgress::new(PositionMarker::new(0, 1), None))
    );
}

#[tokio::test]
async fn test_open_failure_closes_stage() {
    let journal = Journal::default();
    let mut failing = ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal);
    failing.fail_open = true;

    let mut stream = SyncStream::new(vec![failing.boxed()], fresh_state());
    assert!(stream.next().await.is_err());
    assert_eq!(*journal.lock().unwrap(), vec!["open users", "close users"]);
}

#[tokio::test]
async fn test_close_mid_stream() {
    let journal = Journal::default();
    let store = Arc::new(MemoryStateStore::new());
    let identity = SyncIdentity::new("conn", "slot");

    let stages = vec![
        ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
            .event(snapshot_record(users(), 0, 1))
            .event(snapshot_record(users(), 0, 2))
            .boxed(),
        ScriptedStage::new("tail", StageDescriptor::log_tail(vec![]), &journal).boxed(),
    ];

    let mut stream =
        SyncStream::new(stages, fresh_state()).with_store(store.clone(), identity.clone());
    stream.next().await.unwrap();
    stream.close().await.unwrap();
    stream.close().await.unwrap();

    assert!(stream.next().await.unwrap().is_none());
    assert_eq!(*journal.lock().unwrap(), vec!["open users", "close users"]);
    assert!(store.load(&identity).await.unwrap().is_some());
}

#[tokio::test]
async fn test_message_stream_adapter() {
    let journal = Journal::default();
    let store = Arc::new(MemoryStateStore::new());
    let identity = SyncIdentity::new("conn", "slot");

    let stages = vec![ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
        .event(snapshot_record(users(), 0, 1))
        .event(StageEvent::SnapshotComplete(users()))
        .boxed()];

    let messages: Vec<Result<Message>> = SyncStream::new(stages, fresh_state())
        .with_store(store.clone(), identity.clone())
        .into_message_stream()
        .collect()
        .await;

    assert!(messages.iter().all(|m| m.is_ok()));
    let saved = store.load(&identity).await.unwrap().unwrap();
    assert_eq!(saved.table_state(&users()), TableSyncState::SnapshotComplete);
}

#[tokio::test]
async fn test_message_stream_close_mid_snapshot() {
    let journal = Journal::default();
    let store = Arc::new(MemoryStateStore::new());
    let identity = SyncIdentity::new("conn", "slot");

    let stages = vec![
        ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
            .event(snapshot_record(users(), 0, 1))
            .event(snapshot_record(users(), 0, 2))
            .event(snapshot_record(users(), 0, 3))
            .boxed(),
        ScriptedStage::new("tail", StageDescriptor::log_tail(vec![users()]), &journal).boxed(),
    ];

    let mut messages = SyncStream::new(stages, fresh_state())
        .with_checkpoint_interval(1)
        .with_store(store.clone(), identity.clone())
        .into_message_stream();

    let taken: Vec<Message> = (&mut messages)
        .take(3)
        .map(|m| m.unwrap())
        .collect()
        .await;
    assert!(taken[0].is_record() && taken[1].is_state() && taken[2].is_record());

    messages.close().await.unwrap();
    messages.close().await.unwrap();
    assert!(messages.next().await.is_none());

    assert_eq!(*journal.lock().unwrap(), vec!["open users", "close users"]);

    // the state after (0,2) was queued but never handed out
    let saved = store.load(&identity).await.unwrap().unwrap();
    assert_eq!(
        saved.table_state(&users()),
        TableSyncState::SnapshotInProgress(SnapshotProgress::new(PositionMarker::new(0, 1), None))
    );
}

#[tokio::test]
async fn test_close_after_state_delivered_keeps_latest_progress() {
    let journal = Journal::default();
    let store = Arc::new(MemoryStateStore::new());
    let identity = SyncIdentity::new("conn", "slot");

    let stages = vec![ScriptedStage::new("users", StageDescriptor::snapshot(users()), &journal)
        .event(snapshot_record(users(), 0, 1))
        .event(snapshot_record(users(), 0, 2))
        .boxed()];

    let mut stream = SyncStream::new(stages, fresh_state())
        .with_checkpoint_interval(1)
        .with_store(store.clone(), identity.clone());
    for _ in 0..4 {
        stream.next().await.unwrap();
    }
    stream.close().await.unwrap();

    let saved = store.load(&identity).await.unwrap().unwrap();
    assert_eq!(
        saved.table_state(&users()),
        TableSyncState::SnapshotInProgress(SnapshotProgress::new(PositionMarker::new(0, 2), None))
    );
}
