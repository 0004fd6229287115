use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::{Notify, Semaphore};

use super::*;
use crate::db::{Database, LibSqlKeyValueStore};
use crate::gateway::GatewayResult;
use crate::models::{PaymentMethod, TicketData};

#[derive(Debug, Clone, PartialEq)]
struct Call {
    kind: RecordKind,
    payload: Value,
    key: String,
}

/// In-process gateway answering from a script (default: success)
#[derive(Default)]
struct ScriptedGateway {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<VecDeque<GatewayResult<Value>>>,
    entered: Notify,
    /// Blocks submissions until permits are added
    gate: Option<Semaphore>,
    /// Flips the monitor offline after the first submission
    drop_link: Option<ConnectivityMonitor>,
}

impl ScriptedGateway {
    fn with_responses(responses: impl IntoIterator<Item = GatewayResult<Value>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn respond(&self, kind: RecordKind, payload: &Value, key: &str) -> GatewayResult<Value> {
        self.calls.lock().unwrap().push(Call {
            kind,
            payload: payload.clone(),
            key: key.to_string(),
        });
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(monitor) = &self.drop_link {
            monitor.set_online(false);
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(json!({"id": 1})))
    }
}

impl RemoteGateway for ScriptedGateway {
    async fn search_vehicle(&self, plate: &str) -> GatewayResult<Value> {
        if plate == "REM0001" {
            Ok(json!({"plate": plate, "source": "remote"}))
        } else {
            Err(GatewayError::Status {
                status: 404,
                message: "Vehicle not found".to_string(),
            })
        }
    }

    async fn register_vehicle(&self, payload: &Value, key: &str) -> GatewayResult<Value> {
        self.respond(RecordKind::Vehicle, payload, key).await
    }

    async fn create_ticket(&self, payload: &Value, key: &str) -> GatewayResult<Value> {
        self.respond(RecordKind::Ticket, payload, key).await
    }

    async fn create_infraction(&self, payload: &Value, key: &str) -> GatewayResult<Value> {
        self.respond(RecordKind::Infraction, payload, key).await
    }

    async fn upload_infraction_photos(
        &self,
        infraction_id: u64,
        photos: Vec<Photo>,
    ) -> GatewayResult<Vec<String>> {
        Ok((0..photos.len())
            .map(|index| format!("https://cdn.example.com/{infraction_id}/{index}"))
            .collect())
    }
}

type Engine = SyncEngine<LibSqlKeyValueStore, ScriptedGateway>;

async fn engine_with(gateway: ScriptedGateway, online: bool) -> Engine {
    let db = Database::open_in_memory().await.unwrap();
    let queue = DurableQueue::new(LibSqlKeyValueStore::new(db)).with_max_attempts(Some(5));
    SyncEngine::open(queue, gateway, ConnectivityMonitor::new(online))
        .await
        .unwrap()
}

fn unavailable() -> GatewayResult<Value> {
    Err(GatewayError::Status {
        status: 503,
        message: "maintenance".to_string(),
    })
}

async fn pending(engine: &Engine, kind: RecordKind) -> Vec<Record> {
    engine.queue().list_pending(kind).collect().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_write_is_queued_without_calling_gateway() {
    let engine = engine_with(ScriptedGateway::default(), false).await;

    let outcome = engine
        .submit_write(RecordKind::Ticket, json!({"plate": "ABC1234"}))
        .await
        .unwrap();

    let WriteOutcome::Queued { record, reason } = outcome else {
        panic!("expected queued outcome");
    };
    assert_eq!(reason, QueueReason::Offline);
    assert_eq!(record.sync_state, SyncState::Pending);
    assert!(engine.gateway().calls().is_empty());
    assert_eq!(pending(&engine, RecordKind::Ticket).await, vec![record]);
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_offline_write_is_queued_while_network_is_up() {
    let engine = engine_with(ScriptedGateway::default(), true).await;
    engine.set_forced_offline(true).await.unwrap();

    let outcome = engine
        .submit_write(RecordKind::Infraction, json!({"plate": "XYZ9876"}))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        WriteOutcome::Queued {
            reason: QueueReason::ForcedOffline,
            ..
        }
    ));
    assert!(engine.gateway().calls().is_empty());
    assert!(matches!(engine.request_sync().await, Err(Error::Offline)));
}

#[tokio::test(flavor = "multi_thread")]
async fn online_write_is_confirmed_without_queueing() {
    let engine = engine_with(ScriptedGateway::default(), true).await;

    let ticket = TicketData {
        plate: "ABC1234".to_string(),
        zone_id: 3,
        duration: 60,
        payment_method: PaymentMethod::Pix,
        amount: 4.5,
    };
    let outcome = engine.submit(&ticket).await.unwrap();

    assert!(outcome.is_confirmed());
    let calls = engine.gateway().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, RecordKind::Ticket);
    assert_eq!(calls[0].payload["paymentMethod"], json!("pix"));
    assert_eq!(calls[0].key, format!("ticket:{}", outcome.local_id()));
    assert!(engine.queue().records(RecordKind::Ticket).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_online_write_is_retried_with_the_same_key() {
    let engine = engine_with(ScriptedGateway::with_responses([unavailable()]), true).await;

    let outcome = engine
        .submit_write(RecordKind::Vehicle, json!({"plate": "ABC1234"}))
        .await
        .unwrap();
    let WriteOutcome::Queued { record, reason } = outcome else {
        panic!("expected queued outcome");
    };
    assert!(matches!(reason, QueueReason::RemoteFailed(_)));
    assert_eq!(record.sync_state, SyncState::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.last_error.as_deref(), Some("maintenance (503)"));

    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!(session.succeeded, 1);

    let calls = engine.gateway().calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].key, calls[1].key);
    assert_eq!(calls[1].key, record.idempotency_key());
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_vehicle_is_registered_once_after_reconnect() {
    let engine = engine_with(ScriptedGateway::default(), false).await;

    engine
        .submit_write(RecordKind::Vehicle, json!({"plate": "ABC1234"}))
        .await
        .unwrap();
    let queued = pending(&engine, RecordKind::Vehicle).await;
    assert_eq!(queued.len(), 1);

    engine.monitor().set_online(true);
    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };

    assert_eq!(
        engine.gateway().calls(),
        vec![Call {
            kind: RecordKind::Vehicle,
            payload: json!({"plate": "ABC1234"}),
            key: format!("vehicle:{}", queued[0].local_id),
        }]
    );
    assert_eq!((session.attempted, session.succeeded), (1, 1));
    assert!(pending(&engine, RecordKind::Vehicle).await.is_empty());
    // Fully synced bucket is cleared
    assert!(engine.queue().records(RecordKind::Vehicle).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_infraction_is_the_only_one_retried() {
    let gateway = ScriptedGateway::with_responses([unavailable(), Ok(json!({"id": 2}))]);
    let engine = engine_with(gateway, false).await;

    let first = engine
        .submit_write(RecordKind::Infraction, json!({"plate": "AAA1111"}))
        .await
        .unwrap()
        .local_id();
    let second = engine
        .submit_write(RecordKind::Infraction, json!({"plate": "BBB2222"}))
        .await
        .unwrap()
        .local_id();

    engine.monitor().set_online(true);
    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!((session.succeeded, session.failed), (1, 1));
    assert_eq!(session.errors[0].local_id, first);

    let first_record = engine.queue().get(first).await.unwrap().unwrap();
    assert_eq!(first_record.sync_state, SyncState::Failed);
    assert!(first_record.last_error.is_some_and(|error| !error.is_empty()));
    assert_eq!(
        engine.queue().get(second).await.unwrap().unwrap().sync_state,
        SyncState::Synced
    );
    // Bucket still holds a failed record, so nothing was cleared
    assert_eq!(engine.queue().records(RecordKind::Infraction).await.unwrap().len(), 2);

    engine.request_sync().await.unwrap();
    let keys = engine
        .gateway()
        .calls()
        .into_iter()
        .map(|call| call.key)
        .collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            format!("infraction:{first}"),
            format!("infraction:{second}"),
            format!("infraction:{first}"),
        ]
    );
    assert!(engine.queue().records(RecordKind::Infraction).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_follows_kind_priority_then_fifo() {
    let engine = engine_with(ScriptedGateway::default(), false).await;

    for (kind, n) in [
        (RecordKind::Infraction, 1),
        (RecordKind::Ticket, 2),
        (RecordKind::Vehicle, 3),
        (RecordKind::Ticket, 4),
        (RecordKind::Vehicle, 5),
    ] {
        engine.submit_write(kind, json!({"n": n})).await.unwrap();
    }

    engine.monitor().set_online(true);
    engine.request_sync().await.unwrap();

    let order = engine
        .gateway()
        .calls()
        .into_iter()
        .map(|call| (call.kind, call.payload["n"].as_i64().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(
        order,
        vec![
            (RecordKind::Vehicle, 3),
            (RecordKind::Vehicle, 5),
            (RecordKind::Ticket, 2),
            (RecordKind::Ticket, 4),
            (RecordKind::Infraction, 1),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_request_is_coalesced_into_one_more_pass() {
    let gateway = ScriptedGateway::with_responses([unavailable()]).gated();
    let engine = Arc::new(engine_with(gateway, false).await);
    engine
        .submit_write(RecordKind::Vehicle, json!({"plate": "ABC1234"}))
        .await
        .unwrap();
    engine.monitor().set_online(true);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.request_sync().await.unwrap() }
    });
    engine.gateway().entered.notified().await;

    assert!(engine.status().await.unwrap().draining);
    assert_eq!(engine.request_sync().await.unwrap(), SyncReport::Coalesced);

    engine.gateway().gate.as_ref().unwrap().add_permits(10);
    let SyncReport::Completed(session) = first.await.unwrap() else {
        panic!("expected completed drain");
    };

    // First pass failed the vehicle, the coalesced rerun delivered it
    assert_eq!(session.trigger, DrainTrigger::Manual);
    assert_eq!(session.succeeded, 1);
    assert_eq!(engine.gateway().calls().len(), 2);
    assert!(!engine.status().await.unwrap().draining);
}

#[tokio::test(flavor = "multi_thread")]
async fn losing_connectivity_stops_the_pass() {
    let monitor = ConnectivityMonitor::new(false);
    let gateway = ScriptedGateway {
        drop_link: Some(monitor.clone()),
        ..ScriptedGateway::default()
    };
    let db = Database::open_in_memory().await.unwrap();
    let queue = DurableQueue::new(LibSqlKeyValueStore::new(db));
    let engine = SyncEngine::open(queue, gateway, monitor).await.unwrap();

    engine.submit_write(RecordKind::Ticket, json!({"n": 1})).await.unwrap();
    engine.submit_write(RecordKind::Ticket, json!({"n": 2})).await.unwrap();
    engine.monitor().set_online(true);

    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!(session.attempted, 1);
    assert_eq!(pending(&engine, RecordKind::Ticket).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_resubmits_interrupted_record_with_same_key() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("queue.db");

    let record = {
        let db = Database::open(&path).await.unwrap();
        let queue = DurableQueue::new(LibSqlKeyValueStore::new(db));
        let record = queue
            .append(RecordKind::Infraction, json!({"plate": "ABC1234"}))
            .await
            .unwrap();
        // Crash between mark_syncing and the remote response
        queue.mark_syncing(record.local_id).await.unwrap();
        record
    };

    let db = Database::open(&path).await.unwrap();
    let engine = SyncEngine::open(
        DurableQueue::new(LibSqlKeyValueStore::new(db)),
        ScriptedGateway::default(),
        ConnectivityMonitor::new(true),
    )
    .await
    .unwrap();
    // Opening alone leaves queued records as they are
    let status = engine.status().await.unwrap();
    assert_eq!(status.count(RecordKind::Infraction, SyncState::Syncing), 1);

    engine.request_sync().await.unwrap();
    let calls = engine.gateway().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].key, record.idempotency_key());
    assert!(engine.queue().records(RecordKind::Infraction).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_drain_record_is_resubmitted_by_next_drain() {
    let engine = Arc::new(engine_with(ScriptedGateway::default().gated(), false).await);
    let record = match engine
        .submit_write(RecordKind::Ticket, json!({"plate": "ABC1234"}))
        .await
        .unwrap()
    {
        WriteOutcome::Queued { record, .. } => record,
        WriteOutcome::Confirmed { .. } => panic!("expected queued outcome"),
    };
    engine.monitor().set_online(true);

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.request_sync().await }
    });
    engine.gateway().entered.notified().await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let stranded = engine.queue().get(record.local_id).await.unwrap().unwrap();
    assert_eq!(stranded.sync_state, SyncState::Syncing);
    assert!(!engine.status().await.unwrap().draining);

    engine.gateway().gate.as_ref().unwrap().add_permits(10);
    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!((session.attempted, session.succeeded), (1, 1));

    let keys = engine
        .gateway()
        .calls()
        .into_iter()
        .map(|call| call.key)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec![record.idempotency_key(), record.idempotency_key()]);
    assert!(engine.queue().records(RecordKind::Ticket).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_handle_waits_for_the_drain_lease() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("queue.db");

    // Another process mid-drain: record in flight, lease held
    let other = {
        let db = Database::open(&path).await.unwrap();
        DurableQueue::new(LibSqlKeyValueStore::new(db))
    };
    let other_owner = Uuid::now_v7();
    let record = other
        .append(RecordKind::Vehicle, json!({"plate": "ABC1234"}))
        .await
        .unwrap();
    assert!(other
        .acquire_drain_lease(other_owner, Duration::from_secs(60))
        .await
        .unwrap());
    other.mark_syncing(record.local_id).await.unwrap();

    let db = Database::open(&path).await.unwrap();
    let engine = SyncEngine::open(
        DurableQueue::new(LibSqlKeyValueStore::new(db)),
        ScriptedGateway::default(),
        ConnectivityMonitor::new(true),
    )
    .await
    .unwrap();

    assert_eq!(engine.request_sync().await.unwrap(), SyncReport::Busy);
    assert!(engine.gateway().calls().is_empty());
    assert_eq!(
        engine.queue().get(record.local_id).await.unwrap().unwrap().sync_state,
        SyncState::Syncing
    );
    assert!(engine.status().await.unwrap().last_session.is_none());

    // The other drain confirms its record and lets go
    other.mark_synced(record.local_id).await.unwrap();
    other.release_drain_lease(other_owner).await.unwrap();

    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!(session.attempted, 0);
    assert!(engine.gateway().calls().is_empty());
    assert!(engine.queue().records(RecordKind::Vehicle).await.unwrap().is_empty());
    assert!(engine.queue().drain_lease().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_online_write_shares_the_dead_letter_budget() {
    let gateway = ScriptedGateway::with_responses([unavailable(), unavailable()]);
    let db = Database::open_in_memory().await.unwrap();
    let queue = DurableQueue::new(LibSqlKeyValueStore::new(db)).with_max_attempts(Some(2));
    let engine = SyncEngine::open(queue, gateway, ConnectivityMonitor::new(true))
        .await
        .unwrap();

    let local_id = engine
        .submit_write(RecordKind::Ticket, json!({"plate": "ABC1234"}))
        .await
        .unwrap()
        .local_id();

    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!(session.dead_lettered, 1);

    // Online attempt plus one drain attempt
    engine.request_sync().await.unwrap();
    assert_eq!(engine.gateway().calls().len(), 2);
    assert_eq!(
        engine.queue().get(local_id).await.unwrap().unwrap().sync_state,
        SyncState::DeadLettered
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_offline_survives_restart() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("queue.db");

    {
        let db = Database::open(&path).await.unwrap();
        let engine = SyncEngine::open(
            DurableQueue::new(LibSqlKeyValueStore::new(db)),
            ScriptedGateway::default(),
            ConnectivityMonitor::new(true),
        )
        .await
        .unwrap();
        engine.set_forced_offline(true).await.unwrap();
    }

    let db = Database::open(&path).await.unwrap();
    let engine = SyncEngine::open(
        DurableQueue::new(LibSqlKeyValueStore::new(db)),
        ScriptedGateway::default(),
        ConnectivityMonitor::new(true),
    )
    .await
    .unwrap();
    assert!(engine.monitor().state().forced_offline);
    assert!(!engine.monitor().is_online());

    engine.set_forced_offline(false).await.unwrap();
    assert!(engine.monitor().is_online());
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_record_is_dead_lettered_and_kept() {
    let gateway = ScriptedGateway::with_responses([unavailable(), unavailable()]);
    let db = Database::open_in_memory().await.unwrap();
    let queue = DurableQueue::new(LibSqlKeyValueStore::new(db)).with_max_attempts(Some(2));
    let engine = SyncEngine::open(queue, gateway, ConnectivityMonitor::new(false))
        .await
        .unwrap();

    let local_id = engine
        .submit_write(RecordKind::Ticket, json!({"plate": "ABC1234"}))
        .await
        .unwrap()
        .local_id();
    engine.monitor().set_online(true);

    engine.request_sync().await.unwrap();
    let SyncReport::Completed(session) = engine.request_sync().await.unwrap() else {
        panic!("expected completed drain");
    };
    assert_eq!(session.dead_lettered, 1);
    assert!(session.errors[0].dead_lettered);

    // No further submissions until requeued
    engine.request_sync().await.unwrap();
    assert_eq!(engine.gateway().calls().len(), 2);
    assert_eq!(
        engine.queue().get(local_id).await.unwrap().unwrap().sync_state,
        SyncState::DeadLettered
    );

    engine
        .queue()
        .requeue_dead_letters(RecordKind::Ticket)
        .await
        .unwrap();
    engine.request_sync().await.unwrap();
    assert_eq!(engine.gateway().calls().len(), 3);
    assert!(engine.queue().records(RecordKind::Ticket).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn vehicle_search_falls_back_to_queued_registration() {
    let engine = engine_with(ScriptedGateway::default(), false).await;
    engine
        .submit_write(RecordKind::Vehicle, json!({"plate": "ABC-1234", "vehicleType": "car"}))
        .await
        .unwrap();

    let VehicleLookup::Queued(record) = engine.search_vehicle("abc 1234").await.unwrap() else {
        panic!("expected queued lookup");
    };
    assert_eq!(record.payload["vehicleType"], json!("car"));
    assert!(matches!(
        engine.search_vehicle("ZZZ0000").await,
        Err(Error::NotFound(_))
    ));

    engine.monitor().set_online(true);
    assert!(matches!(
        engine.search_vehicle("rem-0001").await.unwrap(),
        VehicleLookup::Remote(_)
    ));
    // Remote miss still finds the local registration
    assert!(matches!(
        engine.search_vehicle("ABC1234").await.unwrap(),
        VehicleLookup::Queued(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn photo_upload_requires_connectivity() {
    let engine = engine_with(ScriptedGateway::default(), false).await;
    let photos = vec![Photo::new("a.jpg", "image/jpeg", vec![1, 2, 3])];

    assert!(matches!(
        engine.upload_infraction_photos(9, photos.clone()).await,
        Err(Error::Offline)
    ));

    engine.monitor().set_online(true);
    assert_eq!(
        engine.upload_infraction_photos(9, photos).await.unwrap(),
        vec!["https://cdn.example.com/9/0".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_sync_drains_on_reconnect() {
    let engine = Arc::new(engine_with(ScriptedGateway::default(), false).await);
    engine
        .submit_write(RecordKind::Vehicle, json!({"plate": "ABC1234"}))
        .await
        .unwrap();

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .run_auto_sync(None, async {
                    let _ = stopped.await;
                })
                .await;
        }
    });

    engine.monitor().set_online(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pending(&engine, RecordKind::Vehicle).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(engine.gateway().calls().len(), 1);
    stop.send(()).unwrap();
    runner.await.unwrap();
}
