//! Postgres-backed queue session and end-to-end ingestion

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{fixture, wait_until, LEGACY_A2_1234, QUEUE};
use notam_server::broker::{enqueue, BrokerEvent, BrokerSession, Delivery, PgQueueSession};
use notam_server::config::BrokerConfig;
use notam_server::db::{NoticeStore, PgNoticeStore};
use notam_server::ingest::{CoordinatorState, IngestionCoordinator};
use notam_server::resilience::{BreakerConfig, ResilienceGuard, RetryConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config(max_in_flight: usize, visibility_timeout_secs: u64) -> BrokerConfig {
    BrokerConfig {
        queue: QUEUE.to_string(),
        poll_interval_ms: 10,
        visibility_timeout_secs,
        max_in_flight,
        reconnect_attempts: 2,
        reconnect_wait_ms: 10,
        ..Default::default()
    }
}

async fn next_delivery(events: &mut mpsc::Receiver<BrokerEvent>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event channel open") {
                BrokerEvent::Message(delivery) => return delivery,
                BrokerEvent::SubscriptionError(e) => panic!("subscription error: {e}"),
                _ => continue,
            }
        }
    })
    .await
    .expect("delivery in time")
}

async fn next_lifecycle(events: &mut mpsc::Receiver<BrokerEvent>) -> BrokerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event channel open") {
                BrokerEvent::Message(_) => continue,
                event => return event,
            }
        }
    })
    .await
    .expect("lifecycle event in time")
}

/// Single-connection pool of its own, tagged so the test can find its backend
async fn session_pool(pool: &PgPool, application_name: &str) -> PgPool {
    let options = pool.connect_options().as_ref().clone().application_name(application_name);
    PgPoolOptions::new()
        .max_connections(1)
        .test_before_acquire(false)
        .connect_with(options)
        .await
        .unwrap()
}

async fn acked(pool: &PgPool, id: i64) -> bool {
    sqlx::query_scalar::<_, bool>("SELECT acked_at IS NOT NULL FROM inbound_messages WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_deliver_and_acknowledge(pool: PgPool) {
    let id = enqueue(&pool, QUEUE, b"payload").await.unwrap();
    enqueue(&pool, "other.queue", b"elsewhere").await.unwrap();

    let session = PgQueueSession::from_pool(pool.clone(), config(4, 30));
    let mut events = session.connect().await.unwrap();
    assert!(matches!(events.recv().await, Some(BrokerEvent::Connected)));
    session.subscribe(QUEUE).await.unwrap();

    let delivery = next_delivery(&mut events).await;
    assert_eq!(delivery.delivery_id, id);
    assert_eq!(delivery.payload, b"payload");
    assert_eq!(delivery.delivery_count, 1);
    assert_eq!(session.in_flight(), 1);

    session.acknowledge(&delivery).await.unwrap();
    assert!(acked(&pool, id).await);
    assert_eq!(session.in_flight(), 0);

    session.disconnect().await.unwrap();
    // A pool passed in stays usable after disconnect
    assert!(!pool.is_closed());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_in_flight_window_is_bounded(pool: PgPool) {
    let first = enqueue(&pool, QUEUE, b"one").await.unwrap();
    let second = enqueue(&pool, QUEUE, b"two").await.unwrap();

    let session = PgQueueSession::from_pool(pool.clone(), config(1, 30));
    let mut events = session.connect().await.unwrap();
    session.subscribe(QUEUE).await.unwrap();

    let delivery = next_delivery(&mut events).await;
    assert_eq!(delivery.delivery_id, first);

    let early = tokio::time::timeout(Duration::from_millis(200), next_delivery(&mut events)).await;
    assert!(early.is_err(), "second message delivered before the first was acknowledged");

    session.acknowledge(&delivery).await.unwrap();
    assert_eq!(next_delivery(&mut events).await.delivery_id, second);

    session.disconnect().await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unacknowledged_message_is_redelivered(pool: PgPool) {
    let id = enqueue(&pool, QUEUE, b"retry me").await.unwrap();

    let session = PgQueueSession::from_pool(pool.clone(), config(4, 1));
    let mut events = session.connect().await.unwrap();
    session.subscribe(QUEUE).await.unwrap();

    let first = next_delivery(&mut events).await;
    assert_eq!(first.delivery_count, 1);

    // Not acknowledged: comes back once the visibility timeout passes
    let again = next_delivery(&mut events).await;
    assert_eq!(again.delivery_id, id);
    assert_eq!(again.delivery_count, 2);

    session.acknowledge(&again).await.unwrap();
    session.disconnect().await.unwrap();
    assert!(acked(&pool, id).await);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_double_subscribe_is_rejected(pool: PgPool) {
    let session = PgQueueSession::from_pool(pool, config(1, 30));
    let _events = session.connect().await.unwrap();
    session.subscribe(QUEUE).await.unwrap();
    assert!(session.subscribe("another").await.is_err());
    session.disconnect().await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_reconnects_after_backend_is_terminated(pool: PgPool) {
    let name = "notam-queue-reconnect";
    let own = session_pool(&pool, name).await;
    let session = PgQueueSession::from_pool(own.clone(), config(1, 30));
    let mut events = session.connect().await.unwrap();
    assert!(matches!(next_lifecycle(&mut events).await, BrokerEvent::Connected));
    session.subscribe(QUEUE).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let killed = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM (SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE application_name = $1) t",
    )
    .bind(name)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(killed, 1);

    assert!(matches!(
        next_lifecycle(&mut events).await,
        BrokerEvent::Reconnecting { attempt: 1 }
    ));
    loop {
        match next_lifecycle(&mut events).await {
            BrokerEvent::Reconnecting { .. } => continue,
            BrokerEvent::Reconnected => break,
            other => panic!("unexpected event: {}", other.kind()),
        }
    }

    // Subscription survives the reconnect
    let id = enqueue(&pool, QUEUE, b"after reconnect").await.unwrap();
    assert_eq!(next_delivery(&mut events).await.delivery_id, id);

    session.disconnect().await.unwrap();
    own.close().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_gives_up_after_reconnect_attempts(pool: PgPool) {
    let lost = session_pool(&pool, "notam-queue-lost").await;
    let session = PgQueueSession::from_pool(
        lost.clone(),
        BrokerConfig {
            reconnect_attempts: 3,
            reconnect_wait_ms: 50,
            ..config(1, 30)
        },
    );
    let mut events = session.connect().await.unwrap();
    assert!(matches!(next_lifecycle(&mut events).await, BrokerEvent::Connected));
    session.subscribe(QUEUE).await.unwrap();

    let started = Instant::now();
    lost.close().await;

    for expected in 1..=3 {
        match next_lifecycle(&mut events).await {
            BrokerEvent::Reconnecting { attempt } => assert_eq!(attempt, expected),
            other => panic!("unexpected event: {}", other.kind()),
        }
    }
    assert!(matches!(
        next_lifecycle(&mut events).await,
        BrokerEvent::Disconnected { .. }
    ));
    // A fixed wait before every attempt
    assert!(started.elapsed() >= Duration::from_millis(150));

    // The consumer has stopped: nothing else arrives
    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err());

    session.disconnect().await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_end_to_end_ingestion(pool: PgPool) {
    let xml = enqueue(&pool, QUEUE, &fixture("aixm_basic.xml")).await.unwrap();
    let text = enqueue(&pool, QUEUE, LEGACY_A2_1234.as_bytes()).await.unwrap();
    let junk = enqueue(&pool, QUEUE, b"not a notice").await.unwrap();

    let store = Arc::new(PgNoticeStore::new(pool.clone()));
    let guard = Arc::new(ResilienceGuard::new(BreakerConfig::default(), RetryConfig::default()));
    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::new(PgQueueSession::from_pool(pool.clone(), config(1, 30))),
        store.clone(),
        guard,
        QUEUE,
    ));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        let shutdown = shutdown.clone();
        async move { coordinator.run(shutdown).await }
    });

    let stats = Arc::clone(coordinator.stats());
    wait_until(|| stats.snapshot().received >= 3).await;
    let mut states = coordinator.watch_state();
    states.wait_for(|s| *s == CoordinatorState::Subscribed).await.unwrap();

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let structured = store.get("A4146/2025").await.unwrap().expect("xml notice");
    assert_eq!(structured.location, "MUXX");
    assert!(structured.body.contains("EXER WILL TAKE PLACE"));

    let legacy = store.get("A2/1234").await.unwrap().expect("text notice");
    assert_eq!(legacy.location, "KJFK");
    assert_eq!(legacy.body, "RWY 04L/22R CLSD");
    assert_eq!(legacy.raw_payload, LEGACY_A2_1234.as_bytes());

    for id in [xml, text, junk] {
        assert!(acked(&pool, id).await, "message {id} not acknowledged");
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.inserted, 2);
    assert_eq!(snapshot.unparseable, 1);
    assert_eq!(coordinator.state(), CoordinatorState::Disconnected);
}
