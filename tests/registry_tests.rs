//! Registration rules and idempotent routing through the in-memory event store.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{envelope, Behavior, Pipeline, RecordingHandler};
use courier_core::events::{
    Event, EventFilter, EventHandler, EventPayload, EventStore, HandlerResult, RegistryError,
};
use courier_core::messaging::ControlStatus;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OtherSchema {
    amount: i64,
}

impl EventPayload for OtherSchema {
    const EVENT_NAME: &'static str = "test";
}

struct OtherHandler;

#[async_trait]
impl EventHandler<OtherSchema> for OtherHandler {
    async fn handle(&self, _event: Event<OtherSchema>) -> HandlerResult {
        Ok(())
    }
}

#[test]
fn test_same_name_with_different_schema_is_rejected() {
    let pipeline = Pipeline::new();
    pipeline.register(&Arc::new(RecordingHandler::immediate()));

    let err = pipeline
        .registry
        .register::<OtherSchema, _>(Arc::new(OtherHandler))
        .unwrap_err();

    match err {
        RegistryError::DuplicateEvent {
            event_name,
            registered,
            attempted,
        } => {
            assert_eq!(event_name, "test");
            assert!(registered.ends_with("Task"));
            assert!(attempted.ends_with("OtherSchema"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_same_schema_handlers_all_receive_the_event() {
    let pipeline = Pipeline::new();
    let first = Arc::new(RecordingHandler::immediate());
    let second = Arc::new(RecordingHandler::immediate());
    pipeline.register(&first);
    pipeline.register(&second);

    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    assert_eq!(first.handled_ids(), vec!["1"]);
    assert_eq!(second.handled_ids(), vec!["1"]);
    assert_eq!(pipeline.registry.handlers_for("test").len(), 2);
}

#[tokio::test]
async fn test_duplicate_delivery_is_acknowledged_without_dispatch() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::immediate());
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    pipeline.publish(envelope("1", "1", false)).await;

    let mut stream = pipeline.listen().await;
    for _ in 0..2 {
        let event = pipeline.next_event(&mut stream).await;
        pipeline.registry.route(event).await.unwrap();
    }

    assert_eq!(handler.handled_ids(), vec!["1"]);
    let statuses: Vec<_> = pipeline
        .transport
        .settlements()
        .into_iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(
        statuses,
        vec![ControlStatus::Acknowledged, ControlStatus::Acknowledged]
    );

    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert!(record.is_processed());
}

#[tokio::test]
async fn test_failed_attempt_is_not_marked_processed() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::immediate().with_behavior(Behavior::Fail));
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;

    let event = pipeline.next_event(&mut stream).await;
    assert!(pipeline.registry.route(event).await.is_err());
    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert!(!record.is_processed());

    // Redelivery after the failure runs the handler again
    handler.set_behavior(Behavior::Succeed);
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    assert_eq!(handler.handled_ids(), vec!["1", "1"]);
    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert!(record.is_processed());

    let statuses: Vec<_> = pipeline
        .transport
        .settlements()
        .into_iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(
        statuses,
        vec![ControlStatus::Retried, ControlStatus::Acknowledged]
    );
}

#[tokio::test]
async fn test_route_task_dispatches_every_delivery() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::immediate());
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    for _ in 0..2 {
        let event = pipeline.next_event(&mut stream).await;
        pipeline.registry.route_task(event).await.unwrap();
    }

    assert_eq!(handler.handled_ids(), vec!["1", "1"]);
    assert!(pipeline.store.is_empty());
}

#[tokio::test]
async fn test_rollback_events_reach_rollback() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::immediate());
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", true)).await;
    let mut stream = pipeline.listen().await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    assert!(handler.handled_ids().is_empty());
    assert_eq!(handler.rolled_back(), vec!["1"]);

    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert_eq!(record.rollback, Some(true));
}

#[tokio::test]
async fn test_processed_records_can_be_queried_and_reset() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::immediate());
    pipeline.register(&handler);

    let mut stream = pipeline.listen().await;
    for id in ["1", "2"] {
        pipeline.publish(envelope(id, id, false)).await;
        let event = pipeline.next_event(&mut stream).await;
        pipeline.registry.route(event).await.unwrap();
    }

    pipeline.store.set_unprocessed("2").await.unwrap();

    let processed: Vec<_> = pipeline
        .store
        .get_multiple(EventFilter::default().processed(true))
        .try_collect()
        .await
        .unwrap();
    let unprocessed: Vec<_> = pipeline
        .store
        .get_multiple(EventFilter::default().processed(false).event_types(["test"]))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].id, "1");
    assert_eq!(unprocessed.len(), 1);
    assert_eq!(unprocessed[0].id, "2");

    // A reset event is dispatched again on redelivery
    pipeline.publish(envelope("2", "2", false)).await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();
    assert_eq!(handler.handled_ids(), vec!["1", "2", "2"]);
}
