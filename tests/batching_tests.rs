//! Batch engine behavior through the registry and the in-memory transport, on a
//! paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{envelope, Behavior, Pipeline, RecordingHandler, QUEUE};
use courier_core::events::EventStore;
use courier_core::messaging::{delay_queue_name, ControlStatus};

fn statuses(pipeline: &Pipeline) -> Vec<ControlStatus> {
    pipeline
        .transport
        .settlements()
        .into_iter()
        .map(|s| s.status)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_window_collects_events_in_order_and_acknowledges() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::batching("key"));
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    pipeline.publish(envelope("2", "2", true)).await;

    let mut stream = pipeline.listen().await;
    for _ in 0..2 {
        let event = pipeline.next_event(&mut stream).await;
        pipeline.registry.route(event).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handler.batches().is_empty());
    assert!(statuses(&pipeline).is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.batches(), vec![vec!["1".to_string(), "2".to_string()]]);

    let handled = handler.handled();
    assert!(!handled[0].rollback);
    assert!(handled[1].rollback);
    assert_eq!(
        statuses(&pipeline),
        vec![ControlStatus::Acknowledged, ControlStatus::Acknowledged]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_retries_every_event() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::batching("key").with_behavior(Behavior::Fail));
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    pipeline.publish(envelope("2", "2", true)).await;

    let mut stream = pipeline.listen().await;
    for _ in 0..2 {
        let event = pipeline.next_event(&mut stream).await;
        pipeline.registry.route(event).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        statuses(&pipeline),
        vec![ControlStatus::Retried, ControlStatus::Retried]
    );
    assert_eq!(pipeline.transport.queue_depth(&delay_queue_name(QUEUE)), 2);

    // Retried copies come back after the default retry delay
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pipeline.transport.queue_depth(&delay_queue_name(QUEUE)), 0);
    assert_eq!(pipeline.transport.queue_depth(QUEUE), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_later_batch_delays_every_event() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(
        RecordingHandler::batching("key")
            .with_behavior(Behavior::RetryLater(Duration::from_secs(30))),
    );
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        statuses(&pipeline),
        vec![ControlStatus::Delayed(Duration::from_secs(30))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_events_added_during_flush_form_the_next_batch() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(
        RecordingHandler::batching("key").with_latency(Duration::from_millis(50)),
    );
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    let first = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(first).await.unwrap();

    // The first flush starts at 100ms and runs until 150ms
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(handler.batches().len(), 1);

    pipeline.publish(envelope("2", "2", false)).await;
    let second = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(second).await.unwrap();

    // Next flush is due one window after the previous flush started
    tokio::time::sleep(Duration::from_millis(70)).await;
    assert_eq!(handler.batches().len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        handler.batches(),
        vec![vec!["1".to_string()], vec!["2".to_string()]]
    );
    assert_eq!(
        statuses(&pipeline),
        vec![ControlStatus::Acknowledged, ControlStatus::Acknowledged]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_batches_are_pruned_and_recreated() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::batching("key"));
    pipeline.register(&handler);

    let mut stream = pipeline.listen().await;
    pipeline.publish(envelope("1", "1", false)).await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();
    assert_eq!(pipeline.batches.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pipeline.batches.sweep(), 1);
    assert!(pipeline.batches.is_empty());

    pipeline.publish(envelope("2", "2", false)).await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();
    assert_eq!(pipeline.batches.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        handler.batches(),
        vec![vec!["1".to_string()], vec!["2".to_string()]]
    );
}

#[tokio::test(start_paused = true)]
async fn test_handlers_get_separate_batches_for_the_same_key() {
    let pipeline = Pipeline::new();
    let first = Arc::new(RecordingHandler::batching("shared"));
    let second = Arc::new(RecordingHandler::batching("shared"));
    pipeline.register(&first);
    pipeline.register(&second);

    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    assert_eq!(pipeline.batches.len(), 2);
    pipeline.batches.shutdown().await;

    assert_eq!(first.batches(), vec![vec!["1".to_string()]]);
    assert_eq!(second.batches(), vec![vec!["1".to_string()]]);
    // Both batches settle the same delivery; only the first settlement counts
    assert_eq!(statuses(&pipeline), vec![ControlStatus::Acknowledged]);
}

#[tokio::test(start_paused = true)]
async fn test_retried_batch_events_are_handled_on_redelivery() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(RecordingHandler::batching("key").with_behavior(Behavior::Fail));
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(statuses(&pipeline), vec![ControlStatus::Retried]);
    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert!(!record.is_processed());

    handler.set_behavior(Behavior::Succeed);
    let redelivered = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(redelivered).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        handler.batches(),
        vec![vec!["1".to_string()], vec!["1".to_string()]]
    );
    assert_eq!(
        statuses(&pipeline),
        vec![ControlStatus::Retried, ControlStatus::Acknowledged]
    );
    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert!(record.is_processed());
}

#[tokio::test(start_paused = true)]
async fn test_retry_later_batch_reopens_records() {
    let pipeline = Pipeline::new();
    let handler = Arc::new(
        RecordingHandler::batching("key")
            .with_behavior(Behavior::RetryLater(Duration::from_secs(2))),
    );
    pipeline.register(&handler);

    pipeline.publish(envelope("1", "1", false)).await;
    let mut stream = pipeline.listen().await;
    let event = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(event).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let record = pipeline.store.get_by_id("1").await.unwrap().unwrap();
    assert!(!record.is_processed());

    handler.set_behavior(Behavior::Succeed);
    let redelivered = pipeline.next_event(&mut stream).await;
    pipeline.registry.route(redelivered).await.unwrap();
    pipeline.batches.wait_idle().await;
    assert_eq!(handler.batches().len(), 2);
}
