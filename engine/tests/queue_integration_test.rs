//! Integration tests for the task queue contract, against the in-memory broker

use std::time::Duration;

use ccube_engine::queue::{
    consume_json, publish_json, MemoryBroker, QueueError, QueueNames, TaskQueue,
};
use ccube_sdk::errors::{Phase, WorkerErrorExt};
use ccube_sdk::messages::LearnerOutput;

const QUEUE: &str = "gpfunction@learner.outputs";

async fn broker_with(messages: &[&str]) -> MemoryBroker {
    let broker = MemoryBroker::new();
    let producer = broker.connect();
    producer.create_queue(QUEUE).await.unwrap();
    producer
        .publish_messages(
            QUEUE,
            messages.iter().map(|m| m.as_bytes().to_vec()).collect(),
        )
        .await
        .unwrap();
    producer.close().await.unwrap();
    broker
}

#[tokio::test]
async fn test_acknowledged_message_is_not_redelivered() {
    let broker = broker_with(&["first", "second"]).await;

    let consumer = broker.connect();
    let (messages, tokens) = consumer.consume_messages(QUEUE, 1).await.unwrap();
    assert_eq!(messages, vec![b"first".to_vec()]);
    consumer.acknowledge_messages(QUEUE, &tokens).await.unwrap();
    consumer.close().await.unwrap();

    let next = broker.connect();
    let (messages, _) = next.consume_messages(QUEUE, 1).await.unwrap();
    assert_eq!(messages, vec![b"second".to_vec()]);
    assert_eq!(broker.ready_count(QUEUE), 0);
}

#[tokio::test]
async fn test_unacknowledged_messages_return_in_order() {
    let broker = broker_with(&["a", "b", "c"]).await;

    let consumer = broker.connect();
    let (messages, _) = consumer.consume_messages(QUEUE, 2).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(consumer.unacked_count(), 2);
    assert_eq!(broker.ready_count(QUEUE), 1);
    drop(consumer);

    let reconnected = broker.connect();
    let (messages, tokens) = reconnected.consume_messages(QUEUE, 3).await.unwrap();
    assert_eq!(
        messages,
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    reconnected.acknowledge_messages(QUEUE, &tokens).await.unwrap();
    assert_eq!(reconnected.unacked_count(), 0);
}

#[tokio::test]
async fn test_consume_waits_for_enough_messages() {
    let broker = broker_with(&["one"]).await;
    let consumer = broker.connect();

    let waiting = tokio::spawn(async move {
        let (messages, _) = consumer.consume_messages(QUEUE, 2).await.unwrap();
        messages.len()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    let producer = broker.connect();
    producer
        .publish_messages(QUEUE, vec![b"two".to_vec()])
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, 2);
}

#[tokio::test]
async fn test_queue_lifecycle_is_idempotent() {
    let broker = broker_with(&["kept"]).await;
    let connection = broker.connect();

    connection.create_queue(QUEUE).await.unwrap();
    assert_eq!(broker.ready_count(QUEUE), 1);

    connection.delete_queue(QUEUE).await.unwrap();
    connection.delete_queue(QUEUE).await.unwrap();
    assert!(!broker.queue_exists(QUEUE));

    let result = connection.publish_messages(QUEUE, vec![b"x".to_vec()]).await;
    assert!(matches!(result, Err(QueueError::UnknownQueue(_))));
}

#[tokio::test]
async fn test_closed_connection_rejects_operations() {
    let broker = broker_with(&[]).await;
    let connection = broker.connect();
    connection.close().await.unwrap();

    let result = connection.consume_messages(QUEUE, 1).await;
    assert!(matches!(result, Err(QueueError::Closed)));
}

#[tokio::test]
async fn test_typed_helpers_reject_malformed_payloads() {
    let broker = broker_with(&[r#"{"success": "maybe"}"#]).await;
    let consumer = broker.connect();

    let error = consume_json::<_, LearnerOutput>(&consumer, QUEUE, 1)
        .await
        .unwrap_err();
    assert_eq!(error.phase(), Phase::Task);
    assert_eq!(consumer.unacked_count(), 1);

    let names = QueueNames::for_job("gpfunction");
    assert_eq!(names.learner_outputs, QUEUE);
    consumer.create_queue(&names.filter_outputs).await.unwrap();
    publish_json(&consumer, &names.filter_outputs, &[LearnerOutput::failed()])
        .await
        .unwrap();
    assert_eq!(broker.ready_count(&names.filter_outputs), 1);
}
