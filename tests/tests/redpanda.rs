//! Tests for the Redpanda broker and consumer.
//!
//! Requires Docker to be running for testcontainers.

use broker::{Broker, Delivery, QueueConsumer, QueueNames, QueuePublisher, RedpandaBroker};
use integration_tests::containers::{unique_name, RedpandaContainer};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn queues() -> QueueNames {
    QueueNames {
        uploader: unique_name("uploader"),
        raw_data: unique_name("raw_data"),
        ..QueueNames::default()
    }
}

/// Polls until a delivery arrives.
async fn next(consumer: &Arc<dyn QueueConsumer>) -> Delivery {
    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline {
        if let Some(delivery) = consumer.receive().await.unwrap() {
            return delivery;
        }
    }
    panic!("no delivery on {} within 20s", consumer.queue());
}

async fn publish_all(broker: &RedpandaBroker, queue: &str, payloads: &[&str]) {
    for payload in payloads {
        broker
            .publish(queue, payload.as_bytes().to_vec())
            .await
            .unwrap();
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_requeue_redelivers_then_ack_moves_on() {
    let redpanda = RedpandaContainer::start().await;
    let queues = queues();
    let broker = RedpandaBroker::new(redpanda.broker_config(1), queues.clone());
    publish_all(&broker, &queues.uploader, &["first", "second"]).await;

    let consumer = broker.consumer(&queues.uploader).await.unwrap();

    let first = next(&consumer).await;
    assert_eq!(first.payload, b"first");
    assert_eq!(first.attempt, 1);
    consumer.requeue(&first).await.unwrap();

    let again = next(&consumer).await;
    assert_eq!(again.delivery_tag, first.delivery_tag);
    assert_eq!(again.attempt, 2);
    assert!(again.is_redelivery());
    consumer.ack(&again).await.unwrap();

    let second = next(&consumer).await;
    assert_eq!(second.payload, b"second");
    assert_eq!(second.attempt, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unsettled_delivery_blocks_receive() {
    let redpanda = RedpandaContainer::start().await;
    let queues = queues();
    let broker = RedpandaBroker::new(redpanda.broker_config(1), queues.clone());
    publish_all(&broker, &queues.uploader, &["only"]).await;

    let consumer = broker.consumer(&queues.uploader).await.unwrap();
    let delivery = next(&consumer).await;

    assert!(consumer.receive().await.is_err());
    consumer.ack(&delivery).await.unwrap();
    assert!(consumer.ack(&delivery).await.is_err());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dead_letter_parks_record_and_moves_on() {
    let redpanda = RedpandaContainer::start().await;
    let queues = queues();
    let broker = RedpandaBroker::new(redpanda.broker_config(1), queues.clone());
    publish_all(&broker, &queues.raw_data, &["poison", "healthy"]).await;

    let consumer = broker.consumer(&queues.raw_data).await.unwrap();
    let poison = next(&consumer).await;
    consumer
        .dead_letter(&poison, "PROCESSING_001: corrupt raster")
        .await
        .unwrap();

    let healthy = next(&consumer).await;
    assert_eq!(healthy.payload, b"healthy");
    consumer.ack(&healthy).await.unwrap();

    let dead_letters = broker
        .consumer(&queues.dead_letter(&queues.raw_data))
        .await
        .unwrap();
    let parked = next(&dead_letters).await;
    assert_eq!(parked.payload, b"poison");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_restarted_consumer_resumes_from_committed_position() {
    let redpanda = RedpandaContainer::start().await;
    let queues = queues();
    let config = redpanda.broker_config(1);

    {
        let broker = RedpandaBroker::new(config.clone(), queues.clone());
        publish_all(&broker, &queues.uploader, &["done", "retried", "fresh"]).await;

        let consumer = broker.consumer(&queues.uploader).await.unwrap();
        let done = next(&consumer).await;
        consumer.ack(&done).await.unwrap();

        let retried = next(&consumer).await;
        assert_eq!(retried.payload, b"retried");
        consumer.requeue(&retried).await.unwrap();
    }

    // A new broker shares nothing in memory with the first one.
    let broker = RedpandaBroker::new(config, queues.clone());
    let consumer = broker.consumer(&queues.uploader).await.unwrap();

    let resumed = next(&consumer).await;
    assert_eq!(resumed.payload, b"retried");
    assert_eq!(resumed.attempt, 2);
    consumer.ack(&resumed).await.unwrap();

    assert_eq!(next(&consumer).await.payload, b"fresh");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_consumers_own_disjoint_partitions() {
    let redpanda = RedpandaContainer::start().await;
    let queues = queues();
    let broker = RedpandaBroker::new(redpanda.broker_config(2), queues.clone());
    broker.declare(&queues.uploader).await.unwrap();

    let a = broker.consumer(&queues.uploader).await.unwrap();
    let b = broker.consumer(&queues.uploader).await.unwrap();
    let third = broker.consumer(&queues.uploader).await;
    match third {
        Err(e) => assert_eq!(e.error_code(), "INTERNAL_001"),
        Ok(_) => panic!("a third consumer of a two-partition queue was accepted"),
    }

    let sent = ["m0", "m1", "m2", "m3"];
    publish_all(&broker, &queues.uploader, &sent).await;

    let mut seen_a = BTreeSet::new();
    let mut seen_b = BTreeSet::new();
    for _ in 0..2 {
        let delivery = next(&a).await;
        a.ack(&delivery).await.unwrap();
        seen_a.insert(String::from_utf8(delivery.payload).unwrap());

        let delivery = next(&b).await;
        b.ack(&delivery).await.unwrap();
        seen_b.insert(String::from_utf8(delivery.payload).unwrap());
    }

    assert!(seen_a.is_disjoint(&seen_b));
    let all: BTreeSet<String> = seen_a.union(&seen_b).cloned().collect();
    let expected: BTreeSet<String> = sent.iter().map(|s| s.to_string()).collect();
    assert_eq!(all, expected);
}
