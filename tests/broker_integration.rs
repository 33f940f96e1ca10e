//! Broker integration tests
//!
//! End-to-end flows through the public API with the system clock: topology
//! from TOML, routing across exchange kinds, consumption with acks and
//! dead-lettering.

use routemq::broker::api::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::thread;
use std::time::Duration;

const CONFIG: &str = r#"
[broker]
max_deliveries = 2
delivery_mode = "at_least_once"

[[exchanges]]
name = "orders"
kind = "topic"

[[exchanges]]
name = "audit"
kind = "fanout"

[[queues]]
name = "eu"
kind = "priority"
dead_letter = "eu.dlq"

[[queues]]
name = "eu.dlq"

[[queues]]
name = "trail"
max_length = 2

[[bindings]]
exchange = "orders"
queue = "eu"
pattern = "orders.eu.#"

[[bindings]]
exchange = "audit"
queue = "trail"
"#;

fn configured_broker() -> std::sync::Arc<BrokerManager> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = BrokerConfig::from_file(file.path()).unwrap();
    BrokerManager::from_config(&config).unwrap()
}

#[test]
fn test_order_flow_with_priorities_and_dead_letters() {
    let broker = configured_broker();
    for (id, priority) in [(1, 2), (2, 7), (3, 5)] {
        broker
            .publish(
                "orders",
                "orders.eu.created",
                format!("order-{}", id),
                PublishOptions::new().priority(priority),
            )
            .unwrap();
    }

    let consumer = broker.subscribe("eu", 10).unwrap();
    let batch = consumer.consume(10).unwrap();
    let bodies: Vec<&str> = batch.iter().filter_map(|m| m.body_str()).collect();
    assert_eq!(bodies, vec!["order-2", "order-3", "order-1"]);

    consumer.ack(batch[0].id).unwrap();
    consumer.ack(batch[1].id).unwrap();

    // order-1 keeps failing until it reaches the redelivery limit of 2
    consumer.reject(batch[2].id, true).unwrap();
    let retry = consumer.consume(10).unwrap();
    assert_eq!(retry.len(), 1);
    assert!(retry[0].is_redelivered());
    consumer.reject(retry[0].id, true).unwrap();

    let dead = broker.browse_queue("eu.dlq", 10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body_str(), Some("order-1"));
    assert_eq!(dead[0].death_reason(), Some("rejected"));
    assert_eq!(dead[0].original_queue(), Some("eu"));

    let stats = broker.stats().unwrap();
    assert_eq!(stats.queue("eu").unwrap().acked, 2);
    assert_eq!(stats.total_unacked(), 0);
    assert_eq!(stats.dead_letters.rejected, 1);
}

#[test]
fn test_real_clock_ttl_expiry() {
    let broker = configured_broker();
    broker
        .publish(
            "orders",
            "orders.eu.shipped",
            "short-lived",
            PublishOptions::new().ttl(Duration::from_millis(20)),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(60));
    let consumer = broker.subscribe("eu", 5).unwrap();
    assert!(consumer.consume(5).unwrap().is_empty());

    let entries = broker.dead_letter_entries_for("eu").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, DeadLetterReason::Expired);
    assert_eq!(entries[0].target_queue.as_deref(), Some("eu.dlq"));
}

#[test]
fn test_bounded_fanout_queue_without_dead_letter_target() {
    let broker = configured_broker();
    for n in 0..5 {
        broker
            .publish("audit", "anything", format!("event-{}", n), PublishOptions::new())
            .unwrap();
    }

    let kept: Vec<String> = broker
        .browse_queue("trail", 10)
        .unwrap()
        .iter()
        .filter_map(|m| m.body_str().map(str::to_string))
        .collect();
    assert_eq!(kept, vec!["event-3", "event-4"]);

    let stats = broker.dead_letter_stats().unwrap();
    assert_eq!(stats.overflow, 3);
    assert_eq!(stats.dropped, 3);
}

#[test]
fn test_headers_exchange_declared_at_runtime() {
    let broker = configured_broker();
    broker
        .declare_exchange("documents", ExchangeKind::Headers)
        .unwrap();
    broker
        .declare_queue("pdf", QueueOptions::new(QueueKind::Standard))
        .unwrap();
    let mut arguments = BTreeMap::new();
    arguments.insert("format".to_string(), "pdf".to_string());
    broker.bind("documents", "pdf", "", arguments).unwrap();

    let result = broker
        .publish(
            "documents",
            "",
            b"%PDF".to_vec(),
            PublishOptions::new().header("format", "pdf"),
        )
        .unwrap();
    assert_eq!(result.copies, vec![("pdf".to_string(), result.message_id)]);

    let err = broker
        .publish(
            "documents",
            "",
            "x",
            PublishOptions::new().header("format", "png"),
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unroutable { .. }));
}

#[test]
fn test_exactly_once_publisher_retry() {
    let broker = configured_broker();
    let publisher = broker
        .create_publisher("checkout", DeliveryMode::ExactlyOnce)
        .unwrap();

    let options = || PublishOptions::new().sequence(1);
    let first = publisher
        .publish("orders", "orders.eu.created", "o", options())
        .unwrap();
    let retry = publisher
        .publish("orders", "orders.eu.created", "o", options())
        .unwrap();

    assert_eq!(first.status, PublishStatus::Routed);
    assert_eq!(retry.status, PublishStatus::Duplicate);
    assert_eq!(retry.message_id, first.message_id);
    assert_eq!(broker.queue_stats("eu").unwrap().depth, 1);
}

#[tokio::test]
async fn test_consume_wait_across_tasks() {
    let broker = configured_broker();
    let consumer = broker.subscribe("eu", 5).unwrap();

    let producer = std::sync::Arc::clone(&broker);
    let publish = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        producer
            .publish("orders", "orders.eu.paid", "late", PublishOptions::new())
            .unwrap();
    });

    let batch = consumer
        .consume_wait(5, routemq::core::poll::PollPolicy::with_timeout(Duration::from_secs(2)))
        .await
        .unwrap();
    publish.await.unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body_str(), Some("late"));
}
