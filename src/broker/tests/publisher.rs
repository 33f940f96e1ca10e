//! Tests for publishing and delivery modes

#[cfg(test)]
mod tests {
    use crate::broker::api::*;
    use crate::broker::tests::{broker, broker_with, no_args, standard};

    fn orders(broker: &BrokerManager) {
        broker
            .declare_exchange("orders", ExchangeKind::Topic)
            .unwrap();
        broker.declare_queue("eu", standard()).unwrap();
        broker.bind("orders", "eu", "orders.eu.#", no_args()).unwrap();
    }

    #[test]
    fn test_priority_out_of_range_stores_nothing() {
        let (broker, _) = broker();
        orders(&broker);
        let err = broker
            .publish(
                "orders",
                "orders.eu.created",
                "x",
                PublishOptions::new().priority(10),
            )
            .unwrap_err();

        assert!(matches!(err, BrokerError::Validation { .. }));
        assert_eq!(broker.queue_stats("eu").unwrap().depth, 0);
    }

    #[test]
    fn test_publish_to_unknown_exchange() {
        let (broker, _) = broker();
        let err = broker
            .publish("missing", "a", "x", PublishOptions::new())
            .unwrap_err();
        assert!(matches!(err, BrokerError::ExchangeNotFound { .. }));
    }

    #[test]
    fn test_unroutable_depends_on_delivery_mode() {
        let (broker, _) = broker();
        orders(&broker);

        let at_most_once = broker
            .create_publisher("metrics", DeliveryMode::AtMostOnce)
            .unwrap();
        let result = at_most_once
            .publish("orders", "orders.us.created", "x", PublishOptions::new())
            .unwrap();
        assert_eq!(result.status, PublishStatus::Unroutable);
        assert_eq!(result.routed_count, 0);
        assert!(!result.is_routed());

        let at_least_once = broker
            .create_publisher("billing", DeliveryMode::AtLeastOnce)
            .unwrap();
        let err = at_least_once
            .publish("orders", "orders.us.created", "x", PublishOptions::new())
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unroutable { .. }));

        assert_eq!(broker.stats().unwrap().messages_published, 0);
    }

    #[test]
    fn test_broker_publish_uses_configured_mode() {
        let (broker, _) = broker_with(BrokerSettings {
            delivery_mode: DeliveryMode::AtMostOnce,
            ..BrokerSettings::default()
        });
        orders(&broker);

        let result = broker
            .publish("orders", "orders.us.created", "x", PublishOptions::new())
            .unwrap();
        assert_eq!(result.status, PublishStatus::Unroutable);
    }

    #[test]
    fn test_exactly_once_deduplicates_by_sequence() {
        let (broker, _) = broker();
        orders(&broker);
        let publisher = broker
            .create_publisher("checkout", DeliveryMode::ExactlyOnce)
            .unwrap();

        let first = publisher
            .publish(
                "orders",
                "orders.eu.created",
                "order-1",
                PublishOptions::new().sequence(1),
            )
            .unwrap();
        let repeat = publisher
            .publish(
                "orders",
                "orders.eu.created",
                "order-1",
                PublishOptions::new().sequence(1),
            )
            .unwrap();
        let second = publisher
            .publish(
                "orders",
                "orders.eu.created",
                "order-2",
                PublishOptions::new().sequence(2),
            )
            .unwrap();

        assert_eq!(first.status, PublishStatus::Routed);
        assert_eq!(repeat.status, PublishStatus::Duplicate);
        assert_eq!(repeat.message_id, first.message_id);
        assert_eq!(second.status, PublishStatus::Routed);
        assert_eq!(broker.queue_stats("eu").unwrap().depth, 2);

        let stats = publisher.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.routed, 2);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_exactly_once_requires_sequence() {
        let (broker, _) = broker();
        orders(&broker);
        let publisher = broker
            .create_publisher("checkout", DeliveryMode::ExactlyOnce)
            .unwrap();

        let err = publisher
            .publish("orders", "orders.eu.created", "x", PublishOptions::new())
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation { .. }));
        assert_eq!(publisher.stats().failed, 1);
    }

    #[test]
    fn test_sequences_are_per_producer() {
        let (broker, _) = broker();
        orders(&broker);
        let left = broker
            .create_publisher("left", DeliveryMode::ExactlyOnce)
            .unwrap();
        let right = broker
            .create_publisher("right", DeliveryMode::ExactlyOnce)
            .unwrap();

        for publisher in [&left, &right] {
            let result = publisher
                .publish(
                    "orders",
                    "orders.eu.created",
                    "x",
                    PublishOptions::new().sequence(7),
                )
                .unwrap();
            assert_eq!(result.status, PublishStatus::Routed);
        }
        assert_eq!(broker.queue_stats("eu").unwrap().depth, 2);
    }

    #[test]
    fn test_same_producer_id_shares_window() {
        let (broker, _) = broker();
        orders(&broker);
        let first = broker
            .create_publisher("checkout", DeliveryMode::ExactlyOnce)
            .unwrap();
        let restarted = broker
            .create_publisher("checkout", DeliveryMode::ExactlyOnce)
            .unwrap();

        first
            .publish(
                "orders",
                "orders.eu.created",
                "x",
                PublishOptions::new().sequence(1),
            )
            .unwrap();
        let retry = restarted
            .publish(
                "orders",
                "orders.eu.created",
                "x",
                PublishOptions::new().sequence(1),
            )
            .unwrap();

        assert_eq!(retry.status, PublishStatus::Duplicate);
        assert_eq!(broker.queue_stats("eu").unwrap().depth, 1);
    }

    #[test]
    fn test_failed_exactly_once_publish_can_be_retried() {
        let (broker, _) = broker();
        orders(&broker);
        let publisher = broker
            .create_publisher("checkout", DeliveryMode::ExactlyOnce)
            .unwrap();

        let err = publisher
            .publish(
                "orders",
                "orders.us.created",
                "x",
                PublishOptions::new().sequence(1),
            )
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unroutable { .. }));

        let retry = publisher
            .publish(
                "orders",
                "orders.eu.created",
                "x",
                PublishOptions::new().sequence(1),
            )
            .unwrap();
        assert_eq!(retry.status, PublishStatus::Routed);
        assert_eq!(publisher.stats().unroutable, 1);
    }

    #[test]
    fn test_empty_producer_id_is_rejected() {
        let (broker, _) = broker();
        let err = broker
            .create_publisher("  ", DeliveryMode::AtLeastOnce)
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation { .. }));
    }

    #[test]
    fn test_publisher_outlived_broker() {
        let (broker, clock) = broker();
        let publisher = broker
            .create_publisher("orphan", DeliveryMode::AtLeastOnce)
            .unwrap();
        drop(broker);
        drop(clock);

        let err = publisher
            .publish("orders", "a", "x", PublishOptions::new())
            .unwrap_err();
        assert!(matches!(err, BrokerError::Internal { .. }));
        assert_eq!(publisher.producer_id(), "orphan");
    }

    #[test]
    fn test_message_ids_are_unique_and_increasing() {
        let (broker, _) = broker();
        orders(&broker);
        let ids: Vec<MessageId> = (0..5)
            .map(|_| {
                broker
                    .publish("orders", "orders.eu.created", "x", PublishOptions::new())
                    .unwrap()
                    .message_id
            })
            .collect();

        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
