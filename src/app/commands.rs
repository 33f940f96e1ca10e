//! Subcommand execution
//!
//! Every command builds a fresh broker from the loaded configuration, runs
//! against it and returns the text to print.

use crate::app::cli::args::{Command, PublishArgs};
use crate::app::cli::display;
use crate::broker::{BrokerConfig, BrokerError, BrokerManager, BrokerResult, PublishOptions};
use crate::core::poll::PollPolicy;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(command: &Command, config: &BrokerConfig, use_color: bool) -> BrokerResult<String> {
    let broker = BrokerManager::from_config(config)?;
    match command {
        Command::Topology => Ok(display::topology(
            &broker.stats()?,
            &broker.bindings()?,
            use_color,
        )),
        Command::Stats { json: true } => broker.stats()?.to_json().map_err(|e| {
            BrokerError::internal(format!("cannot serialize statistics: {}", e))
        }),
        Command::Stats { json: false } => Ok(display::stats(&broker.stats()?, use_color)),
        Command::Publish(args) => publish(&broker, args, use_color).await,
    }
}

fn options_for(args: &PublishArgs, copy: u32) -> BrokerResult<PublishOptions> {
    let mut options = PublishOptions::from_millis(args.priority, args.ttl_ms, args.delay_ms)
        .map_err(BrokerError::validation)?;
    for (key, value) in &args.headers {
        options = options.header(key, value);
    }
    if let Some(first) = args.sequence {
        let sequence = first.checked_add(u64::from(copy)).ok_or_else(|| {
            BrokerError::validation(format!(
                "sequence {} with {} copies runs past {}",
                first,
                args.count,
                u64::MAX
            ))
        })?;
        options = options.sequence(sequence);
    }
    Ok(options)
}

async fn publish(broker: &Arc<BrokerManager>, args: &PublishArgs, use_color: bool) -> BrokerResult<String> {
    let mode = args.mode.unwrap_or(broker.settings().delivery_mode);
    let publisher = broker.create_publisher(&args.producer, mode)?;

    let mut output = Vec::new();
    for copy in 0..args.count {
        let result = publisher.publish(
            &args.exchange,
            &args.routing_key,
            args.body.as_bytes(),
            options_for(args, copy)?,
        )?;
        output.push(display::publish_result(&result, use_color));
    }

    if let Some(queue) = &args.drain {
        let drained = drain(broker, queue, Duration::from_millis(args.wait_ms)).await?;
        output.push(format!("drained {} messages from '{}'", drained, queue));
    }

    output.push(String::new());
    output.push(display::stats(&broker.stats()?, use_color));
    Ok(output.join("\n"))
}

/// Consume and acknowledge until `queue` stays empty for `wait`
async fn drain(broker: &Arc<BrokerManager>, queue: &str, wait: Duration) -> BrokerResult<usize> {
    let consumer = broker.subscribe(queue, broker.settings().default_prefetch)?;
    let mut drained = 0;
    loop {
        let batch = consumer
            .consume_wait(broker.settings().default_prefetch, PollPolicy::with_timeout(wait))
            .await?;
        if batch.is_empty() {
            break;
        }
        for message in batch {
            log::debug!(
                "Drained message {} from '{}': {}",
                message.id,
                queue,
                message.body_str().unwrap_or("<binary>")
            );
            consumer.ack(message.id)?;
            drained += 1;
        }
    }
    consumer.cancel()?;
    Ok(drained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cli::args::Args;
    use clap::Parser;

    const TOPOLOGY: &str = r#"
[[exchanges]]
name = "orders"
kind = "topic"

[[queues]]
name = "eu"

[[bindings]]
exchange = "orders"
queue = "eu"
pattern = "orders.eu.#"
"#;

    fn command(args: &[&str]) -> Command {
        Args::try_parse_from(std::iter::once("routemq").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[tokio::test]
    async fn test_publish_and_drain() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        let output = run(
            &command(&[
                "publish", "-e", "orders", "-k", "orders.eu.created", "-b", "hi", "-n", "3",
                "--drain", "eu", "--wait-ms", "20",
            ]),
            &config,
            false,
        )
        .await
        .unwrap();

        assert_eq!(output.matches("routed [eu#").count(), 3);
        assert!(output.contains("drained 3 messages from 'eu'"));
    }

    #[tokio::test]
    async fn test_publish_exactly_once_copies_use_consecutive_sequences() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        let output = run(
            &command(&[
                "publish", "-e", "orders", "-k", "orders.eu.created", "-n", "2",
                "--mode", "exactly_once", "--sequence", "5",
            ]),
            &config,
            false,
        )
        .await
        .unwrap();

        assert_eq!(output.matches("routed [eu#").count(), 2);
        assert!(!output.contains("duplicate"));
    }

    #[tokio::test]
    async fn test_publish_validation_errors() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        for args in [
            vec!["publish", "-e", "orders", "-k", "orders.eu.x", "-p", "12"],
            vec!["publish", "-e", "orders", "-k", "orders.eu.x", "--ttl-ms", "-5"],
            vec!["publish", "-e", "orders", "-k", "orders.eu.x", "--mode", "exactly_once"],
        ] {
            let err = run(&command(&args), &config, false).await.unwrap_err();
            assert!(matches!(err, BrokerError::Validation { .. }), "{:?}", args);
        }
    }

    #[tokio::test]
    async fn test_sequence_overflow_is_a_validation_error() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        let last = u64::MAX.to_string();
        let err = run(
            &command(&[
                "publish", "-e", "orders", "-k", "orders.eu.created", "-n", "2",
                "--mode", "exactly_once", "--sequence", last.as_str(),
            ]),
            &config,
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BrokerError::Validation { .. }));
        assert!(err.to_string().contains("runs past"));
    }

    #[tokio::test]
    async fn test_unroutable_publish_fails() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        let err = run(
            &command(&["publish", "-e", "orders", "-k", "orders.us.created"]),
            &config,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::Unroutable { .. }));
    }

    #[tokio::test]
    async fn test_stats_json() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        let output = run(&command(&["stats", "--json"]), &config, false)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["queues"][0]["name"], "eu");
    }

    #[tokio::test]
    async fn test_topology() {
        let config = BrokerConfig::from_toml_str(TOPOLOGY).unwrap();
        let output = run(&command(&["topology"]), &config, false).await.unwrap();
        assert!(output.contains("orders.eu.#"));
    }
}
