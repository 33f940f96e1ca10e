//! Command-line arguments
//!
//! Global flags control configuration discovery, logging and colour. Each
//! subcommand drives one broker workflow against the configured topology.

use crate::broker::DeliveryMode;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "routemq")]
#[command(about = "In-process message broker with exchange routing and dead-lettering")]
#[command(version = crate::core::version::package_version())]
#[command(long_version = crate::core::version::long_version())]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Log level (overrides -v/-q and the config file)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true,
          value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", global = true,
          value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(short = 'f', long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<String>,

    /// Force coloured output
    #[arg(long = "color", global = true, conflicts_with = "no_color")]
    pub color: bool,

    /// Disable coloured output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// More log output (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Less log output (repeatable)
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the exchanges, queues and bindings declared by the configuration
    Topology,

    /// Publish messages into the configured topology
    Publish(PublishArgs),

    /// Print broker statistics for the configured topology
    Stats {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PublishArgs {
    /// Exchange to publish to
    #[arg(short = 'e', long, value_name = "EXCHANGE")]
    pub exchange: String,

    /// Routing key
    #[arg(short = 'k', long = "key", value_name = "KEY", default_value = "")]
    pub routing_key: String,

    /// Message body
    #[arg(short = 'b', long, value_name = "TEXT", default_value = "")]
    pub body: String,

    /// Message priority (0-9)
    #[arg(short = 'p', long, value_name = "N", default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i64,

    /// Time to live in milliseconds
    #[arg(long = "ttl-ms", value_name = "MS", allow_negative_numbers = true)]
    pub ttl_ms: Option<i64>,

    /// Delivery delay in milliseconds (delay queues only)
    #[arg(long = "delay-ms", value_name = "MS", allow_negative_numbers = true)]
    pub delay_ms: Option<i64>,

    /// Message header as KEY=VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_name = "KEY=VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Number of copies to publish
    #[arg(short = 'n', long, value_name = "COUNT", default_value_t = 1)]
    pub count: u32,

    /// Delivery mode (default: the configured broker mode)
    #[arg(short = 'm', long, value_name = "MODE")]
    pub mode: Option<DeliveryMode>,

    /// Producer id used for exactly-once de-duplication
    #[arg(long, value_name = "ID", default_value = "cli")]
    pub producer: String,

    /// First producer sequence number; later copies count up from it
    #[arg(long = "sequence", value_name = "N")]
    pub sequence: Option<u64>,

    /// After publishing, consume and acknowledge everything in this queue
    #[arg(short = 'd', long, value_name = "QUEUE")]
    pub drain: Option<String>,

    /// How long to wait for messages while draining, in milliseconds
    #[arg(long = "wait-ms", value_name = "MS", default_value_t = 250)]
    pub wait_ms: u64,
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), val.to_string()))
        }
        _ => Err(format!("header '{}' is not KEY=VALUE", value)),
    }
}

impl Args {
    /// Resolve colour: explicit flags win, then the config file, then TTY detection
    pub fn use_color(&self, configured: Option<bool>) -> bool {
        use std::io::IsTerminal;

        if self.no_color {
            return false;
        }
        if self.color {
            return true;
        }
        configured.unwrap_or_else(|| std::io::stdout().is_terminal())
    }

    /// Net `-v`/`-q` count, clamped to the `i8` range
    pub fn verbosity(&self) -> i8 {
        (i16::from(self.verbose) - i16::from(self.quiet)).clamp(-128, 127) as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("routemq").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_publish_arguments() {
        let args = parse(&[
            "publish", "-e", "orders", "-k", "orders.eu.created", "-b", "{}", "-p", "5",
            "--ttl-ms", "1000", "-H", "tenant=acme", "-H", "x=a=b", "-n", "3",
            "--mode", "exactly_once", "--sequence", "10",
        ]);

        let Command::Publish(publish) = args.command else {
            panic!("expected publish");
        };
        assert_eq!(publish.exchange, "orders");
        assert_eq!(publish.routing_key, "orders.eu.created");
        assert_eq!(publish.priority, 5);
        assert_eq!(publish.ttl_ms, Some(1000));
        assert_eq!(
            publish.headers,
            vec![
                ("tenant".to_string(), "acme".to_string()),
                ("x".to_string(), "a=b".to_string())
            ]
        );
        assert_eq!(publish.count, 3);
        assert_eq!(publish.mode, Some(DeliveryMode::ExactlyOnce));
        assert_eq!(publish.sequence, Some(10));
        assert_eq!(publish.wait_ms, 250);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["stats", "--json", "-vv", "--log-format", "json", "--no-color"]);
        assert!(matches!(args.command, Command::Stats { json: true }));
        assert_eq!(args.verbosity(), 2);
        assert_eq!(args.log_format.as_deref(), Some("json"));
        assert!(!args.use_color(Some(true)));
    }

    #[test]
    fn test_color_precedence() {
        let args = parse(&["--color", "topology"]);
        assert!(args.use_color(Some(false)));

        let args = parse(&["topology"]);
        assert!(args.use_color(Some(true)));
        assert!(!args.use_color(Some(false)));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            vec!["publish", "-e", "x", "-H", "novalue"],
            vec!["publish", "-e", "x", "--mode", "twice"],
            vec!["--log-level", "loud", "topology"],
            vec!["--color", "--no-color", "topology"],
            vec!["publish"],
        ];
        for args in bad {
            assert!(
                Args::try_parse_from(std::iter::once("routemq").chain(args.iter().copied()))
                    .is_err(),
                "accepted {:?}",
                args
            );
        }
    }

    #[test]
    fn test_negative_priority_reaches_validation() {
        let args = parse(&["publish", "-e", "x", "-p", "-1"]);
        let Command::Publish(publish) = args.command else {
            panic!("expected publish");
        };
        assert_eq!(publish.priority, -1);
    }
}
