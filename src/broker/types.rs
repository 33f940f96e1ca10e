//! Broker-wide statistics snapshot

use crate::broker::consumer::ConsumerStats;
use crate::broker::dead_letter::DeadLetterStats;
use crate::broker::exchange::ExchangeStats;
use crate::broker::store::QueueStats;
use serde::Serialize;
use std::time::SystemTime;

/// Everything the broker can report, captured at one moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// RFC 3339 capture time
    pub captured_at: String,
    pub messages_published: u64,
    pub queues: Vec<QueueStats>,
    pub exchanges: Vec<ExchangeStats>,
    pub consumers: Vec<ConsumerStats>,
    pub dead_letters: DeadLetterStats,
}

impl BrokerStats {
    pub(crate) fn timestamp(at: SystemTime) -> String {
        chrono::DateTime::<chrono::Utc>::from(at).to_rfc3339()
    }

    /// Messages stored across all queues
    pub fn total_depth(&self) -> usize {
        self.queues.iter().map(|q| q.depth).sum()
    }

    /// Messages delivered but not yet acknowledged or rejected
    pub fn total_unacked(&self) -> u64 {
        self.queues.iter().map(|q| q.unacked).sum()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueStats> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timestamp_is_rfc3339() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
        assert_eq!(BrokerStats::timestamp(at), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn test_totals() {
        let stats = BrokerStats {
            captured_at: String::new(),
            messages_published: 3,
            queues: vec![
                QueueStats {
                    name: "a".to_string(),
                    depth: 2,
                    unacked: 1,
                    ..QueueStats::default()
                },
                QueueStats {
                    name: "b".to_string(),
                    depth: 5,
                    unacked: 0,
                    ..QueueStats::default()
                },
            ],
            exchanges: Vec::new(),
            consumers: Vec::new(),
            dead_letters: DeadLetterStats::default(),
        };

        assert_eq!(stats.total_depth(), 7);
        assert_eq!(stats.total_unacked(), 1);
        assert_eq!(stats.queue("b").map(|q| q.depth), Some(5));
        assert!(stats.to_json().unwrap().contains("\"messages_published\": 3"));
    }
}
