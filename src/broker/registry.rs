//! Exchange and queue registry
//!
//! The registry owns the named exchanges (with their bindings) and the named
//! queue stores. Both maps sit behind their own `RwLock`, independent of the
//! per-queue locks, so routing never waits on delivery.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::exchange::{Binding, Exchange, ExchangeKind, ExchangeStats};
use crate::broker::message::Message;
use crate::broker::store::{QueueOptions, QueueStore};
use crate::broker::topic;
use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct Registry {
    exchanges: RwLock<BTreeMap<String, Exchange>>,
    queues: RwLock<BTreeMap<String, Arc<QueueStore>>>,
}

fn require_name(what: &str, name: &str) -> BrokerResult<()> {
    if name.trim().is_empty() {
        return Err(BrokerError::validation(format!(
            "{} name must not be empty",
            what
        )));
    }
    Ok(())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an exchange. Returns `true` if it was created, `false` if an
    /// exchange of the same kind already existed.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BrokerResult<bool> {
        require_name("exchange", name)?;
        let mut exchanges = handle_rwlock_write(self.exchanges.write(), BrokerError::internal)?;

        if let Some(existing) = exchanges.get(name) {
            if existing.kind() == kind {
                return Ok(false);
            }
            return Err(BrokerError::Conflict {
                message: format!(
                    "exchange '{}' already declared as {}, cannot redeclare as {}",
                    name,
                    existing.kind(),
                    kind
                ),
            });
        }

        exchanges.insert(name.to_string(), Exchange::new(name, kind));
        log::info!("Declared {} exchange '{}'", kind, name);
        Ok(true)
    }

    pub fn delete_exchange(&self, name: &str) -> BrokerResult<()> {
        let mut exchanges = handle_rwlock_write(self.exchanges.write(), BrokerError::internal)?;
        match exchanges.remove(name) {
            Some(exchange) => {
                log::info!(
                    "Deleted exchange '{}' with {} bindings",
                    name,
                    exchange.bindings().len()
                );
                Ok(())
            }
            None => Err(BrokerError::ExchangeNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Declare a queue, or return the existing one if its options are compatible
    pub fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<Arc<QueueStore>> {
        require_name("queue", name)?;
        if options.dead_letter.as_deref() == Some(name) {
            return Err(BrokerError::validation(format!(
                "queue '{}' cannot be its own dead-letter target",
                name
            )));
        }
        if options.max_deliveries == Some(0) {
            return Err(BrokerError::validation(format!(
                "queue '{}' max_deliveries must be at least 1",
                name
            )));
        }

        let mut queues = handle_rwlock_write(self.queues.write(), BrokerError::internal)?;
        if let Some(existing) = queues.get(name) {
            if existing.options().is_compatible_with(&options) {
                return Ok(Arc::clone(existing));
            }
            return Err(BrokerError::Conflict {
                message: format!(
                    "queue '{}' already declared with different options ({:?})",
                    name,
                    existing.options()
                ),
            });
        }

        let store = Arc::new(QueueStore::new(name, options));
        queues.insert(name.to_string(), Arc::clone(&store));
        log::info!("Declared {} queue '{}'", store.kind(), name);
        Ok(store)
    }

    /// Remove a queue and every binding that points at it
    pub(crate) fn remove_queue(&self, name: &str) -> BrokerResult<Arc<QueueStore>> {
        let store = handle_rwlock_write(self.queues.write(), BrokerError::internal)?
            .remove(name)
            .ok_or_else(|| BrokerError::QueueNotFound {
                name: name.to_string(),
            })?;

        let mut exchanges = handle_rwlock_write(self.exchanges.write(), BrokerError::internal)?;
        let removed: usize = exchanges
            .values_mut()
            .map(|exchange| exchange.remove_queue(name))
            .sum();
        log::info!("Deleted queue '{}' and {} bindings", name, removed);
        Ok(store)
    }

    pub fn queue(&self, name: &str) -> BrokerResult<Arc<QueueStore>> {
        self.find_queue(name)?
            .ok_or_else(|| BrokerError::QueueNotFound {
                name: name.to_string(),
            })
    }

    pub fn find_queue(&self, name: &str) -> BrokerResult<Option<Arc<QueueStore>>> {
        let queues = handle_rwlock_read(self.queues.read(), BrokerError::internal)?;
        Ok(queues.get(name).cloned())
    }

    pub fn queues(&self) -> BrokerResult<Vec<Arc<QueueStore>>> {
        let queues = handle_rwlock_read(self.queues.read(), BrokerError::internal)?;
        Ok(queues.values().cloned().collect())
    }

    /// Bind `queue` to `exchange`. Returns `false` if the identical binding existed.
    pub fn bind(
        &self,
        exchange: &str,
        queue: &str,
        pattern: &str,
        arguments: BTreeMap<String, String>,
    ) -> BrokerResult<bool> {
        if self.find_queue(queue)?.is_none() {
            return Err(BrokerError::QueueNotFound {
                name: queue.to_string(),
            });
        }

        let mut exchanges = handle_rwlock_write(self.exchanges.write(), BrokerError::internal)?;
        let target = exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound {
                name: exchange.to_string(),
            })?;
        if target.kind() == ExchangeKind::Topic {
            topic::validate_pattern(pattern).map_err(BrokerError::validation)?;
        }

        let added = target.add_binding(Binding::new(exchange, queue, pattern, arguments));
        if added {
            log::info!(
                "Bound queue '{}' to exchange '{}' with pattern '{}'",
                queue,
                exchange,
                pattern
            );
        } else {
            log::debug!(
                "Binding '{}' -> '{}' ({}) already exists",
                exchange,
                queue,
                pattern
            );
        }
        Ok(added)
    }

    /// Remove a binding. Returns `false` if no such binding existed.
    pub fn unbind(
        &self,
        exchange: &str,
        queue: &str,
        pattern: &str,
        arguments: &BTreeMap<String, String>,
    ) -> BrokerResult<bool> {
        let mut exchanges = handle_rwlock_write(self.exchanges.write(), BrokerError::internal)?;
        let target = exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound {
                name: exchange.to_string(),
            })?;
        let removed = target.remove_binding(queue, pattern, arguments);
        if removed {
            log::info!(
                "Unbound queue '{}' from exchange '{}' ({})",
                queue,
                exchange,
                pattern
            );
        }
        Ok(removed)
    }

    /// Names of the queues `message` routes to through `exchange`,
    /// de-duplicated and in lexicographic order
    pub fn route(&self, exchange: &str, message: &Message) -> BrokerResult<Vec<String>> {
        let exchanges = handle_rwlock_read(self.exchanges.read(), BrokerError::internal)?;
        let source = exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound {
                name: exchange.to_string(),
            })?;

        let matched: BTreeSet<&str> = source.matching_queues(message).collect();
        Ok(matched.into_iter().map(str::to_string).collect())
    }

    pub(crate) fn record_publish(&self, exchange: &str, routed: bool) -> BrokerResult<()> {
        let exchanges = handle_rwlock_read(self.exchanges.read(), BrokerError::internal)?;
        if let Some(source) = exchanges.get(exchange) {
            source.record_publish(routed);
        }
        Ok(())
    }

    pub fn exchange_stats(&self, name: &str) -> BrokerResult<ExchangeStats> {
        let exchanges = handle_rwlock_read(self.exchanges.read(), BrokerError::internal)?;
        exchanges
            .get(name)
            .map(Exchange::stats)
            .ok_or_else(|| BrokerError::ExchangeNotFound {
                name: name.to_string(),
            })
    }

    pub fn all_exchange_stats(&self) -> BrokerResult<Vec<ExchangeStats>> {
        let exchanges = handle_rwlock_read(self.exchanges.read(), BrokerError::internal)?;
        Ok(exchanges.values().map(Exchange::stats).collect())
    }

    /// Every binding, ordered by exchange name then declaration order
    pub fn bindings(&self) -> BrokerResult<Vec<Binding>> {
        let exchanges = handle_rwlock_read(self.exchanges.read(), BrokerError::internal)?;
        Ok(exchanges
            .values()
            .flat_map(|exchange| exchange.bindings().iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message::{MessageId, PublishOptions};
    use crate::broker::store::QueueKind;
    use std::time::SystemTime;

    fn message(routing_key: &str) -> Message {
        Message::new(
            MessageId(1),
            routing_key,
            Arc::from(&b"x"[..]),
            &PublishOptions::new(),
            SystemTime::UNIX_EPOCH,
        )
    }

    fn standard() -> QueueOptions {
        QueueOptions::new(QueueKind::Standard)
    }

    #[test]
    fn test_redeclare_exchange() {
        let registry = Registry::new();
        assert!(registry.declare_exchange("events", ExchangeKind::Topic).unwrap());
        assert!(!registry.declare_exchange("events", ExchangeKind::Topic).unwrap());

        let err = registry
            .declare_exchange("events", ExchangeKind::Direct)
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { .. }));
        assert!(matches!(
            registry.declare_exchange("", ExchangeKind::Direct),
            Err(BrokerError::Validation { .. })
        ));
    }

    #[test]
    fn test_redeclare_queue() {
        let registry = Registry::new();
        let first = registry.declare_queue("q", standard().max_length(5)).unwrap();
        let second = registry.declare_queue("q", standard().max_length(5)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(matches!(
            registry.declare_queue("q", standard()),
            Err(BrokerError::Conflict { .. })
        ));
        assert!(matches!(
            registry.declare_queue("self", standard().dead_letter("self")),
            Err(BrokerError::Validation { .. })
        ));
        assert!(matches!(
            registry.declare_queue("zero", standard().max_deliveries(0)),
            Err(BrokerError::Validation { .. })
        ));
    }

    #[test]
    fn test_bind_requires_both_ends() {
        let registry = Registry::new();
        registry.declare_exchange("ex", ExchangeKind::Direct).unwrap();
        registry.declare_queue("q", standard()).unwrap();

        assert!(matches!(
            registry.bind("missing", "q", "k", BTreeMap::new()),
            Err(BrokerError::ExchangeNotFound { .. })
        ));
        assert!(matches!(
            registry.bind("ex", "missing", "k", BTreeMap::new()),
            Err(BrokerError::QueueNotFound { .. })
        ));
        assert!(registry.bind("ex", "q", "k", BTreeMap::new()).unwrap());
        assert!(!registry.bind("ex", "q", "k", BTreeMap::new()).unwrap());
        assert_eq!(registry.bindings().unwrap().len(), 1);
    }

    #[test]
    fn test_topic_bind_rejects_malformed_pattern() {
        let registry = Registry::new();
        registry.declare_exchange("ex", ExchangeKind::Topic).unwrap();
        registry.declare_queue("q", standard()).unwrap();

        assert!(matches!(
            registry.bind("ex", "q", "a..b", BTreeMap::new()),
            Err(BrokerError::Validation { .. })
        ));
    }

    #[test]
    fn test_route_is_sorted_and_deduplicated() {
        let registry = Registry::new();
        registry.declare_exchange("ex", ExchangeKind::Topic).unwrap();
        for queue in ["zeta", "alpha", "mid"] {
            registry.declare_queue(queue, standard()).unwrap();
        }
        registry.bind("ex", "zeta", "a.*", BTreeMap::new()).unwrap();
        registry.bind("ex", "alpha", "#", BTreeMap::new()).unwrap();
        registry.bind("ex", "alpha", "a.b", BTreeMap::new()).unwrap();
        registry.bind("ex", "mid", "b.#", BTreeMap::new()).unwrap();

        assert_eq!(
            registry.route("ex", &message("a.b")).unwrap(),
            vec!["alpha".to_string(), "zeta".to_string()]
        );
        assert!(matches!(
            registry.route("nope", &message("a.b")),
            Err(BrokerError::ExchangeNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_queue_drops_bindings() {
        let registry = Registry::new();
        registry.declare_exchange("ex", ExchangeKind::Fanout).unwrap();
        registry.declare_queue("a", standard()).unwrap();
        registry.declare_queue("b", standard()).unwrap();
        registry.bind("ex", "a", "", BTreeMap::new()).unwrap();
        registry.bind("ex", "b", "", BTreeMap::new()).unwrap();

        registry.remove_queue("a").unwrap();

        assert_eq!(registry.route("ex", &message("")).unwrap(), vec!["b"]);
        assert!(registry.find_queue("a").unwrap().is_none());
        assert!(registry.remove_queue("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unbind_and_delete_exchange() {
        let registry = Registry::new();
        registry.declare_exchange("ex", ExchangeKind::Direct).unwrap();
        registry.declare_queue("q", standard()).unwrap();
        registry.bind("ex", "q", "k", BTreeMap::new()).unwrap();

        assert!(registry.unbind("ex", "q", "k", &BTreeMap::new()).unwrap());
        assert!(!registry.unbind("ex", "q", "k", &BTreeMap::new()).unwrap());
        assert!(registry.route("ex", &message("k")).unwrap().is_empty());

        registry.delete_exchange("ex").unwrap();
        assert!(registry.delete_exchange("ex").unwrap_err().is_not_found());
    }
}
