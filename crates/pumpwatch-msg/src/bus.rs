//! ---
//! pw_section: "02-messaging-ipc-data-model"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Message bus fanning published payloads out to transports."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pumpwatch_metrics::BusMetrics;
use tracing::{trace, warn};

use crate::types::{AlertEvent, ControlEvent, Message, TelemetrySample};
use crate::{BusError, Result, Transport};

/// Snapshot of bus counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Messages handed to the bus.
    pub published: u64,
    /// Successful transport deliveries.
    pub delivered: u64,
    /// Transport deliveries that failed.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a fully successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Transports that accepted the message.
    pub delivered: usize,
}

/// Publishes messages to every registered transport.
///
/// Safe to share between executor tasks: transports are only read after
/// construction and counters are atomic.
#[derive(Default)]
pub struct MessageBus {
    transports: Vec<Arc<dyn Transport>>,
    counters: Counters,
    metrics: Option<BusMetrics>,
}

impl MessageBus {
    /// Bus with no transports. Publishing succeeds trivially.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach prometheus counters.
    pub fn with_metrics(mut self, metrics: BusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a transport for publish operations.
    pub fn register_transport<T>(&mut self, transport: Arc<T>)
    where
        T: Transport + 'static,
    {
        self.transports.push(transport as Arc<dyn Transport>);
    }

    /// Names of the registered transports in registration order.
    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    /// Hand `message` to every transport.
    ///
    /// Every transport is attempted even if an earlier one fails; the error
    /// lists the transports that rejected the message.
    pub fn publish(&self, message: Message) -> Result<PublishReceipt> {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let kind = message.kind();
        trace!(topic = %message.topic, "publishing message");

        let mut delivered = 0;
        let mut failed = Vec::new();
        for transport in &self.transports {
            match transport.send(&message) {
                Ok(()) => {
                    delivered += 1;
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(
                        transport = transport.name(),
                        topic = %message.topic,
                        error = %err,
                        "transport send failed"
                    );
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    failed.push(transport.name());
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record(kind.as_ref(), failed.is_empty());
        }
        if failed.is_empty() {
            Ok(PublishReceipt { delivered })
        } else {
            Err(BusError::Undelivered {
                topic: message.topic.to_string(),
                transports: failed,
            })
        }
    }

    /// Publish on `telemetry/{asset_id}`.
    pub fn publish_telemetry(&self, sample: TelemetrySample) -> Result<PublishReceipt> {
        self.publish(Message::telemetry(sample))
    }

    /// Publish on `alerts/{asset_id}`.
    pub fn publish_alert(&self, event: AlertEvent) -> Result<PublishReceipt> {
        self.publish(Message::alert(event))
    }

    /// Publish on `control/{asset_id}`.
    pub fn publish_control(&self, event: ControlEvent) -> Result<PublishReceipt> {
        self.publish(Message::control(event))
    }

    /// Current counter values.
    pub fn stats(&self) -> BusStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ControlAction, TopicKind};
    use crate::InMemoryTransport;
    use chrono::Utc;

    struct Unreachable;

    impl Transport for Unreachable {
        fn send(&self, _msg: &Message) -> Result<()> {
            Err(BusError::Closed("unreachable"))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    fn event() -> ControlEvent {
        ControlEvent {
            ts: Utc::now(),
            asset_id: "pump01".into(),
            action: ControlAction::Started,
            scenario: None,
        }
    }

    #[test]
    fn failing_transport_does_not_block_others() {
        let memory = Arc::new(InMemoryTransport::new());
        let mut sub = memory.subscribe(&[TopicKind::Control]);
        let mut bus = MessageBus::new();
        bus.register_transport(Arc::new(Unreachable));
        bus.register_transport(memory.clone());

        let err = bus.publish_control(event()).unwrap_err();
        match err {
            BusError::Undelivered { topic, transports } => {
                assert_eq!(topic, "control/pump01");
                assert_eq!(transports, vec!["unreachable"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(sub.drain().len(), 1);
        assert_eq!(
            bus.stats(),
            BusStats {
                published: 1,
                delivered: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn empty_bus_accepts_messages() {
        let bus = MessageBus::new();
        let receipt = bus.publish_control(event()).unwrap();
        assert_eq!(receipt.delivered, 0);
        assert!(bus.transport_names().is_empty());
    }

    #[test]
    fn metrics_record_outcomes() {
        let registry = pumpwatch_metrics::new_registry();
        let metrics = BusMetrics::new(&registry).unwrap();
        let mut bus = MessageBus::new().with_metrics(metrics);
        bus.register_transport(Arc::new(Unreachable));
        let _ = bus.publish_control(event());
        let text = pumpwatch_metrics::render(&registry).unwrap();
        assert!(text.contains("outcome=\"failed\""));
        assert!(text.contains("topic_kind=\"control\""));
    }
}
