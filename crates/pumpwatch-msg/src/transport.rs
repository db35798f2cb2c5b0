//! ---
//! pw_section: "02-messaging-ipc-data-model"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Transport abstraction and the in-process fan-out transport."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{Message, TopicKind};
use crate::Result;

/// Transport abstraction used by all messaging backends.
///
/// Implementations are shared by every executor task and must tolerate
/// concurrent `send` calls.
pub trait Transport: Send + Sync {
    /// Send a message into the transport.
    fn send(&self, msg: &Message) -> Result<()>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

struct Subscriber {
    kinds: Vec<TopicKind>,
    tx: mpsc::UnboundedSender<Message>,
}

/// In-process transport that fans every message out to its subscribers.
///
/// Each subscriber gets an unbounded FIFO channel, so messages from one
/// publisher arrive in the order they were sent.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the given topic families.
    pub fn subscribe(&self, kinds: &[TopicKind]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            kinds: kinds.to_vec(),
            tx,
        });
        Subscription { rx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, msg: &Message) -> Result<()> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if !sub.kinds.contains(&msg.kind()) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(msg.clone()).is_ok()
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Receiving end of an [`InMemoryTransport`] subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// Wait for the next message. `None` once the transport is dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(msg) = self.try_recv() {
            out.push(msg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ControlAction, ControlEvent};
    use chrono::Utc;

    fn control(asset: &str, action: ControlAction) -> Message {
        Message::control(ControlEvent {
            ts: Utc::now(),
            asset_id: asset.into(),
            action,
            scenario: None,
        })
    }

    #[test]
    fn subscribers_only_receive_requested_kinds() {
        let transport = InMemoryTransport::new();
        let mut control_sub = transport.subscribe(&[TopicKind::Control]);
        let mut alert_sub = transport.subscribe(&[TopicKind::Alerts]);

        transport.send(&control("pump01", ControlAction::Loaded)).unwrap();

        assert_eq!(control_sub.drain().len(), 1);
        assert!(alert_sub.try_recv().is_none());
    }

    #[test]
    fn messages_keep_publish_order() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe(&[TopicKind::Control]);
        transport.send(&control("pump01", ControlAction::Loaded)).unwrap();
        transport.send(&control("pump01", ControlAction::Started)).unwrap();

        let actions: Vec<_> = sub
            .drain()
            .into_iter()
            .map(|m| match m.payload {
                crate::types::Payload::Control(event) => event.action,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert_eq!(actions, vec![ControlAction::Loaded, ControlAction::Started]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let transport = InMemoryTransport::new();
        let sub = transport.subscribe(&[TopicKind::Control]);
        assert_eq!(transport.subscriber_count(), 1);
        drop(sub);
        transport.send(&control("pump01", ControlAction::Reset)).unwrap();
        assert_eq!(transport.subscriber_count(), 0);
    }
}
