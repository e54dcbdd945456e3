use crate::{Ledger, Result};
use agmesh_types::message::BROADCAST;
use agmesh_types::{Message, MessageContent, MessageDraft, SenderIdentity};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Delivery filter for a subscription. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub cluster_id: Option<String>,
    pub topic: Option<String>,
    pub sender: Option<String>,
}

impl SubscriptionFilter {
    pub fn cluster(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            ..Default::default()
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    fn matches(&self, msg: &Message) -> bool {
        self.cluster_id
            .as_deref()
            .is_none_or(|c| msg.cluster_id == c)
            && self.topic.as_deref().is_none_or(|t| msg.topic == t)
            && self.sender.as_deref().is_none_or(|s| msg.sender == s)
    }
}

struct SubscriberEntry {
    id: u64,
    filter: SubscriptionFilter,
    tx: mpsc::UnboundedSender<Message>,
}

/// Handle to an active subscription. Receive messages in append order via
/// [`Subscription::recv`]; dropping the handle ends delivery (the bus
/// prunes the dead entry on its next publish).
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Non-blocking receive; `None` when no message is queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// Publish + subscribe front-end over the ledger.
///
/// Every publish is first appended (the ledger is the source of truth),
/// then fanned out to matching subscribers. Each subscriber owns its
/// receiver, so per-subscriber delivery is serial in append order, and a
/// slow or dropped subscriber never affects the publisher or its peers.
pub struct MessageBus {
    ledger: Arc<Ledger>,
    subscribers: Mutex<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push(SubscriberEntry { id, filter, tx });
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Stamp sender identity onto a draft, append it, fan it out.
    pub fn publish(
        &self,
        cluster_id: &str,
        identity: &SenderIdentity,
        draft: MessageDraft,
    ) -> Result<Message> {
        let msg = Message {
            id: 0,
            timestamp: 0,
            cluster_id: cluster_id.to_string(),
            topic: draft.topic,
            sender: identity.sender.clone(),
            receiver: draft.receiver.unwrap_or_else(|| BROADCAST.to_string()),
            content: draft.content,
            sender_model: identity.model.clone(),
            sender_provider: identity.provider.clone(),
            sender_role: identity.role.clone(),
            usage: draft.usage,
        };

        let stored = self.ledger.append(msg)?;
        debug!(
            topic = %stored.topic,
            sender = %stored.sender,
            id = stored.id,
            "published"
        );

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|entry| {
            if !entry.filter.matches(&stored) {
                return true;
            }
            // A send only fails when the receiver is gone; drop the entry.
            entry.tx.send(stored.clone()).is_ok()
        });

        Ok(stored)
    }
}

/// A bus handle bound to one sender identity. Agents publish through this,
/// which is what guarantees `sender` is always the agent's own id.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<MessageBus>,
    cluster_id: String,
    identity: SenderIdentity,
}

impl Publisher {
    pub fn new(bus: Arc<MessageBus>, cluster_id: impl Into<String>, identity: SenderIdentity) -> Self {
        Self {
            bus,
            cluster_id: cluster_id.into(),
            identity,
        }
    }

    pub fn identity(&self) -> &SenderIdentity {
        &self.identity
    }

    /// Update the recorded model/provider (model rules can change these
    /// between iterations).
    pub fn set_model(&mut self, model: impl Into<String>, provider: impl Into<String>) {
        self.identity.model = Some(model.into());
        self.identity.provider = Some(provider.into());
    }

    pub fn publish(&self, draft: MessageDraft) -> Result<Message> {
        self.bus.publish(&self.cluster_id, &self.identity, draft)
    }

    /// Convenience for a broadcast text message.
    pub fn publish_text(&self, topic: &str, text: impl Into<String>) -> Result<Message> {
        self.publish(MessageDraft::new(topic, MessageContent::text(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmesh_types::MessageFilter;
    use serde_json::json;

    fn bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new(Arc::new(Ledger::open_in_memory().unwrap())))
    }

    #[tokio::test]
    async fn test_publish_stamps_identity_and_delivers() {
        let bus = bus();
        let mut sub = bus.subscribe(SubscriptionFilter::cluster("c1"));

        let identity = SenderIdentity::agent("worker", "implementation", "sonnet", "claude");
        bus.publish(
            "c1",
            &identity,
            MessageDraft::new("IMPLEMENTATION_READY", MessageContent::text("done")),
        )
        .unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.sender, "worker");
        assert_eq!(msg.sender_model.as_deref(), Some("sonnet"));
        assert_eq!(msg.sender_provider.as_deref(), Some("claude"));
        assert_eq!(msg.sender_role.as_deref(), Some("implementation"));
        assert!(msg.id > 0);
    }

    #[tokio::test]
    async fn test_subscription_filter_scopes_delivery() {
        let bus = bus();
        let mut only_results = bus.subscribe(
            SubscriptionFilter::cluster("c1").topic("VALIDATION_RESULT"),
        );

        let sys = SenderIdentity::system();
        bus.publish(
            "c1",
            &sys,
            MessageDraft::new("ISSUE_OPENED", MessageContent::text("issue")),
        )
        .unwrap();
        bus.publish(
            "c1",
            &sys,
            MessageDraft::new(
                "VALIDATION_RESULT",
                MessageContent::data(json!({ "approved": true })),
            ),
        )
        .unwrap();

        let msg = only_results.recv().await.unwrap();
        assert_eq!(msg.topic, "VALIDATION_RESULT");
        assert!(only_results.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = bus();
        let sub = bus.subscribe(SubscriptionFilter::cluster("c1"));
        drop(sub);

        let sys = SenderIdentity::system();
        // Must not error even though the receiver is gone.
        bus.publish(
            "c1",
            &sys,
            MessageDraft::new("ISSUE_OPENED", MessageContent::text("x")),
        )
        .unwrap();
        assert_eq!(bus.subscribers.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_delivery_preserves_append_order() {
        let bus = bus();
        let mut sub = bus.subscribe(SubscriptionFilter::cluster("c1"));
        let sys = SenderIdentity::system();
        for i in 0..10 {
            bus.publish(
                "c1",
                &sys,
                MessageDraft::new(format!("T{}", i), MessageContent::default()),
            )
            .unwrap();
        }
        let mut last_id = 0;
        for _ in 0..10 {
            let msg = sub.recv().await.unwrap();
            assert!(msg.id > last_id);
            last_id = msg.id;
        }
    }

    #[tokio::test]
    async fn test_publisher_binds_sender() {
        let bus = bus();
        let publisher = Publisher::new(
            bus.clone(),
            "c1",
            SenderIdentity::agent("v1", "validator", "opus", "claude"),
        );
        publisher.publish_text("VALIDATION_RESULT", "ok").unwrap();

        let stored = bus
            .ledger()
            .query(&MessageFilter::cluster("c1"))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, "v1");
    }
}
