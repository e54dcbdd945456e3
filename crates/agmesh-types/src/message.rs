use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Receiver value meaning "every subscriber".
pub const BROADCAST: &str = "broadcast";
/// Sender value used by the runtime itself.
pub const SYSTEM_SENDER: &str = "system";

/// Human-readable and/or structured payload of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            data: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            text: None,
            data: Some(data),
        }
    }

    pub fn text_and_data(text: impl Into<String>, data: Value) -> Self {
        Self {
            text: Some(text.into()),
            data: Some(data),
        }
    }
}

/// Token and cost accounting attached to a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
}

/// A ledger message. Immutable once appended; `id` and `timestamp` are
/// assigned by the store and strictly increase within a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub cluster_id: String,
    pub topic: String,
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.receiver == BROADCAST
    }

    /// Whether this message is addressed to the given agent.
    pub fn addressed_to(&self, agent_id: &str) -> bool {
        self.is_broadcast() || self.receiver == agent_id
    }
}

/// What a publisher supplies; the bus stamps the rest.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub topic: String,
    pub receiver: Option<String>,
    pub content: MessageContent,
    pub usage: Option<TokenUsage>,
}

impl MessageDraft {
    pub fn new(topic: impl Into<String>, content: MessageContent) -> Self {
        Self {
            topic: topic.into(),
            receiver: None,
            content,
            usage: None,
        }
    }

    pub fn to(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Identity stamped onto every publish.
#[derive(Debug, Clone)]
pub struct SenderIdentity {
    pub sender: String,
    pub role: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

impl SenderIdentity {
    pub fn system() -> Self {
        Self {
            sender: SYSTEM_SENDER.to_string(),
            role: None,
            model: None,
            provider: None,
        }
    }

    pub fn agent(
        id: impl Into<String>,
        role: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            sender: id.into(),
            role: Some(role.into()),
            model: Some(model.into()),
            provider: Some(provider.into()),
        }
    }
}

/// Filter for ledger queries. `since`/`until` are inclusive millisecond
/// bounds on `timestamp`; `limit` keeps the newest N matches (results are
/// always returned in ascending timestamp order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub cluster_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl MessageFilter {
    pub fn cluster(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            ..Default::default()
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn since(mut self, ts: i64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: i64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Whether a message satisfies this filter (limit is a query concern,
    /// not a per-message predicate).
    pub fn matches(&self, msg: &Message) -> bool {
        msg.cluster_id == self.cluster_id
            && self.topic.as_deref().is_none_or(|t| msg.topic == t)
            && self.sender.as_deref().is_none_or(|s| msg.sender == s)
            && self.since.is_none_or(|s| msg.timestamp >= s)
            && self.until.is_none_or(|u| msg.timestamp <= u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: 1,
            timestamp: 1000,
            cluster_id: "c1".to_string(),
            topic: "IMPLEMENTATION_READY".to_string(),
            sender: "worker".to_string(),
            receiver: BROADCAST.to_string(),
            content: MessageContent::text("done"),
            sender_model: Some("sonnet".to_string()),
            sender_provider: Some("claude".to_string()),
            sender_role: Some("implementation".to_string()),
            usage: None,
        }
    }

    #[test]
    fn test_filter_matches_topic_and_sender() {
        let msg = sample();
        assert!(
            MessageFilter::cluster("c1")
                .topic("IMPLEMENTATION_READY")
                .matches(&msg)
        );
        assert!(!MessageFilter::cluster("c1").topic("PLAN_READY").matches(&msg));
        assert!(!MessageFilter::cluster("c2").matches(&msg));
        assert!(MessageFilter::cluster("c1").sender("worker").matches(&msg));
        assert!(!MessageFilter::cluster("c1").sender("other").matches(&msg));
    }

    #[test]
    fn test_filter_since_is_inclusive() {
        let msg = sample();
        assert!(MessageFilter::cluster("c1").since(1000).matches(&msg));
        assert!(!MessageFilter::cluster("c1").since(1001).matches(&msg));
        assert!(MessageFilter::cluster("c1").until(1000).matches(&msg));
        assert!(!MessageFilter::cluster("c1").until(999).matches(&msg));
    }

    #[test]
    fn test_message_addressing() {
        let mut msg = sample();
        assert!(msg.addressed_to("anyone"));
        msg.receiver = "validator-1".to_string();
        assert!(msg.addressed_to("validator-1"));
        assert!(!msg.addressed_to("worker"));
    }
}
