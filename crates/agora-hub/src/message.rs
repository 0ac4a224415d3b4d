//! Message model for the collaboration hub

use agora_core::{MessagePriority, MessageType, BROADCAST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One unit of communication between agents
///
/// Built once and never mutated after it is handed to the hub; the hub keeps
/// its own copy in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message id, generated at construction
    pub id: String,
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Advisory priority
    pub priority: MessagePriority,
    /// Sending agent
    pub sender: String,
    /// Receiving agent, or [`BROADCAST`]
    pub recipient: String,
    /// Short topic
    pub subject: String,
    /// Opaque payload
    pub content: Value,
    /// Links a request to its eventual reply
    pub correlation_id: Option<String>,
    /// Id of the message being answered
    pub in_reply_to: Option<String>,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentMessage {
    pub fn new(
        msg_type: MessageType,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            msg_type,
            priority: MessagePriority::Normal,
            sender: sender.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            content,
            correlation_id: None,
            in_reply_to: None,
            metadata: Map::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(message_id.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Create a request addressed to one agent
    pub fn request(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        content: Value,
    ) -> Self {
        Self::new(MessageType::Request, sender, recipient, subject, content)
    }

    /// Create a notification addressed to one agent
    pub fn notification(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        content: Value,
    ) -> Self {
        Self::new(MessageType::Notification, sender, recipient, subject, content)
    }

    /// Create the response to `request`
    ///
    /// The reply goes back to the requester, carries the request's
    /// correlation id (or the request id when it had none) and points at the
    /// request through `in_reply_to`, which is what the hub needs to resolve
    /// a waiting `send_and_wait`.
    pub fn reply_to(request: &AgentMessage, sender: impl Into<String>, content: Value) -> Self {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| request.id.clone());

        Self::new(
            MessageType::Response,
            sender,
            request.sender.clone(),
            format!("Re: {}", request.subject),
            content,
        )
        .with_priority(request.priority)
        .with_correlation_id(correlation_id)
        .with_in_reply_to(request.id.clone())
    }

    /// Whether this message is addressed to every subscriber
    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST
    }

    /// Whether this message answers an earlier one
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some() && self.correlation_id.is_some()
    }

    /// Whether the message has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether `agent_id` sent or is the named recipient of this message
    pub fn involves(&self, agent_id: &str) -> bool {
        self.sender == agent_id || self.recipient == agent_id
    }
}
