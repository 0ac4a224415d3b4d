//! Agent subscriptions and message handlers

use agora_core::{MessageType, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::message::AgentMessage;

/// Receives messages delivered to a registered agent
///
/// Handlers run inside the hub's dispatch loop, one message at a time, so
/// they should return quickly or hand the work off. An error or a panic is
/// caught by the hub and reported on its failure channel; it never reaches
/// the sender or the other subscribers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: AgentMessage) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(AgentMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, message: AgentMessage) -> Result<()> {
        (self)(message).await
    }
}

/// Which broadcasts an agent wants to see
///
/// Empty lists mean "no restriction". When both lists are set, a message
/// must pass both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Accepted message types
    pub message_types: Vec<MessageType>,
    /// Accepted subject substrings
    pub subjects: Vec<String>,
}

impl SubscriptionFilter {
    /// A filter that accepts everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = MessageType>) -> Self {
        self.message_types.extend(types);
        self
    }

    pub fn with_subjects<S: Into<String>>(mut self, subjects: impl IntoIterator<Item = S>) -> Self {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    /// Check a message against the filter
    pub fn matches(&self, message: &AgentMessage) -> bool {
        if self.message_types.is_empty() && self.subjects.is_empty() {
            return true;
        }

        if !self.message_types.is_empty() && !self.message_types.contains(&message.msg_type) {
            return false;
        }

        if !self.subjects.is_empty()
            && !self
                .subjects
                .iter()
                .any(|s| message.subject.contains(s.as_str()))
        {
            return false;
        }

        true
    }
}

/// An agent's registration with the hub
#[derive(Clone)]
pub struct AgentSubscription {
    pub agent_id: String,
    pub filter: SubscriptionFilter,
    pub(crate) handler: Arc<dyn MessageHandler>,
}

impl AgentSubscription {
    pub fn new(
        agent_id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        filter: SubscriptionFilter,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            filter,
            handler,
        }
    }

    pub fn matches(&self, message: &AgentMessage) -> bool {
        self.filter.matches(message)
    }
}

impl fmt::Debug for AgentSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSubscription")
            .field("agent_id", &self.agent_id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
