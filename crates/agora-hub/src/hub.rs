//! Collaboration hub: routes messages between registered agents

use agora_core::isolation::isolate;
use agora_core::{AgoraError, HubConfig, MessagePriority, MessageType, Result, BROADCAST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::message::AgentMessage;
use crate::subscription::{AgentSubscription, MessageHandler, SubscriptionFilter};

/// A handler failure observed by the dispatch loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    /// Message that could not be handled
    pub message_id: String,
    /// Agent whose handler failed
    pub agent_id: String,
    /// Error or panic text
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Snapshot of hub counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub registered_agents: usize,
    /// Messages sent over the hub's lifetime, including evicted history
    pub total_messages: u64,
    /// Messages currently held in history
    pub retained_messages: usize,
    pub pending_requests: usize,
    pub queue_size: usize,
    pub handler_failures: u64,
    /// Lifetime tally per message type (every type present, zero included)
    pub message_types: BTreeMap<MessageType, u64>,
}

/// Central hub for inter-agent communication
///
/// Provides point-to-point and broadcast delivery, request/reply with
/// timeouts, and a history of everything sent. Messages are delivered one
/// at a time in send order by a single dispatch loop (see [`start`] and
/// [`spawn`]); priority does not reorder delivery.
///
/// The hub is a cheap handle: clones share the same agents, queue, and
/// history, so a handler can capture a clone to send replies.
///
/// A handler that calls [`send_and_wait`] on its own hub blocks the
/// dispatch loop that would deliver the reply, so it will time out. Hand
/// such work to a separate task.
///
/// [`start`]: CollaborationHub::start
/// [`spawn`]: CollaborationHub::spawn
/// [`send_and_wait`]: CollaborationHub::send_and_wait
#[derive(Clone)]
pub struct CollaborationHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    /// Registration order is broadcast order
    agents: RwLock<Vec<AgentSubscription>>,
    queue_tx: mpsc::UnboundedSender<AgentMessage>,
    /// Present while no dispatch loop is running
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<AgentMessage>>>,
    queued: AtomicUsize,
    /// Keyed by correlation id; the token is the id of the waiting request
    pending: Mutex<HashMap<String, PendingReply>>,
    history: Mutex<VecDeque<AgentMessage>>,
    tally: Mutex<Tally>,
    handler_failures: AtomicU64,
    running: AtomicBool,
    failures: broadcast::Sender<DeliveryFailure>,
}

struct PendingReply {
    token: String,
    reply_tx: oneshot::Sender<AgentMessage>,
}

#[derive(Default)]
struct Tally {
    total: u64,
    by_type: HashMap<MessageType, u64>,
}

impl CollaborationHub {
    /// Create a hub with default configuration
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with explicit configuration
    pub fn with_config(config: HubConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(config.failure_channel_capacity.max(1));

        Self {
            inner: Arc::new(HubInner {
                config,
                agents: RwLock::new(Vec::new()),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                queued: AtomicUsize::new(0),
                pending: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                tally: Mutex::new(Tally::default()),
                handler_failures: AtomicU64::new(0),
                running: AtomicBool::new(false),
                failures,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Register an agent, replacing any previous registration under the same id
    pub fn register_agent(
        &self,
        agent_id: impl Into<String>,
        handler: impl MessageHandler + 'static,
        filter: SubscriptionFilter,
    ) {
        let subscription = AgentSubscription::new(agent_id, Arc::new(handler), filter);
        let mut agents = write(&self.inner.agents);

        match agents
            .iter_mut()
            .find(|s| s.agent_id == subscription.agent_id)
        {
            Some(existing) => {
                info!("Replacing registration for agent {}", subscription.agent_id);
                *existing = subscription;
            }
            None => {
                info!("Registered agent {}", subscription.agent_id);
                agents.push(subscription);
            }
        }
    }

    /// Remove an agent's registration. Unknown ids are ignored.
    pub fn unregister_agent(&self, agent_id: &str) {
        let mut agents = write(&self.inner.agents);
        let before = agents.len();
        agents.retain(|s| s.agent_id != agent_id);
        if agents.len() < before {
            info!("Unregistered agent {}", agent_id);
        }
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        read(&self.inner.agents)
            .iter()
            .any(|s| s.agent_id == agent_id)
    }

    /// Registered agent ids in registration order
    pub fn registered_agents(&self) -> Vec<String> {
        read(&self.inner.agents)
            .iter()
            .map(|s| s.agent_id.clone())
            .collect()
    }

    /// Record a message in history and queue it for delivery
    ///
    /// Delivery is asynchronous and best-effort: messages to unknown agents
    /// are dropped by the dispatch loop without an error.
    pub fn send(&self, message: AgentMessage) {
        debug!(
            "Queueing {} {} from {} to {}: {}",
            message.msg_type, message.id, message.sender, message.recipient, message.subject
        );

        // History order must match queue order for concurrent senders
        let history = self.record(&message);
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.inner.queue_tx.send(message) {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("Dispatch queue closed, dropping message {}", err.0.id);
        }
        drop(history);
    }

    /// Send a request and wait for the correlated reply
    ///
    /// The message's `correlation_id` defaults to its own id. A reply is a
    /// message carrying that correlation id and an `in_reply_to`; it is
    /// handed back here instead of being delivered to subscribers. The
    /// pending slot is removed on every exit path, including when the
    /// returned future is dropped.
    pub async fn send_and_wait(
        &self,
        mut message: AgentMessage,
        timeout: Duration,
    ) -> Result<AgentMessage> {
        let correlation_id = message
            .correlation_id
            .clone()
            .unwrap_or_else(|| message.id.clone());
        message.correlation_id = Some(correlation_id.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = lock(&self.inner.pending);
            if pending.contains_key(&correlation_id) {
                return Err(AgoraError::DuplicateCorrelation(correlation_id));
            }
            pending.insert(
                correlation_id.clone(),
                PendingReply {
                    token: message.id.clone(),
                    reply_tx,
                },
            );
        }
        let _slot = PendingSlot {
            inner: &self.inner,
            correlation_id: &correlation_id,
            token: message.id.clone(),
        };

        self.send(message);

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(AgoraError::ReplyDropped(correlation_id.clone())),
            Err(_) => {
                warn!(
                    "No reply for {} within {:?}, giving up",
                    correlation_id, timeout
                );
                Err(AgoraError::Timeout {
                    correlation_id: correlation_id.clone(),
                    timeout,
                })
            }
        }
    }

    /// Broadcast a notification to every agent except the sender
    pub fn broadcast(&self, sender: impl Into<String>, subject: impl Into<String>, content: Value) {
        self.broadcast_with(
            sender,
            subject,
            content,
            MessageType::Notification,
            MessagePriority::Normal,
        );
    }

    /// Broadcast with an explicit type and priority
    pub fn broadcast_with(
        &self,
        sender: impl Into<String>,
        subject: impl Into<String>,
        content: Value,
        msg_type: MessageType,
        priority: MessagePriority,
    ) {
        let message =
            AgentMessage::new(msg_type, sender, BROADCAST, subject, content).with_priority(priority);
        self.send(message);
    }

    /// [`send_and_wait`] using the configured request timeout
    ///
    /// [`send_and_wait`]: CollaborationHub::send_and_wait
    pub async fn request(&self, message: AgentMessage) -> Result<AgentMessage> {
        let timeout = self.inner.config.request_timeout();
        self.send_and_wait(message, timeout).await
    }

    /// Hand a task to another agent and wait for its answer
    ///
    /// The request is a high-priority `Delegation` whose content is
    /// `{"task": task, "context": context}`.
    pub async fn delegate(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        task: &str,
        context: Value,
        timeout: Duration,
    ) -> Result<AgentMessage> {
        let message = AgentMessage::new(
            MessageType::Delegation,
            sender,
            recipient,
            format!("Delegation: {}", task),
            json!({
                "task": task,
                "context": context,
            }),
        )
        .with_priority(MessagePriority::High);

        self.send_and_wait(message, timeout).await
    }

    /// Run the dispatch loop on the current task until [`stop`] is called
    ///
    /// Fails with [`AgoraError::HubAlreadyRunning`] if another loop is
    /// active.
    ///
    /// [`stop`]: CollaborationHub::stop
    pub async fn start(&self) -> Result<()> {
        let queue = self.claim_queue()?;
        self.run(queue).await;
        Ok(())
    }

    /// Run the dispatch loop on a new tokio task
    ///
    /// The hub counts as running as soon as this returns, so an immediate
    /// [`stop`](CollaborationHub::stop) is honoured.
    pub fn spawn(&self) -> Result<JoinHandle<()>> {
        let queue = self.claim_queue()?;
        let hub = self.clone();
        Ok(tokio::spawn(async move { hub.run(queue).await }))
    }

    /// Ask the dispatch loop to stop
    ///
    /// Cooperative: the loop notices at its next poll, at most one poll
    /// interval later. Messages still queued stay queued for the next start.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("Stopping collaboration hub");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Subscribe to handler failures
    pub fn failures(&self) -> broadcast::Receiver<DeliveryFailure> {
        self.inner.failures.subscribe()
    }

    /// Message history, oldest first, optionally filtered by participant
    /// (sender or recipient) and type, keeping the last `limit` matches
    pub fn get_history(
        &self,
        agent_id: Option<&str>,
        message_type: Option<MessageType>,
        limit: usize,
    ) -> Vec<AgentMessage> {
        let history = lock(&self.inner.history);
        let mut matched: Vec<AgentMessage> = history
            .iter()
            .rev()
            .filter(|m| agent_id.map_or(true, |id| m.involves(id)))
            .filter(|m| message_type.map_or(true, |t| m.msg_type == t))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub fn get_stats(&self) -> HubStats {
        let (total_messages, message_types) = {
            let tally = lock(&self.inner.tally);
            let by_type = MessageType::ALL
                .iter()
                .map(|t| (*t, tally.by_type.get(t).copied().unwrap_or(0)))
                .collect();
            (tally.total, by_type)
        };

        HubStats {
            registered_agents: read(&self.inner.agents).len(),
            total_messages,
            retained_messages: lock(&self.inner.history).len(),
            pending_requests: lock(&self.inner.pending).len(),
            queue_size: self.inner.queued.load(Ordering::SeqCst),
            handler_failures: self.inner.handler_failures.load(Ordering::SeqCst),
            message_types,
        }
    }

    /// Count and retain a message, returning the still-held history lock
    fn record(&self, message: &AgentMessage) -> MutexGuard<'_, VecDeque<AgentMessage>> {
        {
            let mut tally = lock(&self.inner.tally);
            tally.total += 1;
            *tally.by_type.entry(message.msg_type).or_default() += 1;
        }

        let mut history = lock(&self.inner.history);
        history.push_back(message.clone());
        if let Some(limit) = self.inner.config.history_limit {
            while history.len() > limit {
                history.pop_front();
            }
        }
        history
    }

    fn claim_queue(&self) -> Result<QueueLease> {
        let rx = lock(&self.inner.queue_rx)
            .take()
            .ok_or(AgoraError::HubAlreadyRunning)?;
        self.inner.running.store(true, Ordering::SeqCst);
        info!("Collaboration hub started");

        Ok(QueueLease {
            inner: Arc::clone(&self.inner),
            rx: Some(rx),
        })
    }

    async fn run(&self, mut queue: QueueLease) {
        let poll_interval = self.inner.config.poll_interval();

        while self.inner.running.load(Ordering::SeqCst) {
            let Some(rx) = queue.rx.as_mut() else {
                break;
            };

            match tokio::time::timeout(poll_interval, rx.recv()).await {
                Ok(Some(message)) => {
                    self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                    self.dispatch(message).await;
                }
                // All senders gone; cannot happen while the hub holds one
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        info!("Collaboration hub stopped");
    }

    /// Route one message: resolve a waiting request, fan out a broadcast,
    /// or deliver to the named recipient
    async fn dispatch(&self, message: AgentMessage) {
        if message.is_expired_at(Utc::now()) {
            debug!("Dropping expired message {}", message.id);
            return;
        }

        if message.is_reply() {
            let waiter = match &message.correlation_id {
                Some(id) => lock(&self.inner.pending).remove(id),
                None => None,
            };
            if let Some(waiter) = waiter {
                debug!("Resolving pending request for message {}", message.id);
                if waiter.reply_tx.send(message).is_err() {
                    debug!("Requester stopped waiting before the reply arrived");
                }
                return;
            }
        }

        let targets: Vec<AgentSubscription> = {
            let agents = read(&self.inner.agents);
            if message.is_broadcast() {
                agents
                    .iter()
                    .filter(|s| s.agent_id != message.sender && s.matches(&message))
                    .cloned()
                    .collect()
            } else {
                agents
                    .iter()
                    .filter(|s| s.agent_id == message.recipient)
                    .cloned()
                    .collect()
            }
        };

        if targets.is_empty() && !message.is_broadcast() {
            debug!(
                "No agent registered as {}, dropping message {}",
                message.recipient, message.id
            );
            return;
        }

        for subscription in &targets {
            self.deliver(subscription, message.clone()).await;
        }
    }

    async fn deliver(&self, subscription: &AgentSubscription, message: AgentMessage) {
        let message_id = message.id.clone();
        let operation = format!("handler for {}", subscription.agent_id);

        let Err(err) = isolate(&operation, subscription.handler.handle(message)).await else {
            return;
        };

        let failure = AgoraError::handler_failure(&subscription.agent_id, &err);
        warn!("{} (message {})", failure, message_id);
        self.inner.handler_failures.fetch_add(1, Ordering::SeqCst);

        // No receivers is fine: failures are observable, not required reading
        let _ = self.inner.failures.send(DeliveryFailure {
            message_id,
            agent_id: subscription.agent_id.clone(),
            reason: err.to_string(),
            occurred_at: Utc::now(),
        });
    }
}

impl Default for CollaborationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollaborationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationHub")
            .field("agents", &self.registered_agents())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Removes a pending reply slot when the waiter goes away
///
/// The slot may already have been resolved and handed to a later request
/// reusing the correlation id, so only an entry carrying this waiter's
/// token is removed.
struct PendingSlot<'a> {
    inner: &'a HubInner,
    correlation_id: &'a str,
    token: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.inner.pending);
        if pending
            .get(self.correlation_id)
            .is_some_and(|slot| slot.token == self.token)
        {
            pending.remove(self.correlation_id);
        }
    }
}

/// Exclusive use of the dispatch queue; hands it back when the loop ends
struct QueueLease {
    inner: Arc<HubInner>,
    rx: Option<mpsc::UnboundedReceiver<AgentMessage>>,
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(rx) = self.rx.take() {
            *lock(&self.inner.queue_rx) = Some(rx);
        }
    }
}

// Poisoning only means another thread panicked mid-update; every table here
// stays structurally valid, so keep going with the data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
