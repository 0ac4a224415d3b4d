//! Decision lifecycle management

use agora_core::{AgoraError, ConsensusConfig, DecisionStatus, Result, VoteChoice};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::decision::{Decision, DecisionProposal, Vote};
use crate::strategy::{ConsensusStrategy, VotingConsensus};

/// A status change caused by a vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTransition {
    pub decision_id: String,
    pub from: DecisionStatus,
    pub to: DecisionStatus,
    pub result: Option<VoteChoice>,
    pub at: DateTime<Utc>,
}

/// Owns group decisions and applies votes to them
///
/// Like the hub, the manager is a cheap handle; clones share one decision
/// table. Votes on the same decision are serialised by a per-decision lock,
/// so "replace the voter's earlier vote, then re-evaluate" is atomic.
#[derive(Clone)]
pub struct ConsensusManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    default_strategy: Arc<dyn ConsensusStrategy>,
    decision_limit: Option<usize>,
    table: RwLock<DecisionTable>,
    transitions: broadcast::Sender<DecisionTransition>,
}

#[derive(Default)]
struct DecisionTable {
    by_id: HashMap<String, Arc<Mutex<Entry>>>,
    /// Creation order
    order: Vec<String>,
}

struct Entry {
    decision: Decision,
    strategy: Option<Arc<dyn ConsensusStrategy>>,
}

const DEFAULT_EVENT_CAPACITY: usize = 256;

impl ConsensusManager {
    /// Create a manager whose default strategy is a simple majority vote
    pub fn new() -> Self {
        Self::with_strategy(VotingConsensus::default())
    }

    /// Create a manager with a specific default strategy
    pub fn with_strategy(strategy: impl ConsensusStrategy + 'static) -> Self {
        Self::build(Arc::new(strategy), None, DEFAULT_EVENT_CAPACITY)
    }

    /// Create a manager from configuration
    ///
    /// The default strategy is [`VotingConsensus`] with the configured
    /// threshold and `require_all_votes`.
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self::build(
            Arc::new(VotingConsensus::from_config(config)),
            config.decision_limit,
            config.event_channel_capacity,
        )
    }

    fn build(
        default_strategy: Arc<dyn ConsensusStrategy>,
        decision_limit: Option<usize>,
        event_capacity: usize,
    ) -> Self {
        let (transitions, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                default_strategy,
                decision_limit,
                table: RwLock::new(DecisionTable::default()),
                transitions,
            }),
        }
    }

    pub fn default_strategy(&self) -> &dyn ConsensusStrategy {
        self.inner.default_strategy.as_ref()
    }

    /// Open a new decision in `Pending` status
    pub fn create_decision(&self, proposal: DecisionProposal) -> Decision {
        let decision = Decision {
            id: Uuid::new_v4().to_string(),
            subject: proposal.subject,
            description: proposal.description,
            options: proposal.options,
            proposer: proposal.proposer,
            voters: proposal.voters,
            votes: Vec::new(),
            status: DecisionStatus::Pending,
            result: None,
            created_at: Utc::now(),
            deadline: proposal.deadline,
            decided_at: None,
            metadata: proposal.metadata,
        };

        info!(
            "Created decision {} ({}) with {} voters",
            decision.id,
            decision.subject,
            decision.voters.len()
        );

        {
            let mut table = write(&self.inner.table);
            table.order.push(decision.id.clone());
            table.by_id.insert(
                decision.id.clone(),
                Arc::new(Mutex::new(Entry {
                    decision: decision.clone(),
                    strategy: proposal.strategy,
                })),
            );
        }
        self.enforce_limit();

        decision
    }

    /// Cast a full-confidence vote
    pub fn vote(&self, decision_id: &str, voter_id: &str, choice: VoteChoice) -> Result<Vote> {
        self.vote_with(decision_id, voter_id, choice, 1.0, None)
    }

    /// Cast a vote, replacing the voter's earlier vote if any
    ///
    /// Checks, in order: the decision exists, the voter is eligible, the
    /// decision is still open, and `confidence` lies in `[0.0, 1.0]`.
    pub fn vote_with(
        &self,
        decision_id: &str,
        voter_id: &str,
        choice: VoteChoice,
        confidence: f64,
        reasoning: Option<String>,
    ) -> Result<Vote> {
        let entry = self
            .entry(decision_id)
            .ok_or_else(|| AgoraError::DecisionNotFound(decision_id.to_string()))?;

        let (vote, transitions) = {
            let mut entry = lock(&entry);
            let Entry { decision, strategy } = &mut *entry;

            if !decision.is_eligible(voter_id) {
                return Err(AgoraError::Unauthorized {
                    voter: voter_id.to_string(),
                    decision: decision_id.to_string(),
                });
            }
            if decision.status.is_terminal() {
                return Err(AgoraError::AlreadyFinalized {
                    decision: decision_id.to_string(),
                    status: decision.status,
                });
            }
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(AgoraError::InvalidVote(format!(
                    "confidence must be within [0, 1], got {}",
                    confidence
                )));
            }

            let mut vote = Vote::new(voter_id, decision_id, choice, confidence);
            vote.reasoning = reasoning;
            decision.replace_vote(vote.clone());
            debug!("{} voted {} on decision {}", voter_id, choice, decision_id);

            let from = decision.status;
            decision.status = DecisionStatus::Voting;

            let strategy = strategy
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.inner.default_strategy));
            let now = Utc::now();
            let evaluation = strategy.evaluate_at(decision, now);

            // The lifecycle only moves forward
            if decision.status.can_transition_to(evaluation.status) {
                decision.status = evaluation.status;
                decision.result = evaluation.result;
            }
            if decision.status.is_terminal() {
                decision.decided_at = Some(now);
                info!(
                    "Decision {} {} by {} strategy",
                    decision_id,
                    decision.status,
                    strategy.name()
                );
            }

            // A first vote always passes through Voting, even when it
            // settles the decision outright
            let mut transitions = Vec::new();
            if from == DecisionStatus::Pending {
                transitions.push(DecisionTransition {
                    decision_id: decision_id.to_string(),
                    from,
                    to: DecisionStatus::Voting,
                    result: None,
                    at: now,
                });
            }
            if decision.status != DecisionStatus::Voting {
                transitions.push(DecisionTransition {
                    decision_id: decision_id.to_string(),
                    from: DecisionStatus::Voting,
                    to: decision.status,
                    result: decision.result,
                    at: now,
                });
            }
            (vote, transitions)
        };

        let finished = transitions.iter().any(|t| t.to.is_terminal());
        for transition in transitions {
            // Nobody listening is fine
            let _ = self.inner.transitions.send(transition);
        }
        if finished {
            self.enforce_limit();
        }

        Ok(vote)
    }

    /// Snapshot of a decision
    pub fn get_decision(&self, decision_id: &str) -> Option<Decision> {
        self.entry(decision_id)
            .map(|entry| lock(&entry).decision.clone())
    }

    /// Open decisions `voter_id` may vote on and has not voted on yet,
    /// oldest first
    pub fn get_pending_decisions(&self, voter_id: &str) -> Vec<Decision> {
        self.snapshot()
            .into_iter()
            .filter(|d| !d.is_terminal() && d.is_eligible(voter_id) && !d.has_voted(voter_id))
            .collect()
    }

    /// Snapshot of every retained decision, oldest first
    pub fn decisions(&self) -> Vec<Decision> {
        self.snapshot()
    }

    /// Number of retained decisions
    pub fn len(&self) -> usize {
        read(&self.inner.table).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> broadcast::Receiver<DecisionTransition> {
        self.inner.transitions.subscribe()
    }

    fn entry(&self, decision_id: &str) -> Option<Arc<Mutex<Entry>>> {
        read(&self.inner.table).by_id.get(decision_id).cloned()
    }

    fn snapshot(&self) -> Vec<Decision> {
        let entries: Vec<Arc<Mutex<Entry>>> = {
            let table = read(&self.inner.table);
            table
                .order
                .iter()
                .filter_map(|id| table.by_id.get(id).cloned())
                .collect()
        };
        entries
            .iter()
            .map(|entry| lock(entry).decision.clone())
            .collect()
    }

    /// Drop the oldest finished decisions until the table fits the limit.
    /// Open decisions are never evicted, so the table may stay over the
    /// limit while they are outstanding.
    fn enforce_limit(&self) {
        let Some(limit) = self.inner.decision_limit else {
            return;
        };

        let mut table = write(&self.inner.table);
        let mut excess = table.by_id.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }

        let mut evicted = Vec::new();
        for id in &table.order {
            if excess == 0 {
                break;
            }
            let finished = table
                .by_id
                .get(id)
                .is_some_and(|entry| lock(entry).decision.is_terminal());
            if finished {
                evicted.push(id.clone());
                excess -= 1;
            }
        }

        for id in &evicted {
            table.by_id.remove(id);
            debug!("Evicted finished decision {}", id);
        }
        table.order.retain(|id| !evicted.contains(id));
    }
}

impl Default for ConsensusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsensusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusManager")
            .field("default_strategy", &self.inner.default_strategy)
            .field("decisions", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
