//! agora CLI - in-process agent coordination
//!
//! Usage:
//!   agora init [PATH]            Write .agora/config.toml with defaults
//!   agora config [PATH]          Print the effective configuration
//!   agora decide --vote A=approve ...
//!                                Open a decision and apply votes to it
//!   agora demo                   Run reviewer agents over a live hub

use agora_consensus::{
    ConsensusManager, ConsensusStrategy, Decision, DecisionProposal, LeaderConsensus, VoteChoice,
    VotingConsensus, WeightedConsensus,
};
use agora_core::{AgoraConfig, AgoraError};
use agora_hub::{
    AgentMessage, CollaborationHub, HubStats, MessageHandler, MessagePriority, MessageType,
    SubscriptionFilter,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const COORDINATOR: &str = "coordinator";

#[derive(Parser)]
#[command(name = "agora")]
#[command(author, version, about = "In-process agent coordination: message hub and consensus")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .agora/config.toml
    Init {
        /// Root directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Root directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Open a decision, apply votes in order, and print the outcome
    Decide(DecideArgs),

    /// Start a hub with reviewer agents, delegate a task, and put a
    /// proposal to a vote
    Demo {
        /// Number of reviewer agents
        #[arg(short = 'n', long, default_value = "3")]
        agents: usize,

        /// Delegation and voting timeout in milliseconds
        /// (defaults to hub.delegation_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Directory holding .agora/config.toml
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct DecideArgs {
    /// What is being decided
    #[arg(long, default_value = "Proposal")]
    subject: String,

    #[arg(long, value_enum, default_value = "voting")]
    strategy: StrategyKind,

    /// Eligible voter (repeatable; none means anyone may vote)
    #[arg(long = "voter", value_name = "AGENT")]
    voters: Vec<String>,

    /// Vote to cast, in order (repeatable)
    #[arg(long = "vote", value_name = "AGENT=CHOICE[:CONFIDENCE]")]
    votes: Vec<String>,

    /// Approval threshold (defaults to consensus.threshold)
    #[arg(long)]
    threshold: Option<f64>,

    /// Wait for every listed voter (voting strategy; defaults to
    /// consensus.require_all_votes, `--require-all false` turns it off)
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    require_all: Option<bool>,

    /// Deciding agent (leader strategy)
    #[arg(long)]
    leader: Option<String>,

    /// Voter weight (weighted strategy, repeatable)
    #[arg(long = "weight", value_name = "AGENT=WEIGHT")]
    weights: Vec<String>,

    /// Directory holding .agora/config.toml
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    Voting,
    Leader,
    Weighted,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Config { path } => cmd_config(&path),
        Commands::Decide(args) => cmd_decide(args),
        Commands::Demo {
            agents,
            timeout_ms,
            root,
        } => cmd_demo(agents, timeout_ms, &root).await,
    }
}

fn load_config(root: &Path) -> Result<AgoraConfig> {
    AgoraConfig::load_or_default(root)
        .with_context(|| format!("Failed to load configuration from {:?}", root))
}

fn cmd_init(path: &Path) -> Result<()> {
    info!("Initializing agora in {:?}", path);

    let config_file = path.join(".agora/config.toml");
    if config_file.exists() {
        bail!("{:?} already exists", config_file);
    }
    AgoraConfig::write_default(path).context("Failed to write default configuration")?;

    println!("Initialized agora in {:?}", path);
    println!("Created:");
    println!("  .agora/config.toml");
    Ok(())
}

fn cmd_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_decide(args: DecideArgs) -> Result<()> {
    let config = load_config(&args.root)?;
    let decision = run_decision(&args, &config, |line| println!("{}", line))?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Open the decision described by `args`, cast its votes, and return the
/// final state. Progress lines go to `report`.
fn run_decision(
    args: &DecideArgs,
    config: &AgoraConfig,
    mut report: impl FnMut(String),
) -> Result<Decision> {
    let strategy = build_strategy(args, config)?;
    let votes = args
        .votes
        .iter()
        .map(|input| parse_vote(input))
        .collect::<Result<Vec<_>>>()?;

    let manager = ConsensusManager::from_config(&config.consensus);
    let mut transitions = manager.subscribe();

    let decision = manager.create_decision(
        DecisionProposal::new(&args.subject, "Opened from the command line", "cli")
            .with_voters(args.voters.clone())
            .with_shared_strategy(Arc::clone(&strategy)),
    );
    report(format!(
        "Opened decision {} ({} strategy)",
        decision.id,
        strategy.name()
    ));

    for (voter, choice, confidence) in votes {
        match manager.vote_with(&decision.id, &voter, choice, confidence, None) {
            Ok(_) => report(format!("  {} votes {} ({:.2})", voter, choice, confidence)),
            Err(err) => report(format!("  {} refused: {}", voter, err)),
        }

        while let Ok(transition) = transitions.try_recv() {
            let result = transition
                .result
                .map(|r| format!(" ({})", r))
                .unwrap_or_default();
            report(format!("    {} -> {}{}", transition.from, transition.to, result));
        }
    }

    manager
        .get_decision(&decision.id)
        .ok_or_else(|| anyhow!("Decision {} was evicted before it could be shown", decision.id))
}

fn build_strategy(args: &DecideArgs, config: &AgoraConfig) -> Result<Arc<dyn ConsensusStrategy>> {
    let threshold = args.threshold.unwrap_or(config.consensus.threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("--threshold must be within [0, 1], got {}", threshold);
    }

    let strategy: Arc<dyn ConsensusStrategy> = match args.strategy {
        StrategyKind::Voting => Arc::new(VotingConsensus::new(
            threshold,
            require_all_votes(args, config),
        )),
        StrategyKind::Leader => {
            let leader = args
                .leader
                .clone()
                .context("--leader is required for the leader strategy")?;
            Arc::new(LeaderConsensus::new(leader))
        }
        StrategyKind::Weighted => {
            let weights = args
                .weights
                .iter()
                .map(|input| parse_weight(input))
                .collect::<Result<HashMap<_, _>>>()?;
            Arc::new(WeightedConsensus::new(weights, threshold))
        }
    };
    Ok(strategy)
}

/// The command line flag wins over the config file in either direction
fn require_all_votes(args: &DecideArgs, config: &AgoraConfig) -> bool {
    args.require_all.unwrap_or(config.consensus.require_all_votes)
}

/// Parse `AGENT=CHOICE[:CONFIDENCE]`
fn parse_vote(input: &str) -> Result<(String, VoteChoice, f64)> {
    let (voter, rest) = input
        .split_once('=')
        .with_context(|| format!("Invalid vote '{}': expected AGENT=CHOICE[:CONFIDENCE]", input))?;
    if voter.is_empty() {
        bail!("Invalid vote '{}': missing agent", input);
    }

    let (choice, confidence) = match rest.split_once(':') {
        Some((choice, confidence)) => {
            let confidence: f64 = confidence
                .parse()
                .with_context(|| format!("Invalid confidence in vote '{}'", input))?;
            (choice, confidence)
        }
        None => (rest, 1.0),
    };
    let choice: VoteChoice = choice.parse().map_err(anyhow::Error::msg)?;

    Ok((voter.to_string(), choice, confidence))
}

/// Parse `AGENT=WEIGHT`
fn parse_weight(input: &str) -> Result<(String, f64)> {
    let (voter, weight) = input
        .split_once('=')
        .with_context(|| format!("Invalid weight '{}': expected AGENT=WEIGHT", input))?;
    let weight: f64 = weight
        .parse()
        .with_context(|| format!("Invalid weight '{}'", input))?;
    if !weight.is_finite() || weight < 0.0 {
        bail!("Invalid weight '{}': must be a non-negative number", input);
    }
    Ok((voter.to_string(), weight))
}

/// A reviewer answers delegated reviews and votes on proposals put to it
struct Reviewer {
    id: String,
    index: usize,
    hub: CollaborationHub,
    consensus: ConsensusManager,
}

impl Reviewer {
    fn opinion(&self) -> (VoteChoice, f64) {
        // Every third reviewer is sceptical
        if self.index % 3 == 2 {
            (VoteChoice::Reject, 0.7)
        } else {
            (VoteChoice::Approve, 0.9)
        }
    }
}

#[async_trait]
impl MessageHandler for Reviewer {
    async fn handle(&self, message: AgentMessage) -> agora_core::Result<()> {
        match message.msg_type {
            MessageType::Delegation => {
                let task = message.content["task"].as_str().unwrap_or("unnamed task");
                info!("{} picked up '{}'", self.id, task);
                self.hub.send(AgentMessage::reply_to(
                    &message,
                    self.id.clone(),
                    json!({
                        "reviewer": self.id,
                        "task": task,
                        "verdict": "looks good",
                    }),
                ));
                Ok(())
            }
            MessageType::Consensus => {
                let decision_id = message.content["decision_id"].as_str().ok_or_else(|| {
                    AgoraError::Other(format!("proposal {} has no decision_id", message.id))
                })?;
                let (choice, confidence) = self.opinion();
                let vote = self.consensus.vote_with(
                    decision_id,
                    &self.id,
                    choice,
                    confidence,
                    Some(format!("{} read '{}'", self.id, message.subject)),
                )?;

                self.hub.send(AgentMessage::notification(
                    self.id.clone(),
                    message.sender.clone(),
                    format!("Voted on {}", message.subject),
                    json!({ "decision_id": decision_id, "choice": vote.choice }),
                ));
                Ok(())
            }
            other => {
                debug!("{} ignoring {} message {}", self.id, other, message.id);
                Ok(())
            }
        }
    }
}

struct DemoOutcome {
    delegation_reply: AgentMessage,
    decision: Decision,
    stats: HubStats,
}

async fn cmd_demo(agents: usize, timeout_ms: Option<u64>, root: &Path) -> Result<()> {
    let config = load_config(root)?;
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.hub.delegation_timeout());

    let outcome = run_demo(agents, timeout, &config).await?;

    println!(
        "Delegation answered by {}: {}",
        outcome.delegation_reply.sender, outcome.delegation_reply.content
    );
    println!("\nHub stats:");
    println!("{}", serde_json::to_string_pretty(&outcome.stats)?);
    println!("\nDecision:");
    println!("{}", serde_json::to_string_pretty(&outcome.decision)?);
    Ok(())
}

async fn run_demo(agents: usize, timeout: Duration, config: &AgoraConfig) -> Result<DemoOutcome> {
    if agents == 0 {
        bail!("--agents must be at least 1");
    }

    let hub = CollaborationHub::with_config(config.hub.clone());
    let consensus = ConsensusManager::from_config(&config.consensus);

    let reviewers: Vec<String> = (0..agents).map(|i| format!("reviewer-{}", i)).collect();
    for (index, id) in reviewers.iter().enumerate() {
        hub.register_agent(
            id.clone(),
            Reviewer {
                id: id.clone(),
                index,
                hub: hub.clone(),
                consensus: consensus.clone(),
            },
            SubscriptionFilter::all().with_types([MessageType::Delegation, MessageType::Consensus]),
        );
    }
    hub.register_agent(
        COORDINATOR,
        |message: AgentMessage| async move {
            info!("{} <- {}: {}", COORDINATOR, message.sender, message.subject);
            Ok::<(), AgoraError>(())
        },
        SubscriptionFilter::all(),
    );

    let mut failures = hub.failures();
    let failure_log = tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) => warn!(
                    "Delivery of {} to {} failed: {}",
                    failure.message_id, failure.agent_id, failure.reason
                ),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} delivery failures", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let dispatch = hub.spawn()?;

    let delegation_reply = hub
        .delegate(
            COORDINATOR,
            reviewers[0].as_str(),
            "review PR #42",
            json!({ "files": ["crates/agora-hub/src/hub.rs"] }),
            timeout,
        )
        .await
        .context("Delegated review was not answered")?;

    let mut transitions = consensus.subscribe();
    let decision = consensus.create_decision(
        DecisionProposal::new("Merge PR #42", "Reviewers vote on merging", COORDINATOR)
            .with_voters(reviewers.iter().cloned()),
    );
    let decision_id = decision.id.clone();

    hub.broadcast_with(
        COORDINATOR,
        format!("Vote: {}", decision.subject),
        json!({ "decision_id": decision_id }),
        MessageType::Consensus,
        MessagePriority::High,
    );

    let settled = tokio::time::timeout(timeout, async {
        loop {
            match transitions.recv().await {
                Ok(t) if t.decision_id == decision_id && t.to.is_terminal() => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    if !settled {
        warn!("Decision {} not settled within {:?}", decision_id, timeout);
    }

    hub.stop();
    dispatch.await.context("Dispatch loop panicked")?;
    failure_log.abort();

    let decision = consensus.get_decision(&decision_id).unwrap_or(decision);
    Ok(DemoOutcome {
        delegation_reply,
        decision,
        stats: hub.get_stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_consensus::DecisionStatus;
    use clap::CommandFactory;

    fn decide_args(strategy: StrategyKind) -> DecideArgs {
        DecideArgs {
            subject: "Ship it".to_string(),
            strategy,
            voters: Vec::new(),
            votes: Vec::new(),
            threshold: None,
            require_all: None,
            leader: None,
            weights: Vec::new(),
            root: PathBuf::from("."),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_vote() {
        assert_eq!(
            parse_vote("alice=approve").unwrap(),
            ("alice".to_string(), VoteChoice::Approve, 1.0)
        );
        assert_eq!(
            parse_vote("bob=reject:0.25").unwrap(),
            ("bob".to_string(), VoteChoice::Reject, 0.25)
        );
        assert!(parse_vote("alice").is_err());
        assert!(parse_vote("=approve").is_err());
        assert!(parse_vote("alice=maybe").is_err());
        assert!(parse_vote("alice=approve:lots").is_err());
    }

    #[test]
    fn test_parse_weight() {
        assert_eq!(parse_weight("senior=2.5").unwrap(), ("senior".to_string(), 2.5));
        assert!(parse_weight("senior").is_err());
        assert!(parse_weight("senior=-1").is_err());
    }

    #[test]
    fn test_leader_strategy_needs_leader() {
        let args = decide_args(StrategyKind::Leader);
        assert!(build_strategy(&args, &AgoraConfig::default()).is_err());
    }

    #[test]
    fn test_threshold_is_validated() {
        let mut args = decide_args(StrategyKind::Voting);
        args.threshold = Some(1.5);
        assert!(build_strategy(&args, &AgoraConfig::default()).is_err());
    }

    #[test]
    fn test_require_all_flag_overrides_config() {
        let mut config = AgoraConfig::default();
        config.consensus.require_all_votes = true;
        let mut args = decide_args(StrategyKind::Voting);
        assert!(require_all_votes(&args, &config));

        args.require_all = Some(false);
        assert!(!require_all_votes(&args, &config));

        config.consensus.require_all_votes = false;
        args.require_all = Some(true);
        assert!(require_all_votes(&args, &config));
    }

    #[test]
    fn test_require_all_flag_parses() {
        let parse = |extra: &[&str]| {
            let mut argv = vec!["agora", "decide"];
            argv.extend_from_slice(extra);
            match Cli::try_parse_from(argv).unwrap().command {
                Commands::Decide(args) => args.require_all,
                _ => panic!("Expected the decide command"),
            }
        };
        assert_eq!(parse(&[]), None);
        assert_eq!(parse(&["--require-all"]), Some(true));
        assert_eq!(parse(&["--require-all", "false"]), Some(false));
    }

    #[test]
    fn test_run_decision_weighted() {
        let mut args = decide_args(StrategyKind::Weighted);
        args.voters = vec!["senior".to_string(), "junior".to_string()];
        args.weights = vec!["senior=2".to_string()];
        args.votes = vec!["senior=approve".to_string(), "junior=reject".to_string()];

        let mut lines = Vec::new();
        let decision = run_decision(&args, &AgoraConfig::default(), |l| lines.push(l)).unwrap();

        assert_eq!(decision.status, DecisionStatus::Approved);
        assert_eq!(decision.result, Some(VoteChoice::Approve));
        assert!(lines.iter().any(|l| l.contains("voting -> approved (approve)")));
    }

    #[test]
    fn test_run_decision_reports_refused_votes() {
        let mut args = decide_args(StrategyKind::Voting);
        args.voters = vec!["a".to_string()];
        args.votes = vec!["a=approve".to_string(), "b=approve".to_string()];

        let mut lines = Vec::new();
        let decision = run_decision(&args, &AgoraConfig::default(), |l| lines.push(l)).unwrap();

        assert_eq!(decision.status, DecisionStatus::Approved);
        assert!(lines.iter().any(|l| l.contains("b refused")));
    }

    #[test]
    fn test_init_writes_config_once() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        assert!(dir.path().join(".agora/config.toml").exists());
        assert!(cmd_init(dir.path()).is_err());

        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded, AgoraConfig::default());
    }

    #[tokio::test]
    async fn test_demo_round_trip() {
        let mut config = AgoraConfig::default();
        config.hub.poll_interval_ms = 10;

        let outcome = run_demo(3, Duration::from_secs(5), &config).await.unwrap();

        assert_eq!(outcome.delegation_reply.sender, "reviewer-0");
        assert_eq!(outcome.delegation_reply.content["verdict"], "looks good");
        // 0.9 + 0.9 of three voters clears 0.5
        assert_eq!(outcome.decision.status, DecisionStatus::Approved);
        assert_eq!(outcome.decision.votes.len(), 3);
        assert_eq!(outcome.stats.registered_agents, 4);
        assert_eq!(outcome.stats.message_types[&MessageType::Delegation], 1);
        assert_eq!(outcome.stats.message_types[&MessageType::Consensus], 1);
        assert_eq!(outcome.stats.handler_failures, 0);
        assert_eq!(outcome.stats.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_demo_needs_agents() {
        assert!(run_demo(0, Duration::from_secs(1), &AgoraConfig::default())
            .await
            .is_err());
    }
}
