//! End-to-end behaviour of the collaboration hub through its public API

use agora_core::{AgoraError, HubConfig, Result};
use agora_hub::{
    AgentMessage, CollaborationHub, MessageHandler, MessageType, SubscriptionFilter,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn hub() -> CollaborationHub {
    CollaborationHub::with_config(
        HubConfig::default().with_poll_interval(Duration::from_millis(10)),
    )
}

/// A developer agent: answers delegations with an estimate and remembers
/// every broadcast it saw
struct Developer {
    name: String,
    hub: CollaborationHub,
    broadcasts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessageHandler for Developer {
    async fn handle(&self, message: AgentMessage) -> Result<()> {
        match message.msg_type {
            MessageType::Delegation => {
                let task = message.content["task"].as_str().unwrap_or_default();
                let points = task.len() % 8 + 1;
                self.hub.send(AgentMessage::reply_to(
                    &message,
                    self.name.clone(),
                    json!({ "estimate": points, "by": self.name }),
                ));
                Ok(())
            }
            MessageType::Notification if message.is_broadcast() => {
                self.broadcasts.lock().unwrap().push(message.subject);
                Ok(())
            }
            _ => Err(AgoraError::Other(format!(
                "{} cannot handle {}",
                self.name, message.msg_type
            ))),
        }
    }
}

#[tokio::test]
async fn test_team_round_trip() {
    init_tracing();
    let hub = hub();

    let mut seen = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let broadcasts = Arc::new(Mutex::new(Vec::new()));
        seen.push(broadcasts.clone());
        hub.register_agent(
            name,
            Developer {
                name: name.to_string(),
                hub: hub.clone(),
                broadcasts,
            },
            SubscriptionFilter::all().with_types([
                MessageType::Delegation,
                MessageType::Notification,
            ]),
        );
    }
    let dispatch = hub.spawn().unwrap();

    for dev in ["alice", "bob", "carol"] {
        let reply = hub
            .delegate(
                "lead",
                dev,
                "write parser",
                json!({"story": "AG-12"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply.sender, dev);
        assert_eq!(reply.content["by"], dev);
        assert_eq!(reply.msg_type, MessageType::Response);
    }

    // alice announces; bob and carol hear it, alice does not
    hub.broadcast("alice", "parser merged", Value::Null);
    let ack = hub
        .delegate("lead", "carol", "ack", Value::Null, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(ack.sender, "carol");

    assert!(seen[0].lock().unwrap().is_empty());
    assert_eq!(*seen[1].lock().unwrap(), vec!["parser merged".to_string()]);
    assert_eq!(*seen[2].lock().unwrap(), vec!["parser merged".to_string()]);

    let stats = hub.get_stats();
    assert_eq!(stats.registered_agents, 3);
    assert_eq!(stats.pending_requests, 0);
    assert_eq!(stats.message_types[&MessageType::Delegation], 4);
    assert_eq!(stats.message_types[&MessageType::Response], 4);
    assert_eq!(stats.message_types[&MessageType::Notification], 1);
    assert_eq!(stats.handler_failures, 0);

    let carol_history = hub.get_history(Some("carol"), None, 100);
    assert_eq!(carol_history.len(), 4);

    hub.stop();
    dispatch.await.unwrap();
}

#[tokio::test]
async fn test_unhandled_type_surfaces_on_failure_channel_only() {
    init_tracing();
    let hub = hub();
    let mut failures = hub.failures();
    hub.register_agent(
        "alice",
        Developer {
            name: "alice".to_string(),
            hub: hub.clone(),
            broadcasts: Arc::new(Mutex::new(Vec::new())),
        },
        SubscriptionFilter::all(),
    );
    let _dispatch = hub.spawn().unwrap();

    // Fire-and-forget never reports back to the sender
    let request = AgentMessage::request("lead", "alice", "status?", Value::Null);
    let request_id = request.id.clone();
    hub.send(request);

    let failure = tokio::time::timeout(Duration::from_secs(2), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.agent_id, "alice");
    assert_eq!(failure.message_id, request_id);
    assert!(failure.reason.contains("cannot handle request"));

    // A waiting sender sees only its own timeout
    let err = hub
        .send_and_wait(
            AgentMessage::request("lead", "alice", "status?", Value::Null),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::Timeout { .. }));
    assert_eq!(hub.get_stats().pending_requests, 0);
    hub.stop();
}

#[tokio::test]
async fn test_start_runs_on_current_task_until_stopped() {
    init_tracing();
    let hub = hub();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    hub.register_agent(
        "scribe",
        move |message: AgentMessage| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message.subject);
                Ok::<(), AgoraError>(())
            }
        },
        SubscriptionFilter::all(),
    );
    hub.send(AgentMessage::notification("lead", "scribe", "minutes", Value::Null));

    let stopper = hub.clone();
    let (started, received) = tokio::join!(hub.start(), async move {
        let subject = rx.recv().await;
        stopper.stop();
        subject
    });

    started.unwrap();
    assert_eq!(received.as_deref(), Some("minutes"));
    assert!(!hub.is_running());
}
