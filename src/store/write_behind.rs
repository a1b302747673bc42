//! Write-behind persistence queue.
//!
//! The engine enqueues [`StoreOp`]s and moves on. A dispatcher task fans
//! them out to one worker per session, so writes for a session are applied
//! in order while a slow write for one session never holds up another.
//! Once a session is closed its later writes are dropped.

use super::{SessionStore, StorageResult};
use crate::session::{ChatMessage, ClientData, HistoryTurn, Session, SessionStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// One pending store write
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Upsert(Session),
    AppendMessage {
        session_id: String,
        message: ChatMessage,
    },
    AppendHistory {
        session_id: String,
        turn: HistoryTurn,
    },
    UpdateProfile {
        session_id: String,
        client_data: ClientData,
    },
    UpdateAssignment {
        session_id: String,
        assigned_to: Option<String>,
        status: SessionStatus,
    },
    MarkClosed {
        session_id: String,
    },
}

impl StoreOp {
    pub fn session_id(&self) -> &str {
        match self {
            StoreOp::Upsert(session) => &session.session_id,
            StoreOp::AppendMessage { session_id, .. }
            | StoreOp::AppendHistory { session_id, .. }
            | StoreOp::UpdateProfile { session_id, .. }
            | StoreOp::UpdateAssignment { session_id, .. }
            | StoreOp::MarkClosed { session_id } => session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::Upsert(_) => "upsert",
            StoreOp::AppendMessage { .. } => "append_message",
            StoreOp::AppendHistory { .. } => "append_history",
            StoreOp::UpdateProfile { .. } => "update_profile",
            StoreOp::UpdateAssignment { .. } => "update_assignment",
            StoreOp::MarkClosed { .. } => "mark_closed",
        }
    }

    /// Apply this write to a store.
    pub async fn apply(&self, store: &dyn SessionStore) -> StorageResult<()> {
        match self {
            StoreOp::Upsert(session) => store.upsert(session).await,
            StoreOp::AppendMessage {
                session_id,
                message,
            } => store.append_message(session_id, message).await,
            StoreOp::AppendHistory { session_id, turn } => {
                store.append_history(session_id, turn).await
            }
            StoreOp::UpdateProfile {
                session_id,
                client_data,
            } => store.update_profile(session_id, client_data).await,
            StoreOp::UpdateAssignment {
                session_id,
                assigned_to,
                status,
            } => {
                store
                    .update_assignment(session_id, assigned_to.as_deref(), *status)
                    .await
            }
            StoreOp::MarkClosed { session_id } => store.mark_closed(session_id).await,
        }
    }
}

/// Sending side of the queue, owned by the engine
#[derive(Debug, Clone)]
pub struct WriteBehind {
    sender: mpsc::UnboundedSender<StoreOp>,
}

impl WriteBehind {
    /// Start draining into `store`.
    ///
    /// The returned task finishes once every `WriteBehind` clone is dropped
    /// and all queued writes have been attempted.
    pub fn spawn(store: Arc<dyn SessionStore>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch_loop(store, receiver, WORKER_IDLE));
        (Self { sender }, handle)
    }

    /// A queue nobody drains; the receiver lets tests inspect what was enqueued.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<StoreOp>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a write without waiting for it.
    pub fn enqueue(&self, op: StoreOp) {
        if let Err(e) = self.sender.send(op) {
            tracing::warn!(
                session_id = %e.0.session_id(),
                op = e.0.name(),
                "Persistence queue closed, dropping write"
            );
        }
    }
}

/// How long a session worker waits for more writes before exiting.
const WORKER_IDLE: Duration = Duration::from_secs(60);

/// A session's queue and the worker draining it
struct Lane {
    sender: mpsc::UnboundedSender<StoreOp>,
    worker: JoinHandle<()>,
}

impl Lane {
    fn start(store: &Arc<dyn SessionStore>, session_id: &str, idle: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(session_worker(
            Arc::clone(store),
            session_id.to_string(),
            receiver,
            idle,
        ));
        Self { sender, worker }
    }
}

async fn dispatch_loop(
    store: Arc<dyn SessionStore>,
    mut receiver: mpsc::UnboundedReceiver<StoreOp>,
    idle: Duration,
) {
    // A lane lives while its session sees writes; idle workers exit and
    // their lane is replaced on the next write. Closed ids are remembered
    // so nothing is written after a close.
    let mut lanes: HashMap<String, Lane> = HashMap::new();
    let mut closed: HashSet<String> = HashSet::new();

    while let Some(op) = receiver.recv().await {
        let session_id = op.session_id().to_string();
        if closed.contains(&session_id) {
            tracing::warn!(session_id = %session_id, op = op.name(), "Dropping write for closed session");
            continue;
        }
        if matches!(op, StoreOp::MarkClosed { .. }) {
            closed.insert(session_id.clone());
        }

        let rejected = match lanes.get(&session_id) {
            Some(lane) => lane.sender.send(op).err().map(|e| e.0),
            None => Some(op),
        };
        if let Some(op) = rejected {
            // The old worker may still be applying its last writes; wait so
            // the new one cannot overtake it.
            if let Some(stale) = lanes.remove(&session_id) {
                let _ = stale.worker.await;
            }
            let lane = Lane::start(&store, &session_id, idle);
            if lane.sender.send(op).is_err() {
                tracing::error!(session_id = %session_id, "Session writer exited early");
            }
            lanes.insert(session_id, lane);
        }

        lanes.retain(|_, lane| !lane.worker.is_finished());
    }

    for (_, lane) in lanes.drain() {
        drop(lane.sender);
        let _ = lane.worker.await;
    }
    tracing::debug!("Write-behind queue drained");
}

async fn session_worker(
    store: Arc<dyn SessionStore>,
    session_id: String,
    mut receiver: mpsc::UnboundedReceiver<StoreOp>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, receiver.recv()).await {
            Ok(Some(op)) => apply_logged(store.as_ref(), &session_id, &op).await,
            Ok(None) => break,
            Err(_) => {
                // Refuse new writes, then finish whatever already arrived.
                receiver.close();
                while let Some(op) = receiver.recv().await {
                    apply_logged(store.as_ref(), &session_id, &op).await;
                }
                tracing::debug!(session_id = %session_id, "Idle session writer exiting");
                break;
            }
        }
    }
}

async fn apply_logged(store: &dyn SessionStore, session_id: &str, op: &StoreOp) {
    if let Err(e) = op.apply(store).await {
        tracing::warn!(
            session_id = %session_id,
            op = op.name(),
            error = %e,
            "Persistence write failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;

    #[tokio::test]
    async fn test_writes_apply_in_order_per_session() {
        let store = Arc::new(MemorySessionStore::new());
        let (queue, handle) = WriteBehind::spawn(store.clone());

        queue.enqueue(StoreOp::Upsert(Session::new("s1")));
        for i in 0..20 {
            queue.enqueue(StoreOp::AppendMessage {
                session_id: "s1".into(),
                message: ChatMessage::visitor(format!("m{}", i)),
            });
        }
        queue.enqueue(StoreOp::UpdateAssignment {
            session_id: "s1".into(),
            assigned_to: Some("bob".into()),
            status: SessionStatus::InProgress,
        });
        queue.enqueue(StoreOp::MarkClosed {
            session_id: "s1".into(),
        });

        drop(queue);
        handle.await.unwrap();

        let session = store.get("s1").await.unwrap();
        let contents: Vec<_> = session.messages.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.assigned_to.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_queue() {
        let store = Arc::new(MemorySessionStore::new());
        let (queue, handle) = WriteBehind::spawn(store.clone());

        // No record yet: this write fails and is only logged.
        queue.enqueue(StoreOp::AppendMessage {
            session_id: "ghost".into(),
            message: ChatMessage::visitor("lost"),
        });
        queue.enqueue(StoreOp::Upsert(Session::new("ghost")));
        queue.enqueue(StoreOp::AppendMessage {
            session_id: "ghost".into(),
            message: ChatMessage::visitor("kept"),
        });

        drop(queue);
        handle.await.unwrap();

        let session = store.get("ghost").await.unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "kept");
    }

    #[tokio::test]
    async fn test_detached_queue_exposes_ops() {
        let (queue, mut ops) = WriteBehind::detached();
        queue.enqueue(StoreOp::MarkClosed {
            session_id: "s1".into(),
        });
        let op = ops.try_recv().unwrap();
        assert_eq!(op.session_id(), "s1");
        assert_eq!(op.name(), "mark_closed");
    }

    #[tokio::test]
    async fn test_writes_after_close_are_dropped() {
        let store = Arc::new(MemorySessionStore::new());
        let (queue, handle) = WriteBehind::spawn(store.clone());

        queue.enqueue(StoreOp::Upsert(Session::new("s1")));
        queue.enqueue(StoreOp::UpdateAssignment {
            session_id: "s1".into(),
            assigned_to: Some("bob".into()),
            status: SessionStatus::InProgress,
        });
        queue.enqueue(StoreOp::MarkClosed {
            session_id: "s1".into(),
        });
        queue.enqueue(StoreOp::UpdateAssignment {
            session_id: "s1".into(),
            assigned_to: Some("dave".into()),
            status: SessionStatus::InProgress,
        });
        queue.enqueue(StoreOp::AppendHistory {
            session_id: "s1".into(),
            turn: HistoryTurn::new(crate::session::TurnRole::User, "late"),
        });

        drop(queue);
        handle.await.unwrap();

        let session = store.get("s1").await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.assigned_to.as_deref(), Some("bob"));
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_idle_worker_is_replaced_in_order() {
        let store = Arc::new(MemorySessionStore::new());
        let (sender, receiver) = mpsc::unbounded_channel();
        let store_dyn: Arc<dyn SessionStore> = store.clone();
        let handle = tokio::spawn(dispatch_loop(
            store_dyn,
            receiver,
            Duration::from_millis(10),
        ));

        sender.send(StoreOp::Upsert(Session::new("s1"))).unwrap();
        sender
            .send(StoreOp::AppendMessage {
                session_id: "s1".into(),
                message: ChatMessage::visitor("before"),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        for i in 0..5 {
            sender
                .send(StoreOp::AppendMessage {
                    session_id: "s1".into(),
                    message: ChatMessage::visitor(format!("after{}", i)),
                })
                .unwrap();
        }

        drop(sender);
        handle.await.unwrap();

        let contents: Vec<_> = store
            .get("s1")
            .await
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            contents,
            vec!["before", "after0", "after1", "after2", "after3", "after4"]
        );
    }
}
