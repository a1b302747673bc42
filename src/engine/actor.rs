//! The engine task: one loop, one command at a time

use super::{Command, Engine};
use crate::session::Session;
use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Command queue depth; connection tasks wait when it is full.
pub const COMMAND_CAPACITY: usize = 1024;

/// Cloneable handle for feeding the engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| anyhow!("Engine is not running"))
    }

    /// Snapshot of a cached session.
    pub async fn inspect(&self, session_id: &str) -> Result<Option<Session>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Inspect {
            session_id: session_id.to_string(),
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| anyhow!("Engine dropped inspect request"))
    }

    /// Stop the loop after the commands already queued.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown).await;
    }
}

/// Move `engine` onto its own task.
pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(COMMAND_CAPACITY);
    let handle = tokio::spawn(run(engine, receiver));
    (EngineHandle { sender }, handle)
}

async fn run(mut engine: Engine, mut receiver: mpsc::Receiver<Command>) {
    tracing::debug!("Engine loop started");
    while let Some(command) = receiver.recv().await {
        if matches!(command, Command::Shutdown) {
            tracing::info!("Engine shutdown requested");
            break;
        }
        engine.handle(command);
    }
    tracing::info!("Engine loop finished");
}
