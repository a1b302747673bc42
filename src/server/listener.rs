//! TCP listener and server main loop

use super::connection::{
    client_writer_task, create_welcome_message, parse_client_message, read_message,
    ClientConnection, ConnectionContext,
};
use crate::assistant::{KeywordResponder, Responder};
use crate::auth::{IdentityProvider, TokenTable};
use crate::config::Config;
use crate::engine::{self, Command, Engine};
use crate::protocol::ServerMessage;
use crate::store::{SessionStore, WriteBehind};
use anyhow::Result;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

/// The routing server: engine task, write-behind queue, and accept loop
pub struct Server {
    config: Config,
    store: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityProvider>,
    responder: Arc<dyn Responder>,
}

impl Server {
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityProvider>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            config,
            store,
            identities,
            responder,
        }
    }

    /// Server wired with the configured store, token table and keyword responder
    pub fn from_config(config: Config) -> Self {
        let store = crate::store::open(&config.store);
        let identities = Arc::new(TokenTable::new(&config.attendants));
        let responder = Arc::new(KeywordResponder::new(&config.assistant));
        Self::new(config, store, identities, responder)
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.config.server.listen).await?)
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(&self, listener: TcpListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let (persist, writer_handle) = WriteBehind::spawn(Arc::clone(&self.store));
        let engine = Engine::new(persist, self.config.limits.clone());
        let (engine_handle, engine_task) = engine::spawn(engine);

        let ctx = ConnectionContext {
            engine: engine_handle.clone(),
            store: Arc::clone(&self.store),
            identities: Arc::clone(&self.identities),
            responder: Arc::clone(&self.responder),
            limits: self.config.limits.clone(),
            max_frame_bytes: self.config.server.max_frame_bytes,
            outbound_queue: self.config.server.outbound_queue,
        };

        // Main server loop
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Accepted connection from {}", addr);
                            let ctx = ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, ctx).await {
                                    tracing::error!("Client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        // The engine owns the write-behind sender; once it stops, queued
        // writes drain and the writer finishes.
        engine_handle.shutdown().await;
        if let Err(e) = engine_task.await {
            tracing::error!("Engine task failed: {}", e);
        }
        if let Err(e) = writer_handle.await {
            tracing::error!("Persistence writer failed: {}", e);
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Handle a single connection
async fn handle_client(stream: TcpStream, ctx: ConnectionContext) -> Result<()> {
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::channel::<ServerMessage>(ctx.outbound_queue);
    let mut client = ClientConnection::new(Uuid::new_v4(), tx.clone());
    let connection_id = client.id();

    tracing::info!("Client connected: {}", connection_id);

    let writer_handle = tokio::spawn(client_writer_task(writer, rx));

    client.send(create_welcome_message(connection_id)).await?;
    ctx.engine
        .send(Command::Connected {
            connection_id,
            outbox: tx,
        })
        .await?;

    // Read and process messages
    loop {
        match read_message(&mut reader, ctx.max_frame_bytes).await {
            Ok(Some(bytes)) => match parse_client_message(&bytes) {
                Ok(msg) => {
                    if let Err(e) = client.process(msg, &ctx).await {
                        tracing::error!("Failed to process message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(connection = %connection_id, "Dropping undecodable frame: {}", e);
                }
            },
            Ok(None) => {
                tracing::info!("Client disconnected: {}", connection_id);
                break;
            }
            Err(e) => {
                tracing::error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    if let Err(e) = ctx
        .engine
        .send(Command::Disconnected { connection_id })
        .await
    {
        tracing::debug!("Disconnect not delivered: {}", e);
    }

    writer_handle.abort();

    tracing::info!("Client handler finished: {}", connection_id);

    Ok(())
}
