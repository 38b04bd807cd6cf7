//! TCP front end – one JSON document per line.
//!
//! ## Connection contract
//!
//! | Step | Client sends            | Server sends                       |
//! |------|-------------------------|------------------------------------|
//! | 1    | `reconnect`             | `welcome`; pushes start after it   |
//! | 2..  | any [`ClientRequest`]   | the matching reply                 |
//! | any  | *(nothing)*             | `operation` for every new op       |
//!
//! Undecodable lines get an `error` reply; the connection stays open.  When
//! the socket closes the session is marked disconnected but kept, so the
//! client can resume it with the same id.

use crate::config::ServerConfig;
use crate::identity::ClientId;
use crate::message::Operation;
use crate::protocol::{encode_frame, ClientRequest, ServerMessage};
use crate::service::SceneService;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::Instrument;

pub struct SceneServer {
    config: ServerConfig,
    service: Arc<Mutex<SceneService>>,
}

impl SceneServer {
    pub fn new(config: ServerConfig, service: Arc<Mutex<SceneService>>) -> Self {
        Self { config, service }
    }

    /// Bind the configured address and serve until SIGINT.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen))?;
        info!("SceneServer listening on {}", listener.local_addr()?);

        self.serve_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            info!("SceneServer shutting down (SIGINT)");
        })
        .await
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = accept_loop(listener, self.service.clone()) => result,
            _ = shutdown => Ok(()),
        }
    }
}

async fn accept_loop(listener: TcpListener, service: Arc<Mutex<SceneService>>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let service = service.clone();
        tokio::spawn(
            async move {
                debug!("Connection opened");
                if let Err(e) = handle_connection(stream, service).await {
                    warn!("Connection error: {:#}", e);
                }
                debug!("Connection closed");
            }
            .instrument(tracing::info_span!("connection", peer = %peer)),
        );
    }
}

// ---------------------------------------------------------------------------
// Per-connection loop
// ---------------------------------------------------------------------------

async fn handle_connection(stream: TcpStream, service: Arc<Mutex<SceneService>>) -> Result<()> {
    let peer: Option<SocketAddr> = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut pushes: Option<broadcast::Receiver<Operation>> = None;
    let mut client: Option<ClientId> = None;

    let result = async {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("read failed")? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = match ClientRequest::decode(&line) {
                        Ok(request) => {
                            let mut svc = service.lock();
                            let subscribe =
                                pushes.is_none() && matches!(request, ClientRequest::Reconnect { .. });
                            let reply = svc.handle(request);
                            if subscribe {
                                pushes = Some(svc.subscribe());
                            }
                            if let ServerMessage::Welcome(welcome) = &reply {
                                client = Some(welcome.client_id.clone());
                            }
                            reply
                        }
                        Err(e) => ServerMessage::error(e.to_string()),
                    };
                    write_frame(&mut writer, &reply).await?;
                }
                push = next_push(&mut pushes) => match push {
                    Ok(operation) => {
                        write_frame(&mut writer, &ServerMessage::Operation { operation }).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // The client sees the seq gap and recovers it.
                        warn!("{:?} lagged by {} push(es)", peer, skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Some(id) = client {
        service.lock().disconnect(&id);
    }
    result
}

/// Next push, or never when the connection has not said `reconnect` yet.
async fn next_push(
    pushes: &mut Option<broadcast::Receiver<Operation>>,
) -> Result<Operation, RecvError> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_frame<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let frame = encode_frame(message).context("Failed to serialise reply")?;
    writer.write_all(&frame).await.context("write failed")?;
    Ok(())
}
