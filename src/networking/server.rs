//! WebSocket server.
//!
//! Accepts TCP connections, upgrades them with `tokio-tungstenite` and runs
//! one task per socket. Each task owns a [`Connection`] and a bounded queue
//! of outgoing events.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::connection::{Connection, ConnectionServices};
use super::protocol::ServerEvent;
use crate::storage::config::ServerSettings;

/// Real-time match server.
pub struct ArenaServer {
    settings: ServerSettings,
    services: ConnectionServices,
    running: Arc<AtomicBool>,
}

impl ArenaServer {
    pub fn new(settings: ServerSettings, services: ConnectionServices) -> Self {
        Self {
            settings,
            services,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.settings.bind_addr).await?;
        tracing::info!("Arena server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until stopped.
    pub fn start(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let server = Arc::clone(self);

        tokio::spawn(async move {
            while server.running.load(Ordering::SeqCst) {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let services = server.services.clone();
                        let buffer = server.settings.connection_buffer.max(1);
                        tokio::spawn(serve_socket(stream, peer, services, buffer));
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                }
            }
            tracing::debug!("Arena server stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn serve_socket(stream: TcpStream, peer: SocketAddr, services: ConnectionServices, buffer: usize) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(buffer);
    let mut connection = Connection::new(services, tx);
    tracing::info!("Connection {} opened from {}", connection.id(), peer);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to encode {}: {}", event.as_str(), e);
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => connection.handle_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Connection {} read failed: {}", connection.id(), e);
                        break;
                    }
                }
            }
        }
    }

    connection.close().await;
}
