//! WebSocket listener for the status hub

use super::{ConnectionId, Hub};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

/// Bind `addr` and serve hub connections until the task is dropped
pub async fn serve(hub: Arc<Hub>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status hub on {}", addr))?;
    tracing::info!("Status hub listening on ws://{}", addr);
    serve_listener(hub, listener).await
}

/// Serve hub connections on an already bound listener
pub async fn serve_listener(hub: Arc<Hub>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("Failed to accept hub connection")?;

        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(hub, stream, peer).await {
                tracing::debug!("Hub connection from {} ended: {:#}", peer, e);
            }
        });
    }
}

async fn handle_connection(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut sink, mut source) = ws.split();

    let (id, mut outbound) = hub.register();
    tracing::info!("Hub client {} connected as {}", peer, id);

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let result = read_loop(&hub, id, &mut source).await;

    hub.unregister(id);
    writer.abort();
    tracing::info!("Hub client {} disconnected", peer);
    result
}

async fn read_loop<S>(hub: &Hub, id: ConnectionId, source: &mut S) -> Result<()>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = source.next().await {
        match message.context("Failed to read from hub client")? {
            Message::Text(text) => {
                tracing::trace!("Relaying message from {}", id);
                hub.relay(&text, id);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
