//! Forwarding local hub traffic to a running hub server

use super::{ConnectionId, Hub};
use anyhow::{Context, Result};
use futures::SinkExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// A running forwarder. Dropping it leaves the task running until the server
/// goes away.
pub struct Forwarder {
    hub: Arc<Hub>,
    id: ConnectionId,
    task: JoinHandle<()>,
}

impl Forwarder {
    /// Stop forwarding once everything already published has been sent
    pub async fn finish(self) {
        self.hub.unregister(self.id);
        if let Err(e) = self.task.await {
            tracing::debug!("Forwarder task ended abnormally: {}", e);
        }
    }
}

/// Connect to the hub server at `url` and forward everything published on
/// `hub` to it. The server relays the messages to its own subscribers.
pub async fn forward_to(hub: Arc<Hub>, url: &str) -> Result<Forwarder> {
    let url = Url::parse(url).with_context(|| format!("Invalid hub URL: {}", url))?;
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to hub server at {}", url))?;

    let (id, mut outbound) = hub.register();
    // Our own handshake is not for the server
    let _ = outbound.recv().await;

    tracing::debug!("Forwarding hub messages to {}", url);
    let task_hub = hub.clone();
    let task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = ws.send(Message::Text(text)).await {
                tracing::warn!("Lost connection to hub server {}: {}", url, e);
                break;
            }
        }
        task_hub.unregister(id);
        let _ = ws.close(None).await;
    });

    Ok(Forwarder { hub, id, task })
}
