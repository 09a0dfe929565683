//! WebSocket hub (spec component E): client registry, per-client
//! subscription sets, prefix-matching broadcast, JSON command parsing.
//!
//! Runs as its own accept loop rather than multiplexed onto the HTTP
//! listener via `hyper::upgrade`: spec §9's design note explicitly licenses
//! "two listeners, `attached` elided as an optimization" for stacks without
//! built-in upgrade multiplexing, and nothing in the retrieval pack shows a
//! hyper 1.x upgrade→`tokio-tungstenite` bridge to imitate. The accept-loop
//! shape itself (spawn-per-connection, `tokio::select!` against a shutdown
//! watch channel) is grounded on `Raphiiko-oyasumivr_oscquery`'s
//! `start_oscquery_service`; message types (`tokio_tungstenite::tungstenite::
//! protocol::Message`) are grounded on `kittynXR-maowbot`'s
//! `vrchat_pipeline/runtime.rs`.

use crate::codec::{decode_message, encode_message};
use crate::server::ServerState;
use futures_util::{SinkExt, StreamExt};
use rosc::OscType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock as AsyncRwLock};
use tokio_tungstenite::tungstenite::Message;

type ClientId = u64;

struct ClientHandle {
    subscriptions: HashSet<String>,
    outbound: mpsc::UnboundedSender<Message>,
}

fn subscribed(subs: &HashSet<String>, path: &str) -> bool {
    subs.is_empty() || subs.iter().any(|s| path == s || path.starts_with(&format!("{s}/")))
}

#[derive(Debug, Serialize, Deserialize)]
struct WsCommand {
    #[serde(rename = "COMMAND")]
    command: String,
    #[serde(rename = "DATA", default)]
    data: Value,
}

fn path_changed_frame(path: &str) -> Message {
    Message::Text(serde_json::json!({"COMMAND": "PATH_CHANGED", "DATA": path}).to_string())
}

fn path_renamed_frame(old: &str, new: &str) -> Message {
    Message::Text(serde_json::json!({"COMMAND": "PATH_RENAMED", "DATA": {"OLD": old, "NEW": new}}).to_string())
}

/// The running WebSocket hub. Cloning shares the client registry.
#[derive(Clone)]
pub struct WsHub {
    clients: Arc<AsyncRwLock<HashMap<ClientId, ClientHandle>>>,
    next_id: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
}

impl WsHub {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { clients: Arc::new(AsyncRwLock::new(HashMap::new())), next_id: Arc::new(AtomicU64::new(0)), shutdown }
    }

    /// Starts accepting WebSocket connections on an already-bound listener,
    /// dispatching inbound frames against `state`. Takes ownership of the
    /// listener rather than a `SocketAddr` so callers can resolve an
    /// ephemeral port (`bind` with port `0`) before handing it off, without
    /// a rebind race.
    pub async fn spawn(listener: TcpListener, state: Arc<ServerState>) -> std::io::Result<Self> {
        let hub = Self::new();
        let accept_hub = hub.clone();
        let mut shutdown_rx = hub.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let hub = accept_hub.clone();
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                                hub.serve_client(ws, state).await;
                            }
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Ok(hub)
    }

    async fn serve_client<S>(&self, ws: tokio_tungstenite::WebSocketStream<S>, state: Arc<ServerState>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        self.clients.write().await.insert(id, ClientHandle { subscriptions: HashSet::new(), outbound: tx });

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = read.next().await {
            match msg {
                Message::Binary(bytes) => {
                    if let Some(decoded) = decode_message(&bytes) {
                        state.receive_osc_message(&decoded.path, decoded.args).await;
                    }
                }
                Message::Text(text) => {
                    if text.starts_with('/') || text.starts_with('#') {
                        if let Some(decoded) = decode_message(text.as_bytes()) {
                            state.receive_osc_message(&decoded.path, decoded.args).await;
                        }
                        continue;
                    }
                    if let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) {
                        self.handle_command(id, cmd).await;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.clients.write().await.remove(&id);
        writer.abort();
    }

    async fn handle_command(&self, id: ClientId, cmd: WsCommand) {
        let mut clients = self.clients.write().await;
        let Some(client) = clients.get_mut(&id) else { return };
        match (cmd.command.as_str(), cmd.data.as_str()) {
            ("LISTEN", Some(path)) => {
                client.subscriptions.insert(path.to_string());
            }
            ("IGNORE", Some(path)) => {
                client.subscriptions.remove(path);
            }
            _ => {}
        }
    }

    async fn broadcast(&self, predicate: impl Fn(&HashSet<String>) -> bool, make: impl Fn() -> Message) {
        let mut clients = self.clients.write().await;
        let frame = make();
        let mut dead = Vec::new();
        for (id, client) in clients.iter() {
            if predicate(&client.subscriptions) && client.outbound.send(frame.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            clients.remove(&id);
        }
    }

    pub async fn path_changed(&self, path: &str) {
        let path = path.to_string();
        self.broadcast(|subs| subscribed(subs, &path), || path_changed_frame(&path)).await;
    }

    pub async fn path_renamed(&self, old: &str, new: &str) {
        self.broadcast(|_| true, || path_renamed_frame(old, new)).await;
    }

    pub async fn broadcast_osc(&self, path: &str, args: &[OscType]) {
        let frame = Message::Binary(encode_message(path, args));
        let path = path.to_string();
        self.broadcast(|subs| subscribed(subs, &path), move || frame.clone()).await;
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Closes every client socket and stops the accept loop. Does not wait
    /// for the per-client write tasks — spec §5 forbids hanging on stalled
    /// clients.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut clients = self.clients.write().await;
        for (_, client) in clients.drain() {
            let _ = client.outbound.send(Message::Close(None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_subscription_matching() {
        let mut subs = HashSet::new();
        subs.insert("/a".to_string());
        assert!(subscribed(&subs, "/a/b/c"));
        assert!(subscribed(&subs, "/a"));
        assert!(!subscribed(&subs, "/ab"));
    }

    #[test]
    fn empty_subscription_set_receives_everything() {
        let subs = HashSet::new();
        assert!(subscribed(&subs, "/anything"));
    }

    #[test]
    fn parses_listen_command() {
        let cmd: WsCommand = serde_json::from_str(r#"{"COMMAND":"LISTEN","DATA":"/a"}"#).unwrap();
        assert_eq!(cmd.command, "LISTEN");
        assert_eq!(cmd.data, Value::String("/a".into()));
    }
}
