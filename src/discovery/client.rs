//! OSCQuery discovery client (spec component H): turns raw mDNS browse
//! events into resolved peers by fetching each one's root tree and
//! `HOST_INFO` over HTTP.
//!
//! `reqwest` is not part of the teacher's (`revilo196-oscq_rs`) dependency
//! stack, which never implements a client; it is imported from
//! `kittynXR-maowbot`, where every crate in that workspace (including its
//! own `maowbot-osc`) uses it for exactly this kind of outbound HTTP call.
//! The remote tree shape mirrors `node.rs`'s wire JSON but is deserialized
//! loosely (`Option`/`default` everywhere) since a peer is free to omit any
//! attribute per spec §6.

use crate::discovery::mdns::{browse, BrowseEvent, Browser, DiscoveredService};
use crate::error::{OscQueryError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;

/// A node in a peer's tree, as returned by `GET /<path>`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteNode {
    #[serde(rename = "FULL_PATH")]
    pub full_path: String,
    #[serde(rename = "CONTENTS", default)]
    pub contents: HashMap<String, RemoteNode>,
    #[serde(rename = "TYPE", default)]
    pub ty: Option<String>,
    #[serde(rename = "ACCESS", default)]
    pub access: Option<u8>,
    #[serde(rename = "VALUE", default)]
    pub value: Option<Vec<Value>>,
    #[serde(rename = "RANGE", default)]
    pub range: Option<Vec<Value>>,
    #[serde(rename = "CLIPMODE", default)]
    pub clipmode: Option<Vec<String>>,
    #[serde(rename = "DESCRIPTION", default)]
    pub description: Option<String>,
    #[serde(rename = "TAGS", default)]
    pub tags: Option<Vec<String>>,
    #[serde(rename = "CRITICAL", default)]
    pub critical: Option<bool>,
}

impl RemoteNode {
    /// Every node in this subtree, self included, pre-order.
    pub fn flatten(&self) -> Vec<&RemoteNode> {
        let mut out = vec![self];
        for child in self.contents.values() {
            out.extend(child.flatten());
        }
        out
    }

    pub fn is_method(&self) -> bool {
        self.ty.is_some()
    }
}

/// A peer's `HOST_INFO` document.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteHostInfo {
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "EXTENSIONS", default)]
    pub extensions: HashMap<String, bool>,
    #[serde(rename = "OSC_IP", default)]
    pub osc_ip: Option<String>,
    #[serde(rename = "OSC_PORT", default)]
    pub osc_port: Option<u16>,
    #[serde(rename = "OSC_TRANSPORT", default)]
    pub osc_transport: Option<String>,
    #[serde(rename = "WS_IP", default)]
    pub ws_ip: Option<String>,
    #[serde(rename = "WS_PORT", default)]
    pub ws_port: Option<u16>,
}

/// A fully resolved peer: where it is, and what it advertised.
#[derive(Debug, Clone)]
pub struct RemoteService {
    pub name: String,
    pub address: Ipv4Addr,
    pub http_port: u16,
    pub tree: RemoteNode,
    pub host_info: RemoteHostInfo,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Up(RemoteService),
    Down { name: String, address: Ipv4Addr, http_port: u16 },
    Error { name: String, address: Ipv4Addr, http_port: u16, message: String },
}

pub async fn fetch_tree(client: &reqwest::Client, address: Ipv4Addr, port: u16) -> Result<RemoteNode> {
    let url = format!("http://{address}:{port}/");
    client
        .get(&url)
        .send()
        .await
        .map_err(|e| OscQueryError::Discovery(e.to_string()))?
        .json::<RemoteNode>()
        .await
        .map_err(|e| OscQueryError::Discovery(e.to_string()))
}

pub async fn fetch_host_info(client: &reqwest::Client, address: Ipv4Addr, port: u16) -> Result<RemoteHostInfo> {
    let url = format!("http://{address}:{port}/?HOST_INFO");
    client
        .get(&url)
        .send()
        .await
        .map_err(|e| OscQueryError::Discovery(e.to_string()))?
        .json::<RemoteHostInfo>()
        .await
        .map_err(|e| OscQueryError::Discovery(e.to_string()))
}

async fn resolve(client: &reqwest::Client, info: &DiscoveredService) -> Result<RemoteService> {
    let tree = fetch_tree(client, info.address, info.port).await?;
    let host_info = fetch_host_info(client, info.address, info.port).await?;
    Ok(RemoteService { name: info.name.clone(), address: info.address, http_port: info.port, tree, host_info })
}

/// Browses for `_oscjson._tcp` peers and resolves each one's tree/host info
/// as it's found, forwarding `ClientEvent`s on `tx`. A peer whose `GET /` or
/// `GET /?HOST_INFO` fails (timeout, connection refused, malformed JSON)
/// emits `ClientEvent::Error` rather than being dropped silently.
///
/// `BrowseEvent::Down` is never produced by the current `browse()`
/// (`zeroconf` exposes discovery, not removal, through this crate's usage of
/// it — see `discovery::mdns` docs), so no `ClientEvent::Down` is emitted
/// either; a tracked-service set would need to age out entries on its own
/// timeout, which is left to the caller.
pub struct DiscoveryClient {
    _browser: Browser,
}

impl DiscoveryClient {
    pub fn start(tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<BrowseEvent>();
        let browser = browse("oscjson", "tcp", raw_tx);

        tokio::spawn(async move {
            let client = reqwest::Client::builder().timeout(Duration::from_secs(3)).build().unwrap_or_else(|_| reqwest::Client::new());

            while let Some(event) = raw_rx.recv().await {
                match event {
                    BrowseEvent::Up(info) => {
                        let ev = match resolve(&client, &info).await {
                            Ok(service) => ClientEvent::Up(service),
                            Err(e) => {
                                log::warn!("failed to resolve {} at {}:{}: {e}", info.name, info.address, info.port);
                                ClientEvent::Error {
                                    name: info.name.clone(),
                                    address: info.address,
                                    http_port: info.port,
                                    message: e.to_string(),
                                }
                            }
                        };
                        if tx.send(ev).is_err() {
                            break;
                        }
                    }
                    BrowseEvent::Down(info) => {
                        let ev = ClientEvent::Down { name: info.name, address: info.address, http_port: info.port };
                        if tx.send(ev).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { _browser: browser }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_visits_every_descendant() {
        let leaf = RemoteNode {
            full_path: "/a/b".into(),
            contents: HashMap::new(),
            ty: Some("i".into()),
            access: Some(1),
            value: None,
            range: None,
            clipmode: None,
            description: None,
            tags: None,
            critical: None,
        };
        let mut contents = HashMap::new();
        contents.insert("b".to_string(), leaf);
        let root = RemoteNode {
            full_path: "/a".into(),
            contents,
            ty: None,
            access: None,
            value: None,
            range: None,
            clipmode: None,
            description: None,
            tags: None,
            critical: None,
        };
        assert_eq!(root.flatten().len(), 2);
    }
}
