//! Server orchestrator (spec component F): owns the method tree, the HTTP
//! listener, the WebSocket hub, the UDP OSC listener, and the mDNS
//! advertisement, and wires them together.
//!
//! The HTTP accept loop (`TcpListener` + `hyper_util::rt::TokioIo` +
//! `http1::Builder::serve_connection` + a `tokio::sync::watch` shutdown
//! signal raced with `listener.accept()` in a `tokio::select!`) is grounded
//! on `Raphiiko-oyasumivr_oscquery`'s `start_oscquery_service`. The UDP OSC
//! listener (a dedicated `std::thread` owning a blocking `UdpSocket`,
//! forwarding decoded packets into the async side) is grounded on
//! `other_examples/x37v-oscquery-rs`'s `OscService`. The options struct and
//! startup ordering (bind ports, then advertise once the final ports are
//! known) follow `kittynXR-maowbot`'s `maowbot-osc/src/oscquery/server.rs`
//! `OscQueryServer::start`/`advertise_as_maow`, adapted from its `warp`+
//! `MdnsService`-from-mdns-sd shape to this crate's `hyper`+`zeroconf` one.

use crate::codec::decode_message;
use crate::discovery::mdns::{self, Advertisement};
use crate::error::{OscQueryError, Result};
use crate::host_info::{HostInfo, HostInfoExtensions};
use crate::http::handle_request;
use crate::node::{Access, NodeHandle, NodeOpts, Tree};
use crate::sanitize::sanitize_service_name;
use crate::ws::WsHub;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rosc::OscType;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The OSC transport this service answers on. Only `Udp` is ever actually
/// bound here; `Tcp` is reported in `HOST_INFO` but not implemented (spec
/// §9 "TCP transport" non-goal) — starting with it configured just skips
/// the UDP listener and logs once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscTransport {
    Udp,
    Tcp,
}

impl OscTransport {
    fn as_str(self) -> &'static str {
        match self {
            OscTransport::Udp => "UDP",
            OscTransport::Tcp => "TCP",
        }
    }
}

/// Construction-time configuration. Every field has a sensible default;
/// `http_port`/`osc_port`/`ws_port` of `0` mean "bind ephemerally".
#[derive(Debug, Clone)]
pub struct OSCQueryServiceOptions {
    pub http_port: u16,
    pub bind_address: Ipv4Addr,
    pub root_description: String,
    pub host_name: Option<String>,
    pub osc_ip: Ipv4Addr,
    pub osc_port: u16,
    pub osc_transport: OscTransport,
    pub service_name: String,
    pub ws_ip: Ipv4Addr,
    pub ws_port: u16,
    pub broadcast: bool,
}

impl Default for OSCQueryServiceOptions {
    fn default() -> Self {
        Self {
            http_port: 0,
            bind_address: Ipv4Addr::UNSPECIFIED,
            root_description: "root node".to_string(),
            host_name: None,
            osc_ip: Ipv4Addr::LOCALHOST,
            osc_port: 9000,
            osc_transport: OscTransport::Udp,
            service_name: "OSCQuery".to_string(),
            ws_ip: Ipv4Addr::UNSPECIFIED,
            ws_port: 0,
            broadcast: false,
        }
    }
}

/// Shared state reachable from every connection handler. `http.rs` and
/// `ws.rs` both hold an `Arc<ServerState>`.
pub struct ServerState {
    pub tree: Tree,
    options: OSCQueryServiceOptions,
    ws_port: u16,
    ws_hub: RwLock<Option<WsHub>>,
}

impl ServerState {
    pub fn host_info(&self) -> HostInfo {
        let ws_running = self.ws_hub.read().expect("ws hub lock poisoned").is_some();
        HostInfo {
            name: self.options.host_name.clone().unwrap_or_else(|| self.options.service_name.clone()),
            extensions: HostInfoExtensions { ws_running },
            osc_ip: self.options.osc_ip.to_string(),
            osc_port: self.options.osc_port,
            osc_transport: self.options.osc_transport.as_str().to_string(),
            ws_ip: self.options.ws_ip.to_string(),
            ws_port: self.ws_port,
        }
    }

    fn ws_hub(&self) -> Option<WsHub> {
        self.ws_hub.read().expect("ws hub lock poisoned").clone()
    }

    /// Applies an inbound OSC message (from the UDP listener or a WS binary
    /// frame) to the tree: silently dropped if the path is unknown or the
    /// node doesn't accept writes. Per-argument assignment failures are
    /// logged and skipped rather than aborting the rest of the message
    /// (spec §7). `PATH_CHANGED` is emitted unconditionally on a
    /// successful write (spec §4.F); the OSC message itself is only
    /// re-broadcast to WS subscribers when `broadcast` is enabled.
    pub async fn receive_osc_message(&self, path: &str, args: Vec<OscType>) {
        let Some(handle) = self.tree.resolve_path(path) else { return };
        if !matches!(self.tree.access(handle), Access::WriteOnly | Access::ReadWrite) {
            return;
        }
        for (index, arg) in args.iter().enumerate() {
            if let Err(e) = self.tree.set_value(handle, index, arg.clone()) {
                log::warn!("dropping argument {index} for {path}: {e}");
            }
        }
        if let Some(hub) = self.ws_hub() {
            hub.path_changed(path).await;
            if self.options.broadcast {
                hub.broadcast_osc(path, &args).await;
            }
        }
    }
}

fn spawn_udp_listener(addr: SocketAddr, state: Arc<ServerState>) -> Result<(SocketAddr, std::thread::JoinHandle<()>)> {
    let socket = std::net::UdpSocket::bind(addr).map_err(OscQueryError::BindFailure)?;
    let local_addr = socket.local_addr().map_err(OscQueryError::BindFailure)?;
    socket.set_read_timeout(Some(Duration::from_millis(200))).map_err(OscQueryError::BindFailure)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();

    let recv_thread = std::thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, _src)) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    log::warn!("UDP OSC listener stopped: {e}");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Some(decoded) = decode_message(&bytes) {
                state.receive_osc_message(&decoded.path, decoded.args).await;
            }
        }
    });

    Ok((local_addr, recv_thread))
}

/// The running service: HTTP query endpoint, WebSocket hub, UDP OSC
/// listener, and mDNS advertisement, plus the mutator API that keeps all of
/// them consistent with the tree.
pub struct OSCQueryService {
    state: Arc<ServerState>,
    http_addr: SocketAddr,
    http_shutdown: watch::Sender<bool>,
    http_task: JoinHandle<()>,
    advertisements: Vec<Advertisement>,
    _udp_thread: Option<std::thread::JoinHandle<()>>,
}

impl OSCQueryService {
    /// Builds the tree, binds every listener, and starts advertising. Ports
    /// left as `0` are resolved to their bound ephemeral values before
    /// `HOST_INFO` or mDNS ever report them.
    pub async fn start(options: OSCQueryServiceOptions) -> Result<Self> {
        let tree = Tree::new();
        tree.set_opts(tree.root(), NodeOpts { description: Some(options.root_description.clone()), ..Default::default() });

        let ws_listener = TcpListener::bind(SocketAddr::new(options.ws_ip.into(), options.ws_port))
            .await
            .map_err(OscQueryError::BindFailure)?;
        let ws_port = ws_listener.local_addr().map_err(OscQueryError::BindFailure)?.port();

        let state = Arc::new(ServerState { tree, ws_port, options: options.clone(), ws_hub: RwLock::new(None) });

        let ws_hub = WsHub::spawn(ws_listener, state.clone()).await.map_err(OscQueryError::BindFailure)?;
        *state.ws_hub.write().expect("ws hub lock poisoned") = Some(ws_hub);

        let udp_thread = match options.osc_transport {
            OscTransport::Udp => {
                let (_local, handle) = spawn_udp_listener(SocketAddr::new(options.osc_ip.into(), options.osc_port), state.clone())?;
                Some(handle)
            }
            OscTransport::Tcp => {
                log::warn!("OSC transport configured as TCP: not implemented, no OSC listener bound");
                None
            }
        };

        let http_listener = TcpListener::bind(SocketAddr::new(options.bind_address.into(), options.http_port))
            .await
            .map_err(OscQueryError::BindFailure)?;
        let http_addr = http_listener.local_addr().map_err(OscQueryError::BindFailure)?;

        let (http_shutdown, mut shutdown_rx) = watch::channel(false);
        let http_state = state.clone();
        let http_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = http_listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let io = TokioIo::new(stream);
                        let state = http_state.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));
                            let _ = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        let sanitized = sanitize_service_name(&options.service_name);
        let mut advertisements = Vec::new();
        if let Ok(adv) = mdns::advertise(&sanitized, "oscjson", "tcp", http_addr.port()) {
            advertisements.push(adv);
        }
        if matches!(options.osc_transport, OscTransport::Udp) {
            if let Ok(adv) = mdns::advertise(&sanitized, "osc", "udp", options.osc_port) {
                advertisements.push(adv);
            }
        }

        Ok(Self { state, http_addr, http_shutdown, http_task, advertisements, _udp_thread: udp_thread })
    }

    pub fn tree(&self) -> &Tree {
        &self.state.tree
    }

    /// The address the HTTP query endpoint is actually bound to — resolved
    /// even if `http_port` was `0` at construction time.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn host_info(&self) -> HostInfo {
        self.state.host_info()
    }

    fn ws_hub(&self) -> Option<WsHub> {
        self.state.ws_hub.read().expect("ws hub lock poisoned").clone()
    }

    async fn announce(&self, path: &str) {
        if let Some(hub) = self.ws_hub() {
            hub.path_changed(path).await;
        }
    }

    pub async fn add_method(&self, path: &str, opts: NodeOpts) -> NodeHandle {
        let (handle, full_path) = self.state.tree.add_method(path, opts);
        self.announce(&full_path).await;
        handle
    }

    pub async fn remove_method(&self, path: &str) {
        for changed in self.state.tree.remove_method(path) {
            self.announce(&changed).await;
        }
    }

    pub async fn set_value(&self, handle: NodeHandle, index: usize, value: OscType) -> Result<()> {
        self.state.tree.set_value(handle, index, value)?;
        let path = self.state.tree.full_path(handle);
        self.announce(&path).await;
        Ok(())
    }

    pub async fn unset_value(&self, handle: NodeHandle, index: usize) -> Result<()> {
        self.state.tree.unset_value(handle, index)?;
        let path = self.state.tree.full_path(handle);
        self.announce(&path).await;
        Ok(())
    }

    /// Sets the node's local value(s) first, then emits them as an OSC
    /// message to every subscribed WebSocket client (spec §9: local state
    /// is authoritative before the network ever sees the change).
    /// Assignment is best-effort per index (spec §4.F) — a failure on one
    /// slot is logged and doesn't stop the rest from being applied or the
    /// OSC message from going out.
    pub async fn send_value(&self, path: &str, args: Vec<OscType>) -> Result<()> {
        let handle = self.state.tree.resolve_path(path).ok_or_else(|| OscQueryError::UnknownPath(path.to_string()))?;
        for (index, arg) in args.iter().cloned().enumerate() {
            if let Err(e) = self.state.tree.set_value(handle, index, arg) {
                log::warn!("dropping argument {index} for {path}: {e}");
            }
        }
        if let Some(hub) = self.ws_hub() {
            hub.broadcast_osc(path, &args).await;
        }
        self.announce(path).await;
        Ok(())
    }

    pub async fn broadcast_path_renamed(&self, old: &str, new: &str) {
        if let Some(hub) = self.ws_hub() {
            hub.path_renamed(old, new).await;
        }
    }

    /// Stops advertising, closes every WebSocket client, and tears down the
    /// HTTP listener. Does not wait for the UDP receive thread — it exits
    /// on its own once the process starts tearing down the socket.
    pub async fn stop(self) {
        for adv in self.advertisements {
            adv.stop();
        }
        if let Some(hub) = self.ws_hub() {
            hub.stop().await;
        }
        let _ = self.http_shutdown.send(true);
        self.http_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_reports_its_wire_name() {
        assert_eq!(OscTransport::Udp.as_str(), "UDP");
        assert_eq!(OscTransport::Tcp.as_str(), "TCP");
    }

    #[test]
    fn default_options_are_reasonable() {
        let opts = OSCQueryServiceOptions::default();
        assert_eq!(opts.service_name, "OSCQuery");
        assert_eq!(opts.osc_transport, OscTransport::Udp);
        assert!(!opts.broadcast);
    }
}
