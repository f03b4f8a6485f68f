// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The protocol negotiating host.
//!
//! A [`Host`] is handed established connections to other peers, through a
//! [`Transport`](libp2prs_core::Transport) or directly with
//! [`Host::add_connection`], and decides with multistream-select which
//! protocol every stream opened on them speaks.
//!
//! ## Inbound streams
//!
//! Every connection has an accept loop. Each inbound stream is negotiated
//! against the registered handlers in a task of its own, and given to the
//! handler of the selected protocol. A slow handler never holds back other
//! streams.
//!
//! ## Outbound streams
//!
//! [`Host::new_stream`] remembers the protocol negotiated with each peer. When
//! the preferred protocol of the peer, or else a protocol the peer is known
//! to support, is among the candidates, the stream is returned at once and
//! the protocol is asserted lazily with the first I/O. Otherwise the whole
//! candidate list is sent to the peer, which picks one, in one round trip.

use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::{fmt, mem, time::Duration};

use libp2prs_core::multistream::{listener_select, LazyStream, Negotiator};
use libp2prs_core::muxing::{IReadWrite, IStreamMuxer};
use libp2prs_core::transport::{ITransport, ITransportListener, TransportError};
use libp2prs_runtime::task;

pub use libp2prs_core::{PeerId, ProtocolId};

mod config;
mod error;
mod peerstore;
mod preference;
mod registry;
mod semver;
mod stream;

pub use config::HostConfig;
pub use error::{HostError, Result};
pub use peerstore::ProtocolBook;
pub use preference::PreferenceCache;
pub use registry::{HandlerRegistry, IStreamHandler, MatchFn, StreamHandler};
pub use semver::semver_matcher;
pub use stream::{Direction, Stream, StreamId, StreamState, StreamStats};

/// A peer to connect to, with the protocols it is known to support.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub protocols: Vec<ProtocolId>,
}

impl PeerInfo {
    pub fn new(peer_id: PeerId) -> Self {
        PeerInfo {
            peer_id,
            protocols: Vec::new(),
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnectionId(usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    id: ConnectionId,
    muxer: IStreamMuxer,
    /// The accept loop of the connection.
    handle: Option<task::TaskHandle<()>>,
}

struct HostInner {
    local_peer_id: PeerId,
    config: HostConfig,
    registry: Arc<RwLock<HandlerRegistry>>,
    preferences: PreferenceCache,
    protocols: ProtocolBook,
    connections: Mutex<FnvHashMap<PeerId, SmallVec<[Connection; 2]>>>,
    transport: Option<ITransport>,
    /// The listening loop, if any.
    listener: Mutex<Option<task::TaskHandle<()>>>,
    next_connection_id: AtomicUsize,
    next_stream_id: AtomicUsize,
    closed: AtomicBool,
}

/// A running peer of the network.
///
/// Cheap to clone, every clone drives the same host. The host lives until
/// [`Host::close`] is called.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.inner.local_peer_id)
            .field("connected", &self.connected_peers())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Host {
    /// Creates a host without a transport. Connections are added with
    /// [`Host::add_connection`].
    pub fn new(local_peer_id: PeerId, config: HostConfig) -> Self {
        Self::build(local_peer_id, config, None)
    }

    /// Creates a host listening on `transport` for inbound connections.
    pub fn with_transport(local_peer_id: PeerId, config: HostConfig, transport: ITransport) -> Result<Self> {
        let listener = transport.listen_on(local_peer_id)?;
        let host = Self::build(local_peer_id, config, Some(transport));

        let handle = task::spawn(listen_loop(host.clone(), listener));
        *host.inner.listener.lock() = Some(handle);
        Ok(host)
    }

    fn build(local_peer_id: PeerId, config: HostConfig, transport: Option<ITransport>) -> Self {
        log::info!("host {} starting", local_peer_id);
        Host {
            inner: Arc::new(HostInner {
                local_peer_id,
                config,
                registry: Arc::new(RwLock::new(HandlerRegistry::new())),
                preferences: PreferenceCache::new(),
                protocols: ProtocolBook::default(),
                connections: Mutex::new(FnvHashMap::default()),
                transport,
                listener: Mutex::new(None),
                next_connection_id: AtomicUsize::new(0),
                next_stream_id: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the peer id of this host.
    pub fn id(&self) -> PeerId {
        self.inner.local_peer_id
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(HostError::Closed);
        }
        Ok(())
    }

    /// Connects to a peer through the transport, unless already connected.
    ///
    /// The protocols of `pi` are recorded as supported by the peer.
    pub async fn connect(&self, pi: PeerInfo) -> Result<()> {
        self.check_open()?;
        if !pi.protocols.is_empty() {
            self.inner.protocols.add_protocols(&pi.peer_id, pi.protocols);
        }
        if self.is_connected(&pi.peer_id) {
            return Ok(());
        }

        let transport = self.inner.transport.as_ref().ok_or(HostError::NoTransport)?;
        log::debug!("dialing {}", pi.peer_id);
        let dial = transport.dial(self.inner.local_peer_id, pi.peer_id);
        let muxer = task::timeout(self.inner.config.dial_timeout(), dial)
            .await
            .map_err(|_| HostError::Transport(TransportError::Timeout))??;
        self.add_connection(muxer)
    }

    /// Takes over an established connection and starts accepting the
    /// streams the remote opens on it.
    pub fn add_connection(&self, muxer: IStreamMuxer) -> Result<()> {
        self.check_open()?;
        let peer = muxer.remote_peer();
        let id = ConnectionId(self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst));
        log::debug!("connection {} to {} added", id, peer);

        // the accept loop unregisters the connection; it can't get the lock
        // before the connection is registered
        let mut connections = self.inner.connections.lock();
        let handle = task::spawn(accept_loop(self.inner.clone(), id, muxer.clone()));
        connections.entry(peer).or_default().push(Connection {
            id,
            muxer,
            handle: Some(handle),
        });
        Ok(())
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.inner.connections.lock().contains_key(peer)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.connections.lock().keys().cloned().collect()
    }

    fn connection(&self, peer: &PeerId) -> Option<IStreamMuxer> {
        self.inner
            .connections
            .lock()
            .get(peer)
            .and_then(|conns| conns.first())
            .map(|c| c.muxer.clone())
    }

    /// Opens a stream to `peer` speaking one of `protocols`, the most
    /// preferred first.
    pub async fn new_stream(&self, peer: &PeerId, protocols: Vec<ProtocolId>) -> Result<Stream> {
        let timeout = self.inner.config.negotiation_timeout();
        self.new_stream_with_timeout(peer, protocols, timeout).await
    }

    /// Same as [`Host::new_stream`], with another negotiation deadline.
    pub async fn new_stream_with_timeout(&self, peer: &PeerId, protocols: Vec<ProtocolId>, timeout: Duration) -> Result<Stream> {
        self.check_open()?;

        let candidates: Vec<ProtocolId> = protocols
            .into_iter()
            .filter(|p| {
                if !p.is_valid() {
                    log::warn!("ignoring invalid protocol {:?}", p);
                }
                p.is_valid()
            })
            .collect();
        if candidates.is_empty() {
            return Err(HostError::ProtocolMismatch);
        }

        let muxer = self.connection(peer).ok_or(HostError::NoConnection(*peer))?;
        let raw = muxer.open_stream().await?;
        let id = self.next_stream_id();

        if self.inner.config.lazy_negotiation() {
            if let Some(proto) = self.lazy_protocol(peer, &candidates) {
                log::debug!("stream {} to {}: asserting {}", id, peer, proto);
                let lazy = LazyStream::new(raw, proto)?.with_timeout(timeout);
                let (preferences, book) = (self.inner.preferences.clone(), self.inner.protocols.clone());
                return Ok(Stream::lazy(id, lazy, *peer, preferences, book));
            }
        }

        let negotiator = Negotiator::new_with_protocols(candidates);
        match task::timeout(timeout, negotiator.select_one(raw)).await {
            Ok(Ok((proto, raw))) => {
                log::debug!("stream {} to {}: selected {}", id, peer, proto);
                self.inner.preferences.set(*peer, proto.clone());
                Ok(Stream::negotiated(id, raw, proto, *peer, Direction::Outbound))
            }
            Ok(Err(err)) => {
                log::debug!("stream {} to {}: negotiation failed: {}", id, peer, err);
                Err(err.into())
            }
            Err(_) => {
                log::debug!("stream {} to {}: negotiation timed out", id, peer);
                Err(HostError::NegotiationTimeout)
            }
        }
    }

    /// The protocol to assert without negotiation, if any.
    fn lazy_protocol(&self, peer: &PeerId, candidates: &[ProtocolId]) -> Option<ProtocolId> {
        if let Some(preferred) = self.inner.preferences.get(peer) {
            if candidates.contains(&preferred) {
                return Some(preferred);
            }
        }
        self.inner.protocols.first_supported_protocol(peer, candidates)
    }

    fn next_stream_id(&self) -> StreamId {
        StreamId(self.inner.next_stream_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Handles the inbound streams speaking exactly `protocol`.
    pub fn set_stream_handler<P, H>(&self, protocol: P, handler: H)
    where
        P: Into<ProtocolId>,
        H: StreamHandler + 'static,
    {
        self.inner.registry.write().add_handler(protocol.into(), Arc::new(handler));
    }

    /// Handles the inbound streams whose protocol `matcher` accepts.
    /// `protocol` names the handler for [`Host::remove_stream_handler`].
    pub fn set_stream_handler_match<P, M, H>(&self, protocol: P, matcher: M, handler: H)
    where
        P: Into<ProtocolId>,
        M: Fn(&str) -> bool + Send + Sync + 'static,
        H: StreamHandler + 'static,
    {
        self.inner
            .registry
            .write()
            .add_handler_match(protocol.into(), Arc::new(matcher), Arc::new(handler));
    }

    pub fn remove_stream_handler<P: Into<ProtocolId>>(&self, protocol: P) {
        self.inner.registry.write().remove_handler(&protocol.into());
    }

    /// Returns the protocols handlers are registered for.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.inner.registry.read().protocols()
    }

    /// Records protocols `peer` is known to support.
    ///
    /// Forgotten when the last connection to the peer goes away, or for one
    /// protocol when the peer refuses a lazy stream asserting it.
    pub fn add_protocols(&self, peer: &PeerId, protocols: Vec<ProtocolId>) {
        self.inner.protocols.add_protocols(peer, protocols);
    }

    /// Returns the protocol last negotiated with `peer`.
    pub fn protocol_preference(&self, peer: &PeerId) -> Option<ProtocolId> {
        self.inner.preferences.get(peer)
    }

    /// Stops the host: no more listening, every connection closed and every
    /// handler removed. Later calls are no-ops.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("host {} closing", self.inner.local_peer_id);

        let listener = self.inner.listener.lock().take();
        if let Some(h) = listener {
            h.cancel().await;
        }

        let connections: Vec<Connection> = {
            let mut guard = self.inner.connections.lock();
            mem::take(&mut *guard).into_iter().flat_map(|(_, c)| c).collect()
        };
        for mut c in connections {
            if let Err(e) = c.muxer.close().await {
                log::debug!("closing connection {}: {}", c.id, e);
            }
            if let Some(h) = c.handle.take() {
                h.cancel().await;
            }
        }

        self.inner.registry.write().clear();
        self.inner.preferences.clear();
        self.inner.protocols.clear();
    }
}

impl HostInner {
    fn remove_connection(&self, peer: &PeerId, id: ConnectionId) {
        let mut connections = self.connections.lock();
        if let Some(conns) = connections.get_mut(peer) {
            conns.retain(|c| c.id != id);
            if conns.is_empty() {
                connections.remove(peer);
                self.preferences.remove(peer);
                self.protocols.remove_peer(peer);
                log::debug!("disconnected from {}", peer);
            }
        }
    }
}

async fn listen_loop(host: Host, mut listener: ITransportListener) {
    loop {
        match listener.accept().await {
            Ok(muxer) => {
                if let Err(e) = host.add_connection(muxer) {
                    log::debug!("dropping inbound connection: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::debug!("listener of {} stopped: {}", listener.local_peer(), e);
                break;
            }
        }
    }
}

async fn accept_loop(inner: Arc<HostInner>, id: ConnectionId, muxer: IStreamMuxer) {
    let peer = muxer.remote_peer();
    loop {
        match muxer.accept_stream().await {
            Ok(raw) => {
                // detached, ends with the handler
                task::spawn(handle_inbound(inner.clone(), peer, raw));
            }
            Err(e) => {
                log::debug!("connection {} to {} stops accepting: {}", id, peer, e);
                break;
            }
        }
    }
    inner.remove_connection(&peer, id);
}

async fn handle_inbound(inner: Arc<HostInner>, peer: PeerId, raw: IReadWrite) {
    let id = StreamId(inner.next_stream_id.fetch_add(1, Ordering::SeqCst));
    let registry = inner.registry.clone();
    let select = move |candidates: &[ProtocolId]| registry.read().match_protocols(candidates);

    match task::timeout(inner.config.negotiation_timeout(), listener_select(raw, select)).await {
        Ok(Ok((proto, handler, raw))) => {
            log::debug!("inbound stream {} from {}: selected {}", id, peer, proto);
            inner.preferences.set(peer, proto.clone());
            let stream = Stream::negotiated(id, raw, proto, peer, Direction::Inbound);
            handler.handle(stream).await;
        }
        Ok(Err(err)) => log::debug!("inbound stream {} from {}: negotiation failed: {}", id, peer, err),
        Err(_) => log::debug!("inbound stream {} from {}: negotiation timed out", id, peer),
    }
}
