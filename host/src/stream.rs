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

use async_trait::async_trait;
use libp2prs_core::multistream::{LazyState, LazyStream};
use libp2prs_core::muxing::IReadWrite;
use libp2prs_core::{PeerId, ProtocolId};
use libp2prs_traits::{ReadEx, WriteEx};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::{fmt, io};

use crate::peerstore::ProtocolBook;
use crate::preference::PreferenceCache;

/// The Id of a stream, unique within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We opened the stream.
    Outbound,
    /// The remote opened the stream.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self == &Direction::Outbound { "Out" } else { "In " })
    }
}

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    /// The protocol is asserted, the remote has not confirmed it yet.
    Negotiating,
    Open,
    Closed,
    /// The remote refused the protocol or the stream broke.
    Errored,
}

#[derive(Debug, Default)]
pub struct StreamStats {
    /// The accumulative counter of packets sent.
    pkt_sent: AtomicUsize,
    /// The accumulative counter of packets received.
    pkt_recv: AtomicUsize,
    /// The accumulative counter of bytes sent.
    byte_sent: AtomicUsize,
    /// The accumulative counter of bytes received.
    byte_recv: AtomicUsize,
}

impl StreamStats {
    pub fn pkt_sent(&self) -> usize {
        self.pkt_sent.load(Ordering::SeqCst)
    }
    pub fn pkt_recv(&self) -> usize {
        self.pkt_recv.load(Ordering::SeqCst)
    }
    pub fn byte_sent(&self) -> usize {
        self.byte_sent.load(Ordering::SeqCst)
    }
    pub fn byte_recv(&self) -> usize {
        self.byte_recv.load(Ordering::SeqCst)
    }
}

enum StreamIo {
    Negotiated(IReadWrite),
    Lazy(LazyStream<IReadWrite>),
}

/// A stream to a remote peer, speaking one protocol.
///
/// Owned by whoever opened or accepted it. Dropping it closes the underlying
/// substream.
pub struct Stream {
    id: StreamId,
    io: StreamIo,
    protocol: ProtocolId,
    peer: PeerId,
    dir: Direction,
    state: StreamState,
    /// Where to forget a protocol the remote refused, lazy streams only.
    knowledge: Option<(PreferenceCache, ProtocolBook)>,
    stats: Arc<StreamStats>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("peer", &self.peer)
            .field("dir", &self.dir)
            .field("state", &self.state)
            .finish()
    }
}

impl Stream {
    /// A stream whose protocol is agreed on.
    pub(crate) fn negotiated(id: StreamId, inner: IReadWrite, protocol: ProtocolId, peer: PeerId, dir: Direction) -> Self {
        Stream {
            id,
            io: StreamIo::Negotiated(inner),
            protocol,
            peer,
            dir,
            state: StreamState::Open,
            knowledge: None,
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// An outbound stream asserting the protocol of `inner`.
    pub(crate) fn lazy(
        id: StreamId,
        inner: LazyStream<IReadWrite>,
        peer: PeerId,
        preferences: PreferenceCache,
        book: ProtocolBook,
    ) -> Self {
        Stream {
            id,
            protocol: inner.protocol(),
            io: StreamIo::Lazy(inner),
            peer,
            dir: Direction::Outbound,
            state: StreamState::Negotiating,
            knowledge: Some((preferences, book)),
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// Returns the stream Id.
    pub fn id(&self) -> StreamId {
        self.id
    }
    /// Returns the protocol of the stream.
    pub fn protocol(&self) -> ProtocolId {
        self.protocol.clone()
    }
    /// Returns the peer on the other end.
    pub fn remote_peer(&self) -> PeerId {
        self.peer
    }
    /// Returns the direction of the stream.
    pub fn dir(&self) -> Direction {
        self.dir
    }
    pub fn state(&self) -> StreamState {
        self.state
    }
    /// Returns the statistics of the stream.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn check_usable(&self) -> io::Result<()> {
        if self.state == StreamState::Closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed"));
        }
        Ok(())
    }

    /// Follows the handshake of a lazy stream.
    fn sync_lazy_state(&mut self) {
        let lazy = match &self.io {
            StreamIo::Lazy(lazy) => lazy.state(),
            StreamIo::Negotiated(_) => return,
        };
        if self.state != StreamState::Negotiating {
            return;
        }
        match lazy {
            LazyState::Unsent | LazyState::HeaderSent => {}
            LazyState::Open => {
                log::trace!("stream {} to {} confirmed {}", self.id, self.peer, self.protocol);
                self.state = StreamState::Open;
            }
            LazyState::Rejected => {
                log::debug!("stream {} to {}: {} refused", self.id, self.peer, self.protocol);
                self.state = StreamState::Errored;
                if let Some((preferences, book)) = self.knowledge.take() {
                    preferences.remove_if(&self.peer, &self.protocol);
                    book.remove_protocol(&self.peer, &self.protocol);
                }
            }
            LazyState::Failed => {
                self.state = StreamState::Errored;
            }
        }
    }
}

#[async_trait]
impl ReadEx for Stream {
    async fn read2(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        self.check_usable()?;
        let r = match &mut self.io {
            StreamIo::Negotiated(io) => io.read2(buf).await,
            StreamIo::Lazy(io) => io.read2(buf).await,
        };
        self.sync_lazy_state();
        r.map(|n| {
            self.stats.byte_recv.fetch_add(n, Ordering::SeqCst);
            self.stats.pkt_recv.fetch_add(1, Ordering::SeqCst);
            n
        })
    }
}

#[async_trait]
impl WriteEx for Stream {
    async fn write2(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        self.check_usable()?;
        let r = match &mut self.io {
            StreamIo::Negotiated(io) => io.write2(buf).await,
            StreamIo::Lazy(io) => io.write2(buf).await,
        };
        self.sync_lazy_state();
        r.map(|n| {
            self.stats.byte_sent.fetch_add(n, Ordering::SeqCst);
            self.stats.pkt_sent.fetch_add(1, Ordering::SeqCst);
            n
        })
    }

    async fn flush2(&mut self) -> Result<(), io::Error> {
        self.check_usable()?;
        let r = match &mut self.io {
            StreamIo::Negotiated(io) => io.flush2().await,
            StreamIo::Lazy(io) => io.flush2().await,
        };
        self.sync_lazy_state();
        r
    }

    /// Closes the stream. Closing it again is a no-op.
    async fn close2(&mut self) -> Result<(), io::Error> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        log::trace!("closing stream {} {} {}", self.id, self.dir, self.protocol);
        let r = match &mut self.io {
            StreamIo::Negotiated(io) => io.close2().await,
            StreamIo::Lazy(io) => io.close2().await,
        };
        self.sync_lazy_state();
        self.state = StreamState::Closed;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2prs_core::multistream::{negotiation_error, NegotiationError, Negotiator};
    use libp2prs_core::transport::memory::Channel;
    use libp2prs_runtime::task;

    fn lazy_pair(proto: &str) -> (Stream, Channel, PreferenceCache, ProtocolBook, PeerId) {
        let (a, b) = Channel::pair();
        let peer = PeerId::random();
        let cache = PreferenceCache::new();
        cache.set(peer, proto.into());
        let book = ProtocolBook::default();
        book.add_protocols(&peer, vec![proto.into(), "/other/1.0.0".into()]);
        let lazy = LazyStream::new(Box::new(a) as IReadWrite, proto.into()).unwrap();
        let s = Stream::lazy(StreamId(1), lazy, peer, cache.clone(), book.clone());
        (s, b, cache, book, peer)
    }

    #[test]
    fn stats_and_close_once() {
        task::block_on(async {
            let (a, mut b) = Channel::pair();
            let mut s = Stream::negotiated(StreamId(7), Box::new(a), "/echo".into(), PeerId::random(), Direction::Inbound);
            assert_eq!(s.state(), StreamState::Open);

            s.write_all2(b"hello").await.unwrap();
            let mut buf = [0u8; 5];
            b.read_exact2(&mut buf).await.unwrap();
            b.write_all2(b"hi").await.unwrap();
            let mut buf = [0u8; 2];
            s.read_exact2(&mut buf).await.unwrap();

            assert_eq!(s.stats().byte_sent(), 5);
            assert_eq!(s.stats().byte_recv(), 2);
            assert!(s.stats().pkt_sent() >= 1);

            s.close2().await.unwrap();
            s.close2().await.unwrap();
            assert_eq!(s.state(), StreamState::Closed);
            assert!(s.write2(b"x").await.is_err());
            assert_eq!(b.read2(&mut buf).await.unwrap(), 0);
        });
    }

    #[test]
    fn lazy_confirmation_opens() {
        task::block_on(async {
            let (mut s, b, cache, book, peer) = lazy_pair("/echo/1.0.0");
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/echo/1.0.0"]);
                neg.negotiate(b).await.map(|(_, io)| io)
            });

            assert_eq!(s.state(), StreamState::Negotiating);
            s.write_all2(b"ping").await.unwrap();
            assert_eq!(s.state(), StreamState::Negotiating);
            assert_eq!(s.read2(&mut []).await.unwrap(), 0);
            assert_eq!(s.state(), StreamState::Open);
            assert_eq!(cache.get(&peer), Some("/echo/1.0.0".into()));
            assert_eq!(book.get_protocols(&peer).unwrap().len(), 2);
            assert!(server.wait().await.unwrap().is_ok());
        });
    }

    #[test]
    fn lazy_rejection_drops_preference() {
        task::block_on(async {
            let (mut s, b, cache, book, peer) = lazy_pair("/echo/1.0.0");
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/other/1.0.0"]);
                neg.negotiate(b).await.map(|(p, _)| p)
            });

            s.write_all2(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            assert!(s.read2(&mut buf).await.is_err());
            assert_eq!(s.state(), StreamState::Errored);
            assert_eq!(cache.get(&peer), None);
            assert_eq!(book.get_protocols(&peer), Some(vec!["/other/1.0.0".into()]));
            assert!(server.wait().await.unwrap().is_err());
        });
    }

    #[test]
    fn lazy_rejection_seen_by_writes() {
        task::block_on(async {
            let (mut s, b, cache, book, peer) = lazy_pair("/echo/1.0.0");
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/other/1.0.0"]);
                neg.negotiate(b).await.map(|(p, _)| p)
            });

            s.write_all2(b"ping").await.unwrap();
            assert!(server.wait().await.unwrap().is_err());

            // the listener is gone, the next write hits the refusal
            let err = s.write_all2(b"pong").await.unwrap_err();
            assert!(matches!(negotiation_error(&err), Some(NegotiationError::Failed)));
            assert_eq!(s.state(), StreamState::Errored);
            assert_eq!(cache.get(&peer), None);
            assert_eq!(book.first_supported_protocol(&peer, &[ProtocolId::from("/echo/1.0.0")]), None);
        });
    }
}
