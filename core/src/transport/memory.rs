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

//! In-memory connections between hosts living in the same process.
//!
//! Listeners register themselves in a process wide hub keyed by the peer id
//! they accept connections for. Every substream of a [`MemoryConnection`] is
//! a [`Channel`]: a pair of bounded queues carrying byte chunks.

use async_trait::async_trait;
use fnv::FnvHashMap;
use futures::{
    channel::mpsc,
    lock::Mutex as AsyncMutex,
    prelude::*,
    task::{Context, Poll},
    AsyncReadExt, AsyncWriteExt, SinkExt, StreamExt,
};
use lazy_static::lazy_static;
use libp2prs_traits::{ReadEx, WriteEx};
use parking_lot::Mutex;
use rw_stream_sink::RwStreamSink;
use std::{collections::hash_map::Entry, fmt, io, pin::Pin, sync::Arc};

use crate::muxing::{IReadWrite, IStreamMuxer, StreamMuxer};
use crate::transport::{ITransportListener, Transport, TransportError, TransportListener};
use crate::PeerId;

lazy_static! {
    static ref HUB: Mutex<FnvHashMap<PeerId, mpsc::Sender<MemoryConnection>>> = Mutex::new(FnvHashMap::default());
}

/// Transport reaching the peers listening in this process.
#[derive(Debug, Copy, Clone, Default)]
pub struct MemoryTransport;

#[async_trait]
impl Transport for MemoryTransport {
    fn listen_on(&self, local: PeerId) -> Result<ITransportListener, TransportError> {
        let mut hub = HUB.lock();

        let (tx, rx) = mpsc::channel(2);
        match hub.entry(local) {
            Entry::Occupied(_) => return Err(TransportError::ListenerExists(local)),
            Entry::Vacant(e) => e.insert(tx),
        };

        log::debug!("memory transport listening for {}", local);
        Ok(Box::new(Listener { local, receiver: rx }))
    }

    async fn dial(&self, local: PeerId, remote: PeerId) -> Result<IStreamMuxer, TransportError> {
        // get a cloned sender, unlock the HUB asap
        let mut sender = {
            let hub = HUB.lock();
            if let Some(sender) = hub.get(&remote) {
                sender.clone()
            } else {
                return Err(TransportError::Unreachable(remote));
            }
        };

        let (dialer, listener) = MemoryConnection::pair(local, remote);
        sender.send(listener).await.map_err(|_| TransportError::Unreachable(remote))?;

        log::debug!("memory connection {} -> {} established", local, remote);
        Ok(Arc::new(dialer))
    }
}

/// Listener for memory connections.
pub struct Listener {
    /// The peer we accept connections for.
    local: PeerId,
    /// Receives incoming connections.
    receiver: mpsc::Receiver<MemoryConnection>,
}

#[async_trait]
impl TransportListener for Listener {
    async fn accept(&mut self) -> Result<IStreamMuxer, TransportError> {
        let conn = self.receiver.next().await.ok_or(TransportError::Closed)?;
        Ok(Arc::new(conn))
    }

    fn local_peer(&self) -> PeerId {
        self.local
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let val_in = HUB.lock().remove(&self.local);
        debug_assert!(val_in.is_some());
    }
}

/// State shared by both ends of a memory connection.
#[derive(Default)]
struct Shared {
    closed: bool,
    /// Queues opening substreams towards each end.
    openers: Vec<mpsc::Sender<Channel>>,
    /// Write halves of every substream, of both ends.
    writers: Vec<mpsc::Sender<Vec<u8>>>,
}

impl Shared {
    fn close(&mut self) {
        self.closed = true;
        for opener in self.openers.iter_mut() {
            opener.close_channel();
        }
        for writer in self.writers.iter_mut() {
            writer.close_channel();
        }
        self.writers.clear();
    }
}

/// One end of an in-memory connection.
pub struct MemoryConnection {
    local: PeerId,
    remote: PeerId,
    outgoing: mpsc::Sender<Channel>,
    incoming: AsyncMutex<mpsc::Receiver<Channel>>,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryConnection {
    /// Creates both ends of a connection between `local` and `remote`.
    ///
    /// The first item is the end owned by `local`.
    pub fn pair(local: PeerId, remote: PeerId) -> (MemoryConnection, MemoryConnection) {
        let (a_tx, a_rx) = mpsc::channel(16);
        let (b_tx, b_rx) = mpsc::channel(16);

        let shared = Arc::new(Mutex::new(Shared {
            closed: false,
            openers: vec![a_tx.clone(), b_tx.clone()],
            writers: Vec::new(),
        }));

        let a = MemoryConnection {
            local,
            remote,
            outgoing: b_tx,
            incoming: AsyncMutex::new(a_rx),
            shared: shared.clone(),
        };
        let b = MemoryConnection {
            local: remote,
            remote: local,
            outgoing: a_tx,
            incoming: AsyncMutex::new(b_rx),
            shared,
        };
        (a, b)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.lock().close();
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

#[async_trait]
impl StreamMuxer for MemoryConnection {
    async fn open_stream(&self) -> Result<IReadWrite, TransportError> {
        let (local, remote) = Channel::pair();
        let mut sender = {
            let mut shared = self.shared.lock();
            if shared.closed {
                return Err(TransportError::Closed);
            }
            shared.writers.retain(|w| !w.is_closed());
            shared.writers.push(local.writer());
            shared.writers.push(remote.writer());
            self.outgoing.clone()
        };

        sender.send(remote).await.map_err(|_| TransportError::Closed)?;
        log::trace!("memory stream opened {} -> {}", self.local, self.remote);
        Ok(Box::new(local))
    }

    async fn accept_stream(&self) -> Result<IReadWrite, TransportError> {
        let mut incoming = self.incoming.lock().await;
        let channel = incoming.next().await.ok_or(TransportError::Closed)?;
        Ok(Box::new(channel))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if !shared.closed {
            log::debug!("memory connection {} -> {} closed", self.local, self.remote);
            shared.close();
        }
        Ok(())
    }

    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn remote_peer(&self) -> PeerId {
        self.remote
    }
}

/// A channel represents an established, in-memory, logical connection between two endpoints.
///
/// Implements `ReadEx` and `WriteEx`.
pub struct Channel {
    io: RwStreamSink<Chan<Vec<u8>>>,
    writer: mpsc::Sender<Vec<u8>>,
}

impl Channel {
    /// Creates both ends of a duplex byte channel.
    pub fn pair() -> (Channel, Channel) {
        let (a_tx, a_rx) = mpsc::channel(4096);
        let (b_tx, b_rx) = mpsc::channel(4096);

        let a = Channel {
            writer: b_tx.clone(),
            io: RwStreamSink::new(Chan {
                incoming: a_rx,
                outgoing: b_tx,
            }),
        };
        let b = Channel {
            writer: a_tx.clone(),
            io: RwStreamSink::new(Chan {
                incoming: b_rx,
                outgoing: a_tx,
            }),
        };
        (a, b)
    }

    fn writer(&self) -> mpsc::Sender<Vec<u8>> {
        self.writer.clone()
    }
}

// The remote reads end of stream once this end is gone.
impl Drop for Channel {
    fn drop(&mut self) {
        self.writer.close_channel();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Channel")
    }
}

#[async_trait]
impl ReadEx for Channel {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf).await
    }
}

#[async_trait]
impl WriteEx for Channel {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.io.flush().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.io.close().await
    }
}

/// Implements `Sink` and `Stream` over a pair of queues.
///
/// A closed incoming queue is end of stream.
pub struct Chan<T = Vec<u8>> {
    incoming: mpsc::Receiver<T>,
    outgoing: mpsc::Sender<T>,
}

impl<T> Unpin for Chan<T> {}

impl<T> Stream for Chan<T> {
    type Item = Result<T, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match Stream::poll_next(Pin::new(&mut self.incoming), cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(v)) => Poll::Ready(Some(Ok(v))),
        }
    }
}

impl<T> Sink<T> for Chan<T> {
    type Error = io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.outgoing
            .poll_ready(cx)
            .map(|v| v.map_err(|_| io::ErrorKind::BrokenPipe.into()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: T) -> Result<(), Self::Error> {
        self.outgoing
            .start_send(item)
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.outgoing.close_channel();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_twice() {
        let transport = MemoryTransport::default();
        let peer = PeerId::random();

        let listener = transport.listen_on(peer).unwrap();
        assert!(matches!(transport.listen_on(peer), Err(TransportError::ListenerExists(_))));
        drop(listener);
        assert!(transport.listen_on(peer).is_ok());
    }

    #[test]
    fn peer_not_listening() {
        futures::executor::block_on(async move {
            let transport = MemoryTransport::default();
            let remote = PeerId::random();
            assert!(matches!(
                transport.dial(PeerId::random(), remote).await,
                Err(TransportError::Unreachable(_))
            ));

            let _listener = transport.listen_on(remote).unwrap();
            assert!(transport.dial(PeerId::random(), remote).await.is_ok());
        });
    }

    #[test]
    fn communicating_between_dialer_and_listener() {
        let msg = [1, 2, 3];
        let local = PeerId::random();
        let remote = PeerId::random();

        let t1 = MemoryTransport::default();
        let mut listener = t1.listen_on(remote).unwrap();

        let listener = async move {
            let conn = listener.accept().await.unwrap();
            assert_eq!(conn.remote_peer(), local);

            let mut socket = conn.accept_stream().await.unwrap();
            let mut buf = [0; 3];
            socket.read_exact2(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
            socket.write_all2(&buf).await.unwrap();
        };

        let t2 = MemoryTransport::default();
        let dialer = async move {
            let conn = t2.dial(local, remote).await.unwrap();
            assert_eq!(conn.remote_peer(), remote);

            let mut socket = conn.open_stream().await.unwrap();
            socket.write_all2(&msg).await.unwrap();
            let mut buf = [0; 3];
            socket.read_exact2(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        };

        futures::executor::block_on(futures::future::join(listener, dialer));
    }

    #[test]
    fn channel_close_is_eof() {
        futures::executor::block_on(async {
            let (mut a, mut b) = Channel::pair();
            a.write_all2(b"bye").await.unwrap();
            a.close2().await.unwrap();

            let mut buf = [0u8; 8];
            let n = b.read2(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"bye");
            assert_eq!(b.read2(&mut buf).await.unwrap(), 0);
        });
    }

    #[test]
    fn connection_close_ends_streams() {
        futures::executor::block_on(async {
            let (a, b) = MemoryConnection::pair(PeerId::random(), PeerId::random());
            let mut outbound = a.open_stream().await.unwrap();
            let mut inbound = b.accept_stream().await.unwrap();

            b.close().await.unwrap();
            assert!(a.is_closed());

            let mut buf = [0u8; 4];
            assert_eq!(outbound.read2(&mut buf).await.unwrap(), 0);
            assert_eq!(inbound.read2(&mut buf).await.unwrap(), 0);
            assert!(outbound.write_all2(b"late").await.is_err());
            assert!(matches!(a.accept_stream().await, Err(TransportError::Closed)));
            assert!(matches!(a.open_stream().await, Err(TransportError::Closed)));
        });
    }
}
