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

use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use libp2prs_core::transport::memory::{MemoryConnection, MemoryTransport};
use libp2prs_host::{semver_matcher, Host, HostConfig, HostError, PeerId, PeerInfo, ProtocolId, Stream, StreamHandler, StreamState};
use libp2prs_runtime::task;
use libp2prs_traits::{ReadEx, WriteEx};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn protos(list: &[&str]) -> Vec<ProtocolId> {
    list.iter().map(|p| ProtocolId::from(*p)).collect()
}

/// Two hosts sharing one memory connection.
fn pair_hosts(config: HostConfig) -> (Host, Host) {
    let (a, b) = (PeerId::random(), PeerId::random());
    let h1 = Host::new(a, config.clone());
    let h2 = Host::new(b, config);

    let (c1, c2) = MemoryConnection::pair(a, b);
    h1.add_connection(Arc::new(c1)).expect("h1 open");
    h2.add_connection(Arc::new(c2)).expect("h2 open");
    (h1, h2)
}

async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        task::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn echo(mut stream: Stream) {
    let mut buf = [0u8; 256];
    loop {
        match stream.read2(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all2(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Echoes, reporting the protocol of every stream it is given.
fn tee(tx: mpsc::UnboundedSender<ProtocolId>) -> impl StreamHandler {
    move |stream: Stream| {
        let tx = tx.clone();
        async move {
            let _ = tx.unbounded_send(stream.protocol());
            echo(stream).await
        }
    }
}

async fn assert_echo(stream: &mut Stream, msg: &[u8]) {
    stream.write_all2(msg).await.expect("write");
    let mut buf = vec![0u8; msg.len()];
    stream.read_exact2(&mut buf).await.expect("read");
    assert_eq!(buf, msg);
}

#[test]
fn host_simple() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        let (tx, mut rx) = mpsc::unbounded();
        h2.set_stream_handler("/echo/1.0.0", tee(tx));

        let mut stream = h1.new_stream(&h2.id(), protos(&["/echo/1.0.0"])).await.expect("new stream");
        assert_eq!(stream.protocol(), "/echo/1.0.0");
        assert_eq!(stream.remote_peer(), h2.id());
        assert_eq!(stream.state(), StreamState::Open);

        assert_echo(&mut stream, b"hello world").await;
        assert_eq!(rx.next().await.expect("handler called"), "/echo/1.0.0");
        assert_eq!(stream.stats().byte_sent(), 11);

        stream.close2().await.expect("close");
        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn host_protocol_preference() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        let (tx, mut rx) = mpsc::unbounded();
        h1.set_stream_handler("/testing", tee(tx.clone()));

        let mut s = h2.new_stream(&h1.id(), protos(&["/testing"])).await.expect("new stream");
        assert_echo(&mut s, b"one").await;
        assert_eq!(rx.next().await.expect("handler called"), "/testing");
        assert_eq!(h2.protocol_preference(&h1.id()).expect("preference"), "/testing");
        s.close2().await.expect("close");

        let matcher = semver_matcher("/testing/1.1.0").expect("valid base");
        h1.set_stream_handler_match("/testing/1.1.0", matcher, tee(tx));

        // the preferred protocol is asserted lazily even when newer ones are
        // listed first
        let mut s = h2
            .new_stream(&h1.id(), protos(&["/testing/1.2.0", "/testing/1.1.0", "/testing"]))
            .await
            .expect("new stream");
        assert_eq!(s.protocol(), "/testing");
        assert_eq!(s.state(), StreamState::Negotiating);
        // nothing was sent yet
        assert!(task::timeout(Duration::from_millis(50), rx.next()).await.is_err());
        assert_echo(&mut s, b"two").await;
        assert_eq!(s.state(), StreamState::Open);
        assert_eq!(rx.next().await.expect("handler called"), "/testing");
        s.close2().await.expect("close");

        // without the preference among the candidates it negotiates
        let mut s = h2.new_stream(&h1.id(), protos(&["/testing/1.2.0"])).await.expect("new stream");
        assert_eq!(s.protocol(), "/testing/1.2.0");
        assert_echo(&mut s, b"three").await;
        assert_eq!(rx.next().await.expect("handler called"), "/testing/1.2.0");
        assert_eq!(h2.protocol_preference(&h1.id()).expect("preference"), "/testing/1.2.0");

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn host_protocol_mismatch() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/super", echo);

        let r = h2.new_stream(&h1.id(), protos(&["/foo", "/bar", "/baz/1.0.0"])).await;
        assert!(matches!(r, Err(HostError::ProtocolMismatch)));
        assert!(h2.protocol_preference(&h1.id()).is_none());

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn host_protocol_preknowledge() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        let (tx, mut rx) = mpsc::unbounded();
        h1.set_stream_handler("/super", tee(tx));
        h2.add_protocols(&h1.id(), protos(&["/super"]));

        let mut s = h2.new_stream(&h1.id(), protos(&["/foo", "/bar", "/super"])).await.expect("new stream");
        assert_eq!(s.protocol(), "/super");
        assert_eq!(s.state(), StreamState::Negotiating);

        // nothing was sent yet
        assert!(task::timeout(Duration::from_millis(50), rx.next()).await.is_err());

        // an empty read runs the handshake
        assert_eq!(s.read2(&mut []).await.expect("handshake"), 0);
        assert_eq!(s.state(), StreamState::Open);
        assert_eq!(rx.next().await.expect("handler called"), "/super");

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn new_dial_old() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/testing", echo);

        let mut s = h2
            .new_stream(&h1.id(), protos(&["/testing/1.0.0", "/testing"]))
            .await
            .expect("new stream");
        assert_eq!(s.protocol(), "/testing");
        assert_echo(&mut s, b"old").await;

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn invalid_candidates_are_ignored() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/good", echo);

        let s = h2.new_stream(&h1.id(), protos(&["bad", "", "/good"])).await.expect("new stream");
        assert_eq!(s.protocol(), "/good");

        let r = h2.new_stream(&h1.id(), protos(&["bad", ""])).await;
        assert!(matches!(r, Err(HostError::ProtocolMismatch)));
        let r = h2.new_stream(&h1.id(), vec![]).await;
        assert!(matches!(r, Err(HostError::ProtocolMismatch)));

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn lazy_rejection_drops_preference() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/a", echo);

        let mut s = h2.new_stream(&h1.id(), protos(&["/a"])).await.expect("new stream");
        assert_echo(&mut s, b"a").await;
        s.close2().await.expect("close");
        assert!(h2.protocol_preference(&h1.id()).is_some());

        h1.remove_stream_handler("/a");

        let mut s = h2.new_stream(&h1.id(), protos(&["/a"])).await.expect("new stream");
        assert_eq!(s.state(), StreamState::Negotiating);
        s.write_all2(b"a").await.expect("request sent");
        let mut buf = [0u8; 1];
        let err = s.read2(&mut buf).await.expect_err("rejected");
        assert!(matches!(HostError::from(err), HostError::ProtocolMismatch));
        assert_eq!(s.state(), StreamState::Errored);
        assert!(h2.protocol_preference(&h1.id()).is_none());

        // the next stream negotiates again
        let r = h2.new_stream(&h1.id(), protos(&["/a"])).await;
        assert!(matches!(r, Err(HostError::ProtocolMismatch)));

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn lazy_rejection_seen_by_writes() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/a", echo);

        let mut s = h2.new_stream(&h1.id(), protos(&["/a"])).await.expect("new stream");
        assert_echo(&mut s, b"a").await;
        s.close2().await.expect("close");

        h1.remove_stream_handler("/a");

        let mut s = h2.new_stream(&h1.id(), protos(&["/a"])).await.expect("new stream");
        assert_eq!(s.write2(b"one").await.expect("request sent"), 3);

        // keep writing only, until the refusal comes through
        let mut err = None;
        for _ in 0..100 {
            match s.write2(b"more").await {
                Ok(_) => task::sleep(Duration::from_millis(10)).await,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        let err = err.expect("write fails");
        assert!(matches!(HostError::from(err), HostError::ProtocolMismatch));
        assert_eq!(s.state(), StreamState::Errored);
        assert!(h2.protocol_preference(&h1.id()).is_none());
        assert!(matches!(s.write2(b"again").await.map_err(HostError::from), Err(HostError::ProtocolMismatch)));

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn refused_known_protocol_falls_back() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        let (tx, mut rx) = mpsc::unbounded();
        h1.set_stream_handler("/other", tee(tx));
        h2.add_protocols(&h1.id(), protos(&["/super"]));

        let mut s = h2.new_stream(&h1.id(), protos(&["/super", "/other"])).await.expect("new stream");
        assert_eq!(s.protocol(), "/super");
        let err = s.read2(&mut []).await.expect_err("refused");
        assert!(matches!(HostError::from(err), HostError::ProtocolMismatch));

        // the refused protocol is no longer asserted
        let mut s = h2.new_stream(&h1.id(), protos(&["/super", "/other"])).await.expect("new stream");
        assert_eq!(s.protocol(), "/other");
        assert_eq!(s.state(), StreamState::Open);
        assert_echo(&mut s, b"fallback").await;
        assert_eq!(rx.next().await.expect("handler called"), "/other");

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn disconnect_forgets_peer() {
    init_log();
    task::block_on(async {
        let (a, b) = (PeerId::random(), PeerId::random());
        let host = Host::new(a, HostConfig::default());
        let (c1, c2) = MemoryConnection::pair(a, b);
        host.add_connection(Arc::new(c1)).expect("open");
        host.add_protocols(&b, protos(&["/super"]));

        drop(c2);
        assert!(wait_until(|| !host.is_connected(&b)).await);

        // a new connection starts from scratch: the dial negotiates
        let (c1, _c2) = MemoryConnection::pair(a, b);
        host.add_connection(Arc::new(c1)).expect("open");
        let r = host
            .new_stream_with_timeout(&b, protos(&["/super"]), Duration::from_millis(100))
            .await;
        assert!(matches!(r, Err(HostError::NegotiationTimeout)));

        host.close().await;
    });
}

#[test]
fn explicit_negotiation_without_lazy_streams() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default().with_lazy_negotiation(false));
        h1.set_stream_handler("/one", echo);
        h2.add_protocols(&h1.id(), protos(&["/one"]));

        let mut s = h2.new_stream(&h1.id(), protos(&["/one"])).await.expect("new stream");
        assert_eq!(s.state(), StreamState::Open);
        assert_echo(&mut s, b"x").await;

        let s = h2.new_stream(&h1.id(), protos(&["/one"])).await.expect("new stream");
        assert_eq!(s.state(), StreamState::Open);

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn negotiation_timeout() {
    init_log();
    task::block_on(async {
        let (a, b) = (PeerId::random(), PeerId::random());
        let host = Host::new(a, HostConfig::default());
        // nobody accepts streams on the other end
        let (c1, _c2) = MemoryConnection::pair(a, b);
        host.add_connection(Arc::new(c1)).expect("open");

        let r = host
            .new_stream_with_timeout(&b, protos(&["/slow"]), Duration::from_millis(100))
            .await;
        assert!(matches!(r, Err(HostError::NegotiationTimeout)));
        assert!(host.protocol_preference(&b).is_none());

        host.close().await;
    });
}

#[test]
fn no_connection() {
    init_log();
    task::block_on(async {
        let host = Host::new(PeerId::random(), HostConfig::default());
        let peer = PeerId::random();
        let r = host.new_stream(&peer, protos(&["/a"])).await;
        assert!(matches!(r, Err(HostError::NoConnection(p)) if p == peer));

        let r = host.connect(PeerInfo::new(peer)).await;
        assert!(matches!(r, Err(HostError::NoTransport)));
    });
}

#[test]
fn closed_host_rejects_operations() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/a", echo);

        h1.close().await;
        // twice is fine
        h1.close().await;

        assert!(h1.protocols().is_empty());
        assert!(!h1.is_connected(&h2.id()));
        let r = h1.new_stream(&h2.id(), protos(&["/a"])).await;
        assert!(matches!(r, Err(HostError::Closed)));
        let (c, _) = MemoryConnection::pair(h1.id(), h2.id());
        assert!(matches!(h1.add_connection(Arc::new(c)), Err(HostError::Closed)));

        // the remote notices
        let id = h1.id();
        assert!(wait_until(|| !h2.is_connected(&id)).await);
        let r = h2.new_stream(&id, protos(&["/a"])).await;
        assert!(matches!(r, Err(HostError::NoConnection(_))));

        h2.close().await;
    });
}

#[test]
fn slow_handler_does_not_block_others() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/slow", |stream: Stream| async move {
            task::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });
        h1.set_stream_handler("/fast", echo);

        let mut slow = h2.new_stream(&h1.id(), protos(&["/slow"])).await.expect("slow stream");
        slow.write_all2(b"wait").await.expect("write");

        let fast = async {
            let mut s = h2.new_stream(&h1.id(), protos(&["/fast"])).await.expect("fast stream");
            assert_echo(&mut s, b"quick").await;
        };
        assert!(task::timeout(Duration::from_secs(1), fast).await.is_ok());

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn remove_stream_handler() {
    init_log();
    task::block_on(async {
        let (h1, h2) = pair_hosts(HostConfig::default());
        h1.set_stream_handler("/a", echo);
        h1.set_stream_handler("/b", echo);
        let mut list = h1.protocols();
        list.sort();
        assert_eq!(list, protos(&["/a", "/b"]));

        h1.remove_stream_handler("/a");
        assert_eq!(h1.protocols(), protos(&["/b"]));

        let r = h2.new_stream(&h1.id(), protos(&["/a"])).await;
        assert!(matches!(r, Err(HostError::ProtocolMismatch)));
        let s = h2.new_stream(&h1.id(), protos(&["/a", "/b"])).await.expect("new stream");
        assert_eq!(s.protocol(), "/b");

        h1.close().await;
        h2.close().await;
    });
}

#[test]
fn connect_through_transport() {
    init_log();
    task::block_on(async {
        let (a, b) = (PeerId::random(), PeerId::random());
        let h1 = Host::with_transport(a, HostConfig::default(), Arc::new(MemoryTransport)).expect("h1 listens");
        let h2 = Host::with_transport(b, HostConfig::default(), Arc::new(MemoryTransport)).expect("h2 listens");
        h1.set_stream_handler("/echo", echo);

        let pi = PeerInfo {
            peer_id: a,
            protocols: protos(&["/echo"]),
        };
        h2.connect(pi.clone()).await.expect("connect");
        assert!(h2.is_connected(&a));
        // already connected
        h2.connect(pi).await.expect("connect again");
        assert_eq!(h2.connected_peers(), vec![a]);
        assert!(wait_until(|| h1.is_connected(&b)).await);

        // the protocol is known, the stream is lazy
        let mut s = h2.new_stream(&a, protos(&["/echo"])).await.expect("new stream");
        assert_eq!(s.state(), StreamState::Negotiating);
        assert_echo(&mut s, b"over the wire").await;
        assert_eq!(s.state(), StreamState::Open);

        h1.close().await;
        h2.close().await;
    });
}
