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

use fnv::{FnvHashMap, FnvHashSet};
use libp2prs_core::{PeerId, ProtocolId};
use parking_lot::Mutex;
use std::sync::Arc;

/// The protocols known to be supported by other peers.
///
/// Filled from out of band knowledge, e.g. the protocols shared by a peer
/// when we connected to it. Used to pick a protocol for a lazy stream.
#[derive(Debug, Default, Clone)]
pub struct ProtocolBook {
    inner: Arc<Mutex<FnvHashMap<PeerId, FnvHashSet<ProtocolId>>>>,
}

impl ProtocolBook {
    /// Adds the supported protocols of a peer to the book.
    pub fn add_protocols(&self, peer_id: &PeerId, protos: Vec<ProtocolId>) {
        let mut guard = self.inner.lock();
        guard.entry(*peer_id).or_default().extend(protos);
    }

    /// Clears the protocols by peer_id.
    pub fn clear_protocols(&self, peer_id: &PeerId) {
        let mut guard = self.inner.lock();
        if let Some(protos) = guard.get_mut(peer_id) {
            protos.clear();
        }
    }

    /// Gets the protocols by peer_id.
    pub fn get_protocols(&self, peer_id: &PeerId) -> Option<Vec<ProtocolId>> {
        let guard = self.inner.lock();
        guard.get(peer_id).map(|protos| protos.iter().cloned().collect())
    }

    /// Gets the first of the given protocols the peer supports.
    pub fn first_supported_protocol(&self, peer_id: &PeerId, protos: &[ProtocolId]) -> Option<ProtocolId> {
        let guard = self.inner.lock();
        let supported = guard.get(peer_id)?;
        protos.iter().find(|p| supported.contains(*p)).cloned()
    }

    /// Forgets one protocol of the peer, e.g. after the peer refused it.
    pub fn remove_protocol(&self, peer_id: &PeerId, proto: &ProtocolId) {
        let mut guard = self.inner.lock();
        if let Some(protos) = guard.get_mut(peer_id) {
            protos.remove(proto);
        }
    }

    /// Forgets everything about the peer.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.inner.lock().remove(peer_id);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_basic() {
        let book = ProtocolBook::default();
        let peer_id = PeerId::random();

        let proto_list: Vec<ProtocolId> = vec!["/libp2p/secio/1.0.0".into(), "/libp2p/yamux/1.0.0".into()];
        book.add_protocols(&peer_id, proto_list.clone());

        let p = book.get_protocols(&peer_id).unwrap();
        for i in proto_list {
            assert!(p.contains(&i));
        }

        let optional_list: Vec<ProtocolId> = vec!["/libp2p/noise/1.0.0".into(), "/libp2p/yamux/1.0.0".into()];
        let protocol = book.first_supported_protocol(&peer_id, &optional_list);
        assert_eq!(protocol.unwrap(), "/libp2p/yamux/1.0.0");
        assert_eq!(book.first_supported_protocol(&PeerId::random(), &optional_list), None);
    }

    #[test]
    fn clear_and_remove() {
        let book = ProtocolBook::default();
        let peer_id = PeerId::random();
        book.add_protocols(&peer_id, vec!["/a".into(), "/b".into()]);

        book.remove_protocol(&peer_id, &"/a".into());
        assert_eq!(book.get_protocols(&peer_id), Some(vec!["/b".into()]));
        book.remove_protocol(&PeerId::random(), &"/b".into());

        book.clear_protocols(&peer_id);
        assert_eq!(book.get_protocols(&peer_id), Some(vec![]));

        book.remove_peer(&peer_id);
        assert_eq!(book.get_protocols(&peer_id), None);

        book.add_protocols(&peer_id, vec!["/a".into()]);
        book.clear();
        assert_eq!(book.get_protocols(&peer_id), None);
    }
}
