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

use fnv::FnvHashMap;
use libp2prs_core::{PeerId, ProtocolId};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

type Entry = Arc<Mutex<Option<ProtocolId>>>;

/// The protocol last negotiated with each peer.
///
/// The outer map is only write-locked to add or remove a peer; updates of a
/// known peer take the lock of that peer only. The last writer wins.
#[derive(Debug, Clone, Default)]
pub struct PreferenceCache {
    inner: Arc<RwLock<FnvHashMap<PeerId, Entry>>>,
}

impl PreferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, peer: &PeerId) -> Option<Entry> {
        self.inner.read().get(peer).cloned()
    }

    pub fn get(&self, peer: &PeerId) -> Option<ProtocolId> {
        self.entry(peer).and_then(|e| e.lock().clone())
    }

    /// Records `protocol` as the preference of `peer`.
    pub fn set(&self, peer: PeerId, protocol: ProtocolId) {
        if let Some(e) = self.entry(&peer) {
            *e.lock() = Some(protocol);
            return;
        }
        // a new entry is filled in under the write lock, a concurrent
        // remove can't orphan it
        let mut map = self.inner.write();
        *map.entry(peer).or_default().lock() = Some(protocol);
    }

    /// Forgets the preference of `peer`.
    pub fn remove(&self, peer: &PeerId) {
        self.inner.write().remove(peer);
    }

    /// Forgets the preference of `peer` if it is still `protocol`.
    ///
    /// Returns whether the preference was dropped.
    pub fn remove_if(&self, peer: &PeerId, protocol: &ProtocolId) -> bool {
        if let Some(e) = self.entry(peer) {
            let mut current = e.lock();
            if current.as_ref() == Some(protocol) {
                *current = None;
                return true;
            }
        }
        false
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// The number of peers with a preference.
    pub fn len(&self) -> usize {
        self.inner.read().values().filter(|e| e.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn last_writer_wins() {
        let cache = PreferenceCache::new();
        let peer = PeerId::random();
        assert_eq!(cache.get(&peer), None);

        cache.set(peer, "/a".into());
        cache.set(peer, "/b".into());
        assert_eq!(cache.get(&peer), Some("/b".into()));
        assert_eq!(cache.len(), 1);

        cache.remove(&peer);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_if_only_drops_matching() {
        let cache = PreferenceCache::new();
        let peer = PeerId::random();
        cache.set(peer, "/new".into());

        assert!(!cache.remove_if(&peer, &"/old".into()));
        assert_eq!(cache.get(&peer), Some("/new".into()));
        assert!(cache.remove_if(&peer, &"/new".into()));
        assert_eq!(cache.get(&peer), None);
        assert!(!cache.remove_if(&PeerId::random(), &"/new".into()));
    }

    #[test]
    fn set_after_remove_is_kept() {
        let cache = PreferenceCache::new();
        let peer = PeerId::random();

        let remover = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    cache.remove(&peer);
                }
            })
        };
        for n in 0..1000 {
            cache.set(peer, format!("/p/{}", n).into());
        }
        remover.join().unwrap();

        cache.remove(&peer);
        cache.set(peer, "/last".into());
        assert_eq!(cache.get(&peer), Some("/last".into()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn peers_are_independent() {
        let cache = PreferenceCache::new();
        let peers: Vec<PeerId> = (0..8).map(|_| PeerId::random()).collect();

        let handles: Vec<_> = peers
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, peer)| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for n in 0..100 {
                        cache.set(peer, format!("/p/{}/{}", i, n).into());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for (i, peer) in peers.iter().enumerate() {
            assert_eq!(cache.get(peer), Some(format!("/p/{}/99", i).into()));
        }
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
