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

//! Protocol handlers of the host.
//!
//! A handler is registered either for an exact protocol id, or with a match
//! function deciding which protocol ids it serves. Inbound streams are given
//! to the handler of the first requested protocol which matches.
//!
//! > **Note**: StreamHandler is an async trait and can be made into a trait object.
//! > Any `Fn(Stream) -> impl Future<Output = ()>` closure is a StreamHandler.

use async_trait::async_trait;
use futures::Future;
use libp2prs_core::ProtocolId;
use std::{fmt, sync::Arc};

use crate::stream::Stream;

/// Serves the inbound streams of a protocol.
///
/// The handler owns the stream. The stream is closed when it is dropped.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: Stream);
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(Stream) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, stream: Stream) {
        self(stream).await
    }
}

pub type IStreamHandler = Arc<dyn StreamHandler>;

/// Decides whether a protocol id is served by a handler.
pub type MatchFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

enum Matcher {
    Exact,
    Predicate(MatchFn),
}

struct HandlerEntry {
    id: ProtocolId,
    matcher: Matcher,
    handler: IStreamHandler,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.matcher {
            Matcher::Exact => "exact",
            Matcher::Predicate(_) => "match",
        };
        write!(f, "{}({})", kind, self.id)
    }
}

/// All handlers of a host, in registration order.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for exactly `id`.
    ///
    /// An earlier exact handler of `id` is replaced in place.
    pub fn add_handler(&mut self, id: ProtocolId, handler: IStreamHandler) {
        let existing = self
            .entries
            .iter_mut()
            .find(|e| matches!(e.matcher, Matcher::Exact) && e.id == id);
        match existing {
            Some(entry) => entry.handler = handler,
            None => self.entries.push(HandlerEntry {
                id,
                matcher: Matcher::Exact,
                handler,
            }),
        }
    }

    /// Registers `handler` for every protocol accepted by `matcher`. `id` is
    /// only used to remove the handler.
    ///
    /// An earlier match handler registered under `id` is removed: the new
    /// one is consulted after every other match handler.
    pub fn add_handler_match(&mut self, id: ProtocolId, matcher: MatchFn, handler: IStreamHandler) {
        self.entries
            .retain(|e| !(matches!(e.matcher, Matcher::Predicate(_)) && e.id == id));
        self.entries.push(HandlerEntry {
            id,
            matcher: Matcher::Predicate(matcher),
            handler,
        });
    }

    /// Removes both the exact and the match handler registered under `id`.
    pub fn remove_handler(&mut self, id: &ProtocolId) {
        self.entries.retain(|e| &e.id != id);
    }

    /// Finds the handler of the first candidate any handler accepts.
    ///
    /// Candidates are tried in order. For each, exact handlers come first,
    /// then match handlers in registration order. The returned protocol is
    /// the candidate itself.
    pub fn match_protocols(&self, candidates: &[ProtocolId]) -> Option<(ProtocolId, IStreamHandler)> {
        candidates.iter().find_map(|c| {
            self.find_exact(c)
                .or_else(|| self.find_predicate(c))
                .map(|h| (c.clone(), h))
        })
    }

    fn find_exact(&self, candidate: &ProtocolId) -> Option<IStreamHandler> {
        self.entries
            .iter()
            .find(|e| matches!(e.matcher, Matcher::Exact) && &e.id == candidate)
            .map(|e| e.handler.clone())
    }

    fn find_predicate(&self, candidate: &ProtocolId) -> Option<IStreamHandler> {
        self.entries
            .iter()
            .find(|e| match &e.matcher {
                Matcher::Predicate(m) => m(candidate.as_str()),
                Matcher::Exact => false,
            })
            .map(|e| e.handler.clone())
    }

    /// Returns the ids of all handlers, in registration order.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        let mut ids: Vec<ProtocolId> = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            if !ids.contains(&e.id) {
                ids.push(e.id.clone());
            }
        }
        ids
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
