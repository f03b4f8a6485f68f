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

//! Connection oriented communication channels.
//!
//! The main entity of this module is the [`Transport`] trait, which provides
//! an interface for establishing connections with other peers and accepting
//! connections from them. A connection handed out by a transport is already
//! upgraded: secured, authenticated to a [`PeerId`] and multiplexed.

use async_trait::async_trait;
use std::{fmt, io, sync::Arc};
use thiserror::Error;

use crate::muxing::IStreamMuxer;
use crate::PeerId;

pub mod memory;

/// A transport provides connections to remote peers.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Listens for incoming connections addressed to `local`.
    fn listen_on(&self, local: PeerId) -> Result<ITransportListener, TransportError>;

    /// Establishes a connection from `local` to the peer `remote`.
    async fn dial(&self, local: PeerId, remote: PeerId) -> Result<IStreamMuxer, TransportError>;
}

pub type ITransport = Arc<dyn Transport>;

/// Event stream of inbound connections, produced by [`Transport::listen_on`].
///
/// Dropping the listener stops listening.
#[async_trait]
pub trait TransportListener: Send {
    /// Waits for the next inbound connection.
    async fn accept(&mut self) -> Result<IStreamMuxer, TransportError>;

    fn local_peer(&self) -> PeerId;
}

pub type ITransportListener = Box<dyn TransportListener>;

/// An error during dialing, listening or while using a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nobody listens for the peer we tried to reach.
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),

    /// Somebody already listens for this peer.
    #[error("a listener for {0} already exists")]
    ListenerExists(PeerId),

    /// The connection or the listener is closed.
    #[error("connection closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
