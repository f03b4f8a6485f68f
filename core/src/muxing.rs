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

//! Muxing is the process of splitting a connection into multiple substreams.
//!
//! The main item of this module is the `StreamMuxer` trait. An implementation
//! of `StreamMuxer` has ownership of an established, already secured
//! connection to one remote peer, and lets you open and accept substreams on
//! it.
//!
//! Each substream of a connection is an isolated stream of data. In the
//! context of the host every substream runs its own protocol, agreed on by
//! multistream-select right after the substream is opened. Opening a
//! substream is almost free, so protocols are encouraged to open one per
//! request.

use async_trait::async_trait;
use libp2prs_traits::{ReadEx, WriteEx};
use std::{fmt, io, sync::Arc};

use crate::transport::TransportError;
use crate::PeerId;

/// A raw substream, before or after negotiation.
pub trait ReadWriteEx: ReadEx + WriteEx + Send + Unpin + fmt::Debug {}

impl<T: ReadEx + WriteEx + Send + Unpin + fmt::Debug> ReadWriteEx for T {}

pub type IReadWrite = Box<dyn ReadWriteEx>;

#[async_trait]
impl ReadEx for IReadWrite {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read2(buf).await
    }
}

#[async_trait]
impl WriteEx for IReadWrite {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        (**self).flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        (**self).close2().await
    }
}

/// An established connection to a remote peer.
///
/// All methods take `&self`: the host opens streams from many tasks while
/// the accept loop of the connection waits in `accept_stream`.
#[async_trait]
pub trait StreamMuxer: Send + Sync + fmt::Debug {
    /// Opens a new outbound substream.
    async fn open_stream(&self) -> Result<IReadWrite, TransportError>;

    /// Waits for the remote to open a substream.
    ///
    /// Fails with `TransportError::Closed` once the connection is gone.
    async fn accept_stream(&self) -> Result<IReadWrite, TransportError>;

    /// Closes the connection. Every substream observes end of stream.
    async fn close(&self) -> Result<(), TransportError>;

    fn local_peer(&self) -> PeerId;

    fn remote_peer(&self) -> PeerId;
}

pub type IStreamMuxer = Arc<dyn StreamMuxer>;
