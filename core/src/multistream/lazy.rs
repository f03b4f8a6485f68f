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

//! Lazy (0-RTT) protocol selection for a single protocol.
//!
//! When the dialer already knows which protocol the listener will accept,
//! there is no need to wait for the answer before using the stream. The
//! header and the protocol are sent along with the first write, and the
//! listener's confirmation is read in front of the first read.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::future::{self, Either};
use futures_timer::Delay;
use std::{convert::TryFrom, fmt, io, time::Duration};

use super::length_delimited::{encode_frame, recv_frame};
use super::negotiator::NegotiationError;
use super::protocol::{Message, Protocol, ProtocolError, Version};
use super::{ReadEx, WriteEx};
use crate::ProtocolId;

/// Progress of the lazy handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LazyState {
    /// Nothing has been written yet.
    Unsent,
    /// The header and the protocol are written, the answer is not read yet.
    HeaderSent,
    /// The listener echoed the protocol.
    Open,
    /// The listener answered `na`.
    Rejected,
    /// The handshake broke: I/O error, invalid answer or deadline.
    Failed,
}

/// A stream whose protocol is asserted rather than negotiated.
///
/// All I/O takes `&mut self`, so the first read and the first write can not
/// race: the header goes out exactly once.
pub struct LazyStream<S> {
    inner: S,
    protocol: Protocol,
    state: LazyState,
    timeout: Option<Duration>,
}

impl<S> fmt::Debug for LazyStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyStream")
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .finish()
    }
}

impl<S: ReadEx + WriteEx + Send + Unpin> LazyStream<S> {
    /// Asserts `protocol` on `inner`. Nothing is written before the first I/O.
    pub fn new(inner: S, protocol: ProtocolId) -> Result<Self, ProtocolError> {
        let protocol = Protocol::try_from(&protocol)?;
        Ok(LazyStream {
            inner,
            protocol,
            state: LazyState::Unsent,
            timeout: None,
        })
    }

    /// Bounds the wait for the listener's answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> LazyState {
        self.state
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol.clone().into()
    }

    async fn send_request(&mut self, payload: &[u8]) -> io::Result<usize> {
        let mut buf = BytesMut::new();
        let mut msg = BytesMut::new();
        for m in [Message::Header(Version::V1), Message::Protocol(self.protocol.clone())].iter() {
            msg.clear();
            m.encode(&mut msg)?;
            encode_frame(&msg, &mut buf)?;
        }
        buf.extend_from_slice(payload);

        if let Err(e) = self.inner.write_all2(&buf).await {
            self.state = LazyState::Failed;
            return Err(e);
        }
        log::trace!("lazy request for {} sent with {} bytes", self.protocol, payload.len());
        self.state = LazyState::HeaderSent;
        Ok(payload.len())
    }

    async fn confirm(&mut self) -> io::Result<()> {
        let answer = read_answer(&mut self.inner, &self.protocol);
        let result = match self.timeout {
            Some(t) => {
                futures::pin_mut!(answer);
                match future::select(answer, Delay::new(t)).await {
                    Either::Left((r, _)) => r,
                    Either::Right(_) => Err(NegotiationError::Timeout),
                }
            }
            None => answer.await,
        };

        match result {
            Ok(()) => {
                log::debug!("lazy protocol {} confirmed", self.protocol);
                self.state = LazyState::Open;
                Ok(())
            }
            Err(err) => {
                log::debug!("lazy protocol {} not confirmed: {}", self.protocol, err);
                self.state = match err {
                    NegotiationError::Failed => LazyState::Rejected,
                    _ => LazyState::Failed,
                };
                let _ = self.inner.close2().await;
                Err(err.into())
            }
        }
    }

    /// A write broke before the answer was read: the listener may have
    /// refused the protocol and closed the stream. Reads the answer so a
    /// refusal is reported as such.
    async fn write_failed(&mut self, err: io::Error) -> io::Error {
        if self.state != LazyState::HeaderSent {
            return err;
        }
        match self.confirm().await {
            Ok(()) => err,
            Err(e) => e,
        }
    }

    async fn ensure_open(&mut self) -> io::Result<()> {
        match self.state {
            LazyState::Unsent => {
                self.send_request(&[]).await?;
                self.confirm().await
            }
            LazyState::HeaderSent => self.confirm().await,
            LazyState::Open => Ok(()),
            LazyState::Rejected => Err(NegotiationError::Failed.into()),
            LazyState::Failed => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }
}

async fn read_answer<S: ReadEx + Send>(io: &mut S, protocol: &Protocol) -> Result<(), NegotiationError> {
    let mut buf = BytesMut::new();
    let msg = Message::decode(recv_frame(io, &mut buf).await?)?;
    if msg != Message::Header(Version::V1) {
        return Err(ProtocolError::InvalidMessage.into());
    }
    match Message::decode(recv_frame(io, &mut buf).await?)? {
        Message::Protocol(ref p) if p == protocol => Ok(()),
        Message::NotAvailable => Err(NegotiationError::Failed),
        _ => Err(ProtocolError::InvalidMessage.into()),
    }
}

#[async_trait]
impl<S: ReadEx + WriteEx + Send + Unpin> ReadEx for LazyStream<S> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open().await?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.inner.read2(buf).await
    }
}

#[async_trait]
impl<S: ReadEx + WriteEx + Send + Unpin> WriteEx for LazyStream<S> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.state {
            LazyState::Unsent => self.send_request(buf).await,
            LazyState::HeaderSent => match self.inner.write2(buf).await {
                Ok(n) => Ok(n),
                Err(e) => Err(self.write_failed(e).await),
            },
            LazyState::Open => self.inner.write2(buf).await,
            LazyState::Rejected => Err(NegotiationError::Failed.into()),
            LazyState::Failed => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    async fn flush2(&mut self) -> io::Result<()> {
        match self.inner.flush2().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.write_failed(e).await),
        }
    }

    async fn close2(&mut self) -> io::Result<()> {
        match self.inner.close2().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.write_failed(e).await),
        }
    }
}
