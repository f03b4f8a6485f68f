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

use libp2prs_core::multistream::{negotiation_error, NegotiationError, ProtocolError};
use libp2prs_core::transport::TransportError;
use libp2prs_core::PeerId;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

/// Errors of the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The remote supports none of the requested protocols.
    #[error("protocol mismatch, no protocol could be agreed upon")]
    ProtocolMismatch,

    /// The remote did not complete the negotiation in time.
    #[error("protocol negotiation timed out")]
    NegotiationTimeout,

    /// A protocol id can not be used to build a matcher.
    #[error("invalid protocol spec '{0}': {1}")]
    InvalidProtocolSpec(String, String),

    /// The connection or the stream went away.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("no connection to peer {0}")]
    NoConnection(PeerId),

    #[error("no transport configured")]
    NoTransport,

    /// The host has been closed.
    #[error("host closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl From<NegotiationError> for HostError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::Failed => HostError::ProtocolMismatch,
            NegotiationError::Timeout => HostError::NegotiationTimeout,
            NegotiationError::ProtocolError(ProtocolError::IoError(e)) => e.into(),
            NegotiationError::ProtocolError(e) => HostError::Protocol(e),
        }
    }
}

impl From<TransportError> for HostError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => HostError::ConnectionClosed,
            e => HostError::Transport(e),
        }
    }
}

/// Negotiation errors travel inside `io::Error` when raised by stream I/O;
/// they are unwrapped here.
impl From<io::Error> for HostError {
    fn from(err: io::Error) -> Self {
        if negotiation_error(&err).is_some() {
            let kind = err.kind();
            if let Some(Ok(e)) = err.into_inner().map(|e| e.downcast::<NegotiationError>()) {
                return HostError::from(*e);
            }
            return HostError::Io(kind.into());
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected => HostError::ConnectionClosed,
            _ => HostError::Io(err),
        }
    }
}
