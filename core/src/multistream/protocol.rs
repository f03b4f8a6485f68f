// Copyright 2017 Parity Technologies (UK) Ltd.
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

//! Multistream-select protocol messages and their framing.
//!
//! Every message is one unsigned-varint length-prefixed frame whose text is
//! terminated by a line feed. See [`super::length_delimited`] for the
//! framing itself.

use bytes::{BufMut, Bytes, BytesMut};
use std::{convert::TryFrom, fmt, io};
use thiserror::Error;
use unsigned_varint as uvi;

use super::length_delimited::LengthDelimited;
use super::{ReadEx, WriteEx};
use crate::ProtocolId;

/// The maximum number of supported protocols that can be processed.
const MAX_PROTOCOLS: usize = 1000;

/// The encoded form of a multistream-select 1.0.0 header message.
const MSG_MULTISTREAM_1_0: &[u8] = b"/multistream/1.0.0\n";
/// The encoded form of a multistream-select 'na' message.
const MSG_PROTOCOL_NA: &[u8] = b"na\n";
/// The encoded form of a multistream-select 'ls' message.
const MSG_LS: &[u8] = b"ls\n";

/// Supported multistream-select versions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Version {
    /// Version 1 of the multistream-select protocol. See [1] and [2].
    ///
    /// [1]: https://github.com/libp2p/specs/blob/master/connections/README.md#protocol-negotiation
    /// [2]: https://github.com/multiformats/multistream-select
    V1,
}

impl Default for Version {
    fn default() -> Self {
        Version::V1
    }
}

/// A protocol (name) exchanged during protocol negotiation.
///
/// Always valid UTF-8 starting with `/`.
#[derive(Clone, PartialEq, Eq)]
pub struct Protocol(ProtocolId);

impl Protocol {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<[u8]> for Protocol {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl TryFrom<&str> for Protocol {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if !value.starts_with('/') {
            return Err(ProtocolError::InvalidProtocol);
        }
        Ok(Protocol(ProtocolId::new(value)))
    }
}

impl TryFrom<&[u8]> for Protocol {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let s = std::str::from_utf8(value).map_err(|_| ProtocolError::InvalidProtocol)?;
        Protocol::try_from(s)
    }
}

impl TryFrom<&ProtocolId> for Protocol {
    type Error = ProtocolError;

    fn try_from(value: &ProtocolId) -> Result<Self, Self::Error> {
        if !value.is_valid() {
            return Err(ProtocolError::InvalidProtocol);
        }
        Ok(Protocol(value.clone()))
    }
}

impl From<Protocol> for ProtocolId {
    fn from(p: Protocol) -> Self {
        p.0
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// A multistream-select protocol message.
///
/// Multistream-select protocol messages are exchanged with the goal
/// of agreeing on a application-layer protocol to use on an I/O stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A header message identifies the multistream-select protocol
    /// that the sender wishes to speak.
    Header(Version),
    /// A protocol message identifies a protocol request or acknowledgement.
    Protocol(Protocol),
    /// A message through which a peer requests the complete list of
    /// supported protocols from the remote.
    ListProtocols,
    /// A message listing a set of protocols, in order of preference.
    Protocols(Vec<Protocol>),
    /// A message signaling that a requested protocol is not available.
    NotAvailable,
}

impl Message {
    /// Encodes a `Message` into its byte representation.
    pub fn encode(&self, dest: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Message::Header(Version::V1) => {
                dest.reserve(MSG_MULTISTREAM_1_0.len());
                dest.put_slice(MSG_MULTISTREAM_1_0);
            }
            Message::Protocol(p) => {
                let len = p.as_ref().len() + 1; // + 1 for \n
                dest.reserve(len);
                dest.put_slice(p.as_ref());
                dest.put_u8(b'\n');
            }
            Message::ListProtocols => {
                dest.reserve(MSG_LS.len());
                dest.put_slice(MSG_LS);
            }
            Message::Protocols(ps) => {
                if ps.len() > MAX_PROTOCOLS {
                    return Err(ProtocolError::TooManyProtocols);
                }
                let mut buf = uvi::encode::usize_buffer();
                for p in ps {
                    let len = p.as_ref().len() + 1; // + 1 for \n
                    let encoded_len = uvi::encode::usize(len, &mut buf);
                    dest.reserve(encoded_len.len() + len);
                    dest.put_slice(encoded_len);
                    dest.put_slice(p.as_ref());
                    dest.put_u8(b'\n');
                }
                dest.put_u8(b'\n');
            }
            Message::NotAvailable => {
                dest.reserve(MSG_PROTOCOL_NA.len());
                dest.put_slice(MSG_PROTOCOL_NA);
            }
        }
        Ok(())
    }

    /// Decodes a `Message` from its byte representation.
    pub fn decode(mut msg: Bytes) -> Result<Message, ProtocolError> {
        if msg == MSG_MULTISTREAM_1_0 {
            return Ok(Message::Header(Version::V1));
        }

        if msg == MSG_PROTOCOL_NA {
            return Ok(Message::NotAvailable);
        }

        if msg == MSG_LS {
            return Ok(Message::ListProtocols);
        }

        // If it starts with a `/`, ends with a line feed without any
        // other line feeds in-between, it must be a protocol name.
        if msg.first() == Some(&b'/') && msg.last() == Some(&b'\n') && !msg[..msg.len() - 1].contains(&b'\n') {
            let p = Protocol::try_from(msg.split_to(msg.len() - 1).as_ref())?;
            return Ok(Message::Protocol(p));
        }

        // At this point, it must be a list of protocols, each
        // length-prefixed, with a final line feed.
        let mut protocols = Vec::new();
        let mut remaining: &[u8] = &msg;
        loop {
            // A well-formed message must be terminated with a newline.
            if remaining == [b'\n'] {
                break;
            } else if protocols.len() == MAX_PROTOCOLS {
                return Err(ProtocolError::TooManyProtocols);
            }

            // Decode the length of the next protocol name and check that
            // it ends with a line feed.
            let (len, tail) = uvi::decode::usize(remaining)?;
            if len == 0 || len > tail.len() || tail[len - 1] != b'\n' {
                return Err(ProtocolError::InvalidMessage);
            }

            // Parse the protocol name.
            let p = Protocol::try_from(&tail[..len - 1])?;
            protocols.push(p);

            // Skip ahead to the next protocol.
            remaining = &tail[len..];
        }

        Ok(Message::Protocols(protocols))
    }
}

/// A `MessageIO` implements a message based I/O on top of a
/// [`LengthDelimited`] I/O resource.
#[derive(Debug)]
pub struct MessageIO<R> {
    inner: LengthDelimited<R>,
}

impl<R: ReadEx + WriteEx + Send> MessageIO<R> {
    /// Constructs a new `MessageIO` resource wrapping the given I/O stream.
    pub fn new(inner: R) -> MessageIO<R> {
        Self {
            inner: LengthDelimited::new(inner),
        }
    }

    /// Drops the `MessageIO` resource, yielding the underlying I/O stream.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    /// Queues a message, to be written by the next
    /// [`flush`](MessageIO::flush) or [`send_message`](MessageIO::send_message).
    pub fn start_send(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf)?;
        self.inner.start_send(&buf)?;
        Ok(())
    }

    /// Writes all queued messages at once.
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        self.inner.flush_with(&[]).await?;
        Ok(())
    }

    pub async fn send_message(&mut self, msg: Message) -> Result<(), ProtocolError> {
        self.start_send(msg)?;
        self.flush().await
    }

    pub async fn recv_message(&mut self) -> Result<Message, ProtocolError> {
        let msg = self.inner.recv_message().await?;
        Message::decode(msg)
    }
}

/// A protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Received an invalid message from the remote.
    #[error("Received an invalid message from the remote.")]
    InvalidMessage,

    /// A protocol (name) is invalid.
    #[error("A protocol (name) is invalid.")]
    InvalidProtocol,

    /// Too many protocols have been returned by the remote.
    #[error("Too many protocols received.")]
    TooManyProtocols,
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        if let ProtocolError::IoError(e) = err {
            return e;
        }
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

impl From<uvi::decode::Error> for ProtocolError {
    fn from(_: uvi::decode::Error) -> ProtocolError {
        ProtocolError::InvalidMessage
    }
}
