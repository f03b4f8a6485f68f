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

//! Core types of the negotiating host.
//!
//! - A [`PeerId`] identifies a node on the network.
//! - A [`ProtocolId`] names an application protocol that may run over a
//!   stream, e.g. `/echo/1.0.0`.
//! - [`muxing::StreamMuxer`] is the seam to an established, secured and
//!   multiplexed connection. Everything below it (dialing, encryption,
//!   multiplexing) is provided by the transport layer.
//! - [`multistream`] decides which protocol a raw substream carries.

pub mod multistream;
pub mod muxing;
pub mod transport;

mod peer_id;
mod protocol_id;

pub use muxing::{IReadWrite, IStreamMuxer, StreamMuxer};
pub use peer_id::{ParseError, PeerId};
pub use protocol_id::ProtocolId;
pub use transport::{Transport, TransportError};
