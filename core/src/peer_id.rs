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

use std::{fmt, str::FromStr};
use thiserror::Error;

const PEER_ID_LEN: usize = 32;

/// Identifier of a peer of the network.
///
/// Opaque 32 bytes, displayed in base58. How they are derived (usually a hash
/// of the public key used by the secure channel) is up to the layer that
/// authenticated the connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("base-58 decode error: {0}")]
    B58(String),
    #[error("invalid peer id length {0}, expected 32")]
    InvalidLength(usize),
}

impl PeerId {
    /// Generates a random peer ID.
    pub fn random() -> PeerId {
        PeerId(rand::random())
    }

    /// Builds a `PeerId` from its raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<PeerId, ParseError> {
        if data.len() != PEER_ID_LEN {
            return Err(ParseError::InvalidLength(data.len()));
        }
        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(data);
        Ok(PeerId(id))
    }

    /// Returns the raw bytes of this `PeerId`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns a base-58 encoded string of this `PeerId`.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_base58().fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|e| ParseError::B58(e.to_string()))?;
        PeerId::from_bytes(&bytes)
    }
}
