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

use std::time::Duration;

/// Default deadline of a protocol negotiation, both directions.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Default deadline of a dial through the transport.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(20);

/// The configuration for the `Host`.
#[derive(Debug, Clone)]
pub struct HostConfig {
    negotiation_timeout: Duration,
    dial_timeout: Duration,
    lazy_negotiation: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            lazy_negotiation: true,
        }
    }
}

impl HostConfig {
    /// Sets the deadline of a protocol negotiation.
    ///
    /// Bounds the round trip of an explicit selection, the wait for the
    /// confirmation of a lazy stream and the inbound negotiation. An
    /// inbound lazy stream left idle by the dialer for longer is dropped.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Sets the deadline of dialing a peer.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Enables or disables lazy (0-RTT) streams for protocols a peer is
    /// known to support.
    pub fn with_lazy_negotiation(mut self, enabled: bool) -> Self {
        self.lazy_negotiation = enabled;
        self
    }

    pub fn negotiation_timeout(&self) -> Duration {
        self.negotiation_timeout
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn lazy_negotiation(&self) -> bool {
        self.lazy_negotiation
    }
}
