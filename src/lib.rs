//! ## Summary
//!
//! A host for a multiplexed p2p network, deciding which protocol every
//! stream speaks.
//!
//! Protocols are named by path-like ids such as `/echo/1.0.0` and agreed on
//! with [multistream-select](https://github.com/multiformats/multistream-select).
//!
//! ### Concept
//!
//! #### Host
//!
//! The [`Host`] owns the connections to other peers. Inbound streams are
//! negotiated against the handlers registered with
//! [`Host::set_stream_handler`] or [`Host::set_stream_handler_match`].
//! Outbound streams are opened with [`Host::new_stream`].
//!
//! #### Protocol preference
//!
//! The protocol last agreed on with a peer is remembered. A stream to the
//! peer asserting that protocol skips the negotiation round trip: the
//! protocol is sent together with the first bytes written, and checked with
//! the first bytes read.
//!
//! ```no_run
//! use libp2p_host::{Host, HostConfig, PeerId, Stream};
//! use libp2p_host::libp2prs_traits::{ReadEx, WriteEx};
//!
//! libp2p_host::libp2prs_runtime::task::block_on(async {
//!     let host = Host::new(PeerId::random(), HostConfig::default());
//!     host.set_stream_handler("/echo/1.0.0", |mut stream: Stream| async move {
//!         let mut buf = [0u8; 64];
//!         while let Ok(n) = stream.read2(&mut buf).await {
//!             if n == 0 || stream.write_all2(&buf[..n]).await.is_err() {
//!                 break;
//!             }
//!         }
//!     });
//! });
//! ```

#![deny(missing_docs)]

/// Re-pub core crate
pub use libp2prs_core;
/// Re-pub runtime crate
pub use libp2prs_runtime;
/// Traits
pub use libp2prs_traits;

pub use libp2prs_host::*;
