//! # Multistream-select Protocol Negotiation
//!
//! This module implements the `multistream-select` protocol, which is the protocol
//! used by libp2p to negotiate which application-layer protocol to use with the
//! remote on a substream.
//!
//! ## Roles
//!
//! Two peers using the multistream-select negotiation protocol on an I/O stream
//! are distinguished by their role as a _dialer_ (or _initiator_) or as a _listener_
//! (or _responder_). Thereby the dialer plays the active part, driving the protocol,
//! whereas the listener reacts to the messages received.
//!
//! The dialer has two options: it can either propose its complete, ordered list
//! of protocols and let the listener pick the first one it supports, or it can
//! directly assert a single protocol it expects the listener to accept. Either
//! way the listener accepts by echoing the chosen protocol or rejects by
//! responding with a message stating "not available".
//!
//! See [`Negotiator::select_one`] and [`listener_select`].
//!
//! ## Lazy selection
//!
//! Asserting a protocol with a [`LazyStream`] sends the negotiation messages
//! together with the first data written, which results in 0-RTT negotiation.
//! The answer of the listener is read in front of the first data read.

mod lazy;
mod length_delimited;
mod negotiator;
mod protocol;

pub use self::lazy::{LazyState, LazyStream};
pub use self::length_delimited::LengthDelimited;
pub use self::negotiator::{listener_select, negotiation_error, NegotiationError, Negotiator};
pub use self::protocol::{Message, MessageIO, Protocol, ProtocolError, Version};

pub(self) use libp2prs_traits::ReadEx;
pub(self) use libp2prs_traits::WriteEx;
