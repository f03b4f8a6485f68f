use std::convert::TryFrom as _;
use std::{fmt, io};

use super::{
    protocol::{Message, MessageIO, Protocol, ProtocolError, Version},
    ReadEx, WriteEx,
};
use crate::ProtocolId;

/// Negotiates a protocol on a stream, in the dialer or in the listener role,
/// over a fixed list of protocols.
pub struct Negotiator<TProto> {
    protocols: Vec<(TProto, Protocol)>,
}

impl<TProto: AsRef<[u8]> + Clone> Negotiator<TProto> {
    pub fn new() -> Self {
        Negotiator { protocols: Vec::new() }
    }

    /// Creates a negotiator over `protocols`, in order of preference.
    ///
    /// Names which are not valid protocols are dropped with a warning.
    pub fn new_with_protocols<Iter>(protocols: Iter) -> Self
    where
        Iter: IntoIterator<Item = TProto>,
    {
        let protocols: Vec<_> = protocols
            .into_iter()
            .filter_map(|n| match Protocol::try_from(n.as_ref()) {
                Ok(p) => Some((n, p)),
                Err(e) => {
                    log::warn!(
                        "Ignoring invalid protocol: {} due to {}",
                        String::from_utf8_lossy(n.as_ref()),
                        e
                    );
                    None
                }
            })
            .collect();

        Negotiator { protocols }
    }

    /// Listener role: answers a request with the first requested protocol
    /// which is in our list.
    pub async fn negotiate<TSocket>(&self, socket: TSocket) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send + Unpin,
    {
        let (_, proto, socket) = listener_select(socket, |candidates| {
            candidates.iter().find_map(|c| {
                self.protocols
                    .iter()
                    .find(|(_, p)| p.as_str() == c.as_str())
                    .map(|(name, _)| (c.clone(), name.clone()))
            })
        })
        .await?;
        Ok((proto, socket))
    }

    /// Dialer role: proposes the whole list at once and lets the listener
    /// pick one.
    ///
    /// The header and the list are written together, so the negotiation
    /// costs exactly one round trip. Fails without any I/O when the list is
    /// empty.
    pub async fn select_one<TSocket>(&self, socket: TSocket) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send + Unpin,
    {
        if self.protocols.is_empty() {
            return Err(NegotiationError::Failed);
        }

        let mut io = MessageIO::new(socket);

        let version = Version::default();
        io.start_send(Message::Header(version))?;
        let supported = self.protocols.iter().map(|(_, p)| p).cloned().collect();
        io.start_send(Message::Protocols(supported))?;
        io.flush().await?;
        log::debug!("Dialer: Proposed protocols: {:?}", self.protocols.iter().map(|(_, p)| p).collect::<Vec<_>>());

        let msg = io.recv_message().await?;
        if msg != Message::Header(version) {
            return Err(ProtocolError::InvalidMessage.into());
        }

        match io.recv_message().await? {
            Message::Protocol(p) => {
                let proto = self
                    .protocols
                    .iter()
                    .find_map(|(name, proto)| if &p == proto { Some(name.clone()) } else { None });
                match proto {
                    Some(proto) => {
                        log::debug!("Dialer: Received confirmation for protocol: {}", p);
                        Ok((proto, io.into_inner()))
                    }
                    None => {
                        log::debug!("Dialer: Received unsolicited protocol: {}", p);
                        Err(ProtocolError::InvalidMessage.into())
                    }
                }
            }
            Message::NotAvailable => {
                log::debug!("Dialer: Received rejection of all proposed protocols");
                Err(NegotiationError::Failed)
            }
            _ => Err(ProtocolError::InvalidMessage.into()),
        }
    }
}

impl<TProto: AsRef<[u8]> + Clone> Default for Negotiator<TProto> {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener role of a negotiation.
///
/// Reads the header and one request: either a list of candidates or a
/// single protocol asserted by a lazy dialer. `select` is called with the
/// candidates in the order of the dialer's preference. When it picks one,
/// the header and the chosen protocol are echoed back and the chosen
/// protocol, the value yielded by `select` and the socket are returned.
/// Otherwise the listener answers `na` and fails.
pub async fn listener_select<TSocket, T, F>(socket: TSocket, select: F) -> Result<(ProtocolId, T, TSocket), NegotiationError>
where
    TSocket: ReadEx + WriteEx + Send + Unpin,
    F: FnOnce(&[ProtocolId]) -> Option<(ProtocolId, T)>,
{
    let mut io = MessageIO::new(socket);
    let version = match io.recv_message().await? {
        Message::Header(v) => v,
        _ => return Err(ProtocolError::InvalidMessage.into()),
    };

    let candidates: Vec<ProtocolId> = match io.recv_message().await? {
        Message::Protocols(ps) => ps.into_iter().map(ProtocolId::from).collect(),
        Message::Protocol(p) => vec![p.into()],
        _ => return Err(ProtocolError::InvalidMessage.into()),
    };
    log::trace!("Listener: received request for {:?}", candidates);

    io.start_send(Message::Header(version))?;
    match select(&candidates) {
        Some((selected, t)) => {
            io.start_send(Message::Protocol(Protocol::try_from(&selected)?))?;
            io.flush().await?;
            log::debug!("Listener: confirmed protocol: {}", selected);
            Ok((selected, t, io.into_inner()))
        }
        None => {
            io.start_send(Message::NotAvailable)?;
            io.flush().await?;
            log::debug!("Listener: rejected protocols: {:?}", candidates);
            Err(NegotiationError::Failed)
        }
    }
}

/// Error that can happen when negotiating a protocol with the remote.
#[derive(Debug)]
pub enum NegotiationError {
    /// A protocol error occurred during the negotiation.
    ProtocolError(ProtocolError),

    /// Protocol negotiation failed because no protocol could be agreed upon.
    Failed,

    /// The remote did not answer in time.
    Timeout,
}

impl From<ProtocolError> for NegotiationError {
    fn from(err: ProtocolError) -> NegotiationError {
        NegotiationError::ProtocolError(err)
    }
}

impl From<io::Error> for NegotiationError {
    fn from(err: io::Error) -> NegotiationError {
        ProtocolError::from(err).into()
    }
}

/// The error can be recovered from the `io::Error` by [`negotiation_error`],
/// except plain I/O errors which are returned unchanged.
impl From<NegotiationError> for io::Error {
    fn from(err: NegotiationError) -> io::Error {
        match err {
            NegotiationError::ProtocolError(ProtocolError::IoError(e)) => e,
            NegotiationError::Timeout => io::Error::new(io::ErrorKind::TimedOut, err),
            NegotiationError::ProtocolError(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            NegotiationError::Failed => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

/// Returns the negotiation error carried by `err`, if any.
pub fn negotiation_error(err: &io::Error) -> Option<&NegotiationError> {
    err.get_ref().and_then(|e| e.downcast_ref::<NegotiationError>())
}

impl std::error::Error for NegotiationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NegotiationError::ProtocolError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            NegotiationError::ProtocolError(p) => fmt.write_fmt(format_args!("Protocol error: {}", p)),
            NegotiationError::Failed => fmt.write_str("Protocol negotiation failed."),
            NegotiationError::Timeout => fmt.write_str("Protocol negotiation timed out."),
        }
    }
}
