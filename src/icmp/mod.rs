//! ICMP echo wire formats and packet connections.
//!
//! The checker talks to a [`Protocol`]; [`IcmpV4`] and [`IcmpV6`] implement it.
//! [`new_protocol`] picks one by resolving the target address.

use crate::context::{Context, ContextError};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::str::FromStr;
use tokio::time::Instant;

mod sequence_number;
pub(crate) mod socket;
mod v4;
mod v6;

pub use sequence_number::SequenceNumber;
pub use socket::{PacketConn, TSocket};
pub use v4::IcmpV4;
pub use v6::IcmpV6;

/// Fixed echo payload, so every request has the same size.
pub(crate) const PAYLOAD: &[u8; 16] = b"never:are-you-up";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpVersion {
    V4,
    V6,
}

impl fmt::Display for IcmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpVersion::V4 => write!(f, "ICMPv4"),
            IcmpVersion::V6 => write!(f, "ICMPv6"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IcmpError {
    #[error("failed to parse {version} message: {reason}")]
    Parse {
        version: IcmpVersion,
        reason: &'static str,
    },
    #[error("unexpected {version} message type: {kind}")]
    UnexpectedType { version: IcmpVersion, kind: String },
    #[error("identifier or sequence mismatch")]
    Mismatch,
    #[error("failed to build {0} echo request")]
    Build(IcmpVersion),
    #[error("failed to listen for ICMP packets: {0}")]
    Listen(#[source] io::Error),
    #[error("no packet connection: listen first")]
    NotListening,
    #[error("use of closed packet connection")]
    Closed,
    #[error("i/o timeout")]
    Timeout,
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Socket network a packet connection is opened on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Ip4Icmp,
    Ip6Icmp,
}

impl Network {
    pub(crate) fn unspecified(self) -> IpAddr {
        match self {
            Network::Ip4Icmp => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Network::Ip6Icmp => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    pub(crate) fn accepts(self, ip: IpAddr) -> bool {
        matches!(
            (self, ip),
            (Network::Ip4Icmp, IpAddr::V4(_)) | (Network::Ip6Icmp, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Ip4Icmp => write!(f, "ip4:icmp"),
            Network::Ip6Icmp => write!(f, "ip6:ipv6-icmp"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("listen {0}: unknown network {0}")]
pub struct UnknownNetwork(String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip4:icmp" | "ip4:1" => Ok(Network::Ip4Icmp),
            "ip6:ipv6-icmp" | "ip6:58" => Ok(Network::Ip6Icmp),
            _ => Err(UnknownNetwork(s.to_owned())),
        }
    }
}

/// Wire format plus packet connection for one address family.
#[async_trait::async_trait]
pub trait Protocol: Send + Sync {
    fn version(&self) -> IcmpVersion;

    fn network(&self) -> Network;

    /// Serializes an echo request.
    fn make_request(
        &self,
        identifier: u16,
        sequence: SequenceNumber,
    ) -> Result<Vec<u8>, IcmpError>;

    /// Accepts `reply` only if it is this family's echo reply for `identifier` and `sequence`.
    fn validate_reply(
        &self,
        reply: &[u8],
        identifier: u16,
        sequence: SequenceNumber,
    ) -> Result<(), IcmpError>;

    /// Opens a packet connection, replacing (and closing) any previous one.
    async fn listen_packet(
        &mut self,
        ctx: &Context,
        network: &str,
        address: &str,
    ) -> Result<&mut PacketConn, IcmpError>;

    fn set_deadline(&mut self, deadline: Instant) -> Result<(), IcmpError>;

    fn conn(&mut self) -> Result<&mut PacketConn, IcmpError>;

    fn close(&mut self);
}

/// Resolves `address` and returns the protocol for its address family.
pub fn new_protocol(address: &str) -> Result<Box<dyn Protocol>, InvalidAddress> {
    Ok(protocol_for(resolve(address)?))
}

pub fn protocol_for(ip: IpAddr) -> Box<dyn Protocol> {
    match ip {
        IpAddr::V4(_) => Box::new(IcmpV4::new()),
        IpAddr::V6(_) => Box::new(IcmpV6::new()),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid or unresolvable address: {0}")]
pub struct InvalidAddress(pub String);

/// Resolves a literal IP or hostname to its first address.
pub fn resolve(address: &str) -> Result<IpAddr, InvalidAddress> {
    let trimmed = address.trim();
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ip);
    }
    if trimmed.is_empty() || trimmed.contains(':') {
        return Err(InvalidAddress(address.to_owned()));
    }
    (trimmed, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
        .ok_or_else(|| InvalidAddress(address.to_owned()))
}
