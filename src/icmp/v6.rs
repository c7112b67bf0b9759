use super::socket::{Listener, OpenSocket, PacketConn, RawSocketOpener};
use super::{IcmpError, IcmpVersion, Network, Protocol, SequenceNumber, PAYLOAD};
use crate::context::Context;
use pnet_packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Type, Icmpv6Types, MutableIcmpv6Packet};
use pnet_packet::Packet;
use std::sync::Arc;
use tokio::time::Instant;

// Echo body: identifier (2 bytes) and sequence number (2 bytes) precede the data.
const ECHO_BODY_HEADER_LEN: usize = 4;

pub struct IcmpV6 {
    listener: Listener,
}

impl Default for IcmpV6 {
    fn default() -> Self {
        Self::new()
    }
}

impl IcmpV6 {
    pub fn new() -> IcmpV6 {
        Self::with_opener(Arc::new(RawSocketOpener))
    }

    pub(crate) fn with_opener(opener: Arc<dyn OpenSocket>) -> IcmpV6 {
        IcmpV6 {
            listener: Listener::new(opener),
        }
    }
}

#[async_trait::async_trait]
impl Protocol for IcmpV6 {
    fn version(&self) -> IcmpVersion {
        IcmpVersion::V6
    }

    fn network(&self) -> Network {
        Network::Ip6Icmp
    }

    fn make_request(
        &self,
        identifier: u16,
        sequence: SequenceNumber,
    ) -> Result<Vec<u8>, IcmpError> {
        let mut body = Vec::with_capacity(ECHO_BODY_HEADER_LEN + PAYLOAD.len());
        body.extend_from_slice(&identifier.to_be_bytes());
        body.extend_from_slice(&u16::from(sequence).to_be_bytes());
        body.extend_from_slice(PAYLOAD);

        let buf = vec![0u8; Icmpv6Packet::minimum_packet_size() + body.len()];
        let mut package = MutableIcmpv6Packet::owned(buf)
            .ok_or(IcmpError::Build(IcmpVersion::V6))?;
        package.set_icmpv6_type(Icmpv6Types::EchoRequest);
        package.set_icmpv6_code(Icmpv6Code::new(0));
        // The kernel fills in the checksum, it needs the pseudo header we don't have.
        package.set_checksum(0_u16);
        package.set_payload(&body);
        Ok(package.packet().to_vec())
    }

    fn validate_reply(
        &self,
        reply: &[u8],
        identifier: u16,
        sequence: SequenceNumber,
    ) -> Result<(), IcmpError> {
        let message = Icmpv6Packet::new(reply).ok_or_else(too_short)?;
        let icmp_type = message.get_icmpv6_type();
        if icmp_type != Icmpv6Types::EchoReply {
            return Err(IcmpError::UnexpectedType {
                version: IcmpVersion::V6,
                kind: type_name(icmp_type),
            });
        }
        let body = message.payload();
        if body.len() < ECHO_BODY_HEADER_LEN {
            return Err(IcmpError::Parse {
                version: IcmpVersion::V6,
                reason: "echo body too short",
            });
        }
        let reply_identifier = u16::from_be_bytes([body[0], body[1]]);
        let reply_sequence = u16::from_be_bytes([body[2], body[3]]);
        if reply_identifier != identifier || reply_sequence != u16::from(sequence) {
            return Err(IcmpError::Mismatch);
        }
        Ok(())
    }

    async fn listen_packet(
        &mut self,
        ctx: &Context,
        network: &str,
        address: &str,
    ) -> Result<&mut PacketConn, IcmpError> {
        self.listener.listen(ctx, network, address).await
    }

    fn set_deadline(&mut self, deadline: Instant) -> Result<(), IcmpError> {
        self.listener.set_deadline(deadline)
    }

    fn conn(&mut self) -> Result<&mut PacketConn, IcmpError> {
        self.listener.conn()
    }

    fn close(&mut self) {
        self.listener.close();
    }
}

fn too_short() -> IcmpError {
    IcmpError::Parse {
        version: IcmpVersion::V6,
        reason: "message too short",
    }
}

fn type_name(icmp_type: Icmpv6Type) -> String {
    match icmp_type {
        Icmpv6Types::DestinationUnreachable => "destination unreachable".to_owned(),
        Icmpv6Types::PacketTooBig => "packet too big".to_owned(),
        Icmpv6Types::TimeExceeded => "time exceeded".to_owned(),
        Icmpv6Types::ParameterProblem => "parameter problem".to_owned(),
        Icmpv6Types::EchoRequest => "echo request".to_owned(),
        Icmpv6Types::EchoReply => "echo reply".to_owned(),
        Icmpv6Type(other) => other.to_string(),
    }
}
