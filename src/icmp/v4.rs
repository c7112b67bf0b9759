use super::socket::{Listener, OpenSocket, PacketConn, RawSocketOpener};
use super::{IcmpError, IcmpVersion, Network, Protocol, SequenceNumber, PAYLOAD};
use crate::context::Context;
use pnet_packet::icmp::{
    echo_reply::EchoReplyPacket,
    echo_request::{
        EchoRequestPacket as EchoRequestPacketV4,
        MutableEchoRequestPacket as MutableEchoRequestPacketV4,
    },
    IcmpCode, IcmpPacket, IcmpType, IcmpTypes,
};
use pnet_packet::Packet;
use std::sync::Arc;
use tokio::time::Instant;

pub struct IcmpV4 {
    listener: Listener,
}

impl Default for IcmpV4 {
    fn default() -> Self {
        Self::new()
    }
}

impl IcmpV4 {
    pub fn new() -> IcmpV4 {
        Self::with_opener(Arc::new(RawSocketOpener))
    }

    pub(crate) fn with_opener(opener: Arc<dyn OpenSocket>) -> IcmpV4 {
        IcmpV4 {
            listener: Listener::new(opener),
        }
    }
}

#[async_trait::async_trait]
impl Protocol for IcmpV4 {
    fn version(&self) -> IcmpVersion {
        IcmpVersion::V4
    }

    fn network(&self) -> Network {
        Network::Ip4Icmp
    }

    fn make_request(
        &self,
        identifier: u16,
        sequence: SequenceNumber,
    ) -> Result<Vec<u8>, IcmpError> {
        let buf = vec![0u8; EchoRequestPacketV4::minimum_packet_size() + PAYLOAD.len()];
        let mut package = MutableEchoRequestPacketV4::owned(buf)
            .ok_or(IcmpError::Build(IcmpVersion::V4))?;
        package.set_icmp_type(IcmpTypes::EchoRequest);
        package.set_icmp_code(IcmpCode::new(0));
        package.set_identifier(identifier);
        package.set_sequence_number(sequence.into());
        package.set_payload(PAYLOAD);

        package.set_checksum(0_u16);
        let checksum = IcmpPacket::new(package.packet())
            .map(|packet| pnet_packet::icmp::checksum(&packet))
            .ok_or(IcmpError::Build(IcmpVersion::V4))?;
        package.set_checksum(checksum);
        Ok(package.packet().to_vec())
    }

    fn validate_reply(
        &self,
        reply: &[u8],
        identifier: u16,
        sequence: SequenceNumber,
    ) -> Result<(), IcmpError> {
        let message = IcmpPacket::new(reply).ok_or_else(too_short)?;
        let icmp_type = message.get_icmp_type();
        if icmp_type != IcmpTypes::EchoReply {
            return Err(IcmpError::UnexpectedType {
                version: IcmpVersion::V4,
                kind: type_name(icmp_type),
            });
        }
        let echo = EchoReplyPacket::new(reply).ok_or_else(too_short)?;
        if echo.get_identifier() != identifier
            || echo.get_sequence_number() != u16::from(sequence)
        {
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
        version: IcmpVersion::V4,
        reason: "message too short",
    }
}

fn type_name(icmp_type: IcmpType) -> String {
    match icmp_type {
        IcmpTypes::EchoReply => "echo reply".to_owned(),
        IcmpTypes::DestinationUnreachable => "destination unreachable".to_owned(),
        IcmpTypes::RedirectMessage => "redirect".to_owned(),
        IcmpTypes::EchoRequest => "echo".to_owned(),
        IcmpTypes::TimeExceeded => "time exceeded".to_owned(),
        IcmpTypes::ParameterProblem => "parameter problem".to_owned(),
        IcmpType(other) => other.to_string(),
    }
}
