use super::{OpenSocket, TSocket};
use crate::icmp::Network;
use pnet_packet::ipv4::Ipv4Packet;
use socket2::{Domain, Protocol, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Privileged ICMP socket (`SOCK_RAW`), driven by the tokio reactor.
pub(crate) struct RawSocket {
    socket: tokio::net::UdpSocket,
    network: Network,
}

impl RawSocket {
    pub(crate) fn new(network: Network, bind: IpAddr) -> Result<Self, io::Error> {
        tracing::trace!(%network, %bind, "creating RawSocket");
        let (domain, protocol) = match network {
            Network::Ip4Icmp => (Domain::IPV4, Protocol::ICMPV4),
            Network::Ip6Icmp => (Domain::IPV6, Protocol::ICMPV6),
        };
        let socket = socket2::Socket::new(domain, Type::RAW, Some(protocol))?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::new(bind, 0).into())?;
        // A raw socket is datagram oriented, so the UDP wrapper gives us async send_to/recv_from.
        let socket = tokio::net::UdpSocket::from_std(std::net::UdpSocket::from(socket))?;
        Ok(RawSocket { socket, network })
    }
}

#[async_trait::async_trait]
impl TSocket for RawSocket {
    async fn send_to(&self, buf: &[u8], addr: IpAddr) -> io::Result<usize> {
        self.socket.send_to(buf, SocketAddr::new(addr, 0)).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        let (n, peer) = self.socket.recv_from(buf).await?;
        match self.network {
            // On a RAW IPv4 socket we get the whole IP packet.
            Network::Ip4Icmp => {
                let header_len = Ipv4Packet::new(&buf[..n])
                    .map(|packet| usize::from(packet.get_header_length()) * 4)
                    .filter(|len| *len <= n)
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "truncated IPv4 header")
                    })?;
                buf.copy_within(header_len..n, 0);
                Ok((n - header_len, peer.ip()))
            }
            Network::Ip6Icmp => Ok((n, peer.ip())),
        }
    }
}

pub(crate) struct RawSocketOpener;

impl OpenSocket for RawSocketOpener {
    fn open(&self, network: Network, bind: IpAddr) -> io::Result<Box<dyn TSocket>> {
        Ok(Box::new(RawSocket::new(network, bind)?))
    }
}
