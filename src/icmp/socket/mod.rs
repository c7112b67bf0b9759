use crate::context::Context;
use crate::icmp::{IcmpError, Network};
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;

pub(crate) mod raw_socket;

pub(crate) use raw_socket::RawSocketOpener;

#[async_trait::async_trait]
pub trait TSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], addr: IpAddr) -> io::Result<usize>;
    /// Receives one ICMP message (without any IP header) into `buf`.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)>;
}

pub(crate) trait OpenSocket: Send + Sync {
    fn open(&self, network: Network, bind: IpAddr) -> io::Result<Box<dyn TSocket>>;
}

/// A packet connection with independent read and write deadlines.
///
/// Dropping or closing the connection closes the underlying socket.
pub struct PacketConn {
    socket: Option<Box<dyn TSocket>>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl PacketConn {
    pub(crate) fn new(socket: Box<dyn TSocket>) -> Self {
        PacketConn {
            socket: Some(socket),
            read_deadline: None,
            write_deadline: None,
        }
    }

    pub fn set_deadline(&mut self, deadline: Instant) -> Result<(), IcmpError> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    pub fn set_read_deadline(&mut self, deadline: Instant) -> Result<(), IcmpError> {
        self.ensure_open()?;
        self.read_deadline = Some(deadline);
        Ok(())
    }

    pub fn set_write_deadline(&mut self, deadline: Instant) -> Result<(), IcmpError> {
        self.ensure_open()?;
        self.write_deadline = Some(deadline);
        Ok(())
    }

    pub async fn write_to(&self, buf: &[u8], addr: IpAddr) -> Result<usize, IcmpError> {
        let socket = self.socket.as_ref().ok_or(IcmpError::Closed)?;
        before_deadline(self.write_deadline, socket.send_to(buf, addr)).await
    }

    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, IpAddr), IcmpError> {
        let socket = self.socket.as_ref().ok_or(IcmpError::Closed)?;
        before_deadline(self.read_deadline, socket.recv_from(buf)).await
    }

    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::trace!("packet connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    fn ensure_open(&self) -> Result<(), IcmpError> {
        if self.is_closed() {
            return Err(IcmpError::Closed);
        }
        Ok(())
    }
}

async fn before_deadline<T, F>(deadline: Option<Instant>, operation: F) -> Result<T, IcmpError>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, operation).await {
            Ok(result) => Ok(result?),
            Err(_elapsed) => Err(IcmpError::Timeout),
        },
        None => Ok(operation.await?),
    }
}

/// Opens packet connections on behalf of a protocol strategy and owns the current one.
pub(crate) struct Listener {
    opener: Arc<dyn OpenSocket>,
    conn: Option<PacketConn>,
}

impl Listener {
    pub(crate) fn new(opener: Arc<dyn OpenSocket>) -> Self {
        Listener { opener, conn: None }
    }

    pub(crate) async fn listen(
        &mut self,
        ctx: &Context,
        network: &str,
        address: &str,
    ) -> Result<&mut PacketConn, IcmpError> {
        let network: Network = network
            .parse()
            .map_err(|e| IcmpError::Listen(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let bind = resolve_bind_address(ctx, network, address).await?;
        let socket = self.opener.open(network, bind).map_err(IcmpError::Listen)?;
        self.close();
        Ok(self.conn.insert(PacketConn::new(socket)))
    }

    pub(crate) fn conn(&mut self) -> Result<&mut PacketConn, IcmpError> {
        match self.conn.as_mut() {
            Some(conn) if !conn.is_closed() => Ok(conn),
            Some(_) => Err(IcmpError::Closed),
            None => Err(IcmpError::NotListening),
        }
    }

    pub(crate) fn set_deadline(&mut self, deadline: Instant) -> Result<(), IcmpError> {
        self.conn()?.set_deadline(deadline)
    }

    pub(crate) fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close();
        }
    }
}

async fn resolve_bind_address(
    ctx: &Context,
    network: Network,
    address: &str,
) -> Result<IpAddr, IcmpError> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(network.unspecified());
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        if !network.accepts(ip) {
            return Err(IcmpError::Listen(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("listen {network}: address {ip} does not match network family"),
            )));
        }
        return Ok(ip);
    }

    let lookup = tokio::select! {
        result = tokio::net::lookup_host((address, 0)) => result,
        cause = ctx.done() => return Err(cause.into()),
    };
    lookup
        .map_err(IcmpError::Listen)?
        .map(|addr| addr.ip())
        .find(|ip| network.accepts(*ip))
        .ok_or_else(|| {
            IcmpError::Listen(io::Error::new(
                io::ErrorKind::NotFound,
                format!("listen {network}: no suitable address found for {address}"),
            ))
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use pnet_packet::icmp::{checksum, IcmpPacket};

    #[derive(Clone, Copy, PartialEq, Eq)]
    pub(crate) enum OnOpen {
        ReturnPermissionDenied,
        ReturnDefault,
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    pub(crate) enum OnSend {
        ReturnErr,
        ReturnDefault,
    }

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub(crate) enum OnReceive {
        /// Never answers; reads only end at the deadline.
        Silent,
        /// Echoes the last request back as a matching reply.
        Echo,
        /// Echoes the last request back with a different identifier.
        EchoWithOtherIdentifier,
        /// Answers with n replies for somebody else, then echoes.
        ForeignThenEcho(usize),
    }

    type VecOfBuffersAndAddresses = Arc<Mutex<Vec<(Vec<u8>, IpAddr)>>>;

    #[derive(Clone)]
    pub(crate) struct SocketMock {
        on_open: OnOpen,
        on_send: OnSend,
        on_receive: Arc<Mutex<OnReceive>>,
        sent: VecOfBuffersAndAddresses,
        opened: Arc<Mutex<Vec<(Network, IpAddr)>>>,
        received_cnt: Arc<Mutex<u16>>,
        live_sockets: Arc<AtomicUsize>,
    }

    impl SocketMock {
        pub(crate) fn new(on_send: OnSend, on_receive: OnReceive) -> Self {
            Self {
                on_open: OnOpen::ReturnDefault,
                on_send,
                on_receive: Arc::new(Mutex::new(on_receive)),
                sent: Arc::new(Mutex::new(vec![])),
                opened: Arc::new(Mutex::new(vec![])),
                received_cnt: Arc::new(Mutex::new(0)),
                live_sockets: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn new_default() -> Self {
            Self::new(OnSend::ReturnDefault, OnReceive::Echo)
        }

        pub(crate) fn with_on_open(mut self, on_open: OnOpen) -> Self {
            self.on_open = on_open;
            self
        }

        pub(crate) fn opener(&self) -> Arc<dyn OpenSocket> {
            Arc::new(self.clone())
        }

        pub(crate) fn sent_requests(&self) -> Vec<Vec<u8>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(buf, _)| buf.clone())
                .collect()
        }

        pub(crate) fn should_send_number_of_messages(&self, n: usize) -> &Self {
            assert_eq!(n, self.sent.lock().unwrap().len());
            self
        }

        pub(crate) fn should_send_to_address(&self, addr: &IpAddr) -> &Self {
            assert!(self.sent.lock().unwrap().iter().any(|e| *addr == e.1));
            self
        }

        pub(crate) fn should_open_number_of_sockets(&self, n: usize) -> &Self {
            assert_eq!(n, self.opened.lock().unwrap().len());
            self
        }

        pub(crate) fn should_open_on(&self, network: Network, bind: IpAddr) -> &Self {
            assert!(self.opened.lock().unwrap().contains(&(network, bind)));
            self
        }

        pub(crate) fn should_receive_number_of_messages(&self, n: u16) -> &Self {
            assert_eq!(n, *self.received_cnt.lock().unwrap());
            self
        }

        pub(crate) fn should_have_open_sockets(&self, n: usize) -> &Self {
            assert_eq!(n, self.live_sockets.load(Ordering::SeqCst));
            self
        }

        fn next_reply(&self) -> Option<Vec<u8>> {
            let mut on_receive = self.on_receive.lock().unwrap();
            let (mut reply, _) = self.sent.lock().unwrap().last()?.clone();
            // Flip echo request into echo reply: 8 -> 0 (ICMPv4), 128 -> 129 (ICMPv6).
            reply[0] = if reply[0] == 8 { 0 } else { 129 };
            match *on_receive {
                OnReceive::Silent => return None,
                OnReceive::Echo => {}
                OnReceive::EchoWithOtherIdentifier => reply[4] ^= 0xFF,
                OnReceive::ForeignThenEcho(n) => {
                    if n > 0 {
                        reply[4] ^= 0xFF;
                        *on_receive = OnReceive::ForeignThenEcho(n - 1);
                    }
                }
            }
            if reply[0] == 0 {
                reply[2] = 0;
                reply[3] = 0;
                let sum = checksum(&IcmpPacket::new(&reply).unwrap());
                reply[2..4].copy_from_slice(&sum.to_be_bytes());
            }
            Some(reply)
        }
    }

    impl OpenSocket for SocketMock {
        fn open(&self, network: Network, bind: IpAddr) -> io::Result<Box<dyn TSocket>> {
            if self.on_open == OnOpen::ReturnPermissionDenied {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "operation not permitted",
                ));
            }
            self.opened.lock().unwrap().push((network, bind));
            self.live_sockets.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(OpenedSocketMock { mock: self.clone() }))
        }
    }

    struct OpenedSocketMock {
        mock: SocketMock,
    }

    impl Drop for OpenedSocketMock {
        fn drop(&mut self) {
            self.mock.live_sockets.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl TSocket for OpenedSocketMock {
        async fn send_to(&self, buf: &[u8], addr: IpAddr) -> io::Result<usize> {
            if self.mock.on_send == OnSend::ReturnErr {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "simulating error in mock",
                ));
            }
            self.mock.sent.lock().unwrap().push((buf.to_vec(), addr));
            Ok(buf.len())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
            let Some(reply) = self.mock.next_reply() else {
                return std::future::pending().await;
            };
            if buf.len() < reply.len() {
                return Err(io::Error::new(io::ErrorKind::Other, "buffer too small"));
            }
            *self.mock.received_cnt.lock().unwrap() += 1;
            buf[..reply.len()].copy_from_slice(&reply);
            let (_, addr) = self.mock.sent.lock().unwrap().last().cloned().unwrap();
            Ok((reply.len(), addr))
        }
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn listen_opens_socket_on_unspecified_address() {
        let mock = SocketMock::new_default();
        let mut listener = Listener::new(mock.opener());

        let ctx = Context::background();

        let conn = listener.listen(&ctx, "ip4:icmp", "").await;

        assert!(conn.is_ok());
        mock.should_open_number_of_sockets(1)
            .should_open_on(Network::Ip4Icmp, "0.0.0.0".parse().unwrap())
            .should_have_open_sockets(1);
    }

    #[tokio::test]
    async fn listen_rejects_unknown_network() {
        let mock = SocketMock::new_default();
        let mut listener = Listener::new(mock.opener());

        let ctx = Context::background();

        let err = listener
            .listen(&ctx, "invalid-network", "")
            .await
            .err()
            .unwrap();

        assert_eq!(
            "failed to listen for ICMP packets: \
             listen invalid-network: unknown network invalid-network",
            err.to_string()
        );
        mock.should_open_number_of_sockets(0);
    }

    #[tokio::test]
    async fn listen_rejects_address_of_other_family() {
        let mock = SocketMock::new_default();
        let mut listener = Listener::new(mock.opener());

        let ctx = Context::background();

        let err = listener
            .listen(&ctx, "ip6:ipv6-icmp", "127.0.0.1")
            .await
            .err()
            .unwrap();

        let message = err.to_string();
        assert!(message.starts_with("failed to listen for ICMP packets:"));
    }

    #[tokio::test]
    async fn listen_wraps_permission_errors() {
        let mock = SocketMock::new_default()
            .with_on_open(OnOpen::ReturnPermissionDenied);
        let mut listener = Listener::new(mock.opener());
        let ctx = Context::background();

        let err = listener.listen(&ctx, "ip4:icmp", "").await.err().unwrap();

        assert!(matches!(
            &err,
            IcmpError::Listen(e) if e.kind() == io::ErrorKind::PermissionDenied
        ));
        assert_eq!(
            "failed to listen for ICMP packets: operation not permitted",
            err.to_string()
        );
    }

    #[tokio::test]
    async fn close_releases_socket() {
        let mock = SocketMock::new_default();
        let mut listener = Listener::new(mock.opener());
        let ctx = Context::background();
        listener.listen(&ctx, "ip4:icmp", "127.0.0.1").await.unwrap();

        listener.close();

        mock.should_have_open_sockets(0);
        assert!(matches!(listener.conn(), Err(IcmpError::Closed)));
        assert!(matches!(
            listener.set_deadline(Instant::now()),
            Err(IcmpError::Closed)
        ));
    }

    #[test]
    fn set_deadline_without_connection_fails() {
        let mut listener = Listener::new(SocketMock::new_default().opener());
        assert!(matches!(
            listener.set_deadline(Instant::now()),
            Err(IcmpError::NotListening)
        ));
    }

    #[tokio::test]
    async fn read_from_ends_at_deadline() {
        let mock = SocketMock::new(OnSend::ReturnDefault, OnReceive::Silent);
        let mut listener = Listener::new(mock.opener());
        let ctx = Context::background();
        let conn = listener.listen(&ctx, "ip4:icmp", "").await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        conn.set_read_deadline(deadline).unwrap();

        let mut buf = [0u8; 64];
        let result = conn.read_from(&mut buf).await;

        assert!(matches!(result, Err(IcmpError::Timeout)));
        mock.should_receive_number_of_messages(0);
    }

    #[tokio::test]
    async fn write_to_reports_socket_errors() {
        let mock = SocketMock::new(OnSend::ReturnErr, OnReceive::Echo);
        let mut listener = Listener::new(mock.opener());
        let ctx = Context::background();
        let conn = listener.listen(&ctx, "ip4:icmp", "").await.unwrap();

        let result = conn.write_to(&[8, 0, 0, 0, 0, 0, 0, 1], localhost()).await;

        assert!(matches!(result, Err(IcmpError::Io(_))));
        mock.should_send_number_of_messages(0);
    }

    #[tokio::test]
    async fn echo_mock_answers_last_request() {
        let mock = SocketMock::new_default();
        let mut listener = Listener::new(mock.opener());
        let ctx = Context::background();
        let conn = listener.listen(&ctx, "ip4:icmp", "").await.unwrap();
        let request = [8, 0, 0xF7, 0xFE, 0, 1, 0, 0];
        conn.write_to(&request, localhost()).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = conn.read_from(&mut buf).await.unwrap();

        assert_eq!(8, n);
        assert_eq!(0, buf[0]);
        assert_eq!(localhost(), from);
        mock.should_send_to_address(&localhost())
            .should_receive_number_of_messages(1);
    }
}
