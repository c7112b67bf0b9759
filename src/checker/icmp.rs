use super::{BuildError, CheckError, CheckType, Checker};
use crate::context::Context;
use crate::icmp::{self, IcmpError, Protocol, SequenceNumber};
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const RECV_BUFFER_SIZE: usize = 1500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcmpConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Echo identifier; random when `None`.
    pub identifier: Option<u16>,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        IcmpConfig {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            identifier: None,
        }
    }
}

/// Ready once the host answers an ICMP echo request.
///
/// Every check opens its own packet connection and closes it before returning.
pub struct IcmpChecker {
    name: String,
    address: String,
    target: IpAddr,
    protocol: Box<dyn Protocol>,
    read_timeout: Duration,
    write_timeout: Duration,
    identifier: u16,
    sequence: SequenceNumber,
}

impl IcmpChecker {
    pub fn new(name: String, address: String, config: IcmpConfig) -> Result<Self, BuildError> {
        let target = icmp::resolve(&address)?;
        let protocol = icmp::protocol_for(target);
        Ok(Self::with_protocol(name, address, target, protocol, config))
    }

    pub(crate) fn with_protocol(
        name: String,
        address: String,
        target: IpAddr,
        protocol: Box<dyn Protocol>,
        config: IcmpConfig,
    ) -> Self {
        IcmpChecker {
            name,
            address,
            target,
            protocol,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            identifier: config.identifier.unwrap_or_else(rand::random),
            sequence: SequenceNumber::start_value(),
        }
    }

    async fn exchange(
        &mut self,
        ctx: &Context,
        sequence: SequenceNumber,
    ) -> Result<(), CheckError> {
        let id = self.identifier;
        let request = self.protocol.make_request(id, sequence)?;
        let network = self.protocol.network().to_string();
        until_done(ctx, self.protocol.listen_packet(ctx, &network, "")).await?;

        let write_deadline = ctx.clamp(Instant::now() + self.write_timeout);
        self.protocol.set_deadline(write_deadline)?;
        let conn = self.protocol.conn()?;
        until_done(ctx, conn.write_to(&request, self.target)).await?;
        tracing::trace!(
            target_ip = %self.target,
            identifier = id,
            %sequence,
            "echo request sent"
        );

        let read_deadline = ctx.clamp(Instant::now() + self.read_timeout);
        self.protocol.set_deadline(read_deadline)?;
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut rejected: Option<IcmpError> = None;
        loop {
            let conn = self.protocol.conn()?;
            let (n, peer) = match until_done(ctx, conn.read_from(&mut buf)).await {
                Ok(received) => received,
                // Report why earlier packets were rejected rather than the bare timeout.
                Err(CheckError::Icmp(IcmpError::Timeout)) => {
                    return Err(CheckError::Icmp(rejected.unwrap_or(IcmpError::Timeout)));
                }
                Err(e) => return Err(e),
            };
            match self.protocol.validate_reply(&buf[..n], id, sequence) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::trace!(%peer, error = %e, "ignoring ICMP message");
                    if Instant::now() >= read_deadline {
                        return Err(e.into());
                    }
                    rejected = Some(e);
                }
            }
        }
    }
}

async fn until_done<T, F>(ctx: &Context, operation: F) -> Result<T, CheckError>
where
    F: Future<Output = Result<T, IcmpError>>,
{
    tokio::select! {
        biased;
        cause = ctx.done() => Err(cause.into()),
        result = operation => Ok(result?),
    }
}

#[async_trait::async_trait]
impl Checker for IcmpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_type(&self) -> CheckType {
        CheckType::Icmp
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn check(&mut self, ctx: &Context) -> Result<(), CheckError> {
        let sequence = self.sequence;
        self.sequence = sequence.next();
        let result = self.exchange(ctx, sequence).await;
        self.protocol.close();
        result
    }
}
