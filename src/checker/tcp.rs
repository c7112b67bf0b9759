use super::{CheckError, CheckType, Checker};
use crate::context::Context;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpConfig {
    /// Dial timeout.
    pub timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Ready once a TCP connection to `host:port` can be established.
pub struct TcpChecker {
    name: String,
    address: String,
    timeout: Duration,
}

impl TcpChecker {
    pub fn new(name: String, address: String, config: TcpConfig) -> Self {
        TcpChecker {
            name,
            address,
            timeout: config.timeout,
        }
    }

    fn dial_error(&self, source: std::io::Error) -> CheckError {
        CheckError::Dial {
            address: self.address.clone(),
            source,
        }
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_type(&self) -> CheckType {
        CheckType::Tcp
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn check(&mut self, ctx: &Context) -> Result<(), CheckError> {
        let deadline = ctx.clamp(Instant::now() + self.timeout);
        let dial = tokio::time::timeout_at(deadline, TcpStream::connect(self.address.as_str()));
        let stream = tokio::select! {
            biased;
            cause = ctx.done() => return Err(cause.into()),
            result = dial => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(self.dial_error(source)),
                Err(_elapsed) => {
                    return Err(CheckError::DialTimeout {
                        address: self.address.clone(),
                    })
                }
            },
        };
        tracing::trace!(
            address = %self.address,
            peer = ?stream.peer_addr().ok(),
            "tcp connection established"
        );
        Ok(())
    }
}
