//! Reachability checkers.
//!
//! A [`Checker`] performs exactly one attempt per [`Checker::check`] call and never
//! retries on its own; retrying is the job of [`crate::wait`].

use crate::context::{Context, ContextError};
use crate::icmp::{IcmpError, InvalidAddress};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

pub mod http;
pub mod icmp;
mod status_codes;
pub mod tcp;

pub use http::{HttpChecker, HttpConfig};
pub use icmp::{IcmpChecker, IcmpConfig};
pub use status_codes::{StatusCodes, StatusCodesError};
pub use tcp::{TcpChecker, TcpConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckType {
    Tcp,
    Http,
    Icmp,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Tcp => write!(f, "TCP"),
            CheckType::Http => write!(f, "HTTP"),
            CheckType::Icmp => write!(f, "ICMP"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported check type: {0}")]
pub struct UnsupportedCheckType(pub String);

impl FromStr for CheckType {
    type Err = UnsupportedCheckType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(CheckType::Tcp),
            "http" => Ok(CheckType::Http),
            "icmp" => Ok(CheckType::Icmp),
            _ => Err(UnsupportedCheckType(s.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    UnsupportedCheckType(#[from] UnsupportedCheckType),
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid HTTP method: {0:?}")]
    InvalidMethod(String),
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),
}

/// Why a single attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("dial tcp {address}: {source}")]
    Dial { address: String, source: io::Error },
    #[error("dial tcp {address}: i/o timeout")]
    DialTimeout { address: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected status code: got {got}, expected one of {expected}")]
    UnexpectedStatus { got: u16, expected: StatusCodes },
    #[error(transparent)]
    Icmp(#[from] IcmpError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A reachability check against one target.
#[async_trait::async_trait]
pub trait Checker: Send {
    /// Display label.
    fn name(&self) -> &str;

    fn check_type(&self) -> CheckType;

    fn address(&self) -> &str;

    /// Performs one attempt. Resources opened for the attempt are released before returning.
    async fn check(&mut self, ctx: &Context) -> Result<(), CheckError>;
}

/// Type specific options, validated by [`CheckerConfig::build`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerConfig {
    Tcp(TcpConfig),
    Http(HttpConfig),
    Icmp(IcmpConfig),
}

impl From<CheckType> for CheckerConfig {
    fn from(check_type: CheckType) -> Self {
        match check_type {
            CheckType::Tcp => CheckerConfig::Tcp(TcpConfig::default()),
            CheckType::Http => CheckerConfig::Http(HttpConfig::default()),
            CheckType::Icmp => CheckerConfig::Icmp(IcmpConfig::default()),
        }
    }
}

impl CheckerConfig {
    pub fn check_type(&self) -> CheckType {
        match self {
            CheckerConfig::Tcp(_) => CheckType::Tcp,
            CheckerConfig::Http(_) => CheckType::Http,
            CheckerConfig::Icmp(_) => CheckType::Icmp,
        }
    }

    pub fn build(
        self,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<Box<dyn Checker>, BuildError> {
        let (name, address) = (name.into(), address.into());
        Ok(match self {
            CheckerConfig::Tcp(config) => Box::new(TcpChecker::new(name, address, config)),
            CheckerConfig::Http(config) => Box::new(HttpChecker::new(name, address, config)?),
            CheckerConfig::Icmp(config) => Box::new(IcmpChecker::new(name, address, config)?),
        })
    }
}

/// Builds a checker with default options; `check_type` is matched case-insensitively.
pub fn new_checker(
    check_type: &str,
    name: &str,
    address: &str,
) -> Result<Box<dyn Checker>, BuildError> {
    let check_type: CheckType = check_type.parse()?;
    CheckerConfig::from(check_type).build(name, address)
}

/// A checker and its polling interval. A zero interval means "use the default".
pub struct CheckerWithInterval {
    pub interval: Duration,
    pub checker: Box<dyn Checker>,
}

impl fmt::Debug for CheckerWithInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerWithInterval")
            .field("name", &self.checker.name())
            .field("type", &self.checker.check_type())
            .field("address", &self.checker.address())
            .field("interval", &self.interval)
            .finish()
    }
}
