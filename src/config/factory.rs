use super::flags::{TargetFlags, TargetOptions};
use super::resolve::{resolve_variable, ResolveError};
use super::ConfigError;
use crate::checker::{CheckerConfig, CheckerWithInterval, HttpConfig, IcmpConfig, TcpConfig};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("invalid header format: {0:?}")]
    Format(String),
    #[error("duplicate header: {0:?}")]
    Duplicate(String),
    #[error("failed to resolve variable in header: {0}")]
    Resolve(#[from] ResolveError),
}

/// Builds one checker per target. Targets without an interval poll every `default_interval`.
pub fn build_checkers(
    targets: Vec<TargetFlags>,
    default_interval: Duration,
) -> Result<Vec<CheckerWithInterval>, ConfigError> {
    targets
        .into_iter()
        .map(|target| build_checker(target, default_interval))
        .collect()
}

fn build_checker(
    target: TargetFlags,
    default_interval: Duration,
) -> Result<CheckerWithInterval, ConfigError> {
    let check_type = target.check_type();
    let address = resolve_variable(&target.address)
        .map_err(ConfigError::AddressVariable)?;
    let interval = if target.interval.is_zero() {
        default_interval
    } else {
        target.interval
    };

    let config = match target.options {
        TargetOptions::Http(http) => {
            let headers = create_http_headers(&http.headers, http.allow_duplicate_headers)
                .map_err(|source| ConfigError::Header {
                    flag: format!("http.{}.header", target.id),
                    source,
                })?;
            CheckerConfig::Http(HttpConfig {
                method: http.method,
                headers,
                expected_status_codes: http.expected_status_codes,
                skip_tls_verify: http.skip_tls_verify,
                timeout: http.timeout,
            })
        }
        TargetOptions::Tcp { timeout } => CheckerConfig::Tcp(TcpConfig { timeout }),
        TargetOptions::Icmp {
            read_timeout,
            write_timeout,
        } => CheckerConfig::Icmp(IcmpConfig {
            read_timeout,
            write_timeout,
            identifier: None,
        }),
    };

    let name = target.name.unwrap_or(target.id);
    tracing::debug!(%name, %check_type, %address, ?interval, "building checker");
    let checker = config
        .build(name, address)
        .map_err(|source| ConfigError::Build { check_type, source })?;
    Ok(CheckerWithInterval { interval, checker })
}

/// Parses `KEY=VALUE` headers. Values may be `env:`/`file:` variables.
/// With `allow_duplicates` a repeated key sends every value, otherwise it is an error.
pub fn create_http_headers(
    headers: &[String],
    allow_duplicates: bool,
) -> Result<Vec<(String, String)>, HeaderError> {
    let mut parsed: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for header in headers {
        let (key, value) = header
            .split_once('=')
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| HeaderError::Format(header.clone()))?;
        let value = resolve_variable(value)?;
        let seen = parsed
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(key));
        if seen && !allow_duplicates {
            return Err(HeaderError::Duplicate(header.clone()));
        }
        parsed.push((key.to_owned(), value));
    }
    Ok(parsed)
}
