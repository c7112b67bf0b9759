use super::{BuildError, CheckError, CheckType, Checker, StatusCodes};
use crate::context::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpConfig {
    pub method: String,
    /// Sent in order; a key may appear more than once.
    pub headers: Vec<(String, String)>,
    pub expected_status_codes: StatusCodes,
    pub skip_tls_verify: bool,
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            method: "GET".to_owned(),
            headers: vec![],
            expected_status_codes: StatusCodes::default(),
            skip_tls_verify: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Ready once the URL answers with an accepted status code.
pub struct HttpChecker {
    name: String,
    address: String,
    url: Url,
    method: Method,
    headers: HeaderMap,
    expected_status_codes: StatusCodes,
    client: Client,
}

impl HttpChecker {
    pub fn new(name: String, address: String, config: HttpConfig) -> Result<Self, BuildError> {
        let url = parse_url(&address)?;
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| BuildError::InvalidMethod(config.method.clone()))?;
        let headers = header_map(&config.headers)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(BuildError::HttpClient)?;

        Ok(HttpChecker {
            name,
            address,
            url,
            method,
            headers,
            expected_status_codes: config.expected_status_codes,
            client,
        })
    }
}

fn parse_url(address: &str) -> Result<Url, BuildError> {
    let invalid = |reason: String| BuildError::InvalidUrl {
        url: address.to_owned(),
        reason,
    };
    let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(url)
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, BuildError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let invalid = || BuildError::InvalidHeader(format!("{key}={value}"));
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.append(name, value);
    }
    Ok(map)
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_type(&self) -> CheckType {
        CheckType::Http
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn check(&mut self, ctx: &Context) -> Result<(), CheckError> {
        let request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        let response = tokio::select! {
            biased;
            cause = ctx.done() => return Err(cause.into()),
            response = request.send() => response?,
        };
        let status = response.status().as_u16();
        tracing::trace!(url = %self.url, status, "http response");
        if !self.expected_status_codes.contains(status) {
            return Err(CheckError::UnexpectedStatus {
                got: status,
                expected: self.expected_status_codes.clone(),
            });
        }
        Ok(())
    }
}
