use super::resolve::is_resolvable;
use super::ConfigError;
use crate::checker::{CheckType, StatusCodes};
use argh::FromArgs;
use reqwest::Url;
use std::net::IpAddr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const GLOBAL_FLAGS: &[&str] = &[
    "default-interval",
    "max-attempts",
    "log-level",
    "version",
    "help",
];

#[derive(argh::FromArgs, Debug)]
/// never - wait until TCP, HTTP and ICMP targets become reachable
#[argh(
    note = "Targets are configured with dynamic flags --<type>.<id>.<key>=<value>, <type> one of http, tcp, icmp.
  common keys:  name, address (required), interval
  http keys:    method, header (KEY=VALUE, repeatable), allow-duplicate-headers,
                expected-status-codes (repeatable), skip-tls-verify, timeout
  tcp keys:     timeout
  icmp keys:    read-timeout, write-timeout
Addresses and header values may be read with env:NAME or file:PATH."
)]
struct GlobalFlags {
    #[argh(
        option,
        default = "DEFAULT_CHECK_INTERVAL",
        from_str_fn(parse_duration)
    )]
    /// default interval between checks, can be overridden for each target (default 2s)
    default_interval: Duration,

    #[argh(option, default = "0")]
    /// give up after this many failed attempts per target, 0 retries forever
    max_attempts: u32,

    #[argh(option, default = "Level::INFO")]
    /// log level: error, warn, info, debug or trace (default info)
    log_level: Level,

    #[argh(switch)]
    /// print the version and exit
    version: bool,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim())
        .map_err(|e| format!("invalid duration {value:?}: {e}"))
}

#[derive(Debug)]
pub struct ParsedFlags {
    pub default_interval: Duration,
    pub max_attempts: u32,
    pub log_level: Level,
    /// In order of first appearance on the command line.
    pub targets: Vec<TargetFlags>,
}

/// One `--<type>.<id>.*` group, validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetFlags {
    pub id: String,
    pub name: Option<String>,
    pub address: String,
    /// Zero means `--default-interval`.
    pub interval: Duration,
    pub options: TargetOptions,
}

impl TargetFlags {
    pub fn check_type(&self) -> CheckType {
        match self.options {
            TargetOptions::Http(_) => CheckType::Http,
            TargetOptions::Tcp { .. } => CheckType::Tcp,
            TargetOptions::Icmp { .. } => CheckType::Icmp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetOptions {
    Http(HttpFlags),
    Tcp { timeout: Duration },
    Icmp {
        read_timeout: Duration,
        write_timeout: Duration,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpFlags {
    pub method: String,
    /// Raw `KEY=VALUE` pairs.
    pub headers: Vec<String>,
    pub allow_duplicate_headers: bool,
    pub expected_status_codes: StatusCodes,
    pub skip_tls_verify: bool,
    pub timeout: Duration,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Single,
    Repeated,
    Switch,
}

fn value_kind(check_type: CheckType, key: &str) -> Option<ValueKind> {
    match (check_type, key) {
        (_, "name" | "address" | "interval")
        | (CheckType::Http, "method" | "timeout")
        | (CheckType::Tcp, "timeout")
        | (CheckType::Icmp, "read-timeout" | "write-timeout") => Some(ValueKind::Single),
        (CheckType::Http, "header" | "expected-status-codes") => Some(ValueKind::Repeated),
        (CheckType::Http, "allow-duplicate-headers" | "skip-tls-verify") => Some(ValueKind::Switch),
        _ => None,
    }
}

fn group_name(check_type: CheckType) -> &'static str {
    match check_type {
        CheckType::Tcp => "tcp",
        CheckType::Http => "http",
        CheckType::Icmp => "icmp",
    }
}

fn unknown_flag(name: &str) -> ConfigError {
    ConfigError::Flags(format!("unknown flag: --{name}"))
}

/// Values collected for one target before validation.
struct RawTarget {
    check_type: CheckType,
    id: String,
    values: Vec<(String, String)>,
}

impl RawTarget {
    fn flag(&self, key: &str) -> String {
        format!("{}.{}.{key}", group_name(self.check_type), self.id)
    }

    fn last(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn all(&self, key: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            flag: self.flag(key),
            reason: reason.into(),
        }
    }

    fn duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.last(key).map_or(Ok(default), |value| {
            parse_duration(value).map_err(|reason| self.invalid(key, reason))
        })
    }

    fn positive_duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let duration = self.duration(key, default)?;
        if duration.is_zero() {
            return Err(self.invalid(key, format!("{key} must be positive")));
        }
        Ok(duration)
    }

    fn switch(&self, key: &str) -> Result<bool, ConfigError> {
        self.last(key).map_or(Ok(false), |value| {
            value
                .trim()
                .parse::<bool>()
                .map_err(|_| self.invalid(key, format!("invalid boolean {value:?}")))
        })
    }

    /// Every `expected-status-codes` value joined into one set, `200` if there is none.
    fn status_codes(&self) -> Result<StatusCodes, ConfigError> {
        let codes = self.all("expected-status-codes");
        if codes.is_empty() {
            return Ok(StatusCodes::default());
        }
        codes
            .join(",")
            .parse()
            .map_err(|e| self.invalid("expected-status-codes", format!("{e}")))
    }

    fn into_target(self) -> Result<TargetFlags, ConfigError> {
        let address = self
            .last("address")
            .map(str::trim)
            .ok_or_else(|| ConfigError::MissingRequired(self.flag("address")))?
            .to_owned();
        validate_address(self.check_type, &address)
            .map_err(|reason| self.invalid("address", reason))?;

        let options = match self.check_type {
            CheckType::Http => TargetOptions::Http(HttpFlags {
                method: self.last("method").unwrap_or("GET").to_owned(),
                headers: self.all("header"),
                allow_duplicate_headers: self.switch("allow-duplicate-headers")?,
                expected_status_codes: self.status_codes()?,
                skip_tls_verify: self.switch("skip-tls-verify")?,
                timeout: self.positive_duration("timeout", DEFAULT_TIMEOUT)?,
            }),
            CheckType::Tcp => TargetOptions::Tcp {
                timeout: self.positive_duration("timeout", DEFAULT_TIMEOUT)?,
            },
            CheckType::Icmp => TargetOptions::Icmp {
                read_timeout: self.positive_duration("read-timeout", DEFAULT_TIMEOUT)?,
                write_timeout: self.positive_duration("write-timeout", DEFAULT_TIMEOUT)?,
            },
        };

        Ok(TargetFlags {
            name: self
                .last("name")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned),
            interval: self.duration("interval", Duration::ZERO)?,
            address,
            options,
            id: self.id,
        })
    }
}

/// Splits `<type>.<id>.<key>`.
fn split_dynamic(name: &str) -> Result<(CheckType, &str, &str), ConfigError> {
    let mut parts = name.splitn(3, '.');
    let (Some(group), Some(id), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(unknown_flag(name));
    };
    let check_type = match group {
        "http" => CheckType::Http,
        "tcp" => CheckType::Tcp,
        "icmp" => CheckType::Icmp,
        _ => return Err(unknown_flag(name)),
    };
    if id.is_empty() || value_kind(check_type, key).is_none() {
        return Err(unknown_flag(name));
    }
    Ok((check_type, id, key))
}

/// Parses global flags with argh and target groups by hand.
///
/// `--help` and `--version` come back as [`ConfigError::EarlyExit`] carrying the text to print.
pub fn parse_flags(args: &[String], version: &str) -> Result<ParsedFlags, ConfigError> {
    let mut globals: Vec<String> = vec![];
    let mut raw_targets: Vec<RawTarget> = vec![];

    let mut args = args.iter().peekable();
    while let Some(arg) = args.next() {
        let Some(flag) = arg.strip_prefix("--") else {
            globals.push(arg.clone());
            continue;
        };
        let (name, inline_value) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag, None),
        };

        if !name.contains('.') {
            if !GLOBAL_FLAGS.contains(&name) {
                return Err(unknown_flag(name));
            }
            // argh only understands `--flag value`.
            globals.push(format!("--{name}"));
            globals.extend(inline_value.map(str::to_owned));
            continue;
        }

        let (check_type, id, key) = split_dynamic(name)?;
        let value = match (inline_value, value_kind(check_type, key)) {
            (Some(value), _) => value.to_owned(),
            (None, Some(ValueKind::Switch)) => "true".to_owned(),
            (None, _) => args
                .next_if(|next| !next.starts_with("--"))
                .cloned()
                .ok_or_else(|| ConfigError::MissingValue(name.to_owned()))?,
        };

        let position = raw_targets
            .iter()
            .position(|t| t.check_type == check_type && t.id == id);
        let target = match position {
            Some(index) => &mut raw_targets[index],
            None => {
                raw_targets.push(RawTarget {
                    check_type,
                    id: id.to_owned(),
                    values: vec![],
                });
                let last = raw_targets.len() - 1;
                &mut raw_targets[last]
            }
        };
        target.values.push((key.to_owned(), value));
    }

    let globals: Vec<&str> = globals.iter().map(String::as_str).collect();
    let flags = GlobalFlags::from_args(&["never"], &globals).map_err(|exit| match exit.status {
        Ok(()) => ConfigError::EarlyExit(exit.output),
        Err(()) => ConfigError::Flags(exit.output.trim().to_owned()),
    })?;
    if flags.version {
        return Err(ConfigError::EarlyExit(version.to_owned()));
    }

    Ok(ParsedFlags {
        default_interval: flags.default_interval,
        max_attempts: flags.max_attempts,
        log_level: flags.log_level,
        targets: raw_targets
            .into_iter()
            .map(RawTarget::into_target)
            .collect::<Result<_, _>>()?,
    })
}

fn validate_address(check_type: CheckType, address: &str) -> Result<(), String> {
    if address.is_empty() {
        return Err("address cannot be empty".to_owned());
    }
    if is_resolvable(address) {
        return Ok(());
    }
    match check_type {
        CheckType::Http => {
            let url =
                Url::parse(address).map_err(|_| format!("invalid URL: {address:?}"))?;
            if url.host_str().map_or(true, str::is_empty) {
                return Err(format!("invalid URL: {address:?}"));
            }
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!("unsupported scheme: {:?}", url.scheme()));
            }
        }
        CheckType::Tcp => {
            if !split_host_port(address).map_or(false, |(_, port)| !port.is_empty()) {
                return Err(format!(
                    "TCP address must be host:port (e.g. 127.0.0.1:80): {address:?}"
                ));
            }
        }
        CheckType::Icmp => {
            if address.parse::<IpAddr>().is_ok() {
                return Ok(());
            }
            if address.contains("://") {
                return Err("ICMP check cannot have a scheme".to_owned());
            }
            if address.contains(['/', ':']) {
                return Err(
                    "ICMP address must be a hostname or IP without path or port".to_owned(),
                );
            }
            if !is_hostname_like(address) {
                return Err(format!("invalid hostname: {address:?}"));
            }
        }
    }
    Ok(())
}

fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(bracketed) = address.strip_prefix('[') {
        return bracketed.split_once("]:");
    }
    let (host, port) = address.rsplit_once(':')?;
    (!host.contains(':')).then_some((host, port))
}

fn is_hostname_like(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ParsedFlags, ConfigError> {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        parse_flags(&args, "1.0.0")
    }

    fn parse_err(args: &[&str]) -> String {
        parse(args).unwrap_err().to_string()
    }

    fn http_options(args: &[&str]) -> HttpFlags {
        match parse(args).unwrap().targets.remove(0).options {
            TargetOptions::Http(http) => http,
            other => panic!("not an http target: {other:?}"),
        }
    }

    #[test]
    fn defaults() {
        let flags = parse(&[]).unwrap();

        assert_eq!(DEFAULT_CHECK_INTERVAL, flags.default_interval);
        assert_eq!(0, flags.max_attempts);
        assert_eq!(Level::INFO, flags.log_level);
        assert!(flags.targets.is_empty());
    }

    #[test]
    fn global_flags() {
        let flags = parse(&[
            "--default-interval=5s",
            "--max-attempts",
            "3",
            "--log-level=debug",
        ])
        .unwrap();

        assert_eq!(Duration::from_secs(5), flags.default_interval);
        assert_eq!(3, flags.max_attempts);
        assert_eq!(Level::DEBUG, flags.log_level);
    }

    #[test]
    fn invalid_default_interval() {
        let err = parse_err(&["--default-interval=invalid"]);
        assert!(err.starts_with("flag parsing error:"), "{err}");
        assert!(err.contains("--default-interval"), "{err}");
    }

    #[test]
    fn help_and_version() {
        assert!(matches!(
            parse(&["--help"]),
            Err(ConfigError::EarlyExit(text)) if text.contains("Usage: never")
        ));
        assert_eq!("1.0.0", parse_err(&["--version"]));
    }

    #[test]
    fn unknown_flags() {
        assert_eq!(
            "flag parsing error: unknown flag: --invalid",
            parse_err(&["--invalid"])
        );
        assert_eq!(
            "flag parsing error: unknown flag: --target.unsupported.name",
            parse_err(&["--target.unsupported.name=example"])
        );
        assert_eq!(
            "flag parsing error: unknown flag: --http.web",
            parse_err(&["--http.web=1"])
        );
        assert_eq!(
            "flag parsing error: unknown flag: --tcp.db.method",
            parse_err(&["--tcp.db.method=GET"])
        );
    }

    #[test]
    fn http_target() {
        let flags = parse(&[
            "--http.web.address=https://example.com/health",
            "--http.web.name=Web",
            "--http.web.method",
            "POST",
            "--http.web.header=Authorization=Bearer token",
            "--http.web.header",
            "X-Trace=1",
            "--http.web.skip-tls-verify",
            "--http.web.expected-status-codes=200-299",
            "--http.web.timeout=500ms",
            "--http.web.interval=1s",
        ])
        .unwrap();

        assert_eq!(1, flags.targets.len());
        let target = &flags.targets[0];
        assert_eq!("web", target.id);
        assert_eq!(Some("Web".to_owned()), target.name);
        assert_eq!(CheckType::Http, target.check_type());
        assert_eq!(Duration::from_secs(1), target.interval);
        assert_eq!(
            TargetOptions::Http(HttpFlags {
                method: "POST".to_owned(),
                headers: vec![
                    "Authorization=Bearer token".to_owned(),
                    "X-Trace=1".to_owned(),
                ],
                allow_duplicate_headers: false,
                expected_status_codes: "200-299".parse().unwrap(),
                skip_tls_verify: true,
                timeout: Duration::from_millis(500),
            }),
            target.options
        );
    }

    #[test]
    fn repeated_status_codes_accumulate() {
        let http = http_options(&[
            "--http.web.address=http://localhost",
            "--http.web.expected-status-codes=200",
            "--http.web.expected-status-codes",
            "301-302,404",
        ]);

        let codes = http.expected_status_codes;
        assert_eq!("[200,301-302,404]", codes.to_string());
        assert!(codes.contains(200));
        assert!(codes.contains(302));
        assert!(codes.contains(404));
        assert!(!codes.contains(500));
    }

    #[test]
    fn status_codes_default_to_200() {
        let http = http_options(&["--http.web.address=http://localhost"]);
        assert_eq!(StatusCodes::default(), http.expected_status_codes);
    }

    #[test]
    fn target_defaults() {
        let flags = parse(&[
            "--tcp.db.address=localhost:5432",
            "--icmp.gw.address=192.168.1.1",
        ])
        .unwrap();

        let tcp = &flags.targets[0];
        assert_eq!(None, tcp.name);
        assert_eq!(Duration::ZERO, tcp.interval);
        assert_eq!(
            TargetOptions::Tcp {
                timeout: Duration::from_secs(2),
            },
            tcp.options
        );
        let icmp = &flags.targets[1];
        assert_eq!(
            TargetOptions::Icmp {
                read_timeout: Duration::from_secs(2),
                write_timeout: Duration::from_secs(2),
            },
            icmp.options
        );
    }

    #[test]
    fn targets_keep_command_line_order() {
        let flags = parse(&[
            "--tcp.b.address=localhost:2",
            "--http.a.address=http://localhost",
            "--tcp.b.timeout=1s",
            "--tcp.a.address=localhost:1",
        ])
        .unwrap();

        let ids: Vec<(CheckType, &str)> = flags
            .targets
            .iter()
            .map(|t| (t.check_type(), t.id.as_str()))
            .collect();
        assert_eq!(
            vec![
                (CheckType::Tcp, "b"),
                (CheckType::Http, "a"),
                (CheckType::Tcp, "a"),
            ],
            ids
        );
    }

    #[test]
    fn missing_address() {
        assert_eq!(
            "missing required flag --tcp.db.address",
            parse_err(&["--tcp.db.timeout=1s"])
        );
    }

    #[test]
    fn missing_value() {
        assert_eq!(
            "flag --tcp.db.address needs a value",
            parse_err(&["--tcp.db.address", "--max-attempts=1"])
        );
    }

    #[test]
    fn timeouts_must_be_positive() {
        assert_eq!(
            "invalid value for flag --tcp.db.timeout: timeout must be positive",
            parse_err(&["--tcp.db.address=localhost:5432", "--tcp.db.timeout=0s"])
        );
        assert_eq!(
            "invalid value for flag --icmp.gw.read-timeout: read-timeout must be positive",
            parse_err(&["--icmp.gw.address=10.0.0.1", "--icmp.gw.read-timeout=0s"])
        );
    }

    #[test]
    fn invalid_status_codes() {
        let err = parse_err(&[
            "--http.web.address=http://localhost",
            "--http.web.expected-status-codes=201-200",
        ]);
        assert!(
            err.starts_with("invalid value for flag --http.web.expected-status-codes:"),
            "{err}"
        );
    }

    #[test]
    fn address_validation() {
        assert_eq!(
            "invalid value for flag --http.web.address: unsupported scheme: \"ftp\"",
            parse_err(&["--http.web.address=ftp://example.com"])
        );
        assert_eq!(
            "invalid value for flag --http.web.address: invalid URL: \"example.com\"",
            parse_err(&["--http.web.address=example.com"])
        );
        let err = parse_err(&["--tcp.db.address=localhost"]);
        assert!(err.contains("TCP address must be host:port"), "{err}");
        assert!(parse(&["--tcp.db.address=[::1]:5432"]).is_ok());
        assert_eq!(
            "invalid value for flag --icmp.gw.address: ICMP check cannot have a scheme",
            parse_err(&["--icmp.gw.address=http://example.com"])
        );
        assert_eq!(
            "invalid value for flag --icmp.gw.address: \
             ICMP address must be a hostname or IP without path or port",
            parse_err(&["--icmp.gw.address=example.com:80"])
        );
        assert_eq!(
            "invalid value for flag --icmp.gw.address: invalid hostname: \"-bad-.com\"",
            parse_err(&["--icmp.gw.address=-bad-.com"])
        );
        assert!(parse(&["--icmp.gw.address=::1"]).is_ok());
    }

    #[test]
    fn resolvable_address_is_not_validated() {
        let flags = parse(&["--tcp.db.address=env:DATABASE_ADDRESS"]).unwrap();
        assert_eq!("env:DATABASE_ADDRESS", flags.targets[0].address);
    }

    #[test]
    fn hostname_like() {
        assert!(is_hostname_like("example.com"));
        assert!(is_hostname_like("my-host"));
        assert!(!is_hostname_like("my_host"));
        assert!(!is_hostname_like("example..com"));
        assert!(!is_hostname_like(&"a".repeat(64)));
    }
}
