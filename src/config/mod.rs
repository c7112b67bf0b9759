//! Command line configuration: global flags, `--<type>.<id>.<key>` target groups and the
//! checker factory.

use crate::checker::{BuildError, CheckType};

mod factory;
pub mod flags;
mod resolve;

pub use factory::{build_checkers, create_http_headers, HeaderError};
pub use flags::{
    parse_flags, HttpFlags, ParsedFlags, TargetFlags, TargetOptions, DEFAULT_CHECK_INTERVAL,
};
pub use resolve::{is_resolvable, resolve_variable, ResolveError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `--help` or `--version`: print the text and exit successfully.
    #[error("{0}")]
    EarlyExit(String),
    #[error("flag parsing error: {0}")]
    Flags(String),
    #[error("flag --{0} needs a value")]
    MissingValue(String),
    #[error("missing required flag --{0}")]
    MissingRequired(String),
    #[error("invalid value for flag --{flag}: {reason}")]
    InvalidValue { flag: String, reason: String },
    #[error("invalid variable in address: {0}")]
    AddressVariable(#[source] ResolveError),
    #[error("invalid \"--{flag}\": {source}")]
    Header { flag: String, source: HeaderError },
    #[error("failed to create {check_type} checker: {source}")]
    Build {
        check_type: CheckType,
        source: BuildError,
    },
}
