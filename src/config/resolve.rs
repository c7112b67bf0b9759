use std::env;
use std::fs;
use std::io;

const ENV_PREFIX: &str = "env:";
const FILE_PREFIX: &str = "file:";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("environment variable {0:?} not found")]
    EnvNotSet(String),
    #[error("failed to read file {path:?}: {source}")]
    File { path: String, source: io::Error },
}

/// True if `value` is looked up by [`resolve_variable`] instead of taken literally.
pub fn is_resolvable(value: &str) -> bool {
    value.starts_with(ENV_PREFIX) || value.starts_with(FILE_PREFIX)
}

/// Resolves `env:NAME` from the environment and `file:PATH` from the (trimmed) file content.
/// Any other value is returned unchanged.
pub fn resolve_variable(value: &str) -> Result<String, ResolveError> {
    if let Some(name) = value.strip_prefix(ENV_PREFIX) {
        return env::var(name)
            .map_err(|_| ResolveError::EnvNotSet(name.to_owned()));
    }
    if let Some(path) = value.strip_prefix(FILE_PREFIX) {
        return fs::read_to_string(path)
            .map(|content| content.trim().to_owned())
            .map_err(|source| ResolveError::File {
                path: path.to_owned(),
                source,
            });
    }
    Ok(value.to_owned())
}
