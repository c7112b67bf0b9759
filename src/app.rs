use crate::config::{self, ConfigError, ParsedFlags};
use crate::context::Context;
use crate::logging;
use crate::runner::{run_all, RunError};
use std::future::Future;
use std::io::{self, Write};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[source] ConfigError),
    #[error("configuration error: no checkers configured")]
    NoCheckers,
    #[error("failed to initialize target checkers: {0}")]
    Init(#[source] ConfigError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Parses `args`, builds the checkers and waits for all of them.
///
/// Logs and help text go to `output`.
pub async fn run<W>(
    ctx: &Context,
    version: &str,
    args: &[String],
    output: W,
) -> Result<(), AppError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let flags = match config::parse_flags(args, version) {
        Ok(flags) => flags,
        Err(ConfigError::EarlyExit(text)) => {
            writeln!(output.make_writer(), "{}", text.trim_end())?;
            return Ok(());
        }
        Err(e) => return Err(AppError::Config(e)),
    };
    let ParsedFlags {
        default_interval,
        max_attempts,
        log_level,
        targets,
    } = flags;

    let dispatch = Dispatch::new(logging::setup_logger(log_level, output));
    let checkers = tracing::dispatcher::with_default(&dispatch, || {
        config::build_checkers(targets, default_interval)
    })
    .map_err(AppError::Init)?;
    if checkers.is_empty() {
        return Err(AppError::NoCheckers);
    }

    async move {
        let span = tracing::info_span!("never", version);
        run_all(ctx, checkers, max_attempts).instrument(span).await
    }
    .with_subscriber(dispatch)
    .await?;
    Ok(())
}

/// Cancels `ctx` once `signal` fires.
///
/// A signal that could not be registered comes back as the error and leaves `ctx` running.
pub async fn cancel_on<F>(ctx: &Context, signal: F) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    signal.await?;
    ctx.cancel();
    Ok(())
}
