use crate::checker::CheckerWithInterval;
use crate::context::Context;
use crate::wait::{wait_until_ready, WaitError};
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;
use tracing::Instrument;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no checkers to run")]
    NoCheckers,
    #[error("checker '{name}' failed: {source}")]
    CheckerFailed { name: String, source: WaitError },
    #[error("checker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Waits for every checker concurrently.
///
/// The first failing checker cancels all others; its error is returned once every task has
/// finished.
/// Cancelling `ctx` stops all checkers without an error.
pub async fn run_all(
    ctx: &Context,
    checkers: Vec<CheckerWithInterval>,
    max_attempts: u32,
) -> Result<(), RunError> {
    if checkers.is_empty() {
        return Err(RunError::NoCheckers);
    }

    let group = ctx.with_cancel();
    let mut tasks = JoinSet::new();
    for CheckerWithInterval {
        interval,
        mut checker,
    } in checkers
    {
        let ctx = group.clone();
        let task = async move {
            let name = checker.name().to_owned();
            wait_until_ready(&ctx, interval, max_attempts, checker.as_mut())
                .await
                .map_err(|source| RunError::CheckerFailed { name, source })
        };
        tasks.spawn(task.in_current_span().with_current_subscriber());
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(RunError::from).and_then(|result| result);
        if let Err(e) = result {
            tracing::debug!(error = %e, "checker task ended with an error");
            if first_error.is_none() {
                group.cancel();
                first_error = Some(e);
            }
        }
    }
    group.cancel();

    first_error.map_or(Ok(()), Err)
}
