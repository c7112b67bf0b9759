//! Readiness loop: run a checker until it succeeds, runs out of attempts or is cancelled.

use crate::checker::Checker;
use crate::context::{Context, ContextError};
use std::time::Duration;
use tracing::Instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("max attempts reached")]
    MaxAttemptsExceeded,
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Checking,
    Retrying,
    Ready,
    Exhausted,
    Cancelled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Ready | State::Exhausted | State::Cancelled)
    }
}

/// Terminal result of a [`ReadinessLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    Exhausted,
    Cancelled(ContextError),
}

impl Outcome {
    /// Cooperative cancellation is not an error, a deadline is.
    pub fn into_result(self) -> Result<(), WaitError> {
        match self {
            Outcome::Ready | Outcome::Cancelled(ContextError::Cancelled) => Ok(()),
            Outcome::Exhausted => Err(WaitError::MaxAttemptsExceeded),
            Outcome::Cancelled(cause) => Err(cause.into()),
        }
    }
}

pub struct ReadinessLoop<'a, C: Checker + ?Sized> {
    checker: &'a mut C,
    name: String,
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    state: State,
    previous: Option<State>,
    outcome: Option<Outcome>,
    span: tracing::Span,
}

impl<'a, C: Checker + ?Sized> ReadinessLoop<'a, C> {
    /// `max_attempts == 0` retries until success or cancellation.
    pub fn new(checker: &'a mut C, interval: Duration, max_attempts: u32) -> Self {
        let name = checker.name().to_owned();
        let span = tracing::info_span!(
            "wait",
            target = %name,
            check_type = %checker.check_type(),
            address = %checker.address(),
            interval = ?interval,
            max_attempts,
        );
        ReadinessLoop {
            checker,
            name,
            interval,
            max_attempts,
            attempts: 0,
            state: State::Checking,
            previous: None,
            outcome: None,
            span,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The state before the last transition, `None` until the first one.
    pub fn previous_state(&self) -> Option<State> {
        self.previous
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Runs the loop to its terminal state. Running a finished loop returns the same outcome again.
    pub async fn run(&mut self, ctx: &Context) -> Outcome {
        loop {
            if let Some(outcome) = self.outcome {
                return outcome;
            }
            self.step(ctx).await;
        }
    }

    /// Performs one transition and returns the new state.
    ///
    /// `Checking` runs one check, `Retrying` waits one interval. A terminal state stays put.
    pub async fn step(&mut self, ctx: &Context) -> State {
        let span = self.span.clone();
        match self.state {
            State::Checking => self.check_once(ctx).instrument(span).await,
            State::Retrying => self.wait_interval(ctx).instrument(span).await,
            State::Ready | State::Exhausted | State::Cancelled => {}
        }
        self.state
    }

    async fn check_once(&mut self, ctx: &Context) {
        if self.attempts == 0 {
            tracing::info!("Waiting for {} to become ready...", self.name);
        }
        self.attempts = self.attempts.saturating_add(1);

        match self.checker.check(ctx).await {
            Ok(()) => {
                tracing::info!(attempt = self.attempts, "{} is ready ✓", self.name);
                return self.finish(State::Ready, Outcome::Ready);
            }
            Err(e) => tracing::warn!(
                error = %e,
                attempt = self.attempts,
                "{} is not ready ✗",
                self.name
            ),
        }

        if self.max_attempts > 0 && self.attempts >= self.max_attempts {
            return self.finish(State::Exhausted, Outcome::Exhausted);
        }
        self.transition(State::Retrying);
    }

    async fn wait_interval(&mut self, ctx: &Context) {
        // A new sleep per wait, so nothing can fire before the interval has elapsed.
        tokio::select! {
            biased;
            cause = ctx.done() => self.finish(State::Cancelled, Outcome::Cancelled(cause)),
            () = tokio::time::sleep(self.interval) => self.transition(State::Checking),
        }
    }

    fn transition(&mut self, next: State) {
        self.previous = Some(self.state);
        self.state = next;
    }

    fn finish(&mut self, state: State, outcome: Outcome) {
        self.transition(state);
        self.outcome = Some(outcome);
    }
}

/// Checks `checker` every `interval` until it is ready.
///
/// Returns `Ok` when the checker became ready or `ctx` was cancelled,
/// [`WaitError::MaxAttemptsExceeded`] after `max_attempts` failed attempts (0 = unbounded) and
/// [`WaitError::Context`] when the deadline passed.
pub async fn wait_until_ready<C: Checker + ?Sized>(
    ctx: &Context,
    interval: Duration,
    max_attempts: u32,
    checker: &mut C,
) -> Result<(), WaitError> {
    ReadinessLoop::new(checker, interval, max_attempts)
        .run(ctx)
        .await
        .into_result()
}
