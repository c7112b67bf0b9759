use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Context`] is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Cooperative shutdown: somebody asked us to stop.
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus an optional deadline, handed to every blocking operation.
///
/// Cancelling a context cancels all contexts derived from it, never its parent.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    pub fn background() -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Context {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn err(&self) -> Option<ContextError> {
        if self.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            return Some(ContextError::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        None
    }

    /// Resolves once the context is cancelled or its deadline has passed.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => self.err().unwrap_or(ContextError::Cancelled),
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Returns the earlier of `deadline` and the context deadline.
    pub(crate) fn clamp(&self, deadline: Instant) -> Instant {
        match self.deadline {
            Some(own) if own < deadline => own,
            _ => deadline,
        }
    }
}
