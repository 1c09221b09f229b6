//! Abort-aware futures.
//!
//! An [`AbortSignal`] merges an optional caller-owned `CancellationToken`
//! with an optional deadline, so a request can be cut short by whichever
//! fires first. [`OrAbortExt`] races any future against a signal.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a future did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aborted {
    /// The external token was cancelled.
    Cancelled,
    /// The deadline elapsed first.
    TimedOut,
}

/// A cancellation token and a timeout folded into one abort source.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// A zero timeout disables the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Drive `fut` until it completes or the signal fires.
    ///
    /// An already-cancelled token wins without polling `fut` at all.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Aborted>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Aborted::Cancelled);
        }

        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(Aborted::Cancelled),
            _ = expired => Err(Aborted::TimedOut),
            output = fut => Ok(output),
        }
    }
}

/// Error returned when a future loses the race against its token.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelErr {
    Cancelled,
}

/// Extension trait racing futures against cancellation sources.
#[async_trait]
pub trait OrAbortExt: Sized {
    type Output;

    /// Race this future against a bare cancellation token.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr>;

    /// Race this future against a merged token and deadline.
    async fn or_abort(self, signal: &AbortSignal) -> Result<Self::Output, Aborted>;
}

#[async_trait]
impl<F> OrAbortExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr> {
        tokio::select! {
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
        }
    }

    async fn or_abort(self, signal: &AbortSignal) -> Result<Self::Output, Aborted> {
        signal.run(self).await
    }
}
