//! Per-request deadline shared by every stage of one resolution

use crate::error::StageError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Absolute point in time after which no external call may start.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Clamp a stage timeout to what is left of the request budget.
    pub fn bound(&self, stage: Duration) -> Result<Duration, StageError> {
        let left = self.remaining();
        if left.is_zero() {
            return Err(StageError::deadline());
        }
        Ok(stage.min(left))
    }

    /// A tighter deadline ending at `min(now + stage, self)`.
    pub fn narrow(&self, stage: Duration) -> Result<Deadline, StageError> {
        Ok(Deadline::after(self.bound(stage)?))
    }

    /// Run `fut` under `min(stage, remaining)`. Elapsing maps to a transport error.
    pub async fn run<F, T>(&self, stage: Duration, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let limit = self.bound(stage)?;
        match tokio::time::timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => Err(StageError::Transport(format!(
                "timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }
}
