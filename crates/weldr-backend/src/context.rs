use crate::DepsolveError;
use std::time::{Duration, Instant};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request deadline handed to slow collaborators.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    deadline: Instant,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// `Err(Timeout)` once the deadline has passed.
    pub fn check(&self) -> Result<(), DepsolveError> {
        if self.expired() {
            Err(DepsolveError::Timeout)
        } else {
            Ok(())
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }
}
