use crate::error::{ReconcileError, Result};
use crate::etcd::EtcdError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one attempt of a retried membership operation
#[derive(Debug)]
pub enum Attempt<T> {
    /// The operation converged
    Done(T),
    /// The live state is not there yet
    Pending(String),
}

/// Bounded retry-with-sleep loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Sleep between two attempts
    pub interval: Duration,
    /// Upper bound for a single attempt, network round trips included
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempt_timeout,
        }
    }

    /// Run `attempt` until it reports [`Attempt::Done`]
    ///
    /// A deadline, either the per-attempt timeout elapsing or the server
    /// reporting one, aborts the loop immediately. Every other error is
    /// logged and retried until `max_attempts` is reached.
    pub async fn run<T, F, Fut>(&self, operation: &str, member: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<Attempt<T>, EtcdError>>,
    {
        for n in 1..=self.max_attempts {
            match tokio::time::timeout(self.attempt_timeout, attempt(n)).await {
                Err(_) | Ok(Err(EtcdError::DeadlineExceeded { .. })) => {
                    warn!(operation, member, attempt = n, "etcd deadline exceeded, giving up");
                    return Err(ReconcileError::deadline_exceeded(operation, member));
                }
                Ok(Ok(Attempt::Done(value))) => return Ok(value),
                Ok(Ok(Attempt::Pending(reason))) => {
                    debug!(operation, member, attempt = n, "{}", reason);
                }
                Ok(Err(e)) => {
                    warn!(operation, member, attempt = n, error = %e, "etcd call failed, retrying");
                }
            }

            if n < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(ReconcileError::membership_exhausted(
            operation,
            member,
            self.max_attempts,
        ))
    }
}
