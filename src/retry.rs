//! Retry loop for remote steps.

use crate::error::SyncError;
use crate::types::RetryPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Granularity at which a backoff sleep notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Runs `step` until it succeeds, fails with anything but a transient remote
/// error, or the policy runs out of attempts.
///
/// `step` receives the 1-based attempt number so callers can re-establish
/// state (reconnect, re-enter a directory) before repeating the operation.
/// Delays come from [`RetryPolicy::delays`]; an unbounded policy retries
/// forever unless `cancel` is raised, which ends the loop with
/// [`SyncError::Cancelled`] before the next attempt.
pub(crate) fn retry<T, F>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: Option<&AtomicBool>,
    mut step: F,
) -> Result<T, SyncError>
where
    F: FnMut(usize) -> Result<T, SyncError>,
{
    let cancelled = || cancel.is_some_and(|flag| flag.load(Ordering::SeqCst));
    let mut delays = policy.delays();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match step(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempts", operation, attempt);
                }
                return Ok(value);
            }
            Err(SyncError::Remote(e)) if e.is_transient() => match delays.next() {
                Some(delay) => {
                    warn!("Error {} when {}, retry in {:?}", e, operation, delay);
                    sleep(delay, &cancelled);
                    if cancelled() {
                        warn!("Interrupted while {}", operation);
                        return Err(SyncError::Cancelled {
                            operation: operation.to_string(),
                        });
                    }
                }
                None => {
                    error!("Error {} when {}, giving up", e, operation);
                    return Err(SyncError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
            },
            Err(e) => {
                error!("Error {} when {}", e, operation);
                return Err(e);
            }
        }
    }
}

/// Sleeps for `delay`, returning early once `cancelled` holds.
fn sleep(delay: Duration, cancelled: &dyn Fn() -> bool) {
    let deadline = Instant::now() + delay;
    loop {
        let now = Instant::now();
        if now >= deadline || cancelled() {
            return;
        }
        std::thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    #[test]
    fn test_retries_until_success() {
        let mut calls = 0;
        let result = retry(&RetryPolicy::immediate(None), "listing", None, |attempt| {
            calls += 1;
            if attempt < 5 {
                Err(RemoteError::Transient("421 busy".to_string()).into())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry(&RetryPolicy::immediate(None), "login", None, |_| {
            calls += 1;
            Err(RemoteError::Permanent("530 not logged in".to_string()).into())
        });
        assert!(matches!(result, Err(SyncError::Remote(RemoteError::Permanent(_)))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_bounded_policy_gives_up() {
        let mut calls = 0;
        let result: Result<(), _> = retry(&RetryPolicy::immediate(Some(3)), "fetch", None, |_| {
            calls += 1;
            Err(RemoteError::Connection("reset".to_string()).into())
        });
        match result {
            Err(SyncError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_local_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry(&RetryPolicy::immediate(None), "fetch", None, |_| {
            calls += 1;
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        });
        assert!(matches!(result, Err(SyncError::IoError(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cancellation_stops_a_failing_step() {
        let flag = AtomicBool::new(false);
        let mut calls = 0;
        let result: Result<(), _> = retry(&RetryPolicy::immediate(None), "connecting", Some(&flag), |_| {
            calls += 1;
            if calls == 3 {
                flag.store(true, Ordering::SeqCst);
            }
            Err(RemoteError::Connection("refused".to_string()).into())
        });
        assert!(matches!(result, Err(SyncError::Cancelled { .. })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_cancellation_cuts_a_long_backoff_short() {
        let flag = AtomicBool::new(true);
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(600),
            max_attempts: None,
        };
        let started = Instant::now();
        let result: Result<(), _> = retry(&policy, "listing", Some(&flag), |_| {
            Err(RemoteError::Transient("421 busy".to_string()).into())
        });
        assert!(matches!(result, Err(SyncError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
