//! Retry of idempotent network reads.
//!
//! Only reads go through here. A broadcast is never repeated blindly, since
//! a lost response does not mean the transaction was not accepted.

use crate::DeliveryError;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff bounds for idempotent reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub initial_interval: Duration,
	pub max_interval: Duration,
	/// Total time after which the last error is returned.
	pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			initial_interval: Duration::from_millis(250),
			max_interval: Duration::from_secs(5),
			max_elapsed: Duration::from_secs(30),
		}
	}
}

impl RetryPolicy {
	/// A policy that gives up immediately.
	pub fn none() -> Self {
		Self {
			initial_interval: Duration::ZERO,
			max_interval: Duration::ZERO,
			max_elapsed: Duration::ZERO,
		}
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			initial_interval: self.initial_interval,
			current_interval: self.initial_interval,
			max_interval: self.max_interval,
			max_elapsed_time: Some(self.max_elapsed),
			..Default::default()
		}
	}
}

/// Runs `operation` until it succeeds, fails permanently or the policy is
/// exhausted. Only [`DeliveryError::Transport`] is retried.
pub async fn retry_read<T, F, Fut>(
	name: &str,
	policy: &RetryPolicy,
	mut operation: F,
) -> Result<T, DeliveryError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, DeliveryError>>,
{
	backoff::future::retry_notify(
		policy.backoff(),
		|| {
			let attempt = operation();
			async move {
				attempt.await.map_err(|e| {
					if e.is_transient() {
						backoff::Error::transient(e)
					} else {
						backoff::Error::permanent(e)
					}
				})
			}
		},
		|e: DeliveryError, delay: Duration| {
			warn!(operation = name, ?delay, "Read failed, retrying: {}", e);
		},
	)
	.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn fast() -> RetryPolicy {
		RetryPolicy {
			initial_interval: Duration::from_millis(1),
			max_interval: Duration::from_millis(5),
			max_elapsed: Duration::from_secs(2),
		}
	}

	#[tokio::test]
	async fn test_transient_errors_are_retried() {
		let calls = AtomicU32::new(0);
		let result = retry_read("chain_id", &fast(), || async {
			if calls.fetch_add(1, Ordering::SeqCst) < 2 {
				Err(DeliveryError::Transport("connection reset".into()))
			} else {
				Ok(7u64)
			}
		})
		.await;

		assert_eq!(result.unwrap(), 7);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_permanent_errors_return_immediately() {
		let calls = AtomicU32::new(0);
		let result: Result<u64, _> = retry_read("call", &fast(), || async {
			calls.fetch_add(1, Ordering::SeqCst);
			Err(DeliveryError::reverted("bad", None))
		})
		.await;

		assert!(matches!(result, Err(DeliveryError::Estimation { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_default_policy_is_bounded() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.backoff().max_elapsed_time, Some(Duration::from_secs(30)));
	}
}
