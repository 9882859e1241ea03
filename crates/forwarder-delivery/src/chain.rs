use crate::retry::{retry_read, RetryPolicy};
use crate::{DeliveryError, DeliveryInterface};
use tokio::sync::OnceCell;
use tracing::debug;

/// Chain id of one provider, resolved on first use.
///
/// A configured value short-circuits the lookup. Concurrent first callers
/// share a single round trip; failed lookups leave the cache empty.
#[derive(Debug, Default)]
pub struct ChainIdCache {
	cell: OnceCell<u64>,
}

impl ChainIdCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_known(chain_id: u64) -> Self {
		Self {
			cell: OnceCell::new_with(Some(chain_id)),
		}
	}

	pub fn cached(&self) -> Option<u64> {
		self.cell.get().copied()
	}

	pub async fn get(
		&self,
		delivery: &dyn DeliveryInterface,
		policy: &RetryPolicy,
	) -> Result<u64, DeliveryError> {
		self.cell
			.get_or_try_init(|| async {
				let chain_id = retry_read("chain_id", policy, || delivery.chain_id()).await?;
				debug!(chain_id, "Resolved chain id");
				Ok(chain_id)
			})
			.await
			.copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::MockChain;
	use std::time::Duration;

	#[tokio::test]
	async fn test_lookup_happens_once() {
		let chain = MockChain::builder().chain_id(10).build();
		let cache = ChainIdCache::new();

		assert_eq!(cache.get(&chain, &RetryPolicy::none()).await.unwrap(), 10);
		chain.fail_next_reads(5);
		assert_eq!(cache.get(&chain, &RetryPolicy::none()).await.unwrap(), 10);
		assert_eq!(cache.cached(), Some(10));
	}

	#[tokio::test]
	async fn test_transient_failure_is_retried() {
		let chain = MockChain::builder().chain_id(10).build();
		chain.fail_next_reads(2);

		let policy = RetryPolicy {
			initial_interval: Duration::from_millis(1),
			max_interval: Duration::from_millis(5),
			max_elapsed: Duration::from_secs(2),
		};
		assert_eq!(ChainIdCache::new().get(&chain, &policy).await.unwrap(), 10);
	}

	#[tokio::test]
	async fn test_failed_lookup_is_not_cached() {
		let chain = MockChain::builder().chain_id(10).build();
		chain.fail_next_reads(1);
		let cache = ChainIdCache::new();

		assert!(cache.get(&chain, &RetryPolicy::none()).await.is_err());
		assert_eq!(cache.cached(), None);
		assert_eq!(cache.get(&chain, &RetryPolicy::none()).await.unwrap(), 10);
	}

	#[tokio::test]
	async fn test_known_value_skips_network() {
		let chain = MockChain::builder().chain_id(10).build();
		chain.fail_next_reads(5);
		let cache = ChainIdCache::with_known(10);
		assert_eq!(cache.get(&chain, &RetryPolicy::none()).await.unwrap(), 10);
	}
}
