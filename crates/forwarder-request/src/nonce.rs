//! Forward nonce generation and process-local reuse detection.

use crate::RequestError;
use dashmap::{mapref::entry::Entry, DashMap};
use forwarder_types::{current_timestamp, Address, ForwardRequest, U256};
use tracing::debug;

/// Where the builder gets a nonce when the caller supplies none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NonceSource {
	/// The caller must always supply one.
	Required,
	/// Generate one with [`generate_nonce`].
	#[default]
	Generate,
}

/// Generates a forward nonce from the current time and 128 random bits.
///
/// The upper half holds UNIX milliseconds and the lower half comes from the
/// thread-local CSPRNG, so concurrent requests for the same `(from, space)`
/// do not collide. Values are not sequential; the verifier only checks
/// uniqueness.
pub fn generate_nonce() -> U256 {
	let millis = std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0);
	let suffix: u128 = rand::random();

	(U256::from(millis) << 128usize) | U256::from(suffix)
}

type NonceKey = (Address, u32, U256);

/// Remembers the nonces this process has handed out.
///
/// The verifier is the authority on consumption; the registry only stops the
/// process from binding one `(from, space, nonce)` to two unrelated requests.
/// Rebuilding an identical request is allowed. Entries are dropped once
/// their deadline passes, since the verifier rejects those requests anyway.
#[derive(Debug, Default)]
pub struct NonceRegistry {
	entries: DashMap<NonceKey, ForwardRequest>,
}

impl NonceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `request`, failing if its nonce is bound to a different one.
	pub fn register(&self, request: &ForwardRequest) -> Result<(), RequestError> {
		self.prune(current_timestamp());

		match self.entries.entry(request.nonce_key()) {
			Entry::Occupied(existing) => {
				if existing.get() == request {
					Ok(())
				} else {
					Err(RequestError::InvalidArgument(format!(
						"nonce {} in space {} of {} is already bound to another request",
						request.nonce, request.space, request.from
					)))
				}
			}
			Entry::Vacant(slot) => {
				slot.insert(request.clone());
				Ok(())
			}
		}
	}

	/// Forgets a nonce, e.g. after the request was abandoned before signing.
	pub fn release(&self, request: &ForwardRequest) {
		self.entries.remove(&request.nonce_key());
	}

	pub fn contains(&self, from: Address, space: u32, nonce: U256) -> bool {
		self.entries.contains_key(&(from, space, nonce))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn prune(&self, now: u64) {
		let before = self.entries.len();
		self.entries.retain(|_, request| !request.is_expired_at(now));
		let pruned = before.saturating_sub(self.entries.len());
		if pruned > 0 {
			debug!(pruned, "Pruned expired nonces");
		}
	}
}
