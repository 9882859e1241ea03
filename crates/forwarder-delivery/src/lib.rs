//! Relayer-side transaction delivery.
//!
//! [`DeliveryInterface`] is the seam to the network: everything the relay
//! needs from a node, and nothing more. [`RelaySubmitter`] drives one relayer
//! account on top of it, owning counter allocation, gas and fee selection,
//! replacement and outcome classification.

use alloy::sol_types::decode_revert_reason;
use async_trait::async_trait;
use forwarder_types::{
	Address, BlockTag, Bytes, FeeQuote, ForwardError, Transaction, TransactionHash,
	TransactionReceipt,
};
use std::time::Duration;
use thiserror::Error;

pub mod chain;
pub mod counter;
pub mod retry;
pub mod submitter;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chain::ChainIdCache;
pub use counter::{CounterAssignment, InFlight, ReplacementPolicy, TransactionCounter};
pub use implementations::evm::alloy::AlloyDelivery;
pub use retry::RetryPolicy;
pub use submitter::{RelaySubmitter, SubmittedTransaction, SubmitterConfig};

/// Errors that can occur while talking to the network or relaying.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The node could not be reached or answered garbage. Reads may retry.
	#[error("Transport error: {0}")]
	Transport(String),
	/// Simulation reverted; the verifier would reject the call.
	#[error("Execution reverted: {reason}")]
	Estimation {
		reason: String,
		revert_data: Option<Vec<u8>>,
	},
	#[error("Caller {0} is not allowed by the verifier")]
	CallerNotAllowed(Address),
	/// The node refused the broadcast.
	#[error("Submission rejected: {0}")]
	Submission(String),
	/// The verifier answered with data its ABI does not allow.
	#[error("Unexpected verifier response: {0}")]
	Decode(String),
	#[error("Transaction {hash} unconfirmed after {}s", .waited.as_secs())]
	UnconfirmedTimeout {
		hash: TransactionHash,
		counter: u64,
		waited: Duration,
	},
	#[error("Invalid configuration: {0}")]
	Config(String),
}

impl DeliveryError {
	/// Whether repeating the same read may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, DeliveryError::Transport(_))
	}

	/// Builds an estimation error, decoding a standard revert reason if the
	/// node returned revert data.
	pub fn reverted(message: impl Into<String>, revert_data: Option<Bytes>) -> Self {
		let message = message.into();
		let reason = revert_data
			.as_ref()
			.and_then(|data| decode_revert_reason(data))
			.unwrap_or(message);

		DeliveryError::Estimation {
			reason,
			revert_data: revert_data.map(|data| data.to_vec()),
		}
	}
}

impl From<DeliveryError> for ForwardError {
	fn from(err: DeliveryError) -> Self {
		match err {
			DeliveryError::Transport(msg) => ForwardError::Transport(msg),
			DeliveryError::Estimation {
				reason,
				revert_data,
			} => ForwardError::Estimation {
				reason,
				revert_data,
			},
			DeliveryError::CallerNotAllowed(caller) => ForwardError::CallerNotAllowed(caller),
			DeliveryError::Submission(msg) => ForwardError::Submission(msg),
			DeliveryError::Decode(msg) => ForwardError::Encoding(msg),
			DeliveryError::UnconfirmedTimeout {
				hash,
				counter,
				waited,
			} => ForwardError::UnconfirmedTimeout {
				hash,
				counter,
				waited,
			},
			DeliveryError::Config(msg) => ForwardError::Config(msg),
		}
	}
}

/// What the relay needs from a network node.
///
/// Implementations sign outgoing transactions with the relayer account; the
/// caller fills every fee and counter field before [`submit`](Self::submit).
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	async fn chain_id(&self) -> Result<u64, DeliveryError>;

	/// Account counter of `address` at the given block tag.
	async fn transaction_count(&self, address: Address, tag: BlockTag)
		-> Result<u64, DeliveryError>;

	/// Simulates `tx` and returns the gas it would use.
	async fn estimate_gas(&self, tx: &Transaction) -> Result<u64, DeliveryError>;

	/// Executes a read-only call against the latest state.
	async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError>;

	/// Current network fee quote.
	async fn fees(&self, eip1559: bool) -> Result<FeeQuote, DeliveryError>;

	/// Signs and broadcasts a fully populated transaction.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Receipt of a mined transaction, `None` while pending or once displaced.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	async fn block_number(&self) -> Result<u64, DeliveryError>;
}
