//! Error taxonomy for the relay pipeline.
//!
//! Per-crate errors convert into [`ForwardError`], which carries enough
//! structure for a caller to tell "fix your input" apart from "try again
//! later" and from "someone else's transaction won".

use crate::{Address, TransactionHash};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForwardError>;

#[derive(Error, Debug)]
pub enum ForwardError {
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error("Signing error: {0}")]
	Signing(String),

	#[error("Encoding error: {0}")]
	Encoding(String),

	#[error("Gas estimation failed: {reason}")]
	Estimation {
		reason: String,
		revert_data: Option<Vec<u8>>,
	},

	#[error("Caller {0} is not allowed by the verifier")]
	CallerNotAllowed(Address),

	#[error("Submission failed: {0}")]
	Submission(String),

	#[error("Transaction {hash} unconfirmed after {}s", .waited.as_secs())]
	UnconfirmedTimeout {
		hash: TransactionHash,
		counter: u64,
		waited: Duration,
	},

	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Configuration error: {0}")]
	Config(String),
}

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Configure,
	Build,
	Sign,
	Encode,
	Submit,
	Confirm,
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
	/// The input is wrong; retrying unchanged fails again.
	FixInput,
	/// A transient condition; the same request may succeed later.
	RetryLater,
	/// The request cannot succeed as built.
	Never,
}

impl ForwardError {
	pub fn stage(&self) -> Stage {
		match self {
			ForwardError::InvalidArgument(_) => Stage::Build,
			ForwardError::Signing(_) => Stage::Sign,
			ForwardError::Encoding(_) => Stage::Encode,
			ForwardError::Estimation { .. }
			| ForwardError::CallerNotAllowed(_)
			| ForwardError::Submission(_)
			| ForwardError::Transport(_) => Stage::Submit,
			ForwardError::UnconfirmedTimeout { .. } => Stage::Confirm,
			ForwardError::Config(_) => Stage::Configure,
		}
	}

	pub fn retry(&self) -> Retry {
		match self {
			ForwardError::InvalidArgument(_) | ForwardError::Config(_) => Retry::FixInput,
			ForwardError::Signing(_)
			| ForwardError::Encoding(_)
			| ForwardError::Estimation { .. }
			| ForwardError::CallerNotAllowed(_) => Retry::Never,
			ForwardError::Submission(_)
			| ForwardError::Transport(_)
			| ForwardError::UnconfirmedTimeout { .. } => Retry::RetryLater,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::B256;

	#[test]
	fn test_classification() {
		let err = ForwardError::InvalidArgument("nonce missing".into());
		assert_eq!(err.stage(), Stage::Build);
		assert_eq!(err.retry(), Retry::FixInput);

		let err = ForwardError::UnconfirmedTimeout {
			hash: TransactionHash(B256::ZERO),
			counter: 3,
			waited: Duration::from_secs(30),
		};
		assert_eq!(err.stage(), Stage::Confirm);
		assert_eq!(err.retry(), Retry::RetryLater);
		assert!(err.to_string().contains("30s"));

		let err = ForwardError::CallerNotAllowed(Address::ZERO);
		assert_eq!(err.retry(), Retry::Never);
	}
}
