//! Account implementations backed by a local private key.
//!
//! Suitable for development, tests and relayers that keep their key in the
//! process. Custody of the key is the caller's concern.

use crate::{AccountError, AccountInterface};
use alloy::signers::{local::PrivateKeySigner, Signer};
use async_trait::async_trait;
use forwarder_types::{Address, Signature, B256};
use std::sync::Arc;

/// Local wallet implementation using Alloy's signer.
#[derive(Clone)]
pub struct LocalWallet {
	/// The underlying Alloy signer that handles cryptographic operations.
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a new LocalWallet from a hex-encoded private key.
	///
	/// The private key should be provided as a hex string (with or without 0x prefix).
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;

		Ok(Self { signer })
	}

	/// The wrapped alloy signer, for building a transaction wallet.
	pub fn signer(&self) -> &PrivateKeySigner {
		&self.signer
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError> {
		let signature = self
			.signer
			.sign_hash(hash)
			.await
			.map_err(|e| AccountError::SigningFailed(format!("Failed to sign hash: {}", e)))?;

		Ok(signature.into())
	}
}

/// Creates an account provider from a hex-encoded private key.
pub fn create_account(private_key: &str) -> Result<Arc<dyn AccountInterface>, AccountError> {
	Ok(Arc::new(LocalWallet::new(private_key)?))
}
