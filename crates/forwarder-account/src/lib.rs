//! Typed-data signing for forward requests.
//!
//! The signing principal is a black box behind [`AccountInterface`]; it may be
//! a local key or a remote signer. [`ForwardSigner`] projects a request onto
//! the configured schema variant, computes the EIP-712 digest and asks the
//! principal to sign it.

use alloy::sol_types::Eip712Domain;
use async_trait::async_trait;
use forwarder_types::{
	Address, ForwardDomain, ForwardError, ForwardRequest, ForwardSchema, Signature, TypedForward,
	B256,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

pub use implementations::local::LocalWallet;

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Signer {actual} cannot sign for {expected}")]
	SignerMismatch { expected: Address, actual: Address },
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Signature recovery failed: {0}")]
	Recovery(String),
}

impl From<AccountError> for ForwardError {
	fn from(err: AccountError) -> Self {
		match err {
			AccountError::InvalidRequest(msg) => ForwardError::InvalidArgument(msg),
			AccountError::InvalidKey(msg) => ForwardError::Config(msg),
			other => ForwardError::Signing(other.to_string()),
		}
	}
}

/// Capability of a signing principal.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs a 32-byte digest without any prefixing.
	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError>;

	/// Signs the EIP-712 digest of `forward` under `domain`.
	///
	/// Remote signers that take structured payloads override this; the
	/// default signs the locally computed digest.
	async fn sign_typed_forward(
		&self,
		domain: &Eip712Domain,
		forward: &TypedForward,
	) -> Result<Signature, AccountError> {
		self.sign_hash(&forward.signing_hash(domain)).await
	}
}

/// Signs and verifies forward requests for one principal.
#[derive(Clone)]
pub struct ForwardSigner {
	account: Arc<dyn AccountInterface>,
}

impl ForwardSigner {
	pub fn new(account: Arc<dyn AccountInterface>) -> Self {
		Self { account }
	}

	pub async fn address(&self) -> Result<Address, AccountError> {
		self.account.address().await
	}

	/// Produces a signature attributable to `request.from`.
	///
	/// Fails with [`AccountError::SignerMismatch`] when the principal is not
	/// `from`; the verifier would reject such a signature anyway.
	pub async fn sign(
		&self,
		request: &ForwardRequest,
		domain: &ForwardDomain,
		schema: ForwardSchema,
	) -> Result<Signature, AccountError> {
		let signer = self.account.address().await?;
		if signer != request.from {
			return Err(AccountError::SignerMismatch {
				expected: request.from,
				actual: signer,
			});
		}

		let typed = TypedForward::new(request, schema)
			.map_err(|e| AccountError::InvalidRequest(e.to_string()))?;
		let signature = self
			.account
			.sign_typed_forward(&domain.to_eip712(), &typed)
			.await?;

		debug!(from = %request.from, nonce = %request.nonce, %schema, "Signed forward request");
		Ok(signature)
	}

	/// Whether `signature` over `request` recovers to `request.from`.
	pub fn verify(
		&self,
		request: &ForwardRequest,
		domain: &ForwardDomain,
		schema: ForwardSchema,
		signature: &Signature,
	) -> bool {
		verify_signature(request, domain, schema, signature)
	}
}

/// Recovers the address that produced `signature` over `request`.
pub fn recover_signer(
	request: &ForwardRequest,
	domain: &ForwardDomain,
	schema: ForwardSchema,
	signature: &Signature,
) -> Result<Address, AccountError> {
	let typed = TypedForward::new(request, schema)
		.map_err(|e| AccountError::InvalidRequest(e.to_string()))?;
	let hash = typed.signing_hash(&domain.to_eip712());

	let parsed = signature
		.to_alloy()
		.ok_or_else(|| AccountError::Recovery("malformed signature bytes".to_string()))?;
	parsed
		.recover_address_from_prehash(&hash)
		.map_err(|e| AccountError::Recovery(e.to_string()))
}

/// Whether `signature` recovers to `request.from` under `schema`.
pub fn verify_signature(
	request: &ForwardRequest,
	domain: &ForwardDomain,
	schema: ForwardSchema,
	signature: &Signature,
) -> bool {
	matches!(
		recover_signer(request, domain, schema, signature),
		Ok(recovered) if recovered == request.from
	)
}
