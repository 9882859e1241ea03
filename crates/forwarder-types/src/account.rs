//! Account-related types for the relay.
//!
//! This module defines signatures and the relayer-side transaction model
//! used when an encoded forward is handed to the network.

use alloy::primitives::{Signature as AlloySignature, TxKind};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use serde::{Deserialize, Serialize};

pub use alloy::primitives::{Address, Bytes, B256, U256};

/// Cryptographic signature representation.
///
/// Stores signatures as raw bytes in the standard Ethereum format (r, s, v)
/// with `v` normalized to 27 or 28, the layout the verifier's `ecrecover`
/// expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Parses the raw bytes back into an alloy signature for recovery.
	pub fn to_alloy(&self) -> Option<AlloySignature> {
		AlloySignature::try_from(self.0.as_slice()).ok()
	}
}

impl From<AlloySignature> for Signature {
	fn from(sig: AlloySignature) -> Self {
		Signature(sig.as_bytes().to_vec())
	}
}

impl std::fmt::Display for Signature {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Relayer transaction representation.
///
/// Fields left as `None` are filled by the submitter (counter, gas limit,
/// fees) before broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Sending account, the relayer.
	pub from: Option<Address>,
	/// Recipient address (None for contract creation).
	pub to: Option<Address>,
	/// Transaction calldata.
	pub data: Vec<u8>,
	/// Value to transfer in native currency.
	pub value: U256,
	/// Chain ID for replay protection.
	pub chain_id: u64,
	/// Relayer account counter.
	pub nonce: Option<u64>,
	/// Gas limit for transaction execution.
	pub gas_limit: Option<u64>,
	/// Legacy gas price.
	pub gas_price: Option<u128>,
	/// Maximum fee per gas (EIP-1559).
	pub max_fee_per_gas: Option<u128>,
	/// Maximum priority fee per gas (EIP-1559).
	pub max_priority_fee_per_gas: Option<u128>,
}

impl Transaction {
	/// A call to `to` with the given calldata and no fee fields set.
	pub fn call(to: Address, data: Vec<u8>, value: U256, chain_id: u64) -> Self {
		Self {
			from: None,
			to: Some(to),
			data,
			value,
			chain_id,
			nonce: None,
			gas_limit: None,
			gas_price: None,
			max_fee_per_gas: None,
			max_priority_fee_per_gas: None,
		}
	}

	/// Fee the network ranks this transaction by.
	pub fn effective_fee(&self) -> u128 {
		self.max_fee_per_gas.or(self.gas_price).unwrap_or(0)
	}

	pub fn is_eip1559(&self) -> bool {
		self.max_fee_per_gas.is_some()
	}
}

/// Conversion from our Transaction type to Alloy's TransactionRequest.
impl From<Transaction> for TransactionRequest {
	fn from(tx: Transaction) -> Self {
		let to = match tx.to {
			Some(address) => TxKind::Call(address),
			None => TxKind::Create,
		};

		TransactionRequest {
			from: tx.from,
			chain_id: Some(tx.chain_id),
			value: Some(tx.value),
			to: Some(to),
			nonce: tx.nonce,
			gas: tx.gas_limit,
			gas_price: tx.gas_price,
			max_fee_per_gas: tx.max_fee_per_gas,
			max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
			input: TransactionInput {
				input: Some(Bytes::from(tx.data)),
				data: None,
			},
			..Default::default()
		}
	}
}
