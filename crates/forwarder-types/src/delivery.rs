//! Transaction delivery types.
//!
//! This module defines types related to blockchain transaction submission
//! and monitoring, including transaction hashes, receipts and logs.

use crate::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<B256> for TransactionHash {
	fn from(hash: B256) -> Self {
		Self(hash)
	}
}

/// A log entry emitted while executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
	/// Contract that emitted the entry.
	pub address: Address,
	/// Indexed topics, the event signature first.
	pub topics: Vec<B256>,
	/// Non-indexed data.
	pub data: Bytes,
}

/// Transaction receipt containing execution details.
///
/// Provides information about a transaction after it has been included in a block,
/// including its success status, block number and emitted logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	/// Gas consumed by the transaction.
	pub gas_used: u64,
	/// Address created by a top-level CREATE transaction.
	pub contract_address: Option<Address>,
	/// Log entries in emission order, nested calls included.
	pub logs: Vec<Log>,
}

/// Block selector for account counter queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
	/// Counter as of the latest mined block.
	Latest,
	/// Counter including transactions waiting in the mempool.
	Pending,
}

/// Fee parameters quoted by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeQuote {
	Legacy {
		gas_price: u128,
	},
	Eip1559 {
		max_fee_per_gas: u128,
		max_priority_fee_per_gas: u128,
	},
}
