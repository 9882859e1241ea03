//! Alloy-backed network delivery.
//!
//! Submits relayer transactions over an HTTP JSON-RPC endpoint. The provider
//! carries the relayer's wallet so broadcasts are signed locally; counter and
//! fee fields are always set by the caller, which leaves the provider's
//! fillers nothing to guess.

use crate::{DeliveryError, DeliveryInterface};
use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt as AlloyReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use forwarder_types::{
	truncate_hash, BlockTag, Bytes, FeeQuote, Log, Transaction, TransactionHash,
	TransactionReceipt,
};
use tracing::{debug, info, warn};

/// Alloy-based EVM delivery implementation.
pub struct AlloyDelivery {
	/// Provider with the relayer wallet attached.
	provider: Box<dyn Provider<Ethereum>>,
	/// Address of the relayer wallet.
	relayer: Address,
}

impl AlloyDelivery {
	/// Creates a delivery for `rpc_url` signing with `signer`.
	///
	/// No request is made; connection problems surface on first use.
	pub fn new(rpc_url: &str, signer: PrivateKeySigner) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Config(format!("Invalid RPC URL: {}", e)))?;

		let relayer = signer.address();
		debug!(%relayer, "Relayer wallet configured");
		let wallet = EthereumWallet::from(signer);

		let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

		Ok(Self {
			provider: Box::new(provider),
			relayer,
		})
	}

	/// Creates a delivery from a hex-encoded relayer key.
	pub fn from_private_key(rpc_url: &str, private_key: &str) -> Result<Self, DeliveryError> {
		let signer = private_key
			.parse::<PrivateKeySigner>()
			.map_err(|e| DeliveryError::Config(format!("Invalid relayer key: {}", e)))?;
		Self::new(rpc_url, signer)
	}

	pub fn relayer(&self) -> Address {
		self.relayer
	}
}

fn transport(context: &str, e: RpcError<TransportErrorKind>) -> DeliveryError {
	DeliveryError::Transport(format!("{}: {}", context, e))
}

/// Maps a simulation failure, keeping revert data when the node sent it.
fn simulation_error(e: RpcError<TransportErrorKind>) -> DeliveryError {
	match e.as_error_resp() {
		Some(payload) => {
			DeliveryError::reverted(payload.message.to_string(), payload.as_revert_data())
		}
		None => transport("Simulation failed", e),
	}
}

fn convert_receipt(receipt: &AlloyReceipt) -> TransactionReceipt {
	let logs = receipt
		.inner
		.logs()
		.iter()
		.map(|log| Log {
			address: log.inner.address,
			topics: log.inner.data.topics().to_vec(),
			data: log.inner.data.data.clone(),
		})
		.collect();

	TransactionReceipt {
		hash: TransactionHash(receipt.transaction_hash),
		block_number: receipt.block_number.unwrap_or(0),
		success: receipt.status(),
		gas_used: receipt.gas_used,
		contract_address: receipt.contract_address,
		logs,
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	async fn chain_id(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| transport("Failed to get chain id", e))
	}

	async fn transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError> {
		let request = self.provider.get_transaction_count(address);
		let count = match tag {
			BlockTag::Latest => request.latest().await,
			BlockTag::Pending => request.pending().await,
		};
		count.map_err(|e| transport("Failed to get transaction count", e))
	}

	async fn estimate_gas(&self, tx: &Transaction) -> Result<u64, DeliveryError> {
		let request: TransactionRequest = tx.clone().into();
		self.provider
			.estimate_gas(request)
			.await
			.map_err(simulation_error)
	}

	async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError> {
		let request: TransactionRequest = tx.clone().into();
		self.provider.call(request).await.map_err(simulation_error)
	}

	async fn fees(&self, eip1559: bool) -> Result<FeeQuote, DeliveryError> {
		if eip1559 {
			match self.provider.estimate_eip1559_fees().await {
				Ok(fees) => {
					return Ok(FeeQuote::Eip1559 {
						max_fee_per_gas: fees.max_fee_per_gas,
						max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
					})
				}
				Err(e) => {
					warn!("Failed to get EIP-1559 fees, falling back to legacy: {}", e);
				}
			}
		}

		let gas_price = self
			.provider
			.get_gas_price()
			.await
			.map_err(|e| transport("Failed to get gas price", e))?;
		Ok(FeeQuote::Legacy { gas_price })
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let counter = tx.nonce;
		let request: TransactionRequest = tx.into();

		let pending = self.provider.send_transaction(request).await.map_err(|e| {
			match e.as_error_resp() {
				// The node answered and said no: underpriced, counter too low, ...
				Some(payload) => DeliveryError::Submission(payload.message.to_string()),
				None => transport("Failed to send transaction", e),
			}
		})?;

		let hash = TransactionHash(*pending.tx_hash());
		info!(tx_hash = %truncate_hash(&hash.0), ?counter, "Submitted transaction");
		Ok(hash)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash.0)
			.await
			.map_err(|e| transport("Failed to get receipt", e))?;

		Ok(receipt.as_ref().map(convert_receipt))
	}

	async fn block_number(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| transport("Failed to get block number", e))
	}
}
