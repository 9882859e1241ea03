//! Relay submission and outcome tracking for one relayer account.

use crate::chain::ChainIdCache;
use crate::counter::{CounterAssignment, InFlight, ReplacementPolicy, TransactionCounter};
use crate::retry::{retry_read, RetryPolicy};
use crate::{DeliveryError, DeliveryInterface};
use forwarder_request::encoder::{decode_bool, encode_is_caller_allowed, encode_is_nonce_used};
use forwarder_types::{
	truncate_hash, Address, BlockTag, ExecutionOutcome, ExecutionStatus, FeeQuote, ForwardRequest,
	ForwardSchema, Transaction, TransactionHash, U256,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tunables of the relay submitter.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
	/// Verifier contract every forward is sent to.
	pub verifier: Address,
	pub schema: ForwardSchema,
	/// Query `isCallerAllowed` before spending gas.
	pub check_allowlist: bool,
	pub eip1559: bool,
	/// Applied to the node's gas estimate, e.g. 120 for +20%.
	pub gas_limit_multiplier_percent: u64,
	pub replacement: ReplacementPolicy,
	/// Blocks on top of, and including, the inclusion block.
	pub confirmations: u64,
	pub poll_interval: Duration,
	/// Known chain id; resolved from the provider when absent.
	pub chain_id: Option<u64>,
	pub retry: RetryPolicy,
}

impl SubmitterConfig {
	pub fn new(verifier: Address, schema: ForwardSchema) -> Self {
		Self {
			verifier,
			schema,
			check_allowlist: false,
			eip1559: true,
			gas_limit_multiplier_percent: 120,
			replacement: ReplacementPolicy::default(),
			confirmations: 1,
			poll_interval: Duration::from_secs(1),
			chain_id: None,
			retry: RetryPolicy::default(),
		}
	}
}

/// A broadcast relayer transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
	pub hash: TransactionHash,
	/// Relayer counter the transaction was sent with.
	pub counter: u64,
	pub transaction: Transaction,
}

/// Submits encoded forwards from one relayer account.
///
/// All submissions of the account must go through the same instance, since
/// it owns the account's counter.
pub struct RelaySubmitter {
	delivery: Arc<dyn DeliveryInterface>,
	relayer: Address,
	config: SubmitterConfig,
	counter: TransactionCounter,
	chain_id: ChainIdCache,
}

impl RelaySubmitter {
	pub fn new(
		delivery: Arc<dyn DeliveryInterface>,
		relayer: Address,
		config: SubmitterConfig,
	) -> Self {
		let chain_id = match config.chain_id {
			Some(id) => ChainIdCache::with_known(id),
			None => ChainIdCache::new(),
		};

		Self {
			delivery,
			relayer,
			config,
			counter: TransactionCounter::new(),
			chain_id,
		}
	}

	pub fn relayer(&self) -> Address {
		self.relayer
	}

	pub fn config(&self) -> &SubmitterConfig {
		&self.config
	}

	pub async fn chain_id(&self) -> Result<u64, DeliveryError> {
		self.chain_id
			.get(self.delivery.as_ref(), &self.config.retry)
			.await
	}

	/// Fails with [`DeliveryError::CallerNotAllowed`] when the verifier does
	/// not accept `caller`.
	pub async fn check_caller_allowed(&self, caller: Address) -> Result<(), DeliveryError> {
		let tx = self.read_call(encode_is_caller_allowed(caller)).await?;
		let data = retry_read("isCallerAllowed", &self.config.retry, || self.delivery.call(&tx))
			.await?;
		let allowed = decode_bool(&data).map_err(|e| DeliveryError::Decode(e.to_string()))?;

		if !allowed {
			warn!(%caller, "Caller rejected by verifier allowlist");
			return Err(DeliveryError::CallerNotAllowed(caller));
		}
		Ok(())
	}

	/// Whether the verifier has consumed `(from, space, nonce)`.
	pub async fn is_nonce_used(
		&self,
		from: Address,
		space: u32,
		nonce: U256,
	) -> Result<bool, DeliveryError> {
		let tx = self.read_call(encode_is_nonce_used(from, space, nonce)).await?;
		let data =
			retry_read("isNonceUsed", &self.config.retry, || self.delivery.call(&tx)).await?;
		decode_bool(&data).map_err(|e| DeliveryError::Decode(e.to_string()))
	}

	/// Sends `calldata` for `request` to the verifier.
	///
	/// Allowlist check and gas estimation happen before a counter is taken,
	/// so a rejected forward never consumes one. A supplied `gas_limit` is
	/// used as is and skips estimation, leaving rejection to the chain.
	pub async fn submit(
		&self,
		request: &ForwardRequest,
		calldata: Vec<u8>,
		assignment: CounterAssignment,
		gas_limit: Option<u64>,
	) -> Result<SubmittedTransaction, DeliveryError> {
		if self.config.schema.includes_caller() && self.config.check_allowlist {
			self.check_caller_allowed(request.caller.unwrap_or(self.relayer))
				.await?;
		}

		let chain_id = self.chain_id().await?;
		let mut tx = Transaction::call(self.config.verifier, calldata, request.value, chain_id);
		tx.from = Some(self.relayer);

		let gas_limit = match gas_limit {
			Some(limit) => limit,
			None => {
				let estimate = self.delivery.estimate_gas(&tx).await?;
				let limit = scale_gas(estimate, self.config.gas_limit_multiplier_percent);
				debug!(estimate, gas_limit = limit, "Estimated gas");
				limit
			}
		};
		tx.gas_limit = Some(gas_limit);

		let network_fees = self.delivery.fees(self.config.eip1559).await?;

		let mut state = self.counter.lock().await;
		let counter = match assignment {
			CounterAssignment::Next => match state.next() {
				Some(next) => next,
				None => {
					let pending = self
						.delivery
						.transaction_count(self.relayer, BlockTag::Pending)
						.await?;
					state.allocate(|| pending)
				}
			},
			CounterAssignment::Replace(counter) => counter,
		};

		let fees = match (assignment, state.in_flight(counter)) {
			(CounterAssignment::Replace(_), Some(previous)) => {
				let fees = self
					.config
					.replacement
					.replacement_fees(previous.fees, network_fees);
				info!(
					counter,
					replaces = %truncate_hash(&previous.hash.0),
					"Replacing pending transaction"
				);
				fees
			}
			(CounterAssignment::Replace(_), None) => {
				warn!(counter, "Replacing a counter with no known broadcast");
				network_fees
			}
			_ => network_fees,
		};
		apply_fees(&mut tx, fees);
		tx.nonce = Some(counter);

		match self.delivery.submit(tx.clone()).await {
			Ok(hash) => {
				state.record(counter, InFlight { hash, fees });
				info!(tx_hash = %truncate_hash(&hash.0), counter, "Relayed forward");
				Ok(SubmittedTransaction {
					hash,
					counter,
					transaction: tx,
				})
			}
			Err(e) => {
				state.invalidate();
				warn!(counter, "Broadcast failed: {}", e);
				Err(e)
			}
		}
	}

	/// Polls until `submitted` is confirmed, reverted or displaced.
	///
	/// Never replaces on its own; a timeout is returned to the caller, who
	/// may resubmit with [`CounterAssignment::Replace`].
	pub async fn wait_for_outcome(
		&self,
		submitted: &SubmittedTransaction,
		timeout: Duration,
	) -> Result<ExecutionOutcome, DeliveryError> {
		let start = Instant::now();
		let confirmations = self.config.confirmations.max(1);

		info!(
			tx_hash = %truncate_hash(&submitted.hash.0),
			counter = submitted.counter,
			"Waiting for {} confirmations (timeout: {}s)",
			confirmations,
			timeout.as_secs()
		);

		loop {
			if let Some(receipt) = self.delivery.get_receipt(&submitted.hash).await? {
				let head = self.delivery.block_number().await?;
				let depth = head.saturating_sub(receipt.block_number) + 1;
				if depth >= confirmations {
					// Everything up to our counter is mined now.
					self.counter.lock().await.prune_mined(submitted.counter + 1);
					let status = if receipt.success {
						ExecutionStatus::Confirmed
					} else {
						ExecutionStatus::Reverted
					};
					info!(
						tx_hash = %truncate_hash(&submitted.hash.0),
						block = receipt.block_number,
						?status,
						"Transaction included"
					);
					return Ok(ExecutionOutcome {
						status,
						hash: submitted.hash,
						counter: submitted.counter,
						receipt: Some(receipt),
						deployed_address: None,
					});
				}
				debug!(
					"Waiting for {} more confirmations...",
					confirmations.saturating_sub(depth)
				);
			} else {
				let mined = self
					.delivery
					.transaction_count(self.relayer, BlockTag::Latest)
					.await?;
				// The counter was consumed; recheck in case ours landed between the two reads.
				if mined > submitted.counter
					&& self.delivery.get_receipt(&submitted.hash).await?.is_none()
				{
					self.counter.lock().await.prune_mined(mined);
					info!(
						tx_hash = %truncate_hash(&submitted.hash.0),
						counter = submitted.counter,
						"Transaction superseded"
					);
					return Ok(ExecutionOutcome {
						status: ExecutionStatus::Superseded,
						hash: submitted.hash,
						counter: submitted.counter,
						receipt: None,
						deployed_address: None,
					});
				}
			}

			let waited = start.elapsed();
			if waited >= timeout {
				warn!(
					tx_hash = %truncate_hash(&submitted.hash.0),
					counter = submitted.counter,
					"Transaction still unconfirmed"
				);
				return Err(DeliveryError::UnconfirmedTimeout {
					hash: submitted.hash,
					counter: submitted.counter,
					waited,
				});
			}
			tokio::time::sleep(self.config.poll_interval.min(timeout - waited)).await;
		}
	}

	async fn read_call(&self, data: Vec<u8>) -> Result<Transaction, DeliveryError> {
		let chain_id = self.chain_id().await?;
		Ok(Transaction::call(self.config.verifier, data, U256::ZERO, chain_id))
	}
}

fn scale_gas(estimate: u64, multiplier_percent: u64) -> u64 {
	let scaled = u128::from(estimate) * u128::from(multiplier_percent.max(100)) / 100;
	u64::try_from(scaled).unwrap_or(u64::MAX)
}

fn apply_fees(tx: &mut Transaction, fees: FeeQuote) {
	match fees {
		FeeQuote::Legacy { gas_price } => {
			tx.gas_price = Some(gas_price);
			tx.max_fee_per_gas = None;
			tx.max_priority_fee_per_gas = None;
		}
		FeeQuote::Eip1559 {
			max_fee_per_gas,
			max_priority_fee_per_gas,
		} => {
			tx.gas_price = None;
			tx.max_fee_per_gas = Some(max_fee_per_gas);
			tx.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
		}
	}
}
