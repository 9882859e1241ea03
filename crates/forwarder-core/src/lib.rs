//! The forward pipeline.
//!
//! [`ForwarderEngine`] takes a forward from caller parameters to an
//! on-chain outcome: build, sign, encode, relay, wait, extract. Each step is
//! exposed on its own so callers can hold a signed forward, replace a stuck
//! relay or wait with their own bound.

use forwarder_account::ForwardSigner;
use forwarder_delivery::{CounterAssignment, RelaySubmitter, SubmittedTransaction};
use forwarder_outcome::OutcomeExtractor;
use forwarder_request::{ForwardBuilder, ForwardEncoder, ForwardParams, NonceRegistry};
use forwarder_types::{
	truncate_hash, Address, Bytes, ExecutionOutcome, ForwardDomain, ForwardError, ForwardRequest,
	ForwardSchema, Signature, SubmissionState, TransactionHash, U256,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod builder;

pub use builder::{submitter_config, ForwarderBuilder};

/// A signed forward with its `execute` calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedForward {
	pub request: ForwardRequest,
	pub payload: Bytes,
	pub signature: Signature,
	/// Domain the signature was made under.
	pub domain: ForwardDomain,
	pub calldata: Vec<u8>,
}

impl PreparedForward {
	pub fn is_deployment(&self) -> bool {
		self.request.is_deployment()
	}
}

/// Per-relay choices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOptions {
	pub assignment: CounterAssignment,
	/// Gas limit to send with; estimated from the node when absent.
	pub gas_limit: Option<u64>,
}

impl RelayOptions {
	/// Displaces the pending transaction at `counter`.
	pub fn replace(counter: u64) -> Self {
		Self {
			assignment: CounterAssignment::Replace(counter),
			..Self::default()
		}
	}

	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = Some(gas_limit);
		self
	}
}

/// A forward whose relayer transaction has been broadcast.
#[derive(Debug, Clone)]
pub struct SubmittedForward {
	pub prepared: PreparedForward,
	pub transaction: SubmittedTransaction,
}

impl SubmittedForward {
	pub fn hash(&self) -> TransactionHash {
		self.transaction.hash
	}

	/// Relayer counter, for a later [`RelayOptions::replace`].
	pub fn counter(&self) -> u64 {
		self.transaction.counter
	}
}

/// Relays forwards signed by one principal through one relayer account.
pub struct ForwarderEngine {
	builder: ForwardBuilder,
	signer: ForwardSigner,
	encoder: ForwardEncoder,
	submitter: RelaySubmitter,
	extractor: OutcomeExtractor,
	registry: Arc<NonceRegistry>,
	domain_name: String,
	domain_version: String,
	confirmation_timeout: Duration,
}

impl ForwarderEngine {
	pub fn relayer(&self) -> Address {
		self.submitter.relayer()
	}

	pub fn verifier(&self) -> Address {
		self.submitter.config().verifier
	}

	pub fn schema(&self) -> ForwardSchema {
		self.encoder.schema()
	}

	/// Bound used by [`forward`](Self::forward).
	pub fn confirmation_timeout(&self) -> Duration {
		self.confirmation_timeout
	}

	pub fn registry(&self) -> &Arc<NonceRegistry> {
		&self.registry
	}

	/// Signing domain of the verifier on the connected chain.
	pub async fn domain(&self) -> Result<ForwardDomain, ForwardError> {
		let chain_id = self.submitter.chain_id().await?;
		Ok(ForwardDomain {
			name: self.domain_name.clone(),
			version: self.domain_version.clone(),
			chain_id,
			verifying_contract: self.verifier(),
		})
	}

	/// Builds, signs and encodes a forward without touching the relayer account.
	///
	/// Under the caller-bound schema a missing `caller` defaults to the
	/// relayer, the only account that will send the forward.
	pub async fn prepare(&self, mut params: ForwardParams) -> Result<PreparedForward, ForwardError> {
		if self.schema().includes_caller() && params.caller.is_none() {
			params.caller = Some(self.relayer());
		}

		let built = self.builder.build(params)?;
		let request = built.request().clone();
		transition(&request, SubmissionState::Built);

		let domain = match self.domain().await {
			Ok(domain) => domain,
			Err(e) => {
				self.registry.release(&request);
				return Err(e);
			}
		};

		let signature = match self.signer.sign(&request, &domain, self.schema()).await {
			Ok(signature) => signature,
			Err(e) => {
				self.registry.release(&request);
				return Err(e.into());
			}
		};
		transition(&request, SubmissionState::Signed);

		let calldata = match self
			.encoder
			.encode_execute(&request, built.payload(), &signature)
		{
			Ok(calldata) => calldata,
			Err(e) => {
				self.registry.release(&request);
				return Err(e.into());
			}
		};
		transition(&request, SubmissionState::Encoded);

		Ok(PreparedForward {
			request,
			payload: built.payload().clone(),
			signature,
			domain,
			calldata,
		})
	}

	/// Broadcasts a prepared forward from the relayer account.
	pub async fn relay(
		&self,
		prepared: PreparedForward,
		options: RelayOptions,
	) -> Result<SubmittedForward, ForwardError> {
		let transaction = self
			.submitter
			.submit(
				&prepared.request,
				prepared.calldata.clone(),
				options.assignment,
				options.gas_limit,
			)
			.await?;

		info!(
			from = %prepared.request.from,
			nonce = %prepared.request.nonce,
			tx_hash = %truncate_hash(&transaction.hash.0),
			counter = transaction.counter,
			"Forward {}",
			SubmissionState::Submitted
		);

		Ok(SubmittedForward {
			prepared,
			transaction,
		})
	}

	/// Waits up to `timeout` for the relayed transaction to settle.
	///
	/// Confirmed deployments carry the address reported by the verifier.
	pub async fn await_outcome(
		&self,
		submitted: &SubmittedForward,
		timeout: Duration,
	) -> Result<ExecutionOutcome, ForwardError> {
		let outcome = self
			.submitter
			.wait_for_outcome(&submitted.transaction, timeout)
			.await?;

		let request = &submitted.prepared.request;
		let outcome = if request.is_deployment() {
			let outcome = self.extractor.enrich(outcome);
			if outcome.is_confirmed() && outcome.deployed_address.is_none() {
				warn!(
					tx_hash = %truncate_hash(&outcome.hash.0),
					"Deployment confirmed without a Deployed event"
				);
			}
			outcome
		} else {
			outcome
		};

		transition(request, outcome.status.into());
		Ok(outcome)
	}

	/// Prepares, relays and waits with the configured confirmation timeout.
	pub async fn forward(
		&self,
		params: ForwardParams,
		options: RelayOptions,
	) -> Result<ExecutionOutcome, ForwardError> {
		let prepared = self.prepare(params).await?;
		let submitted = self.relay(prepared, options).await?;
		self.await_outcome(&submitted, self.confirmation_timeout)
			.await
	}

	/// Whether the verifier has consumed `(from, space, nonce)`.
	pub async fn is_nonce_used(
		&self,
		from: Address,
		space: u32,
		nonce: U256,
	) -> Result<bool, ForwardError> {
		Ok(self.submitter.is_nonce_used(from, space, nonce).await?)
	}
}

fn transition(request: &ForwardRequest, state: SubmissionState) {
	info!(
		from = %request.from,
		space = request.space,
		nonce = %request.nonce,
		"Forward {}",
		state
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use forwarder_account::{verify_signature, AccountInterface, LocalWallet};
	use forwarder_config::{
		ForwarderConfig, LoggingConfig, NetworkConfig, RelayerConfig, VerifierConfig,
	};
	use forwarder_delivery::testing::{encode_store, MockChain};
	use forwarder_outcome::expected_create_address;
	use forwarder_types::{current_timestamp, ExecutionStatus};

	const RELAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const USER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

	fn config(chain: &MockChain, schema: ForwardSchema, check_allowlist: bool) -> ForwarderConfig {
		ForwarderConfig {
			network: NetworkConfig {
				rpc_url: "http://localhost:8545".to_string(),
				chain_id: None,
				eip1559: true,
			},
			relayer: RelayerConfig {
				private_key: RELAYER_KEY.to_string(),
				gas_limit_multiplier_percent: 120,
				fee_bump_percent: 10,
				confirmations: 1,
				poll_interval_ms: 10,
				confirmation_timeout_secs: 5,
			},
			forwarder: VerifierConfig {
				verifying_contract: chain.verifier(),
				domain_name: "Forwarder".to_string(),
				domain_version: "1".to_string(),
				schema,
				check_allowlist,
				default_deadline_secs: 3600,
			},
			logging: LoggingConfig::default(),
		}
	}

	async fn engine_with(chain: Arc<MockChain>, config: ForwarderConfig) -> (ForwarderEngine, Address) {
		let wallet = LocalWallet::new(USER_KEY).unwrap();
		let user = wallet.address().await.unwrap();

		let engine = ForwarderBuilder::new(config)
			.with_account(Arc::new(wallet))
			.with_delivery(chain, MockChain::RELAYER)
			.build()
			.unwrap();
		(engine, user)
	}

	async fn engine(chain: Arc<MockChain>) -> (ForwarderEngine, Address) {
		let config = config(&chain, ForwardSchema::Plain, false);
		engine_with(chain, config).await
	}

	#[tokio::test]
	async fn test_store_value() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let (engine, user) = engine(chain.clone()).await;
		let target = chain.storage_contract();

		let params = ForwardParams::call(user, target, encode_store(U256::from(42u64)))
			.with_nonce(U256::from(1u64));
		let outcome = engine.forward(params, RelayOptions::default()).await.unwrap();

		assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		assert_eq!(outcome.deployed_address, None);
		assert_eq!(chain.stored_value(target), Some(U256::from(42u64)));
		assert!(engine.is_nonce_used(user, 0, U256::from(1u64)).await.unwrap());
		assert!(!engine.is_nonce_used(user, 0, U256::from(2u64)).await.unwrap());
	}

	#[tokio::test]
	async fn test_explicit_gas_limit_is_sent_unchanged() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let (engine, user) = engine(chain.clone()).await;
		let target = chain.storage_contract();

		let prepared = engine
			.prepare(ForwardParams::call(user, target, encode_store(U256::from(11u64))))
			.await
			.unwrap();
		let submitted = engine
			.relay(prepared, RelayOptions::default().with_gas_limit(300_000))
			.await
			.unwrap();
		assert_eq!(submitted.transaction.transaction.gas_limit, Some(300_000));
		assert_eq!(chain.gas_estimates(), 0);

		let outcome = engine
			.await_outcome(&submitted, Duration::from_secs(1))
			.await
			.unwrap();
		assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		assert_eq!(chain.stored_value(target), Some(U256::from(11u64)));
	}

	#[tokio::test]
	async fn test_invalid_input_reported_before_network_access() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, user) = engine(chain.clone()).await;
		chain.fail_next_reads(u32::MAX);

		let err = engine
			.prepare(ForwardParams::call(user, chain.storage_contract(), Vec::new()))
			.await
			.unwrap_err();

		assert!(matches!(err, ForwardError::InvalidArgument(_)));
		assert!(engine.registry().is_empty());
	}

	#[tokio::test]
	async fn test_prepared_forward_is_verifiable() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, user) = engine(chain.clone()).await;

		let prepared = engine
			.prepare(ForwardParams::call(
				user,
				chain.storage_contract(),
				encode_store(U256::from(1u64)),
			))
			.await
			.unwrap();

		assert_eq!(prepared.domain.chain_id, 31337);
		assert_eq!(prepared.domain.verifying_contract, chain.verifier());
		assert!(verify_signature(
			&prepared.request,
			&prepared.domain,
			ForwardSchema::Plain,
			&prepared.signature
		));
		assert!(engine.registry().contains(user, 0, prepared.request.nonce));
		// Nothing was sent.
		assert_eq!(chain.submissions(), 0);
	}

	#[tokio::test]
	async fn test_deploy_then_call_deployed_contract() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let (engine, user) = engine(chain.clone()).await;

		let expected = chain.next_deployment_address();
		assert_eq!(
			expected,
			expected_create_address(chain.verifier(), chain.verifier_nonce())
		);

		let bytecode = vec![0x60, 0x80, 0x60, 0x40, 0x52];
		let outcome = engine
			.forward(ForwardParams::deploy(user, bytecode.clone()), RelayOptions::default())
			.await
			.unwrap();

		assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		assert_eq!(outcome.deployed_address, Some(expected));
		assert_eq!(chain.code_at(expected), Some(Bytes::from(bytecode)));

		let outcome = engine
			.forward(
				ForwardParams::call(user, expected, encode_store(U256::from(7u64))),
				RelayOptions::default(),
			)
			.await
			.unwrap();
		assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		assert_eq!(chain.stored_value(expected), Some(U256::from(7u64)));
	}

	#[tokio::test]
	async fn test_replacement_stores_later_value() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, user) = engine(chain.clone()).await;
		let target = chain.storage_contract();

		let first = engine
			.prepare(ForwardParams::call(user, target, encode_store(U256::from(1u64))))
			.await
			.unwrap();
		let first = engine.relay(first, RelayOptions::default()).await.unwrap();

		let second = engine
			.prepare(ForwardParams::call(user, target, encode_store(U256::from(2u64))))
			.await
			.unwrap();
		let second = engine
			.relay(second, RelayOptions::replace(first.counter()))
			.await
			.unwrap();

		assert_eq!(first.counter(), second.counter());
		assert_ne!(first.hash(), second.hash());
		chain.mine();

		let timeout = Duration::from_secs(2);
		let replaced = engine.await_outcome(&first, timeout).await.unwrap();
		let winner = engine.await_outcome(&second, timeout).await.unwrap();

		assert_eq!(replaced.status, ExecutionStatus::Superseded);
		assert!(replaced.receipt.is_none());
		assert_eq!(winner.status, ExecutionStatus::Confirmed);
		assert_eq!(chain.stored_value(target), Some(U256::from(2u64)));
	}

	#[tokio::test]
	async fn test_zero_bump_replacement_on_permissive_node() {
		let chain = Arc::new(MockChain::builder().required_bump_percent(0).build());
		let mut config = config(&chain, ForwardSchema::Plain, false);
		config.relayer.fee_bump_percent = 0;
		let (engine, user) = engine_with(chain.clone(), config).await;
		let target = chain.storage_contract();

		let first = engine
			.prepare(ForwardParams::call(user, target, encode_store(U256::from(1u64))))
			.await
			.unwrap();
		let first = engine.relay(first, RelayOptions::default()).await.unwrap();
		let second = engine
			.prepare(ForwardParams::call(user, target, encode_store(U256::from(2u64))))
			.await
			.unwrap();
		let second = engine
			.relay(second, RelayOptions::replace(first.counter()))
			.await
			.unwrap();

		assert_eq!(
			first.transaction.transaction.effective_fee(),
			second.transaction.transaction.effective_fee()
		);
		chain.mine();

		// Only the receipts tell which broadcast won.
		let timeout = Duration::from_secs(2);
		let outcomes = [
			engine.await_outcome(&first, timeout).await.unwrap().status,
			engine.await_outcome(&second, timeout).await.unwrap().status,
		];
		assert_eq!(outcomes, [ExecutionStatus::Superseded, ExecutionStatus::Confirmed]);
		assert_eq!(chain.stored_value(target), Some(U256::from(2u64)));
	}

	#[tokio::test]
	async fn test_past_deadline_is_built_but_rejected() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let (engine, user) = engine(chain.clone()).await;

		let params = ForwardParams::call(
			user,
			chain.storage_contract(),
			encode_store(U256::from(3u64)),
		)
		.with_deadline(current_timestamp() - 10);

		let prepared = engine.prepare(params).await.unwrap();
		let err = engine
			.relay(prepared, RelayOptions::default())
			.await
			.unwrap_err();

		match err {
			ForwardError::Estimation { reason, .. } => assert!(reason.contains("expired")),
			other => panic!("unexpected error: {other:?}"),
		}
		assert_eq!(chain.submissions(), 0);
	}

	#[tokio::test]
	async fn test_double_submission_rejected_by_verifier() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let (engine, user) = engine(chain.clone()).await;

		let params = ForwardParams::call(
			user,
			chain.storage_contract(),
			encode_store(U256::from(5u64)),
		)
		.with_nonce(U256::from(7u64))
		.with_deadline(current_timestamp() + 600);

		let outcome = engine
			.forward(params.clone(), RelayOptions::default())
			.await
			.unwrap();
		assert_eq!(outcome.status, ExecutionStatus::Confirmed);

		// Rebuilding the identical request passes the local registry.
		let err = engine
			.forward(params, RelayOptions::default())
			.await
			.unwrap_err();
		match err {
			ForwardError::Estimation { reason, .. } => assert!(reason.contains("nonce used")),
			other => panic!("unexpected error: {other:?}"),
		}
		assert_eq!(chain.submissions(), 1);
	}

	#[tokio::test]
	async fn test_distinct_nonces_are_independent() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let (engine, user) = engine(chain.clone()).await;
		let target = chain.storage_contract();

		for (nonce, value) in [(10u64, 1u64), (11, 2)] {
			let params = ForwardParams::call(user, target, encode_store(U256::from(value)))
				.with_nonce(U256::from(nonce));
			let outcome = engine.forward(params, RelayOptions::default()).await.unwrap();
			assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		}
		assert_eq!(chain.stored_value(target), Some(U256::from(2u64)));
	}

	#[tokio::test]
	async fn test_registry_rejects_nonce_reuse_for_other_payload() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, user) = engine(chain.clone()).await;
		let target = chain.storage_contract();

		engine
			.prepare(
				ForwardParams::call(user, target, encode_store(U256::from(1u64)))
					.with_nonce(U256::from(9u64)),
			)
			.await
			.unwrap();

		let err = engine
			.prepare(
				ForwardParams::call(user, target, encode_store(U256::from(2u64)))
					.with_nonce(U256::from(9u64)),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, ForwardError::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn test_signer_mismatch_releases_nonce() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, _) = engine(chain.clone()).await;

		let err = engine
			.prepare(ForwardParams::call(
				Address::repeat_byte(0x99),
				chain.storage_contract(),
				encode_store(U256::from(1u64)),
			))
			.await
			.unwrap_err();

		assert!(matches!(err, ForwardError::Signing(_)));
		assert!(engine.registry().is_empty());
	}

	#[tokio::test]
	async fn test_allowlist_rejection_spends_nothing() {
		let chain = Arc::new(MockChain::builder().auto_mine(true).build());
		let config = config(&chain, ForwardSchema::WithCaller, true);
		let (engine, user) = engine_with(chain.clone(), config).await;

		let params = ForwardParams::call(
			user,
			chain.storage_contract(),
			encode_store(U256::from(1u64)),
		);
		let err = engine
			.forward(params, RelayOptions::default())
			.await
			.unwrap_err();

		assert!(matches!(err, ForwardError::CallerNotAllowed(caller) if caller == MockChain::RELAYER));
		assert_eq!(chain.submissions(), 0);
	}

	#[tokio::test]
	async fn test_caller_bound_forward_defaults_caller_to_relayer() {
		let chain = Arc::new(
			MockChain::builder()
				.auto_mine(true)
				.allow_caller(MockChain::RELAYER)
				.build(),
		);
		let config = config(&chain, ForwardSchema::WithCaller, true);
		let (engine, user) = engine_with(chain.clone(), config).await;
		let target = chain.storage_contract();

		let prepared = engine
			.prepare(ForwardParams::call(user, target, encode_store(U256::from(8u64))))
			.await
			.unwrap();
		assert_eq!(prepared.request.caller, Some(MockChain::RELAYER));

		let submitted = engine
			.relay(prepared, RelayOptions::default())
			.await
			.unwrap();
		let outcome = engine
			.await_outcome(&submitted, engine.confirmation_timeout())
			.await
			.unwrap();

		assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		assert_eq!(chain.stored_value(target), Some(U256::from(8u64)));
	}

	#[tokio::test]
	async fn test_unmined_forward_times_out() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, user) = engine(chain.clone()).await;

		let prepared = engine
			.prepare(ForwardParams::call(
				user,
				chain.storage_contract(),
				encode_store(U256::from(1u64)),
			))
			.await
			.unwrap();
		let submitted = engine
			.relay(prepared, RelayOptions::default())
			.await
			.unwrap();

		let err = engine
			.await_outcome(&submitted, Duration::from_millis(50))
			.await
			.unwrap_err();
		assert!(matches!(err, ForwardError::UnconfirmedTimeout { counter: 0, .. }));
	}

	#[tokio::test]
	async fn test_concurrent_forwards_take_distinct_counters() {
		let chain = Arc::new(MockChain::builder().build());
		let (engine, user) = engine(chain.clone()).await;
		let target = chain.storage_contract();

		let relays = (1..=4u64).map(|value| {
			let engine = &engine;
			async move {
				let prepared = engine
					.prepare(ForwardParams::call(user, target, encode_store(U256::from(value))))
					.await?;
				engine.relay(prepared, RelayOptions::default()).await
			}
		});
		let submitted: Vec<SubmittedForward> = futures::future::join_all(relays)
			.await
			.into_iter()
			.collect::<Result<_, _>>()
			.unwrap();

		let mut counters: Vec<u64> = submitted.iter().map(|s| s.counter()).collect();
		counters.sort_unstable();
		assert_eq!(counters, vec![0, 1, 2, 3]);

		chain.mine();
		for forward in &submitted {
			let outcome = engine
				.await_outcome(forward, Duration::from_secs(2))
				.await
				.unwrap();
			assert_eq!(outcome.status, ExecutionStatus::Confirmed);
		}
		assert_eq!(chain.transaction_count_value(MockChain::RELAYER), 4);
	}

	#[tokio::test]
	async fn test_build_requires_seams_and_valid_config() {
		let chain = Arc::new(MockChain::builder().build());
		let result = ForwarderBuilder::new(config(&chain, ForwardSchema::Plain, false)).build();
		assert!(matches!(result, Err(ForwardError::Config(_))));

		// Allowlist checks need the caller-bound schema.
		let invalid = config(&chain, ForwardSchema::Plain, true);
		let result = ForwarderBuilder::new(invalid)
			.with_account(Arc::new(LocalWallet::new(USER_KEY).unwrap()))
			.with_delivery(chain, MockChain::RELAYER)
			.build();
		assert!(matches!(result, Err(ForwardError::Config(_))));
	}
}
