use crate::ForwarderEngine;
use forwarder_account::{AccountInterface, ForwardSigner};
use forwarder_config::{validate_config, ForwarderConfig};
use forwarder_delivery::{DeliveryInterface, RelaySubmitter, ReplacementPolicy, SubmitterConfig};
use forwarder_outcome::OutcomeExtractor;
use forwarder_request::{ForwardBuilder, ForwardEncoder, NonceRegistry, NonceSource};
use forwarder_types::{Address, ForwardError};
use std::sync::Arc;
use tracing::info;

/// Submitter settings derived from the relay configuration.
pub fn submitter_config(config: &ForwarderConfig) -> SubmitterConfig {
	let forwarder = &config.forwarder;
	let relayer = &config.relayer;

	SubmitterConfig {
		check_allowlist: forwarder.check_allowlist,
		eip1559: config.network.eip1559,
		gas_limit_multiplier_percent: relayer.gas_limit_multiplier_percent,
		replacement: ReplacementPolicy {
			fee_bump_percent: relayer.fee_bump_percent,
		},
		confirmations: relayer.confirmations,
		poll_interval: relayer.poll_interval(),
		chain_id: config.network.chain_id,
		..SubmitterConfig::new(forwarder.verifying_contract, forwarder.schema)
	}
}

/// Assembles a [`ForwarderEngine`] from configuration and its two seams.
pub struct ForwarderBuilder {
	config: ForwarderConfig,
	account: Option<Arc<dyn AccountInterface>>,
	delivery: Option<(Arc<dyn DeliveryInterface>, Address)>,
	nonce_source: NonceSource,
	registry: Option<Arc<NonceRegistry>>,
}

impl ForwarderBuilder {
	pub fn new(config: ForwarderConfig) -> Self {
		Self {
			config,
			account: None,
			delivery: None,
			nonce_source: NonceSource::default(),
			registry: None,
		}
	}

	/// Principal that signs forwards.
	pub fn with_account(mut self, account: Arc<dyn AccountInterface>) -> Self {
		self.account = Some(account);
		self
	}

	/// Network access for the relayer account `relayer`.
	pub fn with_delivery(mut self, delivery: Arc<dyn DeliveryInterface>, relayer: Address) -> Self {
		self.delivery = Some((delivery, relayer));
		self
	}

	pub fn with_nonce_source(mut self, source: NonceSource) -> Self {
		self.nonce_source = source;
		self
	}

	/// Shares a nonce registry between engines of the same process.
	pub fn with_registry(mut self, registry: Arc<NonceRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	pub fn build(self) -> Result<ForwarderEngine, ForwardError> {
		validate_config(&self.config)?;

		let account = self
			.account
			.ok_or_else(|| ForwardError::Config("Account not provided".into()))?;
		let (delivery, relayer) = self
			.delivery
			.ok_or_else(|| ForwardError::Config("Delivery not provided".into()))?;

		let registry = self
			.registry
			.unwrap_or_else(|| Arc::new(NonceRegistry::new()));
		let forwarder = &self.config.forwarder;

		let builder = ForwardBuilder::new()
			.with_nonce_source(self.nonce_source)
			.with_default_deadline_secs(forwarder.default_deadline_secs)
			.with_registry(registry.clone());

		let submitter = RelaySubmitter::new(delivery, relayer, submitter_config(&self.config));

		info!(
			verifier = %forwarder.verifying_contract,
			schema = %forwarder.schema,
			%relayer,
			"Forwarder engine configured"
		);

		Ok(ForwarderEngine {
			builder,
			signer: ForwardSigner::new(account),
			encoder: ForwardEncoder::new(forwarder.schema),
			submitter,
			extractor: OutcomeExtractor::for_verifier(forwarder.verifying_contract),
			registry,
			domain_name: forwarder.domain_name.clone(),
			domain_version: forwarder.domain_version.clone(),
			confirmation_timeout: self.config.relayer.confirmation_timeout(),
		})
	}
}
