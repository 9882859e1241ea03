//! Configuration types for the relay.

use forwarder_types::{Address, ForwardDomain, ForwardSchema};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwarderConfig {
	/// Node connection
	pub network: NetworkConfig,
	/// Relayer account and submission tuning
	pub relayer: RelayerConfig,
	/// Verifier deployment
	pub forwarder: VerifierConfig,
	#[serde(default)]
	pub logging: LoggingConfig,
}

impl ForwarderConfig {
	/// Signing domain of the configured verifier on `chain_id`.
	pub fn domain(&self, chain_id: u64) -> ForwardDomain {
		ForwardDomain {
			name: self.forwarder.domain_name.clone(),
			version: self.forwarder.domain_version.clone(),
			chain_id,
			verifying_contract: self.forwarder.verifying_contract,
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// HTTP(S) JSON-RPC endpoint
	pub rpc_url: String,
	/// Expected chain id; resolved from the node when absent
	#[serde(default)]
	pub chain_id: Option<u64>,
	/// Price with EIP-1559 fees instead of a legacy gas price
	#[serde(default = "default_true")]
	pub eip1559: bool,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct RelayerConfig {
	/// Hex-encoded key of the account that pays for gas
	pub private_key: String,
	#[serde(default = "default_gas_limit_multiplier")]
	pub gas_limit_multiplier_percent: u64,
	#[serde(default = "default_fee_bump")]
	pub fee_bump_percent: u64,
	#[serde(default = "default_confirmations")]
	pub confirmations: u64,
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_confirmation_timeout_secs")]
	pub confirmation_timeout_secs: u64,
}

impl RelayerConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_secs(self.confirmation_timeout_secs)
	}
}

// Keeps the key out of logs.
impl fmt::Debug for RelayerConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RelayerConfig")
			.field("private_key", &"<redacted>")
			.field(
				"gas_limit_multiplier_percent",
				&self.gas_limit_multiplier_percent,
			)
			.field("fee_bump_percent", &self.fee_bump_percent)
			.field("confirmations", &self.confirmations)
			.field("poll_interval_ms", &self.poll_interval_ms)
			.field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
			.finish()
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
	pub verifying_contract: Address,
	#[serde(default = "default_domain_name")]
	pub domain_name: String,
	#[serde(default = "default_domain_version")]
	pub domain_version: String,
	/// Record layout the deployment verifies
	#[serde(default)]
	pub schema: ForwardSchema,
	/// Query the caller allowlist before submitting
	#[serde(default)]
	pub check_allowlist: bool,
	/// Validity window of requests built without an explicit deadline
	#[serde(default = "default_deadline_secs")]
	pub default_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
	#[serde(default = "default_log_level")]
	pub level: String,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: default_log_level(),
		}
	}
}

fn default_true() -> bool {
	true
}

fn default_gas_limit_multiplier() -> u64 {
	120
}

fn default_fee_bump() -> u64 {
	10
}

fn default_confirmations() -> u64 {
	1
}

fn default_poll_interval_ms() -> u64 {
	1000
}

fn default_confirmation_timeout_secs() -> u64 {
	120
}

fn default_domain_name() -> String {
	"Forwarder".to_string()
}

fn default_domain_version() -> String {
	"1".to_string()
}

fn default_deadline_secs() -> u64 {
	3600
}

fn default_log_level() -> String {
	"info".to_string()
}
