//! Configuration loading for the forwarder relay.
//!
//! Configuration is read from a TOML file, `${VAR}` references are replaced
//! from the environment, a handful of `FORWARDER_*` variables override file
//! values, and the result is validated before anything touches the network.

use forwarder_types::{Address, ForwardError, ForwardSchema};
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

mod types;

pub use types::*;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Configuration file not found: {0}")]
	FileNotFound(String),
	#[error("Parse error: {0}")]
	ParseError(String),
	#[error("Validation error: {0}")]
	ValidationError(String),
	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

impl From<ConfigError> for ForwardError {
	fn from(err: ConfigError) -> Self {
		ForwardError::Config(err.to_string())
	}
}

/// Configuration loader
pub struct ConfigLoader {
	file_path: Option<PathBuf>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "FORWARDER_".to_string(),
		}
	}

	pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
		self.file_path = Some(path.into());
		self
	}

	pub fn with_env_prefix(mut self, prefix: &str) -> Self {
		self.env_prefix = prefix.to_string();
		self
	}

	pub async fn load(&self) -> Result<ForwarderConfig, ConfigError> {
		let path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;

		if !path.exists() {
			return Err(ConfigError::FileNotFound(path.display().to_string()));
		}

		debug!(path = %path.display(), "Loading configuration");
		let content = tokio::fs::read_to_string(path).await?;
		self.parse(&content)
	}

	/// Parses configuration text through the same pipeline as [`load`](Self::load).
	pub fn parse(&self, content: &str) -> Result<ForwarderConfig, ConfigError> {
		let content = self.substitute_env_vars(content)?;

		let mut config: ForwarderConfig =
			toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let re = Regex::new(r"\$\{([^}]+)\}")
			.map_err(|e| ConfigError::ParseError(format!("Invalid substitution pattern: {}", e)))?;

		let mut result = content.to_string();
		for cap in re.captures_iter(content) {
			let var_name = &cap[1];
			let value = std::env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
			result = result.replace(&cap[0], &value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut ForwarderConfig) -> Result<(), ConfigError> {
		if let Some(level) = self.env_var("LOG_LEVEL") {
			config.logging.level = level;
		}

		if let Some(rpc_url) = self.env_var("RPC_URL") {
			config.network.rpc_url = rpc_url;
		}

		if let Some(chain_id) = self.env_var("CHAIN_ID") {
			let chain_id = chain_id.parse::<u64>().map_err(|e| {
				ConfigError::ParseError(format!("{}CHAIN_ID: {}", self.env_prefix, e))
			})?;
			config.network.chain_id = Some(chain_id);
		}

		if let Some(key) = self.env_var("RELAYER_PRIVATE_KEY") {
			config.relayer.private_key = key;
		}

		Ok(())
	}

	fn env_var(&self, name: &str) -> Option<String> {
		std::env::var(format!("{}{}", self.env_prefix, name)).ok()
	}
}

/// Checks a parsed configuration for values that would fail at runtime.
pub fn validate_config(config: &ForwarderConfig) -> Result<(), ConfigError> {
	let network = &config.network;
	if !(network.rpc_url.starts_with("http://") || network.rpc_url.starts_with("https://")) {
		return Err(ConfigError::ValidationError(format!(
			"network.rpc_url must be an http(s) URL, got '{}'",
			network.rpc_url
		)));
	}
	if network.chain_id == Some(0) {
		return Err(ConfigError::ValidationError(
			"network.chain_id cannot be 0".to_string(),
		));
	}

	let relayer = &config.relayer;
	if !is_private_key(&relayer.private_key) {
		return Err(ConfigError::ValidationError(
			"relayer.private_key must be 32 hex-encoded bytes".to_string(),
		));
	}
	if relayer.gas_limit_multiplier_percent < 100 {
		return Err(ConfigError::ValidationError(format!(
			"relayer.gas_limit_multiplier_percent must be at least 100, got {}",
			relayer.gas_limit_multiplier_percent
		)));
	}
	if relayer.confirmations == 0 {
		return Err(ConfigError::ValidationError(
			"relayer.confirmations must be at least 1".to_string(),
		));
	}
	if relayer.poll_interval_ms == 0 || relayer.confirmation_timeout_secs == 0 {
		return Err(ConfigError::ValidationError(
			"relayer poll interval and confirmation timeout must be positive".to_string(),
		));
	}

	let forwarder = &config.forwarder;
	if forwarder.verifying_contract == Address::ZERO {
		return Err(ConfigError::ValidationError(
			"forwarder.verifying_contract cannot be the zero address".to_string(),
		));
	}
	if forwarder.domain_name.is_empty() || forwarder.domain_version.is_empty() {
		return Err(ConfigError::ValidationError(
			"forwarder domain name and version cannot be empty".to_string(),
		));
	}
	if forwarder.check_allowlist && forwarder.schema != ForwardSchema::WithCaller {
		return Err(ConfigError::ValidationError(
			"forwarder.check_allowlist requires schema = \"with_caller\"".to_string(),
		));
	}
	if forwarder.default_deadline_secs == 0 {
		return Err(ConfigError::ValidationError(
			"forwarder.default_deadline_secs must be positive".to_string(),
		));
	}

	Ok(())
}

fn is_private_key(value: &str) -> bool {
	let hex = value.strip_prefix("0x").unwrap_or(value);
	hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())
}
