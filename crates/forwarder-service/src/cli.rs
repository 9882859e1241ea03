//! Command-line interface definitions.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use forwarder_core::RelayOptions;
use forwarder_request::{parse_address, parse_hex_payload, ForwardParams};
use forwarder_types::{Address, U256};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "forwarder-relay")]
#[command(about = "Relays signed meta-transactions through a forwarder contract", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
	/// Path to configuration file
	#[arg(short, long, value_name = "FILE", default_value = "config/forwarder.toml")]
	pub config: PathBuf,

	/// Log level override (trace, debug, info, warn, error)
	#[arg(short, long, env = "FORWARDER_LOG_LEVEL")]
	pub log_level: Option<String>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Relay a contract call
	Call {
		/// Target contract
		#[arg(long)]
		to: String,

		/// Hex-encoded calldata
		#[arg(long)]
		data: String,

		#[command(flatten)]
		forward: ForwardArgs,
	},

	/// Relay a contract deployment
	Deploy {
		/// Hex-encoded creation bytecode
		#[arg(long)]
		bytecode: String,

		#[command(flatten)]
		forward: ForwardArgs,
	},

	/// Ask the verifier whether a nonce was consumed
	NonceUsed {
		#[arg(long)]
		from: String,

		#[arg(long, default_value_t = 0)]
		space: u32,

		#[arg(long)]
		nonce: String,
	},

	/// Validate the configuration file
	Validate,
}

/// Options shared by every relayed forward.
#[derive(Args, Debug)]
pub struct ForwardArgs {
	/// Key of the signing principal (local testing only)
	#[arg(long, env = "FORWARDER_USER_KEY", hide_env_values = true)]
	pub user_key: String,

	/// Nonce space
	#[arg(long)]
	pub space: Option<u32>,

	/// Explicit nonce; generated when absent
	#[arg(long)]
	pub nonce: Option<String>,

	/// Wei forwarded with the call
	#[arg(long)]
	pub value: Option<String>,

	/// Validity window in seconds
	#[arg(long)]
	pub deadline_secs: Option<u64>,

	/// Gas limit of the relayer transaction; estimated when absent
	#[arg(long)]
	pub gas_limit: Option<u64>,

	/// Confirmation wait in seconds, overriding the configured timeout
	#[arg(long)]
	pub timeout_secs: Option<u64>,
}

impl ForwardArgs {
	/// Applies the optional fields to `params`.
	pub fn apply(&self, mut params: ForwardParams) -> Result<ForwardParams> {
		if let Some(space) = self.space {
			params = params.with_space(space);
		}
		if let Some(nonce) = &self.nonce {
			params = params.with_nonce(parse_u256("nonce", nonce)?);
		}
		if let Some(value) = &self.value {
			params = params.with_value(parse_u256("value", value)?);
		}
		if let Some(secs) = self.deadline_secs {
			params = params.with_deadline_secs(secs);
		}
		Ok(params)
	}

	pub fn relay_options(&self) -> RelayOptions {
		RelayOptions {
			gas_limit: self.gas_limit,
			..RelayOptions::default()
		}
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.timeout_secs.map(Duration::from_secs)
	}
}

/// Parses a decimal or `0x`-prefixed integer.
pub fn parse_u256(field: &str, value: &str) -> Result<U256> {
	value
		.parse::<U256>()
		.with_context(|| format!("Invalid {}: {}", field, value))
}

pub fn parse_target(field: &str, value: &str) -> Result<Address> {
	Ok(parse_address(field, value)?)
}

pub fn parse_payload(value: &str) -> Result<Vec<u8>> {
	Ok(parse_hex_payload(value)?)
}
