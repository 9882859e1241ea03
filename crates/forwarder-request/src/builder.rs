//! Construction of hashed forward requests.

use crate::nonce::{generate_nonce, NonceRegistry, NonceSource};
use crate::RequestError;
use alloy::primitives::keccak256;
use forwarder_types::{current_timestamp, Address, Bytes, ForwardRequest, U256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default validity window when neither a deadline nor a window is given.
pub const DEFAULT_DEADLINE_SECS: u64 = 3600;

/// Caller-supplied parameters of one forward.
#[derive(Debug, Clone, Default)]
pub struct ForwardParams {
	pub from: Address,
	/// Target contract; the zero address deploys `payload` as bytecode.
	pub to: Address,
	pub value: Option<U256>,
	pub space: Option<u32>,
	pub nonce: Option<U256>,
	/// Absolute deadline, takes precedence over `deadline_secs`.
	pub deadline: Option<u64>,
	/// Validity window relative to now.
	pub deadline_secs: Option<u64>,
	pub caller: Option<Address>,
	/// Calldata or deployment bytecode.
	pub payload: Vec<u8>,
}

impl ForwardParams {
	pub fn call(from: Address, to: Address, payload: Vec<u8>) -> Self {
		Self {
			from,
			to,
			payload,
			..Default::default()
		}
	}

	pub fn deploy(from: Address, bytecode: Vec<u8>) -> Self {
		Self::call(from, Address::ZERO, bytecode)
	}

	pub fn with_nonce(mut self, nonce: U256) -> Self {
		self.nonce = Some(nonce);
		self
	}

	pub fn with_space(mut self, space: u32) -> Self {
		self.space = Some(space);
		self
	}

	pub fn with_value(mut self, value: U256) -> Self {
		self.value = Some(value);
		self
	}

	pub fn with_deadline(mut self, deadline: u64) -> Self {
		self.deadline = Some(deadline);
		self
	}

	pub fn with_deadline_secs(mut self, secs: u64) -> Self {
		self.deadline_secs = Some(secs);
		self
	}

	pub fn with_caller(mut self, caller: Address) -> Self {
		self.caller = Some(caller);
		self
	}
}

/// A request together with the exact payload its `data_hash` commits to.
///
/// Only [`ForwardBuilder`] creates these, and the payload cannot be replaced
/// afterwards, so the hash always matches what gets encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltForward {
	request: ForwardRequest,
	payload: Bytes,
}

impl BuiltForward {
	pub fn request(&self) -> &ForwardRequest {
		&self.request
	}

	pub fn payload(&self) -> &Bytes {
		&self.payload
	}

	pub fn is_deployment(&self) -> bool {
		self.request.is_deployment()
	}
}

/// Builds forward requests from caller parameters.
#[derive(Debug, Clone)]
pub struct ForwardBuilder {
	nonce_source: NonceSource,
	default_deadline_secs: u64,
	registry: Option<Arc<NonceRegistry>>,
}

impl Default for ForwardBuilder {
	fn default() -> Self {
		Self {
			nonce_source: NonceSource::Generate,
			default_deadline_secs: DEFAULT_DEADLINE_SECS,
			registry: None,
		}
	}
}

impl ForwardBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_nonce_source(mut self, source: NonceSource) -> Self {
		self.nonce_source = source;
		self
	}

	pub fn with_default_deadline_secs(mut self, secs: u64) -> Self {
		self.default_deadline_secs = secs;
		self
	}

	/// Rejects nonces this process already bound to a different request.
	pub fn with_registry(mut self, registry: Arc<NonceRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	/// Builds the request and commits to the payload.
	///
	/// A deadline already in the past is logged and accepted; the verifier
	/// makes the final call at execution time.
	pub fn build(&self, params: ForwardParams) -> Result<BuiltForward, RequestError> {
		if params.from == Address::ZERO {
			return Err(RequestError::InvalidArgument(
				"from must be a non-zero address".to_string(),
			));
		}
		if params.payload.is_empty() {
			return Err(RequestError::InvalidArgument(
				"payload is empty".to_string(),
			));
		}

		let nonce = match (params.nonce, self.nonce_source) {
			(Some(nonce), _) => nonce,
			(None, NonceSource::Generate) => generate_nonce(),
			(None, NonceSource::Required) => {
				return Err(RequestError::InvalidArgument(
					"nonce is required".to_string(),
				))
			}
		};

		let now = current_timestamp();
		let deadline = params.deadline.unwrap_or_else(|| {
			now.saturating_add(params.deadline_secs.unwrap_or(self.default_deadline_secs))
		});
		if deadline <= now {
			warn!(
				from = %params.from,
				deadline,
				now,
				"Building forward with a deadline that has already passed"
			);
		}

		let data_hash = keccak256(&params.payload);
		let request = ForwardRequest {
			from: params.from,
			to: params.to,
			value: params.value.unwrap_or(U256::ZERO),
			space: params.space.unwrap_or(0),
			nonce,
			deadline,
			data_hash,
			caller: params.caller,
		};

		if let Some(registry) = &self.registry {
			registry.register(&request)?;
		}

		debug!(
			from = %request.from,
			to = %request.to,
			space = request.space,
			nonce = %request.nonce,
			deadline,
			data_hash = %data_hash,
			"Built forward request"
		);

		Ok(BuiltForward {
			request,
			payload: Bytes::from(params.payload),
		})
	}
}

/// Parses a textual address, naming the offending field on failure.
pub fn parse_address(field: &str, value: &str) -> Result<Address, RequestError> {
	value.trim().parse::<Address>().map_err(|e| {
		RequestError::InvalidArgument(format!("{} is not a valid address: {}", field, e))
	})
}

/// Decodes hex calldata or bytecode, with or without a `0x` prefix.
///
/// `0x` alone decodes to an empty payload, which the builder rejects.
pub fn parse_hex_payload(value: &str) -> Result<Vec<u8>, RequestError> {
	let trimmed = value.trim();
	hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
		.map_err(|e| RequestError::InvalidArgument(format!("payload is not valid hex: {}", e)))
}
