//! Forward request construction and call encoding.
//!
//! This crate turns caller parameters into a hashed [`ForwardRequest`] and
//! serializes signed requests into the calldata the verifier's single entry
//! point expects.
//!
//! [`ForwardRequest`]: forwarder_types::ForwardRequest

use forwarder_types::ForwardError;
use thiserror::Error;

pub mod builder;
pub mod encoder;
pub mod nonce;

pub use builder::{parse_address, parse_hex_payload, BuiltForward, ForwardBuilder, ForwardParams};
pub use encoder::{decode_bool, encode_is_caller_allowed, encode_is_nonce_used, ForwardEncoder};
pub use nonce::{generate_nonce, NonceRegistry, NonceSource};

/// Errors that can occur while building or encoding a forward.
#[derive(Debug, Error)]
pub enum RequestError {
	/// Malformed or missing input; the caller must fix it.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	/// Encoding produced an empty or undecodable result.
	#[error("Encoding failed: {0}")]
	Encoding(String),
}

impl From<RequestError> for ForwardError {
	fn from(err: RequestError) -> Self {
		match err {
			RequestError::InvalidArgument(msg) => ForwardError::InvalidArgument(msg),
			RequestError::Encoding(msg) => ForwardError::Encoding(msg),
		}
	}
}
