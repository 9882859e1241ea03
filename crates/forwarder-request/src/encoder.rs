//! Calldata for the verifier entry point and its read-only queries.

use crate::RequestError;
use alloy::sol_types::{sol_data, SolCall, SolType};
use forwarder_types::contracts::{plain, with_caller, IForwarderState};
use forwarder_types::{
	Address, Bytes, ForwardRequest, ForwardSchema, Signature, TypedForward, U256,
};

/// Serializes signed forwards for one verifier deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardEncoder {
	schema: ForwardSchema,
}

impl ForwardEncoder {
	pub fn new(schema: ForwardSchema) -> Self {
		Self { schema }
	}

	pub fn schema(&self) -> ForwardSchema {
		self.schema
	}

	/// 4-byte selector of `execute` for this schema.
	pub fn execute_selector(&self) -> [u8; 4] {
		match self.schema {
			ForwardSchema::Plain => plain::IForwarder::executeCall::SELECTOR,
			ForwardSchema::WithCaller => with_caller::IForwarder::executeCall::SELECTOR,
		}
	}

	/// Encodes `execute(request, payload, signature)`.
	///
	/// The output is a pure function of the inputs.
	pub fn encode_execute(
		&self,
		request: &ForwardRequest,
		payload: &Bytes,
		signature: &Signature,
	) -> Result<Vec<u8>, RequestError> {
		if signature.is_empty() {
			return Err(RequestError::Encoding("signature is empty".to_string()));
		}

		let typed = TypedForward::new(request, self.schema)
			.map_err(|e| RequestError::InvalidArgument(e.to_string()))?;
		let signature = Bytes::copy_from_slice(signature.as_bytes());

		let calldata = match typed {
			TypedForward::Plain(req) => plain::IForwarder::executeCall {
				req,
				data: payload.clone(),
				signature,
			}
			.abi_encode(),
			TypedForward::WithCaller(req) => with_caller::IForwarder::executeCall {
				req,
				data: payload.clone(),
				signature,
			}
			.abi_encode(),
		};

		if calldata.len() < 4 {
			return Err(RequestError::Encoding(format!(
				"encoded call is {} bytes",
				calldata.len()
			)));
		}
		Ok(calldata)
	}

	/// Decodes calldata produced by [`encode_execute`](Self::encode_execute).
	pub fn decode_execute(
		&self,
		data: &[u8],
	) -> Result<(ForwardRequest, Bytes, Signature), RequestError> {
		let decode_err = |e: alloy::sol_types::Error| {
			RequestError::Encoding(format!("not an execute call for {}: {}", self.schema, e))
		};

		match self.schema {
			ForwardSchema::Plain => {
				let call = plain::IForwarder::executeCall::abi_decode(data).map_err(decode_err)?;
				let request = ForwardRequest {
					from: call.req.from,
					to: call.req.to,
					value: call.req.value,
					space: call.req.space,
					nonce: call.req.nonce,
					deadline: deadline_to_u64(call.req.deadline)?,
					data_hash: call.req.dataHash,
					caller: None,
				};
				Ok((request, call.data, Signature(call.signature.to_vec())))
			}
			ForwardSchema::WithCaller => {
				let call =
					with_caller::IForwarder::executeCall::abi_decode(data).map_err(decode_err)?;
				let request = ForwardRequest {
					from: call.req.from,
					to: call.req.to,
					value: call.req.value,
					space: call.req.space,
					nonce: call.req.nonce,
					deadline: deadline_to_u64(call.req.deadline)?,
					data_hash: call.req.dataHash,
					caller: Some(call.req.caller),
				};
				Ok((request, call.data, Signature(call.signature.to_vec())))
			}
		}
	}
}

fn deadline_to_u64(deadline: U256) -> Result<u64, RequestError> {
	u64::try_from(deadline)
		.map_err(|_| RequestError::Encoding(format!("deadline {} exceeds u64", deadline)))
}

/// Encodes `isNonceUsed(from, space, nonce)`.
pub fn encode_is_nonce_used(from: Address, space: u32, nonce: U256) -> Vec<u8> {
	IForwarderState::isNonceUsedCall { from, space, nonce }.abi_encode()
}

/// Encodes `isCallerAllowed(caller)`.
pub fn encode_is_caller_allowed(caller: Address) -> Vec<u8> {
	IForwarderState::isCallerAllowedCall { caller }.abi_encode()
}

/// Decodes a single ABI-encoded `bool` return value.
pub fn decode_bool(data: &[u8]) -> Result<bool, RequestError> {
	<sol_data::Bool as SolType>::abi_decode(data)
		.map_err(|e| RequestError::Encoding(format!("expected a bool return: {}", e)))
}
