//! The forward authorization record and everything derived from it.

use crate::contracts::{plain, with_caller};
use crate::{Address, ForwardError, TransactionHash, TransactionReceipt, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authorization record a principal signs to have an operation relayed.
///
/// `data_hash` binds the record to the payload without embedding it; the
/// payload travels next to the record in the encoded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRequest {
	/// Authorizing principal.
	pub from: Address,
	/// Target contract, or the zero address for a deployment.
	pub to: Address,
	/// Native value forwarded with the call.
	pub value: U256,
	/// Nonce namespace.
	pub space: u32,
	/// Replay protection, unique within `(from, space)`.
	pub nonce: U256,
	/// UNIX seconds after which the authorization is void.
	pub deadline: u64,
	/// keccak256 of the payload.
	pub data_hash: B256,
	/// Only account allowed to submit, bound when the schema includes it.
	pub caller: Option<Address>,
}

impl ForwardRequest {
	/// Whether the payload is deployment bytecode rather than calldata.
	pub fn is_deployment(&self) -> bool {
		self.to == Address::ZERO
	}

	pub fn is_expired_at(&self, now: u64) -> bool {
		self.deadline <= now
	}

	/// Key under which the verifier tracks consumption.
	pub fn nonce_key(&self) -> (Address, u32, U256) {
		(self.from, self.space, self.nonce)
	}
}

/// Field layout of the signed record for a given verifier deployment.
///
/// Chosen once per deployment; signing and verification must agree on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardSchema {
	#[default]
	Plain,
	WithCaller,
}

impl ForwardSchema {
	pub fn includes_caller(&self) -> bool {
		matches!(self, ForwardSchema::WithCaller)
	}
}

impl fmt::Display for ForwardSchema {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ForwardSchema::Plain => write!(f, "plain"),
			ForwardSchema::WithCaller => write!(f, "with_caller"),
		}
	}
}

/// EIP-712 domain of a verifier deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardDomain {
	pub name: String,
	pub version: String,
	pub chain_id: u64,
	pub verifying_contract: Address,
}

impl ForwardDomain {
	pub fn to_eip712(&self) -> Eip712Domain {
		Eip712Domain::new(
			Some(self.name.clone().into()),
			Some(self.version.clone().into()),
			Some(U256::from(self.chain_id)),
			Some(self.verifying_contract),
			None,
		)
	}
}

/// A record projected onto the Solidity struct of one schema variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedForward {
	Plain(plain::ForwardRequest),
	WithCaller(with_caller::ForwardRequest),
}

impl TypedForward {
	/// Projects `request` onto `schema`.
	///
	/// The caller variant requires `request.caller`; the plain variant
	/// ignores it.
	pub fn new(request: &ForwardRequest, schema: ForwardSchema) -> Result<Self, ForwardError> {
		match schema {
			ForwardSchema::Plain => Ok(TypedForward::Plain(plain::ForwardRequest {
				from: request.from,
				to: request.to,
				value: request.value,
				space: request.space,
				nonce: request.nonce,
				deadline: U256::from(request.deadline),
				dataHash: request.data_hash,
			})),
			ForwardSchema::WithCaller => {
				let caller = request.caller.ok_or_else(|| {
					ForwardError::InvalidArgument(
						"caller is required by the with_caller schema".to_string(),
					)
				})?;
				Ok(TypedForward::WithCaller(with_caller::ForwardRequest {
					from: request.from,
					to: request.to,
					value: request.value,
					space: request.space,
					nonce: request.nonce,
					deadline: U256::from(request.deadline),
					dataHash: request.data_hash,
					caller,
				}))
			}
		}
	}

	pub fn schema(&self) -> ForwardSchema {
		match self {
			TypedForward::Plain(_) => ForwardSchema::Plain,
			TypedForward::WithCaller(_) => ForwardSchema::WithCaller,
		}
	}

	/// EIP-712 digest the principal signs.
	pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
		match self {
			TypedForward::Plain(record) => record.eip712_signing_hash(domain),
			TypedForward::WithCaller(record) => record.eip712_signing_hash(domain),
		}
	}

	/// Canonical EIP-712 type string.
	pub fn encode_type(&self) -> String {
		match self {
			TypedForward::Plain(_) => plain::ForwardRequest::eip712_encode_type().into_owned(),
			TypedForward::WithCaller(_) => {
				with_caller::ForwardRequest::eip712_encode_type().into_owned()
			}
		}
	}
}

/// Stage a single submission has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
	Built,
	Signed,
	Encoded,
	Submitted,
	Confirmed,
	Reverted,
	Superseded,
}

impl fmt::Display for SubmissionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SubmissionState::Built => "built",
			SubmissionState::Signed => "signed",
			SubmissionState::Encoded => "encoded",
			SubmissionState::Submitted => "submitted",
			SubmissionState::Confirmed => "confirmed",
			SubmissionState::Reverted => "reverted",
			SubmissionState::Superseded => "superseded",
		};
		write!(f, "{}", name)
	}
}

/// Terminal status of a relayed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
	/// Included and executed successfully.
	Confirmed,
	/// Included but execution reverted.
	Reverted,
	/// Another transaction with the same relayer counter was included.
	Superseded,
}

impl From<ExecutionStatus> for SubmissionState {
	fn from(status: ExecutionStatus) -> Self {
		match status {
			ExecutionStatus::Confirmed => SubmissionState::Confirmed,
			ExecutionStatus::Reverted => SubmissionState::Reverted,
			ExecutionStatus::Superseded => SubmissionState::Superseded,
		}
	}
}

/// Result of relaying one forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
	pub status: ExecutionStatus,
	/// Hash of the relayer transaction this outcome describes.
	pub hash: TransactionHash,
	/// Relayer counter the transaction was sent with.
	pub counter: u64,
	/// Receipt, absent when superseded.
	pub receipt: Option<TransactionReceipt>,
	/// Address recovered from the deployment event, if any.
	pub deployed_address: Option<Address>,
}

impl ExecutionOutcome {
	pub fn is_confirmed(&self) -> bool {
		self.status == ExecutionStatus::Confirmed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request() -> ForwardRequest {
		ForwardRequest {
			from: Address::repeat_byte(0x11),
			to: Address::repeat_byte(0x22),
			value: U256::ZERO,
			space: 7,
			nonce: U256::from(42u64),
			deadline: 1_900_000_000,
			data_hash: B256::repeat_byte(0x33),
			caller: None,
		}
	}

	fn domain() -> Eip712Domain {
		ForwardDomain {
			name: "Forwarder".to_string(),
			version: "1".to_string(),
			chain_id: 31337,
			verifying_contract: Address::repeat_byte(0x44),
		}
		.to_eip712()
	}

	#[test]
	fn test_with_caller_requires_caller() {
		let result = TypedForward::new(&request(), ForwardSchema::WithCaller);
		assert!(matches!(result, Err(ForwardError::InvalidArgument(_))));
	}

	#[test]
	fn test_type_strings_follow_field_order() {
		let mut req = request();
		req.caller = Some(Address::repeat_byte(0x55));

		let plain = TypedForward::new(&req, ForwardSchema::Plain).unwrap();
		assert_eq!(
			plain.encode_type(),
			"ForwardRequest(address from,address to,uint256 value,uint32 space,uint256 nonce,uint256 deadline,bytes32 dataHash)"
		);

		let with_caller = TypedForward::new(&req, ForwardSchema::WithCaller).unwrap();
		assert_eq!(
			with_caller.encode_type(),
			"ForwardRequest(address from,address to,uint256 value,uint32 space,uint256 nonce,uint256 deadline,bytes32 dataHash,address caller)"
		);
	}

	#[test]
	fn test_schema_variants_hash_differently() {
		let mut req = request();
		req.caller = Some(Address::repeat_byte(0x55));

		let plain = TypedForward::new(&req, ForwardSchema::Plain).unwrap();
		let with_caller = TypedForward::new(&req, ForwardSchema::WithCaller).unwrap();

		assert_ne!(plain.signing_hash(&domain()), with_caller.signing_hash(&domain()));
		assert_eq!(plain.signing_hash(&domain()), plain.signing_hash(&domain()));
	}

	#[test]
	fn test_zero_target_is_deployment() {
		let mut req = request();
		assert!(!req.is_deployment());
		req.to = Address::ZERO;
		assert!(req.is_deployment());
	}

	#[test]
	fn test_schema_serde_names() {
		let schema: ForwardSchema = serde_json::from_str("\"with_caller\"").unwrap();
		assert_eq!(schema, ForwardSchema::WithCaller);
		assert!(schema.includes_caller());
		assert_eq!(schema.to_string(), "with_caller");
	}
}
