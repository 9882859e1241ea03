//! Solidity bindings for the external forwarder verifier.
//!
//! The verifier exists in two deployments that differ only in whether the
//! signed record binds a `caller`. Both variants keep the primary type name
//! `ForwardRequest`, so their EIP-712 type hashes differ while the encoded
//! type string still starts with the name the verifier expects.
//!
//! IMPORTANT: field order below is part of the wire contract and must match
//! the verifier's struct exactly.

pub mod plain {
	alloy::sol! {
		/// Authorization record without a bound submitter.
		#[derive(Debug, PartialEq, Eq)]
		struct ForwardRequest {
			address from;
			address to;
			uint256 value;
			uint32 space;
			uint256 nonce;
			uint256 deadline;
			bytes32 dataHash;
		}

		/// Verifier entry point.
		interface IForwarder {
			function execute(ForwardRequest req, bytes data, bytes signature) external payable;
		}
	}
}

pub mod with_caller {
	alloy::sol! {
		/// Authorization record naming the only account allowed to submit it.
		#[derive(Debug, PartialEq, Eq)]
		struct ForwardRequest {
			address from;
			address to;
			uint256 value;
			uint32 space;
			uint256 nonce;
			uint256 deadline;
			bytes32 dataHash;
			address caller;
		}

		/// Verifier entry point.
		interface IForwarder {
			function execute(ForwardRequest req, bytes data, bytes signature) external payable;
		}
	}
}

alloy::sol! {
	/// Read-only queries and events shared by both verifier variants.
	interface IForwarderState {
		function isNonceUsed(address from, uint32 space, uint256 nonce) external view returns (bool);
		function isCallerAllowed(address caller) external view returns (bool);

		event Deployed(address indexed signer, address indexed deployed, bytes32 dataHash);
	}
}
