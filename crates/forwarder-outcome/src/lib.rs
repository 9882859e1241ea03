//! Post-confirmation extraction of forward results.
//!
//! Receipts carry logs from every contract touched during execution; only the
//! verifier's `Deployed` event tells where a forwarded deployment landed.

use alloy::sol_types::SolEvent;
use forwarder_types::contracts::IForwarderState;
use forwarder_types::{Address, ExecutionOutcome, Log, TransactionReceipt, B256};
use tracing::{debug, trace};

/// A decoded `Deployed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployedEvent {
	/// Contract that emitted the event.
	pub emitter: Address,
	/// Principal whose forward created the contract.
	pub signer: Address,
	pub deployed: Address,
	pub data_hash: B256,
}

/// Returns the first log in `logs` that decodes as `E`, with its emitter.
///
/// Logs from other emitters or with other signatures are skipped.
pub fn first_event<E: SolEvent>(logs: &[Log], emitter: Option<Address>) -> Option<(Address, E)> {
	for log in logs {
		if emitter.is_some_and(|expected| expected != log.address) {
			continue;
		}
		match E::decode_raw_log(log.topics.iter().copied(), &log.data) {
			Ok(event) => return Some((log.address, event)),
			Err(e) => trace!(address = %log.address, "Skipping log: {}", e),
		}
	}
	None
}

/// Extracts results from confirmed receipts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeExtractor {
	emitter: Option<Address>,
}

impl OutcomeExtractor {
	/// Accepts events from any emitter.
	pub fn new() -> Self {
		Self::default()
	}

	/// Only accepts events emitted by `verifier`.
	pub fn for_verifier(verifier: Address) -> Self {
		Self {
			emitter: Some(verifier),
		}
	}

	pub fn deployed_event(&self, receipt: &TransactionReceipt) -> Option<DeployedEvent> {
		first_event::<IForwarderState::Deployed>(&receipt.logs, self.emitter).map(
			|(emitter, event)| DeployedEvent {
				emitter,
				signer: event.signer,
				deployed: event.deployed,
				data_hash: event.dataHash,
			},
		)
	}

	pub fn deployed_address(&self, receipt: &TransactionReceipt) -> Option<Address> {
		self.deployed_event(receipt).map(|event| event.deployed)
	}

	/// Fills `deployed_address` of a confirmed outcome.
	pub fn enrich(&self, mut outcome: ExecutionOutcome) -> ExecutionOutcome {
		if !outcome.is_confirmed() {
			return outcome;
		}
		if let Some(receipt) = &outcome.receipt {
			outcome.deployed_address = self.deployed_address(receipt);
			if let Some(address) = outcome.deployed_address {
				debug!(deployed = %address, "Extracted deployed address");
			}
		}
		outcome
	}
}

/// Address a CREATE by `deployer` at account counter `counter` produces.
pub fn expected_create_address(deployer: Address, counter: u64) -> Address {
	deployer.create(counter)
}

#[cfg(test)]
mod tests {
	use super::*;
	use forwarder_types::{ExecutionStatus, TransactionHash};

	alloy::sol! {
		event Transfer(address indexed from, address indexed to, uint256 value);
	}

	fn deployed_log(emitter: Address, deployed: Address) -> Log {
		let data = IForwarderState::Deployed {
			signer: Address::repeat_byte(0x11),
			deployed,
			dataHash: B256::repeat_byte(0x33),
		}
		.encode_log_data();
		Log {
			address: emitter,
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	fn transfer_log(emitter: Address) -> Log {
		let data = Transfer {
			from: Address::repeat_byte(1),
			to: Address::repeat_byte(2),
			value: alloy::primitives::U256::from(5u64),
		}
		.encode_log_data();
		Log {
			address: emitter,
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	fn receipt(logs: Vec<Log>, success: bool) -> TransactionReceipt {
		TransactionReceipt {
			hash: TransactionHash(B256::repeat_byte(0xaa)),
			block_number: 10,
			success,
			gas_used: 50_000,
			contract_address: None,
			logs,
		}
	}

	#[test]
	fn test_skips_unrelated_logs() {
		let verifier = Address::repeat_byte(0x44);
		let deployed = Address::repeat_byte(0x55);
		let receipt = receipt(
			vec![transfer_log(Address::repeat_byte(9)), deployed_log(verifier, deployed)],
			true,
		);

		let event = OutcomeExtractor::new().deployed_event(&receipt).unwrap();
		assert_eq!(event.deployed, deployed);
		assert_eq!(event.emitter, verifier);
		assert_eq!(event.signer, Address::repeat_byte(0x11));
	}

	#[test]
	fn test_emitter_filter() {
		let verifier = Address::repeat_byte(0x44);
		let impostor = Address::repeat_byte(0x66);
		let receipt = receipt(
			vec![
				deployed_log(impostor, Address::repeat_byte(0x77)),
				deployed_log(verifier, Address::repeat_byte(0x55)),
			],
			true,
		);

		assert_eq!(
			OutcomeExtractor::for_verifier(verifier).deployed_address(&receipt),
			Some(Address::repeat_byte(0x55))
		);
		assert_eq!(
			OutcomeExtractor::new().deployed_address(&receipt),
			Some(Address::repeat_byte(0x77))
		);
	}

	#[test]
	fn test_no_match_is_none() {
		let unrelated = receipt(vec![transfer_log(Address::repeat_byte(9))], true);
		assert_eq!(OutcomeExtractor::new().deployed_address(&unrelated), None);

		let empty = receipt(vec![], true);
		assert_eq!(OutcomeExtractor::new().deployed_address(&empty), None);
	}

	#[test]
	fn test_enrich_only_confirmed() {
		let verifier = Address::repeat_byte(0x44);
		let logs = vec![deployed_log(verifier, Address::repeat_byte(0x55))];
		let extractor = OutcomeExtractor::for_verifier(verifier);

		let confirmed = ExecutionOutcome {
			status: ExecutionStatus::Confirmed,
			hash: TransactionHash(B256::repeat_byte(0xaa)),
			counter: 0,
			receipt: Some(receipt(logs.clone(), true)),
			deployed_address: None,
		};
		assert_eq!(
			extractor.enrich(confirmed).deployed_address,
			Some(Address::repeat_byte(0x55))
		);

		let reverted = ExecutionOutcome {
			status: ExecutionStatus::Reverted,
			hash: TransactionHash(B256::repeat_byte(0xaa)),
			counter: 0,
			receipt: Some(receipt(logs, false)),
			deployed_address: None,
		};
		assert_eq!(extractor.enrich(reverted).deployed_address, None);
	}

	#[test]
	fn test_expected_create_address() {
		let deployer: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
		let expected: Address = "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap();
		assert_eq!(expected_create_address(deployer, 0), expected);
	}
}
