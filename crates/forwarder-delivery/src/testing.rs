//! In-memory chain for tests.
//!
//! Models just enough of a node and of the verifier to run the relay end to
//! end: a mempool with a replacement rule, blocks mined on demand (or on
//! every submission with auto-mining), account counters, and a verifier that
//! checks deadline, payload hash, signature, caller and nonce exactly as a
//! conformant deployment does. Any address with code understands
//! `store(uint256)`.

use crate::{DeliveryError, DeliveryInterface};
use alloy::primitives::keccak256;
use alloy::sol_types::{sol_data, Revert, SolCall, SolError, SolEvent, SolType};
use async_trait::async_trait;
use forwarder_account::recover_signer;
use forwarder_request::ForwardEncoder;
use forwarder_types::contracts::{plain, with_caller, IForwarderState};
use forwarder_types::{
	current_timestamp, Address, BlockTag, Bytes, FeeQuote, ForwardDomain, ForwardRequest,
	ForwardSchema, Log, Signature, Transaction, TransactionHash, TransactionReceipt, U256,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// EIP-712 domain name of the modelled verifier.
pub const FORWARDER_NAME: &str = "Forwarder";
/// EIP-712 domain version of the modelled verifier.
pub const FORWARDER_VERSION: &str = "1";

alloy::sol! {
	/// Minimal storage contract understood by every address with code.
	interface IStorage {
		function store(uint256 num) external;
		function retrieve() external view returns (uint256);

		event ValueStored(uint256 num);
		event Initialized(uint8 version);
	}
}

/// Calldata for `store(value)`.
pub fn encode_store(value: U256) -> Vec<u8> {
	IStorage::storeCall { num: value }.abi_encode()
}

const BASE_GAS: u64 = 21_000;
const EXECUTION_GAS: u64 = 60_000;
const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone)]
struct PendingTx {
	hash: TransactionHash,
	tx: Transaction,
}

/// State changes of one successful execution.
#[derive(Debug, Default)]
struct Effects {
	used_nonce: Option<(Address, u32, U256)>,
	storage_write: Option<(Address, U256)>,
	deployed: Option<(Address, Bytes)>,
	logs: Vec<Log>,
}

struct Reverted(String);

#[derive(Debug)]
struct State {
	chain_id: u64,
	verifier: Address,
	storage_contract: Address,
	auto_mine: bool,
	required_bump_percent: u64,
	eip1559: bool,
	base_fee: u128,
	timestamp: Option<u64>,
	allowlist: HashSet<Address>,

	block_number: u64,
	counters: HashMap<Address, u64>,
	mempool: Vec<PendingTx>,
	receipts: HashMap<TransactionHash, TransactionReceipt>,
	used_nonces: HashSet<(Address, u32, U256)>,
	storage: HashMap<Address, U256>,
	code: HashMap<Address, Bytes>,
	verifier_nonce: u64,
	submissions: usize,
	estimates: usize,
	failing_reads: u32,
}

/// Builder for [`MockChain`].
pub struct MockChainBuilder {
	chain_id: u64,
	auto_mine: bool,
	required_bump_percent: u64,
	eip1559: bool,
	allowlist: Vec<Address>,
}

impl MockChainBuilder {
	pub fn chain_id(mut self, chain_id: u64) -> Self {
		self.chain_id = chain_id;
		self
	}

	/// Mine a block after every accepted submission.
	pub fn auto_mine(mut self, auto_mine: bool) -> Self {
		self.auto_mine = auto_mine;
		self
	}

	/// Fee increase the mempool demands from a replacement.
	pub fn required_bump_percent(mut self, percent: u64) -> Self {
		self.required_bump_percent = percent;
		self
	}

	/// Quote legacy fees only.
	pub fn legacy_fees(mut self) -> Self {
		self.eip1559 = false;
		self
	}

	pub fn allow_caller(mut self, caller: Address) -> Self {
		self.allowlist.push(caller);
		self
	}

	pub fn build(self) -> MockChain {
		// Same layout as a fresh dev node where the deployer created both contracts.
		let verifier = MockChain::DEPLOYER.create(0);
		let storage_contract = MockChain::DEPLOYER.create(1);

		let mut code = HashMap::new();
		code.insert(verifier, Bytes::from_static(&[0x60, 0x80]));
		code.insert(storage_contract, Bytes::from_static(&[0x60, 0x80]));

		let mut counters = HashMap::new();
		counters.insert(MockChain::DEPLOYER, 2);

		MockChain {
			state: Mutex::new(State {
				chain_id: self.chain_id,
				verifier,
				storage_contract,
				auto_mine: self.auto_mine,
				required_bump_percent: self.required_bump_percent,
				eip1559: self.eip1559,
				base_fee: GWEI,
				timestamp: None,
				allowlist: self.allowlist.into_iter().collect(),
				block_number: 2,
				counters,
				mempool: Vec::new(),
				receipts: HashMap::new(),
				used_nonces: HashSet::new(),
				storage: HashMap::new(),
				code,
				verifier_nonce: 1,
				submissions: 0,
				estimates: 0,
				failing_reads: 0,
			}),
		}
	}
}

/// In-memory chain implementing [`DeliveryInterface`].
pub struct MockChain {
	state: Mutex<State>,
}

impl MockChain {
	/// Relayer account, the first development account.
	pub const RELAYER: Address = Address::new([
		0xf3, 0x9f, 0xd6, 0xe5, 0x1a, 0xad, 0x88, 0xf6, 0xf4, 0xce, 0x6a, 0xb8, 0x82, 0x72, 0x79,
		0xcf, 0xff, 0xb9, 0x22, 0x66,
	]);

	/// Account that deployed the verifier and the storage contract.
	pub const DEPLOYER: Address = Address::new([
		0x3c, 0x44, 0xcd, 0xdd, 0xb6, 0xa9, 0x00, 0xfa, 0x2b, 0x58, 0x5d, 0xd2, 0x99, 0xe0, 0x3d,
		0x12, 0xfa, 0x42, 0x93, 0xbc,
	]);

	pub fn builder() -> MockChainBuilder {
		MockChainBuilder {
			chain_id: 31337,
			auto_mine: false,
			required_bump_percent: 10,
			eip1559: true,
			allowlist: Vec::new(),
		}
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn verifier(&self) -> Address {
		self.state().verifier
	}

	/// A deployed contract understanding `store(uint256)`.
	pub fn storage_contract(&self) -> Address {
		self.state().storage_contract
	}

	pub fn chain_id_value(&self) -> u64 {
		self.state().chain_id
	}

	pub fn stored_value(&self, contract: Address) -> Option<U256> {
		self.state().storage.get(&contract).copied()
	}

	pub fn code_at(&self, address: Address) -> Option<Bytes> {
		self.state().code.get(&address).cloned()
	}

	/// Address the verifier's next deployment will land at.
	pub fn next_deployment_address(&self) -> Address {
		let state = self.state();
		state.verifier.create(state.verifier_nonce)
	}

	pub fn verifier_nonce(&self) -> u64 {
		self.state().verifier_nonce
	}

	/// Mined counter of `address`.
	pub fn transaction_count_value(&self, address: Address) -> u64 {
		self.state().counters.get(&address).copied().unwrap_or(0)
	}

	/// Number of accepted broadcasts, replacements included.
	pub fn submissions(&self) -> usize {
		self.state().submissions
	}

	/// Number of `estimate_gas` calls served.
	pub fn gas_estimates(&self) -> usize {
		self.state().estimates
	}

	pub fn pending_count(&self) -> usize {
		self.state().mempool.len()
	}

	pub fn allow_caller(&self, caller: Address) {
		self.state().allowlist.insert(caller);
	}

	/// Pins the block timestamp; otherwise wall-clock time is used.
	pub fn set_timestamp(&self, timestamp: u64) {
		self.state().timestamp = Some(timestamp);
	}

	pub fn set_base_fee(&self, base_fee: u128) {
		self.state().base_fee = base_fee;
	}

	/// Simulates transactions sent by `address` through another client.
	pub fn bump_account_counter(&self, address: Address, by: u64) {
		*self.state().counters.entry(address).or_insert(0) += by;
	}

	/// Makes the next `count` reads fail with a transport error.
	pub fn fail_next_reads(&self, count: u32) {
		self.state().failing_reads = count;
	}

	/// Mines one block with every executable pending transaction.
	pub fn mine(&self) -> u64 {
		let mut state = self.state();
		state.mine()
	}
}

impl State {
	fn timestamp(&self) -> u64 {
		self.timestamp.unwrap_or_else(current_timestamp)
	}

	fn counter(&self, address: Address) -> u64 {
		self.counters.get(&address).copied().unwrap_or(0)
	}

	fn consume_read(&mut self) -> Result<(), DeliveryError> {
		if self.failing_reads > 0 {
			self.failing_reads -= 1;
			return Err(DeliveryError::Transport("connection refused".to_string()));
		}
		Ok(())
	}

	fn quote(&self, eip1559: bool) -> FeeQuote {
		if eip1559 && self.eip1559 {
			FeeQuote::Eip1559 {
				max_fee_per_gas: self.base_fee * 2 + GWEI,
				max_priority_fee_per_gas: GWEI,
			}
		} else {
			FeeQuote::Legacy {
				gas_price: self.base_fee + GWEI,
			}
		}
	}

	fn gas_for(tx: &Transaction) -> u64 {
		BASE_GAS + EXECUTION_GAS + 16 * tx.data.len() as u64
	}

	fn mine(&mut self) -> u64 {
		self.block_number += 1;
		let block = self.block_number;

		let mut pending = std::mem::take(&mut self.mempool);
		pending.sort_by_key(|p| (p.tx.from, p.tx.nonce));

		let mut remaining = Vec::new();
		for entry in pending {
			let from = entry.tx.from.unwrap_or_default();
			if entry.tx.nonce != Some(self.counter(from)) {
				remaining.push(entry);
				continue;
			}
			*self.counters.entry(from).or_insert(0) += 1;

			let gas_needed = Self::gas_for(&entry.tx);
			let result = if entry.tx.gas_limit.unwrap_or(0) < gas_needed {
				Err(Reverted("out of gas".to_string()))
			} else {
				self.execute(&entry.tx)
			};

			let (success, logs) = match result {
				Ok(effects) => {
					let logs = effects.logs.clone();
					self.apply(effects);
					(true, logs)
				}
				Err(_) => (false, Vec::new()),
			};

			self.receipts.insert(
				entry.hash,
				TransactionReceipt {
					hash: entry.hash,
					block_number: block,
					success,
					gas_used: gas_needed.min(entry.tx.gas_limit.unwrap_or(0)),
					contract_address: None,
					logs,
				},
			);
		}
		self.mempool = remaining;
		block
	}

	fn apply(&mut self, effects: Effects) {
		if let Some(key) = effects.used_nonce {
			self.used_nonces.insert(key);
		}
		if let Some((contract, value)) = effects.storage_write {
			self.storage.insert(contract, value);
		}
		if let Some((address, code)) = effects.deployed {
			self.code.insert(address, code);
			self.verifier_nonce += 1;
		}
	}

	/// Runs `tx` against the current state without changing it.
	fn execute(&self, tx: &Transaction) -> Result<Effects, Reverted> {
		let Some(to) = tx.to else {
			return Err(Reverted("direct creation unsupported".to_string()));
		};
		let from = tx.from.unwrap_or_default();

		if to == self.verifier {
			return self.execute_forward(from, tx);
		}
		self.execute_target(to, &tx.data)
	}

	fn execute_forward(&self, sender: Address, tx: &Transaction) -> Result<Effects, Reverted> {
		let selector = tx.data.get(..4).unwrap_or_default();
		let schema = if selector == plain::IForwarder::executeCall::SELECTOR {
			ForwardSchema::Plain
		} else if selector == with_caller::IForwarder::executeCall::SELECTOR {
			ForwardSchema::WithCaller
		} else {
			return Err(Reverted("forwarder: unknown selector".to_string()));
		};

		let (request, payload, signature) = ForwardEncoder::new(schema)
			.decode_execute(&tx.data)
			.map_err(|_| Reverted("forwarder: malformed call".to_string()))?;

		self.check_forward(sender, tx.value, schema, &request, &payload, &signature)?;

		let mut effects = if request.is_deployment() {
			let deployed = self.verifier.create(self.verifier_nonce);
			let mut logs = vec![self.log(deployed, IStorage::Initialized { version: 1 })];
			logs.push(self.log(
				self.verifier,
				IForwarderState::Deployed {
					signer: request.from,
					deployed,
					dataHash: request.data_hash,
				},
			));
			Effects {
				deployed: Some((deployed, payload)),
				logs,
				..Default::default()
			}
		} else {
			self.execute_target(request.to, &payload)?
		};
		effects.used_nonce = Some(request.nonce_key());
		Ok(effects)
	}

	fn check_forward(
		&self,
		sender: Address,
		value: U256,
		schema: ForwardSchema,
		request: &ForwardRequest,
		payload: &Bytes,
		signature: &Signature,
	) -> Result<(), Reverted> {
		if request.is_expired_at(self.timestamp()) {
			return Err(Reverted("forwarder: request expired".to_string()));
		}
		if keccak256(payload) != request.data_hash {
			return Err(Reverted("forwarder: data hash mismatch".to_string()));
		}

		let domain = ForwardDomain {
			name: FORWARDER_NAME.to_string(),
			version: FORWARDER_VERSION.to_string(),
			chain_id: self.chain_id,
			verifying_contract: self.verifier,
		};
		match recover_signer(request, &domain, schema, signature) {
			Ok(signer) if signer == request.from => {}
			_ => return Err(Reverted("forwarder: invalid signature".to_string())),
		}

		if schema.includes_caller() {
			if request.caller != Some(sender) {
				return Err(Reverted("forwarder: wrong caller".to_string()));
			}
			if !self.allowlist.contains(&sender) {
				return Err(Reverted("forwarder: caller not allowed".to_string()));
			}
		}
		if self.used_nonces.contains(&request.nonce_key()) {
			return Err(Reverted("forwarder: nonce used".to_string()));
		}
		if value != request.value {
			return Err(Reverted("forwarder: value mismatch".to_string()));
		}
		Ok(())
	}

	fn execute_target(&self, target: Address, data: &[u8]) -> Result<Effects, Reverted> {
		if !self.code.contains_key(&target) {
			return Ok(Effects::default());
		}
		let call = IStorage::storeCall::abi_decode(data)
			.map_err(|_| Reverted("function not found".to_string()))?;

		Ok(Effects {
			storage_write: Some((target, call.num)),
			logs: vec![self.log(target, IStorage::ValueStored { num: call.num })],
			..Default::default()
		})
	}

	fn log<E: SolEvent>(&self, address: Address, event: E) -> Log {
		let data = event.encode_log_data();
		Log {
			address,
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	fn read(&self, tx: &Transaction) -> Result<Bytes, Reverted> {
		let to = tx.to.unwrap_or_default();
		let data = tx.data.as_slice();

		if to == self.verifier {
			if let Ok(call) = IForwarderState::isNonceUsedCall::abi_decode(data) {
				let used = self.used_nonces.contains(&(call.from, call.space, call.nonce));
				return Ok(<sol_data::Bool as SolType>::abi_encode(&used).into());
			}
			if let Ok(call) = IForwarderState::isCallerAllowedCall::abi_decode(data) {
				let allowed = self.allowlist.contains(&call.caller);
				return Ok(<sol_data::Bool as SolType>::abi_encode(&allowed).into());
			}
		}
		if IStorage::retrieveCall::abi_decode(data).is_ok() {
			let value = self.storage.get(&to).copied().unwrap_or_default();
			return Ok(<sol_data::Uint<256> as SolType>::abi_encode(&value).into());
		}
		self.execute(tx).map(|_| Bytes::new())
	}

	fn transaction_hash(tx: &Transaction) -> TransactionHash {
		let mut preimage = Vec::new();
		preimage.extend_from_slice(tx.from.unwrap_or_default().as_slice());
		preimage.extend_from_slice(&tx.nonce.unwrap_or_default().to_be_bytes());
		preimage.extend_from_slice(tx.to.unwrap_or_default().as_slice());
		preimage.extend_from_slice(&tx.value.to_be_bytes::<32>());
		preimage.extend_from_slice(&tx.gas_limit.unwrap_or_default().to_be_bytes());
		preimage.extend_from_slice(&tx.gas_price.unwrap_or_default().to_be_bytes());
		preimage.extend_from_slice(&tx.max_fee_per_gas.unwrap_or_default().to_be_bytes());
		preimage
			.extend_from_slice(&tx.max_priority_fee_per_gas.unwrap_or_default().to_be_bytes());
		preimage.extend_from_slice(&tx.chain_id.to_be_bytes());
		preimage.extend_from_slice(&tx.data);
		TransactionHash(keccak256(preimage))
	}

	fn accept(&mut self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let from = tx
			.from
			.ok_or_else(|| DeliveryError::Submission("missing sender".to_string()))?;
		let nonce = tx
			.nonce
			.ok_or_else(|| DeliveryError::Submission("missing nonce".to_string()))?;
		if tx.gas_limit.is_none() {
			return Err(DeliveryError::Submission("missing gas limit".to_string()));
		}
		if tx.chain_id != self.chain_id {
			return Err(DeliveryError::Submission("invalid chain id".to_string()));
		}
		if nonce < self.counter(from) {
			return Err(DeliveryError::Submission("nonce too low".to_string()));
		}

		let hash = Self::transaction_hash(&tx);
		if self.receipts.contains_key(&hash) || self.mempool.iter().any(|p| p.hash == hash) {
			return Err(DeliveryError::Submission("already known".to_string()));
		}

		if let Some(index) = self
			.mempool
			.iter()
			.position(|p| p.tx.from == Some(from) && p.tx.nonce == Some(nonce))
		{
			let previous = self.mempool[index].tx.effective_fee();
			let factor = 100u128 + u128::from(self.required_bump_percent);
			let threshold = previous.saturating_mul(factor) / 100;
			if tx.effective_fee() < threshold {
				return Err(DeliveryError::Submission(
					"replacement transaction underpriced".to_string(),
				));
			}
			self.mempool.remove(index);
		}

		self.mempool.push(PendingTx { hash, tx });
		self.submissions += 1;
		if self.auto_mine {
			self.mine();
		}
		Ok(hash)
	}
}

fn revert_error(reason: String) -> DeliveryError {
	let data = Revert { reason }.abi_encode();
	DeliveryError::reverted("execution reverted", Some(Bytes::from(data)))
}

#[async_trait]
impl DeliveryInterface for MockChain {
	async fn chain_id(&self) -> Result<u64, DeliveryError> {
		let mut state = self.state();
		state.consume_read()?;
		Ok(state.chain_id)
	}

	async fn transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError> {
		let mut state = self.state();
		state.consume_read()?;

		let mined = state.counter(address);
		Ok(match tag {
			BlockTag::Latest => mined,
			BlockTag::Pending => {
				let mut next = mined;
				while state
					.mempool
					.iter()
					.any(|p| p.tx.from == Some(address) && p.tx.nonce == Some(next))
				{
					next += 1;
				}
				next
			}
		})
	}

	async fn estimate_gas(&self, tx: &Transaction) -> Result<u64, DeliveryError> {
		let mut state = self.state();
		state.estimates += 1;
		state
			.execute(tx)
			.map(|_| State::gas_for(tx))
			.map_err(|Reverted(reason)| revert_error(reason))
	}

	async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError> {
		let mut state = self.state();
		state.consume_read()?;
		state
			.read(tx)
			.map_err(|Reverted(reason)| revert_error(reason))
	}

	async fn fees(&self, eip1559: bool) -> Result<FeeQuote, DeliveryError> {
		Ok(self.state().quote(eip1559))
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		self.state().accept(tx)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		Ok(self.state().receipts.get(hash).cloned())
	}

	async fn block_number(&self) -> Result<u64, DeliveryError> {
		Ok(self.state().block_number)
	}
}
