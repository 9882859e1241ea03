//! Relayer account counter bookkeeping.

use forwarder_types::{FeeQuote, TransactionHash};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, MutexGuard};

/// How a submission picks its relayer counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterAssignment {
	/// The next unused counter.
	#[default]
	Next,
	/// Reuse counter `n` to displace whatever is pending there.
	Replace(u64),
}

/// Fee increase a node demands before accepting a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacementPolicy {
	/// Minimum increase over the previous fee, in percent. Zero only works on
	/// permissive development nodes, where whichever broadcast the node
	/// accepted last wins; only the receipts tell which one that was.
	pub fee_bump_percent: u64,
}

impl Default for ReplacementPolicy {
	fn default() -> Self {
		Self {
			fee_bump_percent: 10,
		}
	}
}

impl ReplacementPolicy {
	/// `previous` raised by the bump, rounded up.
	pub fn bump(&self, previous: u128) -> u128 {
		let factor = 100u128 + u128::from(self.fee_bump_percent);
		previous.saturating_mul(factor).saturating_add(99) / 100
	}

	/// Fees for a replacement: the network quote, but never below the bumped
	/// fees of the transaction being displaced.
	pub fn replacement_fees(&self, previous: FeeQuote, network: FeeQuote) -> FeeQuote {
		match (previous, network) {
			(
				FeeQuote::Eip1559 {
					max_fee_per_gas: prev_max,
					max_priority_fee_per_gas: prev_tip,
				},
				FeeQuote::Eip1559 {
					max_fee_per_gas,
					max_priority_fee_per_gas,
				},
			) => {
				let tip = max_priority_fee_per_gas.max(self.bump(prev_tip));
				FeeQuote::Eip1559 {
					max_fee_per_gas: max_fee_per_gas.max(self.bump(prev_max)).max(tip),
					max_priority_fee_per_gas: tip,
				}
			}
			(previous, FeeQuote::Legacy { gas_price }) => FeeQuote::Legacy {
				gas_price: gas_price.max(self.bump(fee_cap(previous))),
			},
			(
				FeeQuote::Legacy { gas_price: prev },
				FeeQuote::Eip1559 {
					max_fee_per_gas,
					max_priority_fee_per_gas,
				},
			) => {
				let bumped = self.bump(prev);
				FeeQuote::Eip1559 {
					max_fee_per_gas: max_fee_per_gas.max(bumped),
					max_priority_fee_per_gas: max_priority_fee_per_gas.max(bumped),
				}
			}
		}
	}
}

fn fee_cap(quote: FeeQuote) -> u128 {
	match quote {
		FeeQuote::Legacy { gas_price } => gas_price,
		FeeQuote::Eip1559 {
			max_fee_per_gas, ..
		} => max_fee_per_gas,
	}
}

/// A broadcast this process made and has not seen displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
	pub hash: TransactionHash,
	pub fees: FeeQuote,
}

/// Counter state of the relayer account.
///
/// `next` is `None` until the first allocation and after any failed
/// broadcast, forcing a resync from the network's pending count.
#[derive(Debug, Default)]
pub struct CounterState {
	next: Option<u64>,
	in_flight: BTreeMap<u64, InFlight>,
}

impl CounterState {
	/// Next counter to hand out, if known locally.
	pub fn next(&self) -> Option<u64> {
		self.next
	}

	/// Takes the next counter, syncing from `pending` when unknown.
	///
	/// Never moves backwards past a counter this process already used.
	pub fn allocate(&mut self, pending: impl FnOnce() -> u64) -> u64 {
		match self.next {
			Some(next) => next,
			None => {
				let synced = pending();
				let local = self
					.in_flight
					.keys()
					.next_back()
					.map(|highest| highest + 1)
					.unwrap_or(0);
				synced.max(local)
			}
		}
	}

	/// Records a broadcast at `counter`.
	pub fn record(&mut self, counter: u64, in_flight: InFlight) {
		self.in_flight.insert(counter, in_flight);
		let after = counter + 1;
		if self.next.map_or(true, |next| after > next) {
			self.next = Some(after);
		}
	}

	pub fn in_flight(&self, counter: u64) -> Option<&InFlight> {
		self.in_flight.get(&counter)
	}

	/// Drops the cached counter after a failed broadcast.
	pub fn invalidate(&mut self) {
		self.next = None;
	}

	/// Forgets broadcasts below the latest mined counter.
	pub fn prune_mined(&mut self, mined: u64) {
		self.in_flight = self.in_flight.split_off(&mined);
	}
}

/// Single-owner counter of the relayer account.
///
/// Holding the guard across "read counter, assign, submit" linearizes
/// allocation; no two submissions can pick the same counter by accident.
#[derive(Debug, Default)]
pub struct TransactionCounter {
	state: Mutex<CounterState>,
}

impl TransactionCounter {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn lock(&self) -> MutexGuard<'_, CounterState> {
		self.state.lock().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use forwarder_types::B256;

	fn in_flight(fees: FeeQuote) -> InFlight {
		InFlight {
			hash: TransactionHash(B256::repeat_byte(1)),
			fees,
		}
	}

	#[test]
	fn test_bump_rounds_up() {
		let policy = ReplacementPolicy::default();
		assert_eq!(policy.bump(100), 110);
		assert_eq!(policy.bump(101), 112);
		assert_eq!(ReplacementPolicy { fee_bump_percent: 0 }.bump(101), 101);
	}

	#[test]
	fn test_replacement_never_below_bump() {
		let policy = ReplacementPolicy::default();
		let previous = FeeQuote::Eip1559 {
			max_fee_per_gas: 1_000,
			max_priority_fee_per_gas: 100,
		};

		let cheap_network = FeeQuote::Eip1559 {
			max_fee_per_gas: 500,
			max_priority_fee_per_gas: 50,
		};
		assert_eq!(
			policy.replacement_fees(previous, cheap_network),
			FeeQuote::Eip1559 {
				max_fee_per_gas: 1_100,
				max_priority_fee_per_gas: 110,
			}
		);

		let busy_network = FeeQuote::Eip1559 {
			max_fee_per_gas: 5_000,
			max_priority_fee_per_gas: 500,
		};
		assert_eq!(policy.replacement_fees(previous, busy_network), busy_network);
	}

	#[test]
	fn test_legacy_replacement() {
		let policy = ReplacementPolicy {
			fee_bump_percent: 25,
		};
		let fees = policy.replacement_fees(
			FeeQuote::Legacy { gas_price: 100 },
			FeeQuote::Legacy { gas_price: 90 },
		);
		assert_eq!(fees, FeeQuote::Legacy { gas_price: 125 });
	}

	#[test]
	fn test_allocation_syncs_once_then_counts_locally() {
		let mut state = CounterState::default();
		assert_eq!(state.allocate(|| 5), 5);
		state.record(5, in_flight(FeeQuote::Legacy { gas_price: 1 }));

		assert_eq!(state.allocate(|| panic!("no resync expected")), 6);
	}

	#[test]
	fn test_invalidate_resyncs_without_going_backwards() {
		let mut state = CounterState::default();
		state.record(7, in_flight(FeeQuote::Legacy { gas_price: 1 }));
		state.invalidate();

		assert_eq!(state.allocate(|| 3), 8);
		assert_eq!(state.allocate(|| 12), 12);
	}

	#[test]
	fn test_replacement_record_keeps_next() {
		let mut state = CounterState::default();
		state.record(4, in_flight(FeeQuote::Legacy { gas_price: 1 }));
		state.record(5, in_flight(FeeQuote::Legacy { gas_price: 1 }));
		state.record(4, in_flight(FeeQuote::Legacy { gas_price: 2 }));

		assert_eq!(state.next(), Some(6));
		assert_eq!(
			state.in_flight(4).map(|f| f.fees),
			Some(FeeQuote::Legacy { gas_price: 2 })
		);
	}

	#[test]
	fn test_prune_mined() {
		let mut state = CounterState::default();
		for counter in 0..4 {
			state.record(counter, in_flight(FeeQuote::Legacy { gas_price: 1 }));
		}
		state.prune_mined(2);
		assert!(state.in_flight(1).is_none());
		assert!(state.in_flight(2).is_some());
	}

	#[tokio::test]
	async fn test_lock_serializes_allocation() {
		let counter = std::sync::Arc::new(TransactionCounter::new());
		let mut handles = Vec::new();
		for _ in 0..8 {
			let counter = counter.clone();
			handles.push(tokio::spawn(async move {
				let mut state = counter.lock().await;
				let n = state.allocate(|| 0);
				tokio::task::yield_now().await;
				state.record(n, in_flight(FeeQuote::Legacy { gas_price: 1 }));
				n
			}));
		}

		let mut seen = Vec::new();
		for handle in handles {
			seen.push(handle.await.unwrap());
		}
		seen.sort_unstable();
		assert_eq!(seen, (0..8).collect::<Vec<_>>());
	}
}
