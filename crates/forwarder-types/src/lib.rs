//! Shared types for the forwarder relay workspace.
//!
//! Everything that crosses a crate boundary lives here: the authorization
//! record, the relayer-side transaction model, the verifier ABI and the
//! error taxonomy every stage reports into.

pub mod account;
pub mod contracts;
pub mod delivery;
pub mod errors;
pub mod forward;

pub use account::*;
pub use delivery::*;
pub use errors::*;
pub use forward::*;

/// Current UNIX time in seconds.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Truncates a 32-byte hash for log output.
pub fn truncate_hash(hash: &B256) -> String {
	let hash_str = hex::encode(hash.0);
	format!("{}..", &hash_str[..8])
}
