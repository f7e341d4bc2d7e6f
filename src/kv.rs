//! Ephemeral keyed storage with TTLs and atomic conditional operations.
//!
//! OAuth2 states and refresh locks live here rather than in the primary store. Any backend that
//! offers set-if-absent plus compare-and-set, compare-and-delete, and compare-and-expire semantics
//! can implement [`KeyValueStore`].

pub mod memory;

pub use memory::MemoryKeyValueStore;

// self
use crate::{_prelude::*, store::StoreFuture};

/// Keyed byte store with TTL support.
pub trait KeyValueStore
where
	Self: Send + Sync,
{
	/// Writes `value`, replacing any existing entry. `None` keeps the entry until deleted.
	fn set<'a>(
		&'a self,
		key: &'a str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()>;

	/// Writes `value` only when the key is absent. Returns true when the write happened.
	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: Vec<u8>,
		ttl: Duration,
	) -> StoreFuture<'a, bool>;

	/// Replaces the entry only if it still holds `expected`. Returns true when the write happened.
	fn set_if_equal<'a>(
		&'a self,
		key: &'a str,
		expected: &'a [u8],
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, bool>;

	/// Reads a live entry.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

	/// Removes an entry. Returns true when a live entry was removed.
	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

	/// Removes the entry only if it still holds `expected`.
	fn delete_if_equal<'a>(&'a self, key: &'a str, expected: &'a [u8]) -> StoreFuture<'a, bool>;

	/// Resets the TTL only if the entry still holds `expected`.
	fn expire_if_equal<'a>(
		&'a self,
		key: &'a str,
		expected: &'a [u8],
		ttl: Duration,
	) -> StoreFuture<'a, bool>;
}
