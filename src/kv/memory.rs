//! In-process [`KeyValueStore`] for tests and single-node deployments.
//!
//! Expired entries are dropped when their key is touched, and writes sweep the whole map at most
//! once per [`SWEEP_INTERVAL`] so keys that are never read again do not accumulate.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::time::Instant;
// self
use crate::{_prelude::*, config::duration, kv::KeyValueStore, store::StoreFuture};

/// Minimum spacing between full sweeps of expired entries.
pub const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(30);

#[derive(Clone, Debug)]
struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}
impl Entry {
	fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
		Self { value, expires_at: ttl.map(deadline) }
	}

	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.is_none_or(|at| at > now)
	}
}

#[derive(Debug, Default)]
struct Entries {
	map: HashMap<String, Entry>,
	next_sweep: Option<Instant>,
}
impl Entries {
	fn insert(&mut self, key: &str, entry: Entry) {
		let now = Instant::now();

		if self.next_sweep.is_none_or(|at| at <= now) {
			self.map.retain(|_, entry| entry.is_live(now));
			self.next_sweep = Some(now + SWEEP_INTERVAL);
		}

		self.map.insert(key.to_owned(), entry);
	}
}

/// Mutex-guarded map with lazy expiry and periodic sweeps.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyValueStore(Arc<Mutex<Entries>>);
impl MemoryKeyValueStore {
	/// Number of live entries.
	pub fn len(&self) -> usize {
		let now = Instant::now();

		self.0.lock().map.values().filter(|entry| entry.is_live(now)).count()
	}

	/// Returns true when no live entry exists.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[cfg(test)]
	fn stored_len(&self) -> usize {
		self.0.lock().map.len()
	}

	fn with_live<T>(&self, key: &str, f: impl FnOnce(&mut Entries, bool) -> T) -> T {
		let mut entries = self.0.lock();
		let live = entries.map.get(key).map(|entry| entry.is_live(Instant::now()));

		if live == Some(false) {
			entries.map.remove(key);
		}

		f(&mut entries, live == Some(true))
	}
}
impl KeyValueStore for MemoryKeyValueStore {
	fn set<'a>(
		&'a self,
		key: &'a str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.lock().insert(key, Entry::new(value, ttl));

			Ok(())
		})
	}

	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: Vec<u8>,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			Ok(self.with_live(key, |entries, live| {
				if live {
					return false;
				}

				entries.insert(key, Entry::new(value, Some(ttl)));

				true
			}))
		})
	}

	fn set_if_equal<'a>(
		&'a self,
		key: &'a str,
		expected: &'a [u8],
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			Ok(self.with_live(key, |entries, live| match entries.map.get_mut(key) {
				Some(entry) if live && entry.value == expected => {
					*entry = Entry::new(value, ttl);

					true
				},
				_ => false,
			}))
		})
	}

	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
		Box::pin(async move {
			Ok(self.with_live(key, |entries, live| {
				if live { entries.map.get(key).map(|entry| entry.value.clone()) } else { None }
			}))
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			Ok(self.with_live(key, |entries, live| live && entries.map.remove(key).is_some()))
		})
	}

	fn delete_if_equal<'a>(&'a self, key: &'a str, expected: &'a [u8]) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			Ok(self.with_live(key, |entries, live| {
				if live && entries.map.get(key).is_some_and(|entry| entry.value == expected) {
					entries.map.remove(key);

					true
				} else {
					false
				}
			}))
		})
	}

	fn expire_if_equal<'a>(
		&'a self,
		key: &'a str,
		expected: &'a [u8],
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			Ok(self.with_live(key, |entries, live| match entries.map.get_mut(key) {
				Some(entry) if live && entry.value == expected => {
					entry.expires_at = Some(deadline(ttl));

					true
				},
				_ => false,
			}))
		})
	}
}

fn deadline(ttl: Duration) -> Instant {
	Instant::now() + duration::to_std(ttl)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn entries_expire_after_their_ttl() {
		let kv = MemoryKeyValueStore::default();

		kv.set("k", b"v".to_vec(), Some(Duration::seconds(5))).await.expect("Set should succeed.");

		assert_eq!(kv.get("k").await.expect("Get should succeed."), Some(b"v".to_vec()));

		tokio::time::advance(StdDuration::from_secs(6)).await;

		assert_eq!(kv.get("k").await.expect("Get should succeed."), None);
		assert!(kv.is_empty());
	}

	#[tokio::test]
	async fn conditional_operations_respect_the_current_value() {
		let kv = MemoryKeyValueStore::default();
		let ttl = Duration::seconds(30);

		assert!(kv.set_if_absent("lock", b"a".to_vec(), ttl).await.expect("Set should succeed."));
		assert!(!kv.set_if_absent("lock", b"b".to_vec(), ttl).await.expect("Set should succeed."));
		assert!(!kv.delete_if_equal("lock", b"b").await.expect("Delete should succeed."));
		assert!(kv.expire_if_equal("lock", b"a", ttl).await.expect("Expire should succeed."));
		assert!(kv.delete_if_equal("lock", b"a").await.expect("Delete should succeed."));
		assert!(!kv.expire_if_equal("lock", b"a", ttl).await.expect("Expire should succeed."));
	}

	#[tokio::test(start_paused = true)]
	async fn writes_sweep_keys_that_are_never_touched_again() {
		let kv = MemoryKeyValueStore::default();

		for i in 0..1_000 {
			kv.set(&format!("k{i}"), b"v".to_vec(), Some(Duration::seconds(1)))
				.await
				.expect("Set should succeed.");
		}

		assert_eq!(kv.stored_len(), 1_000);

		tokio::time::advance(StdDuration::from_secs(3_600)).await;
		kv.set("fresh", b"v".to_vec(), None).await.expect("Set should succeed.");

		assert_eq!(kv.stored_len(), 1);
		assert_eq!(kv.len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn sweeps_keep_live_entries() {
		let kv = MemoryKeyValueStore::default();
		let ttl = Duration::seconds(10);

		kv.set("short", b"s".to_vec(), Some(Duration::seconds(1)))
			.await
			.expect("Set should succeed.");
		kv.set("long", b"l".to_vec(), Some(Duration::hours(1))).await.expect("Set should succeed.");
		tokio::time::advance(SWEEP_INTERVAL).await;

		assert!(kv.set_if_absent("other", b"o".to_vec(), ttl).await.expect("Set should succeed."));
		assert_eq!(kv.stored_len(), 2);
		assert_eq!(kv.get("long").await.expect("Get should succeed."), Some(b"l".to_vec()));
	}

	#[tokio::test]
	async fn compare_and_set_only_replaces_the_expected_value() {
		let kv = MemoryKeyValueStore::default();

		kv.set("state", b"a".to_vec(), None).await.expect("Set should succeed.");

		assert!(
			!kv.set_if_equal("state", b"x", b"b".to_vec(), None)
				.await
				.expect("Compare-and-set should succeed.")
		);
		assert!(
			kv.set_if_equal("state", b"a", b"b".to_vec(), None)
				.await
				.expect("Compare-and-set should succeed.")
		);
		assert_eq!(kv.get("state").await.expect("Get should succeed."), Some(b"b".to_vec()));
		assert!(kv.delete("state").await.expect("Delete should succeed."));
		assert!(
			!kv.set_if_equal("state", b"b", b"c".to_vec(), None)
				.await
				.expect("Compare-and-set should succeed.")
		);
		assert!(kv.get("state").await.expect("Get should succeed.").is_none());
	}

	#[tokio::test]
	async fn compare_and_delete_is_single_use() {
		let kv = MemoryKeyValueStore::default();

		kv.set("state", b"s".to_vec(), None).await.expect("Set should succeed.");

		assert!(kv.delete_if_equal("state", b"s").await.expect("Delete should succeed."));
		assert!(!kv.delete_if_equal("state", b"s").await.expect("Delete should succeed."));
		assert!(!kv.delete("state").await.expect("Delete should succeed."));
	}
}
