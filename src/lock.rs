//! Named mutex over a [`KeyValueStore`].
//!
//! Acquisition writes a random owner token with set-if-absent and retries with capped exponential
//! backoff. While held, a background task extends the lease every half TTL. Release deletes the key
//! only if it still holds the owner token, so a lease that expired and was taken over is never
//! released by the previous holder.

// crates.io
use rand::RngCore;
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	config::{LockConfig, duration},
	kv::KeyValueStore,
	store::StoreError,
};

const TOKEN_LEN: usize = 16;

/// Failures raised by [`DistributedLock`].
#[derive(Debug, ThisError)]
pub enum LockError {
	/// The lock stayed held by someone else for the whole retry budget.
	#[error("Could not acquire lock `{key}` after {attempts} attempts.")]
	NotAcquired {
		/// Lock key.
		key: String,
		/// Attempts made.
		attempts: u32,
	},
	/// The backing store failed.
	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Factory for per-key lock guards.
#[derive(Clone)]
pub struct DistributedLock {
	kv: Arc<dyn KeyValueStore>,
	config: LockConfig,
}
impl DistributedLock {
	/// Creates a lock factory over `kv`.
	pub fn new(kv: Arc<dyn KeyValueStore>, config: LockConfig) -> Self {
		Self { kv, config }
	}

	/// Acquires `key`, waiting with exponential backoff up to the configured attempt budget.
	pub async fn acquire(&self, key: impl Into<String>) -> Result<LockGuard, LockError> {
		let key = key.into();
		let mut token = vec![0_u8; TOKEN_LEN];

		rand::rng().fill_bytes(&mut token);

		let attempts = self.config.max_attempts.max(1);
		let mut backoff = self.config.initial_backoff;

		for attempt in 1..=attempts {
			if self.kv.set_if_absent(&key, token.clone(), self.config.ttl).await? {
				#[cfg(feature = "tracing")]
				tracing::debug!(key = %key, attempt, "lock acquired");

				let extender = self.spawn_extender(key.clone(), token.clone());

				return Ok(LockGuard {
					kv: self.kv.clone(),
					key,
					token,
					extender: Some(extender),
					released: false,
				});
			}
			if attempt < attempts {
				tokio::time::sleep(duration::to_std(backoff)).await;

				backoff = (backoff * 2_i32).min(self.config.max_backoff);
			}
		}

		#[cfg(feature = "tracing")]
		tracing::warn!(key = %key, attempts, "lock acquisition exhausted its retry budget");

		Err(LockError::NotAcquired { key, attempts })
	}

	fn spawn_extender(&self, key: String, token: Vec<u8>) -> JoinHandle<()> {
		let kv = self.kv.clone();
		let ttl = self.config.ttl;
		let period = duration::to_std(ttl / 2);

		tokio::spawn(async move {
			loop {
				tokio::time::sleep(period).await;

				match kv.expire_if_equal(&key, &token, ttl).await {
					Ok(true) => continue,
					Ok(false) => break,
					Err(_e) => {
						#[cfg(feature = "tracing")]
						tracing::warn!(key = %key, error = %_e, "failed to extend lock lease");
					},
				}
			}
		})
	}
}
impl Debug for DistributedLock {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DistributedLock").field("config", &self.config).finish()
	}
}

/// Held lock. Released by [`unlock`](Self::unlock) or, as a fallback, on drop.
pub struct LockGuard {
	kv: Arc<dyn KeyValueStore>,
	key: String,
	token: Vec<u8>,
	extender: Option<JoinHandle<()>>,
	released: bool,
}
impl LockGuard {
	/// Lock key.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Releases the lock. Returns false when the lease had already expired or changed hands.
	pub async fn unlock(mut self) -> Result<bool, LockError> {
		self.stop_extender();
		self.released = true;

		Ok(self.kv.delete_if_equal(&self.key, &self.token).await?)
	}

	fn stop_extender(&mut self) {
		if let Some(extender) = self.extender.take() {
			extender.abort();
		}
	}
}
impl Debug for LockGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LockGuard").field("key", &self.key).finish()
	}
}
impl Drop for LockGuard {
	fn drop(&mut self) {
		self.stop_extender();

		if self.released {
			return;
		}

		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			return;
		};
		let kv = self.kv.clone();
		let key = std::mem::take(&mut self.key);
		let token = std::mem::take(&mut self.token);

		handle.spawn(async move {
			let _ = kv.delete_if_equal(&key, &token).await;
		});
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::kv::MemoryKeyValueStore;

	fn config(max_attempts: u32) -> LockConfig {
		LockConfig {
			ttl: Duration::seconds(2),
			initial_backoff: Duration::milliseconds(5),
			max_backoff: Duration::milliseconds(20),
			max_attempts,
		}
	}

	#[tokio::test]
	async fn contended_lock_fails_after_budget() {
		let kv = Arc::new(MemoryKeyValueStore::default());
		let lock = DistributedLock::new(kv.clone(), config(3));
		let held = lock.acquire("k").await.expect("First acquire should succeed.");
		let err = lock.acquire("k").await.expect_err("Second acquire should fail.");

		assert!(matches!(err, LockError::NotAcquired { attempts: 3, .. }));
		assert!(held.unlock().await.expect("Unlock should succeed."));
		assert!(kv.is_empty());

		let again = lock.acquire("k").await.expect("Released lock should be free.");

		assert_eq!(again.key(), "k");
	}

	#[tokio::test]
	async fn dropped_guards_release_the_key() {
		let kv = Arc::new(MemoryKeyValueStore::default());
		let lock = DistributedLock::new(kv.clone(), config(1));

		drop(lock.acquire("k").await.expect("Acquire should succeed."));

		for _ in 0..10 {
			if kv.is_empty() {
				break;
			}

			tokio::task::yield_now().await;
		}

		assert!(kv.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn held_leases_are_extended() {
		let kv = Arc::new(MemoryKeyValueStore::default());
		let lock = DistributedLock::new(kv.clone(), config(1));
		let guard = lock.acquire("k").await.expect("Acquire should succeed.");

		tokio::time::sleep(std::time::Duration::from_secs(5)).await;

		assert!(!kv.is_empty());
		assert!(guard.unlock().await.expect("Unlock should succeed."));
	}
}
