//! Byte store contract and the default in-memory backend.

#[cfg(feature = "metrics")]
mod metrics;
mod shard;

#[cfg(feature = "metrics")]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
#[cfg(feature = "metrics")]
pub use metrics::StoreMetrics;
use parking_lot::RwLock;

use self::shard::Shard;

/// Capacity-bounded key to bytes map the cache facade writes encoded units
/// into.
///
/// Implementations must be safe to call from any number of threads. Absent
/// keys (`None`) must stay distinguishable from present-but-empty values.
/// Eviction policy is the implementation's business.
pub trait ByteStore: Send + Sync {
	/// Set the byte budget. Shrinking may evict.
	fn set_capacity(&self, bytes: usize);

	/// Store `value` under `key`, replacing any previous value.
	fn put(&self, key: &str, value: &[u8]);

	fn get(&self, key: &str) -> Option<Vec<u8>>;

	fn delete(&self, key: &str);

	fn clear(&self);
}

/// Minimum size per shard in bytes.
///
/// Keeps each shard large enough that uneven key distribution does not cause premature
/// eviction.
const MIN_SHARD_SIZE: usize = 4096;

/// Default number of shards for large stores.
const DEFAULT_SHARD_COUNT: usize = 64;

/// Largest power-of-two shard count not above `desired_shards` that keeps
/// every shard at least `MIN_SHARD_SIZE` bytes.
pub(crate) fn compute_shard_count(capacity: usize, desired_shards: usize) -> usize {
	let max_shards = (capacity / MIN_SHARD_SIZE).max(1);
	desired_shards.min(max_shards).next_power_of_two().max(1)
}

/// Thread-safe sharded byte store with clock eviction.
///
/// Capacity is divided evenly across shards, each behind its own `RwLock`.
/// Keys are routed to a shard by hash. The shard count is fixed at
/// construction; [`ByteStore::set_capacity`] redistributes the budget and
/// evicts from shards that no longer fit.
///
/// A value whose charged size (key plus value bytes) exceeds one shard's
/// capacity is not retained.
pub struct MemoryStore {
	shards: Vec<RwLock<Shard>>,
	hasher: RandomState,
	current_size: AtomicUsize,
	entry_count: AtomicUsize,
	max_size_bytes: AtomicUsize,
	#[cfg(feature = "metrics")]
	hits: AtomicU64,
	#[cfg(feature = "metrics")]
	misses: AtomicU64,
	#[cfg(feature = "metrics")]
	inserts: AtomicU64,
	#[cfg(feature = "metrics")]
	updates: AtomicU64,
	#[cfg(feature = "metrics")]
	evictions: AtomicU64,
	#[cfg(feature = "metrics")]
	removals: AtomicU64,
	#[cfg(feature = "metrics")]
	rejected: AtomicU64,
}

impl MemoryStore {
	/// Create a store with automatic shard scaling.
	///
	/// - Large stores (>= 256KB): 64 shards
	/// - Smaller stores: scaled down to keep at least 4KB per shard
	pub fn new(max_size_bytes: usize) -> Self {
		Self::with_shards(max_size_bytes, DEFAULT_SHARD_COUNT)
	}

	/// Create with a custom shard count.
	///
	/// The count is rounded to a power of two and reduced when the capacity
	/// cannot give each shard 4KB.
	pub fn with_shards(max_size_bytes: usize, shard_count: usize) -> Self {
		let shard_count = compute_shard_count(max_size_bytes, shard_count);
		let size_per_shard = max_size_bytes / shard_count;
		let shards = (0..shard_count).map(|_| RwLock::new(Shard::new(size_per_shard))).collect();

		Self {
			shards,
			hasher: RandomState::new(),
			current_size: AtomicUsize::new(0),
			entry_count: AtomicUsize::new(0),
			max_size_bytes: AtomicUsize::new(max_size_bytes),
			#[cfg(feature = "metrics")]
			hits: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			misses: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			inserts: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			updates: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			evictions: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			removals: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			rejected: AtomicU64::new(0),
		}
	}

	/// Current total charged size in bytes.
	pub fn size(&self) -> usize {
		self.current_size.load(Ordering::Relaxed)
	}

	pub fn len(&self) -> usize {
		self.entry_count.load(Ordering::Relaxed)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn capacity(&self) -> usize {
		self.max_size_bytes.load(Ordering::Relaxed)
	}

	pub fn shard_count(&self) -> usize {
		self.shards.len()
	}

	pub fn contains(&self, key: &str) -> bool {
		self.get_shard(key).read().contains(key)
	}

	/// Get performance metrics snapshot.
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> StoreMetrics {
		StoreMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			inserts: self.inserts.load(Ordering::Relaxed),
			updates: self.updates.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			rejected: self.rejected.load(Ordering::Relaxed),
			current_size_bytes: self.current_size.load(Ordering::Relaxed),
			capacity_bytes: self.capacity(),
			entry_count: self.entry_count.load(Ordering::Relaxed),
		}
	}

	fn get_shard(&self, key: &str) -> &RwLock<Shard> {
		let index = (self.hasher.hash_one(key) as usize) & (self.shards.len() - 1);
		&self.shards[index]
	}

	fn account_evictions(&self, evictions: usize, evicted_size: usize) {
		if evictions > 0 {
			self.entry_count.fetch_sub(evictions, Ordering::Relaxed);
			self.current_size.fetch_sub(evicted_size, Ordering::Relaxed);
			#[cfg(feature = "metrics")]
			self.evictions.fetch_add(evictions as u64, Ordering::Relaxed);
		}
	}
}

impl ByteStore for MemoryStore {
	fn set_capacity(&self, bytes: usize) {
		self.max_size_bytes.store(bytes, Ordering::Relaxed);
		let size_per_shard = bytes / self.shards.len();
		for shard_lock in &self.shards {
			let (evictions, evicted_size) = shard_lock.write().set_capacity(size_per_shard);
			self.account_evictions(evictions, evicted_size);
		}
		tracing::debug!(capacity = bytes, shards = self.shards.len(), "store capacity set");
	}

	fn put(&self, key: &str, value: &[u8]) {
		let outcome = self.get_shard(key).write().insert(key, value);

		if let Some(old_size) = outcome.replaced {
			self.current_size.fetch_sub(old_size, Ordering::Relaxed);
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
		}
		self.account_evictions(outcome.evictions, outcome.evicted_size);

		if !outcome.stored {
			tracing::debug!(key, bytes = value.len(), "value exceeds shard capacity, not retained");
			#[cfg(feature = "metrics")]
			self.rejected.fetch_add(1, Ordering::Relaxed);
			return;
		}

		self.current_size.fetch_add(shard::charge(key, value), Ordering::Relaxed);
		self.entry_count.fetch_add(1, Ordering::Relaxed);
		#[cfg(feature = "metrics")]
		{
			let counter = if outcome.replaced.is_some() {
				&self.updates
			} else {
				&self.inserts
			};
			counter.fetch_add(1, Ordering::Relaxed);
		}
	}

	fn get(&self, key: &str) -> Option<Vec<u8>> {
		let shard = self.get_shard(key).read();
		let Some(entry) = shard.get(key) else {
			#[cfg(feature = "metrics")]
			self.misses.fetch_add(1, Ordering::Relaxed);
			return None;
		};

		#[cfg(feature = "metrics")]
		self.hits.fetch_add(1, Ordering::Relaxed);

		Some(entry.data().to_vec())
	}

	fn delete(&self, key: &str) {
		let removed = self.get_shard(key).write().remove(key);
		if let Some(entry) = removed {
			self.current_size.fetch_sub(shard::charge(key, entry.data()), Ordering::Relaxed);
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
			#[cfg(feature = "metrics")]
			self.removals.fetch_add(1, Ordering::Relaxed);
		}
	}

	fn clear(&self) {
		for shard_lock in &self.shards {
			shard_lock.write().clear();
		}
		self.current_size.store(0, Ordering::Relaxed);
		self.entry_count.store(0, Ordering::Relaxed);

		#[cfg(feature = "metrics")]
		{
			self.hits.store(0, Ordering::Relaxed);
			self.misses.store(0, Ordering::Relaxed);
			self.inserts.store(0, Ordering::Relaxed);
			self.updates.store(0, Ordering::Relaxed);
			self.evictions.store(0, Ordering::Relaxed);
			self.removals.store(0, Ordering::Relaxed);
			self.rejected.store(0, Ordering::Relaxed);
		}
	}
}

impl std::fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryStore")
			.field("shards", &self.shards.len())
			.field("size", &self.size())
			.field("capacity", &self.capacity())
			.field("entries", &self.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::thread;

	use super::*;

	#[test]
	fn test_compute_shard_count_scales_with_capacity() {
		assert_eq!(compute_shard_count(1024, 64), 1);
		assert_eq!(compute_shard_count(4096, 64), 1);
		assert_eq!(compute_shard_count(8192, 64), 2);
		assert_eq!(compute_shard_count(65536, 64), 16);
		assert_eq!(compute_shard_count(256 * 1024, 64), 64);
		assert_eq!(compute_shard_count(8192, 128), 2);
		assert_eq!(compute_shard_count(1024 * 1024, 128), 128);
	}

	#[test]
	fn test_put_and_get() {
		let store = MemoryStore::new(1024);
		store.put("k", b"hello");
		assert_eq!(store.get("k").as_deref(), Some(&b"hello"[..]));
		assert_eq!(store.get("missing"), None);
	}

	#[test]
	fn test_empty_value_is_distinct_from_absent() {
		let store = MemoryStore::new(1024);
		store.put("empty", b"");
		assert_eq!(store.get("empty"), Some(Vec::new()));
		assert!(store.contains("empty"));
		assert!(!store.contains("other"));
	}

	#[test]
	fn test_overwrite_updates_size() {
		let store = MemoryStore::new(1024);
		store.put("k", &[0; 100]);
		store.put("k", &[0; 10]);
		assert_eq!(store.len(), 1);
		assert_eq!(store.size(), 11);
	}

	#[test]
	fn test_delete_and_clear() {
		let store = MemoryStore::new(4096);
		store.put("a", b"1");
		store.put("b", b"2");

		store.delete("a");
		store.delete("a");
		assert_eq!(store.get("a"), None);
		assert_eq!(store.len(), 1);

		store.clear();
		assert!(store.is_empty());
		assert_eq!(store.size(), 0);
	}

	#[test]
	fn test_capacity_is_never_exceeded() {
		let store = MemoryStore::with_shards(1000, 4);
		for i in 0..50 {
			store.put(&format!("key-{i}"), &[7; 50]);
			assert!(store.size() <= 1000, "size {} over capacity", store.size());
		}
		assert!(store.len() < 50);
	}

	#[test]
	fn test_shrinking_capacity_evicts() {
		let store = MemoryStore::new(4096);
		for i in 0..40 {
			store.put(&format!("key-{i:02}"), &[1; 90]);
		}
		assert_eq!(store.size(), 40 * 96);

		store.set_capacity(1000);
		assert_eq!(store.capacity(), 1000);
		assert!(store.size() <= 1000);
		assert!(store.len() <= 10);
	}

	#[test]
	fn test_oversized_value_not_retained() {
		let store = MemoryStore::new(512);
		store.put("big", b"old");
		store.put("big", &[0; 1024]);
		assert_eq!(store.get("big"), None);
		assert_eq!(store.size(), 0);
		assert!(store.is_empty());
	}

	#[test]
	fn test_concurrent_access() {
		let store = Arc::new(MemoryStore::new(1 << 20));
		let handles: Vec<_> = (0..4)
			.map(|t| {
				let store = store.clone();
				thread::spawn(move || {
					for i in 0..100 {
						let key = format!("t{t}-{i}");
						let value = format!("value-{i}");
						store.put(&key, value.as_bytes());
						assert_eq!(store.get(&key).as_deref(), Some(value.as_bytes()));
					}
				})
			})
			.collect();

		for handle in handles {
			handle.join().expect("thread should not panic");
		}
		assert_eq!(store.len(), 400);
	}

	#[test]
	fn test_store_is_send_sync() {
		fn assert_send_sync<T: Send + Sync>() {}
		assert_send_sync::<MemoryStore>();
		assert_send_sync::<Arc<dyn ByteStore>>();
	}

	#[cfg(feature = "metrics")]
	#[test]
	fn test_metrics_track_operations() {
		let store = MemoryStore::new(512);
		store.put("a", b"1");
		store.put("a", b"2");
		store.get("a");
		store.get("b");
		store.delete("a");
		store.put("huge", &[0; 4096]);

		let metrics = store.metrics();
		assert_eq!(metrics.inserts, 1);
		assert_eq!(metrics.updates, 1);
		assert_eq!(metrics.hits, 1);
		assert_eq!(metrics.misses, 1);
		assert_eq!(metrics.removals, 1);
		assert_eq!(metrics.rejected, 1);
		assert_eq!(metrics.entry_count, 0);
	}
}
