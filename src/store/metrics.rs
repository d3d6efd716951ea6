//! Store performance metrics.

/// Snapshot of [`MemoryStore`](crate::MemoryStore) counters.
///
/// # Example
///
/// ```
/// use host_cache::{ByteStore, MemoryStore};
///
/// let store = MemoryStore::new(1024 * 1024);
/// store.put("k", b"v");
/// store.get("k");
///
/// let metrics = store.metrics();
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// println!("Utilization: {:.2}%", metrics.utilization() * 100.0);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct StoreMetrics {
	/// Lookups that found a value.
	pub hits: u64,
	/// Lookups for an absent key.
	pub misses: u64,
	/// New keys stored.
	pub inserts: u64,
	/// Existing keys overwritten.
	pub updates: u64,
	/// Entries evicted to make room or after a capacity shrink.
	pub evictions: u64,
	/// Entries removed via delete().
	pub removals: u64,
	/// Puts not retained because the value exceeded a shard's capacity.
	pub rejected: u64,
	/// Current total charged size in bytes.
	pub current_size_bytes: usize,
	/// Maximum capacity in bytes.
	pub capacity_bytes: usize,
	/// Current number of entries.
	pub entry_count: usize,
}

impl StoreMetrics {
	/// Ratio of hits to lookups, 0.0 when nothing was looked up.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Fraction of capacity in use.
	pub fn utilization(&self) -> f64 {
		if self.capacity_bytes == 0 {
			0.0
		} else {
			self.current_size_bytes as f64 / self.capacity_bytes as f64
		}
	}

	pub fn total_writes(&self) -> u64 {
		self.inserts + self.updates
	}
}
