use std::fmt;
use std::sync::Arc;

use crate::cache::HostCache;
use crate::codec::CodecMode;
use crate::config::{DEFAULT_CAPACITY_BYTES, HostCacheConfig};
use crate::error::Result;
use crate::shape::ShapeCache;
use crate::store::{ByteStore, MemoryStore};

/// Loads a byte store backend for the given capacity.
pub type BackendLoader = Box<dyn Fn(usize) -> Result<Arc<dyn ByteStore>> + Send + Sync>;

/// Builder for configuring a [`HostCache`].
///
/// Backends are tried in the order they were added and the first that loads
/// is used. Without any, the cache uses a [`MemoryStore`]. If every backend
/// fails the cache is built in degraded mode.
///
/// # Example
///
/// ```
/// use host_cache::{CodecMode, HostCacheBuilder};
///
/// let cache = HostCacheBuilder::new(1024 * 1024 * 512) // 512 MB
///     .shards(128)
///     .mode(CodecMode::GraphAware)
///     .build();
/// assert!(cache.is_available());
/// ```
pub struct HostCacheBuilder {
	capacity: usize,
	shard_count: Option<usize>,
	mode: CodecMode,
	shapes: Option<Arc<ShapeCache>>,
	backends: Vec<BackendLoader>,
}

impl HostCacheBuilder {
	/// Create a new builder with the given capacity in bytes.
	pub fn new(capacity_bytes: usize) -> Self {
		Self {
			capacity: capacity_bytes,
			shard_count: None,
			mode: CodecMode::default(),
			shapes: None,
			backends: Vec::new(),
		}
	}

	pub fn from_config(config: &HostCacheConfig) -> Self {
		let builder = Self::new(config.capacity_bytes).mode(config.mode);
		match config.shards {
			Some(count) => builder.shards(count),
			None => builder,
		}
	}

	pub fn capacity(mut self, bytes: usize) -> Self {
		self.capacity = bytes;
		self
	}

	/// Set the shard count of the default store.
	///
	/// Rounded up to the next power of 2. Ignored when a backend is given.
	/// Default: derived from capacity, at most 64.
	pub fn shards(mut self, count: usize) -> Self {
		self.shard_count = Some(count);
		self
	}

	/// Initial codec mode. Default: structural.
	pub fn mode(mut self, mode: CodecMode) -> Self {
		self.mode = mode;
		self
	}

	/// Share a shape cache, e.g. one with hand-declared shapes.
	pub fn shapes(mut self, shapes: Arc<ShapeCache>) -> Self {
		self.shapes = Some(shapes);
		self
	}

	/// Add a backend loader to try after those already added.
	pub fn backend<F>(mut self, loader: F) -> Self
	where
		F: Fn(usize) -> Result<Arc<dyn ByteStore>> + Send + Sync + 'static,
	{
		self.backends.push(Box::new(loader));
		self
	}

	/// Use an already constructed store. Its capacity is set to the
	/// builder's.
	pub fn store(self, store: Arc<dyn ByteStore>) -> Self {
		self.backend(move |capacity| {
			store.set_capacity(capacity);
			Ok(store.clone())
		})
	}

	/// Build the cache with the configured settings.
	pub fn build(self) -> HostCache {
		let shapes = self.shapes.unwrap_or_default();
		let store = if self.backends.is_empty() {
			let store = match self.shard_count {
				Some(count) => MemoryStore::with_shards(self.capacity, count),
				None => MemoryStore::new(self.capacity),
			};
			tracing::debug!(
				capacity = self.capacity,
				shards = store.shard_count(),
				"using in-memory byte store"
			);
			Some(Arc::new(store) as Arc<dyn ByteStore>)
		} else {
			load_first(&self.backends, self.capacity)
		};
		HostCache::from_parts(store, self.mode, shapes)
	}
}

fn load_first(backends: &[BackendLoader], capacity: usize) -> Option<Arc<dyn ByteStore>> {
	for (index, load) in backends.iter().enumerate() {
		match load(capacity) {
			Ok(store) => {
				tracing::debug!(backend = index, capacity, "byte store backend loaded");
				return Some(store);
			}
			Err(error) => {
				tracing::warn!(backend = index, %error, "byte store backend failed to load");
			}
		}
	}
	tracing::warn!(
		attempted = backends.len(),
		"no byte store backend available, cache is degraded: puts are dropped and gets miss"
	);
	None
}

impl Default for HostCacheBuilder {
	/// Create a builder with default settings and 1GB capacity.
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY_BYTES)
	}
}

impl fmt::Debug for HostCacheBuilder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostCacheBuilder")
			.field("capacity", &self.capacity)
			.field("shard_count", &self.shard_count)
			.field("mode", &self.mode)
			.field("backends", &self.backends.len())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::error::Error;

	#[test]
	fn test_builder_default() {
		let cache = HostCacheBuilder::default().build();
		assert!(cache.is_available());
		assert_eq!(cache.mode(), CodecMode::Structural);
	}

	#[test]
	fn test_builder_from_config() {
		let config = HostCacheConfig {
			capacity_bytes: 1 << 20,
			mode: CodecMode::GraphAware,
			shards: Some(8),
		};
		let cache = HostCacheBuilder::from_config(&config).build();
		assert_eq!(cache.mode(), CodecMode::GraphAware);
	}

	#[test]
	fn test_first_loading_backend_wins() {
		let attempts = Arc::new(AtomicUsize::new(0));
		let counted = attempts.clone();
		let store = Arc::new(MemoryStore::new(1024));
		let chosen = store.clone();

		let cache = HostCacheBuilder::new(4096)
			.backend(move |_| {
				counted.fetch_add(1, Ordering::Relaxed);
				Err(Error::Unavailable("first".into()))
			})
			.store(chosen)
			.backend(|_| panic!("later backends are not tried"))
			.build();

		assert!(cache.is_available());
		assert_eq!(attempts.load(Ordering::Relaxed), 1);
		assert_eq!(store.capacity(), 4096);
		cache.put_object("k", Some(&1_i32)).unwrap();
		assert!(store.contains("k"));
	}

	#[test]
	fn test_all_backends_failing_degrades() {
		let cache = HostCacheBuilder::new(1024)
			.backend(|_| Err(Error::Unavailable("a".into())))
			.backend(|_| Err(Error::Unavailable("b".into())))
			.build();
		assert!(!cache.is_available());
	}

	#[test]
	fn test_shared_shape_cache() {
		let shapes = Arc::new(ShapeCache::new());
		let cache = HostCacheBuilder::new(1024).shapes(shapes.clone()).build();
		assert!(Arc::ptr_eq(cache.shapes(), &shapes));
	}
}
