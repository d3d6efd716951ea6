use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::builder::HostCacheBuilder;
use crate::codec::{Codec, CodecMode, GraphCodec, StructuralCodec};
use crate::error::{Error, Result};
use crate::pool::ContextPool;
use crate::reflect::{GraphBuilder, Reflect, Reifier};
use crate::shape::{Registration, ShapeCache};
use crate::store::ByteStore;
use crate::value::ObjectGraph;

/// Object cache over a byte store. Can be shared across threads via
/// `Arc<HostCache>`.
///
/// Values are encoded with the active codec on `put` and decoded again on
/// every `get`; nothing is kept in object form. The active codec is read once
/// at the start of each call, so [`set_mode`](Self::set_mode) only affects
/// calls issued after it returns. The `*_in` variants take the codec
/// explicitly instead.
///
/// If no byte store backend could be loaded when the cache was built, it runs
/// degraded for its whole lifetime: puts return `Ok(false)` and gets return
/// `Ok(None)`.
///
/// # Example
///
/// ```
/// use host_cache::{CodecMode, HostCache, reflect_struct};
///
/// #[derive(Debug, PartialEq)]
/// struct Point {
///     x: i32,
///     label: String,
/// }
///
/// reflect_struct!(Point as "demo.Point" { x: i32, label: String });
///
/// let cache = HostCache::new(1024 * 1024);
/// let point = Point { x: 1, label: "s".into() };
///
/// assert!(cache.put_object("p", Some(&point)).unwrap());
/// assert_eq!(cache.get_object::<Point>("p").unwrap(), Some(point));
/// assert_eq!(cache.get_object::<Point>("missing").unwrap(), None);
///
/// cache.set_mode(CodecMode::GraphAware);
/// assert_eq!(cache.mode(), CodecMode::GraphAware);
/// ```
pub struct HostCache {
	/// `None` when every backend failed to load
	store: Option<Arc<dyn ByteStore>>,
	mode: AtomicU8,
	shapes: Arc<ShapeCache>,
	structural: StructuralCodec,
	graph: GraphCodec,
	contexts: ContextPool,
}

impl HostCache {
	/// Cache over a [`MemoryStore`](crate::MemoryStore) of the given capacity.
	pub fn new(capacity_bytes: usize) -> Self {
		HostCacheBuilder::new(capacity_bytes).build()
	}

	pub fn builder(capacity_bytes: usize) -> HostCacheBuilder {
		HostCacheBuilder::new(capacity_bytes)
	}

	pub(crate) fn from_parts(
		store: Option<Arc<dyn ByteStore>>,
		mode: CodecMode,
		shapes: Arc<ShapeCache>,
	) -> Self {
		Self {
			store,
			mode: AtomicU8::new(mode as u8),
			structural: StructuralCodec::new(shapes.clone()),
			graph: GraphCodec::new(shapes.clone()),
			shapes,
			contexts: ContextPool::new(),
		}
	}

	/// Select the codec for subsequent calls.
	pub fn set_mode(&self, mode: CodecMode) {
		self.mode.store(mode as u8, Ordering::Relaxed);
		tracing::debug!(%mode, "codec mode changed");
	}

	pub fn mode(&self) -> CodecMode {
		CodecMode::from_u8(self.mode.load(Ordering::Relaxed))
	}

	/// Whether a byte store backend was loaded.
	pub fn is_available(&self) -> bool {
		self.store.is_some()
	}

	/// Shapes known to both codecs.
	pub fn shapes(&self) -> &Arc<ShapeCache> {
		&self.shapes
	}

	pub fn codec(&self, mode: CodecMode) -> &dyn Codec {
		match mode {
			CodecMode::Structural => &self.structural,
			CodecMode::GraphAware => &self.graph,
		}
	}

	/// Encode `value` with the active codec and store it under `key`.
	///
	/// Returns `Ok(false)` without touching the store when there is nothing
	/// to store: `value` is `None`, `key` is empty, or the cache is degraded.
	pub fn put_object<T: Reflect>(&self, key: &str, value: Option<&T>) -> Result<bool> {
		self.put_object_in(self.mode(), key, value)
	}

	pub fn put_object_in<T: Reflect>(
		&self,
		mode: CodecMode,
		key: &str,
		value: Option<&T>,
	) -> Result<bool> {
		let Some(value) = value else {
			return Ok(false);
		};
		if key.is_empty() || self.store.is_none() {
			return Ok(false);
		}
		T::register(&mut Registration::new(&self.shapes));
		self.put_graph_in(mode, key, &GraphBuilder::build(value))
	}

	/// Fetch and decode the value under `key` with the active codec.
	///
	/// Absent and zero-length entries both read as `Ok(None)`.
	pub fn get_object<T: Reflect>(&self, key: &str) -> Result<Option<T>> {
		self.get_object_in(self.mode(), key)
	}

	pub fn get_object_in<T: Reflect>(&self, mode: CodecMode, key: &str) -> Result<Option<T>> {
		if self.store.is_none() {
			return Ok(None);
		}
		T::register(&mut Registration::new(&self.shapes));
		match self.get_graph_in(mode, key, T::root_type())? {
			Some(graph) => Reifier::materialize(&graph).map(Some),
			None => Ok(None),
		}
	}

	/// Store an object graph directly.
	pub fn put_graph(&self, key: &str, graph: &ObjectGraph) -> Result<bool> {
		self.put_graph_in(self.mode(), key, graph)
	}

	pub fn put_graph_in(&self, mode: CodecMode, key: &str, graph: &ObjectGraph) -> Result<bool> {
		let Some(store) = &self.store else {
			return Ok(false);
		};
		if key.is_empty() {
			return Ok(false);
		}
		let mut cx = self.contexts.checkout();
		let bytes = self.codec(mode).encode(&mut cx, graph)?;
		tracing::trace!(key, bytes = bytes.len(), %mode, "put");
		store.put(key, bytes);
		Ok(true)
	}

	/// Load an object graph. When `expected` is given, a unit whose root has
	/// another type identifier fails with [`Error::TypeMismatch`].
	pub fn get_graph(&self, key: &str, expected: Option<&str>) -> Result<Option<ObjectGraph>> {
		self.get_graph_in(self.mode(), key, expected)
	}

	pub fn get_graph_in(
		&self,
		mode: CodecMode,
		key: &str,
		expected: Option<&str>,
	) -> Result<Option<ObjectGraph>> {
		let Some(store) = &self.store else {
			return Ok(None);
		};
		let bytes = match store.get(key) {
			Some(bytes) if !bytes.is_empty() => bytes,
			_ => {
				tracing::trace!(key, %mode, "get miss");
				return Ok(None);
			}
		};
		tracing::trace!(key, bytes = bytes.len(), %mode, "get");
		let mut cx = self.contexts.checkout();
		self.codec(mode).decode(&mut cx, &bytes, expected).map(Some)
	}

	/// Encode `value` with the active codec as standard base64.
	pub fn encode_to_string<T: Reflect>(&self, value: &T) -> Result<String> {
		T::register(&mut Registration::new(&self.shapes));
		let graph = GraphBuilder::build(value);
		let mut cx = self.contexts.checkout();
		let bytes = self.codec(self.mode()).encode(&mut cx, &graph)?;
		Ok(STANDARD.encode(bytes))
	}

	/// Inverse of [`encode_to_string`](Self::encode_to_string). Text that is
	/// not valid base64 is reported as [`Error::Corruption`].
	pub fn decode_from_string<T: Reflect>(&self, text: &str) -> Result<T> {
		let bytes = STANDARD
			.decode(text.trim())
			.map_err(|e| Error::corrupt(format!("invalid base64: {e}")))?;
		T::register(&mut Registration::new(&self.shapes));
		let mut cx = self.contexts.checkout();
		let graph = self.codec(self.mode()).decode(&mut cx, &bytes, T::root_type())?;
		Reifier::materialize(&graph)
	}

	pub fn delete(&self, key: &str) {
		if let Some(store) = &self.store {
			store.delete(key);
		}
	}

	pub fn clear(&self) {
		if let Some(store) = &self.store {
			store.clear();
		}
	}

	pub fn set_capacity(&self, bytes: usize) {
		if let Some(store) = &self.store {
			store.set_capacity(bytes);
		}
	}
}

impl fmt::Debug for HostCache {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostCache")
			.field("available", &self.is_available())
			.field("mode", &self.mode())
			.field("shapes", &self.shapes.len())
			.field("contexts", &self.contexts)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;
	use crate::store::MemoryStore;
	use crate::value::{Object, Value};

	#[derive(Debug, Clone, PartialEq)]
	struct Point {
		x: i32,
		label: String,
	}

	crate::reflect_struct!(Point as "demo.Point" { x: i32, label: String });

	#[derive(Debug, Clone, PartialEq)]
	struct Line {
		from: Point,
		to: Point,
	}

	crate::reflect_struct!(Line as "demo.Line" { from: Point, to: Point });

	fn cache_with_store() -> (HostCache, Arc<MemoryStore>) {
		let store = Arc::new(MemoryStore::new(1 << 20));
		let backend = store.clone();
		let cache = HostCacheBuilder::new(1 << 20)
			.store(backend)
			.build();
		(cache, store)
	}

	#[test]
	fn test_put_then_get() {
		let cache = HostCache::new(1 << 20);
		let point = Point {
			x: 1,
			label: "s".into(),
		};
		assert!(cache.put_object("p", Some(&point)).unwrap());
		assert_eq!(cache.get_object::<Point>("p").unwrap(), Some(point));
	}

	#[test]
	fn test_missing_key_is_none() {
		let cache = HostCache::new(1 << 20);
		assert_eq!(cache.get_object::<Point>("missing").unwrap(), None);
	}

	#[test]
	fn test_put_none_does_not_touch_store() {
		let (cache, store) = cache_with_store();
		assert!(!cache.put_object::<Point>("k", None).unwrap());
		assert!(!store.contains("k"));
		assert!(store.is_empty());
	}

	#[test]
	fn test_empty_key_is_a_no_op() {
		let (cache, store) = cache_with_store();
		assert!(!cache.put_object("", Some(&1_i32)).unwrap());
		assert!(store.is_empty());
	}

	#[test]
	fn test_empty_entry_reads_as_none() {
		let (cache, store) = cache_with_store();
		store.put("blank", &[]);
		assert_eq!(cache.get_object::<Point>("blank").unwrap(), None);
	}

	#[test]
	fn test_nested_struct_registers_field_types() {
		let cache = HostCache::new(1 << 20);
		let line = Line {
			from: Point {
				x: 0,
				label: "a".into(),
			},
			to: Point {
				x: 5,
				label: "b".into(),
			},
		};
		assert!(cache.put_object("line", Some(&line)).unwrap());
		assert!(cache.shapes().contains("demo.Point"));
		assert_eq!(cache.get_object::<Line>("line").unwrap(), Some(line));
	}

	#[test]
	fn test_type_mismatch() {
		let cache = HostCache::new(1 << 20);
		let point = Point {
			x: 1,
			label: "s".into(),
		};
		cache.put_object("p", Some(&point)).unwrap();
		assert_eq!(
			cache.get_object::<Line>("p").unwrap_err(),
			Error::mismatch("demo.Line", "demo.Point")
		);
	}

	#[test]
	fn test_mode_switch_applies_to_later_calls() {
		let cache = HostCache::new(1 << 20);
		assert_eq!(cache.mode(), CodecMode::Structural);
		cache.put_object("s", Some(&7_i64)).unwrap();

		cache.set_mode(CodecMode::GraphAware);
		cache.put_object("g", Some(&7_i64)).unwrap();
		assert_eq!(cache.get_object::<i64>("g").unwrap(), Some(7));
		// Written structurally, read with the graph-aware codec
		assert!(matches!(cache.get_object::<i64>("s"), Err(Error::Corruption(_))));
		assert_eq!(cache.get_object_in::<i64>(CodecMode::Structural, "s").unwrap(), Some(7));
	}

	#[test]
	fn test_collections_round_trip() {
		let cache = HostCache::new(1 << 20);
		let mut map = BTreeMap::new();
		map.insert("a".to_owned(), vec![1_u16, 2, 3]);
		map.insert("b".to_owned(), Vec::new());
		for mode in [CodecMode::Structural, CodecMode::GraphAware] {
			cache.put_object_in(mode, "m", Some(&map)).unwrap();
			assert_eq!(
				cache.get_object_in::<BTreeMap<String, Vec<u16>>>(mode, "m").unwrap(),
				Some(map.clone())
			);
		}
	}

	#[test]
	fn test_graph_entry_points() {
		let cache = HostCache::new(1 << 20);
		cache.set_mode(CodecMode::GraphAware);
		let mut graph = ObjectGraph::new();
		let id = graph.reserve();
		graph.fill(id, Object::List(vec![Value::Ref(id)]));
		graph.set_root(Value::Ref(id));

		assert!(cache.put_graph("cyc", &graph).unwrap());
		let loaded = cache.get_graph("cyc", Some("list")).unwrap().unwrap();
		assert_eq!(loaded, graph);
	}

	#[test]
	fn test_base64_helpers() {
		let cache = HostCache::new(1 << 20);
		let point = Point {
			x: -3,
			label: "b64".into(),
		};
		let text = cache.encode_to_string(&point).unwrap();
		assert_eq!(cache.decode_from_string::<Point>(&text).unwrap(), point);
		assert!(matches!(
			cache.decode_from_string::<Point>("not base64!"),
			Err(Error::Corruption(_))
		));
	}

	#[test]
	fn test_delete_and_clear() {
		let cache = HostCache::new(1 << 20);
		cache.put_object("a", Some(&1_i32)).unwrap();
		cache.put_object("b", Some(&2_i32)).unwrap();
		cache.delete("a");
		assert_eq!(cache.get_object::<i32>("a").unwrap(), None);
		cache.clear();
		assert_eq!(cache.get_object::<i32>("b").unwrap(), None);
	}

	#[test]
	fn test_degraded_cache() {
		let cache = HostCacheBuilder::new(1 << 20)
			.backend(|_| Err(Error::Unavailable("native library missing".into())))
			.build();
		assert!(!cache.is_available());
		assert!(!cache.put_object("k", Some(&1_i32)).unwrap());
		assert_eq!(cache.get_object::<i32>("k").unwrap(), None);
		cache.delete("k");
		cache.clear();
		cache.set_capacity(10);
	}
}
