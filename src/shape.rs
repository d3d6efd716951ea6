//! Per-type encoding metadata, built lazily and memoised for the lifetime of
//! the cache.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::value::Value;

/// How a field is written.
///
/// Primitive kinds go out untagged since the shape already says what they
/// are. `Dynamic` fields hold any value and are written tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
	Bool,
	I32,
	I64,
	F32,
	F64,
	Char,
	Str,
	Dynamic,
}

impl FieldKind {
	/// The value a field of this kind holds in zero-initialised storage.
	pub fn zero_value(self) -> Value {
		match self {
			FieldKind::Bool => Value::Bool(false),
			FieldKind::I32 => Value::I32(0),
			FieldKind::I64 => Value::I64(0),
			FieldKind::F32 => Value::F32(0.0),
			FieldKind::F64 => Value::F64(0.0),
			FieldKind::Char => Value::Char('\0'),
			FieldKind::Str => Value::Str(String::new()),
			FieldKind::Dynamic => Value::Null,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			FieldKind::Bool => "bool",
			FieldKind::I32 => "i32",
			FieldKind::I64 => "i64",
			FieldKind::F32 => "f32",
			FieldKind::F64 => "f64",
			FieldKind::Char => "char",
			FieldKind::Str => "string",
			FieldKind::Dynamic => "dynamic",
		}
	}
}

impl fmt::Display for FieldKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldShape {
	name: String,
	kind: FieldKind,
	transient: bool,
}

impl FieldShape {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> FieldKind {
		self.kind
	}

	/// Transient fields are never written; on decode they keep whatever the
	/// instantiator produced.
	pub fn is_transient(&self) -> bool {
		self.transient
	}
}

/// How a decoder obtains a fresh instance before populating its fields.
#[derive(Clone, Copy)]
pub enum Instantiator {
	/// Run the type's no-argument constructor; yields initial field values in
	/// shape order. Values must be scalars.
	Constructor(fn() -> Vec<Value>),
	/// Zero-initialised storage without running any constructor.
	Bypass,
	/// The type cannot be instantiated. Decoding it fails.
	Unsupported,
}

impl Instantiator {
	/// Initial field values for a new instance of `shape`.
	pub(crate) fn instantiate(&self, shape: &TypeShape) -> Result<Vec<Value>> {
		match self {
			Instantiator::Constructor(construct) => {
				let values = construct();
				if values.len() != shape.fields.len() {
					return Err(Error::unsupported(format!(
						"constructor of {} produced {} fields, shape declares {}",
						shape.name,
						values.len(),
						shape.fields.len()
					)));
				}
				if values.iter().any(|v| matches!(v, Value::Ref(_))) {
					return Err(Error::unsupported(format!(
						"constructor of {} produced a reference",
						shape.name
					)));
				}
				Ok(values)
			}
			Instantiator::Bypass => Ok(shape.fields.iter().map(|f| f.kind.zero_value()).collect()),
			Instantiator::Unsupported => {
				Err(Error::unsupported(format!("{} cannot be instantiated", shape.name)))
			}
		}
	}
}

impl PartialEq for Instantiator {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Instantiator::Constructor(a), Instantiator::Constructor(b)) => std::ptr::fn_addr_eq(*a, *b),
			(Instantiator::Bypass, Instantiator::Bypass) => true,
			(Instantiator::Unsupported, Instantiator::Unsupported) => true,
			_ => false,
		}
	}
}

impl fmt::Debug for Instantiator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Instantiator::Constructor(_) => f.write_str("Constructor"),
			Instantiator::Bypass => f.write_str("Bypass"),
			Instantiator::Unsupported => f.write_str("Unsupported"),
		}
	}
}

/// Ordered field list plus instantiation strategy for one runtime type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeShape {
	name: Arc<str>,
	fields: Vec<FieldShape>,
	instantiator: Instantiator,
}

impl TypeShape {
	pub fn builder(name: impl Into<Arc<str>>) -> TypeShapeBuilder {
		TypeShapeBuilder {
			shape: TypeShape {
				name: name.into(),
				fields: Vec::new(),
				instantiator: Instantiator::Bypass,
			},
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn name_arc(&self) -> &Arc<str> {
		&self.name
	}

	pub fn fields(&self) -> &[FieldShape] {
		&self.fields
	}

	pub fn instantiator(&self) -> Instantiator {
		self.instantiator
	}

	pub fn field_index(&self, name: &str) -> Option<usize> {
		self.fields.iter().position(|f| f.name == name)
	}
}

/// Builder for [`TypeShape`]; fields are kept in the order they are added.
#[derive(Debug)]
pub struct TypeShapeBuilder {
	shape: TypeShape,
}

impl TypeShapeBuilder {
	pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
		self.shape.fields.push(FieldShape {
			name: name.into(),
			kind,
			transient: false,
		});
		self
	}

	/// A field that is skipped by every codec.
	pub fn transient(mut self, name: impl Into<String>) -> Self {
		self.shape.fields.push(FieldShape {
			name: name.into(),
			kind: FieldKind::Dynamic,
			transient: true,
		});
		self
	}

	pub fn constructor(mut self, construct: fn() -> Vec<Value>) -> Self {
		self.shape.instantiator = Instantiator::Constructor(construct);
		self
	}

	pub fn instantiator(mut self, instantiator: Instantiator) -> Self {
		self.shape.instantiator = instantiator;
		self
	}

	pub fn build(self) -> TypeShape {
		self.shape
	}
}

/// A Rust type with a fixed shape, usually implemented by
/// [`reflect_struct!`](crate::reflect_struct).
pub trait Shaped {
	const TYPE_NAME: &'static str;

	fn build_shape() -> TypeShape;

	/// Register the shapes of every type reachable through the fields.
	fn register_fields(cx: &mut Registration<'_>);
}

struct Slot {
	shape: Arc<TypeShape>,
	/// Set once every shape reachable from this one has been published
	complete: AtomicBool,
}

/// Memoised [`TypeShape`]s keyed by type name.
///
/// Lookups take a read lock. A miss builds the shape outside any lock and
/// publishes it with first-publish-wins, so two threads racing on the same
/// type may both build it but every caller sees the same `Arc`.
pub struct ShapeCache {
	slots: RwLock<HashMap<Arc<str>, Arc<Slot>, RandomState>>,
}

impl Default for ShapeCache {
	fn default() -> Self {
		Self::new()
	}
}

impl ShapeCache {
	pub fn new() -> Self {
		Self {
			slots: RwLock::new(HashMap::with_hasher(RandomState::new())),
		}
	}

	/// Shape of `T`, building and publishing it (and the shapes of its field
	/// types) on first use.
	pub fn shape_for<T: Shaped>(&self) -> Arc<TypeShape> {
		Registration::new(self).visit::<T>()
	}

	pub fn get(&self, name: &str) -> Option<Arc<TypeShape>> {
		self.slots.read().get(name).map(|slot| slot.shape.clone())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.slots.read().contains_key(name)
	}

	/// Publish a hand-built shape for a dynamic type. If a shape with the
	/// same name already exists it wins and is returned.
	pub fn declare(&self, shape: TypeShape) -> Arc<TypeShape> {
		let slot = self.publish(shape);
		slot.complete.store(true, Ordering::Release);
		slot.shape.clone()
	}

	pub fn len(&self) -> usize {
		self.slots.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn slot(&self, name: &str) -> Option<Arc<Slot>> {
		self.slots.read().get(name).cloned()
	}

	fn publish(&self, shape: TypeShape) -> Arc<Slot> {
		let mut slots = self.slots.write();
		if let Some(existing) = slots.get(&*shape.name) {
			return existing.clone();
		}
		tracing::debug!(type_name = &*shape.name, fields = shape.fields.len(), "built type shape");
		let slot = Arc::new(Slot {
			shape: Arc::new(shape),
			complete: AtomicBool::new(false),
		});
		slots.insert(slot.shape.name.clone(), slot.clone());
		slot
	}
}

impl fmt::Debug for ShapeCache {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShapeCache").field("shapes", &self.len()).finish()
	}
}

/// One registration walk over a static type tree.
///
/// Each type is published before its field types are visited, and visited
/// at most once per walk, so recursive types terminate. Types are marked
/// complete only when the outermost visit returns, since a recursive type
/// still has fields of its ancestors left to register when its own fields
/// are done.
pub struct Registration<'c> {
	cache: &'c ShapeCache,
	visited: HashSet<&'static str, RandomState>,
	pending: Vec<Arc<Slot>>,
	depth: usize,
}

impl<'c> Registration<'c> {
	pub(crate) fn new(cache: &'c ShapeCache) -> Self {
		Self {
			cache,
			visited: HashSet::with_hasher(RandomState::new()),
			pending: Vec::new(),
			depth: 0,
		}
	}

	pub fn cache(&self) -> &'c ShapeCache {
		self.cache
	}

	/// Publish `T` if needed and make sure everything it reaches is published.
	pub fn visit<T: Shaped>(&mut self) -> Arc<TypeShape> {
		let slot = match self.cache.slot(T::TYPE_NAME) {
			Some(slot) => slot,
			None => self.cache.publish(T::build_shape()),
		};
		if slot.complete.load(Ordering::Acquire) || !self.visited.insert(T::TYPE_NAME) {
			return slot.shape.clone();
		}
		self.depth += 1;
		T::register_fields(self);
		self.depth -= 1;
		self.pending.push(slot.clone());
		if self.depth == 0 {
			for done in self.pending.drain(..) {
				done.complete.store(true, Ordering::Release);
			}
		}
		slot.shape.clone()
	}
}
