//! Conversion between ordinary Rust values and [`ObjectGraph`]s.
//!
//! Scalars map to scalar [`Value`]s, collections and structs become arena
//! objects, and `Arc<T>` keeps its sharing: two fields holding the same `Arc`
//! reflect to one object and reify back to one `Arc`.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use ahash::RandomState;

use crate::error::{Error, Result};
use crate::shape::{FieldKind, Registration};
use crate::special::Special;
use crate::value::{Object, ObjectGraph, ObjectId, StructObject, Value};

/// A Rust type that can be stored through the cache facade.
///
/// Implemented for primitives, `String`, `Option`, `Box`, `Arc`, `Vec`, the
/// std maps and sets, and for structs via [`reflect_struct!`](crate::reflect_struct).
pub trait Reflect: Sized {
	/// How a struct field of this type is written.
	const KIND: FieldKind = FieldKind::Dynamic;

	/// Type identifier a decoded root must carry, when the type has a fixed
	/// one.
	fn root_type() -> Option<&'static str> {
		None
	}

	/// Register the shapes this type needs.
	fn register(_cx: &mut Registration<'_>) {}

	fn reflect(&self, g: &mut GraphBuilder) -> Value;

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self>;
}

/// Accumulates objects while a value is reflected.
#[derive(Debug, Default)]
pub struct GraphBuilder {
	graph: ObjectGraph,
	shared: HashMap<usize, ObjectId, RandomState>,
}

impl GraphBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reflect `value` into a fresh graph rooted at it.
	pub fn build<T: Reflect>(value: &T) -> ObjectGraph {
		let mut g = Self::new();
		let root = value.reflect(&mut g);
		g.finish(root)
	}

	pub fn alloc(&mut self, object: Object) -> Value {
		Value::Ref(self.graph.alloc(object))
	}

	pub fn alloc_struct(&mut self, type_name: &'static str, fields: Vec<Value>) -> Value {
		self.alloc(Object::Struct(StructObject::new(type_name, fields)))
	}

	pub fn finish(mut self, root: Value) -> ObjectGraph {
		self.graph.set_root(root);
		self.graph
	}
}

/// Rebuilds Rust values from a decoded graph.
pub struct Reifier<'g> {
	graph: &'g ObjectGraph,
	shared: HashMap<ObjectId, Arc<dyn Any + Send + Sync>, RandomState>,
	active: Vec<ObjectId>,
}

impl<'g> Reifier<'g> {
	pub fn new(graph: &'g ObjectGraph) -> Self {
		Self {
			graph,
			shared: HashMap::default(),
			active: Vec::new(),
		}
	}

	/// Reify the root of `graph` as a `T`.
	pub fn materialize<T: Reflect>(graph: &'g ObjectGraph) -> Result<T> {
		T::reify(graph.root(), &mut Reifier::new(graph))
	}

	pub fn graph(&self) -> &'g ObjectGraph {
		self.graph
	}

	pub fn mismatch(&self, expected: &str, found: &Value) -> Error {
		Error::mismatch(expected, self.graph.type_name_of(found))
	}

	fn object(&self, value: &Value, expected: &str) -> Result<(ObjectId, &'g Object)> {
		let id = value.as_ref_id().ok_or_else(|| self.mismatch(expected, value))?;
		let object = self
			.graph
			.get(id)
			.ok_or_else(|| Error::corrupt(format!("reference {id} has no object")))?;
		Ok((id, object))
	}

	/// Reify the struct `value` references. `f` receives its field values in
	/// shape order.
	///
	/// Owned Rust values cannot express a cycle, so reaching a struct that is
	/// already being reified fails with [`Error::UnsupportedShape`].
	pub fn reify_struct<T>(
		&mut self,
		value: &Value,
		type_name: &str,
		f: impl FnOnce(&'g [Value], &mut Self) -> Result<T>,
	) -> Result<T> {
		let (id, object) = self.object(value, type_name)?;
		let fields = match object {
			Object::Struct(s) if s.type_name() == type_name => s.fields(),
			other => return Err(Error::mismatch(type_name, other.type_name())),
		};
		if self.active.contains(&id) {
			return Err(Error::unsupported(format!(
				"cycle through {type_name} {id} cannot be materialised as an owned value"
			)));
		}
		self.active.push(id);
		let out = f(fields, self);
		self.active.pop();
		out
	}

	/// Elements of a list-like object: plain lists, fixed and empty lists,
	/// singleton lists, sub-range views and list wrappers.
	pub fn list_items(&self, value: &Value) -> Result<&'g [Value]> {
		let mut chain = WrapperTrail::default();
		let mut ranges = Vec::new();
		let mut current = value;
		let items: &'g [Value] = loop {
			let object = chain.step(self, current, "list")?;
			match object {
				Object::List(items) => break items.as_slice(),
				Object::Special(Special::FixedList(items)) => break items.as_slice(),
				Object::Special(Special::EmptyList) => break &[][..],
				Object::Special(Special::SingletonList(item)) => break std::slice::from_ref(item),
				Object::Special(Special::SubList {
					backing,
					from,
					to,
				}) => {
					ranges.push((*from, *to));
					current = backing;
				}
				Object::Special(Special::Synchronized(_, inner) | Special::Unmodifiable(_, inner)) => {
					current = inner;
				}
				other => return Err(Error::mismatch("list", other.type_name())),
			}
		};
		// Innermost view applies first
		ranges.iter().rev().try_fold(items, |items, &(from, to)| {
			items.get(from..to).ok_or_else(|| {
				Error::corrupt(format!("sub-list range {from}..{to} exceeds its backing list"))
			})
		})
	}

	/// Elements of a set-like object.
	pub fn set_items(&self, value: &Value) -> Result<&'g [Value]> {
		let mut chain = WrapperTrail::default();
		let mut current = value;
		loop {
			match chain.step(self, current, "set")? {
				Object::Set(items) => return Ok(items),
				Object::Special(Special::EmptySet) => return Ok(&[]),
				Object::Special(Special::SingletonSet(item)) => return Ok(std::slice::from_ref(item)),
				Object::Special(Special::Synchronized(_, inner) | Special::Unmodifiable(_, inner)) => {
					current = inner;
				}
				other => return Err(Error::mismatch("set", other.type_name())),
			}
		}
	}

	/// Entries of a map-like object.
	pub fn map_entries(&self, value: &Value) -> Result<Vec<(&'g Value, &'g Value)>> {
		let mut chain = WrapperTrail::default();
		let mut current = value;
		loop {
			match chain.step(self, current, "map")? {
				Object::Map(entries) => return Ok(entries.iter().map(|(k, v)| (k, v)).collect()),
				Object::Special(Special::EmptyMap) => return Ok(Vec::new()),
				Object::Special(Special::SingletonMap(k, v)) => return Ok(vec![(k, v)]),
				Object::Special(Special::Synchronized(_, inner) | Special::Unmodifiable(_, inner)) => {
					current = inner;
				}
				other => return Err(Error::mismatch("map", other.type_name())),
			}
		}
	}
}

/// Objects passed through while unwrapping views and wrappers down to their
/// contents.
#[derive(Default)]
struct WrapperTrail {
	seen: HashSet<ObjectId, RandomState>,
}

impl WrapperTrail {
	fn step<'g>(&mut self, r: &Reifier<'g>, value: &Value, expected: &str) -> Result<&'g Object> {
		let (id, object) = r.object(value, expected)?;
		if !self.seen.insert(id) {
			return Err(Error::unsupported(format!(
				"{} {id} wraps itself and has no {expected} contents",
				object.type_name()
			)));
		}
		Ok(object)
	}
}

/// Next field value of a struct being reified.
pub fn next_field<'g>(fields: &mut std::slice::Iter<'g, Value>, type_name: &str) -> Result<&'g Value> {
	fields
		.next()
		.ok_or_else(|| Error::corrupt(format!("{type_name} has fewer fields than declared")))
}

impl Reflect for bool {
	const KIND: FieldKind = FieldKind::Bool;

	fn reflect(&self, _g: &mut GraphBuilder) -> Value {
		Value::Bool(*self)
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		match value {
			Value::Bool(v) => Ok(*v),
			other => Err(r.mismatch("bool", other)),
		}
	}
}

/// Integers narrower than 32 bits travel as `i32`, wider ones as `i64`.
/// Unsigned 64-bit values are bit-cast.
macro_rules! reflect_int {
	($($ty:ty => $kind:ident($wire:ty)),* $(,)?) => {$(
		impl Reflect for $ty {
			const KIND: FieldKind = FieldKind::$kind;

			fn reflect(&self, _g: &mut GraphBuilder) -> Value {
				Value::$kind(*self as $wire)
			}

			fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
				let wide = match value {
					Value::I32(v) => i64::from(*v),
					Value::I64(v) => *v,
					other => return Err(r.mismatch(stringify!($ty), other)),
				};
				reify_int::<$ty>(wide)
			}
		}
	)*};
}

trait FromWire: Sized {
	fn from_wire(raw: i64) -> Option<Self>;
}

macro_rules! from_wire_checked {
	($($ty:ty),*) => {$(
		impl FromWire for $ty {
			fn from_wire(raw: i64) -> Option<Self> {
				<$ty>::try_from(raw).ok()
			}
		}
	)*};
}

from_wire_checked!(i8, i16, i32, i64, u8, u16, u32);

impl FromWire for u64 {
	fn from_wire(raw: i64) -> Option<Self> {
		Some(raw as u64)
	}
}

impl FromWire for usize {
	fn from_wire(raw: i64) -> Option<Self> {
		usize::try_from(raw as u64).ok()
	}
}

fn reify_int<T: FromWire>(raw: i64) -> Result<T> {
	T::from_wire(raw).ok_or_else(|| {
		Error::mismatch(std::any::type_name::<T>(), format!("integer {raw} out of range"))
	})
}

reflect_int! {
	i8 => I32(i32),
	i16 => I32(i32),
	i32 => I32(i32),
	u8 => I32(i32),
	u16 => I32(i32),
	i64 => I64(i64),
	u32 => I64(i64),
	u64 => I64(i64),
	usize => I64(i64),
}

impl Reflect for f32 {
	const KIND: FieldKind = FieldKind::F32;

	fn reflect(&self, _g: &mut GraphBuilder) -> Value {
		Value::F32(*self)
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		match value {
			Value::F32(v) => Ok(*v),
			other => Err(r.mismatch("f32", other)),
		}
	}
}

impl Reflect for f64 {
	const KIND: FieldKind = FieldKind::F64;

	fn reflect(&self, _g: &mut GraphBuilder) -> Value {
		Value::F64(*self)
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		match value {
			Value::F64(v) => Ok(*v),
			other => Err(r.mismatch("f64", other)),
		}
	}
}

impl Reflect for char {
	const KIND: FieldKind = FieldKind::Char;

	fn reflect(&self, _g: &mut GraphBuilder) -> Value {
		Value::Char(*self)
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		match value {
			Value::Char(v) => Ok(*v),
			other => Err(r.mismatch("char", other)),
		}
	}
}

impl Reflect for String {
	const KIND: FieldKind = FieldKind::Str;

	fn reflect(&self, _g: &mut GraphBuilder) -> Value {
		Value::Str(self.clone())
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		match value {
			Value::Str(v) => Ok(v.clone()),
			other => Err(r.mismatch("string", other)),
		}
	}
}

impl<T: Reflect> Reflect for Option<T> {
	fn register(cx: &mut Registration<'_>) {
		T::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		match self {
			Some(v) => v.reflect(g),
			None => Value::Null,
		}
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		match value {
			Value::Null => Ok(None),
			other => T::reify(other, r).map(Some),
		}
	}
}

impl<T: Reflect> Reflect for Box<T> {
	const KIND: FieldKind = T::KIND;

	fn root_type() -> Option<&'static str> {
		T::root_type()
	}

	fn register(cx: &mut Registration<'_>) {
		T::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		(**self).reflect(g)
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		T::reify(value, r).map(Box::new)
	}
}

impl<T: Reflect + Send + Sync + 'static> Reflect for Arc<T> {
	const KIND: FieldKind = T::KIND;

	fn root_type() -> Option<&'static str> {
		T::root_type()
	}

	fn register(cx: &mut Registration<'_>) {
		T::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		let addr = Arc::as_ptr(self) as *const () as usize;
		if let Some(id) = g.shared.get(&addr) {
			return Value::Ref(*id);
		}
		let value = (**self).reflect(g);
		if let Value::Ref(id) = value {
			g.shared.insert(addr, id);
		}
		value
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		let Value::Ref(id) = value else {
			return T::reify(value, r).map(Arc::new);
		};
		if let Some(shared) = r.shared.get(id) {
			if let Ok(shared) = shared.clone().downcast::<T>() {
				return Ok(shared);
			}
		}
		let reified = Arc::new(T::reify(value, r)?);
		r.shared.insert(*id, reified.clone());
		Ok(reified)
	}
}

impl<T: Reflect> Reflect for Vec<T> {
	fn register(cx: &mut Registration<'_>) {
		T::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		let items = self.iter().map(|item| item.reflect(g)).collect();
		g.alloc(Object::List(items))
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		let items = r.list_items(value)?;
		items.iter().map(|item| T::reify(item, r)).collect()
	}
}

impl<K, V, S> Reflect for HashMap<K, V, S>
where
	K: Reflect + Eq + Hash,
	V: Reflect,
	S: BuildHasher + Default,
{
	fn register(cx: &mut Registration<'_>) {
		K::register(cx);
		V::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		let entries = self.iter().map(|(k, v)| (k.reflect(g), v.reflect(g))).collect();
		g.alloc(Object::Map(entries))
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		let entries = r.map_entries(value)?;
		entries.into_iter().map(|(k, v)| Ok((K::reify(k, r)?, V::reify(v, r)?))).collect()
	}
}

impl<K: Reflect + Ord, V: Reflect> Reflect for BTreeMap<K, V> {
	fn register(cx: &mut Registration<'_>) {
		K::register(cx);
		V::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		let entries = self.iter().map(|(k, v)| (k.reflect(g), v.reflect(g))).collect();
		g.alloc(Object::Map(entries))
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		let entries = r.map_entries(value)?;
		entries.into_iter().map(|(k, v)| Ok((K::reify(k, r)?, V::reify(v, r)?))).collect()
	}
}

impl<T, S> Reflect for HashSet<T, S>
where
	T: Reflect + Eq + Hash,
	S: BuildHasher + Default,
{
	fn register(cx: &mut Registration<'_>) {
		T::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		let items = self.iter().map(|item| item.reflect(g)).collect();
		g.alloc(Object::Set(items))
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		let items = r.set_items(value)?;
		items.iter().map(|item| T::reify(item, r)).collect()
	}
}

impl<T: Reflect + Ord> Reflect for BTreeSet<T> {
	fn register(cx: &mut Registration<'_>) {
		T::register(cx);
	}

	fn reflect(&self, g: &mut GraphBuilder) -> Value {
		let items = self.iter().map(|item| item.reflect(g)).collect();
		g.alloc(Object::Set(items))
	}

	fn reify(value: &Value, r: &mut Reifier<'_>) -> Result<Self> {
		let items = r.set_items(value)?;
		items.iter().map(|item| T::reify(item, r)).collect()
	}
}

/// Implement [`Shaped`](crate::Shaped) and [`Reflect`](crate::Reflect) for a
/// struct with named fields.
///
/// Persistent fields are listed with their types, in the order they should
/// be encoded. Fields named in the optional `transient` block are never
/// encoded and come back as `Default::default()`.
///
/// ```
/// use host_cache::reflect_struct;
///
/// #[derive(Debug, PartialEq)]
/// struct Session {
///     user: String,
///     hits: u32,
///     scratch: Vec<u8>,
/// }
///
/// reflect_struct! {
///     Session as "demo.Session" {
///         user: String,
///         hits: u32,
///     }
///     transient { scratch }
/// }
/// ```
#[macro_export]
macro_rules! reflect_struct {
	(
		$ty:ident as $name:literal {
			$($field:ident : $fty:ty),* $(,)?
		}
		$(transient { $($skip:ident),* $(,)? })?
	) => {
		impl $crate::Shaped for $ty {
			const TYPE_NAME: &'static str = $name;

			fn build_shape() -> $crate::TypeShape {
				$crate::TypeShape::builder($name)
					$(.field(stringify!($field), <$fty as $crate::Reflect>::KIND))*
					$($(.transient(stringify!($skip)))*)?
					.build()
			}

			fn register_fields(cx: &mut $crate::Registration<'_>) {
				$(<$fty as $crate::Reflect>::register(cx);)*
			}
		}

		impl $crate::Reflect for $ty {
			fn root_type() -> ::core::option::Option<&'static str> {
				::core::option::Option::Some($name)
			}

			fn register(cx: &mut $crate::Registration<'_>) {
				cx.visit::<Self>();
			}

			fn reflect(&self, g: &mut $crate::GraphBuilder) -> $crate::Value {
				let fields = ::std::vec![
					$(<$fty as $crate::Reflect>::reflect(&self.$field, g),)*
					$($({ let _ = stringify!($skip); $crate::Value::Null },)*)?
				];
				g.alloc_struct($name, fields)
			}

			fn reify(value: &$crate::Value, r: &mut $crate::Reifier<'_>) -> $crate::Result<Self> {
				r.reify_struct(value, $name, |fields, r| {
					#[allow(unused_mut, unused_variables)]
					let mut fields = fields.iter();
					::core::result::Result::Ok(Self {
						$($field: <$fty as $crate::Reflect>::reify(
							$crate::__private::next_field(&mut fields, $name)?,
							r,
						)?,)*
						$($($skip: ::core::default::Default::default(),)*)?
					})
				})
			}
		}
	};
}
