//! Dynamic object model the codecs operate on.
//!
//! Objects live in an append-only arena ([`ObjectGraph`]) and point at each
//! other through dense [`ObjectId`] indices. Identity is the index: two fields
//! holding the same `ObjectId` reference the same object, and a cycle is just
//! an index that leads back to itself.

use std::fmt;
use std::sync::Arc;

use crate::special::Special;

/// Index of an object inside an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

impl fmt::Display for ObjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A field, element or root value.
///
/// Scalars are stored inline; everything with identity goes through
/// [`Value::Ref`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	I32(i32),
	I64(i64),
	F32(f32),
	F64(f64),
	Char(char),
	Str(String),
	Bytes(Vec<u8>),
	Ref(ObjectId),
}

impl Value {
	/// Built-in type name of a scalar, or `"ref"` for references.
	pub fn kind_name(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::I32(_) => "i32",
			Value::I64(_) => "i64",
			Value::F32(_) => "f32",
			Value::F64(_) => "f64",
			Value::Char(_) => "char",
			Value::Str(_) => "string",
			Value::Bytes(_) => "bytes",
			Value::Ref(_) => "ref",
		}
	}

	pub fn as_ref_id(&self) -> Option<ObjectId> {
		match self {
			Value::Ref(id) => Some(*id),
			_ => None,
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Str(value.to_owned())
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::I32(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::I64(value)
	}
}

impl From<ObjectId> for Value {
	fn from(value: ObjectId) -> Self {
		Value::Ref(value)
	}
}

/// Instance of a user-declared type: its type name plus one value per
/// declared field, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructObject {
	type_name: Arc<str>,
	fields: Vec<Value>,
}

impl StructObject {
	pub fn new(type_name: impl Into<Arc<str>>, fields: Vec<Value>) -> Self {
		Self {
			type_name: type_name.into(),
			fields,
		}
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn fields(&self) -> &[Value] {
		&self.fields
	}

	pub fn field(&self, index: usize) -> Option<&Value> {
		self.fields.get(index)
	}

	pub fn set_field(&mut self, index: usize, value: Value) -> bool {
		match self.fields.get_mut(index) {
			Some(slot) => {
				*slot = value;
				true
			}
			None => false,
		}
	}
}

/// A heap object.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
	Struct(StructObject),
	List(Vec<Value>),
	Map(Vec<(Value, Value)>),
	Set(Vec<Value>),
	Special(Special),
}

impl Object {
	/// Type identifier as written into encoded units.
	pub fn type_name(&self) -> &str {
		match self {
			Object::Struct(s) => s.type_name(),
			Object::List(_) => "list",
			Object::Map(_) => "map",
			Object::Set(_) => "set",
			Object::Special(special) => special.kind_name(),
		}
	}

	/// Calls `f` with every value directly held by this object.
	pub fn for_each_value(&self, mut f: impl FnMut(&Value)) {
		match self {
			Object::Struct(s) => s.fields.iter().for_each(f),
			Object::List(items) | Object::Set(items) => items.iter().for_each(f),
			Object::Map(entries) => {
				for (k, v) in entries {
					f(k);
					f(v);
				}
			}
			Object::Special(special) => special.for_each_value(f),
		}
	}
}

/// Arena of objects plus the root value.
///
/// Slots can be reserved before they are filled so a decoder can hand out the
/// id of an object whose payload it has not read yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
	objects: Vec<Option<Object>>,
	root: Value,
}

impl Default for ObjectGraph {
	fn default() -> Self {
		Self::new()
	}
}

impl ObjectGraph {
	pub fn new() -> Self {
		Self {
			objects: Vec::new(),
			root: Value::Null,
		}
	}

	/// Graph holding a single scalar root.
	pub fn scalar(root: Value) -> Self {
		Self {
			objects: Vec::new(),
			root,
		}
	}

	/// Append an object and return its id.
	pub fn alloc(&mut self, object: Object) -> ObjectId {
		let id = self.next_id();
		self.objects.push(Some(object));
		id
	}

	/// Reserve a slot to be filled later with [`ObjectGraph::fill`].
	pub(crate) fn reserve(&mut self) -> ObjectId {
		let id = self.next_id();
		self.objects.push(None);
		id
	}

	pub(crate) fn fill(&mut self, id: ObjectId, object: Object) {
		if let Some(slot) = self.objects.get_mut(id.index()) {
			*slot = Some(object);
		}
	}

	fn next_id(&self) -> ObjectId {
		let index = u32::try_from(self.objects.len()).expect("object graph exceeds u32::MAX objects");
		ObjectId(index)
	}

	pub fn get(&self, id: ObjectId) -> Option<&Object> {
		self.objects.get(id.index()).and_then(Option::as_ref)
	}

	pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
		self.objects.get_mut(id.index()).and_then(Option::as_mut)
	}

	/// The object a value references, if it is a resolvable reference.
	pub fn resolve(&self, value: &Value) -> Option<&Object> {
		value.as_ref_id().and_then(|id| self.get(id))
	}

	pub fn root(&self) -> &Value {
		&self.root
	}

	pub fn set_root(&mut self, root: Value) {
		self.root = root;
	}

	/// The root's struct fields, when the root is a struct.
	pub fn root_struct(&self) -> Option<&StructObject> {
		match self.resolve(&self.root)? {
			Object::Struct(s) => Some(s),
			_ => None,
		}
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}

	/// Type identifier of a value: the object's type name for references,
	/// the scalar kind otherwise.
	pub fn type_name_of<'a>(&'a self, value: &'a Value) -> &'a str {
		match value {
			Value::Ref(id) => self.get(*id).map_or("dangling", Object::type_name),
			scalar => scalar.kind_name(),
		}
	}

	/// Check that every slot is filled, every reference points inside the
	/// arena and every sub-range view fits its backing list.
	pub fn validate(&self) -> std::result::Result<(), String> {
		let check = |value: &Value| -> std::result::Result<(), String> {
			match value {
				Value::Ref(id) if id.index() >= self.objects.len() => {
					Err(format!("reference {id} points past {} objects", self.objects.len()))
				}
				_ => Ok(()),
			}
		};

		check(&self.root)?;
		for (index, slot) in self.objects.iter().enumerate() {
			let Some(object) = slot else {
				return Err(format!("object #{index} was never materialised"));
			};
			let mut outcome = Ok(());
			object.for_each_value(|value| {
				if outcome.is_ok() {
					outcome = check(value);
				}
			});
			outcome?;

			if let Object::Special(Special::SubList {
				backing,
				from,
				to,
			}) = object
			{
				let len = match self.resolve(backing) {
					Some(Object::List(items)) => items.len(),
					Some(Object::Special(Special::FixedList(items))) => items.len(),
					_ => return Err(format!("sub-list #{index} is not backed by a list")),
				};
				if from > to || *to > len {
					return Err(format!(
						"sub-list #{index} range {from}..{to} exceeds backing length {len}"
					));
				}
			}
		}
		Ok(())
	}
}
