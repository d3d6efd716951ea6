//! Value walkers shared by both codecs.
//!
//! The structural and graph-aware codecs write the same value grammar. They
//! differ only in whether identity is shared: the graph-aware codec writes an
//! object seen before as a back-reference, the structural codec writes every
//! reference inline and rejects a reference back to an enclosing object.

use ahash::RandomState;
use hashbrown::HashMap;

use super::wire::{Reader, Writer};
use super::{
	MAX_DEPTH, ValueReader, ValueWriter, check_root, read_fields, read_scalar, tag, tag_name,
	write_fields, write_scalar,
};
use crate::error::{Error, Result};
use crate::shape::ShapeCache;
use crate::special::SpecialRegistry;
use crate::value::{Object, ObjectGraph, ObjectId, StructObject, Value};

pub(crate) struct Encoder<'a> {
	pub shapes: &'a ShapeCache,
	pub specials: &'a SpecialRegistry,
	pub graph: &'a ObjectGraph,
	pub out: &'a mut Writer,
	/// Graph-aware: every object written so far with its sequence number.
	/// Structural: the objects on the current path from the root.
	pub seen: &'a mut HashMap<ObjectId, u32, RandomState>,
	pub share: bool,
	pub codec: &'static str,
	pub depth: usize,
}

impl Encoder<'_> {
	fn write_object(&mut self, id: ObjectId) -> Result<()> {
		if let Some(seq) = self.seen.get(&id) {
			if !self.share {
				return Err(Error::unsupported(format!(
					"object {id} references itself; the {} codec cannot encode cycles",
					self.codec
				)));
			}
			self.out.u8(tag::BACKREF);
			self.out.varint(u64::from(*seq));
			return Ok(());
		}
		if self.depth >= MAX_DEPTH {
			return Err(Error::unsupported(format!(
				"object graph nests deeper than {MAX_DEPTH} levels"
			)));
		}

		// Recorded before the payload so a reference back to this object from
		// inside it is recognised
		let seq = self.seen.len() as u32;
		self.seen.insert(id, seq);
		self.depth += 1;
		let outcome = self.write_payload(id);
		self.depth -= 1;
		if !self.share {
			self.seen.remove(&id);
		}
		outcome
	}

	fn write_payload(&mut self, id: ObjectId) -> Result<()> {
		let graph = self.graph;
		let object = graph
			.get(id)
			.ok_or_else(|| Error::unsupported(format!("reference {id} has no object")))?;

		match object {
			Object::Struct(s) => {
				let shape = self.shapes.get(s.type_name()).ok_or_else(|| {
					Error::unsupported(format!("no shape registered for type {}", s.type_name()))
				})?;
				self.out.u8(tag::STRUCT);
				self.out.str(s.type_name());
				write_fields(self, &shape, s)
			}
			Object::List(items) => {
				self.out.u8(tag::LIST);
				self.write_items(items)
			}
			Object::Set(items) => {
				self.out.u8(tag::SET);
				self.write_items(items)
			}
			Object::Map(entries) => {
				self.out.u8(tag::MAP);
				self.out.count(entries.len());
				for (k, v) in entries {
					self.write_value(k)?;
					self.write_value(v)?;
				}
				Ok(())
			}
			Object::Special(special) => {
				let specials = self.specials;
				let descriptor = specials.find(special).ok_or_else(|| {
					Error::unsupported(format!(
						"{} has no encoding in the {} codec",
						special.kind_name(),
						self.codec
					))
				})?;
				self.out.u8(tag::SPECIAL);
				self.out.u8(descriptor.tag());
				descriptor.encode(special, self)
			}
		}
	}

	fn write_items(&mut self, items: &[Value]) -> Result<()> {
		self.out.count(items.len());
		items.iter().try_for_each(|item| self.write_value(item))
	}
}

impl ValueWriter for Encoder<'_> {
	fn wire(&mut self) -> &mut Writer {
		&mut *self.out
	}

	fn write_value(&mut self, value: &Value) -> Result<()> {
		match value {
			Value::Ref(id) => self.write_object(*id),
			scalar => {
				write_scalar(self.out, scalar);
				Ok(())
			}
		}
	}
}

pub(crate) struct Decoder<'a, 't> {
	pub shapes: &'a ShapeCache,
	pub specials: &'a SpecialRegistry,
	pub input: Reader<'a>,
	pub graph: ObjectGraph,
	/// Sequence number to object id, graph-aware mode only
	pub identity: Option<&'t mut Vec<ObjectId>>,
	pub codec: &'static str,
	pub depth: usize,
}

impl<'a> Decoder<'a, '_> {
	/// Read the root value, checking its type identifier against `expected`
	/// as soon as the identifier is known.
	pub fn read_root(&mut self, expected: Option<&str>) -> Result<Value> {
		let tag = self.input.u8()?;
		self.read_tagged(tag, expected)
	}

	fn read_tagged(&mut self, tag: u8, expected: Option<&str>) -> Result<Value> {
		match tag {
			tag::STRUCT => {
				let name = self.input.str()?;
				check_root(expected, &name)?;
				self.nested(|d| d.read_struct(&name))
			}
			tag::SPECIAL => {
				let code = self.input.u8()?;
				let specials = self.specials;
				let descriptor = specials.by_tag(code).ok_or_else(|| {
					Error::corrupt(format!("special tag {code} is not valid in a {} unit", self.codec))
				})?;
				check_root(expected, descriptor.name())?;
				self.nested(|d| {
					let id = d.register();
					let special = descriptor.decode(d)?;
					Ok(d.place(id, Object::Special(special)))
				})
			}
			tag::LIST | tag::SET | tag::MAP => {
				check_root(expected, tag_name(tag))?;
				self.nested(|d| d.read_collection(tag))
			}
			tag::BACKREF => {
				let Some(table) = self.identity.as_deref() else {
					return Err(Error::corrupt(format!("back-reference in a {} unit", self.codec)));
				};
				let seq = self.input.varint()?;
				let id = usize::try_from(seq).ok().and_then(|seq| table.get(seq).copied()).ok_or_else(
					|| Error::corrupt(format!("back-reference {seq} past {} objects", table.len())),
				)?;
				check_root(expected, self.graph.type_name_of(&Value::Ref(id)))?;
				Ok(Value::Ref(id))
			}
			other => {
				let value = read_scalar(other, &mut self.input)?
					.ok_or_else(|| Error::corrupt(format!("unknown value tag {other:#04x}")))?;
				check_root(expected, tag_name(other))?;
				Ok(value)
			}
		}
	}

	fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<Value>) -> Result<Value> {
		if self.depth >= MAX_DEPTH {
			return Err(Error::corrupt(format!("unit nests deeper than {MAX_DEPTH} levels")));
		}
		self.depth += 1;
		let outcome = f(self);
		self.depth -= 1;
		outcome
	}

	/// Reserve the arena slot of an object about to be read. In graph-aware
	/// mode the slot is entered into the identity table first so references
	/// from its own payload resolve to it.
	fn register(&mut self) -> Option<ObjectId> {
		let table = self.identity.as_deref_mut()?;
		let id = self.graph.reserve();
		table.push(id);
		Some(id)
	}

	fn place(&mut self, reserved: Option<ObjectId>, object: Object) -> Value {
		match reserved {
			Some(id) => {
				self.graph.fill(id, object);
				Value::Ref(id)
			}
			None => Value::Ref(self.graph.alloc(object)),
		}
	}

	fn read_struct(&mut self, name: &str) -> Result<Value> {
		let shape = self
			.shapes
			.get(name)
			.ok_or_else(|| Error::unsupported(format!("no shape registered for type {name}")))?;
		let mut fields = shape.instantiator().instantiate(&shape)?;
		let id = self.register();
		read_fields(self, &shape, &mut fields)?;
		let object = Object::Struct(StructObject::new(shape.name_arc().clone(), fields));
		Ok(self.place(id, object))
	}

	fn read_collection(&mut self, tag: u8) -> Result<Value> {
		let id = self.register();
		let len = self.input.count()?;
		let object = if tag == tag::MAP {
			let mut entries = Vec::with_capacity(len);
			for _ in 0..len {
				let k = self.read_value()?;
				let v = self.read_value()?;
				entries.push((k, v));
			}
			Object::Map(entries)
		} else {
			let mut items = Vec::with_capacity(len);
			for _ in 0..len {
				items.push(self.read_value()?);
			}
			if tag == tag::SET {
				Object::Set(items)
			} else {
				Object::List(items)
			}
		};
		Ok(self.place(id, object))
	}
}

impl<'a> ValueReader<'a> for Decoder<'a, '_> {
	fn wire(&mut self) -> &mut Reader<'a> {
		&mut self.input
	}

	fn read_value(&mut self) -> Result<Value> {
		let tag = self.input.u8()?;
		self.read_tagged(tag, None)
	}
}
