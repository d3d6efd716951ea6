//! Codec abstraction: how an [`ObjectGraph`] becomes an encoded unit and back.
//!
//! Two codecs exist:
//!
//! - [`StructuralCodec`] writes every reference inline, driven by the
//!   memoised [`TypeShape`](crate::TypeShape) of each struct. Shared objects
//!   are duplicated and cycles are rejected.
//! - [`GraphCodec`] keeps an identity table so shared objects are written once
//!   and cycles resolve to back-references.
//!
//! Both write `[format][version][root value]`. The format byte differs per
//! codec, so a unit written by one codec is rejected by the other as
//! corrupt instead of being misread.

use std::fmt;
use std::str::FromStr;

use ahash::RandomState;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shape::{FieldKind, TypeShape};
use crate::value::{ObjectGraph, ObjectId, StructObject, Value};

mod graph;
mod structural;
mod walk;
pub(crate) mod wire;

pub use graph::GraphCodec;
pub use structural::StructuralCodec;

use wire::{Reader, Writer};

/// Maximum nesting of objects inside one encoded unit.
///
/// Deeper graphs fail with [`Error::UnsupportedShape`] on encode and
/// [`Error::Corruption`] on decode rather than exhausting the stack. Units
/// within the limit encode and decode on a default 2 MiB thread stack, debug
/// builds included.
pub const MAX_DEPTH: usize = 256;

pub(crate) const FORMAT_VERSION: u8 = 1;

/// Value tags.
pub(crate) mod tag {
	pub const NULL: u8 = 0;
	pub const FALSE: u8 = 1;
	pub const TRUE: u8 = 2;
	pub const I32: u8 = 3;
	pub const I64: u8 = 4;
	pub const F32: u8 = 5;
	pub const F64: u8 = 6;
	pub const CHAR: u8 = 7;
	pub const STR: u8 = 8;
	pub const BYTES: u8 = 9;
	pub const STRUCT: u8 = 10;
	pub const LIST: u8 = 11;
	pub const MAP: u8 = 12;
	pub const SET: u8 = 13;
	pub const SPECIAL: u8 = 14;
	/// Graph codec only: reference to an object already in the unit.
	pub const BACKREF: u8 = 15;
}

/// Which codec the facade uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum CodecMode {
	/// Shape-driven, no identity tracking.
	#[default]
	Structural = 0,
	/// Identity-preserving, cycle-safe.
	GraphAware = 1,
}

impl CodecMode {
	pub(crate) fn from_u8(raw: u8) -> Self {
		match raw {
			1 => CodecMode::GraphAware,
			_ => CodecMode::Structural,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			CodecMode::Structural => "structural",
			CodecMode::GraphAware => "graph-aware",
		}
	}
}

impl fmt::Display for CodecMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for CodecMode {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"structural" => Ok(CodecMode::Structural),
			"graph-aware" | "graph_aware" | "graph" => Ok(CodecMode::GraphAware),
			other => Err(format!("unknown codec mode {other:?}")),
		}
	}
}

/// Strategy converting object graphs to encoded units and back.
pub trait Codec: Send + Sync {
	fn mode(&self) -> CodecMode;

	/// Encode `graph` into the context's buffer and return the unit.
	///
	/// The slice stays valid until the context is used again.
	fn encode<'c>(&self, cx: &'c mut CodecContext, graph: &ObjectGraph) -> Result<&'c [u8]>;

	/// Decode a unit. When `expected` is given, a root whose type identifier
	/// differs fails with [`Error::TypeMismatch`] before its payload is read.
	fn decode(
		&self,
		cx: &mut CodecContext,
		bytes: &[u8],
		expected: Option<&str>,
	) -> Result<ObjectGraph>;
}

/// Scratch state for one encode or decode call: output buffer plus the
/// identity tables of the graph codec.
///
/// A context must never be used by two calls at once; the facade hands each
/// call its own from a pool. Reusing one context for successive calls on the
/// same thread is the intended way to avoid reallocating the buffer.
#[derive(Debug, Default)]
pub struct CodecContext {
	pub(crate) out: Writer,
	pub(crate) encoded: HashMap<ObjectId, u32, RandomState>,
	pub(crate) decoded: Vec<ObjectId>,
}

impl CodecContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// Forget everything from a previous call.
	pub(crate) fn reset(&mut self) {
		self.out.clear();
		self.encoded.clear();
		self.decoded.clear();
	}

	/// Bytes currently reserved by the output buffer.
	pub fn buffer_capacity(&self) -> usize {
		self.out.capacity()
	}

	/// Drop scratch memory above `limit` bytes.
	pub(crate) fn trim(&mut self, limit: usize) {
		self.reset();
		if self.out.capacity() > limit {
			self.out.shrink_to(limit);
		}
		self.encoded.shrink_to(64);
		self.decoded.shrink_to(64);
	}
}

/// Encoder-side view handed to special-variant descriptors.
pub(crate) trait ValueWriter {
	fn wire(&mut self) -> &mut Writer;

	/// Write a tagged value with the active codec's reference policy.
	fn write_value(&mut self, value: &Value) -> Result<()>;
}

/// Decoder-side view handed to special-variant descriptors.
pub(crate) trait ValueReader<'a> {
	fn wire(&mut self) -> &mut Reader<'a>;

	fn read_value(&mut self) -> Result<Value>;
}

pub(crate) fn write_header(out: &mut Writer, format: u8) {
	out.u8(format);
	out.u8(FORMAT_VERSION);
}

pub(crate) fn read_header(input: &mut Reader<'_>, format: u8, codec: &str) -> Result<()> {
	let found = input.u8()?;
	if found != format {
		return Err(Error::corrupt(format!(
			"unit format {found:#04x} was not written by the {codec} codec"
		)));
	}
	let version = input.u8()?;
	if version != FORMAT_VERSION {
		return Err(Error::corrupt(format!("unsupported format version {version}")));
	}
	Ok(())
}

/// Write a non-reference value with its tag.
pub(crate) fn write_scalar(out: &mut Writer, value: &Value) {
	match value {
		Value::Null => out.u8(tag::NULL),
		Value::Bool(false) => out.u8(tag::FALSE),
		Value::Bool(true) => out.u8(tag::TRUE),
		Value::I32(v) => {
			out.u8(tag::I32);
			out.i32(*v);
		}
		Value::I64(v) => {
			out.u8(tag::I64);
			out.i64(*v);
		}
		Value::F32(v) => {
			out.u8(tag::F32);
			out.f32(*v);
		}
		Value::F64(v) => {
			out.u8(tag::F64);
			out.f64(*v);
		}
		Value::Char(v) => {
			out.u8(tag::CHAR);
			out.char(*v);
		}
		Value::Str(v) => {
			out.u8(tag::STR);
			out.str(v);
		}
		Value::Bytes(v) => {
			out.u8(tag::BYTES);
			out.bytes(v);
		}
		Value::Ref(_) => unreachable!("references are written by the codec"),
	}
}

/// Read the payload of a scalar tag. Returns `None` for non-scalar tags.
pub(crate) fn read_scalar(tag: u8, input: &mut Reader<'_>) -> Result<Option<Value>> {
	let value = match tag {
		tag::NULL => Value::Null,
		tag::FALSE => Value::Bool(false),
		tag::TRUE => Value::Bool(true),
		tag::I32 => Value::I32(input.i32()?),
		tag::I64 => Value::I64(input.i64()?),
		tag::F32 => Value::F32(input.f32()?),
		tag::F64 => Value::F64(input.f64()?),
		tag::CHAR => Value::Char(input.char()?),
		tag::STR => Value::Str(input.str()?),
		tag::BYTES => Value::Bytes(input.bytes()?),
		_ => return Ok(None),
	};
	Ok(Some(value))
}

/// Type identifier of a non-struct, non-special tag, for root checks.
pub(crate) fn tag_name(tag: u8) -> &'static str {
	match tag {
		tag::NULL => "null",
		tag::FALSE | tag::TRUE => "bool",
		tag::I32 => "i32",
		tag::I64 => "i64",
		tag::F32 => "f32",
		tag::F64 => "f64",
		tag::CHAR => "char",
		tag::STR => "string",
		tag::BYTES => "bytes",
		tag::LIST => "list",
		tag::MAP => "map",
		tag::SET => "set",
		tag::BACKREF => "back-reference",
		_ => "unknown",
	}
}

pub(crate) fn check_root(expected: Option<&str>, found: &str) -> Result<()> {
	match expected {
		Some(expected) if expected != found => Err(Error::mismatch(expected, found)),
		_ => Ok(()),
	}
}

/// Write the persistent fields of `object` in shape order. Primitive kinds
/// go out untagged; dynamic fields go through the codec.
pub(crate) fn write_fields<W: ValueWriter + ?Sized>(
	w: &mut W,
	shape: &TypeShape,
	object: &StructObject,
) -> Result<()> {
	if object.fields().len() != shape.fields().len() {
		return Err(Error::unsupported(format!(
			"{} has {} fields but its shape declares {}",
			shape.name(),
			object.fields().len(),
			shape.fields().len()
		)));
	}

	for (field, value) in shape.fields().iter().zip(object.fields()) {
		if field.is_transient() {
			continue;
		}
		match (field.kind(), value) {
			(FieldKind::Dynamic, value) => w.write_value(value)?,
			(FieldKind::Bool, Value::Bool(v)) => w.wire().bool(*v),
			(FieldKind::I32, Value::I32(v)) => w.wire().i32(*v),
			(FieldKind::I64, Value::I64(v)) => w.wire().i64(*v),
			(FieldKind::F32, Value::F32(v)) => w.wire().f32(*v),
			(FieldKind::F64, Value::F64(v)) => w.wire().f64(*v),
			(FieldKind::Char, Value::Char(v)) => w.wire().char(*v),
			(FieldKind::Str, Value::Str(v)) => w.wire().str(v),
			(kind, value) => {
				return Err(Error::unsupported(format!(
					"field {}.{} is declared {} but holds {}",
					shape.name(),
					field.name(),
					kind,
					value.kind_name()
				)));
			}
		}
	}
	Ok(())
}

/// Read the persistent fields of a struct into `fields`, which already holds
/// the instantiated defaults.
pub(crate) fn read_fields<'a, R: ValueReader<'a> + ?Sized>(
	r: &mut R,
	shape: &TypeShape,
	fields: &mut [Value],
) -> Result<()> {
	for (field, slot) in shape.fields().iter().zip(fields.iter_mut()) {
		if field.is_transient() {
			continue;
		}
		*slot = match field.kind() {
			FieldKind::Dynamic => r.read_value()?,
			FieldKind::Bool => Value::Bool(r.wire().bool()?),
			FieldKind::I32 => Value::I32(r.wire().i32()?),
			FieldKind::I64 => Value::I64(r.wire().i64()?),
			FieldKind::F32 => Value::F32(r.wire().f32()?),
			FieldKind::F64 => Value::F64(r.wire().f64()?),
			FieldKind::Char => Value::Char(r.wire().char()?),
			FieldKind::Str => Value::Str(r.wire().str()?),
		};
	}
	Ok(())
}
