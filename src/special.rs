//! Special container variants and their dispatch table.
//!
//! These are the immutable, view and wrapper containers a generic list/map/set
//! encoding would lose: a sub-range view must stay a view of its backing
//! list, an unmodifiable wrapper must stay a wrapper, a proxy must be
//! rebuilt from its interfaces and handler.
//!
//! A [`SpecialRegistry`] maps each variant to the one descriptor that
//! recognizes it, and decoding dispatches on the descriptor tag written into
//! the unit.

use std::fmt;

use crate::codec::{ValueReader, ValueWriter};
use crate::error::{Error, Result};
use crate::value::Value;

/// Interface a synchronized or unmodifiable wrapper presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapperKind {
	Collection,
	List,
	RandomAccessList,
	Set,
	SortedSet,
	Map,
	SortedMap,
}

impl WrapperKind {
	pub const ALL: [WrapperKind; 7] = [
		WrapperKind::Collection,
		WrapperKind::List,
		WrapperKind::RandomAccessList,
		WrapperKind::Set,
		WrapperKind::SortedSet,
		WrapperKind::Map,
		WrapperKind::SortedMap,
	];

	fn code(self) -> u8 {
		self as u8
	}

	fn from_code(code: u8) -> Option<Self> {
		Self::ALL.get(usize::from(code)).copied()
	}

	pub fn as_str(self) -> &'static str {
		match self {
			WrapperKind::Collection => "collection",
			WrapperKind::List => "list",
			WrapperKind::RandomAccessList => "random-access-list",
			WrapperKind::Set => "set",
			WrapperKind::SortedSet => "sorted-set",
			WrapperKind::Map => "map",
			WrapperKind::SortedMap => "sorted-map",
		}
	}
}

impl fmt::Display for WrapperKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Calendar value: an instant plus the zone, locale and week rules it is
/// interpreted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
	pub epoch_millis: i64,
	pub time_zone: String,
	pub locale: String,
	pub lenient: bool,
	/// 1 (Sunday) through 7 (Saturday).
	pub first_day_of_week: u8,
	/// 1 through 7.
	pub minimal_days_in_first_week: u8,
}

impl Calendar {
	/// Calendar with ISO week rules in UTC.
	pub fn utc(epoch_millis: i64) -> Self {
		Self {
			epoch_millis,
			time_zone: "UTC".to_owned(),
			locale: "en".to_owned(),
			lenient: true,
			first_day_of_week: 2,
			minimal_days_in_first_week: 4,
		}
	}

	fn check(&self) -> std::result::Result<(), String> {
		if !(1..=7).contains(&self.first_day_of_week) {
			return Err(format!("first day of week {} outside 1..=7", self.first_day_of_week));
		}
		if !(1..=7).contains(&self.minimal_days_in_first_week) {
			return Err(format!(
				"minimal days in first week {} outside 1..=7",
				self.minimal_days_in_first_week
			));
		}
		Ok(())
	}
}

/// Dynamic proxy: the interfaces it implements and the handler every call is
/// routed to. A proxy has no state of its own beyond these.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyHandler {
	pub interfaces: Vec<String>,
	pub handler: Value,
}

/// Special container variant stored as an [`Object::Special`](crate::Object).
#[derive(Debug, Clone, PartialEq)]
pub enum Special {
	/// View of `backing[from..to]`; `backing` references a list.
	SubList {
		backing: Value,
		from: usize,
		to: usize,
	},
	/// Fixed-size list over an array.
	FixedList(Vec<Value>),
	EmptyList,
	EmptyMap,
	EmptySet,
	SingletonList(Value),
	SingletonSet(Value),
	SingletonMap(Value, Value),
	Calendar(Calendar),
	Proxy(ProxyHandler),
	Synchronized(WrapperKind, Value),
	Unmodifiable(WrapperKind, Value),
}

impl Special {
	/// Type identifier of the variant.
	pub fn kind_name(&self) -> &'static str {
		match self {
			Special::SubList {
				..
			} => "sub-list",
			Special::FixedList(_) => "fixed-list",
			Special::EmptyList => "empty-list",
			Special::EmptyMap => "empty-map",
			Special::EmptySet => "empty-set",
			Special::SingletonList(_) => "singleton-list",
			Special::SingletonSet(_) => "singleton-set",
			Special::SingletonMap(..) => "singleton-map",
			Special::Calendar(_) => "calendar",
			Special::Proxy(_) => "proxy",
			Special::Synchronized(..) => "synchronized",
			Special::Unmodifiable(..) => "unmodifiable",
		}
	}

	/// Calls `f` with every value directly held by the variant.
	pub fn for_each_value(&self, mut f: impl FnMut(&Value)) {
		match self {
			Special::SubList {
				backing,
				..
			} => f(backing),
			Special::FixedList(items) => items.iter().for_each(f),
			Special::EmptyList | Special::EmptyMap | Special::EmptySet | Special::Calendar(_) => {}
			Special::SingletonList(v) | Special::SingletonSet(v) => f(v),
			Special::SingletonMap(k, v) => {
				f(k);
				f(v);
			}
			Special::Proxy(proxy) => f(&proxy.handler),
			Special::Synchronized(_, inner) | Special::Unmodifiable(_, inner) => f(inner),
		}
	}
}

type RecognizeFn = fn(&Special) -> bool;
type EncodeFn = fn(&Special, &mut dyn ValueWriter) -> Result<()>;
type DecodeFn = for<'a> fn(&mut dyn ValueReader<'a>) -> Result<Special>;

/// How one special variant is recognized, written and read back.
#[derive(Clone, Copy)]
pub struct SpecialDescriptor {
	tag: u8,
	name: &'static str,
	structural: bool,
	recognize: RecognizeFn,
	encode: EncodeFn,
	decode: DecodeFn,
}

impl SpecialDescriptor {
	fn new(
		tag: u8,
		name: &'static str,
		structural: bool,
		recognize: RecognizeFn,
		encode: EncodeFn,
		decode: DecodeFn,
	) -> Self {
		Self {
			tag,
			name,
			structural,
			recognize,
			encode,
			decode,
		}
	}

	/// Byte written after the special-value tag.
	pub fn tag(&self) -> u8 {
		self.tag
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Whether the structural codec may use this descriptor.
	pub fn is_structural(&self) -> bool {
		self.structural
	}

	pub fn recognizes(&self, special: &Special) -> bool {
		(self.recognize)(special)
	}

	pub(crate) fn encode(&self, special: &Special, w: &mut dyn ValueWriter) -> Result<()> {
		(self.encode)(special, w)
	}

	pub(crate) fn decode<'a>(&self, r: &mut dyn ValueReader<'a>) -> Result<Special> {
		(self.decode)(r)
	}
}

impl fmt::Debug for SpecialDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SpecialDescriptor")
			.field("tag", &self.tag)
			.field("name", &self.name)
			.field("structural", &self.structural)
			.finish()
	}
}

/// Table of special descriptors.
///
/// Built-in recognizers each match a single variant, so lookups never depend
/// on table order.
#[derive(Debug, Clone)]
pub struct SpecialRegistry {
	descriptors: Vec<SpecialDescriptor>,
}

impl Default for SpecialRegistry {
	fn default() -> Self {
		Self::standard()
	}
}

impl SpecialRegistry {
	/// All built-in descriptors.
	pub fn standard() -> Self {
		Self {
			descriptors: standard_descriptors(),
		}
	}

	/// Only the descriptors the structural codec can express.
	pub fn structural() -> Self {
		Self {
			descriptors: standard_descriptors().into_iter().filter(|d| d.structural).collect(),
		}
	}

	pub fn empty() -> Self {
		Self {
			descriptors: Vec::new(),
		}
	}

	/// This registry minus the descriptor called `name`.
	pub fn without(mut self, name: &str) -> Self {
		self.descriptors.retain(|d| d.name != name);
		self
	}

	/// The descriptor that recognizes `special`.
	pub fn find(&self, special: &Special) -> Option<&SpecialDescriptor> {
		self.descriptors.iter().find(|d| d.recognizes(special))
	}

	pub fn by_tag(&self, tag: u8) -> Option<&SpecialDescriptor> {
		self.descriptors.iter().find(|d| d.tag == tag)
	}

	pub fn iter(&self) -> impl Iterator<Item = &SpecialDescriptor> {
		self.descriptors.iter()
	}

	pub fn len(&self) -> usize {
		self.descriptors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.descriptors.is_empty()
	}
}

fn wrong_variant(special: &Special) -> Error {
	Error::unsupported(format!("descriptor applied to {}", special.kind_name()))
}

fn read_index(r: &mut dyn ValueReader<'_>) -> Result<usize> {
	let raw = r.wire().varint()?;
	usize::try_from(raw).map_err(|_| Error::corrupt(format!("index {raw} out of range")))
}

fn read_wrapper_kind(r: &mut dyn ValueReader<'_>) -> Result<WrapperKind> {
	let code = r.wire().u8()?;
	WrapperKind::from_code(code)
		.ok_or_else(|| Error::corrupt(format!("unknown wrapper kind {code:#04x}")))
}

fn standard_descriptors() -> Vec<SpecialDescriptor> {
	vec![
		SpecialDescriptor::new(
			1,
			"empty-list",
			true,
			|s| matches!(s, Special::EmptyList),
			|_, _| Ok(()),
			|_| Ok(Special::EmptyList),
		),
		SpecialDescriptor::new(
			2,
			"empty-set",
			true,
			|s| matches!(s, Special::EmptySet),
			|_, _| Ok(()),
			|_| Ok(Special::EmptySet),
		),
		SpecialDescriptor::new(
			3,
			"empty-map",
			true,
			|s| matches!(s, Special::EmptyMap),
			|_, _| Ok(()),
			|_| Ok(Special::EmptyMap),
		),
		SpecialDescriptor::new(
			4,
			"singleton-list",
			true,
			|s| matches!(s, Special::SingletonList(_)),
			|s, w| match s {
				Special::SingletonList(v) => w.write_value(v),
				other => Err(wrong_variant(other)),
			},
			|r| Ok(Special::SingletonList(r.read_value()?)),
		),
		SpecialDescriptor::new(
			5,
			"singleton-set",
			true,
			|s| matches!(s, Special::SingletonSet(_)),
			|s, w| match s {
				Special::SingletonSet(v) => w.write_value(v),
				other => Err(wrong_variant(other)),
			},
			|r| Ok(Special::SingletonSet(r.read_value()?)),
		),
		SpecialDescriptor::new(
			6,
			"singleton-map",
			true,
			|s| matches!(s, Special::SingletonMap(..)),
			|s, w| match s {
				Special::SingletonMap(k, v) => {
					w.write_value(k)?;
					w.write_value(v)
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let key = r.read_value()?;
				let value = r.read_value()?;
				Ok(Special::SingletonMap(key, value))
			},
		),
		SpecialDescriptor::new(
			7,
			"fixed-list",
			true,
			|s| matches!(s, Special::FixedList(_)),
			|s, w| match s {
				Special::FixedList(items) => {
					w.wire().count(items.len());
					items.iter().try_for_each(|item| w.write_value(item))
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let len = r.wire().count()?;
				let mut items = Vec::with_capacity(len);
				for _ in 0..len {
					items.push(r.read_value()?);
				}
				Ok(Special::FixedList(items))
			},
		),
		SpecialDescriptor::new(
			8,
			"sub-list",
			false,
			|s| {
				matches!(s, Special::SubList {
					..
				})
			},
			|s, w| match s {
				Special::SubList {
					backing,
					from,
					to,
				} => {
					w.write_value(backing)?;
					w.wire().varint(*from as u64);
					w.wire().varint(*to as u64);
					Ok(())
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let backing = r.read_value()?;
				let from = read_index(r)?;
				let to = read_index(r)?;
				if from > to {
					return Err(Error::corrupt(format!("sub-list range {from}..{to} is inverted")));
				}
				Ok(Special::SubList {
					backing,
					from,
					to,
				})
			},
		),
		SpecialDescriptor::new(
			9,
			"calendar",
			true,
			|s| matches!(s, Special::Calendar(_)),
			|s, w| match s {
				Special::Calendar(cal) => {
					cal.check().map_err(Error::unsupported)?;
					let out = w.wire();
					out.i64(cal.epoch_millis);
					out.str(&cal.time_zone);
					out.str(&cal.locale);
					out.bool(cal.lenient);
					out.u8(cal.first_day_of_week);
					out.u8(cal.minimal_days_in_first_week);
					Ok(())
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let input = r.wire();
				let cal = Calendar {
					epoch_millis: input.i64()?,
					time_zone: input.str()?,
					locale: input.str()?,
					lenient: input.bool()?,
					first_day_of_week: input.u8()?,
					minimal_days_in_first_week: input.u8()?,
				};
				cal.check().map_err(Error::corrupt)?;
				Ok(Special::Calendar(cal))
			},
		),
		SpecialDescriptor::new(
			10,
			"proxy",
			false,
			|s| matches!(s, Special::Proxy(_)),
			|s, w| match s {
				Special::Proxy(proxy) => {
					let out = w.wire();
					out.count(proxy.interfaces.len());
					for name in &proxy.interfaces {
						out.str(name);
					}
					w.write_value(&proxy.handler)
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let len = r.wire().count()?;
				let mut interfaces = Vec::with_capacity(len);
				for _ in 0..len {
					interfaces.push(r.wire().str()?);
				}
				let handler = r.read_value()?;
				Ok(Special::Proxy(ProxyHandler {
					interfaces,
					handler,
				}))
			},
		),
		SpecialDescriptor::new(
			11,
			"synchronized",
			false,
			|s| matches!(s, Special::Synchronized(..)),
			|s, w| match s {
				Special::Synchronized(kind, inner) => {
					w.wire().u8(kind.code());
					w.write_value(inner)
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let kind = read_wrapper_kind(r)?;
				Ok(Special::Synchronized(kind, r.read_value()?))
			},
		),
		SpecialDescriptor::new(
			12,
			"unmodifiable",
			false,
			|s| matches!(s, Special::Unmodifiable(..)),
			|s, w| match s {
				Special::Unmodifiable(kind, inner) => {
					w.wire().u8(kind.code());
					w.write_value(inner)
				}
				other => Err(wrong_variant(other)),
			},
			|r| {
				let kind = read_wrapper_kind(r)?;
				Ok(Special::Unmodifiable(kind, r.read_value()?))
			},
		),
	]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::wire::{Reader, Writer};

	/// Writes nested values as bare scalars; enough for leaf-only payloads.
	struct ScalarWriter(Writer);

	impl ValueWriter for ScalarWriter {
		fn wire(&mut self) -> &mut Writer {
			&mut self.0
		}

		fn write_value(&mut self, value: &Value) -> Result<()> {
			crate::codec::write_scalar(&mut self.0, value);
			Ok(())
		}
	}

	struct ScalarReader<'a>(Reader<'a>);

	impl<'a> ValueReader<'a> for ScalarReader<'a> {
		fn wire(&mut self) -> &mut Reader<'a> {
			&mut self.0
		}

		fn read_value(&mut self) -> Result<Value> {
			let tag = self.0.u8()?;
			crate::codec::read_scalar(tag, &mut self.0)?
				.ok_or_else(|| Error::corrupt("nested reference in scalar-only test reader"))
		}
	}

	fn write(special: &Special) -> Vec<u8> {
		let registry = SpecialRegistry::standard();
		let descriptor = registry.find(special).expect("descriptor");
		let mut w = ScalarWriter(Writer::default());
		descriptor.encode(special, &mut w).expect("encode");
		w.0.as_slice().to_vec()
	}

	fn read(name: &str, bytes: &[u8]) -> Result<Special> {
		let registry = SpecialRegistry::standard();
		let descriptor = registry.iter().find(|d| d.name() == name).expect("descriptor");
		let mut r = ScalarReader(Reader::new(bytes));
		descriptor.decode(&mut r)
	}

	#[test]
	fn test_every_variant_has_exactly_one_descriptor() {
		let registry = SpecialRegistry::standard();
		let samples = [
			Special::SubList {
				backing: Value::Null,
				from: 0,
				to: 0,
			},
			Special::FixedList(vec![]),
			Special::EmptyList,
			Special::EmptyMap,
			Special::EmptySet,
			Special::SingletonList(Value::Null),
			Special::SingletonSet(Value::Null),
			Special::SingletonMap(Value::Null, Value::Null),
			Special::Calendar(Calendar::utc(0)),
			Special::Proxy(ProxyHandler {
				interfaces: vec![],
				handler: Value::Null,
			}),
			Special::Synchronized(WrapperKind::List, Value::Null),
			Special::Unmodifiable(WrapperKind::Map, Value::Null),
		];
		for special in &samples {
			let matching = registry.iter().filter(|d| d.recognizes(special)).count();
			assert_eq!(matching, 1, "{}", special.kind_name());
			assert_eq!(registry.find(special).unwrap().name(), special.kind_name());
		}
	}

	#[test]
	fn test_tags_are_unique() {
		let registry = SpecialRegistry::standard();
		let mut tags: Vec<u8> = registry.iter().map(SpecialDescriptor::tag).collect();
		tags.sort_unstable();
		tags.dedup();
		assert_eq!(tags.len(), registry.len());
	}

	#[test]
	fn test_structural_registry_excludes_identity_variants() {
		let registry = SpecialRegistry::structural();
		assert!(registry.iter().all(SpecialDescriptor::is_structural));
		for name in ["sub-list", "proxy", "synchronized", "unmodifiable"] {
			assert!(registry.iter().all(|d| d.name() != name), "{name}");
		}
		assert!(registry.find(&Special::Calendar(Calendar::utc(0))).is_some());
	}

	#[test]
	fn test_without_removes_descriptor() {
		let registry = SpecialRegistry::standard().without("calendar");
		assert_eq!(registry.len(), SpecialRegistry::standard().len() - 1);
		assert!(registry.find(&Special::Calendar(Calendar::utc(0))).is_none());
		assert!(registry.by_tag(9).is_none());
		assert!(SpecialRegistry::empty().is_empty());
	}

	#[test]
	fn test_calendar_payload_keeps_week_rules() {
		let cal = Calendar {
			epoch_millis: -86_400_000,
			time_zone: "Europe/Paris".to_owned(),
			locale: "fr_FR".to_owned(),
			lenient: false,
			first_day_of_week: 2,
			minimal_days_in_first_week: 4,
		};
		let bytes = write(&Special::Calendar(cal.clone()));
		assert_eq!(read("calendar", &bytes).unwrap(), Special::Calendar(cal));
	}

	#[test]
	fn test_calendar_with_bad_week_rule_is_corrupt() {
		let mut bytes = write(&Special::Calendar(Calendar::utc(0)));
		let last = bytes.len() - 1;
		bytes[last] = 9;
		assert!(matches!(read("calendar", &bytes), Err(Error::Corruption(_))));
	}

	#[test]
	fn test_unknown_wrapper_kind_is_corrupt() {
		let mut bytes = write(&Special::Unmodifiable(WrapperKind::SortedSet, Value::I32(1)));
		bytes[0] = 42;
		assert!(matches!(read("unmodifiable", &bytes), Err(Error::Corruption(_))));
	}

	#[test]
	fn test_proxy_payload_is_interfaces_then_handler() {
		let proxy = Special::Proxy(ProxyHandler {
			interfaces: vec!["demo.Greeter".to_owned(), "demo.Closeable".to_owned()],
			handler: Value::from("handler-state"),
		});
		let bytes = write(&proxy);
		assert_eq!(bytes[0], 2);
		assert_eq!(read("proxy", &bytes).unwrap(), proxy);
	}

	#[test]
	fn test_inverted_sub_list_is_corrupt() {
		let bytes = write(&Special::SubList {
			backing: Value::Null,
			from: 5,
			to: 2,
		});
		assert!(matches!(read("sub-list", &bytes), Err(Error::Corruption(_))));
	}
}
