use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use host_cache::{
	ByteStore, Codec, CodecContext, CodecMode, GraphBuilder, GraphCodec, HostCache, MemoryStore,
	Object, ObjectGraph, Reifier, ShapeCache, Special, StructuralCodec, Value, WrapperKind,
	reflect_struct,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Record {
	id: u64,
	name: String,
	ratio: f64,
	flags: Vec<bool>,
	attrs: BTreeMap<String, i32>,
	parent: Option<Box<Record>>,
}

reflect_struct!(Record as "prop.Record" {
	id: u64,
	name: String,
	ratio: f64,
	flags: Vec<bool>,
	attrs: BTreeMap<String, i32>,
	parent: Option<Box<Record>>,
});

fn record() -> impl Strategy<Value = Record> {
	let leaf = (
		any::<u64>(),
		".*",
		any::<f64>().prop_filter("NaN never compares equal", |v| !v.is_nan()),
		prop::collection::vec(any::<bool>(), 0..8),
		prop::collection::btree_map("[a-z]{0,6}", any::<i32>(), 0..6),
	)
		.prop_map(|(id, name, ratio, flags, attrs)| Record {
			id,
			name,
			ratio,
			flags,
			attrs,
			parent: None,
		});
	leaf.prop_recursive(3, 8, 1, |inner| {
		(inner.clone(), inner).prop_map(|(mut child, parent)| {
			child.parent = Some(Box::new(parent));
			child
		})
	})
}

fn mode() -> impl Strategy<Value = CodecMode> {
	prop_oneof![Just(CodecMode::Structural), Just(CodecMode::GraphAware)]
}

fn codecs() -> (StructuralCodec, GraphCodec) {
	let shapes = Arc::new(ShapeCache::new());
	shapes.shape_for::<Record>();
	(StructuralCodec::new(shapes.clone()), GraphCodec::new(shapes))
}

proptest! {
	#[test]
	fn test_record_round_trip(value in record(), mode in mode()) {
		let cache = HostCache::new(1 << 22);
		prop_assert!(cache.put_object_in(mode, "r", Some(&value)).unwrap());
		let loaded = cache.get_object_in::<Record>(mode, "r").unwrap();
		prop_assert_eq!(loaded, Some(value));
	}

	#[test]
	fn test_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256), graph_mode in any::<bool>()) {
		let (structural, graph) = codecs();
		let codec: &dyn Codec = if graph_mode { &graph } else { &structural };
		let mut cx = CodecContext::new();
		if let Ok(decoded) = codec.decode(&mut cx, &bytes, None) {
			let _ = Reifier::materialize::<Vec<i32>>(&decoded);
			let _ = Reifier::materialize::<BTreeMap<String, i32>>(&decoded);
			let _ = Reifier::materialize::<Record>(&decoded);
		}
	}

	#[test]
	fn test_hostile_wrapper_chains_never_panic(
		links in prop::collection::vec((0usize..8, 0u8..4), 1..8),
		root in 0usize..8,
	) {
		// Up to eight wrappers around arbitrary slots; with nothing else in the
		// graph every chain ends in a cycle
		let mut graph = ObjectGraph::new();
		let ids: Vec<_> = (0..links.len()).map(|_| graph.alloc(Object::List(Vec::new()))).collect();
		for (id, &(target, kind)) in ids.iter().zip(&links) {
			let inner = Value::Ref(ids[target % ids.len()]);
			*graph.get_mut(*id).unwrap() = Object::Special(match kind {
				0 => Special::Unmodifiable(WrapperKind::List, inner),
				1 => Special::Synchronized(WrapperKind::Map, inner),
				2 => Special::Unmodifiable(WrapperKind::Set, inner),
				_ => Special::Synchronized(WrapperKind::Set, inner),
			});
		}
		graph.set_root(Value::Ref(ids[root % ids.len()]));

		let cache = HostCache::new(1 << 20);
		prop_assert!(cache.put_graph_in(CodecMode::GraphAware, "h", &graph).unwrap());
		prop_assert!(cache.get_object_in::<Vec<i32>>(CodecMode::GraphAware, "h").is_err());
		prop_assert!(cache.get_object_in::<BTreeMap<String, i32>>(CodecMode::GraphAware, "h").is_err());
		prop_assert!(cache.get_object_in::<BTreeSet<i32>>(CodecMode::GraphAware, "h").is_err());
	}

	#[test]
	fn test_truncated_units_are_rejected(value in record(), graph_mode in any::<bool>()) {
		let (structural, graph) = codecs();
		let codec: &dyn Codec = if graph_mode { &graph } else { &structural };
		let mut cx = CodecContext::new();
		let bytes = codec.encode(&mut cx, &GraphBuilder::build(&value)).unwrap().to_vec();
		for len in (0..bytes.len()).step_by(3) {
			prop_assert!(codec.decode(&mut cx, &bytes[..len], None).is_err());
		}
	}

	#[test]
	fn test_store_never_exceeds_capacity(
		ops in prop::collection::vec((0u8..40, 0usize..600, any::<bool>()), 1..80),
	) {
		let capacity = 8 * 1024;
		let store = MemoryStore::new(capacity);
		for (key, len, delete) in ops {
			let key = format!("key-{key}");
			if delete {
				store.delete(&key);
			} else {
				store.put(&key, &vec![0xAB; len]);
			}
			prop_assert!(store.size() <= capacity);
		}
	}

	#[test]
	fn test_latest_put_wins(values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..10)) {
		let store = MemoryStore::new(1 << 20);
		for value in &values {
			store.put("k", value);
		}
		prop_assert_eq!(store.get("k"), values.last().cloned());
	}
}
