//! # Host Cache
//!
//! A process-local, capacity-bounded cache that keeps application objects as
//! compact byte blobs:
//! - **Byte store** with a byte capacity, adjustable at runtime
//! - **Structural codec** driven by memoised per-type shapes
//! - **Graph-aware codec** that preserves shared references and cycles
//! - **Special container variants** (empty, singleton, views, wrappers,
//!   calendars, proxies) that decode as the same variant
//! - **Lock-light concurrency**: sharded store, pooled codec contexts
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use host_cache::{CodecMode, HostCache, reflect_struct};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Team {
//!     name: String,
//!     members: Vec<Arc<Member>>,
//!     lead: Arc<Member>,
//! }
//!
//! #[derive(Debug, PartialEq)]
//! struct Member {
//!     login: String,
//!     age: u16,
//! }
//!
//! reflect_struct!(Member as "demo.Member" { login: String, age: u16 });
//! reflect_struct!(Team as "demo.Team" {
//!     name: String,
//!     members: Vec<Arc<Member>>,
//!     lead: Arc<Member>,
//! });
//!
//! let cache = HostCache::new(64 * 1024 * 1024);
//! cache.set_mode(CodecMode::GraphAware);
//!
//! let ada = Arc::new(Member { login: "ada".into(), age: 36 });
//! let team = Team {
//!     name: "engines".into(),
//!     members: vec![ada.clone()],
//!     lead: ada,
//! };
//! cache.put_object("team", Some(&team)).unwrap();
//!
//! let loaded: Team = cache.get_object("team").unwrap().unwrap();
//! // The graph-aware codec keeps the lead and the member the same object
//! assert!(Arc::ptr_eq(&loaded.lead, &loaded.members[0]));
//! ```
//!
//! ## Dynamic graphs
//!
//! Anything the typed layer cannot express, such as cycles or special
//! variants, can be stored as an [`ObjectGraph`] directly:
//!
//! ```rust
//! use host_cache::{CodecMode, HostCache, Object, ObjectGraph, Special, Value};
//!
//! let cache = HostCache::new(1024 * 1024);
//! let mut graph = ObjectGraph::new();
//! let empty = graph.alloc(Object::Special(Special::EmptyList));
//! graph.set_root(Value::Ref(empty));
//!
//! cache.put_graph_in(CodecMode::Structural, "empty", &graph).unwrap();
//! let loaded = cache.get_graph_in(CodecMode::Structural, "empty", None).unwrap().unwrap();
//! assert_eq!(loaded.resolve(loaded.root()), Some(&Object::Special(Special::EmptyList)));
//! ```
//!
//! ## Thread Safety
//!
//! [`HostCache`] is `Send + Sync` and can be shared across threads via `Arc`.
//! Every call is synchronous and holds no lock once it returns, so it is also
//! safe to call from async tasks.

mod builder;
mod cache;
mod codec;
mod config;
mod error;
mod pool;
mod reflect;
mod shape;
mod special;
mod store;
mod value;

pub use builder::{BackendLoader, HostCacheBuilder};
pub use cache::HostCache;
pub use codec::{Codec, CodecContext, CodecMode, GraphCodec, MAX_DEPTH, StructuralCodec};
pub use config::{DEFAULT_CAPACITY_BYTES, HostCacheConfig};
pub use error::{Error, Result};
pub use reflect::{GraphBuilder, Reflect, Reifier};
pub use shape::{
	FieldKind, FieldShape, Instantiator, Registration, ShapeCache, Shaped, TypeShape,
	TypeShapeBuilder,
};
pub use special::{
	Calendar, ProxyHandler, Special, SpecialDescriptor, SpecialRegistry, WrapperKind,
};
#[cfg(feature = "metrics")]
pub use store::StoreMetrics;
pub use store::{ByteStore, MemoryStore};
pub use value::{Object, ObjectGraph, ObjectId, StructObject, Value};

#[doc(hidden)]
pub mod __private {
	pub use crate::reflect::next_field;
}
