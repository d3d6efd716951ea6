use std::sync::Arc;

use super::walk::{Decoder, Encoder};
use super::wire::Reader;
use super::{Codec, CodecContext, CodecMode, ValueWriter, read_header, write_header};
use crate::error::{Error, Result};
use crate::shape::ShapeCache;
use crate::special::SpecialRegistry;
use crate::value::ObjectGraph;

const FORMAT: u8 = b'S';
const NAME: &str = "structural";

/// Shape-driven codec without identity tracking.
///
/// Each struct is written as its type name followed by its persistent fields
/// in the order recorded in its [`TypeShape`](crate::TypeShape). An object
/// referenced twice is written twice and decodes as two independent objects.
/// A graph in which an object reaches itself fails with
/// [`Error::UnsupportedShape`].
///
/// Only the value-like special variants are supported: the empty and
/// singleton containers, fixed-size lists and calendars.
#[derive(Debug, Clone)]
pub struct StructuralCodec {
	shapes: Arc<ShapeCache>,
	specials: SpecialRegistry,
}

impl StructuralCodec {
	pub fn new(shapes: Arc<ShapeCache>) -> Self {
		Self {
			shapes,
			specials: SpecialRegistry::structural(),
		}
	}

	/// Replace the special-variant registry. Descriptors not marked
	/// structural are dropped.
	pub fn with_specials(mut self, specials: SpecialRegistry) -> Self {
		let removed: Vec<_> =
			specials.iter().filter(|d| !d.is_structural()).map(|d| d.name()).collect();
		self.specials = removed.into_iter().fold(specials, SpecialRegistry::without);
		self
	}

	pub fn shapes(&self) -> &Arc<ShapeCache> {
		&self.shapes
	}

	pub fn specials(&self) -> &SpecialRegistry {
		&self.specials
	}
}

impl Codec for StructuralCodec {
	fn mode(&self) -> CodecMode {
		CodecMode::Structural
	}

	fn encode<'c>(&self, cx: &'c mut CodecContext, graph: &ObjectGraph) -> Result<&'c [u8]> {
		graph.validate().map_err(Error::UnsupportedShape)?;
		cx.reset();
		write_header(&mut cx.out, FORMAT);

		let mut encoder = Encoder {
			shapes: &self.shapes,
			specials: &self.specials,
			graph,
			out: &mut cx.out,
			seen: &mut cx.encoded,
			share: false,
			codec: NAME,
			depth: 0,
		};
		encoder.write_value(graph.root())?;
		Ok(cx.out.as_slice())
	}

	fn decode(
		&self,
		cx: &mut CodecContext,
		bytes: &[u8],
		expected: Option<&str>,
	) -> Result<ObjectGraph> {
		cx.reset();
		let mut input = Reader::new(bytes);
		read_header(&mut input, FORMAT, NAME)?;

		let mut decoder = Decoder {
			shapes: &self.shapes,
			specials: &self.specials,
			input,
			graph: ObjectGraph::new(),
			identity: None,
			codec: NAME,
			depth: 0,
		};
		let root = decoder.read_root(expected)?;
		decoder.input.finish()?;

		let mut graph = decoder.graph;
		graph.set_root(root);
		graph.validate().map_err(Error::Corruption)?;
		Ok(graph)
	}
}
