use std::sync::Arc;

use super::walk::{Decoder, Encoder};
use super::wire::Reader;
use super::{Codec, CodecContext, CodecMode, ValueWriter, read_header, write_header};
use crate::error::{Error, Result};
use crate::shape::ShapeCache;
use crate::special::SpecialRegistry;
use crate::value::ObjectGraph;

const FORMAT: u8 = b'G';
const NAME: &str = "graph-aware";

/// Identity-preserving codec.
///
/// Objects are numbered in the order they are first written. A later
/// reference to the same object is written as a back-reference to that
/// number, so shared objects decode as one object and cycles close on
/// themselves. The numbering restarts with every call.
#[derive(Debug, Clone)]
pub struct GraphCodec {
	shapes: Arc<ShapeCache>,
	specials: SpecialRegistry,
}

impl GraphCodec {
	pub fn new(shapes: Arc<ShapeCache>) -> Self {
		Self {
			shapes,
			specials: SpecialRegistry::standard(),
		}
	}

	pub fn with_specials(mut self, specials: SpecialRegistry) -> Self {
		self.specials = specials;
		self
	}

	pub fn shapes(&self) -> &Arc<ShapeCache> {
		&self.shapes
	}

	pub fn specials(&self) -> &SpecialRegistry {
		&self.specials
	}
}

impl Codec for GraphCodec {
	fn mode(&self) -> CodecMode {
		CodecMode::GraphAware
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
			share: true,
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
			identity: Some(&mut cx.decoded),
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
