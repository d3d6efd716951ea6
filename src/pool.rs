//! Pool of reusable [`CodecContext`]s.
//!
//! Every facade call checks a context out, uses it exclusively and returns it
//! on drop, so concurrent calls never share scratch state while sequential
//! calls reuse the same buffers.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crossbeam_queue::SegQueue;

use crate::codec::CodecContext;

/// Contexts whose output buffer grew past this are trimmed before being
/// pooled again.
const RETAIN_BUFFER_BYTES: usize = 1024 * 1024;

pub(crate) struct ContextPool {
	idle: SegQueue<CodecContext>,
	max_idle: usize,
}

impl ContextPool {
	pub fn new() -> Self {
		let parallelism = std::thread::available_parallelism().map_or(4, |n| n.get());
		Self::with_max_idle(parallelism * 2)
	}

	pub fn with_max_idle(max_idle: usize) -> Self {
		Self {
			idle: SegQueue::new(),
			max_idle,
		}
	}

	/// Take an idle context or create a fresh one.
	pub fn checkout(&self) -> PooledContext<'_> {
		PooledContext {
			context: self.idle.pop().unwrap_or_default(),
			pool: self,
		}
	}

	#[cfg(test)]
	pub fn idle(&self) -> usize {
		self.idle.len()
	}

	fn restore(&self, mut context: CodecContext) {
		// Racy length check; the pool may briefly hold a few extra contexts
		if self.idle.len() >= self.max_idle {
			return;
		}
		context.trim(RETAIN_BUFFER_BYTES);
		self.idle.push(context);
	}
}

impl fmt::Debug for ContextPool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ContextPool")
			.field("idle", &self.idle.len())
			.field("max_idle", &self.max_idle)
			.finish()
	}
}

/// RAII handle to a checked-out context. Returns it to the pool on drop.
pub(crate) struct PooledContext<'p> {
	context: CodecContext,
	pool: &'p ContextPool,
}

impl Deref for PooledContext<'_> {
	type Target = CodecContext;

	fn deref(&self) -> &CodecContext {
		&self.context
	}
}

impl DerefMut for PooledContext<'_> {
	fn deref_mut(&mut self) -> &mut CodecContext {
		&mut self.context
	}
}

impl Drop for PooledContext<'_> {
	fn drop(&mut self) {
		self.pool.restore(std::mem::take(&mut self.context));
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::codec::{Codec, StructuralCodec};
	use crate::shape::ShapeCache;
	use crate::value::{ObjectGraph, Value};

	#[test]
	fn test_context_returns_on_drop() {
		let pool = ContextPool::with_max_idle(4);
		{
			let _a = pool.checkout();
			let _b = pool.checkout();
			assert_eq!(pool.idle(), 0);
		}
		assert_eq!(pool.idle(), 2);
		let _c = pool.checkout();
		assert_eq!(pool.idle(), 1);
	}

	#[test]
	fn test_pool_is_bounded() {
		let pool = ContextPool::with_max_idle(1);
		let a = pool.checkout();
		let b = pool.checkout();
		drop(a);
		drop(b);
		assert_eq!(pool.idle(), 1);
	}

	#[test]
	fn test_large_buffers_are_trimmed() {
		let pool = ContextPool::with_max_idle(2);
		let codec = StructuralCodec::new(Arc::new(ShapeCache::new()));
		let graph = ObjectGraph::scalar(Value::Bytes(vec![7; 4 * RETAIN_BUFFER_BYTES]));
		{
			let mut cx = pool.checkout();
			codec.encode(&mut cx, &graph).unwrap();
			assert!(cx.buffer_capacity() > RETAIN_BUFFER_BYTES);
		}
		let cx = pool.checkout();
		assert!(cx.buffer_capacity() <= RETAIN_BUFFER_BYTES);
	}

	#[test]
	fn test_concurrent_checkouts_are_exclusive() {
		let pool = Arc::new(ContextPool::new());
		let handles: Vec<_> = (0..8)
			.map(|i| {
				let pool = pool.clone();
				std::thread::spawn(move || {
					let codec = StructuralCodec::new(Arc::new(ShapeCache::new()));
					for n in 0..200 {
						let graph = ObjectGraph::scalar(Value::I64(i * 1000 + n));
						let mut cx = pool.checkout();
						let bytes = codec.encode(&mut cx, &graph).unwrap().to_vec();
						let decoded = codec.decode(&mut cx, &bytes, None).unwrap();
						assert_eq!(decoded.root(), &Value::I64(i * 1000 + n));
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}
	}
}
