//! Byte-level primitives shared by both codecs.
//!
//! Integers use LEB128 varints (zigzag for signed values), floats are written
//! as little-endian bit patterns so they round-trip exactly, and text is a
//! length-prefixed UTF-8 run.

use crate::error::{Error, Result};

/// Append-only output buffer. Lives in a `CodecContext` and is reused
/// across calls on the same context.
#[derive(Debug, Default)]
pub(crate) struct Writer {
	buf: Vec<u8>,
}

impl Writer {
	pub fn clear(&mut self) {
		self.buf.clear();
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.buf
	}

	pub fn capacity(&self) -> usize {
		self.buf.capacity()
	}

	pub fn shrink_to(&mut self, limit: usize) {
		self.buf.clear();
		self.buf.shrink_to(limit);
	}

	pub fn u8(&mut self, value: u8) {
		self.buf.push(value);
	}

	pub fn bool(&mut self, value: bool) {
		self.buf.push(value as u8);
	}

	pub fn varint(&mut self, mut value: u64) {
		while value >= 0x80 {
			self.buf.push((value as u8) | 0x80);
			value >>= 7;
		}
		self.buf.push(value as u8);
	}

	pub fn count(&mut self, len: usize) {
		self.varint(len as u64);
	}

	pub fn i64(&mut self, value: i64) {
		self.varint(((value << 1) ^ (value >> 63)) as u64);
	}

	pub fn i32(&mut self, value: i32) {
		self.i64(i64::from(value));
	}

	pub fn f32(&mut self, value: f32) {
		self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
	}

	pub fn f64(&mut self, value: f64) {
		self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
	}

	pub fn char(&mut self, value: char) {
		self.varint(u64::from(u32::from(value)));
	}

	pub fn bytes(&mut self, value: &[u8]) {
		self.count(value.len());
		self.buf.extend_from_slice(value);
	}

	pub fn str(&mut self, value: &str) {
		self.bytes(value.as_bytes());
	}
}

/// Cursor over an encoded unit. Every read is bounds-checked and reports
/// [`Error::Corruption`] instead of panicking.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Self {
			buf,
			pos: 0,
		}
	}

	pub fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	pub fn finish(&self) -> Result<()> {
		match self.remaining() {
			0 => Ok(()),
			extra => Err(Error::corrupt(format!("{extra} trailing bytes after root value"))),
		}
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.remaining() < n {
			return Err(Error::corrupt(format!(
				"truncated input: needed {n} bytes at offset {}, {} left",
				self.pos,
				self.remaining()
			)));
		}
		let slice = &self.buf[self.pos..self.pos + n];
		self.pos += n;
		Ok(slice)
	}

	pub fn u8(&mut self) -> Result<u8> {
		Ok(self.take(1)?[0])
	}

	pub fn bool(&mut self) -> Result<bool> {
		match self.u8()? {
			0 => Ok(false),
			1 => Ok(true),
			other => Err(Error::corrupt(format!("invalid bool byte {other:#04x}"))),
		}
	}

	pub fn varint(&mut self) -> Result<u64> {
		let mut value = 0u64;
		for shift in (0..64).step_by(7) {
			let byte = self.u8()?;
			value |= u64::from(byte & 0x7f) << shift;
			if byte & 0x80 == 0 {
				return Ok(value);
			}
		}
		Err(Error::corrupt("varint longer than 10 bytes"))
	}

	/// A length or element count. Every counted item takes at least one
	/// byte, so a count larger than what is left is corrupt.
	pub fn count(&mut self) -> Result<usize> {
		let len = self.varint()?;
		match usize::try_from(len) {
			Ok(len) if len <= self.remaining() => Ok(len),
			_ => Err(Error::corrupt(format!(
				"length {len} exceeds the {} remaining bytes",
				self.remaining()
			))),
		}
	}

	pub fn i64(&mut self) -> Result<i64> {
		let raw = self.varint()?;
		Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
	}

	pub fn i32(&mut self) -> Result<i32> {
		let value = self.i64()?;
		i32::try_from(value).map_err(|_| Error::corrupt(format!("{value} does not fit in i32")))
	}

	pub fn f32(&mut self) -> Result<f32> {
		let bytes = self.take(4)?;
		Ok(f32::from_bits(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
	}

	pub fn f64(&mut self) -> Result<f64> {
		let bytes = self.take(8)?;
		let mut raw = [0u8; 8];
		raw.copy_from_slice(bytes);
		Ok(f64::from_bits(u64::from_le_bytes(raw)))
	}

	pub fn char(&mut self) -> Result<char> {
		let raw = self.varint()?;
		u32::try_from(raw)
			.ok()
			.and_then(char::from_u32)
			.ok_or_else(|| Error::corrupt(format!("invalid char scalar {raw:#x}")))
	}

	pub fn bytes(&mut self) -> Result<Vec<u8>> {
		let len = self.count()?;
		Ok(self.take(len)?.to_vec())
	}

	pub fn str(&mut self) -> Result<String> {
		let len = self.count()?;
		let raw = self.take(len)?;
		std::str::from_utf8(raw)
			.map(str::to_owned)
			.map_err(|e| Error::corrupt(format!("invalid UTF-8 in string: {e}")))
	}
}
