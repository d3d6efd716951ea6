//! Error types for encoding, decoding and store access.

/// Failures surfaced by the codecs and the cache facade.
///
/// All of them are deterministic functions of their input; nothing in this
/// crate retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// The byte store backend could not be loaded.
	#[error("byte store unavailable: {0}")]
	Unavailable(String),

	/// The encoded unit holds a different type than the caller asked for.
	#[error("type mismatch: expected {expected}, found {found}")]
	TypeMismatch {
		expected: String,
		found: String,
	},

	/// The value cannot be encoded or decoded with the active codec.
	#[error("unsupported shape: {0}")]
	UnsupportedShape(String),

	/// The encoded bytes are malformed.
	#[error("corrupt encoded unit: {0}")]
	Corruption(String),
}

impl Error {
	pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
		Error::TypeMismatch {
			expected: expected.into(),
			found: found.into(),
		}
	}

	pub(crate) fn unsupported(message: impl Into<String>) -> Self {
		Error::UnsupportedShape(message.into())
	}

	pub(crate) fn corrupt(message: impl Into<String>) -> Self {
		Error::Corruption(message.into())
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_type_mismatch_display() {
		let err = Error::mismatch("demo.Point", "demo.Line");
		assert_eq!(err.to_string(), "type mismatch: expected demo.Point, found demo.Line");
	}

	#[test]
	fn test_corruption_display() {
		let err = Error::corrupt("truncated varint");
		assert_eq!(err.to_string(), "corrupt encoded unit: truncated varint");
	}
}
