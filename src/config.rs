use std::env;

use serde::{Deserialize, Serialize};

use crate::codec::CodecMode;

pub const DEFAULT_CAPACITY_BYTES: usize = 1024 * 1024 * 1024;

/// Cache configuration, deserialisable from any serde format or read from
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostCacheConfig {
	/// Byte capacity handed to the store.
	pub capacity_bytes: usize,
	/// Codec used by calls that do not name one.
	pub mode: CodecMode,
	/// Shard count of the default store; derived from capacity when unset.
	pub shards: Option<usize>,
}

impl Default for HostCacheConfig {
	fn default() -> Self {
		Self {
			capacity_bytes: DEFAULT_CAPACITY_BYTES,
			mode: CodecMode::Structural,
			shards: None,
		}
	}
}

impl HostCacheConfig {
	/// Read `HOST_CACHE_CAPACITY`, `HOST_CACHE_CODEC` and `HOST_CACHE_SHARDS`.
	///
	/// Unset variables keep their defaults. Unparseable ones are logged and
	/// ignored.
	pub fn from_env() -> Self {
		Self::from_lookup(|name| env::var(name).ok())
	}

	pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let mut config = Self::default();

		if let Some(raw) = lookup("HOST_CACHE_CAPACITY") {
			match raw.trim().parse() {
				Ok(bytes) => config.capacity_bytes = bytes,
				Err(_) => tracing::warn!(value = %raw, "ignoring invalid HOST_CACHE_CAPACITY"),
			}
		}

		if let Some(raw) = lookup("HOST_CACHE_CODEC") {
			match raw.parse() {
				Ok(mode) => config.mode = mode,
				Err(error) => tracing::warn!(%error, "ignoring invalid HOST_CACHE_CODEC"),
			}
		}

		if let Some(raw) = lookup("HOST_CACHE_SHARDS") {
			match raw.trim().parse::<usize>() {
				Ok(0) | Err(_) => tracing::warn!(value = %raw, "ignoring invalid HOST_CACHE_SHARDS"),
				Ok(shards) => config.shards = Some(shards),
			}
		}

		config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
		move |name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| (*v).to_owned())
	}

	#[test]
	fn test_defaults() {
		let config = HostCacheConfig::default();
		assert_eq!(config.capacity_bytes, 1 << 30);
		assert_eq!(config.mode, CodecMode::Structural);
		assert_eq!(config.shards, None);
	}

	#[test]
	fn test_deserialize_partial_json() {
		let config: HostCacheConfig =
			serde_json::from_str(r#"{ "mode": "graph-aware", "shards": 8 }"#).unwrap();
		assert_eq!(config.mode, CodecMode::GraphAware);
		assert_eq!(config.shards, Some(8));
		assert_eq!(config.capacity_bytes, DEFAULT_CAPACITY_BYTES);
	}

	#[test]
	fn test_deserialize_rejects_unknown_fields() {
		assert!(serde_json::from_str::<HostCacheConfig>(r#"{ "capacity": 1 }"#).is_err());
	}

	#[test]
	fn test_env_values() {
		let vars = [
			("HOST_CACHE_CAPACITY", " 65536 "),
			("HOST_CACHE_CODEC", "graph"),
			("HOST_CACHE_SHARDS", "4"),
		];
		let config = HostCacheConfig::from_lookup(lookup(&vars));
		assert_eq!(
			config,
			HostCacheConfig {
				capacity_bytes: 65536,
				mode: CodecMode::GraphAware,
				shards: Some(4),
			}
		);
	}

	#[test]
	fn test_invalid_env_values_keep_defaults() {
		let vars = [
			("HOST_CACHE_CAPACITY", "lots"),
			("HOST_CACHE_CODEC", "kryo"),
			("HOST_CACHE_SHARDS", "0"),
		];
		assert_eq!(HostCacheConfig::from_lookup(lookup(&vars)), HostCacheConfig::default());
	}
}
