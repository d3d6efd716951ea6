//! Example caching login sessions, showing how the two codecs treat shared
//! references and transient state.

use std::sync::Arc;

use host_cache::{CodecMode, HostCacheBuilder, HostCacheConfig, reflect_struct};

#[derive(Debug, Clone, PartialEq)]
struct Account {
	login: String,
	roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Session {
	id: u64,
	account: Arc<Account>,
	impersonating: Option<Arc<Account>>,
	// Recomputed after load, never cached
	csrf_token: String,
}

reflect_struct!(Account as "demo.Account" { login: String, roles: Vec<String> });
reflect_struct!(Session as "demo.Session" {
	id: u64,
	account: Arc<Account>,
	impersonating: Option<Arc<Account>>,
}
transient { csrf_token });

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "host_cache=debug".into()),
		)
		.init();

	// HOST_CACHE_CAPACITY / HOST_CACHE_CODEC / HOST_CACHE_SHARDS override the defaults
	let config = HostCacheConfig::from_env();
	let cache = HostCacheBuilder::from_config(&config).build();

	let admin = Arc::new(Account {
		login: "root".to_string(),
		roles: vec!["admin".to_string()],
	});
	// An admin impersonating themselves: both fields hold the same Arc
	let session = Session {
		id: 7,
		account: admin.clone(),
		impersonating: Some(admin),
		csrf_token: "a1b2c3".to_string(),
	};

	for mode in [CodecMode::Structural, CodecMode::GraphAware] {
		cache.put_object_in(mode, "session:7", Some(&session)).expect("session encodes");
		let loaded = cache
			.get_object_in::<Session>(mode, "session:7")
			.expect("session decodes")
			.expect("session was stored");

		let shared = loaded
			.impersonating
			.as_ref()
			.is_some_and(|other| Arc::ptr_eq(other, &loaded.account));
		println!(
			"{mode}: account={} shared={shared} csrf_token={:?}",
			loaded.account.login, loaded.csrf_token
		);
	}

	let text = cache.encode_to_string(&session).expect("session encodes");
	println!("base64 ({} mode): {text}", cache.mode());

	// Last written in graph-aware mode
	match cache.get_object_in::<Account>(CodecMode::GraphAware, "session:7") {
		Err(e) => println!("reading a session as an account fails: {e}"),
		Ok(value) => println!("unexpected value: {value:?}"),
	}
}
