//! A [`ProxyResolver`] that always returns the same scripted chain, or a
//! per-origin override when one is registered. Grounded on the same
//! "scripted collaborator" shape as [`crate::pool::FakeConnectionPool`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use stream_core::{NetworkAnonymizationKey, Origin};
use stream_factory::{PoolError, ProxyInfo, ProxyResolver, ProxyServer};

pub struct FakeProxyResolver {
	default_chain: Vec<ProxyServer>,
	overrides: Mutex<HashMap<Origin, Vec<ProxyServer>>>,
}

impl FakeProxyResolver {
	pub fn direct() -> Self {
		Self {
			default_chain: vec![ProxyServer::Direct],
			overrides: Mutex::new(HashMap::new()),
		}
	}

	pub fn with_chain(chain: Vec<ProxyServer>) -> Self {
		Self {
			default_chain: chain,
			overrides: Mutex::new(HashMap::new()),
		}
	}

	pub fn set_chain_for(&self, origin: Origin, chain: Vec<ProxyServer>) {
		self.overrides.lock().insert(origin, chain);
	}
}

#[async_trait]
impl ProxyResolver for FakeProxyResolver {
	async fn resolve(
		&self,
		origin: &Origin,
		_method: &str,
		_nak: &NetworkAnonymizationKey,
	) -> Result<ProxyInfo, PoolError> {
		let chain = self
			.overrides
			.lock()
			.get(origin)
			.cloned()
			.unwrap_or_else(|| self.default_chain.clone());
		Ok(ProxyInfo::new(chain))
	}
}
