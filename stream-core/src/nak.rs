use crate::privacy::PrivacyMode;

/// Per-partition isolation key separating alternative-service and session
/// state across privacy contexts (e.g. top-frame site). Opaque to the core:
/// it is only ever compared for equality and hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NetworkAnonymizationKey(pub Arc<str>);

use std::sync::Arc;

impl NetworkAnonymizationKey {
	pub fn empty() -> Self {
		Self(Arc::from(""))
	}
}

impl From<&str> for NetworkAnonymizationKey {
	fn from(s: &str) -> Self {
		Self(Arc::from(s))
	}
}

/// The tuple carried by a Request/Controller when asking collaborators
/// (session pools, the preconnect-dedup set) for a key. Adds
/// [`PrivacyMode`] to the NAK per `src/net/spdy/spdy_session_key.h`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
	pub nak: NetworkAnonymizationKey,
	pub privacy_mode: PrivacyMode,
}

impl RequestKey {
	pub fn new(nak: NetworkAnonymizationKey, privacy_mode: PrivacyMode) -> Self {
		Self { nak, privacy_mode }
	}
}
