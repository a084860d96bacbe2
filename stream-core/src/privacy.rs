/// Mirrors `net/base/privacy_mode.h`: whether a connection may send/accept
/// cookies and client certificates. Rides alongside a
/// [`crate::nak::NetworkAnonymizationKey`] on every session-key and
/// preconnect-dedup operation; the registry itself stays keyed purely on
/// `(Origin, NetworkAnonymizationKey)` per the core spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrivacyMode {
	#[default]
	Disabled,
	Enabled,
	EnabledWithoutClientCerts,
}

impl PrivacyMode {
	pub fn is_enabled(self) -> bool {
		!matches!(self, PrivacyMode::Disabled)
	}
}
