use std::fmt;

/// Mirrors `net/socket/next_proto.h`. Carried by QUIC-capable alternative
/// services as the version the server advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct QuicVersion(pub u32);

impl fmt::Display for QuicVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Q{:03}", self.0)
	}
}

/// A sum of the protocols a Job may end up negotiating. `Unknown` means
/// "whatever the socket negotiates" — only `Main` Jobs may report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
	Unknown,
	Http1_1,
	Http2,
	Quic(QuicVersion),
}

impl TransportProtocol {
	pub fn is_quic(self) -> bool {
		matches!(self, TransportProtocol::Quic(_))
	}

	/// The ALPN token this protocol would negotiate as, for diagnostics.
	pub fn alpn(self) -> &'static str {
		match self {
			TransportProtocol::Unknown => "",
			TransportProtocol::Http1_1 => "http/1.1",
			TransportProtocol::Http2 => "h2",
			TransportProtocol::Quic(_) => "h3",
		}
	}
}

impl fmt::Display for TransportProtocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportProtocol::Unknown => write!(f, "unknown"),
			TransportProtocol::Http1_1 => write!(f, "http/1.1"),
			TransportProtocol::Http2 => write!(f, "h2"),
			TransportProtocol::Quic(v) => write!(f, "h3 ({v})"),
		}
	}
}
