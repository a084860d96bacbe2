//! The §6 "External interfaces": narrow contracts the core consumes from
//! (sockets/session pools, proxy resolution, host-mapping rules) or exposes
//! to (the caller's delegate). None of these are implemented here — see
//! `stream-factory-testkit` for in-memory fakes exercised by the tests in
//! this crate.

use async_trait::async_trait;
use std::fmt;

use stream_core::{NetworkAnonymizationKey, Origin, QuicVersion, RequestKey, TransportProtocol};

use crate::error::{ConnectFailure, PoolError};

/// Relative scheduling priority, forwarded verbatim to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i8);

impl Priority {
	pub const LOWEST: Priority = Priority(i8::MIN);
	pub const HIGHEST: Priority = Priority(i8::MAX);
}

impl Default for Priority {
	fn default() -> Self {
		Priority(0)
	}
}

/// One entry of a resolved proxy chain, as returned by [`ProxyResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProxyServer {
	Direct,
	Http(Box<str>, u16),
	Https(Box<str>, u16),
	Socks5(Box<str>, u16),
}

impl fmt::Display for ProxyServer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProxyServer::Direct => write!(f, "direct"),
			ProxyServer::Http(h, p) => write!(f, "http://{h}:{p}"),
			ProxyServer::Https(h, p) => write!(f, "https://{h}:{p}"),
			ProxyServer::Socks5(h, p) => write!(f, "socks5://{h}:{p}"),
		}
	}
}

impl ProxyServer {
	pub fn is_direct(&self) -> bool {
		matches!(self, ProxyServer::Direct)
	}

	pub fn is_https(&self) -> bool {
		matches!(self, ProxyServer::Https(_, _))
	}
}

/// The ordered fallback list a [`ProxyResolver`] returns for one request.
#[derive(Debug, Clone)]
pub struct ProxyInfo {
	servers: Vec<ProxyServer>,
	index: usize,
}

impl ProxyInfo {
	pub fn new(servers: Vec<ProxyServer>) -> Self {
		assert!(!servers.is_empty(), "proxy resolution must yield >=1 entry");
		Self { servers, index: 0 }
	}

	pub fn current(&self) -> &ProxyServer {
		&self.servers[self.index]
	}

	/// Advances to the next fallback proxy; `false` if none remain.
	pub fn advance(&mut self) -> bool {
		if self.index + 1 < self.servers.len() {
			self.index += 1;
			true
		} else {
			false
		}
	}

	pub fn has_fallback(&self) -> bool {
		self.index + 1 < self.servers.len()
	}
}

/// Endpoint a [`ConnectionPool`] is asked to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
	pub host: Box<str>,
	pub port: u16,
}

/// Minimal SSL knobs the core threads through without interpreting.
#[derive(Debug, Clone, Default)]
pub struct SslConfig {
	pub verify_ev_cert: bool,
}

/// Connect-time flags forwarded verbatim to `init_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ConnectFlags {
	pub must_use_quic: bool,
	pub allow_user_alternate_ports: bool,
	pub is_preconnect: bool,
}

/// The result of a successful `init_connection`: the negotiated protocol
/// plus the bookkeeping bits §4.B requires before handoff, and the opaque
/// collaborator-owned stream.
pub struct ConnectionHandle<S> {
	pub stream: S,
	pub negotiated_protocol: TransportProtocol,
	pub was_alpn_negotiated: bool,
	pub using_spdy: bool,
	/// Whether this attempt ran over the device's default network (spec
	/// §4.C step 5, §9 open question). Sourced from the collaborator, not
	/// inferred.
	pub used_default_network: bool,
}

/// A reusable multiplexed session the pool already has warm for a
/// [`SessionKey`]. Opaque: the core only needs to know one exists.
#[derive(Debug, Clone, Copy)]
pub struct SessionHandle;

/// The tuple identifying a reusable H2/QUIC session, per
/// `net/spdy/spdy_session_key.h`. `request` carries the privacy mode and
/// network anonymization key as one unit (see `stream_core::RequestKey`),
/// the same pairing used for the preconnect-dedup set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
	pub origin: Origin,
	pub request: RequestKey,
}

/// Socket / HTTP-2 / QUIC session pools (consumed). Out of scope for the
/// core: the core never looks inside `Self::Stream`.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
	type Stream: Send + 'static;

	async fn init_connection(
		&self,
		endpoint: &Endpoint,
		ssl_config: &SslConfig,
		proxy_info: &ProxyInfo,
		priority: Priority,
		flags: ConnectFlags,
	) -> Result<ConnectionHandle<Self::Stream>, ConnectFailure>;

	async fn acquire_http2_session(&self, key: &SessionKey) -> Option<SessionHandle>;

	async fn acquire_quic_session(
		&self,
		key: &SessionKey,
		versions: &[QuicVersion],
	) -> Option<SessionHandle>;

	async fn preconnect_sockets(
		&self,
		endpoint: &Endpoint,
		n: usize,
		priority: Priority,
	) -> Result<(), PoolError>;
}

/// Proxy resolver (consumed).
#[async_trait]
pub trait ProxyResolver: Send + Sync + 'static {
	async fn resolve(
		&self,
		origin: &Origin,
		method: &str,
		nak: &NetworkAnonymizationKey,
	) -> Result<ProxyInfo, PoolError>;
}

/// Host-mapping rules (consumed). Pure, synchronous.
pub trait HostMappingRules: Send + Sync + 'static {
	fn rewrite(&self, host: &str, port: u16) -> (Box<str>, u16);
}

/// What the caller originally asked the factory for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
	HttpStream,
	BidirectionalStream,
	WebSocketHandshake,
}

/// Caller (delegate) interface (exposed). Every method is a one-shot
/// notification; the core never calls more than one terminal method per
/// Request (see `Request`'s `completed` invariant).
pub trait RequestDelegate: Send + Sync + 'static {
	type Stream: Send + 'static;

	fn on_stream_ready(&self, proxy_info: ProxyInfo, stream: Self::Stream);
	fn on_bidirectional_stream_ready(&self, proxy_info: ProxyInfo, stream: Self::Stream);
	fn on_websocket_handshake_stream_ready(&self, proxy_info: ProxyInfo, stream: Self::Stream);
	fn on_stream_failed(
		&self,
		error: crate::error::StreamError,
		proxy_info: ProxyInfo,
		resolve_error_info: Option<String>,
	);
	fn on_certificate_error(&self, error: crate::error::StreamError);
	fn on_needs_proxy_auth(&self, proxy_info: ProxyInfo);
	fn on_needs_client_auth(&self);
	fn on_https_proxy_tunnel_response(&self, proxy_info: ProxyInfo);
	fn on_quic_broken(&self);
}
