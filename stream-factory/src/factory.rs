//! Component E: the process-wide entry point (spec §4.E). Owns the set of
//! live Controllers and the preconnecting-proxy dedup set; turns parsed
//! `Alt-Svc` response headers into Registry writes.
//!
//! Grounded on `crates/agentgateway/src/client/mod.rs`'s `Client` (one
//! long-lived owner object, a pool keyed by `PoolKey`) for "one owner,
//! keyed map of in-flight work".

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use stream_core::{NetworkAnonymizationKey, Origin, PrivacyMode, QuicVersion, Scheme, TransportProtocol};

use crate::alt_service::{AltServiceInfo, AlternativeService};
use crate::config::Config;
use crate::controller::Controller;
use crate::error::FactoryError;
use crate::interfaces::{
	ConnectionPool, HostMappingRules, Priority, ProxyInfo, ProxyResolver, ProxyServer,
	RequestDelegate, SslConfig, StreamKind,
};
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::request::{NoopRequestDelegate, Request};

/// What the caller asked for, before proxy resolution or Job planning.
/// `url` is resolved to an [`Origin`] via its scheme/host/port; anything
/// else (path, query) is outside this crate's concern (spec §1 excludes
/// per-transaction HTTP).
#[derive(Debug, Clone)]
pub struct RequestInfo {
	pub url: http::Uri,
	pub nak: NetworkAnonymizationKey,
	pub privacy_mode: PrivacyMode,
}

fn parse_origin(url: &http::Uri) -> Option<Origin> {
	let scheme = match url.scheme_str()? {
		"http" => Scheme::Http,
		"https" => Scheme::Https,
		"ws" => Scheme::Ws,
		"wss" => Scheme::Wss,
		_ => return None,
	};
	let host = url.host()?;
	if host.is_empty() {
		return None;
	}
	let port = url.port_u16().unwrap_or_else(|| scheme.default_port());
	Some(Origin::new(scheme, host, port))
}

/// Bounded, evict-oldest dedup set keyed by `(proxy, privacy_mode)` (spec
/// §4.E "Preconnect deduplication").
struct PreconnectDedup {
	order: VecDeque<(ProxyServer, PrivacyMode)>,
	members: HashSet<(ProxyServer, PrivacyMode)>,
	cap: usize,
}

impl PreconnectDedup {
	fn new(cap: usize) -> Self {
		Self {
			order: VecDeque::new(),
			members: HashSet::new(),
			cap: cap.max(1),
		}
	}

	/// `true` if this is a new entry (caller should proceed);
	/// `false` if already present (caller should skip).
	fn try_insert(&mut self, key: (ProxyServer, PrivacyMode)) -> bool {
		if self.members.contains(&key) {
			return false;
		}
		if self.order.len() >= self.cap {
			if let Some(oldest) = self.order.pop_front() {
				self.members.remove(&oldest);
			}
		}
		self.order.push_back(key.clone());
		self.members.insert(key);
		true
	}
}

/// Parses one `Alt-Svc` header segment without splitting inside quotes
/// (quoted `v="1,2,3"` values may themselves contain the separator).
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
	let mut out = Vec::new();
	let mut start = 0;
	let mut in_quotes = false;
	for (i, c) in s.char_indices() {
		match c {
			'"' => in_quotes = !in_quotes,
			c if c == sep && !in_quotes => {
				out.push(&s[start..i]);
				start = i + c.len_utf8();
			},
			_ => {},
		}
	}
	out.push(&s[start..]);
	out
}

/// Picks the QUIC version to record for an advertised alt-service, honoring
/// spec §6's `supported_quic_versions` restriction. An empty
/// `advertised_quic_versions` list (server didn't advertise one) falls back
/// to the client's own preferred version; an empty `supported_quic_versions`
/// config (no explicit restriction) accepts whatever the server advertised.
fn negotiate_quic_version(config: &Config, advertised: &[QuicVersion]) -> Option<QuicVersion> {
	if advertised.is_empty() {
		return Some(config.supported_quic_versions.first().copied().unwrap_or(QuicVersion(1)));
	}
	if config.supported_quic_versions.is_empty() {
		return advertised.first().copied();
	}
	advertised
		.iter()
		.copied()
		.find(|v| config.supported_quic_versions.contains(v))
}

/// Parses one comma-separated `Alt-Svc` entry:
/// `<proto-id>=<host>:<port>[;ma=<seconds>][;v="<versions>"]`. Free function
/// (rather than a `Factory` method) so it only needs the collaborators it
/// actually touches — `Config` and `HostMappingRules` — and can be tested
/// without constructing a full `Factory<P>`.
fn parse_alt_svc_entry(
	config: &Config,
	host_mapping: &dyn HostMappingRules,
	entry: &str,
	origin: &Origin,
	now: Instant,
) -> Option<AltServiceInfo> {
	let mut parts = split_unquoted(entry, ';');
	let head = parts.first()?.trim();
	let (proto_id, host_port) = head.split_once('=')?;
	let host_port = host_port.trim().trim_matches('"');
	let (host_part, port_part) = host_port.rsplit_once(':')?;
	let port: u16 = port_part.parse().ok()?;

	let mut ma_seconds: u64 = 86_400;
	let mut advertised_quic_versions = Vec::new();
	for param in parts.drain(1..) {
		let Some((key, value)) = param.trim().split_once('=') else {
			continue;
		};
		let value = value.trim().trim_matches('"');
		match key.trim() {
			"ma" => ma_seconds = value.parse().unwrap_or(ma_seconds),
			"v" => {
				advertised_quic_versions = value
					.split(',')
					.filter_map(|v| v.trim().parse::<u32>().ok())
					.map(QuicVersion)
					.collect();
			},
			_ => {},
		}
	}

	let protocol = match proto_id.trim() {
		"h2" if config.enable_http2 => TransportProtocol::Http2,
		p if config.enable_quic && (p.starts_with("h3") || p.eq_ignore_ascii_case("quic")) => {
			match negotiate_quic_version(config, &advertised_quic_versions) {
				Some(v) => TransportProtocol::Quic(v),
				None => return None,
			}
		},
		_ => return None,
	};

	if port < 1024 && !config.enable_user_alternate_protocol_ports {
		return None;
	}

	let host = if host_part.is_empty() { origin.host.as_ref() } else { host_part };
	let (rewritten_host, rewritten_port) = host_mapping.rewrite(host, port);

	Some(AltServiceInfo {
		service: AlternativeService {
			protocol,
			host: rewritten_host,
			port: rewritten_port,
			advertised_quic_versions,
		},
		expiration: now + Duration::from_secs(ma_seconds),
	})
}

/// Process-wide owner of the Controller set and the preconnecting-proxy
/// dedup set. Cheaply cloneable (an `Arc` wrapper); every clone shares the
/// same state.
pub struct Factory<P: ConnectionPool> {
	registry: Arc<Registry>,
	config: Arc<Config>,
	metrics: Arc<dyn Metrics>,
	pool: Arc<P>,
	proxy_resolver: Arc<dyn ProxyResolver>,
	host_mapping: Arc<dyn HostMappingRules>,
	live_controllers: Mutex<HashMap<u64, ()>>,
	next_controller_id: AtomicU64,
	preconnecting: Mutex<PreconnectDedup>,
}

impl<P: ConnectionPool> Factory<P> {
	pub fn new(
		registry: Arc<Registry>,
		config: Arc<Config>,
		metrics: Arc<dyn Metrics>,
		pool: Arc<P>,
		proxy_resolver: Arc<dyn ProxyResolver>,
		host_mapping: Arc<dyn HostMappingRules>,
	) -> Arc<Self> {
		let cap = config.preconnect_proxy_cap;
		Arc::new(Self {
			registry,
			config,
			metrics,
			pool,
			proxy_resolver,
			host_mapping,
			live_controllers: Mutex::new(HashMap::new()),
			next_controller_id: AtomicU64::new(0),
			preconnecting: Mutex::new(PreconnectDedup::new(cap)),
		})
	}

	pub fn request_stream(
		self: &Arc<Self>,
		info: RequestInfo,
		priority: Priority,
		delegate: Arc<dyn RequestDelegate<Stream = P::Stream>>,
	) -> Result<Request, FactoryError> {
		self.start_request(info, priority, delegate, StreamKind::HttpStream)
	}

	pub fn request_bidirectional_stream(
		self: &Arc<Self>,
		info: RequestInfo,
		priority: Priority,
		delegate: Arc<dyn RequestDelegate<Stream = P::Stream>>,
	) -> Result<Request, FactoryError> {
		self.start_request(info, priority, delegate, StreamKind::BidirectionalStream)
	}

	pub fn request_websocket_handshake_stream(
		self: &Arc<Self>,
		info: RequestInfo,
		priority: Priority,
		delegate: Arc<dyn RequestDelegate<Stream = P::Stream>>,
	) -> Result<Request, FactoryError> {
		self.start_request(info, priority, delegate, StreamKind::WebSocketHandshake)
	}

	fn start_request(
		self: &Arc<Self>,
		info: RequestInfo,
		priority: Priority,
		delegate: Arc<dyn RequestDelegate<Stream = P::Stream>>,
		stream_kind: StreamKind,
	) -> Result<Request, FactoryError> {
		let origin = parse_origin(&info.url)
			.ok_or_else(|| FactoryError::InvalidUrl(info.url.to_string().into()))?;

		let (controller, handle) = Controller::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.config),
			Arc::clone(&self.metrics),
			Arc::clone(&self.pool),
			Arc::clone(&self.proxy_resolver),
			origin,
			info.nak,
			info.privacy_mode,
			SslConfig::default(),
			stream_kind,
			delegate,
			priority,
		);

		let id = self.next_controller_id.fetch_add(1, Ordering::Relaxed);
		self.live_controllers.lock().unwrap().insert(id, ());
		let factory = Arc::clone(self);
		tokio::spawn(async move {
			controller.run().await;
			factory.on_job_controller_complete(id);
		});

		Ok(Request::new(handle, stream_kind))
	}

	/// Spec §4.E `preconnect_streams(n, request_info)`: invalid URLs are
	/// silently accepted as no-ops. Valid URLs produce a preconnect-only
	/// Controller with no delegate ([`NoopRequestDelegate`]).
	pub async fn preconnect_streams(self: Arc<Self>, n: usize, info: RequestInfo) {
		let Some(origin) = parse_origin(&info.url) else { return };

		let proxy_info = match self
			.proxy_resolver
			.resolve(&origin, "GET", &info.nak)
			.await
		{
			Ok(p) => p,
			Err(_) => return,
		};

		if proxy_info.current().is_https() {
			let key = (proxy_info.current().clone(), info.privacy_mode);
			let mut set = self.preconnecting.lock().unwrap();
			if !set.try_insert(key) {
				trace!("skipping duplicate preconnecting-proxy request");
				return;
			}
		}

		let delegate: Arc<dyn RequestDelegate<Stream = P::Stream>> =
			Arc::new(NoopRequestDelegate::default());
		let (controller, _handle) = Controller::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.config),
			Arc::clone(&self.metrics),
			Arc::clone(&self.pool),
			Arc::clone(&self.proxy_resolver),
			origin,
			info.nak,
			info.privacy_mode,
			SslConfig::default(),
			StreamKind::HttpStream,
			delegate,
			Priority::default(),
		);
		controller.run_preconnect(n, proxy_info).await;
	}

	/// Spec §4.E `process_alternative_services`: parses the `Alt-Svc`
	/// header, filters by protocol enablement and port validity, rewrites
	/// the host via host-mapping rules, writes the result into the
	/// Registry. Invalid entries are skipped, not rejected.
	pub fn process_alternative_services(
		&self,
		header_value: &str,
		origin: &Origin,
		nak: &NetworkAnonymizationKey,
	) {
		let header_value = header_value.trim();
		if header_value.eq_ignore_ascii_case("clear") {
			self.registry.set_alternatives(origin, nak, Vec::new());
			return;
		}

		let now = Instant::now();
		let mut services = Vec::new();

		for entry in split_unquoted(header_value, ',') {
			let entry = entry.trim();
			if entry.is_empty() {
				continue;
			}
			let Some(info) =
				parse_alt_svc_entry(&self.config, self.host_mapping.as_ref(), entry, origin, now)
			else {
				debug!(%entry, "skipping invalid Alt-Svc entry");
				continue;
			};
			services.push(info);
		}

		self.registry.set_alternatives(origin, nak, services);
	}

	fn on_job_controller_complete(&self, id: u64) {
		self.live_controllers.lock().unwrap().remove(&id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct IdentityHostMapping;
	impl HostMappingRules for IdentityHostMapping {
		fn rewrite(&self, host: &str, port: u16) -> (Box<str>, u16) {
			(host.into(), port)
		}
	}

	#[test]
	fn parses_simple_h2_entry() {
		let origin = Origin::new(Scheme::Https, "example.com", 443);
		let config = Config::default();
		let now = Instant::now();
		let info = parse_alt_svc_entry(&config, &IdentityHostMapping, r#"h2=":443"; ma=3600"#, &origin, now)
			.expect("valid entry");
		assert_eq!(info.service.protocol, TransportProtocol::Http2);
		assert_eq!(info.service.port, 443);
		assert_eq!(info.service.host.as_ref(), "example.com");
	}

	#[test]
	fn rejects_privileged_port_without_allow_flag() {
		let origin = Origin::new(Scheme::Https, "example.com", 443);
		let config = Config::default();
		let now = Instant::now();
		assert!(parse_alt_svc_entry(
			&config,
			&IdentityHostMapping,
			r#"h2="alt.example.com:80""#,
			&origin,
			now
		)
		.is_none());
	}

	#[test]
	fn split_unquoted_respects_quoted_commas() {
		let parts = split_unquoted(r#"h3-29=":443"; v="1,2,3""#, ',');
		assert_eq!(parts, vec![r#"h3-29=":443"; v="1,2,3""#]);
	}
}
