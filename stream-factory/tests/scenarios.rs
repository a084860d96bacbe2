//! End-to-end seed scenarios, one Controller per test, real `tokio::select!`
//! racing against the in-memory fakes from `stream-factory-testkit`.

use std::sync::Arc;
use std::time::Duration;

use stream_core::{NetworkAnonymizationKey, Origin, PrivacyMode, Scheme, TransportProtocol};
use stream_factory::{
	AlternativeService, AltServiceInfo, Config, Controller, Endpoint, NoopMetrics, Priority,
	ProxyServer, SslConfig, StreamKind,
};
use stream_factory_testkit::{
	DelegateEvent, FakeConnectionPool, FakeProxyResolver, RecordingDelegate, ScriptedAttempt, TestStream,
};

fn origin() -> Origin {
	Origin::new(Scheme::Https, "example.com", 443)
}

fn nak() -> NetworkAnonymizationKey {
	NetworkAnonymizationKey::from("test-nak")
}

fn main_endpoint() -> Endpoint {
	Endpoint { host: "example.com".into(), port: 443 }
}

struct Harness {
	pool: Arc<FakeConnectionPool>,
	proxy_resolver: Arc<FakeProxyResolver>,
	delegate: Arc<RecordingDelegate>,
	config: Arc<Config>,
	registry: Arc<stream_factory::Registry>,
}

impl Harness {
	fn new() -> Self {
		let config = Arc::new(Config::default());
		Self {
			pool: Arc::new(FakeConnectionPool::new()),
			proxy_resolver: Arc::new(FakeProxyResolver::direct()),
			delegate: Arc::new(RecordingDelegate::new()),
			registry: Arc::new(stream_factory::Registry::new(&config)),
			config,
		}
	}

	async fn run(&self, stream_kind: StreamKind) {
		let (controller, _handle) = Controller::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.config),
			Arc::new(NoopMetrics),
			Arc::clone(&self.pool),
			Arc::clone(&self.proxy_resolver) as Arc<dyn stream_factory::ProxyResolver>,
			origin(),
			nak(),
			PrivacyMode::Disabled,
			SslConfig::default(),
			stream_kind,
			Arc::clone(&self.delegate) as Arc<dyn stream_factory::RequestDelegate<Stream = TestStream>>,
			Priority::default(),
		);
		controller.run().await;
	}
}

/// S1: plain HTTPS request, no alternative service on record — the Main Job
/// wins trivially and the delegate sees exactly one `StreamReady`.
#[tokio::test(start_paused = true)]
async fn s1_plain_https_no_alt_service() {
	let h = Harness::new();
	h.pool.script(
		main_endpoint(),
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http1_1,
			was_alpn_negotiated: false,
			stream: TestStream("main"),
			used_default_network: true,
		}],
	);

	h.run(StreamKind::HttpStream).await;

	let events = h.delegate.events();
	assert_eq!(h.delegate.terminal_count(), 1);
	assert!(matches!(events.as_slice(), [DelegateEvent::StreamReady(s)] if s.0 == "main"));
}

/// S2: an alternative service is on record but fails outright — Main is
/// gated behind it (spec §4.C step 3) and only resumes once the Alt Job's
/// failure unblocks it, then serves the request alone.
#[tokio::test(start_paused = true)]
async fn s2_main_wins_after_alt_fails() {
	let h = Harness::new();
	let alt_endpoint = Endpoint { host: "alt.example.com".into(), port: 443 };

	h.registry.set_alternatives(
		&origin(),
		&nak(),
		vec![AltServiceInfo {
			service: AlternativeService {
				protocol: TransportProtocol::Http2,
				host: "alt.example.com".into(),
				port: 443,
				advertised_quic_versions: vec![],
			},
			expiration: std::time::Instant::now() + Duration::from_secs(3600),
		}],
	);

	h.pool.script(
		main_endpoint(),
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http1_1,
			was_alpn_negotiated: false,
			stream: TestStream("main"),
			used_default_network: true,
		}],
	);
	h.pool.script(
		alt_endpoint,
		[ScriptedAttempt::Fail(stream_factory::PoolError::ConnectionReset)],
	);

	h.run(StreamKind::HttpStream).await;

	assert_eq!(h.delegate.terminal_count(), 1);
	assert!(matches!(
		h.delegate.events().as_slice(),
		[DelegateEvent::StreamReady(s)] if s.0 == "main"
	));
}

/// S3: the alternative service wins the race — Main is orphaned (cancelled,
/// since the winner succeeded on the default network and there's no
/// DNS-ALPN-H3 sibling), and the caller only ever sees the Alt's stream.
#[tokio::test(start_paused = true)]
async fn s3_alt_wins_race() {
	let h = Harness::new();
	let alt_endpoint = Endpoint { host: "alt.example.com".into(), port: 443 };

	h.registry.set_alternatives(
		&origin(),
		&nak(),
		vec![AltServiceInfo {
			service: AlternativeService {
				protocol: TransportProtocol::Http2,
				host: "alt.example.com".into(),
				port: 443,
				advertised_quic_versions: vec![],
			},
			expiration: std::time::Instant::now() + Duration::from_secs(3600),
		}],
	);

	h.pool.script(
		alt_endpoint,
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http2,
			was_alpn_negotiated: true,
			stream: TestStream("alt"),
			used_default_network: true,
		}],
	);
	// Main is blocked behind the alt job and never reaches InitConnection
	// before the request completes, so it doesn't need a script entry.

	h.run(StreamKind::HttpStream).await;

	assert_eq!(h.delegate.terminal_count(), 1);
	assert!(matches!(
		h.delegate.events().as_slice(),
		[DelegateEvent::StreamReady(s)] if s.0 == "alt"
	));
}

/// S4: the alternative service is already marked broken — the Controller
/// never plans it into the race at all, and Main serves the request alone.
#[tokio::test(start_paused = true)]
async fn s4_alt_broken_main_used() {
	let h = Harness::new();
	let alt = AlternativeService {
		protocol: TransportProtocol::Http2,
		host: "alt.example.com".into(),
		port: 443,
		advertised_quic_versions: vec![],
	};
	h.registry.set_alternatives(
		&origin(),
		&nak(),
		vec![AltServiceInfo { service: alt.clone(), expiration: std::time::Instant::now() + Duration::from_secs(3600) }],
	);
	h.registry.mark_broken(&origin(), &nak(), &alt, std::time::Instant::now());

	h.pool.script(
		main_endpoint(),
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http1_1,
			was_alpn_negotiated: false,
			stream: TestStream("main"),
			used_default_network: true,
		}],
	);

	h.run(StreamKind::HttpStream).await;

	assert_eq!(h.delegate.terminal_count(), 1);
	assert!(matches!(
		h.delegate.events().as_slice(),
		[DelegateEvent::StreamReady(s)] if s.0 == "main"
	));
}

/// S5: the first proxy in the chain is unreachable in a proxy-reconsiderable
/// way; the Controller advances to the next proxy and completes there.
#[tokio::test(start_paused = true)]
async fn s5_proxy_reconsider() {
	let h = Harness::new();
	h.proxy_resolver.set_chain_for(
		origin(),
		vec![
			ProxyServer::Https("proxy-a.example".into(), 443),
			ProxyServer::Direct,
		],
	);

	h.pool.script(
		main_endpoint(),
		[
			ScriptedAttempt::Fail(stream_factory::PoolError::ProxyConnectionFailed(
				"proxy-a.example".into(),
			)),
			ScriptedAttempt::Succeed {
				protocol: TransportProtocol::Http1_1,
				was_alpn_negotiated: false,
				stream: TestStream("main-direct"),
				used_default_network: true,
			},
		],
	);

	h.run(StreamKind::HttpStream).await;

	assert_eq!(h.delegate.terminal_count(), 1);
	assert!(matches!(
		h.delegate.events().as_slice(),
		[DelegateEvent::StreamReady(s)] if s.0 == "main-direct"
	));
}

/// S6: two preconnects to the same HTTPS proxy dedup to a single attempt.
#[tokio::test(start_paused = true)]
async fn s6_preconnect_dedup() {
	let config = Arc::new(Config::default());
	let registry = Arc::new(stream_factory::Registry::new(&config));
	let pool = Arc::new(FakeConnectionPool::new());
	let proxy_resolver = Arc::new(FakeProxyResolver::with_chain(vec![ProxyServer::Https(
		"proxy.example".into(),
		443,
	)]));
	let host_mapping = Arc::new(stream_factory_testkit::ChromiumHostMappingRules::new());

	let factory = stream_factory::Factory::new(
		Arc::clone(&registry),
		Arc::clone(&config),
		Arc::new(NoopMetrics),
		Arc::clone(&pool),
		Arc::clone(&proxy_resolver) as Arc<dyn stream_factory::ProxyResolver>,
		host_mapping as Arc<dyn stream_factory::HostMappingRules>,
	);

	let info = stream_factory::RequestInfo {
		url: "https://example.com/".parse().unwrap(),
		nak: nak(),
		privacy_mode: PrivacyMode::Disabled,
	};

	Arc::clone(&factory).preconnect_streams(1, info.clone()).await;
	Arc::clone(&factory).preconnect_streams(1, info).await;

	// Both preconnects share the one HTTPS proxy, so only one Controller
	// actually ran the preconnect Jobs; the pool should have seen exactly
	// one preconnect call for the main endpoint.
	assert_eq!(pool.preconnected_endpoints().len(), 1);
}

/// Binding invariant: once bound, exactly one terminal delegate callback
/// fires, even when both Main and Alt would otherwise succeed.
#[tokio::test(start_paused = true)]
async fn exactly_once_binding_when_both_jobs_would_succeed() {
	let h = Harness::new();
	let alt_endpoint = Endpoint { host: "alt.example.com".into(), port: 443 };
	h.registry.set_alternatives(
		&origin(),
		&nak(),
		vec![AltServiceInfo {
			service: AlternativeService {
				protocol: TransportProtocol::Http2,
				host: "alt.example.com".into(),
				port: 443,
				advertised_quic_versions: vec![],
			},
			expiration: std::time::Instant::now() + Duration::from_secs(3600),
		}],
	);
	h.pool.script(
		alt_endpoint,
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http2,
			was_alpn_negotiated: true,
			stream: TestStream("alt"),
			used_default_network: true,
		}],
	);
	h.pool.script(
		main_endpoint(),
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http1_1,
			was_alpn_negotiated: false,
			stream: TestStream("main"),
			used_default_network: true,
		}],
	);

	h.run(StreamKind::HttpStream).await;

	assert_eq!(h.delegate.terminal_count(), 1);
}

/// Registry monotonicity: repeated `set_alternatives` with the same list
/// doesn't perturb brokenness state for services that survive the update.
#[tokio::test(start_paused = true)]
async fn registry_set_alternatives_preserves_brokenness_across_repeats() {
	let config = Config::default();
	let registry = stream_factory::Registry::new(&config);
	let alt = AlternativeService {
		protocol: TransportProtocol::Http2,
		host: "alt.example.com".into(),
		port: 443,
		advertised_quic_versions: vec![],
	};
	let now = std::time::Instant::now();
	let list = vec![AltServiceInfo { service: alt.clone(), expiration: now + Duration::from_secs(3600) }];

	registry.set_alternatives(&origin(), &nak(), list.clone());
	registry.mark_broken(&origin(), &nak(), &alt, now);
	assert!(registry.is_broken(&origin(), &nak(), &alt, now));

	registry.set_alternatives(&origin(), &nak(), list);
	assert!(registry.is_broken(&origin(), &nak(), &alt, now));
}

/// S7: the alternative service fails, but over a non-default network — spec
/// §4.C step 5's other brokenness outcome. Unlike `s2_main_wins_after_alt_fails`
/// (a plain default-network failure, which earns an expiring backoff), this
/// marks the alt-service broken only until the default network changes.
#[tokio::test(start_paused = true)]
async fn s7_alt_fails_off_default_network() {
	let h = Harness::new();
	let alt_endpoint = Endpoint { host: "alt.example.com".into(), port: 443 };
	let alt = AlternativeService {
		protocol: TransportProtocol::Http2,
		host: "alt.example.com".into(),
		port: 443,
		advertised_quic_versions: vec![],
	};
	h.registry.set_alternatives(
		&origin(),
		&nak(),
		vec![AltServiceInfo {
			service: alt.clone(),
			expiration: std::time::Instant::now() + Duration::from_secs(3600),
		}],
	);

	h.pool.script(
		main_endpoint(),
		[ScriptedAttempt::Succeed {
			protocol: TransportProtocol::Http1_1,
			was_alpn_negotiated: false,
			stream: TestStream("main"),
			used_default_network: true,
		}],
	);
	h.pool.script(
		alt_endpoint,
		[ScriptedAttempt::FailOffDefaultNetwork(stream_factory::PoolError::ConnectionReset)],
	);

	h.run(StreamKind::HttpStream).await;

	assert_eq!(h.delegate.terminal_count(), 1);
	assert!(matches!(
		h.delegate.events().as_slice(),
		[DelegateEvent::StreamReady(s)] if s.0 == "main"
	));
	assert!(h.registry.is_broken(&origin(), &nak(), &alt, std::time::Instant::now()));
}
