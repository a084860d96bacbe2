//! A scripted [`ConnectionPool`]. Grounded on `job.rs`'s own `FakePool`
//! test double, generalised into a per-endpoint queue of outcomes so one
//! pool instance can drive multi-Job race scenarios (spec §8 seeds S1-S6).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use stream_core::TransportProtocol;
use stream_factory::{
	ConnectFailure, ConnectFlags, ConnectionHandle, ConnectionPool, Endpoint, PoolError, Priority,
	ProxyInfo, SessionHandle, SessionKey, SslConfig,
};

/// A stream handed back by [`FakeConnectionPool`]; carries a label for
/// assertions, nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStream(pub &'static str);

/// One scripted response to an `init_connection` call.
#[derive(Debug, Clone)]
pub enum ScriptedAttempt {
	Succeed {
		protocol: TransportProtocol,
		was_alpn_negotiated: bool,
		stream: TestStream,
		used_default_network: bool,
	},
	Fail(PoolError),
	/// Failed while running on a non-default network — the scenario
	/// `report_brokenness`'s `mark_broken_until_default_network_changes`
	/// branch exercises, as opposed to a plain `Fail` (assumed to run on
	/// the default network).
	FailOffDefaultNetwork(PoolError),
}

/// Queues of [`ScriptedAttempt`]s keyed by endpoint. An endpoint with no
/// queued attempts (or an exhausted queue) succeeds as plain HTTP/1.1 —
/// most tests only need to script the endpoints they care about.
#[derive(Default)]
pub struct FakeConnectionPool {
	scripts: Mutex<HashMap<Endpoint, VecDeque<ScriptedAttempt>>>,
	h2_sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
	quic_sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
	preconnected: Mutex<Vec<Endpoint>>,
}

impl FakeConnectionPool {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn script(&self, endpoint: Endpoint, attempts: impl IntoIterator<Item = ScriptedAttempt>) {
		self.scripts
			.lock()
			.entry(endpoint)
			.or_default()
			.extend(attempts);
	}

	pub fn give_http2_session(&self, key: SessionKey) {
		self.h2_sessions.lock().insert(key, SessionHandle);
	}

	pub fn give_quic_session(&self, key: SessionKey) {
		self.quic_sessions.lock().insert(key, SessionHandle);
	}

	pub fn preconnected_endpoints(&self) -> Vec<Endpoint> {
		self.preconnected.lock().clone()
	}
}

#[async_trait]
impl ConnectionPool for FakeConnectionPool {
	type Stream = TestStream;

	async fn init_connection(
		&self,
		endpoint: &Endpoint,
		_ssl_config: &SslConfig,
		_proxy_info: &ProxyInfo,
		_priority: Priority,
		_flags: ConnectFlags,
	) -> Result<ConnectionHandle<Self::Stream>, ConnectFailure> {
		let next = self
			.scripts
			.lock()
			.get_mut(endpoint)
			.and_then(VecDeque::pop_front);

		match next {
			Some(ScriptedAttempt::Succeed {
				protocol,
				was_alpn_negotiated,
				stream,
				used_default_network,
			}) => Ok(ConnectionHandle {
				stream,
				negotiated_protocol: protocol,
				was_alpn_negotiated,
				using_spdy: protocol == TransportProtocol::Http2,
				used_default_network,
			}),
			Some(ScriptedAttempt::Fail(e)) => Err(ConnectFailure::new(e)),
			Some(ScriptedAttempt::FailOffDefaultNetwork(e)) => Err(ConnectFailure {
				error: e,
				used_default_network: false,
			}),
			None => Ok(ConnectionHandle {
				stream: TestStream("default"),
				negotiated_protocol: TransportProtocol::Http1_1,
				was_alpn_negotiated: false,
				using_spdy: false,
				used_default_network: true,
			}),
		}
	}

	async fn acquire_http2_session(&self, key: &SessionKey) -> Option<SessionHandle> {
		self.h2_sessions.lock().get(key).copied()
	}

	async fn acquire_quic_session(
		&self,
		key: &SessionKey,
		_versions: &[stream_core::QuicVersion],
	) -> Option<SessionHandle> {
		self.quic_sessions.lock().get(key).copied()
	}

	async fn preconnect_sockets(
		&self,
		endpoint: &Endpoint,
		_n: usize,
		_priority: Priority,
	) -> Result<(), PoolError> {
		self.preconnected.lock().push(endpoint.clone());
		Ok(())
	}
}
