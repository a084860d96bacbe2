//! Component B: one attempted path to a transport (spec §4.B).
//!
//! Grounded on `crates/agentgateway/src/client/mod.rs`'s `Connector`
//! (a `tower::Service` whose `call()` drives one connect attempt to
//! completion as a single boxed future) for "one async function is the
//! whole state machine"; the explicit `JobState` enum exists purely for
//! observability/testing (spec §8's "observable points"), following
//! spec §9's redesign note to replace callback-driven states with an
//! async operation advanced by awaiting collaborator results.

use std::sync::Arc;
use std::time::Duration;

use stream_core::TransportProtocol;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::error::{ConnectFailure, JobError, PoolError};
use crate::interfaces::{
	ConnectFlags, ConnectionHandle, ConnectionPool, Endpoint, Priority, ProxyInfo, SslConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
	Main,
	Alternative,
	DnsAlpnH3,
	Preconnect,
	PreconnectDnsAlpnH3,
}

impl JobType {
	pub fn is_preconnect(self) -> bool {
		matches!(self, JobType::Preconnect | JobType::PreconnectDnsAlpnH3)
	}
}

/// Observable job state, spec §3 "Job state". `*Complete` sub-states are
/// collapsed into their successor in this implementation (the
/// `ConnectionPool` trait hands back a fully-formed result in one await,
/// matching spec §1's exclusion of the per-transaction HTTP layer) but the
/// enum keeps the full vocabulary so callers/tests can assert on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
	Start,
	Wait,
	WaitComplete,
	InitConnection,
	InitConnectionComplete,
	CreateStream,
	CreateStreamComplete,
	WaitingUserAction,
	RestartTunnelAuth,
	RestartTunnelAuthComplete,
	Done,
}

/// How a Main Job decides whether to pause in `Wait` before
/// `InitConnection` (spec §4.B "HTTP/2 throttling" and spec §4.C step 3).
/// Alternative/DNS-ALPN Jobs never wait (spec §4.B).
#[derive(Debug, Clone, Copy)]
pub enum WaitPolicy {
	/// Proceed straight to `InitConnection`.
	None,
	/// Self-contained ~300ms pause to let a sibling HTTP/2 session
	/// materialise; resumes on its own timeout or an explicit `resume()`.
	Http2Throttle(Duration),
	/// Blocked by the controller's scheduling decision
	/// (`main_job_is_blocked`); only an explicit `resume()` advances it.
	/// The controller is responsible for bounding this at
	/// `max_main_job_unblock_delay` (spec §5 invariant 3).
	ControllerGated,
}

/// Signals the controller can send into a running Job (spec §4.B public
/// contract).
#[derive(Debug)]
pub enum JobSignal {
	Resume,
	Orphan,
	SetPriority(Priority),
	RestartTunnelWithProxyAuth,
	Cancel,
}

/// What the Controller is left holding once a Job starts running.
pub struct JobHandle {
	pub job_type: JobType,
	signal_tx: mpsc::UnboundedSender<JobSignal>,
	priority_tx: watch::Sender<Priority>,
	state_rx: watch::Receiver<JobState>,
	user_action_rx: watch::Receiver<Option<UserActionEvent>>,
}

impl JobHandle {
	/// Last state the Job reported. Used by the Controller to resolve
	/// `Request::load_state()`'s "dominant job" (spec §4.D).
	pub fn state(&self) -> JobState {
		*self.state_rx.borrow()
	}

	/// The user-actionable error this Job is currently parked on, if any.
	/// Cleared back to `None` once the Job resumes past `WaitingUserAction`.
	pub fn user_action(&self) -> Option<UserActionEvent> {
		self.user_action_rx.borrow().clone()
	}

	pub fn resume(&self) {
		let _ = self.signal_tx.send(JobSignal::Resume);
	}

	/// Orphaning a Main Job is forbidden (spec §4.B); callers must check
	/// `job_type` themselves, this just documents the invariant.
	pub fn orphan(&self) {
		debug_assert!(
			!matches!(self.job_type, JobType::Main),
			"main job must never be orphaned"
		);
		let _ = self.signal_tx.send(JobSignal::Orphan);
	}

	pub fn set_priority(&self, p: Priority) {
		let _ = self.priority_tx.send(p);
		let _ = self.signal_tx.send(JobSignal::SetPriority(p));
	}

	pub fn restart_tunnel_with_proxy_auth(&self) {
		let _ = self.signal_tx.send(JobSignal::RestartTunnelWithProxyAuth);
	}

	pub fn cancel(&self) {
		let _ = self.signal_tx.send(JobSignal::Cancel);
	}
}

/// Carried out of a running Job to its Controller the moment the Job parks
/// in `WaitingUserAction` (spec §6/§7 "user-actionable" errors). Delivered
/// over [`JobHandle::user_action`] rather than as a `JobOutcome` variant,
/// since the Job hasn't terminated — it's still parked, awaiting
/// `RestartTunnelWithProxyAuth` or cancellation.
#[derive(Debug, Clone)]
pub struct UserActionEvent {
	pub error: PoolError,
	pub proxy_info: ProxyInfo,
}

/// Terminal outcome of [`Job::run`].
pub enum JobOutcome<S> {
	Stream {
		handle: ConnectionHandle<S>,
		failed_on_default_network: bool,
	},
	PreconnectComplete,
	Failed {
		error: JobError,
		should_reconsider_proxy: bool,
		failed_on_default_network: bool,
	},
	Cancelled,
}

pub struct Job<P: ConnectionPool> {
	pub job_type: JobType,
	endpoint: Endpoint,
	/// `Unknown` for `Main` (accepts whatever negotiates); locked for
	/// `Alternative`/`DnsAlpnH3`.
	expected_protocol: TransportProtocol,
	must_use_quic: bool,
	preconnect_n: Option<usize>,
	wait_policy: WaitPolicy,
	proxy_info: ProxyInfo,
	ssl_config: SslConfig,
	pool: Arc<P>,
	signal_rx: mpsc::UnboundedReceiver<JobSignal>,
	priority_rx: watch::Receiver<Priority>,
	state: JobState,
	state_tx: watch::Sender<JobState>,
	user_action_tx: watch::Sender<Option<UserActionEvent>>,
	is_orphaned: bool,
}

impl<P: ConnectionPool> Job<P> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		job_type: JobType,
		endpoint: Endpoint,
		expected_protocol: TransportProtocol,
		must_use_quic: bool,
		preconnect_n: Option<usize>,
		wait_policy: WaitPolicy,
		proxy_info: ProxyInfo,
		ssl_config: SslConfig,
		priority: Priority,
		pool: Arc<P>,
	) -> (Self, JobHandle) {
		let (signal_tx, signal_rx) = mpsc::unbounded_channel();
		let (priority_tx, priority_rx) = watch::channel(priority);
		let (state_tx, state_rx) = watch::channel(JobState::Start);
		let (user_action_tx, user_action_rx) = watch::channel(None);
		let handle = JobHandle {
			job_type,
			signal_tx,
			priority_tx,
			state_rx,
			user_action_rx,
		};
		let job = Self {
			job_type,
			endpoint,
			expected_protocol,
			must_use_quic,
			preconnect_n,
			wait_policy,
			proxy_info,
			ssl_config,
			pool,
			signal_rx,
			priority_rx,
			state: JobState::Start,
			state_tx,
			user_action_tx,
			is_orphaned: false,
		};
		(job, handle)
	}

	pub fn state(&self) -> JobState {
		self.state
	}

	fn set_state(&mut self, s: JobState) {
		self.state = s;
		let _ = self.state_tx.send(s);
	}

	/// Drains any signals that arrived without blocking; returns `Some` if
	/// a `Cancel` was observed.
	fn poll_signals(&mut self) -> Option<()> {
		while let Ok(sig) = self.signal_rx.try_recv() {
			match sig {
				JobSignal::Orphan => self.is_orphaned = true,
				JobSignal::SetPriority(_) => {}, // already reflected via priority_rx
				JobSignal::Cancel => return Some(()),
				JobSignal::Resume | JobSignal::RestartTunnelWithProxyAuth => {},
			}
		}
		None
	}

	/// Drives the state machine to completion. Never blocks a thread:
	/// every suspension point is an `.await`.
	pub async fn run(mut self) -> JobOutcome<P::Stream> {
		if self.poll_signals().is_some() {
			return JobOutcome::Cancelled;
		}

		self.set_state(JobState::Start);
		if matches!(self.job_type, JobType::Main) {
			if let WaitPolicy::Http2Throttle(_) | WaitPolicy::ControllerGated = self.wait_policy {
				self.set_state(JobState::Wait);
				if self.wait().await {
					return JobOutcome::Cancelled;
				}
				self.set_state(JobState::WaitComplete);
			}
		}

		loop {
			self.set_state(JobState::InitConnection);
			let flags = ConnectFlags {
				must_use_quic: self.must_use_quic,
				allow_user_alternate_ports: false,
				is_preconnect: self.job_type.is_preconnect(),
			};
			let priority = *self.priority_rx.borrow();

			if let Some(n) = self.preconnect_n {
				let result = tokio::select! {
					biased;
					sig = self.signal_rx.recv() => {
						if matches!(sig, Some(JobSignal::Cancel) | None) {
							return JobOutcome::Cancelled;
						}
						continue;
					}
					r = self.pool.preconnect_sockets(&self.endpoint, n, priority) => r,
				};
				self.set_state(JobState::Done);
				return match result {
					Ok(()) => JobOutcome::PreconnectComplete,
					// Preconnects never feed `report_brokenness` (that reads
					// only the `Alternative` job's outcome), so there's no
					// real default-vs-non-default signal to source here.
					Err(e) => JobOutcome::Failed {
						should_reconsider_proxy: e.is_proxy_reconsiderable(),
						failed_on_default_network: true,
						error: JobError::Pool(e),
					},
				};
			}

			let connect = self
				.pool
				.init_connection(&self.endpoint, &self.ssl_config, &self.proxy_info, priority, flags);

			let result = tokio::select! {
				biased;
				sig = self.signal_rx.recv() => {
					match sig {
						Some(JobSignal::Cancel) | None => return JobOutcome::Cancelled,
						Some(JobSignal::RestartTunnelWithProxyAuth) => {
							// Not currently parked in WaitingUserAction; ignore stray signal.
							continue;
						}
						_ => continue,
					}
				}
				r = connect => r,
			};
			self.set_state(JobState::InitConnectionComplete);

			match result {
				Ok(handle) => {
					// Field polarity follows the two call sites that read it
					// (`Controller::orphan_losers`, `report_brokenness`): for a
					// completed attempt, "failed on default network" means "did
					// NOT happen over the default network".
					let failed_on_default_network = !handle.used_default_network;
					if self.protocol_mismatch(handle.negotiated_protocol) {
						self.set_state(JobState::Done);
						return JobOutcome::Failed {
							error: JobError::ProtocolMismatch,
							should_reconsider_proxy: false,
							failed_on_default_network,
						};
					}
					self.set_state(JobState::CreateStream);
					self.set_state(JobState::CreateStreamComplete);
					self.set_state(JobState::Done);
					return JobOutcome::Stream {
						handle,
						failed_on_default_network,
					};
				},
				Err(failure) if failure.error.is_user_actionable() => {
					self.set_state(JobState::WaitingUserAction);
					trace!(error = ?failure.error, "job parked for user action");
					let _ = self.user_action_tx.send(Some(UserActionEvent {
						error: failure.error,
						proxy_info: self.proxy_info.clone(),
					}));
					match self.signal_rx.recv().await {
						Some(JobSignal::RestartTunnelWithProxyAuth) => {
							let _ = self.user_action_tx.send(None);
							self.set_state(JobState::RestartTunnelAuth);
							self.set_state(JobState::RestartTunnelAuthComplete);
							continue;
						},
						_ => return JobOutcome::Cancelled,
					}
				},
				Err(failure) => {
					self.set_state(JobState::Done);
					let should_reconsider_proxy = failure.error.is_proxy_reconsiderable();
					return JobOutcome::Failed {
						should_reconsider_proxy,
						failed_on_default_network: failure.used_default_network,
						error: JobError::Pool(failure.error),
					};
				},
			}
		}
	}

	fn protocol_mismatch(&self, negotiated: TransportProtocol) -> bool {
		match self.job_type {
			JobType::Main => false,
			// DNS-ALPN-H3 only commits to "some QUIC version"; the exact
			// version is whatever the pool actually negotiated.
			JobType::DnsAlpnH3 => !negotiated.is_quic(),
			JobType::Alternative => {
				self.expected_protocol != TransportProtocol::Unknown
					&& negotiated != self.expected_protocol
			},
			JobType::Preconnect | JobType::PreconnectDnsAlpnH3 => false,
		}
	}

	/// Returns `true` if cancelled while waiting.
	async fn wait(&mut self) -> bool {
		match self.wait_policy {
			WaitPolicy::None => false,
			WaitPolicy::Http2Throttle(d) => {
				tokio::select! {
					biased;
					sig = self.signal_rx.recv() => matches!(sig, Some(JobSignal::Cancel) | None),
					_ = tokio::time::sleep(d) => false,
				}
			},
			WaitPolicy::ControllerGated => loop {
				match self.signal_rx.recv().await {
					Some(JobSignal::Resume) => return false,
					Some(JobSignal::Cancel) | None => return true,
					_ => continue,
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ConnectFailure;
	use crate::interfaces::{ConnectionHandle, SessionHandle, SessionKey};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use stream_core::QuicVersion;

	struct FakePool {
		fail_times: AtomicUsize,
		protocol: TransportProtocol,
	}

	#[async_trait::async_trait]
	impl ConnectionPool for FakePool {
		type Stream = ();

		async fn init_connection(
			&self,
			_endpoint: &Endpoint,
			_ssl_config: &SslConfig,
			_proxy_info: &ProxyInfo,
			_priority: Priority,
			_flags: ConnectFlags,
		) -> Result<ConnectionHandle<()>, ConnectFailure> {
			if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
				return Err(ConnectFailure::new(PoolError::ProxyAuthRequired));
			}
			Ok(ConnectionHandle {
				stream: (),
				negotiated_protocol: self.protocol,
				was_alpn_negotiated: true,
				using_spdy: false,
				used_default_network: true,
			})
		}

		async fn acquire_http2_session(&self, _key: &SessionKey) -> Option<SessionHandle> {
			None
		}

		async fn acquire_quic_session(
			&self,
			_key: &SessionKey,
			_versions: &[QuicVersion],
		) -> Option<SessionHandle> {
			None
		}

		async fn preconnect_sockets(
			&self,
			_endpoint: &Endpoint,
			_n: usize,
			_priority: Priority,
		) -> Result<(), PoolError> {
			Ok(())
		}
	}

	fn endpoint() -> Endpoint {
		Endpoint {
			host: "example.com".into(),
			port: 443,
		}
	}

	#[tokio::test]
	async fn main_job_accepts_any_negotiated_protocol() {
		let pool = Arc::new(FakePool {
			fail_times: AtomicUsize::new(0),
			protocol: TransportProtocol::Http1_1,
		});
		let (job, _handle) = Job::new(
			JobType::Main,
			endpoint(),
			TransportProtocol::Unknown,
			false,
			None,
			WaitPolicy::None,
			ProxyInfo::new(vec![crate::interfaces::ProxyServer::Direct]),
			SslConfig::default(),
			Priority::default(),
			pool,
		);
		match job.run().await {
			JobOutcome::Stream { handle, .. } => {
				assert_eq!(handle.negotiated_protocol, TransportProtocol::Http1_1)
			},
			_ => panic!("expected stream"),
		}
	}

	#[tokio::test]
	async fn alternative_job_fails_on_protocol_mismatch() {
		let pool = Arc::new(FakePool {
			fail_times: AtomicUsize::new(0),
			protocol: TransportProtocol::Http1_1,
		});
		let (job, _handle) = Job::new(
			JobType::Alternative,
			endpoint(),
			TransportProtocol::Http2,
			false,
			None,
			WaitPolicy::None,
			ProxyInfo::new(vec![crate::interfaces::ProxyServer::Direct]),
			SslConfig::default(),
			Priority::default(),
			pool,
		);
		match job.run().await {
			JobOutcome::Failed { error, .. } => {
				assert!(matches!(error, JobError::ProtocolMismatch))
			},
			_ => panic!("expected failure"),
		}
	}

	#[tokio::test]
	async fn http2_throttle_resumes_on_explicit_signal_before_timeout() {
		let pool = Arc::new(FakePool {
			fail_times: AtomicUsize::new(0),
			protocol: TransportProtocol::Http1_1,
		});
		let (job, handle) = Job::new(
			JobType::Main,
			endpoint(),
			TransportProtocol::Unknown,
			false,
			None,
			WaitPolicy::Http2Throttle(Duration::from_secs(30)),
			ProxyInfo::new(vec![crate::interfaces::ProxyServer::Direct]),
			SslConfig::default(),
			Priority::default(),
			pool,
		);
		handle.resume();
		let outcome = tokio::time::timeout(Duration::from_millis(500), job.run())
			.await
			.expect("job should resume promptly, not wait out the 30s throttle");
		assert!(matches!(outcome, JobOutcome::Stream { .. }));
	}

	#[tokio::test]
	async fn tunnel_auth_detour_retries_after_restart_signal() {
		let pool = Arc::new(FakePool {
			fail_times: AtomicUsize::new(1),
			protocol: TransportProtocol::Http1_1,
		});
		let (job, handle) = Job::new(
			JobType::Main,
			endpoint(),
			TransportProtocol::Unknown,
			false,
			None,
			WaitPolicy::None,
			ProxyInfo::new(vec![crate::interfaces::ProxyServer::Direct]),
			SslConfig::default(),
			Priority::default(),
			pool,
		);
		let run = tokio::spawn(job.run());
		tokio::time::sleep(Duration::from_millis(20)).await;
		handle.restart_tunnel_with_proxy_auth();
		let outcome = run.await.unwrap();
		assert!(matches!(outcome, JobOutcome::Stream { .. }));
	}
}
