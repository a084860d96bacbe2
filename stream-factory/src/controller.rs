//! Component C: "the heart of the core" (spec §4.C). For one Request, plans
//! and races Jobs, arbitrates their results, binds the winner, and reports
//! brokenness.
//!
//! Grounded on `crates/hbone/src/pool.rs`'s race-for-a-writelock
//! (`start_conn_if_win_writelock` / `checkout_conn_under_writelock`): several
//! concurrent attempts race, exactly one wins, losers observe the outcome
//! and stop (or, here, keep running only if they can still usefully report).
//! The `MainJobGate` three-state redesign replaces the source's
//! `main_job_is_blocked` / `main_job_is_resumed` flag pair (spec §9).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, event, trace, Level};

use stream_core::{
	NetworkAnonymizationKey, Origin, PrivacyMode, QuicVersion, RequestKey, TransportProtocol,
};

use crate::alt_service::AlternativeService;
use crate::config::Config;
use crate::error::{JobError, PoolError, StreamError};
use crate::interfaces::{
	ConnectionPool, Endpoint, Priority, ProxyInfo, ProxyResolver, ProxyServer, RequestDelegate,
	SessionKey, SslConfig, StreamKind,
};
use crate::job::{Job, JobHandle, JobOutcome, JobState, JobType, UserActionEvent, WaitPolicy};
use crate::metrics::Metrics;
use crate::registry::Registry;

/// Replaces the source's `main_job_is_blocked` / `main_job_is_resumed` pair
/// (spec §9): a blocked gate carries its own unblock deadline, so "blocked
/// with no deadline scheduled yet" and "blocked with a pending unblock
/// timer" can't be confused.
#[derive(Debug, Clone, Copy)]
enum MainJobGate {
	Open,
	Blocked,
	Pending(Instant),
}

/// Commands a [`crate::request::Request`] forwards into its Controller.
#[derive(Debug)]
pub enum ControllerCommand {
	SetPriority(Priority),
	RestartTunnelWithProxyAuth,
	/// The Request was dropped or explicitly cancelled.
	RequestComplete,
}

/// What the Controller exposes back to the Request (spec §4.D).
#[derive(Clone)]
pub struct ControllerHandle {
	cmd_tx: mpsc::UnboundedSender<ControllerCommand>,
	dominant_state_rx: watch::Receiver<Option<(JobType, JobState)>>,
	priority_rx: watch::Receiver<Priority>,
	attempts_rx: watch::Receiver<Vec<ConnectionAttempt>>,
	completed_rx: watch::Receiver<bool>,
}

impl ControllerHandle {
	pub fn set_priority(&self, p: Priority) {
		let _ = self.cmd_tx.send(ControllerCommand::SetPriority(p));
	}

	pub fn restart_tunnel_with_proxy_auth(&self) {
		let _ = self.cmd_tx.send(ControllerCommand::RestartTunnelWithProxyAuth);
	}

	pub fn cancel(&self) {
		let _ = self.cmd_tx.send(ControllerCommand::RequestComplete);
	}

	/// Spec §4.D `load_state()`: bound job if present, else Main, else Alt,
	/// else DNS-ALPN-H3. Updated whenever the job set changes, not on every
	/// sub-state transition within a running job.
	pub fn load_state(&self) -> Option<(JobType, JobState)> {
		*self.dominant_state_rx.borrow()
	}

	/// Current priority (spec §3 Request data model).
	pub fn priority(&self) -> Priority {
		*self.priority_rx.borrow()
	}

	/// Connection attempts accumulated from this Request's Jobs so far
	/// (spec §3 Request data model).
	pub fn connection_attempts(&self) -> Vec<ConnectionAttempt> {
		self.attempts_rx.borrow().clone()
	}

	/// Spec §3 Request data model "completion flag". Once `true`, no
	/// further delegate callback will fire for this Request.
	pub fn is_completed(&self) -> bool {
		*self.completed_rx.borrow()
	}
}

/// One endpoint/proxy attempt and how it ended, accumulated on the
/// Request's behalf as its Jobs resolve (spec §3 Request data model "a
/// list of connection attempts").
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
	pub job_type: JobType,
	pub endpoint: Endpoint,
	pub proxy: ProxyServer,
	pub result: AttemptResult,
}

#[derive(Debug, Clone)]
pub enum AttemptResult {
	Succeeded { protocol: TransportProtocol },
	Failed { error: JobError },
}

/// Spec §4.C step 1's scheduling decision, threaded through `run()` once
/// `plan_protocol_set` has consulted the session pool for already-warm
/// HTTP/2 or QUIC sessions (spec §4.C steps 2-3).
struct ProtocolPlan {
	alt: Option<AlternativeService>,
	dns_alpn_h3_eligible: bool,
	/// A reusable DNS-ALPN-H3 QUIC session is already warm: no Main Job is
	/// spawned at all.
	skip_main: bool,
	main_blocked: bool,
}

struct LiveJob {
	handle: JobHandle,
	endpoint: Endpoint,
	/// Filled in once the job's own future resolves.
	outcome: Option<JobOutcomeRecord>,
}

struct JobOutcomeRecord {
	succeeded: bool,
	failed_on_default_network: bool,
	error: Option<JobError>,
	should_reconsider_proxy: bool,
}

/// One attempt at serving a single Request: resolve a proxy, decide a
/// protocol set, race the resulting Jobs.
pub struct Controller<P: ConnectionPool> {
	registry: Arc<Registry>,
	config: Arc<Config>,
	metrics: Arc<dyn Metrics>,
	pool: Arc<P>,
	proxy_resolver: Arc<dyn ProxyResolver>,
	origin: Origin,
	nak: NetworkAnonymizationKey,
	privacy_mode: PrivacyMode,
	ssl_config: SslConfig,
	stream_kind: StreamKind,
	delegate: Arc<dyn RequestDelegate<Stream = P::Stream>>,
	priority: Priority,
	cmd_rx: mpsc::UnboundedReceiver<ControllerCommand>,
	dominant_state_tx: watch::Sender<Option<(JobType, JobState)>>,
	priority_tx: watch::Sender<Priority>,
	attempts: Vec<ConnectionAttempt>,
	attempts_tx: watch::Sender<Vec<ConnectionAttempt>>,
	completed_tx: watch::Sender<bool>,
}

impl<P: ConnectionPool> Controller<P> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		registry: Arc<Registry>,
		config: Arc<Config>,
		metrics: Arc<dyn Metrics>,
		pool: Arc<P>,
		proxy_resolver: Arc<dyn ProxyResolver>,
		origin: Origin,
		nak: NetworkAnonymizationKey,
		privacy_mode: PrivacyMode,
		ssl_config: SslConfig,
		stream_kind: StreamKind,
		delegate: Arc<dyn RequestDelegate<Stream = P::Stream>>,
		priority: Priority,
	) -> (Self, ControllerHandle) {
		let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
		let (dominant_state_tx, dominant_state_rx) = watch::channel(None);
		let (priority_tx, priority_rx) = watch::channel(priority);
		let (attempts_tx, attempts_rx) = watch::channel(Vec::new());
		let (completed_tx, completed_rx) = watch::channel(false);
		let controller = Self {
			registry,
			config,
			metrics,
			pool,
			proxy_resolver,
			origin,
			nak,
			privacy_mode,
			ssl_config,
			stream_kind,
			delegate,
			priority,
			cmd_rx,
			dominant_state_tx,
			priority_tx,
			attempts: Vec::new(),
			attempts_tx,
			completed_tx,
		};
		let handle = ControllerHandle {
			cmd_tx,
			dominant_state_rx,
			priority_rx,
			attempts_rx,
			completed_rx,
		};
		(controller, handle)
	}

	fn push_attempt(
		&mut self,
		job_type: JobType,
		endpoint: Endpoint,
		proxy: ProxyServer,
		result: AttemptResult,
	) {
		self.attempts.push(ConnectionAttempt {
			job_type,
			endpoint,
			proxy,
			result,
		});
		let _ = self.attempts_tx.send(self.attempts.clone());
	}

	fn finish(&self) {
		let _ = self.completed_tx.send(true);
	}

	/// Drives the Controller to completion: resolves a proxy, races Jobs,
	/// binds a winner, reports brokenness, and (on a proxy-reconsiderable
	/// last-Job failure) re-enters from the top with the next proxy. Never
	/// panics; every outcome is delivered through `self.delegate`.
	pub async fn run(mut self) {
		let method = match self.stream_kind {
			StreamKind::HttpStream => "GET",
			StreamKind::BidirectionalStream => "POST",
			StreamKind::WebSocketHandshake => "GET",
		};

		let mut proxy_info = match self.proxy_resolver.resolve(&self.origin, method, &self.nak).await
		{
			Ok(p) => p,
			Err(e) => {
				self.deliver_failure(StreamError::Job(JobError::Pool(e)), ProxyInfo::new(vec![
					ProxyServer::Direct,
				]));
				self.finish();
				return;
			},
		};

		'attempt: loop {
			let endpoint = Endpoint {
				host: Box::from(self.origin.host.as_ref()),
				port: self.origin.port,
			};

			let plan = self.plan_protocol_set(&endpoint, &proxy_info).await;
			let alt_info = plan.alt;
			let dns_alpn_h3_eligible = plan.dns_alpn_h3_eligible;

			let mut jobs: HashMap<JobType, LiveJob> = HashMap::new();
			let mut pending = FuturesUnordered::new();
			let mut gate = if plan.main_blocked {
				self.metrics.main_job_blocked();
				MainJobGate::Blocked
			} else {
				MainJobGate::Open
			};

			if !plan.skip_main {
				self.spawn_main(&endpoint, &proxy_info, &gate, &mut jobs, &mut pending);
			}
			if let Some(alt) = &alt_info {
				self.spawn_alternative(alt, &proxy_info, &mut jobs, &mut pending);
			}
			if dns_alpn_h3_eligible {
				self.spawn_dns_alpn_h3(&endpoint, &proxy_info, &mut jobs, &mut pending);
			}
			self.publish_dominant(None, &jobs);

			let mut bound: Option<JobType> = None;
			let mut last_proxy_reconsiderable: Option<()> = None;
			let mut notified_user_action: HashSet<JobType> = HashSet::new();

			loop {
				if jobs.is_empty() {
					break;
				}
				// Polling rather than a watch-channel wakeup keeps the
				// borrow simple: `JobHandle::state()` only needs `&self`, so
				// it can be read from the same `jobs` map the other select
				// arms already borrow immutably. Always armed (even when
				// `Open`) so parked-for-user-action jobs get noticed on a
				// steady heartbeat rather than only while the gate is busy.
				let timer = async {
					match gate {
						MainJobGate::Pending(at) => tokio::time::sleep_until(at.into()).await,
						MainJobGate::Blocked | MainJobGate::Open => {
							tokio::time::sleep(Duration::from_millis(20)).await
						},
					}
				};

				tokio::select! {
					biased;
					cmd = self.cmd_rx.recv() => {
						match cmd {
							Some(ControllerCommand::SetPriority(p)) => {
								self.priority = p;
								let _ = self.priority_tx.send(p);
								for live in jobs.values() {
									live.handle.set_priority(p);
								}
							}
							Some(ControllerCommand::RestartTunnelWithProxyAuth) => {
								// Forwarded to every live job, not just the
								// bound one: a Job can park for user action
								// (proxy auth) before any Job has bound.
								for live in jobs.values() {
									live.handle.restart_tunnel_with_proxy_auth();
								}
							}
							Some(ControllerCommand::RequestComplete) | None => {
								self.cancel_non_reporting(&bound, &jobs);
								if bound.is_none() {
									self.finish();
									break 'attempt;
								}
							}
						}
					}
					_ = timer => {
						match gate {
							MainJobGate::Pending(_) => {
								gate = MainJobGate::Open;
								if let Some(live) = jobs.get(&JobType::Main) {
									live.handle.resume();
								}
								self.metrics.main_job_unblocked();
							}
							MainJobGate::Blocked => {
								// Spec §4.C step 3: once an alternative (or
								// DNS-ALPN-H3) job reaches `InitConnection`,
								// schedule the bounded unblock.
								let reached_init = |kind: JobType| {
									jobs.get(&kind).is_some_and(|j| {
										!matches!(
											j.handle.state(),
											JobState::Start | JobState::Wait | JobState::WaitComplete
										)
									})
								};
								if reached_init(JobType::Alternative) || reached_init(JobType::DnsAlpnH3) {
									gate = MainJobGate::Pending(
										Instant::now() + self.config.max_main_job_unblock_delay,
									);
								}
							}
							MainJobGate::Open => {}
						}

						for (kind, live) in jobs.iter() {
							match live.handle.user_action() {
								Some(ev) if !notified_user_action.contains(kind) => {
									notified_user_action.insert(*kind);
									self.deliver_user_action(ev);
								}
								Some(_) => {}
								None => {
									notified_user_action.remove(kind);
								}
							}
						}
					}
					next = pending.next() => {
						let Some((kind, outcome)) = next else { break };
						match outcome {
							JobOutcome::Stream { handle, failed_on_default_network } => {
								let protocol = handle.negotiated_protocol;
								let was_alpn_negotiated = handle.was_alpn_negotiated;
								let using_spdy = handle.using_spdy;
								if let Some(live) = jobs.get(&kind) {
									self.push_attempt(
										kind,
										live.endpoint.clone(),
										proxy_info.current().clone(),
										AttemptResult::Succeeded { protocol },
									);
								}
								jobs.entry(kind).and_modify(|j| {
									j.outcome = Some(JobOutcomeRecord {
										succeeded: true,
										failed_on_default_network,
										error: None,
										should_reconsider_proxy: false,
									});
								});
								if bound.is_none() {
									bound = Some(kind);
									self.metrics.job_bound(kind);
									self.metrics.stream_bound(kind, protocol, was_alpn_negotiated, using_spdy);
									event!(Level::DEBUG, job = ?kind, "stream ready");
									self.deliver_stream(proxy_info.clone(), handle.stream);
									self.orphan_losers(kind, failed_on_default_network, &jobs);
								}
								// A second stream winning after binding is dropped silently:
								// its `ConnectionHandle` goes out of scope here.
							}
							JobOutcome::PreconnectComplete => {
								jobs.remove(&kind);
							}
							JobOutcome::Cancelled => {
								jobs.remove(&kind);
							}
							JobOutcome::Failed { error, should_reconsider_proxy, failed_on_default_network } => {
								if let Some(live) = jobs.get(&kind) {
									self.push_attempt(
										kind,
										live.endpoint.clone(),
										proxy_info.current().clone(),
										AttemptResult::Failed { error: error.clone() },
									);
								}
								jobs.entry(kind).and_modify(|j| {
									j.outcome = Some(JobOutcomeRecord {
										succeeded: false,
										failed_on_default_network,
										error: Some(error.clone()),
										should_reconsider_proxy,
									});
								});
								if matches!(kind, JobType::Alternative | JobType::DnsAlpnH3)
									&& matches!(gate, MainJobGate::Blocked | MainJobGate::Pending(_))
								{
									gate = MainJobGate::Open;
									if let Some(live) = jobs.get(&JobType::Main) {
										live.handle.resume();
									}
									self.metrics.main_job_unblocked();
								}

								// TODO: the source retries a bare DnsAlpnH3/PreconnectDnsAlpnH3
								// failure of `DnsNoMatchingSupportedAlpn` with a plain TCP
								// backup job rather than surfacing it; not implemented here
								// (see DESIGN.md's Open Question decisions).
								let live_remaining = jobs.values().any(|j| j.outcome.is_none());
								if bound.is_none() && !live_remaining {
									if should_reconsider_proxy && proxy_info.advance() {
										last_proxy_reconsiderable = Some(());
										break;
									}
									self.report_brokenness(&alt_info, &jobs);
									self.deliver_failure(
										StreamError::Job(error),
										proxy_info.clone(),
									);
									self.finish();
									break 'attempt;
								}
							}
						}
						self.publish_dominant(bound, &jobs);
					}
				}

				if bound.is_some() {
					let live_remaining = jobs.values().any(|j| j.outcome.is_none());
					if !live_remaining {
						break;
					}
				}
			}

			if last_proxy_reconsiderable.is_some() {
				self.metrics.proxy_fallback();
				debug!("proxy-reconsiderable failure, advancing to next proxy");
				continue 'attempt;
			}

			if bound.is_some() {
				self.report_brokenness(&alt_info, &jobs);
				self.finish();
				break;
			}
		}
	}

	/// Spec §4.C `preconnect(n)`: no racing, no delegate callbacks, no
	/// brokenness reporting — just warm `n` sockets. If DNS-ALPN-H3 is
	/// eligible for the origin, starts a `PreconnectDnsAlpnH3` Job with an
	/// ordinary `Preconnect` kept running as a TCP backup.
	pub async fn run_preconnect(self, n: usize, proxy_info: ProxyInfo) {
		let endpoint = Endpoint {
			host: Box::from(self.origin.host.as_ref()),
			port: self.origin.port,
		};
		let allowlisted = self.config.quic_host_allowlist.contains(endpoint.host.as_ref());
		let dns_alpn_h3_eligible =
			self.origin.scheme.is_secure() && self.config.enable_quic && allowlisted;

		let mut pending: FuturesUnordered<PendingJob<P>> = FuturesUnordered::new();

		if dns_alpn_h3_eligible {
			let (job, _handle) = Job::new(
				JobType::PreconnectDnsAlpnH3,
				endpoint.clone(),
				TransportProtocol::Quic(self.preferred_quic_version()),
				true,
				Some(n),
				WaitPolicy::None,
				proxy_info.clone(),
				self.ssl_config.clone(),
				self.priority,
				Arc::clone(&self.pool),
			);
			self.metrics.job_started(JobType::PreconnectDnsAlpnH3);
			pending.push(Box::pin(async move { (JobType::PreconnectDnsAlpnH3, job.run().await) }));
		}

		let (job, _handle) = Job::new(
			JobType::Preconnect,
			endpoint,
			TransportProtocol::Unknown,
			false,
			Some(n),
			WaitPolicy::None,
			proxy_info,
			self.ssl_config.clone(),
			self.priority,
			Arc::clone(&self.pool),
		);
		self.metrics.job_started(JobType::Preconnect);
		pending.push(Box::pin(async move { (JobType::Preconnect, job.run().await) }));

		while let Some((kind, outcome)) = pending.next().await {
			if let JobOutcome::Failed { error, .. } = outcome {
				trace!(?kind, ?error, "preconnect job failed");
			}
		}
	}

	/// QUIC versions this session actually speaks, for session-acquisition
	/// and Job construction. An empty `supported_quic_versions` config (the
	/// zero-value default) means "no explicit restriction", not "none
	/// supported".
	fn quic_versions(&self) -> Vec<QuicVersion> {
		if self.config.supported_quic_versions.is_empty() {
			vec![self.preferred_quic_version()]
		} else {
			self.config.supported_quic_versions.clone()
		}
	}

	fn preferred_quic_version(&self) -> QuicVersion {
		self.config
			.supported_quic_versions
			.first()
			.copied()
			.unwrap_or(QuicVersion(1))
	}

	fn quic_version_supported(&self, v: QuicVersion) -> bool {
		self.config.supported_quic_versions.is_empty() || self.config.supported_quic_versions.contains(&v)
	}

	/// Spec §4.C steps 1-3: query the Registry, filter by brokenness,
	/// expiration, port policy, and HTTP/2-or-QUIC enablement; pick the
	/// first survivor. Then consult the session pool for already-warm
	/// HTTP/2 or QUIC sessions to decide whether Main needs to race at all,
	/// and whether DNS-ALPN-H3 and the chosen alternative would duplicate
	/// each other's destination.
	async fn plan_protocol_set(&self, endpoint: &Endpoint, proxy_info: &ProxyInfo) -> ProtocolPlan {
		let now = Instant::now();
		let candidates = self.registry.get_alternatives(&self.origin, &self.nak, now);

		let mut alt_info = candidates.into_iter().find(|svc| {
			if self.registry.is_broken(&self.origin, &self.nak, svc, now) {
				return false;
			}
			if svc.port < 1024 && !self.config.enable_user_alternate_protocol_ports {
				return false;
			}
			match svc.protocol {
				TransportProtocol::Http2 => self.config.enable_http2,
				TransportProtocol::Quic(v) => self.config.enable_quic && self.quic_version_supported(v),
				_ => false,
			}
		});

		let allowlisted = self.config.quic_host_allowlist.contains(endpoint.host.as_ref());
		let mut dns_alpn_h3_eligible = self.origin.scheme.is_secure()
			&& proxy_info.current().is_direct()
			&& self.config.enable_quic
			&& allowlisted
			&& alt_info
				.as_ref()
				.is_none_or(|a| !self.registry.is_broken(&self.origin, &self.nak, a, now));

		let request_key = RequestKey::new(self.nak.clone(), self.privacy_mode);
		let mut skip_main = false;

		if dns_alpn_h3_eligible {
			let dns_alpn_key = SessionKey {
				origin: self.origin.clone(),
				request: request_key.clone(),
			};
			let versions = self.quic_versions();
			if self.pool.acquire_quic_session(&dns_alpn_key, &versions).await.is_some() {
				// A QUIC session is already warm for this origin: no need to
				// race Main, and no need for a separate Alternative job if it
				// targets the same destination DNS-ALPN-H3 would use.
				skip_main = true;
				if let Some(alt) = &alt_info {
					if alt.host.as_ref() == endpoint.host.as_ref() && alt.port == endpoint.port {
						alt_info = None;
					}
				}
			}
		}

		if let Some(alt) = &alt_info {
			if dns_alpn_h3_eligible
				&& alt.host.as_ref() == endpoint.host.as_ref()
				&& alt.port == endpoint.port
			{
				// The alternative targets the same destination DNS-ALPN-H3
				// would: racing both would just double the connect traffic.
				dns_alpn_h3_eligible = false;
			}
		}

		let main_session_key = SessionKey {
			origin: self.origin.clone(),
			request: request_key,
		};
		let main_has_session = self.pool.acquire_http2_session(&main_session_key).await.is_some();
		let main_blocked =
			!skip_main && !main_has_session && (alt_info.is_some() || dns_alpn_h3_eligible);

		ProtocolPlan {
			alt: alt_info,
			dns_alpn_h3_eligible,
			skip_main,
			main_blocked,
		}
	}

	fn spawn_main(
		&self,
		endpoint: &Endpoint,
		proxy_info: &ProxyInfo,
		gate: &MainJobGate,
		jobs: &mut HashMap<JobType, LiveJob>,
		pending: &mut FuturesUnordered<PendingJob<P>>,
	) {
		let wait_policy = match gate {
			MainJobGate::Open => {
				if self.config.delay_main_job_with_available_spdy_session {
					WaitPolicy::Http2Throttle(self.config.main_job_wait_time)
				} else {
					WaitPolicy::None
				}
			},
			MainJobGate::Blocked | MainJobGate::Pending(_) => WaitPolicy::ControllerGated,
		};
		let (job, handle) = Job::new(
			JobType::Main,
			endpoint.clone(),
			TransportProtocol::Unknown,
			false,
			None,
			wait_policy,
			proxy_info.clone(),
			self.ssl_config.clone(),
			self.priority,
			Arc::clone(&self.pool),
		);
		self.metrics.job_started(JobType::Main);
		jobs.insert(JobType::Main, LiveJob { handle, endpoint: endpoint.clone(), outcome: None });
		pending.push(Box::pin(async move { (JobType::Main, job.run().await) }));
	}

	fn spawn_alternative(
		&self,
		alt: &AlternativeService,
		proxy_info: &ProxyInfo,
		jobs: &mut HashMap<JobType, LiveJob>,
		pending: &mut FuturesUnordered<PendingJob<P>>,
	) {
		let endpoint = Endpoint {
			host: alt.host.clone(),
			port: alt.port,
		};
		let (job, handle) = Job::new(
			JobType::Alternative,
			endpoint.clone(),
			alt.protocol,
			alt.protocol.is_quic(),
			None,
			WaitPolicy::None,
			proxy_info.clone(),
			self.ssl_config.clone(),
			self.priority,
			Arc::clone(&self.pool),
		);
		self.metrics.job_started(JobType::Alternative);
		jobs.insert(JobType::Alternative, LiveJob { handle, endpoint, outcome: None });
		pending.push(Box::pin(async move { (JobType::Alternative, job.run().await) }));
	}

	fn spawn_dns_alpn_h3(
		&self,
		endpoint: &Endpoint,
		proxy_info: &ProxyInfo,
		jobs: &mut HashMap<JobType, LiveJob>,
		pending: &mut FuturesUnordered<PendingJob<P>>,
	) {
		let (job, handle) = Job::new(
			JobType::DnsAlpnH3,
			endpoint.clone(),
			TransportProtocol::Quic(self.preferred_quic_version()),
			true,
			None,
			WaitPolicy::None,
			proxy_info.clone(),
			self.ssl_config.clone(),
			self.priority,
			Arc::clone(&self.pool),
		);
		self.metrics.job_started(JobType::DnsAlpnH3);
		jobs.insert(JobType::DnsAlpnH3, LiveJob { handle, endpoint: endpoint.clone(), outcome: None });
		pending.push(Box::pin(async move { (JobType::DnsAlpnH3, job.run().await) }));
	}

	/// Spec §4.C step 4 orphaning rules.
	fn orphan_losers(
		&self,
		winner: JobType,
		winner_failed_on_default_network: bool,
		jobs: &HashMap<JobType, LiveJob>,
	) {
		let winner_succeeded_on_default = !winner_failed_on_default_network;
		for (kind, live) in jobs.iter() {
			if *kind == winner {
				continue;
			}
			let drop_it = match winner {
				JobType::Main => false, // let Alt / DNS-ALPN-H3 run for reporting
				JobType::Alternative => {
					*kind == JobType::Main
						&& winner_succeeded_on_default
						&& !jobs.contains_key(&JobType::DnsAlpnH3)
				},
				JobType::DnsAlpnH3 => {
					*kind == JobType::Main
						&& winner_succeeded_on_default
						&& !jobs.contains_key(&JobType::Alternative)
				},
				JobType::Preconnect | JobType::PreconnectDnsAlpnH3 => false,
			};
			if drop_it {
				live.handle.cancel();
			} else if *kind != JobType::Main {
				live.handle.orphan();
				self.metrics.job_orphaned(*kind);
			}
		}
	}

	fn cancel_non_reporting(&self, bound: &Option<JobType>, jobs: &HashMap<JobType, LiveJob>) {
		for (kind, live) in jobs.iter() {
			if Some(*kind) == *bound {
				continue;
			}
			live.handle.cancel();
		}
	}

	/// Spec §4.C step 5: exactly once per alternative, at teardown.
	fn report_brokenness(&self, alt_info: &Option<AlternativeService>, jobs: &HashMap<JobType, LiveJob>) {
		let Some(alt) = alt_info else { return };
		let Some(alt_job) = jobs.get(&JobType::Alternative) else { return };
		let Some(alt_outcome) = &alt_job.outcome else { return };
		if alt_outcome.succeeded {
			return; // succeeded on default network: no report
		}
		if let Some(err) = &alt_outcome.error {
			let alt_host_equals_origin = alt.host.as_ref() == self.origin.host.as_ref();
			if let JobError::Pool(pool_err) = err {
				if pool_err.is_never_brokenness(alt_host_equals_origin) {
					return;
				}
			}
		}

		let main_succeeded = jobs
			.get(&JobType::Main)
			.and_then(|j| j.outcome.as_ref())
			.map(|o| o.succeeded)
			.unwrap_or(false);

		if alt_outcome.failed_on_default_network && main_succeeded {
			self.registry.mark_broken(&self.origin, &self.nak, alt, Instant::now());
			self.metrics.alt_service_marked_broken(&self.origin);
		} else if !alt_outcome.failed_on_default_network {
			// Failed on default network but succeeded on a non-default one.
			self.registry
				.mark_broken_until_default_network_changes(&self.origin, &self.nak, alt);
			self.metrics
				.alt_service_marked_broken_until_network_change(&self.origin);
		}
	}

	fn deliver_stream(&self, proxy_info: ProxyInfo, stream: P::Stream) {
		match self.stream_kind {
			StreamKind::HttpStream => self.delegate.on_stream_ready(proxy_info, stream),
			StreamKind::BidirectionalStream => {
				self.delegate.on_bidirectional_stream_ready(proxy_info, stream)
			},
			StreamKind::WebSocketHandshake => {
				self.delegate.on_websocket_handshake_stream_ready(proxy_info, stream)
			},
		}
	}

	/// Spec §4.D `load_state()` resolution order: bound job, else Main,
	/// else Alt, else DNS-ALPN-H3.
	fn publish_dominant(&self, bound: Option<JobType>, jobs: &HashMap<JobType, LiveJob>) {
		let order = bound
			.into_iter()
			.chain([JobType::Main, JobType::Alternative, JobType::DnsAlpnH3]);
		let dominant = order.find_map(|kind| jobs.get(&kind).map(|live| (kind, live.handle.state())));
		let _ = self.dominant_state_tx.send(dominant);
	}

	fn deliver_failure(&self, error: StreamError, proxy_info: ProxyInfo) {
		trace!(?error, "request failed");
		let resolve_error_info = format_resolve_error_info(&error);
		self.delegate.on_stream_failed(error, proxy_info, resolve_error_info);
	}

	/// Dispatches a Job's `WaitingUserAction` park (spec §6/§7) to the one
	/// `RequestDelegate` method that matches its error kind. `PoolError`
	/// variants outside `is_user_actionable()` never reach here — a Job only
	/// sends a `UserActionEvent` when its own error passed that check.
	fn deliver_user_action(&self, event: UserActionEvent) {
		trace!(error = ?event.error, "job parked for user action");
		match &event.error {
			PoolError::CertificateError => {
				self.delegate
					.on_certificate_error(StreamError::Job(JobError::Pool(event.error.clone())));
			},
			PoolError::ClientAuthRequested => self.delegate.on_needs_client_auth(),
			PoolError::ProxyAuthRequired => self.delegate.on_needs_proxy_auth(event.proxy_info),
			PoolError::HttpsProxyTunnelResponse => {
				self.delegate.on_https_proxy_tunnel_response(event.proxy_info);
			},
			_ => {},
		}
	}
}

/// Spec §3 Request data model / `on_stream_failed`'s `resolve_error_info`:
/// the only detail the core itself can add beyond the error kind is the
/// unresolved host name, when that's what failed.
fn format_resolve_error_info(error: &StreamError) -> Option<String> {
	match error {
		StreamError::Job(JobError::Pool(PoolError::NameNotResolved(host))) => {
			Some(format!("name not resolved: {host}"))
		},
		_ => None,
	}
}

type PendingJob<P> = std::pin::Pin<
	Box<dyn std::future::Future<Output = (JobType, JobOutcome<<P as ConnectionPool>::Stream>)> + Send>,
>;

/// How long the Controller will wait, worst case, between an alternative
/// Job reaching `InitConnection` and the Main Job being unblocked (spec §5
/// invariant 3). Exposed for tests that want to assert liveness.
pub fn max_unblock_delay(config: &Config) -> Duration {
	config.max_main_job_unblock_delay
}
