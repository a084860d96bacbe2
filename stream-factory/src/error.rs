//! Error taxonomy per spec §7. Variants are grouped by *kind*, not by
//! which component raised them — a `JobError` and the `StreamError` it gets
//! wrapped into at the Controller boundary are deliberately distinct types,
//! following the `ProxyError`/`ProxyResponse` split in the teacher pack.

use thiserror::Error;

/// Errors a [`crate::interfaces::ConnectionPool`] or
/// [`crate::interfaces::ProxyResolver`] call can fail with. Deliberately
/// coarse — the core classifies by kind, never by collaborator-internal
/// detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
	#[error("connection reset during handshake")]
	ConnectionReset,
	#[error("connection aborted")]
	ConnectionAborted,
	#[error("proxy {0} unreachable")]
	ProxyConnectionFailed(Box<str>),
	#[error("certificate error")]
	CertificateError,
	#[error("client certificate requested")]
	ClientAuthRequested,
	#[error("proxy authentication required")]
	ProxyAuthRequired,
	#[error("https proxy tunnel response received")]
	HttpsProxyTunnelResponse,
	#[error("name not resolved: {0}")]
	NameNotResolved(Box<str>),
	#[error("no matching supported ALPN advertised over DNS")]
	DnsNoMatchingSupportedAlpn,
	#[error("default network changed mid-connect")]
	NetworkChanged,
	#[error("internet disconnected")]
	InternetDisconnected,
	#[error("socket/session pool error: {0}")]
	Other(Box<str>),
}

impl PoolError {
	/// §7 "Proxy-reconsiderable": another proxy in the configured list
	/// could plausibly fix this.
	pub fn is_proxy_reconsiderable(&self) -> bool {
		matches!(self, PoolError::ProxyConnectionFailed(_))
	}

	/// §7 "User-actionable": certificate error, client-auth, proxy-auth,
	/// or an HTTPS-proxy tunnel response. Routed verbatim to the delegate,
	/// never treated as a Job failure.
	pub fn is_user_actionable(&self) -> bool {
		matches!(
			self,
			PoolError::CertificateError
				| PoolError::ClientAuthRequested
				| PoolError::ProxyAuthRequired
				| PoolError::HttpsProxyTunnelResponse
		)
	}

	/// §7 "Transport-retryable": reset/abort/close during handshake.
	pub fn is_transport_retryable(&self) -> bool {
		matches!(self, PoolError::ConnectionReset | PoolError::ConnectionAborted)
	}

	/// Errors that must never be reported as alt-service brokenness
	/// (spec §4.C step 5).
	pub fn is_never_brokenness(&self, alt_host_equals_origin: bool) -> bool {
		match self {
			PoolError::DnsNoMatchingSupportedAlpn => true,
			PoolError::NetworkChanged => true,
			PoolError::InternetDisconnected => true,
			PoolError::NameNotResolved(_) => alt_host_equals_origin,
			_ => false,
		}
	}
}

/// Paired with a `PoolError` at the `ConnectionPool` boundary (spec §4.C
/// step 5, §9 open question "the core only records the bit that the Job
/// reports"): whether this attempt ran over the device's default network.
/// A collaborator-real signal, not inferred from the error kind — a
/// `ConnectionReset` can happen on either network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
	pub error: PoolError,
	pub used_default_network: bool,
}

impl ConnectFailure {
	pub fn new(error: PoolError) -> Self {
		Self {
			error,
			used_default_network: true,
		}
	}
}

impl From<PoolError> for ConnectFailure {
	fn from(error: PoolError) -> Self {
		Self::new(error)
	}
}

/// The error surfaced to a Job's own state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
	#[error(transparent)]
	Pool(#[from] PoolError),
	#[error("negotiated protocol did not match this job's expectation")]
	ProtocolMismatch,
	#[error("job was cancelled")]
	Cancelled,
}

/// The error surfaced to the caller via
/// [`crate::interfaces::RequestDelegate::on_stream_failed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
	#[error(transparent)]
	Job(#[from] JobError),
	#[error("no fallback proxy remains")]
	ProxyListExhausted,
	#[error("request was cancelled before completion")]
	Cancelled,
}

/// Errors the Factory itself can produce (distinct from a per-request
/// `StreamError`): these never reach a `RequestDelegate`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
	#[error("invalid request URL: {0}")]
	InvalidUrl(Box<str>),
}
