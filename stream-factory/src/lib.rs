//! The core HTTP stream factory: an alternative-service registry, a Job
//! state machine, a Job Controller that races and arbitrates Jobs for one
//! Request, a caller-facing Request handle, and a process-wide Factory.
//!
//! Sockets, TLS, HTTP/2, QUIC, DNS, proxy policy, and per-transaction HTTP
//! are all external collaborators reached through the traits in
//! [`interfaces`] — this crate never implements them.

pub mod alt_service;
pub mod config;
pub mod controller;
pub mod error;
pub mod factory;
pub mod interfaces;
pub mod job;
pub mod metrics;
pub mod registry;
pub mod request;

pub use alt_service::{AlternativeService, AltServiceInfo, BrokennessState};
pub use config::Config;
pub use controller::{AttemptResult, Controller, ControllerCommand, ControllerHandle, ConnectionAttempt};
pub use error::{ConnectFailure, FactoryError, JobError, PoolError, StreamError};
pub use factory::{Factory, RequestInfo};
pub use interfaces::{
	ConnectFlags, ConnectionHandle, ConnectionPool, Endpoint, HostMappingRules, Priority,
	ProxyInfo, ProxyResolver, ProxyServer, RequestDelegate, SessionHandle, SessionKey, SslConfig,
	StreamKind,
};
pub use job::{Job, JobHandle, JobOutcome, JobState, JobType, UserActionEvent, WaitPolicy};
pub use metrics::{Metrics, NoopMetrics};
pub use registry::Registry;
pub use request::Request;
