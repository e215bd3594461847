//! Loopback HTTP endpoint that lets trusted local tools open terminal
//! sessions.
//!
//! A running instance serves exactly one route, `POST /v1/terminal/bootstrap`,
//! on `127.0.0.1` with an ephemeral port and a per-run bearer token written to
//! an owner-only credential file. Requests pass a fixed sequence of gates
//! (see [`pipeline`]) before the session collaborator is invoked with a
//! deadline (see [`bootstrap`]).

pub mod bootstrap;
pub mod error;
pub mod pipeline;
pub mod request_throttle;
pub mod server;
pub mod service;

pub use {
    error::{ApiError, Error, Result},
    pipeline::CLIENT_HEADER,
    server::{BOOTSTRAP_PATH, Endpoint, build_app},
    service::{AutomationService, AutomationStatus, LifecycleState, SHUTDOWN_GRACE},
};
