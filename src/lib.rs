//! Waiting Room Core Library
//!
//! Control plane for a download interstitial: a request is resolved into a
//! concrete download target, the interstitial page is served from a page
//! cache when that is safe, a short-lived single-use token authorizes the
//! actual transfer, and content changes purge every cached copy they make
//! stale.
//!
//! # Architecture
//!
//! - [`context`] - resolves slugs and version markers into a [`context::DownloadContext`]
//! - [`cache`] - cache gate with HIT / MISS / BYPASS semantics
//! - [`token`] - token issuance, rate limiting, consumption and no-JS permissions
//! - [`purge`] - URL closure of a change and background edge purging
//! - [`scheduler`] - durable, idempotent recurring jobs
//! - [`downloads`] - download-event queue and its drain job
//! - [`service`] - the [`WaitingRoom`] facade tying them together
//! - [`content`] - read seam over the content store
//! - [`db`] - `SQLite` pool and migrations

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod content;
pub mod context;
pub mod db;
pub mod downloads;
pub mod error;
pub mod purge;
pub mod scheduler;
pub mod service;
pub mod token;

mod user_agent;

// Re-export commonly used types
pub use cache::{CacheGate, CacheState, GateRequest, GateResponse, Renderer};
pub use clock::{Clock, SystemClock};
pub use config::{SecurityMode, Settings};
pub use context::{ContextResolver, DownloadContext, ResolveError, ResolveRequest, VersionRef};
pub use db::{Database, DbError};
pub use error::{ClientAction, ClientFacing};
pub use purge::{ContentChange, PurgePropagator};
pub use scheduler::{QueueScheduler, ScheduleOutcome};
pub use service::{ServiceError, WaitingRoom};
pub use token::{ConsumeOutcome, TokenService};
