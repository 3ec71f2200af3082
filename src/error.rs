//! Client-facing error classification shared by every subsystem.
//!
//! Each error that can reach a client says two things: which HTTP status the
//! request layer should answer with, and what the client should do next.

use std::time::Duration;

use serde::Serialize;

/// What a client should do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "after_secs", rename_all = "snake_case")]
pub enum ClientAction {
    /// Retry now (e.g. restart the countdown for a fresh token).
    Retry,
    /// Wait at least this long before retrying.
    RetryAfter(#[serde(serialize_with = "serialize_secs")] Duration),
    /// Do not retry; the target does not exist or is not allowed.
    Stop,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

/// Errors and outcomes that surface to clients.
pub trait ClientFacing {
    /// HTTP status the request layer should use.
    fn status_code(&self) -> u16;

    /// Follow-up the client should take.
    fn client_action(&self) -> ClientAction;
}
