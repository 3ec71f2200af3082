//! Download tokens.
//!
//! A token is issued when the countdown finishes, scoped to one version, and
//! can be exchanged exactly once before its TTL runs out:
//!
//! ```text
//! Issued ──consume──▶ Consumed (terminal)
//!    └──── ttl ─────▶ Expired  (terminal)
//! ```
//!
//! Issuance is rate limited per `(fingerprint, versionRef)` under the active
//! [`SecurityMode`](crate::config::SecurityMode). Clients without JavaScript
//! get a one-time permission recorded when the interstitial is served.

mod error;
mod fingerprint;
mod service;

pub use error::{TokenError, TokenRejection};
pub use fingerprint::{ClientSignals, Fingerprint};
pub use service::{
    AuthorizedDownload, ConsumeOutcome, IssuedToken, PruneStats, TokenConfig, TokenService,
};
