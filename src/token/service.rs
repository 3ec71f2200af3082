//! Token issuance, single-use consumption and no-JS permissions.
//!
//! Every state transition is one SQL statement (or one transaction whose
//! first statement takes the write lock), so the rate-limit check and the
//! single-use check are linearizable across tasks and processes.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::{debug, instrument};

use super::{Fingerprint, TokenError, TokenRejection};
use crate::clock::{Clock, duration_millis};
use crate::config::{SecurityMode, Settings};
use crate::context::{DownloadContext, VersionRef};
use crate::db::Database;

/// Raw token entropy in bytes.
const TOKEN_BYTES: usize = 32;

/// Lifetimes used by the token service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    /// Token lifetime.
    pub token_ttl: Duration,
    /// No-JS permission lifetime.
    pub permission_ttl: Duration,
}

impl TokenConfig {
    /// Reads lifetimes from settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            token_ttl: settings.token_ttl(),
            permission_ttl: settings.permission_ttl(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// A freshly issued token, returned to the countdown script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// Opaque token; only its digest is stored.
    pub token: String,
    /// Version the token is scoped to.
    #[serde(skip)]
    pub version_ref: VersionRef,
    /// Seconds until the token expires.
    #[serde(rename = "expires_in_seconds")]
    pub expires_in_secs: u64,
}

/// A download the caller may now perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthorizedDownload {
    /// Content item.
    pub content_id: i64,
    /// Version reference.
    pub version_ref: VersionRef,
}

/// Result of a token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The token was valid and is now spent.
    Authorized(AuthorizedDownload),
    /// The token was refused.
    Rejected(TokenRejection),
}

impl ConsumeOutcome {
    /// Whether the exchange succeeded.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// Rows removed by [`TokenService::prune_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Expired tokens.
    pub tokens: u64,
    /// Rate-limit entries older than every window.
    pub requests: u64,
    /// Expired permissions.
    pub permissions: u64,
}

impl PruneStats {
    /// Total rows removed.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.tokens + self.requests + self.permissions
    }
}

/// Issues and consumes download tokens.
#[derive(Debug, Clone)]
pub struct TokenService {
    db: Database,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
}

impl TokenService {
    /// Creates a service over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: TokenConfig) -> Self {
        Self { db, clock, config }
    }

    /// Issues a single-use token for `context`.
    ///
    /// # Errors
    ///
    /// - [`TokenError::RateLimited`] when `fingerprint` already received the
    ///   mode's maximum number of tokens for this item and version inside the window
    /// - [`TokenError::Database`] on store failure
    #[instrument(skip(self, context, fingerprint), fields(version = %context.version_ref(), client = %fingerprint, mode = %mode))]
    pub async fn issue_token(
        &self,
        context: &DownloadContext,
        fingerprint: &Fingerprint,
        mode: SecurityMode,
    ) -> Result<IssuedToken, TokenError> {
        let policy = mode.policy();
        let now = self.clock.now_millis();
        let window_start = now - duration_millis(policy.window);
        let version_ref = context.version_ref().to_string();

        let mut tx = self.db.pool().begin().await?;

        // Counting and recording in one statement keeps the limit exact under concurrency
        let recorded = sqlx::query(
            r"INSERT INTO token_requests (fingerprint, content_id, version_ref, requested_at)
              SELECT ?1, ?2, ?3, ?4
              WHERE (
                  SELECT COUNT(*) FROM token_requests
                  WHERE fingerprint = ?1 AND content_id = ?2 AND version_ref = ?3
                    AND requested_at > ?5
              ) < ?6",
        )
        .bind(fingerprint.as_str())
        .bind(context.content_id())
        .bind(&version_ref)
        .bind(now)
        .bind(window_start)
        .bind(i64::from(policy.max_requests))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if recorded == 0 {
            let oldest: Option<i64> = sqlx::query_scalar(
                r"SELECT MIN(requested_at) FROM token_requests
                  WHERE fingerprint = ? AND content_id = ? AND version_ref = ? AND requested_at > ?",
            )
            .bind(fingerprint.as_str())
            .bind(context.content_id())
            .bind(&version_ref)
            .bind(window_start)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;

            let retry_after = retry_after(oldest.unwrap_or(now), policy.window, now);
            debug!(retry_after_secs = retry_after.as_secs(), "token issuance rate limited");
            return Err(TokenError::rate_limited(retry_after));
        }

        let token = generate_token();
        sqlx::query(
            r"INSERT INTO download_tokens
                (token_digest, content_id, version_ref, fingerprint, issued_at, expires_at)
              VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(token_digest(&token))
        .bind(context.content_id())
        .bind(&version_ref)
        .bind(fingerprint.as_str())
        .bind(now)
        .bind(now.saturating_add(duration_millis(self.config.token_ttl)))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!("download token issued");
        Ok(IssuedToken {
            token,
            version_ref: context.version_ref(),
            expires_in_secs: self.config.token_ttl.as_secs(),
        })
    }

    /// Exchanges `token` for a download of `context`, exactly once.
    ///
    /// A token only matches the content item and version it was issued for.
    /// Classification when the exchange fails: an expired (or unknown) token is
    /// [`TokenRejection::Expired`] regardless of prior use; otherwise a target
    /// mismatch wins over [`TokenRejection::AlreadyUsed`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Database`] on store failure.
    #[instrument(skip(self, token, context), fields(content_id = context.content_id(), version = %context.version_ref()))]
    pub async fn consume_token(
        &self,
        token: &str,
        context: &DownloadContext,
    ) -> Result<ConsumeOutcome, TokenError> {
        let now = self.clock.now_millis();
        let digest = token_digest(token.trim());
        let content_id = context.content_id();
        let version_ref = context.version_ref();
        let version_ref_text = version_ref.to_string();

        // Atomic compare-and-set: only one concurrent caller can flip consumed_at
        let claimed = sqlx::query(
            r"UPDATE download_tokens
              SET consumed_at = ?1
              WHERE token_digest = ?2
                AND consumed_at IS NULL
                AND expires_at > ?1
                AND content_id = ?3
                AND version_ref = ?4
              RETURNING content_id",
        )
        .bind(now)
        .bind(&digest)
        .bind(content_id)
        .bind(&version_ref_text)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(row) = claimed {
            debug!("download token consumed");
            return Ok(ConsumeOutcome::Authorized(AuthorizedDownload {
                content_id: row.get("content_id"),
                version_ref,
            }));
        }

        let existing = sqlx::query(
            r"SELECT content_id, version_ref, expires_at FROM download_tokens
              WHERE token_digest = ?",
        )
        .bind(&digest)
        .fetch_optional(self.db.pool())
        .await?;

        let rejection = match existing {
            None => TokenRejection::Expired,
            Some(row) => {
                let expires_at: i64 = row.get("expires_at");
                let stored_content: i64 = row.get("content_id");
                let stored_ref: String = row.get("version_ref");
                if expires_at <= now {
                    TokenRejection::Expired
                } else if stored_content != content_id || stored_ref != version_ref_text {
                    TokenRejection::Mismatched
                } else {
                    TokenRejection::AlreadyUsed
                }
            }
        };
        debug!(rejection = rejection.code(), "download token refused");
        Ok(ConsumeOutcome::Rejected(rejection))
    }

    /// Records a one-time no-JS pass-through for `fingerprint` on `context`.
    ///
    /// Called when the interstitial is served. An unexpired permission is kept
    /// as first recorded; an expired one is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Database`] on store failure.
    #[instrument(skip(self, context, fingerprint), fields(session_key = context.session_key(), client = %fingerprint))]
    pub async fn grant_permission(
        &self,
        context: &DownloadContext,
        fingerprint: &Fingerprint,
    ) -> Result<(), TokenError> {
        let now = self.clock.now_millis();
        sqlx::query(
            r"INSERT INTO download_permissions
                (session_key, holder, content_id, version_ref, granted_at, expires_at)
              VALUES (?, ?, ?, ?, ?, ?)
              ON CONFLICT(session_key, holder) DO UPDATE SET
                  content_id = excluded.content_id,
                  version_ref = excluded.version_ref,
                  granted_at = excluded.granted_at,
                  expires_at = excluded.expires_at
              WHERE download_permissions.expires_at <= excluded.granted_at",
        )
        .bind(context.session_key())
        .bind(fingerprint.as_str())
        .bind(context.content_id())
        .bind(context.version_ref().to_string())
        .bind(now)
        .bind(now.saturating_add(duration_millis(self.config.permission_ttl)))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Spends the no-JS permission for `fingerprint` on `context`, if any.
    ///
    /// # Errors
    ///
    /// - [`TokenError::CorruptRecord`] if the stored version reference is unreadable
    /// - [`TokenError::Database`] on store failure
    #[instrument(skip(self, context, fingerprint), fields(session_key = context.session_key(), client = %fingerprint))]
    pub async fn redeem_permission(
        &self,
        context: &DownloadContext,
        fingerprint: &Fingerprint,
    ) -> Result<Option<AuthorizedDownload>, TokenError> {
        // Compare-and-delete: the permission is gone the first time it is used
        let row = sqlx::query(
            r"DELETE FROM download_permissions
              WHERE session_key = ? AND holder = ? AND expires_at > ?
              RETURNING content_id, version_ref",
        )
        .bind(context.session_key())
        .bind(fingerprint.as_str())
        .bind(self.clock.now_millis())
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            debug!("no usable no-JS permission");
            return Ok(None);
        };

        let stored: String = row.get("version_ref");
        let version_ref = stored
            .parse::<VersionRef>()
            .map_err(TokenError::CorruptRecord)?;
        debug!("no-JS permission redeemed");
        Ok(Some(AuthorizedDownload {
            content_id: row.get("content_id"),
            version_ref,
        }))
    }

    /// Deletes expired tokens, stale rate-limit entries and expired permissions.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Database`] on store failure.
    #[instrument(skip(self))]
    pub async fn prune_expired(&self) -> Result<PruneStats, TokenError> {
        let now = self.clock.now_millis();
        let longest_window = [SecurityMode::Strict, SecurityMode::Reduced]
            .into_iter()
            .map(|mode| mode.policy().window)
            .max()
            .unwrap_or_default();

        let tokens = sqlx::query("DELETE FROM download_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(self.db.pool())
            .await?
            .rows_affected();
        let requests = sqlx::query("DELETE FROM token_requests WHERE requested_at <= ?")
            .bind(now - duration_millis(longest_window))
            .execute(self.db.pool())
            .await?
            .rows_affected();
        let permissions = sqlx::query("DELETE FROM download_permissions WHERE expires_at <= ?")
            .bind(now)
            .execute(self.db.pool())
            .await?
            .rows_affected();

        let stats = PruneStats {
            tokens,
            requests,
            permissions,
        };
        debug!(
            tokens = stats.tokens,
            requests = stats.requests,
            permissions = stats.permissions,
            "pruned token state"
        );
        Ok(stats)
    }
}

/// Time until the oldest counted request leaves the window, at least one second.
fn retry_after(oldest: i64, window: Duration, now: i64) -> Duration {
    let free_at = oldest.saturating_add(duration_millis(window));
    let wait_ms = u64::try_from(free_at.saturating_sub(now)).unwrap_or(0);
    Duration::from_secs(wait_ms.div_ceil(1000).max(1))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(TOKEN_BYTES * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
