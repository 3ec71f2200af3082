//! Token lifecycle against a real database: single use, expiry and rate
//! limits under concurrency.

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{BASE_URL, link_externally, manual_clock, seed_neon_drift, setup_test_db};
use tokio::sync::Barrier;
use waiting_room::clock::{Clock, ManualClock};
use waiting_room::content::{ContentRepository, NewContent, SqliteContentStore, Viewer};
use waiting_room::context::{ExternalType, SiteUrls};
use waiting_room::token::{
    ClientSignals, ConsumeOutcome, Fingerprint, TokenConfig, TokenError, TokenRejection,
};
use waiting_room::{ContextResolver, Database, DownloadContext, ResolveRequest, SecurityMode, TokenService};

async fn setup() -> (TokenService, DownloadContext, Arc<ManualClock>, tempfile::TempDir) {
    let (db, temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    let context = resolve(&db, seeded.version_id).await;
    let clock = manual_clock();
    let tokens = TokenService::new(
        db,
        Arc::clone(&clock) as Arc<dyn Clock>,
        TokenConfig::default(),
    );
    (tokens, context, clock, temp_dir)
}

async fn resolve(db: &Database, version_id: i64) -> DownloadContext {
    let repository: Arc<dyn ContentRepository> = Arc::new(SqliteContentStore::new(db.clone()));
    ContextResolver::new(repository, SiteUrls::new(BASE_URL).unwrap())
        .resolve(&ResolveRequest::version("neon-drift", version_id), &Viewer::Anonymous)
        .await
        .unwrap()
}

fn fingerprint(mode: SecurityMode) -> Fingerprint {
    Fingerprint::derive(mode, &ClientSignals::new("198.51.100.23", Some("Mozilla/5.0")))
}

// ==================== Single use ====================

#[tokio::test]
async fn test_concurrent_consumption_succeeds_exactly_once() {
    let (tokens, context, _clock, _temp_dir) = setup().await;
    let issued = tokens
        .issue_token(&context, &fingerprint(SecurityMode::Strict), SecurityMode::Strict)
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let tokens = tokens.clone();
        let barrier = Arc::clone(&barrier);
        let token = issued.token.clone();
        let context = context.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            tokens.consume_token(&token, &context).await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    let authorized = outcomes.iter().filter(|o| o.is_authorized()).count();
    assert_eq!(authorized, 1, "exactly one exchange may succeed: {outcomes:?}");
    assert!(outcomes.contains(&ConsumeOutcome::Rejected(TokenRejection::AlreadyUsed)));
}

#[tokio::test]
async fn test_token_for_one_external_mod_is_refused_on_another() {
    let (db, _temp_dir) = setup_test_db().await;
    let store = SqliteContentStore::new(db.clone());
    let repository: Arc<dyn ContentRepository> = Arc::new(store.clone());
    let resolver = ContextResolver::new(repository, SiteUrls::new(BASE_URL).unwrap());

    let mut contexts = Vec::new();
    for slug in ["mod-a", "mod-b"] {
        let content_id = store
            .insert_content(&NewContent::published(slug, slug))
            .await
            .unwrap();
        link_externally(&db, content_id, &format!("https://host.example/{slug}.zip")).await;
        let request = ResolveRequest::external(slug, ExternalType::Mod, None);
        contexts.push(resolver.resolve(&request, &Viewer::Anonymous).await.unwrap());
    }
    let (mod_a, mod_b) = (&contexts[0], &contexts[1]);
    assert_eq!(mod_a.version_ref(), mod_b.version_ref());

    let tokens = TokenService::new(db, manual_clock(), TokenConfig::default());
    let issued = tokens
        .issue_token(mod_a, &fingerprint(SecurityMode::Strict), SecurityMode::Strict)
        .await
        .unwrap();

    let outcome = tokens.consume_token(&issued.token, mod_b).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Rejected(TokenRejection::Mismatched));
    assert!(tokens.consume_token(&issued.token, mod_a).await.unwrap().is_authorized());
}

// ==================== Expiry ====================

#[tokio::test]
async fn test_token_consumed_after_ttl_is_expired() {
    let (tokens, context, clock, _temp_dir) = setup().await;
    let issued = tokens
        .issue_token(&context, &fingerprint(SecurityMode::Strict), SecurityMode::Strict)
        .await
        .unwrap();

    clock.advance(Duration::from_secs(issued.expires_in_secs + 1));
    let outcome = tokens.consume_token(&issued.token, &context).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Rejected(TokenRejection::Expired));
}

#[tokio::test]
async fn test_spent_token_reports_expired_once_ttl_passes() {
    let (tokens, context, clock, _temp_dir) = setup().await;
    let issued = tokens
        .issue_token(&context, &fingerprint(SecurityMode::Strict), SecurityMode::Strict)
        .await
        .unwrap();
    assert!(tokens.consume_token(&issued.token, &context).await.unwrap().is_authorized());

    clock.advance(Duration::from_secs(issued.expires_in_secs + 1));
    let outcome = tokens.consume_token(&issued.token, &context).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Rejected(TokenRejection::Expired));
}

// ==================== Rate limiting ====================

#[tokio::test]
async fn test_strict_mode_rejects_request_over_threshold() {
    let (tokens, context, _clock, _temp_dir) = setup().await;
    let client = fingerprint(SecurityMode::Strict);
    let limit = SecurityMode::Strict.policy().max_requests;

    for _ in 0..limit {
        tokens.issue_token(&context, &client, SecurityMode::Strict).await.unwrap();
    }
    let error = tokens
        .issue_token(&context, &client, SecurityMode::Strict)
        .await
        .unwrap_err();
    match error {
        TokenError::RateLimited { retry_after } => assert!(retry_after > Duration::ZERO),
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reduced_mode_allows_same_sequence() {
    let (tokens, context, _clock, _temp_dir) = setup().await;
    let client = fingerprint(SecurityMode::Reduced);
    let strict_limit = SecurityMode::Strict.policy().max_requests;

    for _ in 0..=strict_limit {
        tokens.issue_token(&context, &client, SecurityMode::Reduced).await.unwrap();
    }
}

#[tokio::test]
async fn test_window_rolls_over() {
    let (tokens, context, clock, _temp_dir) = setup().await;
    let client = fingerprint(SecurityMode::Strict);
    let policy = SecurityMode::Strict.policy();
    for _ in 0..policy.max_requests {
        tokens.issue_token(&context, &client, SecurityMode::Strict).await.unwrap();
    }
    assert!(tokens.issue_token(&context, &client, SecurityMode::Strict).await.is_err());

    clock.advance(policy.window + Duration::from_secs(1));
    tokens.issue_token(&context, &client, SecurityMode::Strict).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_issuance_never_exceeds_threshold() {
    let (tokens, context, _clock, _temp_dir) = setup().await;
    let client = fingerprint(SecurityMode::Strict);
    let tasks = 8;
    let barrier = Arc::new(Barrier::new(tasks));

    let mut handles = Vec::new();
    for _ in 0..tasks {
        let tokens = tokens.clone();
        let context = context.clone();
        let client = client.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            tokens.issue_token(&context, &client, SecurityMode::Strict).await
        }));
    }

    let mut issued = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(error) if error.is_rate_limited() => limited += 1,
            Err(error) => panic!("unexpected error: {error}"),
        }
    }
    let limit = usize::try_from(SecurityMode::Strict.policy().max_requests).unwrap();
    assert_eq!(issued, limit);
    assert_eq!(limited, tasks - limit);
}

// ==================== No-JS permissions ====================

#[tokio::test]
async fn test_permission_redeems_once_for_recording_client_only() {
    let (tokens, context, _clock, _temp_dir) = setup().await;
    let holder = fingerprint(SecurityMode::Strict);
    let stranger = Fingerprint::derive(
        SecurityMode::Strict,
        &ClientSignals::new("203.0.113.50", Some("Mozilla/5.0")),
    );

    tokens.grant_permission(&context, &holder).await.unwrap();
    assert!(tokens.redeem_permission(&context, &stranger).await.unwrap().is_none());
    let redeemed = tokens.redeem_permission(&context, &holder).await.unwrap().unwrap();
    assert_eq!(redeemed.version_ref, context.version_ref());
    assert!(tokens.redeem_permission(&context, &holder).await.unwrap().is_none());
}
