//! End-to-end scenarios through resolution, the cache gate and the facade.

mod support;

use std::sync::Arc;

use support::{BASE_URL, CountingRenderer, link_externally, manual_clock, seed_neon_drift, setup_test_db};
use waiting_room::cache::{CacheGate, CachePolicy, CacheStore, SqliteCacheStore};
use waiting_room::clock::Clock;
use waiting_room::content::{ContentRepository, SqliteContentStore, Viewer};
use waiting_room::context::{ExternalType, SourceKind, SiteUrls};
use waiting_room::token::ClientSignals;
use waiting_room::{
    CacheState, ContextResolver, GateRequest, ResolveRequest, Settings, VersionRef, WaitingRoom,
};

fn resolver(db: &waiting_room::Database) -> ContextResolver {
    let repository: Arc<dyn ContentRepository> = Arc::new(SqliteContentStore::new(db.clone()));
    ContextResolver::new(repository, SiteUrls::new(BASE_URL).unwrap())
}

// ==================== Resolution ====================

#[tokio::test]
async fn test_latest_hosted_version_resolves_to_version_cache_key() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;

    let context = resolver(&db)
        .resolve(&ResolveRequest::latest("neon-drift"), &Viewer::Anonymous)
        .await
        .unwrap();

    assert_eq!(context.source_kind(), SourceKind::Hosted);
    assert_eq!(context.version_ref(), VersionRef::Id(seeded.version_id));
    assert_eq!(context.cache_key(), format!("wr:{}", seeded.version_id));
}

#[tokio::test]
async fn test_item_level_external_link_resolves_to_external_context() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    link_externally(&db, seeded.content_id, "https://host.example/file.zip").await;

    let request = ResolveRequest::external("neon-drift", ExternalType::Mod, Some(seeded.content_id));
    let context = resolver(&db).resolve(&request, &Viewer::Anonymous).await.unwrap();

    assert_eq!(context.source_kind(), SourceKind::External);
    assert_eq!(context.external_domain(), Some("host.example"));
    assert_eq!(context.external_url(), Some("https://host.example/file.zip"));
    assert_eq!(context.cache_key(), format!("wr:ext:m:{}", seeded.content_id));
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    let resolver = resolver(&db);
    let request = ResolveRequest::version("neon-drift", seeded.version_id);

    let first = resolver.resolve(&request, &Viewer::Anonymous).await.unwrap();
    let second = resolver.resolve(&request, &Viewer::Anonymous).await.unwrap();

    assert_eq!(first.cache_key(), second.cache_key());
    assert_eq!(first.session_key(), second.session_key());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unknown_slug_and_version_are_not_found() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    let resolver = resolver(&db);

    let missing_slug = resolver
        .resolve(&ResolveRequest::latest("ghost"), &Viewer::Anonymous)
        .await
        .unwrap_err();
    assert!(missing_slug.is_not_found());

    let missing_version = resolver
        .resolve(
            &ResolveRequest::version("neon-drift", seeded.version_id + 100),
            &Viewer::Anonymous,
        )
        .await
        .unwrap_err();
    assert!(missing_version.is_not_found());
}

// ==================== Cache Gate ====================

#[tokio::test]
async fn test_cold_cache_misses_then_hits_with_identical_bytes() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    let clock: Arc<dyn Clock> = manual_clock();
    let renderer = Arc::new(CountingRenderer::default());
    let store = Arc::new(SqliteCacheStore::new(db.clone(), Arc::clone(&clock)));
    let gate = CacheGate::new(
        Arc::clone(&store) as Arc<dyn CacheStore>,
        Arc::clone(&renderer) as Arc<dyn waiting_room::Renderer>,
        clock,
        CachePolicy::default(),
    );
    let context = resolver(&db)
        .resolve(&ResolveRequest::version("neon-drift", seeded.version_id), &Viewer::Anonymous)
        .await
        .unwrap();
    let request = GateRequest::anonymous(format!("/mods/neon-drift/download/{}/", seeded.version_id));

    let miss = gate.serve(&context, &request).await.unwrap();
    assert_eq!(miss.state, CacheState::Miss);
    assert_eq!(
        store.get(context.cache_key()).await.unwrap().as_deref(),
        Some(miss.body.as_slice())
    );

    let hit = gate.serve(&context, &request).await.unwrap();
    assert_eq!(hit.state, CacheState::Hit);
    assert_eq!(hit.body, miss.body);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn test_privileged_request_bypasses_existing_entry() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    let clock: Arc<dyn Clock> = manual_clock();
    let renderer = Arc::new(CountingRenderer::default());
    let store = Arc::new(SqliteCacheStore::new(db.clone(), Arc::clone(&clock)));
    let gate = CacheGate::new(
        Arc::clone(&store) as Arc<dyn CacheStore>,
        Arc::clone(&renderer) as Arc<dyn waiting_room::Renderer>,
        clock,
        CachePolicy::default(),
    );
    let context = resolver(&db)
        .resolve(&ResolveRequest::version("neon-drift", seeded.version_id), &Viewer::Anonymous)
        .await
        .unwrap();
    let path = format!("/mods/neon-drift/download/{}/", seeded.version_id);

    // Warm the cache anonymously
    gate.serve(&context, &GateRequest::anonymous(path.clone())).await.unwrap();

    let member = GateRequest::new(
        path.clone(),
        Viewer::Member {
            user_id: 12,
            can_read_private: false,
        },
    );
    let response = gate.serve(&context, &member).await.unwrap();
    assert_eq!(response.state, CacheState::Bypass);
    assert_eq!(
        response.cache_control(),
        Some("private, no-store, no-cache, must-revalidate")
    );

    let with_cookie = GateRequest::anonymous(path).with_session_indicator();
    assert_eq!(gate.serve(&context, &with_cookie).await.unwrap().state, CacheState::Bypass);
    assert_eq!(renderer.calls(), 3);
}

// ==================== Facade ====================

#[tokio::test]
async fn test_full_visit_serves_page_issues_token_and_counts_download() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    let renderer = Arc::new(CountingRenderer::default());
    let settings = Settings {
        base_url: BASE_URL.to_string(),
        ..Settings::default()
    };
    let room = WaitingRoom::from_settings(&settings, db.clone(), renderer, manual_clock()).unwrap();

    let target = ResolveRequest::latest("neon-drift");
    let request = GateRequest::anonymous("/mods/neon-drift/download/");
    let signals = ClientSignals::new("192.0.2.10", Some("Mozilla/5.0"));

    let page = room.show(&target, &request, &signals).await.unwrap();
    assert_eq!(page.status.as_u16(), 200);
    assert_eq!(page.state, CacheState::Miss);

    let issued = room.issue_token(&target, &request, &signals).await.unwrap();
    assert!(room.exchange_token(&issued.token, &target, &request).await.unwrap().is_authorized());

    room.drain_job(100).drain().await.unwrap();
    assert_eq!(
        room.downloads()
            .count_for_version(seeded.content_id, VersionRef::Id(seeded.version_id))
            .await
            .unwrap(),
        1
    );
    room.shutdown().await;
}

#[tokio::test]
async fn test_external_request_on_wrong_path_redirects_to_canonical_url() {
    let (db, _temp_dir) = setup_test_db().await;
    let seeded = seed_neon_drift(&db).await;
    link_externally(&db, seeded.content_id, "https://www.host.example/file.zip").await;
    let settings = Settings {
        base_url: BASE_URL.to_string(),
        ..Settings::default()
    };
    let room = WaitingRoom::from_settings(
        &settings,
        db,
        Arc::new(CountingRenderer::default()),
        manual_clock(),
    )
    .unwrap();

    let target = ResolveRequest::external("neon-drift", ExternalType::Mod, Some(seeded.content_id));
    let response = room
        .show(
            &target,
            &GateRequest::anonymous("/mods/neon-drift/download/ext/legacy/"),
            &ClientSignals::new("192.0.2.10", None),
        )
        .await
        .unwrap();

    assert!(response.is_redirect());
    assert_eq!(
        response.location(),
        Some("https://mods.example/mods/neon-drift/download/ext/m/")
    );
    room.shutdown().await;
}
