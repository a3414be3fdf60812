mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rchat::{ChatErrorKind, HistoryReader, SessionManager};
use rcommon::{MetadataMap, SessionId};
use rprovider::Role;
use rstore::{ChatRepository, InMemoryCache, VolatileCache, history_key, transcript_key};

use support::{CountingRepository, UnavailableCache};

const TTL: Duration = Duration::from_secs(3600);

async fn seeded_session(repository: &CountingRepository, messages: usize) -> SessionId {
    let session = repository
        .create_session(MetadataMap::new())
        .await
        .expect("session");
    for index in 0..messages {
        let role = if index % 2 == 0 { Role::User } else { Role::Assistant };
        repository
            .create_message(&session.id, role, format!("message {index}"))
            .await
            .expect("message");
    }
    session.id
}

#[tokio::test]
async fn recent_history_is_chronological_strictly_increasing_and_capped() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 14).await;
    let reader = HistoryReader::new(repository, Arc::new(InMemoryCache::new()), TTL);

    let history = reader
        .recent_history(&session_id, 10)
        .await
        .expect("history");

    assert_eq!(history.len(), 10);
    assert_eq!(history[0].content, "message 4");
    assert_eq!(history[9].content, "message 13");
    assert!(
        history
            .windows(2)
            .all(|pair| pair[0].created_at < pair[1].created_at)
    );
}

#[tokio::test]
async fn miss_populates_cache_and_invalidate_restores_freshness() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 2).await;
    let cache = Arc::new(InMemoryCache::new());
    let reader = HistoryReader::new(repository.clone(), cache.clone(), TTL);

    assert_eq!(reader.recent_history(&session_id, 10).await.expect("read").len(), 2);
    assert!(cache.get(&history_key(&session_id)).await.expect("get").is_some());

    repository
        .create_message(&session_id, Role::User, "written behind the cache".to_string())
        .await
        .expect("message");
    let stale = reader.recent_history(&session_id, 10).await.expect("read");
    assert_eq!(stale.len(), 2, "cache hit serves the cached list");

    reader.invalidate(&session_id).await;
    assert!(cache.get(&history_key(&session_id)).await.expect("get").is_none());
    let fresh = reader.recent_history(&session_id, 10).await.expect("read");
    assert_eq!(fresh.len(), 3);
    assert_eq!(fresh[2].content, "written behind the cache");
}

#[tokio::test]
async fn cached_list_longer_than_limit_is_trimmed_to_newest() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 6).await;
    let reader = HistoryReader::new(repository, Arc::new(InMemoryCache::new()), TTL);

    reader.recent_history(&session_id, 10).await.expect("warm cache");
    let short = reader.recent_history(&session_id, 3).await.expect("read");

    let contents = short
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>();
    assert_eq!(contents, vec!["message 3", "message 4", "message 5"]);
}

#[tokio::test]
async fn empty_history_is_not_cached() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 0).await;
    let cache = Arc::new(InMemoryCache::new());
    let reader = HistoryReader::new(repository, cache.clone(), TTL);

    assert!(reader.recent_history(&session_id, 10).await.expect("read").is_empty());
    assert!(cache.get(&history_key(&session_id)).await.expect("get").is_none());
}

#[tokio::test]
async fn undecodable_cache_entry_falls_back_to_store() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 2).await;
    let cache = Arc::new(InMemoryCache::new());
    cache
        .set(&history_key(&session_id), "[{\"broken\":".to_string(), TTL)
        .await
        .expect("seed garbage");
    let reader = HistoryReader::new(repository, cache, TTL);

    let history = reader.recent_history(&session_id, 10).await.expect("read");
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn cache_outage_degrades_to_store_reads() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 3).await;
    let cache = Arc::new(UnavailableCache::default());
    let reader = HistoryReader::new(repository, cache.clone(), TTL);

    let history = reader.recent_history(&session_id, 10).await.expect("read");
    assert_eq!(history.len(), 3);
    reader.invalidate(&session_id).await;
    let transcript = reader.transcript(&session_id).await.expect("transcript");
    assert_eq!(transcript.messages.len(), 3);
    assert!(cache.calls.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn store_failure_surfaces_as_storage_error() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 1).await;
    repository.fail_reads.store(true, Ordering::SeqCst);
    let reader = HistoryReader::new(repository, Arc::new(InMemoryCache::new()), TTL);

    let error = reader
        .recent_history(&session_id, 10)
        .await
        .expect_err("store is down");
    assert_eq!(error.kind, ChatErrorKind::Storage);
}

#[tokio::test]
async fn transcript_is_cached_and_missing_sessions_are_not_found() {
    let repository = Arc::new(CountingRepository::new());
    let session_id = seeded_session(&repository, 2).await;
    let cache = Arc::new(InMemoryCache::new());
    let reader = HistoryReader::new(repository, cache.clone(), TTL);

    let transcript = reader.transcript(&session_id).await.expect("transcript");
    assert_eq!(transcript.session.id, session_id);
    assert_eq!(transcript.messages[0].content, "message 0");
    assert!(cache.get(&transcript_key(&session_id)).await.expect("get").is_some());

    let error = reader
        .transcript(&SessionId::generate())
        .await
        .expect_err("unknown session");
    assert_eq!(error.kind, ChatErrorKind::SessionNotFound);
}

#[tokio::test]
async fn resolving_a_known_session_twice_creates_nothing() {
    let repository = Arc::new(CountingRepository::new());
    let manager = SessionManager::new(repository.clone(), "api");

    let created = manager.resolve(None).await.expect("create");
    assert!(created.created);
    assert_eq!(created.session.source(), Some("api"));
    assert_eq!(repository.session_creates(), 1);

    let first = manager.resolve(Some(created.id())).await.expect("first");
    let second = manager.resolve(Some(created.id())).await.expect("second");
    assert_eq!(first.session, created.session);
    assert_eq!(second.session, created.session);
    assert!(!first.created && !second.created);
    assert_eq!(repository.session_creates(), 1);
}

#[tokio::test]
async fn unknown_session_id_gets_a_fresh_session_with_requested_source() {
    let repository = Arc::new(CountingRepository::new());
    let manager = SessionManager::new(repository.clone(), "api");
    let unknown = SessionId::generate();

    let resolved = manager
        .resolve_with_source(Some(&unknown), Some("websocket"))
        .await
        .expect("resolve");
    assert!(resolved.created);
    assert_ne!(resolved.id(), &unknown);
    assert_eq!(resolved.session.source(), Some("websocket"));

    let error = manager.require(&unknown).await.expect_err("still unknown");
    assert_eq!(error.kind, ChatErrorKind::SessionNotFound);
}

#[tokio::test]
async fn store_outage_during_resolution_is_a_storage_error() {
    let repository = Arc::new(CountingRepository::new());
    repository.fail_reads.store(true, Ordering::SeqCst);
    let manager = SessionManager::new(repository.clone(), "api");

    let error = manager
        .resolve(Some(&SessionId::generate()))
        .await
        .expect_err("lookup fails");
    assert_eq!(error.kind, ChatErrorKind::Storage);
    assert_eq!(repository.session_creates(), 0);
}
