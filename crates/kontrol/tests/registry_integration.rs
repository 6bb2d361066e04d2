//! Integration tests: registry lifecycle.
//!
//! Registration, heartbeats, lease expiry, storage TTL and discovery working
//! together on the in-memory backend, with tokio's paused clock standing in
//! for real time.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kontrol::{
    Auth, AuthType, Ed25519Signer, HeartbeatReply, KiteId, KiteRecord, Kontrol, KontrolConfig,
    KontrolError, LeaseEvent, MemoryStorage, Query, RegisterRequest, RegisterValue, Storage,
    StorageError, TokenClaims, TokenError, TokenSigner,
};

// ── Test doubles ────────────────────────────────────────────────────────

/// Signer that counts how many tokens it mints.
struct CountingSigner {
    inner: Ed25519Signer,
    signed: AtomicUsize,
}

impl CountingSigner {
    fn new() -> Self {
        Self {
            inner: Ed25519Signer::from_seed(&[42u8; 32]),
            signed: AtomicUsize::new(0),
        }
    }

    fn signed(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

impl TokenSigner for CountingSigner {
    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(claims)
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.inner.verify(token)
    }
}

/// Memory storage that counts refresher writes.
struct CountingStorage {
    inner: MemoryStorage,
    updates: AtomicUsize,
}

impl CountingStorage {
    fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Storage for CountingStorage {
    async fn upsert(&self, kite: &KiteId, value: &RegisterValue) -> Result<(), StorageError> {
        self.inner.upsert(kite, value).await
    }

    async fn update(&self, kite: &KiteId, value: &RegisterValue) -> Result<(), StorageError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(kite, value).await
    }

    async fn get(&self, query: &Query) -> Result<Vec<KiteRecord>, StorageError> {
        self.inner.get(query).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Heartbeat 10s, grace 5s, refresher every 20s, record TTL 30s.
fn config() -> KontrolConfig {
    KontrolConfig::new()
        .heartbeat_interval(Duration::from_secs(10))
        .heartbeat_grace(Duration::from_secs(5))
        .update_interval(Duration::from_secs(20))
        .record_ttl(Duration::from_secs(30))
}

struct Harness {
    kontrol: Kontrol,
    storage: Arc<CountingStorage>,
    signer: Arc<CountingSigner>,
}

fn harness() -> Harness {
    harness_with(config())
}

fn harness_with(config: KontrolConfig) -> Harness {
    let storage = Arc::new(CountingStorage {
        inner: MemoryStorage::new(config.record_ttl),
        updates: AtomicUsize::new(0),
    });
    let signer = Arc::new(CountingSigner::new());
    let kontrol = Kontrol::new(config, storage.clone(), signer.clone()).expect("valid config");
    Harness {
        kontrol,
        storage,
        signer,
    }
}

fn kite(id: &str) -> KiteId {
    KiteId {
        username: "devrim".into(),
        environment: "prod".into(),
        name: "svc".into(),
        version: "1.0.0".into(),
        region: "eu".into(),
        hostname: format!("host-{id}"),
        id: id.into(),
    }
}

async fn register(h: &Harness, id: &str, url: &str) {
    let key = h.kontrol.issue_kite_key("devrim").expect("kite key");
    let result = h
        .kontrol
        .register(RegisterRequest {
            kite: kite(id),
            url: url.into(),
            auth: Auth {
                auth_type: AuthType::KiteKey,
                key,
            },
        })
        .await
        .expect("register");
    assert_eq!(result.url, url);
}

fn by_name(name: &str) -> Query {
    Query {
        name: name.into(),
        ..Query::default()
    }
}

async fn discoverable(h: &Harness, id: &str) -> bool {
    h.kontrol
        .get_kites(&Query::by_id(id), "alice")
        .await
        .expect("get kites")
        .kites
        .iter()
        .any(|k| k.kite.id == id)
}

// ── Scenarios ───────────────────────────────────────────────────────────

/// svc-A registers, then goes silent: the lease is lost after 15s, the
/// record after its TTL, and a late heartbeat is told to register again.
#[tokio::test(start_paused = true)]
async fn silent_kite_drops_out_after_ttl() {
    let h = harness();
    let key = h.kontrol.issue_kite_key("devrim").unwrap();
    let result = h
        .kontrol
        .register(RegisterRequest {
            kite: kite("svc-A"),
            url: "http://10.0.0.1:9000".into(),
            auth: Auth {
                auth_type: AuthType::KiteKey,
                key,
            },
        })
        .await
        .unwrap();
    assert_eq!(result.heartbeat_interval, 10);
    assert!(discoverable(&h, "svc-A").await);

    // ── No heartbeat for 16s: lease gone, record still within TTL ───────
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(!h.kontrol.leases().contains("svc-A"));
    assert!(discoverable(&h, "svc-A").await);

    // ── Past the record TTL: no longer discoverable ─────────────────────
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(!discoverable(&h, "svc-A").await);
    assert_eq!(h.storage.updates(), 0, "refresher stopped before its first write");

    assert_eq!(h.kontrol.heartbeat("svc-A"), HeartbeatReply::RegisterAgain);
}

/// A kite heartbeating on schedule stays discoverable well past the record
/// TTL, with storage written once per update interval only.
#[tokio::test(start_paused = true)]
async fn heartbeating_kite_stays_discoverable() {
    let h = harness();
    register(&h, "svc-A", "http://10.0.0.1:9000").await;

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.kontrol.heartbeat("svc-A"), HeartbeatReply::Pong);
    }

    // Step off the 120s tick so the last refresher write has landed.
    tokio::time::sleep(Duration::from_secs(5)).await;

    // 12 heartbeats, refresher writes at 20, 40, ..., 120.
    assert!(discoverable(&h, "svc-A").await);
    assert_eq!(h.storage.updates(), 6);
}

/// Heartbeat arriving late but inside the grace period keeps the lease.
#[tokio::test(start_paused = true)]
async fn heartbeat_within_grace_keeps_lease() {
    let h = harness();
    register(&h, "svc-A", "http://10.0.0.1:9000").await;

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(h.kontrol.heartbeat("svc-A"), HeartbeatReply::Pong);

    // Full reset: another 14s is still inside the new window.
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(h.kontrol.leases().contains("svc-A"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.kontrol.leases().contains("svc-A"));
}

/// Re-registering replaces the lease: one refresher, one timer.
#[tokio::test(start_paused = true)]
async fn reregistration_replaces_refresher_and_timer() {
    let h = harness();
    let mut events = h.kontrol.leases().subscribe();

    register(&h, "svc-A", "http://10.0.0.1:9000").await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    register(&h, "svc-A", "http://10.0.0.1:9001").await;

    assert_eq!(events.recv().await.unwrap(), LeaseEvent::Armed { id: "svc-A".into() });
    assert_eq!(
        events.recv().await.unwrap(),
        LeaseEvent::Superseded { id: "svc-A".into() }
    );
    assert_eq!(events.recv().await.unwrap(), LeaseEvent::Armed { id: "svc-A".into() });
    assert_eq!(h.kontrol.leases().len(), 1);

    // Keep the second lease alive until t=65; its refresher writes at 25, 45, 65.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.kontrol.heartbeat("svc-A"), HeartbeatReply::Pong);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.storage.updates(), 3);

    let found = h
        .kontrol
        .get_kites(&Query::by_id("svc-A"), "alice")
        .await
        .unwrap();
    assert_eq!(found.kites.len(), 1);
    assert_eq!(found.kites[0].url, "http://10.0.0.1:9001");
}

/// svc-A and svc-B both match {name: "svc"}: discovery returns both with
/// the same token, GetToken refuses the ambiguous audience.
#[tokio::test(start_paused = true)]
async fn shared_token_and_ambiguous_get_token() {
    let h = harness();
    register(&h, "svc-A", "http://10.0.0.1:9000").await;
    register(&h, "svc-B", "http://10.0.0.2:9000").await;

    let before = h.signer.signed();
    let result = h.kontrol.get_kites(&by_name("svc"), "alice").await.unwrap();
    assert_eq!(h.signer.signed() - before, 1, "one signature per call");

    assert_eq!(result.kites.len(), 2);
    let token = result.kites[0].token.clone().expect("token attached");
    assert!(result.kites.iter().all(|k| k.token.as_deref() == Some(token.as_str())));

    let claims = h.signer.verify(&token).unwrap();
    assert_eq!(claims.aud, "/*/*/svc");
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.iss, "kontrol");

    let err = h.kontrol.get_token(&by_name("svc"), "alice").await.unwrap_err();
    assert!(matches!(err, KontrolError::AmbiguousQuery { matches: 2 }));
}

/// Discovery over many matches still signs exactly once.
#[tokio::test(start_paused = true)]
async fn discovery_signs_once_for_many_records() {
    let h = harness();
    for i in 0..25 {
        register(&h, &format!("svc-{i:02}"), &format!("http://10.0.1.{i}:9000")).await;
    }

    let before = h.signer.signed();
    let query = Query {
        username: "devrim".into(),
        environment: "prod".into(),
        name: "svc".into(),
        ..Query::default()
    };
    let result = h.kontrol.get_kites(&query, "alice").await.unwrap();
    assert_eq!(result.kites.len(), 25);
    assert_eq!(h.signer.signed() - before, 1);

    let claims = h
        .signer
        .verify(result.kites[24].token.as_deref().unwrap())
        .unwrap();
    assert_eq!(claims.aud, "/devrim/prod/svc");
}

/// GetToken: exactly one match → token; none → validation error.
#[tokio::test(start_paused = true)]
async fn get_token_requires_single_match() {
    let h = harness();
    register(&h, "svc-A", "http://10.0.0.1:9000").await;
    register(&h, "svc-B", "http://10.0.0.2:9000").await;

    let token = h
        .kontrol
        .get_token(&Query::by_id("svc-A"), "alice")
        .await
        .unwrap();
    let claims = h.signer.verify(&token).unwrap();
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.aud, kite("svc-A").key(), "scoped to the one kite");

    let err = h
        .kontrol
        .get_token(&Query::by_id("svc-Z"), "alice")
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.to_string(), "validation error: no kite matches the query");
}

/// Discovery with no match is not an error: empty list, still a token.
#[tokio::test(start_paused = true)]
async fn discovery_without_match_is_empty() {
    let h = harness();
    let result = h.kontrol.get_kites(&by_name("nothing"), "alice").await.unwrap();
    assert!(result.kites.is_empty());
    assert_eq!(h.signer.signed(), 1);
}

/// A restarted registry has no leases: heartbeats ask for re-registration,
/// storage records are untouched and re-registration picks them back up.
#[tokio::test(start_paused = true)]
async fn restart_recovers_through_reregistration() {
    let h = harness();
    register(&h, "svc-A", "http://10.0.0.1:9000").await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Simulated restart: fresh registry, same backend and key.
    h.kontrol.close();
    let restarted = Harness {
        kontrol: Kontrol::new(config(), h.storage.clone(), h.signer.clone()).unwrap(),
        storage: h.storage.clone(),
        signer: h.signer.clone(),
    };

    assert_eq!(restarted.kontrol.heartbeat("svc-A"), HeartbeatReply::RegisterAgain);
    assert!(discoverable(&restarted, "svc-A").await, "record not deleted");

    register(&restarted, "svc-A", "http://10.0.0.1:9000").await;
    assert_eq!(restarted.kontrol.heartbeat("svc-A"), HeartbeatReply::Pong);

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(restarted.kontrol.heartbeat("svc-A"), HeartbeatReply::Pong);
    }
    assert!(discoverable(&restarted, "svc-A").await);
}

/// Many kites registering and heartbeating from separate tasks, interleaved
/// on one thread by the paused clock.
#[tokio::test(start_paused = true)]
async fn interleaved_registrations_and_heartbeats() {
    let h = Arc::new(harness());

    let mut tasks = Vec::new();
    for i in 0..50 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let id = format!("kite-{i}");
            register(&h, &id, "http://10.0.2.1:9000").await;
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(10)).await;
                assert_eq!(h.kontrol.heartbeat(&id), HeartbeatReply::Pong);
            }
        }));
    }
    for task in tasks {
        task.await.expect("task panicked");
    }

    assert_eq!(h.kontrol.leases().len(), 50);
    let all = h.kontrol.get_kites(&by_name("svc"), "alice").await.unwrap();
    assert_eq!(all.kites.len(), 50);
}

/// Registrations, re-registrations and heartbeats racing on worker threads
/// with real timers. Each id ends with exactly one lease, and once the
/// registry closes no refresher keeps writing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_registrations_on_worker_threads() {
    let h = Arc::new(harness_with(
        KontrolConfig::new()
            .heartbeat_interval(Duration::from_secs(1))
            .heartbeat_grace(Duration::from_secs(1))
            .update_interval(Duration::from_millis(300))
            .record_ttl(Duration::from_secs(3)),
    ));

    let mut tasks = Vec::new();
    for i in 0..32 {
        let h = Arc::clone(&h);
        // Two tasks per id: the second registration replaces the first.
        let id = format!("kite-{}", i % 16);
        tasks.push(tokio::spawn(async move {
            register(&h, &id, "http://10.0.3.1:9000").await;
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(400)).await;
                assert_eq!(h.kontrol.heartbeat(&id), HeartbeatReply::Pong);
            }
        }));
    }
    for task in tasks {
        task.await.expect("task panicked");
    }

    assert_eq!(h.kontrol.leases().len(), 16);
    let all = h.kontrol.get_kites(&by_name("svc"), "alice").await.unwrap();
    assert_eq!(all.kites.len(), 16);
    assert!(h.storage.updates() > 0, "refreshers ran");

    h.kontrol.close();
    // Let any write that was already past its cancellation check land.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_close = h.storage.updates();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.storage.updates(), after_close, "no refresher outlived close");
}
