//! Client Pool Implementation
//!
//! `ClientPool` caches one live client per (data source, effective
//! credential). Concurrent requests for a missing key are coalesced: the
//! first caller installs a `Creating` marker holding a shared future, later
//! callers await the same future, and the marker is replaced by the resolved
//! client on success or removed on failure.
//!
//! Creation runs on its own task, so a caller that goes away does not cancel
//! a creation other callers are waiting on.

use super::audit::{AuditEvent, AuditEventKind, AuditSink, TracingAuditSink};
use super::credential::EffectiveCredential;
use super::error::DataSourceError;
use super::metrics::{DataSourceMetrics, PoolEvent};
use super::transport::TlsConfig;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration shared by both client pools and the client factory
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of resolved clients kept per pool
    pub max_cached_clients: usize,
    /// Request timeout used when a data source sets none
    pub default_timeout: Duration,
    /// Connect timeout used when a data source sets none
    pub connect_timeout: Duration,
    /// TLS settings used when a data source sets none
    pub tls: TlsConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_cached_clients: 100,
            default_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tls: TlsConfig::strict(),
        }
    }
}

impl PoolConfig {
    pub fn new(max_cached_clients: usize) -> Self {
        Self {
            max_cached_clients,
            ..Default::default()
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn validate(&self) -> Result<(), DataSourceError> {
        if self.max_cached_clients == 0 {
            return Err(DataSourceError::TransportConfigError(
                "max_cached_clients must be > 0".to_string(),
            ));
        }
        if self.default_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(DataSourceError::TransportConfigError(
                "pool timeouts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Keys, Entries and Handles
// ============================================================================

/// A pooled client's identity
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub data_source_id: String,
    pub credential: EffectiveCredential,
}

impl PoolKey {
    pub fn new(data_source_id: impl Into<String>, credential: EffectiveCredential) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            credential,
        }
    }
}

impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolKey({}/{})", self.data_source_id, self.credential)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.data_source_id, self.credential)
    }
}

/// Anything the pool can hold
pub trait PoolClient: Send + Sync + 'static {
    /// Release the client's connections; later requests through it fail
    fn close(&self);
}

/// A resolved client together with its bookkeeping
pub struct PooledClient<C> {
    client: C,
    key: PoolKey,
    fingerprint: String,
    created_at: DateTime<Utc>,
    last_access: AtomicU64,
}

impl<C> PooledClient<C> {
    fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }
}

/// Shared handle to a pooled client
///
/// Cloning is cheap. A handle stays usable after its entry is evicted or
/// invalidated; it only stops working once the pool shuts down.
pub struct ClientHandle<C> {
    entry: Arc<PooledClient<C>>,
}

impl<C> Clone for ClientHandle<C> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<C> Deref for ClientHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.entry.client
    }
}

impl<C> fmt::Debug for ClientHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("key", &self.entry.key)
            .field("created_at", &self.entry.created_at)
            .finish()
    }
}

impl<C> ClientHandle<C> {
    pub fn key(&self) -> &PoolKey {
        &self.entry.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.entry.created_at
    }

    /// Whether both handles point at the same pooled entry
    pub fn same_entry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

type Creation<C> = Shared<BoxFuture<'static, Result<ClientHandle<C>, DataSourceError>>>;

enum Slot<C> {
    Creating {
        ticket: u64,
        fingerprint: String,
        creation: Creation<C>,
    },
    Ready(Arc<PooledClient<C>>),
}

impl<C> Slot<C> {
    fn is_ticket(&self, expected: u64) -> bool {
        matches!(self, Slot::Creating { ticket, .. } if *ticket == expected)
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PoolEntrySummary {
    pub data_source_id: String,
    pub credential: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool: &'static str,
    pub capacity: usize,
    pub cached: usize,
    pub in_flight: usize,
    pub closed: bool,
    pub entries: Vec<PoolEntrySummary>,
}

// ============================================================================
// Client Pool
// ============================================================================

struct PoolInner<C> {
    name: &'static str,
    capacity: usize,
    slots: DashMap<PoolKey, Slot<C>>,
    /// Every client handed out, cached or not, so shutdown can close them all.
    /// The lock also serializes installs, evictions, invalidations and shutdown.
    issued: Mutex<Vec<Weak<PooledClient<C>>>>,
    clock: AtomicU64,
    tickets: AtomicU64,
    closed: AtomicBool,
    metrics: Option<DataSourceMetrics>,
    audit: Arc<dyn AuditSink>,
}

/// Bounded, single-flight client cache
pub struct ClientPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ClientPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PoolClient> ClientPool<C> {
    /// Create a pool holding at most `capacity` resolved clients
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self::with_observers(name, capacity, None, Arc::new(TracingAuditSink))
    }

    pub fn with_observers(
        name: &'static str,
        capacity: usize,
        metrics: Option<DataSourceMetrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                capacity: capacity.max(1),
                slots: DashMap::new(),
                issued: Mutex::new(Vec::new()),
                clock: AtomicU64::new(0),
                tickets: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                metrics,
                audit,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Return the cached client for `key`, or build it with `create`
    ///
    /// `create` runs at most once per key at a time, however many callers
    /// ask concurrently. A cached entry whose `fingerprint` differs from the
    /// requested one is rebuilt. Failures are not cached.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: PoolKey,
        fingerprint: &str,
        create: F,
    ) -> Result<ClientHandle<C>, DataSourceError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<C, DataSourceError>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }

        let tick = self.inner.tick();
        let creation = match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let found = match occupied.get() {
                    Slot::Ready(entry) if entry.fingerprint == fingerprint => {
                        entry.touch(tick);
                        Some(Ok(ClientHandle {
                            entry: Arc::clone(entry),
                        }))
                    }
                    Slot::Creating {
                        fingerprint: pending,
                        creation,
                        ..
                    } if pending == fingerprint => Some(Err(creation.clone())),
                    _ => None,
                };
                match found {
                    Some(Ok(handle)) => {
                        drop(occupied);
                        self.inner.record(PoolEvent::Hit);
                        return Ok(handle);
                    }
                    Some(Err(pending)) => pending,
                    None => {
                        tracing::debug!(
                            pool = self.inner.name,
                            key = %key,
                            "Configuration changed, rebuilding pooled client"
                        );
                        let (slot, creation) = self.start_creation(key.clone(), fingerprint, create);
                        occupied.insert(slot);
                        drop(occupied);
                        self.inner.record(PoolEvent::Miss);
                        creation
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let (slot, creation) = self.start_creation(key.clone(), fingerprint, create);
                vacant.insert(slot);
                self.inner.record(PoolEvent::Miss);
                creation
            }
        };

        let result = creation.await;
        if self.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }
        if let Ok(handle) = &result {
            handle.entry.touch(self.inner.tick());
        }
        result
    }

    /// Return the cached client for `key` without creating one
    pub fn get(&self, key: &PoolKey) -> Result<Option<ClientHandle<C>>, DataSourceError> {
        if self.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }
        let tick = self.inner.tick();
        let handle = self.inner.slots.get(key).and_then(|slot| match slot.value() {
            Slot::Ready(entry) => {
                entry.touch(tick);
                Some(ClientHandle {
                    entry: Arc::clone(entry),
                })
            }
            Slot::Creating { .. } => None,
        });
        Ok(handle)
    }

    /// Drop the pool's reference to `key`, resolved or in flight
    ///
    /// Callers already holding a handle keep using it. An in-flight creation
    /// still completes for its waiters but is not cached.
    pub fn invalidate(&self, key: &PoolKey) -> bool {
        let guard = self.inner.lock_structure();
        let removed = self.inner.slots.remove(key).is_some();
        drop(guard);

        if removed {
            self.inner.record(PoolEvent::Invalidated);
            self.inner.audit.record(
                AuditEvent::new(AuditEventKind::ClientInvalidated)
                    .data_source(key.data_source_id.clone())
                    .pool(self.inner.name)
                    .credential(&key.credential),
            );
            self.inner.publish_size();
        }
        removed
    }

    /// Invalidate every entry of one data source, whatever its credential
    pub fn invalidate_data_source(&self, data_source_id: &str) -> usize {
        let keys: Vec<PoolKey> = self
            .inner
            .slots
            .iter()
            .filter(|slot| slot.key().data_source_id == data_source_id)
            .map(|slot| slot.key().clone())
            .collect();

        keys.iter().filter(|key| self.invalidate(key)).count()
    }

    /// Close every cached client and refuse all further requests
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut guard = self.inner.lock_structure();
        self.inner.slots.clear();
        let issued = std::mem::take(&mut *guard);
        drop(guard);

        // Evicted, invalidated and superseded clients may still be held by callers
        let mut closed = 0usize;
        for entry in issued.iter().filter_map(Weak::upgrade) {
            entry.client.close();
            closed += 1;
        }

        tracing::info!(pool = self.inner.name, closed, "Client pool shut down");
        self.inner.audit.record(
            AuditEvent::new(AuditEventKind::PoolShutdown)
                .pool(self.inner.name)
                .detail(format!("closed {} clients", closed)),
        );
        self.inner.publish_size();
    }

    /// Number of resolved clients currently cached
    pub fn len(&self) -> usize {
        self.inner.ready_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of creations in progress
    pub fn in_flight(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Creating { .. }))
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        let mut entries: Vec<PoolEntrySummary> = self
            .inner
            .slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(entry) => Some(PoolEntrySummary {
                    data_source_id: entry.key.data_source_id.clone(),
                    credential: entry.key.credential.short().to_string(),
                    created_at: entry.created_at,
                }),
                Slot::Creating { .. } => None,
            })
            .collect();
        entries.sort_by(|a, b| a.data_source_id.cmp(&b.data_source_id));

        PoolStats {
            pool: self.inner.name,
            capacity: self.inner.capacity,
            cached: entries.len(),
            in_flight: self.in_flight(),
            closed: self.is_closed(),
            entries,
        }
    }

    fn start_creation<F, Fut>(&self, key: PoolKey, fingerprint: &str, create: F) -> (Slot<C>, Creation<C>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<C, DataSourceError>> + Send + 'static,
    {
        let ticket = self.inner.tickets.fetch_add(1, Ordering::Relaxed);
        let fingerprint = fingerprint.to_string();

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task_fingerprint = fingerprint.clone();
        let task = tokio::spawn(async move {
            let outcome = create().await;
            inner.complete(task_key, ticket, task_fingerprint, outcome)
        });

        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        let creation = async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.abandon(&key, ticket);
                    }
                    Err(DataSourceError::CreationAborted(join_err.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        let slot = Slot::Creating {
            ticket,
            fingerprint,
            creation: creation.clone(),
        };
        (slot, creation)
    }
}

impl<C: PoolClient> PoolInner<C> {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock_structure(&self) -> std::sync::MutexGuard<'_, Vec<Weak<PooledClient<C>>>> {
        self.issued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: PoolEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.pool_event(self.name, event);
        }
    }

    fn publish_size(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_pool_size(self.name, self.ready_count());
        }
    }

    fn ready_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .count()
    }

    /// Install the outcome of a creation started under `ticket`
    fn complete(
        &self,
        key: PoolKey,
        ticket: u64,
        fingerprint: String,
        outcome: Result<C, DataSourceError>,
    ) -> Result<ClientHandle<C>, DataSourceError> {
        let client = match outcome {
            Ok(client) => client,
            Err(err) => {
                self.abandon(&key, ticket);
                self.record(PoolEvent::CreationFailed);
                tracing::warn!(pool = self.name, key = %key, error = %err, "Client creation failed");
                self.audit.record(
                    AuditEvent::new(AuditEventKind::ClientCreationFailed)
                        .data_source(key.data_source_id.clone())
                        .pool(self.name)
                        .credential(&key.credential)
                        .detail(err.to_string()),
                );
                return Err(err);
            }
        };

        let entry = Arc::new(PooledClient {
            client,
            key: key.clone(),
            fingerprint,
            created_at: Utc::now(),
            last_access: AtomicU64::new(self.tick()),
        });

        let mut guard = self.lock_structure();
        if self.closed.load(Ordering::Acquire) {
            self.slots.remove_if(&key, |_, slot| slot.is_ticket(ticket));
            drop(guard);
            entry.client.close();
            return Err(DataSourceError::PoolClosed);
        }
        guard.retain(|issued| issued.strong_count() > 0);
        guard.push(Arc::downgrade(&entry));

        let current = self
            .slots
            .get(&key)
            .map(|slot| slot.is_ticket(ticket))
            .unwrap_or(false);
        if !current {
            // Invalidated or superseded while in flight; serve the waiters only.
            drop(guard);
            tracing::debug!(pool = self.name, key = %key, "Created client was superseded, not caching");
            return Ok(ClientHandle { entry });
        }

        let evicted = self.evict_for_insert(&key);
        if let Some(mut slot) = self.slots.get_mut(&key) {
            *slot = Slot::Ready(Arc::clone(&entry));
        }
        drop(guard);

        self.record(PoolEvent::Created);
        tracing::debug!(pool = self.name, key = %key, "Pooled new client");
        self.audit.record(
            AuditEvent::new(AuditEventKind::ClientCreated)
                .data_source(key.data_source_id.clone())
                .pool(self.name)
                .credential(&key.credential),
        );
        for victim in evicted {
            self.record(PoolEvent::Evicted);
            tracing::debug!(pool = self.name, key = %victim.key, "Evicted least recently used client");
            self.audit.record(
                AuditEvent::new(AuditEventKind::ClientEvicted)
                    .data_source(victim.key.data_source_id.clone())
                    .pool(self.name)
                    .credential(&victim.key.credential),
            );
        }
        self.publish_size();

        Ok(ClientHandle { entry })
    }

    /// Make room for one more resolved entry; caller holds the structure lock
    ///
    /// Only resolved entries are candidates. In-flight markers are never
    /// evicted.
    fn evict_for_insert(&self, incoming: &PoolKey) -> Vec<Arc<PooledClient<C>>> {
        let mut candidates: Vec<(u64, Arc<PooledClient<C>>)> = self
            .slots
            .iter()
            .filter(|slot| slot.key() != incoming)
            .filter_map(|slot| match slot.value() {
                Slot::Ready(entry) => Some((entry.last_access.load(Ordering::Relaxed), Arc::clone(entry))),
                Slot::Creating { .. } => None,
            })
            .collect();

        if candidates.len() < self.capacity {
            return Vec::new();
        }

        candidates.sort_by_key(|(last_access, _)| *last_access);
        let overflow = candidates.len() + 1 - self.capacity;

        let mut evicted = Vec::with_capacity(overflow);
        for (_, victim) in candidates.into_iter().take(overflow) {
            let removed = self.slots.remove_if(&victim.key, |_, slot| {
                matches!(slot, Slot::Ready(entry) if Arc::ptr_eq(entry, &victim))
            });
            if removed.is_some() {
                evicted.push(victim);
            }
        }
        evicted
    }

    /// Remove the marker left by a failed or aborted creation
    fn abandon(&self, key: &PoolKey, ticket: u64) {
        let _guard = self.lock_structure();
        self.slots.remove_if(key, |_, slot| slot.is_ticket(ticket));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::audit::RecordingAuditSink;
    use super::super::credential::{CredentialMaterial, CredentialOverride, CredentialResolver};
    use super::super::crypto::PlaintextDecryptor;
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    #[derive(Debug)]
    struct TestClient {
        id: usize,
        closed: AtomicBool,
    }

    impl PoolClient for TestClient {
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    // Digests are salted per resolver, so every key in this module comes from one
    fn resolver() -> &'static CredentialResolver {
        static RESOLVER: OnceLock<CredentialResolver> = OnceLock::new();
        RESOLVER.get_or_init(|| CredentialResolver::new(Arc::new(PlaintextDecryptor)))
    }

    fn credential(tag: &str) -> EffectiveCredential {
        resolver().effective_credential(
            &CredentialMaterial::None,
            &CredentialOverride::default().with_tenant(tag),
        )
    }

    fn key(id: &str) -> PoolKey {
        PoolKey::new(id, credential("default"))
    }

    fn factory(
        counter: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<TestClient, DataSourceError>> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            async move {
                let id = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(TestClient {
                    id,
                    closed: AtomicBool::new(false),
                })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_creation() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let pool = pool.clone();
            let create = factory(&created, Duration::from_millis(50));
            tasks.push(tokio::spawn(async move {
                pool.get_or_create(key("ds1"), "fp", create).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| h.same_entry(&handles[0])));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cached_entry_is_reused() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let first = pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        let second = pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        assert!(first.same_entry(&second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(pool.get(&key("ds1")).unwrap().is_some());
        assert!(pool.get(&key("ds2")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_distinct_credentials_get_distinct_clients() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let a = pool
            .get_or_create(PoolKey::new("ds1", credential("a")), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        let b = pool
            .get_or_create(PoolKey::new("ds1", credential("b")), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        assert!(!a.same_entry(&b));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let audit = Arc::new(RecordingAuditSink::default());
        let pool: ClientPool<TestClient> =
            ClientPool::with_observers("typed", 2, None, audit.clone());
        let created = Arc::new(AtomicUsize::new(0));

        for id in ["ds1", "ds2", "ds3"] {
            pool.get_or_create(key(id), "fp", factory(&created, Duration::ZERO))
                .await
                .unwrap();
        }

        assert_eq!(pool.len(), 2);
        assert!(pool.get(&key("ds1")).unwrap().is_none());
        assert!(pool.get(&key("ds2")).unwrap().is_some());
        assert!(pool.get(&key("ds3")).unwrap().is_some());
        assert_eq!(audit.count(AuditEventKind::ClientEvicted), 1);

        pool.get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_access_refreshes_recency() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 2);
        let created = Arc::new(AtomicUsize::new(0));

        pool.get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        pool.get_or_create(key("ds2"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        // ds1 becomes the most recently used
        pool.get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        pool.get_or_create(key("ds3"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        assert!(pool.get(&key("ds1")).unwrap().is_some());
        assert!(pool.get(&key("ds2")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_flight_creation_is_not_evicted() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 1);
        let created = Arc::new(AtomicUsize::new(0));

        let slow_pool = pool.clone();
        let slow_create = factory(&created, Duration::from_millis(100));
        let slow = tokio::spawn(async move {
            slow_pool.get_or_create(key("slow"), "fp", slow_create).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.get_or_create(key("fast"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(pool.in_flight(), 1);

        let slow = slow.await.unwrap().unwrap();
        assert!(pool.get(&key("slow")).unwrap().is_some_and(|h| h.same_entry(&slow)));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_and_is_not_cached() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            let attempts = Arc::clone(&attempts);
            tasks.push(tokio::spawn(async move {
                pool.get_or_create(key("ds1"), "fp", move || async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err::<TestClient, _>(DataSourceError::Transport {
                        kind: super::super::error::TransportFailure::Connect,
                        message: "refused".to_string(),
                    })
                })
                .await
            }));
        }

        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(DataSourceError::Transport { .. })
            ));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.in_flight(), 0);

        let created = Arc::new(AtomicUsize::new(0));
        assert!(pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .is_ok());
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_cancel_creation() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let first_pool = pool.clone();
        let first_create = factory(&created, Duration::from_millis(80));
        let first = tokio::spawn(async move {
            first_pool.get_or_create(key("ds1"), "fp", first_create).await
        });

        let waiter_pool = pool.clone();
        let waiter_create = factory(&created, Duration::from_millis(80));
        let waiter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waiter_pool.get_or_create(key("ds1"), "fp", waiter_create).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(handle.id, 0);
        assert!(pool.get(&key("ds1")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fingerprint_change_rebuilds() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let old = pool
            .get_or_create(key("ds1"), "v1", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        let new = pool
            .get_or_create(key("ds1"), "v2", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        assert!(!old.same_entry(&new));
        assert_eq!(pool.len(), 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recreation() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let old = pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        pool.get_or_create(PoolKey::new("ds1", credential("other")), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        assert!(pool.invalidate(&key("ds1")));
        assert!(!pool.invalidate(&key("ds1")));
        assert!(!old.closed.load(Ordering::SeqCst));

        assert_eq!(pool.invalidate_data_source("ds1"), 1);
        assert!(pool.is_empty());

        let fresh = pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        assert!(!fresh.same_entry(&old));
    }

    #[tokio::test]
    async fn test_invalidate_during_creation_does_not_cache() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let creating_pool = pool.clone();
        let create = factory(&created, Duration::from_millis(50));
        let pending = tokio::spawn(async move {
            creating_pool.get_or_create(key("ds1"), "fp", create).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pool.invalidate(&key("ds1")));

        assert!(pending.await.unwrap().is_ok());
        assert!(pool.get(&key("ds1")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients_and_rejects_requests() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let handle = pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        pool.shutdown();
        assert!(pool.is_closed());
        assert!(handle.closed.load(Ordering::SeqCst));
        assert!(matches!(
            pool.get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
                .await,
            Err(DataSourceError::PoolClosed)
        ));
        assert!(matches!(pool.get(&key("ds1")), Err(DataSourceError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handles_no_longer_cached() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 1);
        let created = Arc::new(AtomicUsize::new(0));

        let evicted = pool
            .get_or_create(key("ds1"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        let invalidated = pool
            .get_or_create(key("ds2"), "fp", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        assert!(pool.get(&key("ds1")).unwrap().is_none());
        assert!(pool.invalidate(&key("ds2")));

        let superseded = pool
            .get_or_create(key("ds3"), "v1", factory(&created, Duration::ZERO))
            .await
            .unwrap();
        let current = pool
            .get_or_create(key("ds3"), "v2", factory(&created, Duration::ZERO))
            .await
            .unwrap();

        assert!(!evicted.closed.load(Ordering::SeqCst));
        assert!(!invalidated.closed.load(Ordering::SeqCst));
        assert!(!superseded.closed.load(Ordering::SeqCst));

        pool.shutdown();

        for handle in [&evicted, &invalidated, &superseded, &current] {
            assert!(handle.closed.load(Ordering::SeqCst), "client {} left open", handle.id);
        }
    }

    #[tokio::test]
    async fn test_creation_finishing_after_shutdown_is_closed() {
        let pool: ClientPool<TestClient> = ClientPool::new("typed", 10);
        let created = Arc::new(AtomicUsize::new(0));

        let creating_pool = pool.clone();
        let create = factory(&created, Duration::from_millis(50));
        let pending = tokio::spawn(async move {
            creating_pool.get_or_create(key("ds1"), "fp", create).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.shutdown();

        assert!(matches!(
            pending.await.unwrap(),
            Err(DataSourceError::PoolClosed)
        ));
        assert_eq!(pool.stats().cached, 0);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_pool_config_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::new(0).validate().is_err());
        assert!(PoolConfig::default()
            .with_default_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
