//! Resource query cache.
//!
//! Reads are keyed by [`QueryKey`]. Concurrent reads of the same key share one
//! request, fresh data is served without a request, and successful mutations
//! invalidate every key of the entity kinds they touch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

pub type CachedValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue>>>;

/// Polling cadences used by live views.
pub const CHAT_SESSIONS_POLL: Duration = Duration::from_secs(5);
pub const CHAT_MESSAGES_POLL: Duration = Duration::from_secs(3);
pub const TELEGRAM_STATUS_POLL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Leads,
    Users,
    ChatSessions,
    ChatMessages,
    TelegramStatus,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Leads => "leads",
            EntityKind::Users => "users",
            EntityKind::ChatSessions => "chat-sessions",
            EntityKind::ChatMessages => "chat-messages",
            EntityKind::TelegramStatus => "telegram-status",
        }
    }
}

/// Entity kind, a scope such as `list` or `detail`, and sorted parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    kind: EntityKind,
    scope: &'static str,
    params: Vec<(String, String)>,
}

impl QueryKey {
    pub fn new(kind: EntityKind, scope: &'static str) -> Self {
        Self {
            kind,
            scope,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self.params.sort();
        self
    }

    pub fn params<'a>(mut self, params: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        self.params
            .extend(params.into_iter().map(|(name, value)| (name.to_string(), value)));
        self.params.sort();
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.scope)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    pub data: Option<Arc<T>>,
    pub status: QueryStatus,
    pub error: Option<ClientError>,
    pub updated_at: Option<Instant>,
    pub is_stale: bool,
    pub is_fetching: bool,
}

/// Result of a detail read.
#[derive(Debug)]
pub enum Fetched<T> {
    /// No identifier was given, so nothing was requested.
    Disabled,
    NotFound,
    Found(Arc<T>),
}

impl<T> Clone for Fetched<T> {
    fn clone(&self) -> Self {
        match self {
            Fetched::Disabled => Fetched::Disabled,
            Fetched::NotFound => Fetched::NotFound,
            Fetched::Found(value) => Fetched::Found(Arc::clone(value)),
        }
    }
}

impl<T> Fetched<T> {
    pub fn found(&self) -> Option<&Arc<T>> {
        match self {
            Fetched::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_found(self) -> Option<Arc<T>> {
        match self {
            Fetched::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Fetched::NotFound)
    }

    pub(crate) fn from_result(result: Result<Arc<T>>) -> Result<Self> {
        match result {
            Ok(value) => Ok(Fetched::Found(value)),
            Err(ClientError::NotFound { .. }) => Ok(Fetched::NotFound),
            Err(err) => Err(err),
        }
    }
}

struct Entry {
    data: Option<CachedValue>,
    status: QueryStatus,
    error: Option<ClientError>,
    updated_at: Option<Instant>,
    invalidated: bool,
    in_flight: Option<InFlight>,
    observers: usize,
    last_used: Instant,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            error: None,
            updated_at: None,
            invalidated: false,
            in_flight: None,
            observers: 0,
            last_used: now,
        }
    }

    fn is_stale(&self, now: Instant, stale_time: Duration) -> bool {
        match (self.data.as_ref(), self.updated_at) {
            (Some(_), Some(updated_at)) => {
                self.invalidated || now.duration_since(updated_at) >= stale_time
            }
            _ => true,
        }
    }

    /// No view observes the entry and no caller is awaiting its read.
    fn collectable(&self) -> bool {
        self.observers == 0 && self.in_flight.as_ref().is_none_or(|read| read.waiters == 0)
    }

    fn evict(self) {
        if let Some(read) = self.in_flight {
            read.task.abort();
        }
    }
}

/// A read running in its own task. It settles the entry itself, so it lands
/// in the cache even if every caller stops waiting.
struct InFlight {
    id: u64,
    pending: SharedFetch,
    task: AbortHandle,
    waiters: usize,
}

struct CacheInner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    fetch_seq: AtomicU64,
    stale_time: Duration,
    gc_time: Duration,
    max_entries: usize,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("stale_time", &self.inner.stale_time)
            .field("gc_time", &self.inner.gc_time)
            .finish()
    }
}

impl QueryCache {
    pub fn new(stale_time: Duration, gc_time: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                fetch_seq: AtomicU64::new(0),
                stale_time,
                gc_time,
                max_entries: max_entries.max(1),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.stale_time, config.gc_time, config.max_cache_entries)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached data if fresh, otherwise the result of `fetcher` (shared with any
    /// identical read already in flight).
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.load(key, fetcher, false).await
    }

    /// Like [`fetch`](Self::fetch) but ignores freshness.
    pub async fn refetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.load(key, fetcher, true).await
    }

    async fn load<T, F, Fut>(&self, key: QueryKey, fetcher: F, force: bool) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (fetch_id, pending) = {
            let now = Instant::now();
            let mut entries = self.inner.entries.lock();
            self.collect_locked(&mut entries, now, Some(&key));
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(now));
            entry.last_used = now;

            if !force
                && !entry.is_stale(now, self.inner.stale_time)
                && let Some(data) = entry.data.clone()
            {
                return downcast(&key, data);
            }

            match entry.in_flight.as_mut() {
                Some(read) => {
                    tracing::debug!(key = %key, "joining in-flight read");
                    read.waiters += 1;
                    (read.id, read.pending.clone())
                }
                None => {
                    let id = self.inner.fetch_seq.fetch_add(1, Ordering::Relaxed);
                    let read = fetcher();
                    let cache = self.clone();
                    let task_key = key.clone();
                    let handle = tokio::spawn(async move {
                        let result = read.await.map(|value| Arc::new(value) as CachedValue);
                        cache.settle(&task_key, id, &result);
                        result
                    });
                    let task = handle.abort_handle();
                    let pending = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(err) => {
                                Err(ClientError::Transport(format!("read task ended: {err}")))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    entry.in_flight = Some(InFlight {
                        id,
                        pending: pending.clone(),
                        task,
                        waiters: 1,
                    });
                    if entry.data.is_none() {
                        entry.status = QueryStatus::Loading;
                    }
                    tracing::debug!(key = %key, force, "starting read");
                    (id, pending)
                }
            }
        };

        let _waiting = Waiting {
            cache: self,
            key: &key,
            fetch_id,
        };
        let result = pending.await;
        result.and_then(|value| downcast(&key, value))
    }

    fn stop_waiting(&self, key: &QueryKey, fetch_id: u64) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key)
            && let Some(read) = entry.in_flight.as_mut()
            && read.id == fetch_id
        {
            read.waiters = read.waiters.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }

    /// Record the outcome of read `fetch_id`. Reads that were superseded by an
    /// invalidation are ignored so they never mark the entry fresh.
    fn settle(&self, key: &QueryKey, fetch_id: u64, result: &Result<CachedValue>) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !entry.in_flight.as_ref().is_some_and(|read| read.id == fetch_id) {
            return;
        }
        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.data = Some(Arc::clone(value));
                entry.status = QueryStatus::Success;
                entry.error = None;
                entry.updated_at = Some(Instant::now());
                entry.invalidated = false;
            }
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "read failed; keeping previous data");
                entry.status = QueryStatus::Error;
                entry.error = Some(err.clone());
            }
        }
    }

    /// Mark every entry of `kind` stale and detach any read in flight.
    pub fn invalidate_kind(&self, kind: EntityKind) -> usize {
        let mut entries = self.inner.entries.lock();
        let mut count = 0;
        for (_, entry) in entries.iter_mut().filter(|(key, _)| key.kind == kind) {
            invalidate_entry(entry);
            count += 1;
        }
        tracing::debug!(kind = kind.as_str(), count, "invalidated queries");
        count
    }

    pub fn invalidate_key(&self, key: &QueryKey) -> bool {
        let mut entries = self.inner.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                invalidate_entry(entry);
                true
            }
            None => false,
        }
    }

    /// Drop every entry. Used on sign-out.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    pub fn status(&self, key: &QueryKey) -> QueryStatus {
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    pub fn snapshot<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QuerySnapshot<T>> {
        let entries = self.inner.entries.lock();
        let entry = entries.get(key)?;
        let data = match entry.data.clone() {
            Some(value) => Some(downcast::<T>(key, value).ok()?),
            None => None,
        };
        Some(QuerySnapshot {
            data,
            status: entry.status,
            error: entry.error.clone(),
            updated_at: entry.updated_at,
            is_stale: entry.is_stale(Instant::now(), self.inner.stale_time),
            is_fetching: entry.in_flight.is_some(),
        })
    }

    /// Register interest in `key`; the entry is not collected while the
    /// returned guard is alive.
    pub fn observe(&self, key: &QueryKey) -> QueryObserver {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(now));
        entry.observers += 1;
        entry.last_used = now;
        QueryObserver {
            cache: self.clone(),
            key: key.clone(),
        }
    }

    fn release(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }

    /// Run a write and, if it succeeds, invalidate `kinds`.
    pub async fn mutate<T, Fut>(&self, kinds: &[EntityKind], write: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let result = write.await;
        if result.is_ok() {
            for kind in kinds {
                self.invalidate_kind(*kind);
            }
        }
        result
    }

    /// Evict idle entries and enforce the entry bound. Returns how many were dropped.
    pub fn collect_garbage(&self) -> usize {
        let mut entries = self.inner.entries.lock();
        self.collect_locked(&mut entries, Instant::now(), None)
    }

    fn collect_locked(
        &self,
        entries: &mut HashMap<QueryKey, Entry>,
        now: Instant,
        keep: Option<&QueryKey>,
    ) -> usize {
        let before = entries.len();
        let gc_time = self.inner.gc_time;
        let idle: Vec<QueryKey> = entries
            .iter()
            .filter(|(key, entry)| {
                Some(*key) != keep
                    && entry.collectable()
                    && now.duration_since(entry.last_used) >= gc_time
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in idle {
            if let Some(entry) = entries.remove(&key) {
                entry.evict();
            }
        }

        while entries.len() > self.inner.max_entries {
            let oldest = entries
                .iter()
                .filter(|(key, entry)| Some(*key) != keep && entry.collectable())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    if let Some(entry) = entries.remove(&key) {
                        entry.evict();
                    }
                }
                None => break,
            }
        }

        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "collected idle queries");
        }
        evicted
    }
}

fn invalidate_entry(entry: &mut Entry) {
    entry.invalidated = true;
    if entry.in_flight.take().is_some() && entry.status == QueryStatus::Loading {
        entry.status = QueryStatus::Idle;
    }
}

/// Counts a caller awaiting a read; released even when the caller is cancelled.
struct Waiting<'a> {
    cache: &'a QueryCache,
    key: &'a QueryKey,
    fetch_id: u64,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.cache.stop_waiting(self.key, self.fetch_id);
    }
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, value: CachedValue) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| {
        ClientError::Decode(format!("cached value for {key} has an unexpected type"))
    })
}

/// Keeps a cache entry alive while a view displays it.
pub struct QueryObserver {
    cache: QueryCache,
    key: QueryKey,
}

impl QueryObserver {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error(String),
}

/// Observable status of one write, for disabling buttons and showing errors.
#[derive(Debug, Clone)]
pub struct Mutation {
    status: Arc<watch::Sender<MutationStatus>>,
}

impl Default for Mutation {
    fn default() -> Self {
        let (status, _) = watch::channel(MutationStatus::Idle);
        Self {
            status: Arc::new(status),
        }
    }
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> MutationStatus {
        self.status.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        *self.status.borrow() == MutationStatus::Pending
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationStatus> {
        self.status.subscribe()
    }

    pub fn reset(&self) {
        self.status.send_replace(MutationStatus::Idle);
    }

    pub async fn run<T, Fut>(&self, write: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.status.send_replace(MutationStatus::Pending);
        let result = write.await;
        self.status.send_replace(match &result {
            Ok(_) => MutationStatus::Success,
            Err(err) => MutationStatus::Error(err.user_message()),
        });
        result
    }
}

/// Background refetch of one key on a fixed interval. Stops when dropped.
pub struct Poller {
    key: QueryKey,
    handle: JoinHandle<()>,
}

impl Poller {
    /// The first read happens immediately.
    pub fn spawn<T, F, Fut>(cache: QueryCache, key: QueryKey, every: Duration, fetcher: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        tracing::debug!(key = %key, interval_ms = every.as_millis() as u64, "polling started");
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _observer = cache.observe(&task_key);
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = cache.refetch(task_key.clone(), &fetcher).await {
                    tracing::debug!(key = %task_key, error = %err, "poll failed");
                }
            }
        });
        Self { key, handle }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
        tracing::debug!(key = %self.key, "polling stopped");
    }
}

/// Lifetime of a view. Results that arrive after [`unmount`](Self::unmount)
/// are discarded instead of applied.
#[derive(Debug, Clone, Default)]
pub struct ViewScope {
    token: CancellationToken,
}

impl ViewScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unmount(&self) {
        self.token.cancel();
    }

    pub fn is_mounted(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Resolves once the view unmounts.
    pub async fn unmounted(&self) {
        self.token.cancelled().await;
    }

    /// Drives `work` to completion, so reads still land in the cache, but
    /// returns `None` if the view unmounted in the meantime.
    pub async fn run<F: Future>(&self, work: F) -> Option<F::Output> {
        let output = work.await;
        self.is_mounted().then_some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> QueryCache {
        QueryCache::new(Duration::from_secs(30), Duration::from_secs(300), 64)
    }

    fn counting(counter: &Arc<AtomicUsize>, value: u32) -> impl Future<Output = Result<u32>> + Send + 'static + use<> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    fn leads_key() -> QueryKey {
        QueryKey::new(EntityKind::Leads, "list").param("page", 1)
    }

    #[test]
    fn key_params_are_order_independent() {
        let a = QueryKey::new(EntityKind::Leads, "list")
            .param("page", 1)
            .param("country", "PT");
        let b = QueryKey::new(EntityKind::Leads, "list")
            .params([("country", "PT".to_string()), ("page", "1".to_string())]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "leads/list?country=PT&page=1");
    }

    #[tokio::test]
    async fn fresh_data_is_served_without_refetch() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let first = cache
            .fetch(leads_key(), || counting(&calls, 1))
            .await
            .expect("first");
        let second = cache
            .fetch(leads_key(), || counting(&calls, 2))
            .await
            .expect("second");
        assert_eq!((*first, *second), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let forced = cache
            .refetch(leads_key(), || counting(&calls, 3))
            .await
            .expect("forced");
        assert_eq!(*forced, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn identical_concurrent_reads_share_one_request() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let gated = {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                rx.await.map_err(|_| ClientError::Transport("gate dropped".into()))
            }
        };

        let first = cache.fetch(leads_key(), gated);
        let second = cache.fetch(leads_key(), || counting(&calls, 99));
        let release = async {
            tokio::task::yield_now().await;
            let _ = tx.send(7);
        };
        let (first, second, ()) = tokio::join!(first, second, release);
        assert_eq!(*first.expect("first"), 7);
        assert_eq!(*second.expect("second"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_is_scoped_to_kind() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let users = QueryKey::new(EntityKind::Users, "list");
        cache.fetch(leads_key(), || counting(&calls, 1)).await.expect("leads");
        cache.fetch(users.clone(), || counting(&calls, 1)).await.expect("users");

        assert_eq!(cache.invalidate_kind(EntityKind::Leads), 1);
        let leads = cache.snapshot::<u32>(&leads_key()).expect("leads entry");
        assert!(leads.is_stale);
        assert_eq!(leads.data.as_deref(), Some(&1));
        assert!(!cache.snapshot::<u32>(&users).expect("users entry").is_stale);

        cache.fetch(leads_key(), || counting(&calls, 2)).await.expect("refetch");
        cache.fetch(users, || counting(&calls, 2)).await.expect("cached");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn read_started_before_invalidation_does_not_mark_fresh() {
        let cache = cache();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let mut read = Box::pin(cache.fetch(leads_key(), move || async move {
            rx.await.map_err(|_| ClientError::Transport("gate dropped".into()))
        }));
        assert!(futures::poll!(&mut read).is_pending());

        cache.invalidate_kind(EntityKind::Leads);
        tx.send(1).expect("send");
        assert_eq!(*read.await.expect("read"), 1);

        let snapshot = cache.snapshot::<u32>(&leads_key()).expect("entry");
        assert!(snapshot.is_stale);
        assert!(snapshot.data.is_none());
    }

    #[tokio::test]
    async fn failed_refetch_keeps_previous_data() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.fetch(leads_key(), || counting(&calls, 5)).await.expect("seed");

        let err = cache
            .refetch::<u32, _, _>(leads_key(), || async {
                Err(ClientError::Api {
                    status: 500,
                    message: "boom".into(),
                })
            })
            .await
            .expect_err("fails");
        assert_eq!(err.status(), Some(500));

        let snapshot = cache.snapshot::<u32>(&leads_key()).expect("entry");
        assert_eq!(snapshot.status, QueryStatus::Error);
        assert_eq!(snapshot.data.as_deref(), Some(&5));
        assert_eq!(snapshot.error, Some(err));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_collected_but_observed_ones_survive() {
        let cache = QueryCache::new(Duration::from_secs(1), Duration::from_secs(10), 64);
        let calls = Arc::new(AtomicUsize::new(0));
        let watched = QueryKey::new(EntityKind::TelegramStatus, "status");
        cache.fetch(leads_key(), || counting(&calls, 1)).await.expect("leads");
        cache.fetch(watched.clone(), || counting(&calls, 1)).await.expect("status");
        let observer = cache.observe(&watched);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert_eq!(cache.status(&leads_key()), QueryStatus::Idle);
        assert_eq!(cache.status(&watched), QueryStatus::Success);

        drop(observer);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_bound_evicts_least_recently_used() {
        let cache = QueryCache::new(Duration::from_secs(30), Duration::from_secs(300), 2);
        let calls = Arc::new(AtomicUsize::new(0));
        for page in 1..=3 {
            let key = QueryKey::new(EntityKind::Leads, "list").param("page", page);
            cache.fetch(key, || counting(&calls, page)).await.expect("page");
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        cache.collect_garbage();
        assert_eq!(cache.len(), 2);
        let first = QueryKey::new(EntityKind::Leads, "list").param("page", 1);
        assert!(cache.snapshot::<u32>(&first).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_read_does_not_pin_its_entry() {
        let cache = QueryCache::new(Duration::from_secs(1), Duration::from_secs(300), 64);
        let key = QueryKey::new(EntityKind::ChatSessions, "list");
        let poller = Poller::spawn(cache.clone(), key.clone(), CHAT_SESSIONS_POLL, || {
            futures::future::pending::<Result<u32>>()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.snapshot::<u32>(&key).expect("entry").is_fetching);

        drop(poller);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn read_settles_after_its_caller_gives_up() {
        let cache = cache();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let read = cache.fetch(leads_key(), move || async move {
            rx.await.map_err(|_| ClientError::Transport("gate dropped".into()))
        });
        let gave_up = tokio::time::timeout(Duration::from_millis(10), read).await;
        assert!(gave_up.is_err());

        tx.send(4).expect("read still running");
        for _ in 0..20 {
            if cache.status(&leads_key()) == QueryStatus::Success {
                break;
            }
            tokio::task::yield_now().await;
        }
        let snapshot = cache.snapshot::<u32>(&leads_key()).expect("entry");
        assert_eq!(snapshot.data.as_deref(), Some(&4));
        assert!(!snapshot.is_fetching);
    }

    #[tokio::test]
    async fn mutate_invalidates_only_on_success() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.fetch(leads_key(), || counting(&calls, 1)).await.expect("seed");

        let failed: Result<()> = cache
            .mutate(&[EntityKind::Leads], async {
                Err(ClientError::Forbidden {
                    message: "Manager access required".into(),
                })
            })
            .await;
        assert!(failed.is_err());
        assert!(!cache.snapshot::<u32>(&leads_key()).expect("entry").is_stale);

        cache
            .mutate(&[EntityKind::Leads], async { Ok(()) })
            .await
            .expect("write");
        assert!(cache.snapshot::<u32>(&leads_key()).expect("entry").is_stale);
    }

    #[tokio::test]
    async fn mutation_tracks_status() {
        let mutation = Mutation::new();
        assert_eq!(mutation.status(), MutationStatus::Idle);
        let err = mutation
            .run(async {
                Err::<(), _>(ClientError::Api {
                    status: 409,
                    message: "Email already exists".into(),
                })
            })
            .await
            .expect_err("conflict");
        assert_eq!(err.status(), Some(409));
        assert_eq!(
            mutation.status(),
            MutationStatus::Error("Email already exists".to_string())
        );
        mutation.run(async { Ok(()) }).await.expect("ok");
        assert_eq!(mutation.status(), MutationStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_refetches_until_dropped() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new(EntityKind::ChatMessages, "list").param("session_id", 3);
        let poller = {
            let calls = Arc::clone(&calls);
            Poller::spawn(cache.clone(), key.clone(), CHAT_MESSAGES_POLL, move || {
                counting(&calls, 1)
            })
        };

        tokio::time::sleep(CHAT_MESSAGES_POLL * 2 + Duration::from_millis(100)).await;
        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected immediate read plus two ticks, got {seen}");
        assert!(poller.is_running());

        drop(poller);
        tokio::time::sleep(CHAT_MESSAGES_POLL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn unmounted_scope_discards_late_results() {
        let scope = ViewScope::new();
        assert_eq!(scope.run(async { 1 }).await, Some(1));

        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let late = scope.run(async move { rx.await.ok() });
        let unmount = async {
            scope.unmount();
            let _ = tx.send(2);
        };
        let (result, ()) = tokio::join!(late, unmount);
        assert_eq!(result, None);
        assert!(!scope.is_mounted());
        scope.unmounted().await;
    }
}
