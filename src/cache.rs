//! Query cache core: per-key entries, dedup, staleness, and eviction.
//!
//! All cache state lives in an explicitly constructed [`Cache`] value; there
//! is no global singleton, so tests and multi-tenant hosts can run isolated
//! instances side by side. The interior is a single mutex whose lock scopes
//! never span an `.await` — transport calls are the only suspension points,
//! and every completion re-acquires the lock, revalidates its generation, and
//! applies atomically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::endpoint::{QueryArgs, QueryEndpoint};
use crate::error::{Error, Result};
use crate::handle::QuerySubscription;
use crate::key::QueryKey;
use crate::store::{Entity, NormalizedStore};
use crate::tag::{Tag, TagIndex};
use crate::transport::{BoxFuture, Transport};

/// Lifecycle status of a cached query.
///
/// `Uninitialized → Loading → {Success, Error}`, then back to `Loading` on
/// refetch. There is no terminal state; entries live until evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  Uninitialized,
  Loading,
  Success,
  Error,
}

/// Read-only snapshot of one cache entry.
///
/// During a refetch, `data` still holds the previous successful result
/// (stale-while-revalidate), and a failed refetch keeps it too — only
/// `status` and `error` flip.
#[derive(Debug, Clone)]
pub struct QueryView<T: Entity> {
  pub status: QueryStatus,
  pub data: Option<Arc<NormalizedStore<T>>>,
  pub error: Option<Error>,
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T: Entity> QueryView<T> {
  fn uninitialized() -> Self {
    Self {
      status: QueryStatus::Uninitialized,
      data: None,
      error: None,
      fetched_at: None,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }
}

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Successful data older than this is refetched on the next subscribe or
  /// fetch instead of being served from cache.
  pub stale_time: chrono::Duration,
  /// Grace period before a zero-subscriber entry is evicted. Zero means
  /// immediate eviction; a short grace survives rapid resubscribe.
  pub evict_after: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: chrono::Duration::minutes(5),
      evict_after: Duration::from_secs(60),
    }
  }
}

/// Event published whenever a query's cached result changes identity.
#[derive(Debug, Clone)]
pub enum CacheEvent {
  /// A fetch started for the key
  Started(QueryKey),
  /// A fetch settled (success or error)
  Settled(QueryKey),
  /// Cached data was replaced outside a fetch (optimistic patch or rollback)
  Updated(QueryKey),
  /// The entry was evicted
  Evicted(QueryKey),
}

impl CacheEvent {
  pub fn key(&self) -> &QueryKey {
    match self {
      CacheEvent::Started(k)
      | CacheEvent::Settled(k)
      | CacheEvent::Updated(k)
      | CacheEvent::Evicted(k) => k,
    }
  }
}

/// Fully bound fetch closure stored per entry so invalidation can refetch
/// without the original endpoint/args in hand.
type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<Result<(NormalizedStore<T>, Vec<Tag>)>> + Send + Sync>;

pub(crate) struct QueryEntry<T: Entity> {
  pub(crate) status: QueryStatus,
  pub(crate) data: Option<Arc<NormalizedStore<T>>>,
  pub(crate) error: Option<Error>,
  pub(crate) subscribers: usize,
  /// Bumped on every new fetch; completions carrying an older generation are
  /// discarded so a slow response never overwrites a newer one.
  pub(crate) generation: u64,
  pub(crate) stale: bool,
  /// Generation current when `stale` was last set. A completion whose fetch
  /// started at or before this predates the invalidation and must not clear
  /// the flag.
  stale_generation: u64,
  pub(crate) fetched_at: Option<DateTime<Utc>>,
  /// Bumped each time an eviction timer is armed; a timer only evicts while
  /// its epoch is still current.
  evict_epoch: u64,
  in_flight: Option<watch::Receiver<bool>>,
  refetch: Option<FetchFn<T>>,
}

impl<T: Entity> Default for QueryEntry<T> {
  fn default() -> Self {
    Self {
      status: QueryStatus::Uninitialized,
      data: None,
      error: None,
      subscribers: 0,
      generation: 0,
      stale: false,
      stale_generation: 0,
      fetched_at: None,
      evict_epoch: 0,
      in_flight: None,
      refetch: None,
    }
  }
}

pub(crate) struct CacheInner<T: Entity> {
  pub(crate) entries: HashMap<QueryKey, QueryEntry<T>>,
  pub(crate) tags: TagIndex,
}

/// Normalized client-side query cache for one entity collection.
///
/// Cloning is cheap and shares the same underlying state; spawned fetch
/// tasks hold a clone.
pub struct Cache<T: Entity> {
  pub(crate) inner: Arc<Mutex<CacheInner<T>>>,
  pub(crate) transport: Arc<dyn Transport>,
  pub(crate) events: broadcast::Sender<CacheEvent>,
  config: CacheConfig,
}

impl<T: Entity> Clone for Cache<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      transport: Arc::clone(&self.transport),
      events: self.events.clone(),
      config: self.config.clone(),
    }
  }
}

impl<T: Entity> Cache<T> {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self::with_config(transport, CacheConfig::default())
  }

  pub fn with_config(transport: Arc<dyn Transport>, config: CacheConfig) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Mutex::new(CacheInner {
        entries: HashMap::new(),
        tags: TagIndex::new(),
      })),
      transport,
      events,
      config,
    }
  }

  /// Subscribe to raw cache events (every key).
  pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  /// The cache key an endpoint invocation maps to.
  pub fn key_of<A: QueryArgs>(&self, ep: &QueryEndpoint<T, A>, args: &A) -> Result<QueryKey> {
    QueryKey::new(ep.name(), args)
  }

  /// Current view of a key, without triggering any fetch.
  pub fn view(&self, key: &QueryKey) -> QueryView<T> {
    let inner = self.inner.lock();
    match inner.entries.get(key) {
      Some(entry) => QueryView {
        status: entry.status,
        data: entry.data.clone(),
        error: entry.error.clone(),
        fetched_at: entry.fetched_at,
      },
      None => QueryView::uninitialized(),
    }
  }

  /// Tags the key's most recent successful result declared.
  pub fn provided_tags(&self, key: &QueryKey) -> Vec<Tag> {
    let inner = self.inner.lock();
    inner
      .tags
      .tags_for(key)
      .map(|set| set.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Run a query, waiting for the settled result.
  ///
  /// Fresh cached data is returned without touching the network. If a fetch
  /// for the same key is already in flight, this awaits it instead of
  /// issuing a second request (dedup). Otherwise a fetch is started. The
  /// returned view carries `Error` status on failure; the only `Err` from
  /// this method is argument serialization.
  pub async fn fetch<A: QueryArgs>(
    &self,
    ep: &QueryEndpoint<T, A>,
    args: &A,
  ) -> Result<QueryView<T>> {
    let key = self.key_of(ep, args)?;

    loop {
      let waiter = {
        let mut inner = self.inner.lock();
        let entry = inner.entries.entry(key.clone()).or_default();
        entry.refetch = Some(self.bind_fetch(ep, args));

        if self.is_fresh(entry) {
          return Ok(QueryView {
            status: entry.status,
            data: entry.data.clone(),
            error: entry.error.clone(),
            fetched_at: entry.fetched_at,
          });
        }

        let inner = &mut *inner;
        self.start_fetch_locked(inner, &key)
      };

      let Some(mut rx) = waiter else {
        return Ok(self.view(&key));
      };
      if rx.wait_for(|done| *done).await.is_ok() {
        return Ok(self.view(&key));
      }
      // Fetch task abandoned without settling; re-check and retry.
      trace!(key = %key, "in-flight fetch vanished, retrying");
    }
  }

  /// Subscribe to a query: bumps the subscriber count, starts a fetch if the
  /// entry is uninitialized or stale, and returns a handle that serves
  /// current data and change notifications. Dropping the handle
  /// unsubscribes.
  pub fn subscribe<A: QueryArgs>(
    &self,
    ep: &QueryEndpoint<T, A>,
    args: &A,
  ) -> Result<QuerySubscription<T>> {
    let key = self.key_of(ep, args)?;

    {
      let mut inner = self.inner.lock();
      let entry = inner.entries.entry(key.clone()).or_default();
      entry.subscribers += 1;
      entry.refetch = Some(self.bind_fetch(ep, args));

      let needs_fetch = !self.is_fresh(entry) && entry.in_flight.is_none();
      if needs_fetch {
        let inner = &mut *inner;
        let _ = self.start_fetch_locked(inner, &key);
      }
    }

    debug!(key = %key, "subscribed");
    Ok(QuerySubscription::new(self.clone(), key))
  }

  /// Mark queries registered under any of the given tags stale. Subscribed
  /// entries refetch immediately; unsubscribed ones refetch lazily on the
  /// next subscribe or fetch.
  pub fn invalidate(&self, tags: &[Tag]) {
    let mut inner = self.inner.lock();
    let inner = &mut *inner;
    let keys = inner.tags.invalidate(tags);
    if keys.is_empty() {
      return;
    }

    debug!(count = keys.len(), "invalidating tagged queries");
    for key in keys {
      let Some(entry) = inner.entries.get_mut(&key) else {
        continue;
      };
      entry.stale = true;
      entry.stale_generation = entry.generation;
      if entry.subscribers > 0 {
        let _ = self.start_fetch_locked(inner, &key);
      }
    }
  }

  /// Drop one subscriber; at zero, schedule eviction after the grace period.
  pub(crate) fn release(&self, key: &QueryKey) {
    let epoch = {
      let mut inner = self.inner.lock();
      let Some(entry) = inner.entries.get_mut(key) else {
        return;
      };
      entry.subscribers = entry.subscribers.saturating_sub(1);
      if entry.subscribers > 0 {
        return;
      }
      entry.evict_epoch += 1;
      entry.evict_epoch
    };
    self.schedule_eviction(key, epoch);
  }

  /// Arm the grace-period timer for a zero-subscriber entry. The epoch pins
  /// the timer: a resubscribe-then-drop cycle arms a newer one, and the old
  /// timer fires as a no-op.
  fn schedule_eviction(&self, key: &QueryKey, epoch: u64) {
    let evict_after = self.config.evict_after;
    if evict_after.is_zero() {
      self.evict_if_unused(key, epoch);
      return;
    }

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        let cache = self.clone();
        let key = key.clone();
        handle.spawn(async move {
          tokio::time::sleep(evict_after).await;
          cache.evict_if_unused(&key, epoch);
        });
      }
      // No runtime to host the timer: evict immediately rather than leak.
      Err(_) => self.evict_if_unused(key, epoch),
    }
  }

  fn evict_if_unused(&self, key: &QueryKey, epoch: u64) {
    {
      let mut inner = self.inner.lock();
      let inner = &mut *inner;
      let Some(entry) = inner.entries.get(key) else {
        return;
      };
      if entry.subscribers > 0 || entry.evict_epoch != epoch {
        return;
      }
      inner.entries.remove(key);
      inner.tags.unregister(key);
    }
    debug!(key = %key, "evicted");
    let _ = self.events.send(CacheEvent::Evicted(key.clone()));
  }

  /// Success, not invalidated, and within the stale-time window.
  fn is_fresh(&self, entry: &QueryEntry<T>) -> bool {
    if entry.status != QueryStatus::Success || entry.stale {
      return false;
    }
    match entry.fetched_at {
      Some(at) => Utc::now() - at <= self.config.stale_time,
      None => false,
    }
  }

  /// Bind endpoint + args + transport into a self-contained fetch closure.
  fn bind_fetch<A: QueryArgs>(&self, ep: &QueryEndpoint<T, A>, args: &A) -> FetchFn<T> {
    let ep = ep.clone();
    let args = args.clone();
    let transport = Arc::clone(&self.transport);

    Arc::new(move || {
      let request = ep.build_request(&args);
      let fut = transport.request(request);
      let ep = ep.clone();
      let args = args.clone();
      Box::pin(async move {
        let response = fut.await?;
        let store = ep.normalize(response.data)?;
        let tags = ep.tags(&store, &args);
        Ok((store, tags))
      })
    })
  }

  /// Start a fetch task for `key` unless one is already in flight. Caller
  /// holds the lock. Returns the settle signal of the running fetch, or
  /// `None` when the entry is missing or has no bound refetch closure.
  fn start_fetch_locked(
    &self,
    inner: &mut CacheInner<T>,
    key: &QueryKey,
  ) -> Option<watch::Receiver<bool>> {
    let entry = inner.entries.get_mut(key)?;
    if let Some(rx) = &entry.in_flight {
      return Some(rx.clone());
    }
    let fetch = entry.refetch.clone()?;
    // No runtime to host the task: leave the entry for a later async caller.
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      trace!(key = %key, "no async runtime, fetch not started");
      return None;
    };

    entry.generation += 1;
    let generation = entry.generation;
    entry.status = QueryStatus::Loading;

    let (tx, rx) = watch::channel(false);
    entry.in_flight = Some(rx.clone());

    trace!(key = %key, generation, "fetch started");
    let _ = self.events.send(CacheEvent::Started(key.clone()));

    let cache = self.clone();
    let task_key = key.clone();
    handle.spawn(async move {
      let result = fetch().await;
      cache.apply_settled(&task_key, generation, result);
      let _ = tx.send(true);
    });

    Some(rx)
  }

  /// Apply a fetch completion, unless the entry was evicted or a newer fetch
  /// superseded this one — both are discarded silently.
  fn apply_settled(
    &self,
    key: &QueryKey,
    generation: u64,
    result: Result<(NormalizedStore<T>, Vec<Tag>)>,
  ) {
    let evict_epoch = {
      let mut inner = self.inner.lock();
      let inner = &mut *inner;
      let Some(entry) = inner.entries.get_mut(key) else {
        trace!(key = %key, "completion for evicted key discarded");
        return;
      };
      if entry.generation != generation {
        trace!(key = %key, generation, current = entry.generation, "stale completion discarded");
        return;
      }

      entry.in_flight = None;
      entry.fetched_at = Some(Utc::now());
      // An invalidation that raced this fetch keeps the entry stale: the
      // response predates it.
      let superseded = entry.stale && generation <= entry.stale_generation;
      match result {
        Ok((store, tags)) => {
          entry.status = QueryStatus::Success;
          if !superseded {
            entry.stale = false;
          }
          entry.error = None;
          entry.data = Some(Arc::new(store));
          inner.tags.register(key, tags);
          debug!(key = %key, "fetch succeeded");
        }
        Err(e) => {
          // Previous data is preserved for resilience.
          entry.status = QueryStatus::Error;
          entry.error = Some(e);
          debug!(key = %key, "fetch failed");
        }
      }

      let refetch_now = superseded && entry.subscribers > 0;
      let evict_epoch = if entry.subscribers == 0 {
        entry.evict_epoch += 1;
        Some(entry.evict_epoch)
      } else {
        None
      };
      if refetch_now {
        let _ = self.start_fetch_locked(inner, key);
      }
      evict_epoch
    };
    let _ = self.events.send(CacheEvent::Settled(key.clone()));
    // A settled entry nobody subscribes to still ages out.
    if let Some(epoch) = evict_epoch {
      self.schedule_eviction(key, epoch);
    }
  }

  #[cfg(test)]
  pub(crate) fn subscriber_count(&self, key: &QueryKey) -> Option<usize> {
    self.inner.lock().entries.get(key).map(|e| e.subscribers)
  }

  #[cfg(test)]
  pub(crate) fn has_entry(&self, key: &QueryKey) -> bool {
    self.inner.lock().entries.contains_key(key)
  }
}
