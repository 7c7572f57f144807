//! Consumer-facing handles: poll-style query subscriptions and mutation
//! triggers.
//!
//! A [`QuerySubscription`] is the `useQuery` analog: it holds a live
//! subscriber slot on one cache entry, serves the current view
//! synchronously, and reports identity changes either by polling
//! ([`poll`](QuerySubscription::poll), for tick-driven event loops) or by
//! awaiting [`changed`](QuerySubscription::changed). Dropping it
//! unsubscribes. [`Mutator`] is the `useMutation` analog.

use tokio::sync::broadcast;

use crate::cache::{Cache, CacheEvent, QueryView};
use crate::endpoint::{MutationEndpoint, QueryArgs};
use crate::error::{Error, Result};
use crate::key::QueryKey;
use crate::store::Entity;

/// Live subscription to one query key.
pub struct QuerySubscription<T: Entity> {
  cache: Cache<T>,
  key: QueryKey,
  events: broadcast::Receiver<CacheEvent>,
}

impl<T: Entity> QuerySubscription<T> {
  pub(crate) fn new(cache: Cache<T>, key: QueryKey) -> Self {
    let events = cache.events();
    Self { cache, key, events }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current cached view; never blocks and never fetches.
  pub fn current(&self) -> QueryView<T> {
    self.cache.view(&self.key)
  }

  /// Drain pending cache events; returns `true` if any concerned this key.
  ///
  /// Call from an event-loop tick, then re-read [`current`](Self::current).
  /// A lagged event stream reports `true` conservatively.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    loop {
      match self.events.try_recv() {
        Ok(event) => {
          if event.key() == &self.key {
            changed = true;
          }
        }
        Err(broadcast::error::TryRecvError::Lagged(_)) => changed = true,
        Err(_) => break,
      }
    }
    changed
  }

  /// Wait until this key's cached result changes identity.
  pub async fn changed(&mut self) {
    loop {
      match self.events.recv().await {
        Ok(event) if event.key() == &self.key => return,
        Ok(_) => continue,
        // Lagged: something happened, let the caller re-read.
        Err(broadcast::error::RecvError::Lagged(_)) => return,
        Err(broadcast::error::RecvError::Closed) => return,
      }
    }
  }
}

impl<T: Entity> Drop for QuerySubscription<T> {
  fn drop(&mut self) {
    self.cache.release(&self.key);
  }
}

/// Status of the most recent trigger on a [`Mutator`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationStatus {
  Idle,
  Loading,
  Success,
  Error(Error),
}

/// Reusable mutation trigger bound to one endpoint.
pub struct Mutator<T: Entity, A, R> {
  cache: Cache<T>,
  endpoint: MutationEndpoint<T, A, R>,
  status: MutationStatus,
}

impl<T, A, R> Mutator<T, A, R>
where
  T: Entity,
  A: QueryArgs,
  R: Send + Sync + 'static,
{
  pub fn new(cache: &Cache<T>, endpoint: MutationEndpoint<T, A, R>) -> Self {
    Self {
      cache: cache.clone(),
      endpoint,
      status: MutationStatus::Idle,
    }
  }

  /// Run the mutation, tracking its status on the handle.
  pub async fn trigger(&mut self, args: &A) -> Result<R> {
    self.status = MutationStatus::Loading;
    match self.cache.mutate(&self.endpoint, args).await {
      Ok(result) => {
        self.status = MutationStatus::Success;
        Ok(result)
      }
      Err(e) => {
        self.status = MutationStatus::Error(e.clone());
        Err(e)
      }
    }
  }

  pub fn status(&self) -> &MutationStatus {
    &self.status
  }

  pub fn is_loading(&self) -> bool {
    self.status == MutationStatus::Loading
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::QueryStatus;
  use crate::tag::Tag;
  use crate::testutil::{posts_endpoint, MockTransport, Post, Reactions};
  use crate::transport::Request;
  use serde_json::json;
  use std::time::Duration;

  #[tokio::test]
  async fn test_subscription_sees_settled_data() {
    let transport = MockTransport::ok_after(
      Duration::from_millis(20),
      json!([{"id": 1, "title": "A"}]),
    );
    let cache: Cache<Post> = Cache::new(transport);

    let mut sub = cache.subscribe(&posts_endpoint(), &()).unwrap();
    assert_eq!(sub.current().status, QueryStatus::Loading);

    sub.changed().await; // settle
    let view = sub.current();
    assert_eq!(view.status, QueryStatus::Success);
    assert_eq!(view.data.unwrap().select_ids(), &[1]);
  }

  #[tokio::test]
  async fn test_poll_reports_changes_for_own_key_only() {
    let transport = MockTransport::ok(json!([{"id": 1, "title": "A"}]));
    let cache: Cache<Post> = Cache::new(transport);
    let ep = posts_endpoint();

    let mut sub = cache.subscribe(&ep, &5u64).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sub.poll());
    assert!(!sub.poll(), "drained: no further changes");

    // Activity on a different key is filtered out.
    let _other = cache.subscribe(&ep, &6u64).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sub.poll());
  }

  #[tokio::test]
  async fn test_drop_unsubscribes() {
    let transport = MockTransport::ok(json!([{"id": 1, "title": "A"}]));
    let cache: Cache<Post> = Cache::new(transport);
    let ep = posts_endpoint();
    let key = cache.key_of(&ep, &()).unwrap();

    let sub = cache.subscribe(&ep, &()).unwrap();
    let sub2 = cache.subscribe(&ep, &()).unwrap();
    assert_eq!(cache.subscriber_count(&key), Some(2));

    drop(sub);
    assert_eq!(cache.subscriber_count(&key), Some(1));
    drop(sub2);
    assert_eq!(cache.subscriber_count(&key), Some(0));
  }

  #[tokio::test]
  async fn test_mutator_tracks_status() {
    let transport = MockTransport::fail(500, "down");
    let cache: Cache<Post> = Cache::new(transport);

    let endpoint: MutationEndpoint<Post, Post, Post> =
      MutationEndpoint::new("addPost", |post: &Post| {
        Request::post("/posts", serde_json::to_value(post).unwrap())
      })
      .invalidates_tags(|_, _| vec![Tag::list("Post")]);

    let mut mutator = Mutator::new(&cache, endpoint);
    assert_eq!(mutator.status(), &MutationStatus::Idle);

    let post = Post {
      id: 1,
      title: "A".into(),
      reactions: Reactions::default(),
    };
    let err = mutator.trigger(&post).await.unwrap_err();
    assert_eq!(mutator.status(), &MutationStatus::Error(err));
  }
}
