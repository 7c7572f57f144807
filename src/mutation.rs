//! Mutation execution: optimistic patches, rollback, and invalidation.
//!
//! A mutation optionally patches cached snapshots before the remote call
//! settles. The pre-patch `Arc` snapshots are the rollback record: on
//! failure they are swapped back in (unless a refetch already superseded
//! them) and the error is surfaced as [`Error::Conflict`](crate::Error::Conflict). On success the
//! record is discarded and the declared tags are invalidated.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{Cache, CacheEvent};
use crate::endpoint::{MutationEndpoint, QueryArgs};
use crate::error::Result;
use crate::key::QueryKey;
use crate::store::{Entity, NormalizedStore};

/// Pre-patch snapshots held while an optimistic mutation is in flight.
struct MutationRecord<T: Entity> {
  snapshots: Vec<(QueryKey, u64, Arc<NormalizedStore<T>>)>,
}

impl<T: Entity> Cache<T> {
  /// Run a mutation end to end.
  ///
  /// With an optimistic updater the patch is applied and published before
  /// the transport call; without one the cache is only touched after
  /// success (pessimistic mode). Invalidation runs the same way in both
  /// modes. A failed mutation is never swallowed: the caller gets the
  /// error, wrapped as [`Error::Conflict`](crate::Error::Conflict) when a rollback happened.
  pub async fn mutate<A, R>(&self, ep: &MutationEndpoint<T, A, R>, args: &A) -> Result<R>
  where
    A: QueryArgs,
    R: Send + Sync + 'static,
  {
    let record = ep
      .optimistic_fn()
      .map(|updater| self.apply_optimistic(|store| updater(store, args)));

    let request = ep.build_request(args);
    let result = match self.transport.request(request).await {
      Ok(response) => ep.parse(response.data),
      Err(e) => Err(e),
    };

    match result {
      Ok(response) => {
        debug!(endpoint = ep.name(), "mutation succeeded");
        let tags = ep.invalidated(Some(&response), args);
        if !tags.is_empty() {
          self.invalidate(&tags);
        }
        Ok(response)
      }
      Err(e) => {
        debug!(endpoint = ep.name(), error = %e, "mutation failed");
        match record {
          Some(record) if !record.snapshots.is_empty() => {
            self.rollback(record);
            Err(e.into_conflict())
          }
          _ => Err(e),
        }
      }
    }
  }

  /// Apply an optimistic patch to every live snapshot, publishing changed
  /// entries and retaining their pre-patch state.
  fn apply_optimistic(&self, updater: impl Fn(&mut NormalizedStore<T>)) -> MutationRecord<T> {
    let mut snapshots = Vec::new();
    let mut touched = Vec::new();

    {
      let mut inner = self.inner.lock();
      for (key, entry) in inner.entries.iter_mut() {
        let Some(data) = &entry.data else {
          continue;
        };
        let mut next = (**data).clone();
        updater(&mut next);
        if next == **data {
          continue;
        }
        snapshots.push((key.clone(), entry.generation, Arc::clone(data)));
        entry.data = Some(Arc::new(next));
        touched.push(key.clone());
      }
    }

    trace!(patched = touched.len(), "optimistic patch applied");
    for key in touched {
      let _ = self.events.send(CacheEvent::Updated(key));
    }
    MutationRecord { snapshots }
  }

  /// Restore pre-patch snapshots. Entries whose generation moved on have
  /// fresher server data and are left alone.
  fn rollback(&self, record: MutationRecord<T>) {
    let mut restored = Vec::new();

    {
      let mut inner = self.inner.lock();
      for (key, generation, old) in record.snapshots {
        let Some(entry) = inner.entries.get_mut(&key) else {
          continue;
        };
        if entry.generation != generation {
          continue;
        }
        entry.data = Some(old);
        restored.push(key);
      }
    }

    debug!(restored = restored.len(), "optimistic patch rolled back");
    for key in restored {
      let _ = self.events.send(CacheEvent::Updated(key));
    }
  }
}
