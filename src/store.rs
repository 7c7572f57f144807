//! Normalized entity storage.
//!
//! A [`NormalizedStore`] keeps a collection as an ordered id list plus an
//! id-to-entity map, so lookups, upserts, and removals are O(1) while
//! iteration order stays deterministic. Invariant: `ids` and `entities`
//! describe exactly the same set, with no duplicate ids.
//!
//! Stores are plain values. The cache shares them as `Arc` snapshots and
//! mutates via clone-and-swap, which is what makes optimistic rollback a
//! matter of keeping the old `Arc` around.

use std::collections::HashMap;
use std::hash::Hash;

/// Trait for records the cache can normalize.
///
/// Implementors provide the id extractor; everything else is derived.
pub trait Entity: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
  /// The unique identifier type (e.g. `u64`, `String`).
  type Id: Clone + Eq + Hash + Ord + std::fmt::Debug + ToString + Send + Sync + 'static;

  fn id(&self) -> Self::Id;
}

/// Id-indexed entity container with a stable id ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStore<T: Entity> {
  ids: Vec<T::Id>,
  entities: HashMap<T::Id, T>,
}

impl<T: Entity> Default for NormalizedStore<T> {
  fn default() -> Self {
    Self {
      ids: Vec::new(),
      entities: HashMap::new(),
    }
  }
}

impl<T: Entity> NormalizedStore<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the entire collection, rebuilding ids and entities.
  ///
  /// Later duplicates win and keep the position of the first occurrence.
  pub fn set_all(&mut self, items: impl IntoIterator<Item = T>) {
    self.ids.clear();
    self.entities.clear();
    for item in items {
      self.upsert_one(item);
    }
  }

  /// Insert or replace a single entity.
  ///
  /// Existing ids keep their position; new ids append.
  pub fn upsert_one(&mut self, item: T) {
    let id = item.id();
    if self.entities.insert(id.clone(), item).is_none() {
      self.ids.push(id);
    }
  }

  /// Insert or replace a batch of entities.
  pub fn upsert_many(&mut self, items: impl IntoIterator<Item = T>) {
    for item in items {
      self.upsert_one(item);
    }
  }

  /// Remove a single entity. Unknown ids are a no-op.
  pub fn remove_one(&mut self, id: &T::Id) {
    if self.entities.remove(id).is_some() {
      self.ids.retain(|existing| existing != id);
    }
  }

  /// Remove a batch of entities.
  pub fn remove_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a T::Id>) {
    for id in ids {
      self.remove_one(id);
    }
  }

  /// Re-sort the id list with the given comparator over entities.
  pub fn sort_by(&mut self, mut cmp: impl FnMut(&T, &T) -> std::cmp::Ordering) {
    let entities = &self.entities;
    self.ids.sort_by(|a, b| cmp(&entities[a], &entities[b]));
  }

  /// All entities in id-list order.
  pub fn select_all(&self) -> Vec<&T> {
    self.ids.iter().map(|id| &self.entities[id]).collect()
  }

  /// A single entity, or `None` if absent (not-found is a sentinel, never an
  /// error).
  pub fn select_by_id(&self, id: &T::Id) -> Option<&T> {
    self.entities.get(id)
  }

  /// The id sequence.
  pub fn select_ids(&self) -> &[T::Id] {
    &self.ids
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  /// Update one entity in place via a closure. No-op if the id is absent.
  pub fn update_one(&mut self, id: &T::Id, f: impl FnOnce(&mut T)) {
    if let Some(entity) = self.entities.get_mut(id) {
      f(entity);
    }
  }
}

impl<T: Entity> FromIterator<T> for NormalizedStore<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let mut store = Self::new();
    store.upsert_many(iter);
    store
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Post {
    id: u64,
    title: String,
  }

  impl Entity for Post {
    type Id = u64;

    fn id(&self) -> u64 {
      self.id
    }
  }

  fn post(id: u64, title: &str) -> Post {
    Post {
      id,
      title: title.to_string(),
    }
  }

  #[test]
  fn test_set_all_round_trip_preserves_order() {
    let mut store = NormalizedStore::new();
    let items = vec![post(3, "c"), post(1, "a"), post(2, "b")];
    store.set_all(items.clone());

    let all: Vec<Post> = store.select_all().into_iter().cloned().collect();
    assert_eq!(all, items);
    assert_eq!(store.select_ids(), &[3, 1, 2]);
  }

  #[test]
  fn test_upsert_replaces_in_place_and_appends_new() {
    let mut store: NormalizedStore<Post> = [post(1, "a"), post(2, "b")].into_iter().collect();

    store.upsert_one(post(1, "a2"));
    store.upsert_one(post(3, "c"));

    assert_eq!(store.select_ids(), &[1, 2, 3]);
    assert_eq!(store.select_by_id(&1).unwrap().title, "a2");
  }

  #[test]
  fn test_remove_prunes_ids() {
    let mut store: NormalizedStore<Post> =
      [post(1, "a"), post(2, "b"), post(3, "c")].into_iter().collect();

    store.remove_one(&2);
    assert_eq!(store.select_ids(), &[1, 3]);
    assert!(store.select_by_id(&2).is_none());

    store.remove_many(&[1, 3]);
    assert!(store.is_empty());
  }

  #[test]
  fn test_remove_unknown_id_is_noop() {
    let mut store: NormalizedStore<Post> = [post(1, "a")].into_iter().collect();
    store.remove_one(&9);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_sort_by_reorders_ids() {
    let mut store: NormalizedStore<Post> =
      [post(2, "b"), post(1, "a"), post(3, "c")].into_iter().collect();

    store.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(store.select_ids(), &[1, 2, 3]);
  }

  #[test]
  fn test_update_one_mutates_in_place() {
    let mut store: NormalizedStore<Post> = [post(1, "a")].into_iter().collect();
    store.update_one(&1, |p| p.title.push('!'));
    assert_eq!(store.select_by_id(&1).unwrap().title, "a!");

    // Absent id: nothing happens
    store.update_one(&9, |p| p.title.clear());
    assert_eq!(store.len(), 1);
  }
}
