//! Invalidation tags and the reverse tag-to-query index.
//!
//! Tags are opaque `(type, id)` labels a query attaches to its result and a
//! mutation names to mark dependent queries stale. Matching is exact: the
//! `LIST` wildcard is a convention, so a mutation that wants to hit both the
//! list query and a detail query declares both tag forms.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::key::QueryKey;

/// The id half of a tag: a whole-collection wildcard or one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagId {
  /// Matches mutations that invalidate the collection as a whole
  List,
  /// A specific entity id, stringified
  Id(String),
}

/// Opaque invalidation-routing label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  pub kind: String,
  pub id: TagId,
}

impl Tag {
  /// The `(type, "LIST")` wildcard form.
  pub fn list(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      id: TagId::List,
    }
  }

  /// The `(type, id)` specific form.
  pub fn id(kind: impl Into<String>, id: impl ToString) -> Self {
    Self {
      kind: kind.into(),
      id: TagId::Id(id.to_string()),
    }
  }
}

impl std::fmt::Display for Tag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.id {
      TagId::List => write!(f, "{}/LIST", self.kind),
      TagId::Id(id) => write!(f, "{}/{}", self.kind, id),
    }
  }
}

/// Reverse map from tags to the query keys currently providing them.
///
/// Reflects exactly the tags declared by the most recent successful result of
/// each live query entry; entries are removed when a query is evicted or
/// re-resolves with a different tag set.
#[derive(Debug, Default)]
pub struct TagIndex {
  by_tag: HashMap<Tag, BTreeSet<QueryKey>>,
  by_key: HashMap<QueryKey, HashSet<Tag>>,
}

impl TagIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace `key`'s declared tag set, updating the reverse mapping.
  pub fn register(&mut self, key: &QueryKey, tags: Vec<Tag>) {
    self.unregister(key);

    let set: HashSet<Tag> = tags.into_iter().collect();
    for tag in &set {
      self
        .by_tag
        .entry(tag.clone())
        .or_default()
        .insert(key.clone());
    }
    if !set.is_empty() {
      self.by_key.insert(key.clone(), set);
    }
  }

  /// Remove all reverse-mapping entries for an evicted key.
  pub fn unregister(&mut self, key: &QueryKey) {
    if let Some(old) = self.by_key.remove(key) {
      for tag in old {
        if let Some(keys) = self.by_tag.get_mut(&tag) {
          keys.remove(key);
          if keys.is_empty() {
            self.by_tag.remove(&tag);
          }
        }
      }
    }
  }

  /// Union of query keys registered under any of the given tags.
  pub fn invalidate(&self, tags: &[Tag]) -> BTreeSet<QueryKey> {
    let mut out = BTreeSet::new();
    for tag in tags {
      if let Some(keys) = self.by_tag.get(tag) {
        out.extend(keys.iter().cloned());
      }
    }
    out
  }

  /// Tags currently declared by `key`, if any.
  pub fn tags_for(&self, key: &QueryKey) -> Option<&HashSet<Tag>> {
    self.by_key.get(key)
  }
}
