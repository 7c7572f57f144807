//! Query and mutation endpoint definitions.
//!
//! An endpoint bundles everything the cache needs to run one named operation
//! against the transport: how to build the request, how to decode the
//! response, and which invalidation tags it provides or invalidates.
//! Endpoints are typed at construction, so argument/result mismatches are
//! compile errors rather than registration-time surprises.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::store::{Entity, NormalizedStore};
use crate::tag::Tag;
use crate::transport::Request;

type RequestFn<A> = Arc<dyn Fn(&A) -> Request + Send + Sync>;
type TransformFn<T> = Arc<dyn Fn(Value) -> Result<Vec<T>> + Send + Sync>;
type ProvidesFn<T, A> = Arc<dyn Fn(&NormalizedStore<T>, &A) -> Vec<Tag> + Send + Sync>;
type ParseFn<R> = Arc<dyn Fn(Value) -> Result<R> + Send + Sync>;
type InvalidatesFn<A, R> = Arc<dyn Fn(Option<&R>, &A) -> Vec<Tag> + Send + Sync>;
type OptimisticFn<T, A> = Arc<dyn Fn(&mut NormalizedStore<T>, &A) + Send + Sync>;
type SortFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Argument bound shared by all endpoints: serializable for the cache key,
/// clonable into spawned refetch closures.
pub trait QueryArgs: Serialize + Clone + Send + Sync + 'static {}
impl<A: Serialize + Clone + Send + Sync + 'static> QueryArgs for A {}

/// A read endpoint: fetches a collection and declares the tags it provides.
pub struct QueryEndpoint<T: Entity, A> {
  name: &'static str,
  request: RequestFn<A>,
  transform: TransformFn<T>,
  provides: ProvidesFn<T, A>,
  sort: Option<SortFn<T>>,
}

impl<T: Entity, A> Clone for QueryEndpoint<T, A> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      request: Arc::clone(&self.request),
      transform: Arc::clone(&self.transform),
      provides: Arc::clone(&self.provides),
      sort: self.sort.clone(),
    }
  }
}

impl<T, A> QueryEndpoint<T, A>
where
  T: Entity + DeserializeOwned,
  A: QueryArgs,
{
  /// Create a query endpoint with the default response handling: the raw
  /// payload is decoded as a JSON array of `T` and no tags are provided.
  pub fn new(name: &'static str, request: impl Fn(&A) -> Request + Send + Sync + 'static) -> Self {
    Self {
      name,
      request: Arc::new(request),
      transform: Arc::new(|raw| Ok(serde_json::from_value::<Vec<T>>(raw)?)),
      provides: Arc::new(|_, _| Vec::new()),
      sort: None,
    }
  }
}

impl<T: Entity, A: QueryArgs> QueryEndpoint<T, A> {
  /// Override how the raw response becomes a list of entities.
  pub fn transform_response(
    mut self,
    f: impl Fn(Value) -> Result<Vec<T>> + Send + Sync + 'static,
  ) -> Self {
    self.transform = Arc::new(f);
    self
  }

  /// Declare the tags a successful result provides, for invalidation
  /// routing. Receives the normalized result so per-entity tags can be
  /// derived from the id list.
  pub fn provides_tags(
    mut self,
    f: impl Fn(&NormalizedStore<T>, &A) -> Vec<Tag> + Send + Sync + 'static,
  ) -> Self {
    self.provides = Arc::new(f);
    self
  }

  /// Sort normalized results with this comparator before caching.
  pub fn sort_with(mut self, f: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
    self.sort = Some(Arc::new(f));
    self
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub(crate) fn build_request(&self, args: &A) -> Request {
    (self.request)(args)
  }

  /// Decode, normalize, and sort a raw response.
  pub(crate) fn normalize(&self, raw: Value) -> Result<NormalizedStore<T>> {
    let items = (self.transform)(raw)?;
    let mut store: NormalizedStore<T> = items.into_iter().collect();
    if let Some(sort) = &self.sort {
      let sort = Arc::clone(sort);
      store.sort_by(move |a, b| sort(a, b));
    }
    Ok(store)
  }

  pub(crate) fn tags(&self, store: &NormalizedStore<T>, args: &A) -> Vec<Tag> {
    (self.provides)(store, args)
  }
}

/// A write endpoint: runs a remote mutation, optionally patches the cache
/// optimistically, and declares the tags it invalidates.
pub struct MutationEndpoint<T: Entity, A, R> {
  name: &'static str,
  request: RequestFn<A>,
  parse: ParseFn<R>,
  invalidates: InvalidatesFn<A, R>,
  optimistic: Option<OptimisticFn<T, A>>,
}

impl<T: Entity, A, R> Clone for MutationEndpoint<T, A, R> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      request: Arc::clone(&self.request),
      parse: Arc::clone(&self.parse),
      invalidates: Arc::clone(&self.invalidates),
      optimistic: self.optimistic.clone(),
    }
  }
}

impl<T, A, R> MutationEndpoint<T, A, R>
where
  T: Entity,
  A: QueryArgs,
  R: DeserializeOwned + Send + Sync + 'static,
{
  /// Create a mutation endpoint with the default response handling: the raw
  /// payload is decoded as `R` and no tags are invalidated.
  pub fn new(name: &'static str, request: impl Fn(&A) -> Request + Send + Sync + 'static) -> Self {
    Self {
      name,
      request: Arc::new(request),
      parse: Arc::new(|raw| Ok(serde_json::from_value::<R>(raw)?)),
      invalidates: Arc::new(|_, _| Vec::new()),
      optimistic: None,
    }
  }
}

impl<T: Entity, A: QueryArgs, R: Send + Sync + 'static> MutationEndpoint<T, A, R> {
  /// Override how the raw response becomes the mutation result.
  pub fn parse_response(mut self, f: impl Fn(Value) -> Result<R> + Send + Sync + 'static) -> Self {
    self.parse = Arc::new(f);
    self
  }

  /// Declare the tags a settled mutation invalidates. The result is `None`
  /// when declared tags are computed before the response is known (e.g. on
  /// failure paths that still need logging).
  pub fn invalidates_tags(
    mut self,
    f: impl Fn(Option<&R>, &A) -> Vec<Tag> + Send + Sync + 'static,
  ) -> Self {
    self.invalidates = Arc::new(f);
    self
  }

  /// Apply this patch to cached snapshots before the remote call settles.
  /// The pre-patch snapshots are kept and restored if the call fails.
  pub fn optimistic(
    mut self,
    f: impl Fn(&mut NormalizedStore<T>, &A) + Send + Sync + 'static,
  ) -> Self {
    self.optimistic = Some(Arc::new(f));
    self
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub(crate) fn build_request(&self, args: &A) -> Request {
    (self.request)(args)
  }

  pub(crate) fn parse(&self, raw: Value) -> Result<R> {
    (self.parse)(raw)
  }

  pub(crate) fn invalidated(&self, result: Option<&R>, args: &A) -> Vec<Tag> {
    (self.invalidates)(result, args)
  }

  pub(crate) fn optimistic_fn(&self) -> Option<OptimisticFn<T, A>> {
    self.optimistic.clone()
  }
}
