//! Shared fixtures for the crate's tests: a post-like entity and a
//! scriptable mock transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::{QueryArgs, QueryEndpoint};
use crate::error::{Error, Result};
use crate::store::Entity;
use crate::tag::Tag;
use crate::transport::{BoxFuture, Request, Response, Transport};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Reactions {
  #[serde(rename = "thumbsUp", default)]
  pub thumbs_up: u32,
  #[serde(default)]
  pub heart: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Post {
  pub id: u64,
  pub title: String,
  #[serde(default)]
  pub reactions: Reactions,
}

impl Entity for Post {
  type Id = u64;

  fn id(&self) -> u64 {
    self.id
  }
}

pub(crate) fn post(id: u64, title: &str) -> Post {
  Post {
    id,
    title: title.to_string(),
    reactions: Reactions::default(),
  }
}

/// The RTK-style posts list endpoint: provides the LIST tag plus one tag per
/// returned id.
pub(crate) fn posts_endpoint<A: QueryArgs>() -> QueryEndpoint<Post, A> {
  QueryEndpoint::new("getPosts", |_| Request::get("/posts")).provides_tags(|store, _| {
    let mut tags = vec![Tag::list("Post")];
    tags.extend(store.select_ids().iter().map(|id| Tag::id("Post", id)));
    tags
  })
}

type Handler = Box<dyn Fn(usize, &Request) -> (Duration, Result<Value>) + Send + Sync>;

/// Mock transport scripted with a per-call handler.
pub(crate) struct MockTransport {
  calls: AtomicUsize,
  handler: Handler,
}

impl MockTransport {
  /// Full control: handler receives the call index and the request, returns
  /// an artificial latency plus the response payload or error.
  pub fn with_indexed_handler(
    handler: impl Fn(usize, &Request) -> (Duration, Result<Value>) + Send + Sync + 'static,
  ) -> Arc<Self> {
    Arc::new(Self {
      calls: AtomicUsize::new(0),
      handler: Box::new(handler),
    })
  }

  /// Handler without index or latency.
  pub fn with_handler(
    handler: impl Fn(&Request) -> Result<Value> + Send + Sync + 'static,
  ) -> Arc<Self> {
    Self::with_indexed_handler(move |_, req| (Duration::ZERO, handler(req)))
  }

  /// Always succeed immediately with `payload`.
  pub fn ok(payload: Value) -> Arc<Self> {
    Self::with_handler(move |_| Ok(payload.clone()))
  }

  /// Always succeed with `payload` after `delay`.
  pub fn ok_after(delay: Duration, payload: Value) -> Arc<Self> {
    Self::with_indexed_handler(move |_, _| (delay, Ok(payload.clone())))
  }

  /// Always fail with an HTTP error.
  pub fn fail(status: u16, message: &str) -> Arc<Self> {
    let message = message.to_string();
    Self::with_handler(move |_| Err(Error::http(status, message.clone())))
  }

  /// Number of requests issued so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Transport for MockTransport {
  fn request(&self, req: Request) -> BoxFuture<Result<Response>> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst);
    let (delay, result) = (self.handler)(n, &req);
    Box::pin(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      result.map(Response::new)
    })
  }
}
