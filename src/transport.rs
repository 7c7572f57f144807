//! Transport collaborator boundary.
//!
//! The cache never talks to the network directly. Endpoint definitions build
//! a [`Request`] and the host application supplies a [`Transport`] that
//! executes it. URL construction, authentication, retries, and timeouts all
//! live behind this trait; a timeout surfaces as an ordinary
//! [`Error::Transport`](crate::Error::Transport) rejection.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::Result;

/// A boxed future, the crate-wide idiom for trait-object async.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// HTTP method for a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    };
    f.write_str(s)
  }
}

/// A request handed to the transport.
#[derive(Debug, Clone)]
pub struct Request {
  /// Path relative to whatever base the transport was configured with
  pub path: String,
  pub method: Method,
  /// JSON body for write methods
  pub body: Option<Value>,
}

impl Request {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      method: Method::Get,
      body: None,
    }
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self {
      path: path.into(),
      method: Method::Post,
      body: Some(body),
    }
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self {
      path: path.into(),
      method: Method::Put,
      body: Some(body),
    }
  }

  pub fn patch(path: impl Into<String>, body: Value) -> Self {
    Self {
      path: path.into(),
      method: Method::Patch,
      body: Some(body),
    }
  }

  pub fn delete(path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      path: path.into(),
      method: Method::Delete,
      body,
    }
  }
}

/// A successful transport response.
#[derive(Debug, Clone)]
pub struct Response {
  /// Raw JSON payload; endpoints decode it via their `transform`/`parse`
  pub data: Value,
}

impl Response {
  pub fn new(data: Value) -> Self {
    Self { data }
  }
}

/// The pluggable network boundary.
///
/// Implementations must be cheap to share; the cache holds one behind an
/// `Arc` and clones it into spawned fetch tasks.
pub trait Transport: Send + Sync {
  fn request(&self, req: Request) -> BoxFuture<Result<Response>>;
}
