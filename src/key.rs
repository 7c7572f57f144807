//! Query cache addressing keys.
//!
//! A key is the endpoint name plus the serialized query arguments. Two calls
//! with structurally equal arguments serialize identically and therefore map
//! to the same key, regardless of value identity. The stored key is a SHA-256
//! hash for stable, fixed-length map addressing.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Cache addressing key for one query endpoint invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  hash: String,
  endpoint: String,
  args: String,
}

impl QueryKey {
  /// Build a key from an endpoint name and serializable arguments.
  ///
  /// Arguments are serialized with `serde_json`; the composed
  /// `endpoint:args` string is hashed with SHA-256.
  pub fn new<A: Serialize>(endpoint: &str, args: &A) -> Result<Self> {
    let args = serde_json::to_string(args)?;
    let input = format!("{}:{}", endpoint, args);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(Self {
      hash,
      endpoint: endpoint.to_string(),
      args,
    })
  }

  /// The endpoint name this key addresses.
  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  /// Stable hex hash, usable as an external identifier.
  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// Human-readable form for logs.
  pub fn description(&self) -> String {
    format!("{}({})", self.endpoint, self.args)
  }
}

impl std::fmt::Display for QueryKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.description())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    #[derive(Serialize)]
    struct Args {
      user_id: u64,
    }

    let a = QueryKey::new("getPosts", &Args { user_id: 3 }).unwrap();
    let b = QueryKey::new("getPosts", &Args { user_id: 3 }).unwrap();
    assert_eq!(a, b);

    let c = QueryKey::new("getPosts", &Args { user_id: 4 }).unwrap();
    assert_ne!(a, c);
  }

  #[test]
  fn test_endpoint_distinguishes() {
    let a = QueryKey::new("getPosts", &()).unwrap();
    let b = QueryKey::new("getUsers", &()).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn test_description_mentions_endpoint() {
    let k = QueryKey::new("getPosts", &7u64).unwrap();
    assert!(k.description().contains("getPosts"));
    assert!(k.description().contains('7'));
  }
}
