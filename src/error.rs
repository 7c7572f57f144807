//! Error types for cache and transport operations.

use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// A missing entity on a selector lookup is not an error; selectors return
/// `Option` for that case. Errors here are captured into the owning query
/// entry and surfaced through [`QueryView`](crate::cache::QueryView) rather
/// than thrown across the cache boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  /// Network or HTTP-level failure reported by the transport.
  #[error("transport error{}: {message}", status_suffix(.status))]
  Transport {
    /// HTTP status code, if the failure got far enough to have one
    status: Option<u16>,
    message: String,
  },

  /// The transport response did not match the shape the endpoint declared.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// A mutation failed after its optimistic patch was rolled back.
  ///
  /// The store has already been restored to its pre-optimistic state when
  /// this is returned.
  #[error("mutation failed, optimistic update rolled back: {source}")]
  Conflict {
    #[source]
    source: Box<Error>,
  },
}

impl Error {
  /// Shorthand for a transport error without an HTTP status.
  pub fn transport(message: impl Into<String>) -> Self {
    Error::Transport {
      status: None,
      message: message.into(),
    }
  }

  /// Shorthand for a transport error with an HTTP status.
  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Error::Transport {
      status: Some(status),
      message: message.into(),
    }
  }

  /// Wrap this error as a post-rollback conflict.
  pub(crate) fn into_conflict(self) -> Self {
    Error::Conflict {
      source: Box::new(self),
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Decode(e.to_string())
  }
}

fn status_suffix(status: &Option<u16>) -> String {
  match status {
    Some(code) => format!(" ({})", code),
    None => String::new(),
  }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transport_error_display() {
    let e = Error::http(404, "not found");
    assert_eq!(e.to_string(), "transport error (404): not found");

    let e = Error::transport("connection refused");
    assert_eq!(e.to_string(), "transport error: connection refused");
  }

  #[test]
  fn test_conflict_wraps_source() {
    let e = Error::http(500, "boom").into_conflict();
    assert!(matches!(e, Error::Conflict { .. }));
    assert!(e.to_string().contains("rolled back"));
  }
}
