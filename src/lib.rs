//! Normalized client-side query cache with tag-based invalidation and
//! optimistic mutations.
//!
//! `requery` keeps remote collections consistent on the client:
//! - queries are addressed by endpoint + serialized arguments, fetched
//!   through a pluggable [`Transport`], and normalized into an id-indexed
//!   [`NormalizedStore`];
//! - concurrent requests for the same key collapse into one network call,
//!   and a per-key generation counter keeps a slow old response from
//!   clobbering a newer one;
//! - queries declare [`Tag`]s they provide; mutations declare tags they
//!   invalidate, which marks dependent queries stale and refetches the
//!   subscribed ones;
//! - mutations can patch cached data optimistically, with automatic
//!   rollback to the pre-patch snapshot on failure;
//! - [`Selector`]s derive memoized, reference-stable views from snapshots.
//!
//! # Example
//!
//! ```ignore
//! let cache: Cache<Post> = Cache::new(transport);
//!
//! let get_posts: QueryEndpoint<Post, ()> =
//!   QueryEndpoint::new("getPosts", |_| Request::get("/posts"))
//!     .provides_tags(|store, _| {
//!       let mut tags = vec![Tag::list("Post")];
//!       tags.extend(store.select_ids().iter().map(|id| Tag::id("Post", id)));
//!       tags
//!     });
//!
//! let sub = cache.subscribe(&get_posts, &())?;
//! // ... in the event loop:
//! if sub.poll() {
//!   render(sub.current());
//! }
//! ```

mod cache;
mod endpoint;
mod error;
mod handle;
mod key;
mod mutation;
mod select;
mod store;
mod tag;
mod transport;

#[cfg(test)]
mod testutil;

pub use cache::{Cache, CacheConfig, CacheEvent, QueryStatus, QueryView};
pub use endpoint::{MutationEndpoint, QueryArgs, QueryEndpoint};
pub use error::{Error, Result};
pub use handle::{MutationStatus, Mutator, QuerySubscription};
pub use key::QueryKey;
pub use select::{InputEq, Selector, Selector2};
pub use store::{Entity, NormalizedStore};
pub use tag::{Tag, TagId, TagIndex};
pub use transport::{BoxFuture, Method, Request, Response, Transport};
