//! Memoized selectors over cache snapshots.
//!
//! A selector derives a read-only view (a filtered list, a join, a count)
//! from some state and caches the last `(inputs, output)` pair. While the
//! inputs compare equal to the previous call's, the cached `Arc` output is
//! returned unchanged, so downstream consumers can detect "nothing really
//! changed" with a pointer comparison and skip their own work. This is what
//! keeps an unrelated state change (say, a UI counter) from recomputing a
//! derived collection.
//!
//! Input equality is shallow by default: `Arc` inputs compare by pointer,
//! scalars by value (see [`InputEq`]). Deep `PartialEq` comparison is an
//! opt-in via [`Selector::deep`].

use std::sync::Arc;

use parking_lot::Mutex;

/// Shallow input equality used by default.
///
/// For `Arc` this is pointer identity, which matches how the cache hands
/// out snapshots: a snapshot pointer only changes when the data really
/// changed.
pub trait InputEq {
  fn input_eq(&self, other: &Self) -> bool;
}

impl<T> InputEq for Arc<T> {
  fn input_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(self, other)
  }
}

impl<T> InputEq for Option<Arc<T>> {
  fn input_eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Some(a), Some(b)) => Arc::ptr_eq(a, b),
      (None, None) => true,
      _ => false,
    }
  }
}

macro_rules! value_input_eq {
  ($($ty:ty),* $(,)?) => {
    $(
      impl InputEq for $ty {
        fn input_eq(&self, other: &Self) -> bool {
          self == other
        }
      }
    )*
  };
}

value_input_eq!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, bool, char, String);

type EqFn<I> = Box<dyn Fn(&I, &I) -> bool + Send + Sync>;

/// Single-input memoized selector.
pub struct Selector<S, I, O> {
  input: Box<dyn Fn(&S) -> I + Send + Sync>,
  combine: Box<dyn Fn(&I) -> O + Send + Sync>,
  eq: EqFn<I>,
  last: Mutex<Option<(I, Arc<O>)>>,
}

impl<S, I, O> Selector<S, I, O>
where
  I: Send + 'static,
  O: Send + Sync + 'static,
{
  /// Create a selector with the default shallow input equality.
  pub fn new(
    input: impl Fn(&S) -> I + Send + Sync + 'static,
    combine: impl Fn(&I) -> O + Send + Sync + 'static,
  ) -> Self
  where
    I: InputEq,
  {
    Self::with_eq(input, combine, I::input_eq)
  }

  /// Create a selector that compares inputs with deep `PartialEq`.
  pub fn deep(
    input: impl Fn(&S) -> I + Send + Sync + 'static,
    combine: impl Fn(&I) -> O + Send + Sync + 'static,
  ) -> Self
  where
    I: PartialEq,
  {
    Self::with_eq(input, combine, |a, b| a == b)
  }

  /// Create a selector with a custom input-equality predicate.
  pub fn with_eq(
    input: impl Fn(&S) -> I + Send + Sync + 'static,
    combine: impl Fn(&I) -> O + Send + Sync + 'static,
    eq: impl Fn(&I, &I) -> bool + Send + Sync + 'static,
  ) -> Self {
    Self {
      input: Box::new(input),
      combine: Box::new(combine),
      eq: Box::new(eq),
      last: Mutex::new(None),
    }
  }

  /// Evaluate against `state`, reusing the cached output when the input is
  /// unchanged.
  pub fn select(&self, state: &S) -> Arc<O> {
    let input = (self.input)(state);
    let mut last = self.last.lock();
    if let Some((prev, out)) = &*last {
      if (self.eq)(prev, &input) {
        return Arc::clone(out);
      }
    }
    let out = Arc::new((self.combine)(&input));
    *last = Some((input, Arc::clone(&out)));
    out
  }
}

/// Two-input memoized selector (a join).
pub struct Selector2<S, I1, I2, O> {
  input1: Box<dyn Fn(&S) -> I1 + Send + Sync>,
  input2: Box<dyn Fn(&S) -> I2 + Send + Sync>,
  combine: Box<dyn Fn(&I1, &I2) -> O + Send + Sync>,
  eq1: EqFn<I1>,
  eq2: EqFn<I2>,
  last: Mutex<Option<(I1, I2, Arc<O>)>>,
}

impl<S, I1, I2, O> Selector2<S, I1, I2, O>
where
  I1: Send + 'static,
  I2: Send + 'static,
  O: Send + Sync + 'static,
{
  /// Create a two-input selector with shallow equality on both inputs.
  pub fn new(
    input1: impl Fn(&S) -> I1 + Send + Sync + 'static,
    input2: impl Fn(&S) -> I2 + Send + Sync + 'static,
    combine: impl Fn(&I1, &I2) -> O + Send + Sync + 'static,
  ) -> Self
  where
    I1: InputEq,
    I2: InputEq,
  {
    Self {
      input1: Box::new(input1),
      input2: Box::new(input2),
      combine: Box::new(combine),
      eq1: Box::new(I1::input_eq),
      eq2: Box::new(I2::input_eq),
      last: Mutex::new(None),
    }
  }

  /// Evaluate against `state`; recomputes only when either input changed.
  pub fn select(&self, state: &S) -> Arc<O> {
    let i1 = (self.input1)(state);
    let i2 = (self.input2)(state);
    let mut last = self.last.lock();
    if let Some((p1, p2, out)) = &*last {
      if (self.eq1)(p1, &i1) && (self.eq2)(p2, &i2) {
        return Arc::clone(out);
      }
    }
    let out = Arc::new((self.combine)(&i1, &i2));
    *last = Some((i1, i2, Arc::clone(&out)));
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::NormalizedStore;
  use crate::testutil::{post, Post};

  struct AppState {
    posts: Arc<NormalizedStore<Post>>,
    counter: u64,
  }

  fn state(posts: Vec<Post>, counter: u64) -> AppState {
    AppState {
      posts: Arc::new(posts.into_iter().collect()),
      counter,
    }
  }

  #[test]
  fn test_same_input_returns_same_output_reference() {
    let titles: Selector<AppState, Arc<NormalizedStore<Post>>, Vec<String>> = Selector::new(
      |s: &AppState| Arc::clone(&s.posts),
      |posts| posts.select_all().iter().map(|p| p.title.clone()).collect(),
    );

    let s = state(vec![post(1, "a"), post(2, "b")], 0);
    let first = titles.select(&s);
    let second = titles.select(&s);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn test_unrelated_change_does_not_invalidate() {
    let titles: Selector<AppState, Arc<NormalizedStore<Post>>, Vec<String>> = Selector::new(
      |s: &AppState| Arc::clone(&s.posts),
      |posts| posts.select_all().iter().map(|p| p.title.clone()).collect(),
    );

    let mut s = state(vec![post(1, "a")], 0);
    let first = titles.select(&s);

    // Bumping the counter leaves the posts snapshot pointer untouched.
    s.counter += 1;
    let second = titles.select(&s);
    assert!(Arc::ptr_eq(&first, &second));
  }

  #[test]
  fn test_changed_snapshot_recomputes() {
    let count: Selector<AppState, Arc<NormalizedStore<Post>>, usize> =
      Selector::new(|s: &AppState| Arc::clone(&s.posts), |posts| posts.len());

    let s1 = state(vec![post(1, "a")], 0);
    let out1 = count.select(&s1);

    let s2 = state(vec![post(1, "a"), post(2, "b")], 0);
    let out2 = count.select(&s2);

    assert!(!Arc::ptr_eq(&out1, &out2));
    assert_eq!(*out2, 2);
  }

  #[test]
  fn test_join_recomputes_on_either_input() {
    let by_author: Selector2<AppState, Arc<NormalizedStore<Post>>, u64, Vec<Post>> =
      Selector2::new(
        |s: &AppState| Arc::clone(&s.posts),
        |s: &AppState| s.counter, // stands in for a user-id argument
        |posts, author| {
          posts
            .select_all()
            .into_iter()
            .filter(|p| p.id == *author)
            .cloned()
            .collect()
        },
      );

    let s = state(vec![post(1, "a"), post(2, "b")], 1);
    let first = by_author.select(&s);
    assert_eq!(first.len(), 1);

    let cached = by_author.select(&s);
    assert!(Arc::ptr_eq(&first, &cached));

    let s2 = AppState {
      posts: Arc::clone(&s.posts),
      counter: 2,
    };
    let second = by_author.select(&s2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second[0].id, 2);
  }

  #[test]
  fn test_deep_equality_survives_pointer_change() {
    let count: Selector<AppState, Arc<NormalizedStore<Post>>, usize> =
      Selector::deep(|s: &AppState| Arc::clone(&s.posts), |posts| posts.len());

    let s1 = state(vec![post(1, "a")], 0);
    let out1 = count.select(&s1);

    // Equal contents behind a different Arc: deep mode still memoizes.
    let s2 = state(vec![post(1, "a")], 0);
    let out2 = count.select(&s2);
    assert!(Arc::ptr_eq(&out1, &out2));
  }
}
