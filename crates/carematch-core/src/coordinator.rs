//! [`ConsistencyCoordinator`]: optimistic read-compute-write with bounded,
//! jittered retry.
//!
//! Every mutation in this crate is expressed as a pure transition over the
//! current state of one document. The coordinator reads the document, runs the
//! transition, and commits with the version it read as the precondition. When
//! another writer got there first the whole cycle runs again on fresh state.

use std::{future::Future, sync::Arc, time::Duration};

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  document::{self, Document, DocumentKey, Versioned},
  store::{CommitOutcome, DocumentStore, LedgerRecord},
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Retry policy for conflicting commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
  /// Total read-compute-write cycles before giving up.
  pub max_attempts:    u32,
  /// Backoff ceiling after the first conflict; doubles per conflict.
  pub base_backoff_ms: u64,
  /// Upper bound on any single backoff.
  pub max_backoff_ms:  u64,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self { max_attempts: 5, base_backoff_ms: 10, max_backoff_ms: 250 }
  }
}

impl CoordinatorConfig {
  /// Delay after the `conflicts`-th conflict (1-based). Uniformly jittered
  /// over the upper half of the exponential ceiling.
  pub fn backoff(&self, conflicts: u32) -> Duration {
    let exponent = conflicts.saturating_sub(1).min(20);
    let ceiling = self
      .base_backoff_ms
      .saturating_mul(1 << exponent)
      .min(self.max_backoff_ms);
    let floor = ceiling / 2;
    let jitter = OsRng.next_u64() % (ceiling - floor + 1);
    Duration::from_millis(floor + jitter)
  }
}

// ─── Transition ──────────────────────────────────────────────────────────────

/// What a transaction body decided to do with the document it was shown.
#[derive(Debug)]
pub enum Transition<D, R> {
  /// Replace the document with `next` and append `appends` in one commit.
  Write {
    next:    D,
    appends: Vec<LedgerRecord>,
    result:  R,
  },
  /// Leave the document untouched.
  Keep(R),
}

impl<D, R> Transition<D, R> {
  pub fn write(next: D, result: R) -> Self {
    Self::Write { next, appends: Vec::new(), result }
  }

  /// Attach an immutable record to a `Write`. No-op on `Keep`.
  pub fn append(mut self, record: LedgerRecord) -> Self {
    if let Self::Write { appends, .. } = &mut self {
      appends.push(record);
    }
    self
  }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

/// Wraps a [`DocumentStore`] with the transactional-retry discipline.
///
/// Cloning is cheap; the store is shared behind an `Arc`.
pub struct ConsistencyCoordinator<S> {
  store:  Arc<S>,
  config: CoordinatorConfig,
}

impl<S> Clone for ConsistencyCoordinator<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: self.config.clone() }
  }
}

impl<S: DocumentStore> ConsistencyCoordinator<S> {
  pub fn new(store: Arc<S>, config: CoordinatorConfig) -> Self {
    Self { store, config }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &CoordinatorConfig { &self.config }

  /// Non-transactional read of a typed document.
  pub async fn read<D: Document>(
    &self,
    key: &DocumentKey,
  ) -> Result<Option<Versioned<D>>> {
    self
      .store
      .get_document(key.clone())
      .await
      .map_err(Error::store)?
      .map(|stored| document::decode(key, stored))
      .transpose()
  }

  /// Run `transition` against the current state of `key` until it commits
  /// without conflict, or attempts run out.
  ///
  /// `transition` may run several times and must be free of side effects.
  /// An `Err` from it aborts immediately without writing.
  pub async fn run_transactional<D, R, F>(
    &self,
    key: DocumentKey,
    transition: F,
  ) -> Result<R>
  where
    D: Document,
    F: FnMut(Option<&D>) -> Result<Transition<D, R>>,
  {
    self
      .run_transactional_with(key, transition, |_: &R| {
        std::future::ready(Ok(()))
      })
      .await
  }

  /// Like [`run_transactional`](Self::run_transactional), with a hook that
  /// runs after a `Write` transition is computed and before it is committed.
  ///
  /// The hook sees the transition's result and runs once per attempt, so any
  /// effect it has must be idempotent. If it fails, nothing is committed.
  pub async fn run_transactional_with<D, R, F, H, Fut>(
    &self,
    key: DocumentKey,
    mut transition: F,
    mut before_commit: H,
  ) -> Result<R>
  where
    D: Document,
    F: FnMut(Option<&D>) -> Result<Transition<D, R>>,
    H: FnMut(&R) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let max_attempts = self.config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;

      let current = self.read::<D>(&key).await?;
      let expected_version = current.as_ref().map(|v| v.version);

      let (body, appends, result) =
        match transition(current.as_ref().map(|v| &v.doc))? {
          Transition::Keep(result) => return Ok(result),
          Transition::Write { next, appends, result } => {
            (document::encode(&key, &next)?, appends, result)
          }
        };
      drop(current);

      before_commit(&result).await?;

      let outcome = self
        .store
        .commit(key.clone(), expected_version, body, appends)
        .await
        .map_err(Error::store)?;

      match outcome {
        CommitOutcome::Committed { version } => {
          tracing::debug!(%key, version, attempt, "committed");
          return Ok(result);
        }
        CommitOutcome::Conflict if attempt >= max_attempts => {
          tracing::warn!(%key, attempts = attempt, "retries exhausted");
          return Err(Error::ConcurrencyExhausted { key, attempts: attempt });
        }
        CommitOutcome::Conflict => {
          let delay = self.config.backoff(attempt);
          tracing::debug!(%key, attempt, ?delay, "write conflict, retrying");
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
}
