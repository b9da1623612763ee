//! The `DocumentStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g.
//! `carematch-store-sqlite`). It models a multi-writer document database that
//! offers an atomic compare-and-swap on one document at a time and nothing
//! across documents.

use std::future::Future;

use uuid::Uuid;

use crate::{
  account::{Debit, Grant},
  document::{DocumentKey, StoredDocument},
  ids::{AccountId, EntityId},
  rating::RatingEvent,
};

// ─── Records and outcomes ────────────────────────────────────────────────────

/// An immutable record destined for one of the append-only collections.
#[derive(Debug, Clone)]
pub enum LedgerRecord {
  Grant(Grant),
  Debit(Debit),
  RatingEvent(RatingEvent),
}

/// The result of [`DocumentStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
  /// The write landed; the document is now at `version`.
  Committed { version: u64 },
  /// Someone else wrote the document (or the same immutable record) since it
  /// was read. Nothing was written.
  Conflict,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the hosted document database.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Documents ─────────────────────────────────────────────────────────

  /// Read a document and its current version. `None` if it was never
  /// written.
  fn get_document(
    &self,
    key: DocumentKey,
  ) -> impl Future<Output = Result<Option<StoredDocument>, Self::Error>> + Send + '_;

  /// Atomically replace `key` with `body` if its version still equals
  /// `expected_version` (`None` meaning "must not exist yet"), and append
  /// `appends` in the same commit.
  ///
  /// A version mismatch, or an append that collides with an existing
  /// record's unique identity, yields [`CommitOutcome::Conflict`] and writes
  /// nothing.
  fn commit(
    &self,
    key: DocumentKey,
    expected_version: Option<u64>,
    body: serde_json::Value,
    appends: Vec<LedgerRecord>,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send + '_;

  /// Append an immutable record outside any document commit.
  fn append_immutable(
    &self,
    record: LedgerRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Log reads ─────────────────────────────────────────────────────────

  fn get_grant(
    &self,
    grant_id: Uuid,
  ) -> impl Future<Output = Result<Option<Grant>, Self::Error>> + Send + '_;

  /// All grants for an account, oldest first.
  fn list_grants(
    &self,
    account_id: AccountId,
  ) -> impl Future<Output = Result<Vec<Grant>, Self::Error>> + Send + '_;

  /// All debits for an account, oldest first.
  fn list_debits(
    &self,
    account_id: AccountId,
  ) -> impl Future<Output = Result<Vec<Debit>, Self::Error>> + Send + '_;

  /// All rating events for a profile, oldest first.
  fn list_rating_events(
    &self,
    entity_id: EntityId,
  ) -> impl Future<Output = Result<Vec<RatingEvent>, Self::Error>> + Send + '_;
}
