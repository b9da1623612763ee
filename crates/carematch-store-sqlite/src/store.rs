//! [`SqliteStore`]: the SQLite implementation of [`DocumentStore`].

use std::path::Path;

use carematch_core::{
  account::{Debit, Grant},
  document::{DocumentKey, StoredDocument},
  ids::{AccountId, EntityId},
  rating::RatingEvent,
  store::{CommitOutcome, DocumentStore, LedgerRecord},
};
use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    EncodedRecord, RawDebit, RawGrant, RawRatingEvent, decode_version, encode_dt,
    encode_uuid, encode_version,
  },
  schema::SCHEMA,
};

/// Whether `err` is a UNIQUE or PRIMARY KEY violation, i.e. the record being
/// appended already exists.
fn is_duplicate(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  )
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A carematch document store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  type Error = Error;

  // ── Documents ─────────────────────────────────────────────────────────────

  async fn get_document(&self, key: DocumentKey) -> Result<Option<StoredDocument>> {
    let collection = key.collection;
    let doc_id     = key.id;

    let raw: Option<(i64, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT version, body_json FROM documents
               WHERE collection = ?1 AND doc_id = ?2",
              rusqlite::params![collection, doc_id],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(version, body)| {
        Ok(StoredDocument {
          version: decode_version(version)?,
          body:    serde_json::from_str(&body)?,
        })
      })
      .transpose()
  }

  async fn commit(
    &self,
    key:              DocumentKey,
    expected_version: Option<u64>,
    body:             serde_json::Value,
    appends:          Vec<LedgerRecord>,
  ) -> Result<CommitOutcome> {
    let label      = key.to_string();
    let collection = key.collection;
    let doc_id     = key.id;
    let expected   = expected_version.map(encode_version).transpose()?;
    let next       = expected.unwrap_or(0) + 1;
    let body_str   = body.to_string();
    let at_str     = encode_dt(Utc::now());
    let records: Vec<EncodedRecord> = appends.into_iter().map(Into::into).collect();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<i64> = tx
          .query_row(
            "SELECT version FROM documents WHERE collection = ?1 AND doc_id = ?2",
            rusqlite::params![collection, doc_id],
            |row| row.get(0),
          )
          .optional()?;

        // Dropping `tx` on an early return rolls back.
        if current != expected {
          return Ok(CommitOutcome::Conflict);
        }

        match expected {
          None => tx.execute(
            "INSERT INTO documents (collection, doc_id, version, body_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![collection, doc_id, next, body_str, at_str],
          )?,
          Some(prev) => tx.execute(
            "UPDATE documents SET version = ?3, body_json = ?4, updated_at = ?5
             WHERE collection = ?1 AND doc_id = ?2 AND version = ?6",
            rusqlite::params![collection, doc_id, next, body_str, at_str, prev],
          )?,
        };

        for record in &records {
          match record.insert(&tx) {
            Ok(()) => {}
            Err(e) if is_duplicate(&e) => return Ok(CommitOutcome::Conflict),
            Err(e) => return Err(e.into()),
          }
        }

        tx.commit()?;
        Ok(CommitOutcome::Committed { version: next as u64 })
      })
      .await?;

    if outcome == CommitOutcome::Conflict {
      tracing::trace!(key = %label, ?expected_version, "commit rejected");
    }
    Ok(outcome)
  }

  async fn append_immutable(&self, record: LedgerRecord) -> Result<()> {
    let record = EncodedRecord::from(record);
    self
      .conn
      .call(move |conn| {
        record.insert(conn)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Log reads ─────────────────────────────────────────────────────────────

  async fn get_grant(&self, grant_id: Uuid) -> Result<Option<Grant>> {
    let id_str = encode_uuid(grant_id);

    let raw: Option<RawGrant> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM grants WHERE grant_id = ?1", RawGrant::COLUMNS);
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawGrant::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawGrant::into_grant).transpose()
  }

  async fn list_grants(&self, account_id: AccountId) -> Result<Vec<Grant>> {
    let raws: Vec<RawGrant> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM grants WHERE account_id = ?1 ORDER BY rowid",
          RawGrant::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![account_id.0], RawGrant::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGrant::into_grant).collect()
  }

  async fn list_debits(&self, account_id: AccountId) -> Result<Vec<Debit>> {
    let raws: Vec<RawDebit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT debit_id, account_id, amount, created_at
           FROM debits WHERE account_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![account_id.0], RawDebit::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDebit::into_debit).collect()
  }

  async fn list_rating_events(&self, entity_id: EntityId) -> Result<Vec<RatingEvent>> {
    let raws: Vec<RawRatingEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT event_id, entity_id, rater_id, stars, created_at
           FROM rating_events WHERE entity_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![entity_id.0], RawRatingEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRatingEvent::into_event).collect()
  }
}
