//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. UUIDs are stored as
//! hyphenated lowercase strings. Document bodies are compact JSON.

use std::str::FromStr as _;

use carematch_core::{
  account::{Debit, Grant, GrantSource},
  ids::{AccountId, EntityId},
  rating::RatingEvent,
  store::LedgerRecord,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Versions ─────────────────────────────────────────────────────────────────

pub fn encode_version(v: u64) -> Result<i64> {
  i64::try_from(v).map_err(|_| Error::Decode(format!("version {v} out of range")))
}

pub fn decode_version(v: i64) -> Result<u64> {
  u64::try_from(v).map_err(|_| Error::Decode(format!("negative version {v}")))
}

// ─── GrantSource ──────────────────────────────────────────────────────────────

pub fn decode_source(s: &str) -> Result<GrantSource> {
  GrantSource::from_str(s)
    .map_err(|_| Error::Decode(format!("unknown grant source: {s:?}")))
}

// ─── Records to write ────────────────────────────────────────────────────────

/// A [`LedgerRecord`] flattened to owned column values so it can be moved
/// onto the database thread.
pub enum EncodedRecord {
  Grant {
    grant_id:        String,
    account_id:      String,
    source:          &'static str,
    amount:          i64,
    idempotency_key: String,
    created_at:      String,
  },
  Debit {
    debit_id:   String,
    account_id: String,
    amount:     i64,
    created_at: String,
  },
  RatingEvent {
    event_id:   String,
    entity_id:  String,
    rater_id:   String,
    stars:      u8,
    created_at: String,
  },
}

impl From<LedgerRecord> for EncodedRecord {
  fn from(record: LedgerRecord) -> Self {
    match record {
      LedgerRecord::Grant(g) => Self::Grant {
        grant_id:        encode_uuid(g.grant_id),
        account_id:      g.account_id.0,
        source:          g.source.into(),
        amount:          g.amount,
        idempotency_key: g.idempotency_key,
        created_at:      encode_dt(g.created_at),
      },
      LedgerRecord::Debit(d) => Self::Debit {
        debit_id:   encode_uuid(d.debit_id),
        account_id: d.account_id.0,
        amount:     d.amount,
        created_at: encode_dt(d.created_at),
      },
      LedgerRecord::RatingEvent(e) => Self::RatingEvent {
        event_id:   encode_uuid(e.event_id),
        entity_id:  e.entity_id.0,
        rater_id:   e.rater_id.0,
        stars:      e.stars,
        created_at: encode_dt(e.created_at),
      },
    }
  }
}

impl EncodedRecord {
  /// Insert into the matching append-only table.
  pub fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let inserted = match self {
      Self::Grant {
        grant_id,
        account_id,
        source,
        amount,
        idempotency_key,
        created_at,
      } => conn.execute(
        "INSERT INTO grants (
           grant_id, account_id, source, amount, idempotency_key, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
          grant_id,
          account_id,
          source,
          amount,
          idempotency_key,
          created_at
        ],
      ),
      Self::Debit { debit_id, account_id, amount, created_at } => conn.execute(
        "INSERT INTO debits (debit_id, account_id, amount, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![debit_id, account_id, amount, created_at],
      ),
      Self::RatingEvent { event_id, entity_id, rater_id, stars, created_at } => {
        conn.execute(
          "INSERT INTO rating_events (event_id, entity_id, rater_id, stars, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![event_id, entity_id, rater_id, stars, created_at],
        )
      }
    };
    inserted.map(|_| ())
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `grants` row.
pub struct RawGrant {
  pub grant_id:        String,
  pub account_id:      String,
  pub source:          String,
  pub amount:          i64,
  pub idempotency_key: String,
  pub created_at:      String,
}

impl RawGrant {
  pub const COLUMNS: &'static str =
    "grant_id, account_id, source, amount, idempotency_key, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      grant_id:        row.get(0)?,
      account_id:      row.get(1)?,
      source:          row.get(2)?,
      amount:          row.get(3)?,
      idempotency_key: row.get(4)?,
      created_at:      row.get(5)?,
    })
  }

  pub fn into_grant(self) -> Result<Grant> {
    Ok(Grant {
      grant_id:        decode_uuid(&self.grant_id)?,
      account_id:      AccountId(self.account_id),
      source:          decode_source(&self.source)?,
      amount:          self.amount,
      idempotency_key: self.idempotency_key,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `debits` row.
pub struct RawDebit {
  pub debit_id:   String,
  pub account_id: String,
  pub amount:     i64,
  pub created_at: String,
}

impl RawDebit {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      debit_id:   row.get(0)?,
      account_id: row.get(1)?,
      amount:     row.get(2)?,
      created_at: row.get(3)?,
    })
  }

  pub fn into_debit(self) -> Result<Debit> {
    Ok(Debit {
      debit_id:   decode_uuid(&self.debit_id)?,
      account_id: AccountId(self.account_id),
      amount:     self.amount,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `rating_events` row.
pub struct RawRatingEvent {
  pub event_id:   String,
  pub entity_id:  String,
  pub rater_id:   String,
  pub stars:      i64,
  pub created_at: String,
}

impl RawRatingEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:   row.get(0)?,
      entity_id:  row.get(1)?,
      rater_id:   row.get(2)?,
      stars:      row.get(3)?,
      created_at: row.get(4)?,
    })
  }

  pub fn into_event(self) -> Result<RatingEvent> {
    let stars = u8::try_from(self.stars)
      .map_err(|_| Error::Decode(format!("stars out of range: {}", self.stars)))?;
    Ok(RatingEvent {
      event_id: decode_uuid(&self.event_id)?,
      entity_id: EntityId(self.entity_id),
      rater_id: AccountId(self.rater_id),
      stars,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
