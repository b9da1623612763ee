//! Typed documents and the decode boundary.
//!
//! The store only knows about JSON bodies tagged with a version. Every typed
//! document is decoded here, once: unknown fields are rejected by
//! `#[serde(deny_unknown_fields)]` on the document structs, missing optional
//! fields are hydrated through `#[serde(default)]`, and [`Document::validate`]
//! runs on the hydrated value before anything else sees it.

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Address of a single mutable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
  pub collection: &'static str,
  pub id:         String,
}

impl DocumentKey {
  pub fn new(collection: &'static str, id: impl Into<String>) -> Self {
    Self { collection, id: id.into() }
  }
}

impl fmt::Display for DocumentKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.collection, self.id)
  }
}

// ─── Document trait ──────────────────────────────────────────────────────────

/// A mutable entity stored as one document and changed only through
/// [`crate::coordinator::ConsistencyCoordinator`].
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync {
  /// Collection name; doubles as the first half of the [`DocumentKey`].
  const COLLECTION: &'static str;

  /// Check invariants that serde cannot express. Returns a human-readable
  /// reason on failure.
  fn validate(&self) -> std::result::Result<(), String> { Ok(()) }

  fn key_for(id: &str) -> DocumentKey { DocumentKey::new(Self::COLLECTION, id) }
}

// ─── Raw and decoded forms ───────────────────────────────────────────────────

/// A document body as held by the store, before decoding.
#[derive(Debug, Clone)]
pub struct StoredDocument {
  /// Incremented by one on every committed write; starts at 1.
  pub version: u64,
  pub body:    serde_json::Value,
}

/// A decoded document together with the version it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<D> {
  pub version: u64,
  pub doc:     D,
}

/// Decode and validate a stored body.
pub fn decode<D: Document>(
  key: &DocumentKey,
  stored: StoredDocument,
) -> Result<Versioned<D>> {
  let doc: D =
    serde_json::from_value(stored.body).map_err(|e| Error::InvalidDocument {
      key:    key.clone(),
      reason: e.to_string(),
    })?;
  doc.validate().map_err(|reason| Error::InvalidDocument {
    key: key.clone(),
    reason,
  })?;
  Ok(Versioned { version: stored.version, doc })
}

/// Validate and encode a document for writing.
pub fn encode<D: Document>(
  key: &DocumentKey,
  doc: &D,
) -> Result<serde_json::Value> {
  doc.validate().map_err(|reason| Error::InvalidDocument {
    key: key.clone(),
    reason,
  })?;
  Ok(serde_json::to_value(doc)?)
}
