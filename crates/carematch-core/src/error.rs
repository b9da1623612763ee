//! Error types for `carematch-core`.

use thiserror::Error;

use crate::{account::GrantSource, document::DocumentKey};

#[derive(Debug, Error)]
pub enum Error {
  #[error("amount must be positive, got {0}")]
  InvalidAmount(i64),

  #[error("rating must be between 1 and 5 stars, got {0}")]
  InvalidRating(u8),

  #[error("invalid plan: {0}")]
  InvalidPlan(String),

  /// The idempotency key has the shape of keys minted for `owner` grants and
  /// was supplied with a different source.
  #[error("idempotency key {key:?} is reserved for {owner} grants")]
  ReservedKey { key: String, owner: GrantSource },

  #[error(
    "insufficient interview tokens: {available} available, {requested} requested"
  )]
  InsufficientBalance { available: i64, requested: i64 },

  /// Every attempt lost the compare-and-swap race. Transient; the caller may
  /// retry the whole operation.
  #[error("gave up on {key} after {attempts} conflicting attempts")]
  ConcurrencyExhausted { key: DocumentKey, attempts: u32 },

  #[error("not found: {0}")]
  NotFound(DocumentKey),

  #[error("invalid document {key}: {reason}")]
  InvalidDocument { key: DocumentKey, reason: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  /// Whether retrying the whole operation later may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::ConcurrencyExhausted { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
