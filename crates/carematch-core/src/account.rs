//! Accounts and the immutable ledger records that move their balance.
//!
//! An [`Account`] is the materialised projection; [`Grant`] and [`Debit`] are
//! the append-only log it is projected from. Both sides change in the same
//! commit, so `token_balance == Σ grants − Σ debits` always holds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{document::Document, ids::AccountId};

// ─── Enums ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
  Parent,
  Therapist,
  Admin,
}

/// Why a grant was issued.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GrantSource {
  SignupDefault,
  SubscriptionPurchase,
  ReviewBonus,
  AdminAdjustment,
}

// ─── Account ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Account {
  pub account_id:     AccountId,
  pub role:           Role,
  #[serde(default)]
  pub token_balance:  i64,
  /// Idempotency key → grant id for every grant applied to this account.
  /// Living in the account document is what lets the replay check and the
  /// balance increment share one compare-and-swap.
  ///
  /// Entries are never pruned, so the document grows by one entry per grant.
  /// Review bonuses are capped and the signup grant is one-off; the unbounded
  /// part is operator adjustments and subscription credits. Pruning would
  /// need the replay check to fall back to the `grants` log's unique key.
  #[serde(default)]
  pub applied_grants: BTreeMap<String, Uuid>,
}

impl Account {
  pub fn new(account_id: AccountId, role: Role) -> Self {
    Self {
      account_id,
      role,
      token_balance: 0,
      applied_grants: BTreeMap::new(),
    }
  }
}

impl Document for Account {
  const COLLECTION: &'static str = "accounts";

  fn validate(&self) -> Result<(), String> {
    if self.token_balance < 0 {
      return Err(format!("negative token balance {}", self.token_balance));
    }
    Ok(())
  }
}

// ─── Log records ─────────────────────────────────────────────────────────────

/// An immutable credit applied to an account's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
  pub grant_id:        Uuid,
  pub account_id:      AccountId,
  pub source:          GrantSource,
  pub amount:          i64,
  pub idempotency_key: String,
  pub created_at:      DateTime<Utc>,
}

/// An immutable consumption of tokens from an account's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debit {
  pub debit_id:   Uuid,
  pub account_id: AccountId,
  pub amount:     i64,
  pub created_at: DateTime<Utc>,
}
