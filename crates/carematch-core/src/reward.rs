//! [`RewardEligibilityEvaluator`]: one bonus token per two approved reviews,
//! at most [`MAX_AWARDS`] per account for its lifetime.
//!
//! The counter document and the account document are separate, so the award
//! cannot ride in the counter's commit. Instead each award has a deterministic
//! idempotency key (`{account}:{index}`) and is credited before the counter
//! commit. If the counter commit loses a race the cycle reruns on fresh state;
//! any credit already made for the same index replays as a no-op.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  account::GrantSource,
  coordinator::{ConsistencyCoordinator, Transition},
  document::{Document, DocumentKey},
  ids::AccountId,
  ledger::CreditLedger,
  store::DocumentStore,
};

/// Lifetime cap on review bonuses per account. Never reset.
pub const MAX_AWARDS: u32 = 3;

/// Approved reviews needed per bonus.
pub const REVIEWS_PER_AWARD: u32 = 2;

// ─── Counter document ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewBonusCounter {
  pub account_id:            AccountId,
  #[serde(default)]
  pub total_reviews_written: u32,
  #[serde(default)]
  pub awarded_count:         u32,
}

impl ReviewBonusCounter {
  pub fn new(account_id: AccountId) -> Self {
    Self { account_id, total_reviews_written: 0, awarded_count: 0 }
  }
}

impl Document for ReviewBonusCounter {
  const COLLECTION: &'static str = "review_bonus_counters";

  fn validate(&self) -> Result<(), String> {
    let entitled = entitled_awards(self.total_reviews_written);
    if self.awarded_count > entitled {
      return Err(format!(
        "awarded {} bonuses for {} reviews",
        self.awarded_count, self.total_reviews_written
      ));
    }
    Ok(())
  }
}

/// Bonuses an account has earned after `total_reviews` approvals.
pub fn entitled_awards(total_reviews: u32) -> u32 {
  (total_reviews / REVIEWS_PER_AWARD).min(MAX_AWARDS)
}

/// Idempotency key for the `index`-th bonus (1-based).
pub fn bonus_key(account_id: &AccountId, index: u32) -> String {
  format!("{account_id}:{index}")
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewRewardOutcome {
  pub total_reviews_written: u32,
  pub awarded_count:         u32,
  /// 1-based award indices credited by this approval.
  pub newly_awarded:         Vec<u32>,
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

pub struct RewardEligibilityEvaluator<S> {
  coordinator: ConsistencyCoordinator<S>,
  ledger:      CreditLedger<S>,
}

impl<S> Clone for RewardEligibilityEvaluator<S> {
  fn clone(&self) -> Self {
    Self {
      coordinator: self.coordinator.clone(),
      ledger:      self.ledger.clone(),
    }
  }
}

impl<S: DocumentStore> RewardEligibilityEvaluator<S> {
  pub fn new(coordinator: ConsistencyCoordinator<S>, ledger: CreditLedger<S>) -> Self {
    Self { coordinator, ledger }
  }

  fn key(account_id: &AccountId) -> DocumentKey {
    ReviewBonusCounter::key_for(account_id.as_str())
  }

  /// Count one approved review and credit any bonus it unlocks.
  ///
  /// Must only be called by the server-side moderation workflow; the client
  /// cannot be trusted to report an approval.
  pub async fn on_review_approved(
    &self,
    account_id: &AccountId,
  ) -> Result<ReviewRewardOutcome> {
    let ledger = &self.ledger;

    let outcome = self
      .coordinator
      .run_transactional_with(
        Self::key(account_id),
        |current: Option<&ReviewBonusCounter>| {
          let mut next = current
            .cloned()
            .unwrap_or_else(|| ReviewBonusCounter::new(account_id.clone()));
          next.total_reviews_written =
            next.total_reviews_written.saturating_add(1);

          let entitled = entitled_awards(next.total_reviews_written);
          let newly_awarded: Vec<u32> =
            (next.awarded_count + 1..=entitled).collect();
          next.awarded_count = next.awarded_count.max(entitled);

          let outcome = ReviewRewardOutcome {
            total_reviews_written: next.total_reviews_written,
            awarded_count: next.awarded_count,
            newly_awarded,
          };
          Ok(Transition::write(next, outcome))
        },
        move |outcome: &ReviewRewardOutcome| {
          let indices = outcome.newly_awarded.clone();
          async move {
            for index in indices {
              ledger
                .credit(
                  account_id,
                  1,
                  GrantSource::ReviewBonus,
                  bonus_key(account_id, index),
                )
                .await?;
            }
            Ok::<_, Error>(())
          }
        },
      )
      .await?;

    if !outcome.newly_awarded.is_empty() {
      tracing::info!(
        %account_id,
        awarded = outcome.awarded_count,
        "review bonus earned"
      );
    }
    Ok(outcome)
  }

  pub async fn counter(
    &self,
    account_id: &AccountId,
  ) -> Result<Option<ReviewBonusCounter>> {
    Ok(
      self
        .coordinator
        .read::<ReviewBonusCounter>(&Self::key(account_id))
        .await?
        .map(|v| v.doc),
    )
  }
}
