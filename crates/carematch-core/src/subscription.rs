//! [`SubscriptionEntitlementTracker`]: plan windows and their interview
//! allotment.
//!
//! The allotment is a second interview counter alongside the ledger balance.
//! [`crate::gate::InterviewGate`] is the single place that decides which one a
//! new interview draws from.
//!
//! Renewal semantics are unsettled. Marketing copy says unused interviews
//! carry over; the payment handler has always overwritten them. Both are
//! available through [`CarryoverPolicy`] and the default keeps the handler's
//! behaviour.

use std::collections::BTreeSet;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  coordinator::{ConsistencyCoordinator, Transition},
  document::{Document, DocumentKey},
  ids::AccountId,
  store::DocumentStore,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// What happens to a live window's unused interviews when a new plan is
/// purchased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarryoverPolicy {
  /// The new plan's allotment replaces whatever was left.
  #[default]
  Overwrite,
  /// Unused interviews from a still-active window are added to the new plan.
  Additive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
  pub carryover: CarryoverPolicy,
}

// ─── Plan ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub plan_id:          String,
  /// Length of the window in calendar months.
  pub months:           u32,
  pub total_interviews: u32,
}

// ─── Window document ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionWindow {
  pub account_id:                AccountId,
  pub plan_id:                   String,
  pub start_at:                  DateTime<Utc>,
  pub expiry_at:                 DateTime<Utc>,
  pub total_interview_allotment: u32,
  pub remaining_interviews:      u32,
  /// Payment references already applied to this account's windows. Carried
  /// across renewals so a redelivered confirmation is recognised.
  #[serde(default)]
  pub payment_refs:              BTreeSet<String>,
}

impl SubscriptionWindow {
  pub fn is_active_at(&self, now: DateTime<Utc>) -> bool { now < self.expiry_at }
}

impl Document for SubscriptionWindow {
  const COLLECTION: &'static str = "subscription_windows";

  fn validate(&self) -> Result<(), String> {
    if self.remaining_interviews > self.total_interview_allotment {
      return Err(format!(
        "{} interviews remaining of {}",
        self.remaining_interviews, self.total_interview_allotment
      ));
    }
    if self.expiry_at <= self.start_at {
      return Err("window expires before it starts".to_owned());
    }
    Ok(())
  }
}

/// The window produced by buying `plan` at `now` on top of `prior`.
pub fn renew(
  account_id: &AccountId,
  prior: Option<&SubscriptionWindow>,
  plan: &Plan,
  policy: CarryoverPolicy,
  now: DateTime<Utc>,
) -> Result<SubscriptionWindow> {
  if plan.months == 0 {
    return Err(Error::InvalidPlan(format!(
      "plan {} has a zero-month term",
      plan.plan_id
    )));
  }
  let expiry_at = now
    .checked_add_months(Months::new(plan.months))
    .ok_or_else(|| Error::InvalidPlan(format!("plan {} term overflows", plan.plan_id)))?;

  let carried = match (policy, prior) {
    (CarryoverPolicy::Additive, Some(prior)) if prior.is_active_at(now) => {
      prior.remaining_interviews
    }
    _ => 0,
  };
  let allotment = plan.total_interviews.checked_add(carried).ok_or_else(|| {
    Error::InvalidPlan(format!("plan {} allotment overflows", plan.plan_id))
  })?;

  Ok(SubscriptionWindow {
    account_id: account_id.clone(),
    plan_id: plan.plan_id.clone(),
    start_at: now,
    expiry_at,
    total_interview_allotment: allotment,
    remaining_interviews: allotment,
    payment_refs: prior.map(|w| w.payment_refs.clone()).unwrap_or_default(),
  })
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

pub struct SubscriptionEntitlementTracker<S> {
  coordinator: ConsistencyCoordinator<S>,
  config:      SubscriptionConfig,
}

impl<S> Clone for SubscriptionEntitlementTracker<S> {
  fn clone(&self) -> Self {
    Self {
      coordinator: self.coordinator.clone(),
      config:      self.config.clone(),
    }
  }
}

impl<S: DocumentStore> SubscriptionEntitlementTracker<S> {
  pub fn new(coordinator: ConsistencyCoordinator<S>, config: SubscriptionConfig) -> Self {
    Self { coordinator, config }
  }

  fn key(account_id: &AccountId) -> DocumentKey {
    SubscriptionWindow::key_for(account_id.as_str())
  }

  /// Start a new window for `plan`, replacing any existing one. Called by the
  /// payment confirmation workflow once a transfer is verified.
  ///
  /// `payment_ref` identifies the confirmed payment. A reference that was
  /// already applied returns the current window unchanged.
  pub async fn purchase(
    &self,
    account_id: &AccountId,
    plan: &Plan,
    payment_ref: impl Into<String>,
  ) -> Result<SubscriptionWindow> {
    let policy = self.config.carryover;
    let payment_ref = payment_ref.into();

    let (window, discarded, replayed) = self
      .coordinator
      .run_transactional(Self::key(account_id), |current: Option<&SubscriptionWindow>| {
        if let Some(existing) = current
          && existing.payment_refs.contains(&payment_ref)
        {
          return Ok(Transition::Keep((existing.clone(), 0, true)));
        }

        let now = Utc::now();
        let mut window = renew(account_id, current, plan, policy, now)?;
        window.payment_refs.insert(payment_ref.clone());
        let discarded = match (policy, current) {
          (CarryoverPolicy::Overwrite, Some(prior)) if prior.is_active_at(now) => {
            prior.remaining_interviews
          }
          _ => 0,
        };
        Ok(Transition::write(window.clone(), (window, discarded, false)))
      })
      .await?;

    if replayed {
      tracing::debug!(%account_id, %payment_ref, "payment already applied");
      return Ok(window);
    }

    if discarded > 0 {
      tracing::warn!(
        %account_id,
        discarded,
        "unused interviews overwritten by renewal"
      );
    }
    tracing::info!(
      %account_id,
      plan = %plan.plan_id,
      allotment = window.total_interview_allotment,
      expiry = %window.expiry_at,
      "subscription window started"
    );
    Ok(window)
  }

  /// Take `n` interviews from the window. Returns what is left.
  pub async fn consume(&self, account_id: &AccountId, n: u32) -> Result<u32> {
    if n == 0 {
      return Err(Error::InvalidAmount(0));
    }
    let key = Self::key(account_id);

    self
      .coordinator
      .run_transactional(key.clone(), |current: Option<&SubscriptionWindow>| {
        let window = current.ok_or_else(|| Error::NotFound(key.clone()))?;
        if window.remaining_interviews < n {
          return Err(Error::InsufficientBalance {
            available: i64::from(window.remaining_interviews),
            requested: i64::from(n),
          });
        }
        let mut next = window.clone();
        next.remaining_interviews -= n;
        let remaining = next.remaining_interviews;
        Ok(Transition::write(next, remaining))
      })
      .await
  }

  pub async fn is_active(&self, account_id: &AccountId) -> Result<bool> {
    Ok(
      self
        .window(account_id)
        .await?
        .is_some_and(|w| w.is_active_at(Utc::now())),
    )
  }

  pub async fn window(
    &self,
    account_id: &AccountId,
  ) -> Result<Option<SubscriptionWindow>> {
    Ok(
      self
        .coordinator
        .read::<SubscriptionWindow>(&Self::key(account_id))
        .await?
        .map(|v| v.doc),
    )
  }
}
