//! [`InterviewGate`]: the one entry point for starting a chat or interview.
//!
//! Draws from the subscription window while it is live and has interviews
//! left, otherwise from the ledger balance. Each draw is its own single
//! document transaction; nothing spans both counters.

use chrono::Utc;
use serde::Serialize;

use crate::{
  Error, Result,
  ids::AccountId,
  ledger::CreditLedger,
  store::DocumentStore,
  subscription::SubscriptionEntitlementTracker,
};

/// Which counter paid for an interview, and what it has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "charged", rename_all = "snake_case")]
pub enum InterviewCharge {
  Subscription { remaining_interviews: u32 },
  Ledger { token_balance: i64 },
}

pub struct InterviewGate<S> {
  ledger:        CreditLedger<S>,
  subscriptions: SubscriptionEntitlementTracker<S>,
}

impl<S> Clone for InterviewGate<S> {
  fn clone(&self) -> Self {
    Self {
      ledger:        self.ledger.clone(),
      subscriptions: self.subscriptions.clone(),
    }
  }
}

impl<S: DocumentStore> InterviewGate<S> {
  pub fn new(
    ledger: CreditLedger<S>,
    subscriptions: SubscriptionEntitlementTracker<S>,
  ) -> Self {
    Self { ledger, subscriptions }
  }

  /// Charge one interview to `account_id`.
  pub async fn start_interview(&self, account_id: &AccountId) -> Result<InterviewCharge> {
    let window = self.subscriptions.window(account_id).await?;
    let usable = window
      .is_some_and(|w| w.is_active_at(Utc::now()) && w.remaining_interviews > 0);

    if usable {
      match self.subscriptions.consume(account_id, 1).await {
        Ok(remaining_interviews) => {
          return Ok(InterviewCharge::Subscription { remaining_interviews });
        }
        // Another session took the last one between the read and the write.
        Err(Error::InsufficientBalance { .. }) => {
          tracing::debug!(%account_id, "subscription drained, using token balance");
        }
        Err(err) => return Err(err),
      }
    }

    let token_balance = self.ledger.debit(account_id, 1).await?;
    Ok(InterviewCharge::Ledger { token_balance })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    account::{GrantSource, Role},
    coordinator::{ConsistencyCoordinator, CoordinatorConfig},
    ledger::LedgerConfig,
    subscription::{Plan, SubscriptionConfig, SubscriptionWindow},
    testing::MemoryStore,
  };

  #[tokio::test]
  async fn window_drained_after_the_check_falls_back_to_tokens() {
    let store = Arc::new(MemoryStore::default());
    let coordinator =
      ConsistencyCoordinator::new(store.clone(), CoordinatorConfig::default());
    let ledger = CreditLedger::new(coordinator.clone(), LedgerConfig::default());
    let subscriptions =
      SubscriptionEntitlementTracker::new(coordinator, SubscriptionConfig::default());
    let gate = InterviewGate::new(ledger.clone(), subscriptions.clone());

    let id = AccountId::new("p1");
    ledger.open_account(&id, Role::Parent).await.unwrap();
    ledger
      .credit(&id, 1, GrantSource::AdminAdjustment, "goodwill")
      .await
      .unwrap();
    let plan = Plan { plan_id: "1m".into(), months: 1, total_interviews: 1 };
    subscriptions.purchase(&id, &plan, "pay-1").await.unwrap();

    // Another session takes the last interview right after the gate looks.
    store.after_read(1, |state| {
      state.update::<SubscriptionWindow>("p1", |w| w.remaining_interviews = 0);
    });

    let charge = gate.start_interview(&id).await.unwrap();
    assert_eq!(charge, InterviewCharge::Ledger { token_balance: 0 });

    let window = subscriptions.window(&id).await.unwrap().unwrap();
    assert_eq!(window.remaining_interviews, 0);
    assert_eq!(ledger.get_balance(&id).await.unwrap(), 0);
  }
}
