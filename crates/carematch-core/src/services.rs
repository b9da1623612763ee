//! [`Services`]: every core component wired to one store.

use std::sync::Arc;

use crate::{
  config::CoreConfig,
  coordinator::ConsistencyCoordinator,
  gate::InterviewGate,
  ledger::CreditLedger,
  rating::AggregateRatingUpdater,
  reward::RewardEligibilityEvaluator,
  store::DocumentStore,
  subscription::SubscriptionEntitlementTracker,
};

pub struct Services<S> {
  pub ledger:        CreditLedger<S>,
  pub rewards:       RewardEligibilityEvaluator<S>,
  pub ratings:       AggregateRatingUpdater<S>,
  pub subscriptions: SubscriptionEntitlementTracker<S>,
  pub gate:          InterviewGate<S>,
}

impl<S: DocumentStore> Services<S> {
  pub fn new(store: Arc<S>, config: &CoreConfig) -> Self {
    let coordinator = ConsistencyCoordinator::new(store, config.coordinator.clone());
    let ledger = CreditLedger::new(coordinator.clone(), config.ledger.clone());
    let subscriptions = SubscriptionEntitlementTracker::new(
      coordinator.clone(),
      config.subscription.clone(),
    );

    Self {
      rewards: RewardEligibilityEvaluator::new(coordinator.clone(), ledger.clone()),
      ratings: AggregateRatingUpdater::new(coordinator),
      gate: InterviewGate::new(ledger.clone(), subscriptions.clone()),
      ledger,
      subscriptions,
    }
  }
}
