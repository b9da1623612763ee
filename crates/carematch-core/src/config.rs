//! Aggregate configuration for the core services.

use serde::{Deserialize, Serialize};

use crate::{
  coordinator::CoordinatorConfig, ledger::LedgerConfig,
  subscription::SubscriptionConfig,
};

/// Every tunable of the core, each section defaulting independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
  pub coordinator:  CoordinatorConfig,
  pub ledger:       LedgerConfig,
  pub subscription: SubscriptionConfig,
}
