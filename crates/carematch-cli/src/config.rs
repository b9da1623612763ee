//! Operator configuration: a TOML file overlaid with `CAREMATCH_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use carematch_core::{
  config::CoreConfig, coordinator::CoordinatorConfig, ledger::LedgerConfig,
  subscription::SubscriptionConfig,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub store_path:   PathBuf,
  pub coordinator:  CoordinatorConfig,
  pub ledger:       LedgerConfig,
  pub subscription: SubscriptionConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      store_path:   PathBuf::from("carematch.db"),
      coordinator:  CoordinatorConfig::default(),
      ledger:       LedgerConfig::default(),
      subscription: SubscriptionConfig::default(),
    }
  }
}

impl AppConfig {
  /// Load from `path` (optional) and the environment. Nested keys use a
  /// double underscore, e.g. `CAREMATCH_SUBSCRIPTION__CARRYOVER=additive`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("CAREMATCH")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()
      .context("failed to read config file")?;

    let mut cfg: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn core(&self) -> CoreConfig {
    CoreConfig {
      coordinator:  self.coordinator.clone(),
      ledger:       self.ledger.clone(),
      subscription: self.subscription.clone(),
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
