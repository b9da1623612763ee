//! Identifier newtypes.
//!
//! Account and profile ids are issued by the external auth provider as opaque
//! strings; they are never generated here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The id of a parent, therapist or admin account.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub String);

/// The id of a rated therapist profile.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl AccountId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl EntityId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for AccountId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for AccountId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<&str> for EntityId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}
