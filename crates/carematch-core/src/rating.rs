//! [`AggregateRatingUpdater`]: folds approved ratings into a profile's running
//! average and count.
//!
//! Averages are kept in tenths of a star so the one-decimal rounding is exact.
//! The fold deliberately starts from the already-rounded average rather than
//! an exact running sum; that is how profile averages have always been
//! computed and changing it would shift published ratings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use uuid::Uuid;

use crate::{
  Error, Result,
  coordinator::{ConsistencyCoordinator, Transition},
  document::{Document, DocumentKey},
  ids::{AccountId, EntityId},
  store::{DocumentStore, LedgerRecord},
};

// ─── Rating value ────────────────────────────────────────────────────────────

/// An average between 1.0 and 5.0 with exactly one decimal place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rating(u8);

impl Rating {
  pub const MIN: Rating = Rating(10);
  pub const MAX: Rating = Rating(50);

  /// Build from tenths of a star, clamped into range.
  pub fn clamped(tenths: u64) -> Self {
    let lo = u64::from(Self::MIN.0);
    let hi = u64::from(Self::MAX.0);
    // In range after the clamp, so the narrowing cannot truncate.
    Self(tenths.clamp(lo, hi) as u8)
  }

  pub fn tenths(self) -> u8 { self.0 }

  pub fn as_f64(self) -> f64 { f64::from(self.0) / 10.0 }
}

impl TryFrom<f64> for Rating {
  type Error = String;

  fn try_from(value: f64) -> Result<Self, Self::Error> {
    let scaled = value * 10.0;
    let tenths = scaled.round();
    if (scaled - tenths).abs() > 1e-6 {
      return Err(format!("{value} has more than one decimal place"));
    }
    if !(f64::from(Self::MIN.0)..=f64::from(Self::MAX.0)).contains(&tenths) {
      return Err(format!("{value} is outside 1.0..=5.0"));
    }
    Ok(Self(tenths as u8))
  }
}

impl fmt::Display for Rating {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.0 / 10, self.0 % 10)
  }
}

impl Serialize for Rating {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(self.as_f64())
  }
}

impl<'de> Deserialize<'de> for Rating {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Rating::try_from(value).map_err(de::Error::custom)
  }
}

/// `round1((average * count + stars) / (count + 1))`, rounding half up, then
/// clamped to the valid range.
pub fn fold_rating(average: Option<Rating>, count: u32, stars: u8) -> Rating {
  let prior = u64::from(average.map_or(0, Rating::tenths)) * u64::from(count);
  let total = prior + u64::from(stars) * 10;
  let n = u64::from(count) + 1;
  Rating::clamped((2 * total + n) / (2 * n))
}

// ─── Documents and events ────────────────────────────────────────────────────

/// A therapist profile's aggregate rating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatedEntity {
  pub entity_id:      EntityId,
  /// Absent until the first rating arrives.
  #[serde(default)]
  pub rating_average: Option<Rating>,
  #[serde(default)]
  pub rating_count:   u32,
}

impl RatedEntity {
  pub fn new(entity_id: EntityId) -> Self {
    Self { entity_id, rating_average: None, rating_count: 0 }
  }
}

impl Document for RatedEntity {
  const COLLECTION: &'static str = "rated_entities";

  fn validate(&self) -> Result<(), String> {
    match (self.rating_count, self.rating_average) {
      (0, Some(avg)) => Err(format!("average {avg} with no ratings")),
      (n, None) if n > 0 => Err(format!("{n} ratings with no average")),
      _ => Ok(()),
    }
  }
}

/// One approved review's star rating. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEvent {
  pub event_id:   Uuid,
  pub entity_id:  EntityId,
  pub rater_id:   AccountId,
  pub stars:      u8,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RatingOutcome {
  Applied {
    event:  RatingEvent,
    entity: RatedEntity,
  },
  /// The profile document does not exist. The event was stored; the
  /// aggregate was not touched.
  EntityMissing { event: RatingEvent },
}

// ─── Updater ─────────────────────────────────────────────────────────────────

pub struct AggregateRatingUpdater<S> {
  coordinator: ConsistencyCoordinator<S>,
}

impl<S> Clone for AggregateRatingUpdater<S> {
  fn clone(&self) -> Self { Self { coordinator: self.coordinator.clone() } }
}

impl<S: DocumentStore> AggregateRatingUpdater<S> {
  pub fn new(coordinator: ConsistencyCoordinator<S>) -> Self { Self { coordinator } }

  fn key(entity_id: &EntityId) -> DocumentKey {
    RatedEntity::key_for(entity_id.as_str())
  }

  /// Create an unrated profile aggregate if none exists.
  pub async fn register_entity(&self, entity_id: &EntityId) -> Result<RatedEntity> {
    self
      .coordinator
      .run_transactional(Self::key(entity_id), |current: Option<&RatedEntity>| {
        Ok(match current {
          Some(existing) => Transition::Keep(existing.clone()),
          None => {
            let entity = RatedEntity::new(entity_id.clone());
            Transition::write(entity.clone(), entity)
          }
        })
      })
      .await
  }

  pub async fn record_rating(
    &self,
    entity_id: &EntityId,
    rater_id: &AccountId,
    stars: u8,
  ) -> Result<RatingOutcome> {
    if !(1..=5).contains(&stars) {
      return Err(Error::InvalidRating(stars));
    }

    let event = RatingEvent {
      event_id: Uuid::new_v4(),
      entity_id: entity_id.clone(),
      rater_id: rater_id.clone(),
      stars,
      created_at: Utc::now(),
    };

    let updated = self
      .coordinator
      .run_transactional(Self::key(entity_id), |current: Option<&RatedEntity>| {
        let Some(entity) = current else {
          return Ok(Transition::Keep(None));
        };

        let mut next = entity.clone();
        next.rating_average =
          Some(fold_rating(entity.rating_average, entity.rating_count, stars));
        next.rating_count = entity.rating_count.saturating_add(1);

        Ok(
          Transition::write(next.clone(), Some(next))
            .append(LedgerRecord::RatingEvent(event.clone())),
        )
      })
      .await?;

    match updated {
      Some(entity) => {
        tracing::debug!(
          %entity_id,
          count = entity.rating_count,
          average = ?entity.rating_average.map(Rating::as_f64),
          "rating applied"
        );
        Ok(RatingOutcome::Applied { event, entity })
      }
      None => {
        tracing::warn!(%entity_id, "rated entity missing, storing event only");
        self
          .coordinator
          .store()
          .append_immutable(LedgerRecord::RatingEvent(event.clone()))
          .await
          .map_err(Error::store)?;
        Ok(RatingOutcome::EntityMissing { event })
      }
    }
  }

  pub async fn get_entity(&self, entity_id: &EntityId) -> Result<Option<RatedEntity>> {
    Ok(
      self
        .coordinator
        .read::<RatedEntity>(&Self::key(entity_id))
        .await?
        .map(|v| v.doc),
    )
  }

  pub async fn rating_events(&self, entity_id: &EntityId) -> Result<Vec<RatingEvent>> {
    self
      .coordinator
      .store()
      .list_rating_events(entity_id.clone())
      .await
      .map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn r(tenths: u8) -> Option<Rating> { Some(Rating(tenths)) }

  #[test]
  fn first_rating_is_the_star_value() {
    assert_eq!(fold_rating(None, 0, 4), Rating(40));
    assert_eq!(fold_rating(None, 0, 1), Rating::MIN);
  }

  #[test]
  fn concurrent_pair_converges_in_either_order() {
    // 4.0 over 2 ratings, then a 5 and a 3.
    let five_first = fold_rating(Some(fold_rating(r(40), 2, 5)), 3, 3);
    let three_first = fold_rating(Some(fold_rating(r(40), 2, 3)), 3, 5);
    assert_eq!(fold_rating(r(40), 2, 5), Rating(43));
    assert_eq!(fold_rating(r(40), 2, 3), Rating(37));
    assert_eq!(five_first, Rating(40));
    assert_eq!(three_first, Rating(40));
  }

  #[test]
  fn halves_round_up() {
    // (4.5 * 1 + 5) / 2 = 4.75 -> 4.8
    assert_eq!(fold_rating(r(45), 1, 5), Rating(48));
    // (1.0 * 1 + 2) / 2 = 1.5 exactly
    assert_eq!(fold_rating(r(10), 1, 2), Rating(15));
    // (4.1 * 1 + 4) / 2 = 4.05 -> 4.1
    assert_eq!(fold_rating(r(41), 1, 4), Rating(41));
  }

  #[test]
  fn result_stays_in_bounds() {
    assert_eq!(fold_rating(r(50), 1000, 5), Rating::MAX);
    assert_eq!(fold_rating(r(10), 1000, 1), Rating::MIN);
  }

  #[test]
  fn serde_uses_one_decimal_floats() {
    assert_eq!(serde_json::to_string(&Rating(43)).unwrap(), "4.3");
    let parsed: Rating = serde_json::from_str("3.7").unwrap();
    assert_eq!(parsed, Rating(37));
    assert!(serde_json::from_str::<Rating>("3.75").is_err());
    assert!(serde_json::from_str::<Rating>("0.5").is_err());
    assert!(serde_json::from_str::<Rating>("5.1").is_err());
  }

  #[test]
  fn count_without_average_is_invalid() {
    let entity = RatedEntity {
      entity_id:      "t1".into(),
      rating_average: None,
      rating_count:   3,
    };
    assert!(entity.validate().is_err());
  }

  #[test]
  fn display_has_one_decimal() {
    assert_eq!(Rating(40).to_string(), "4.0");
    assert_eq!(Rating(37).to_string(), "3.7");
  }
}
