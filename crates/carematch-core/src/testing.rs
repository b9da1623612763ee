//! In-memory [`DocumentStore`] for unit tests.
//!
//! [`MemoryStore::after_read`] applies a write right after a chosen read,
//! standing in for another session that commits between a service's read and
//! its own write.

use std::{collections::HashMap, convert::Infallible, sync::Mutex};

use uuid::Uuid;

use crate::{
  account::{Debit, Grant},
  document::{Document, DocumentKey, StoredDocument},
  ids::{AccountId, EntityId},
  rating::RatingEvent,
  store::{CommitOutcome, DocumentStore, LedgerRecord},
};

type Interleave = Box<dyn FnOnce(&mut State) + Send>;

#[derive(Default)]
pub(crate) struct State {
  pub docs:   HashMap<DocumentKey, StoredDocument>,
  pub grants: Vec<Grant>,
  pub debits: Vec<Debit>,
  pub events: Vec<RatingEvent>,
}

impl State {
  /// Rewrite a typed document in place and bump its version.
  pub fn update<D: Document>(&mut self, id: &str, f: impl FnOnce(&mut D)) {
    let stored = self
      .docs
      .get_mut(&D::key_for(id))
      .expect("document to update exists");
    let mut doc: D = serde_json::from_value(stored.body.clone()).unwrap();
    f(&mut doc);
    stored.body = serde_json::to_value(&doc).unwrap();
    stored.version += 1;
  }

  fn is_duplicate(&self, record: &LedgerRecord) -> bool {
    match record {
      LedgerRecord::Grant(g) => self.grants.iter().any(|e| {
        e.grant_id == g.grant_id
          || (e.account_id == g.account_id && e.idempotency_key == g.idempotency_key)
      }),
      LedgerRecord::Debit(d) => self.debits.iter().any(|e| e.debit_id == d.debit_id),
      LedgerRecord::RatingEvent(r) => {
        self.events.iter().any(|e| e.event_id == r.event_id)
      }
    }
  }

  fn append(&mut self, record: LedgerRecord) {
    match record {
      LedgerRecord::Grant(g) => self.grants.push(g),
      LedgerRecord::Debit(d) => self.debits.push(d),
      LedgerRecord::RatingEvent(r) => self.events.push(r),
    }
  }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
  state:      Mutex<State>,
  interleave: Mutex<Option<(u32, Interleave)>>,
}

impl MemoryStore {
  /// Run `f` against the stored state immediately after the `nth` next
  /// document read has taken its snapshot.
  pub fn after_read(&self, nth: u32, f: impl FnOnce(&mut State) + Send + 'static) {
    *self.interleave.lock().unwrap() = Some((nth, Box::new(f)));
  }
}

impl DocumentStore for MemoryStore {
  type Error = Infallible;

  async fn get_document(
    &self,
    key: DocumentKey,
  ) -> Result<Option<StoredDocument>, Self::Error> {
    let mut state = self.state.lock().unwrap();
    let found = state.docs.get(&key).cloned();

    let mut interleave = self.interleave.lock().unwrap();
    let due = match interleave.as_mut() {
      Some((remaining, _)) => {
        *remaining -= 1;
        *remaining == 0
      }
      None => false,
    };
    if due && let Some((_, f)) = interleave.take() {
      f(&mut state);
    }
    Ok(found)
  }

  async fn commit(
    &self,
    key: DocumentKey,
    expected_version: Option<u64>,
    body: serde_json::Value,
    appends: Vec<LedgerRecord>,
  ) -> Result<CommitOutcome, Self::Error> {
    let mut state = self.state.lock().unwrap();
    let current = state.docs.get(&key).map(|d| d.version);
    if current != expected_version || appends.iter().any(|r| state.is_duplicate(r)) {
      return Ok(CommitOutcome::Conflict);
    }

    let version = expected_version.unwrap_or(0) + 1;
    state.docs.insert(key, StoredDocument { version, body });
    for record in appends {
      state.append(record);
    }
    Ok(CommitOutcome::Committed { version })
  }

  async fn append_immutable(&self, record: LedgerRecord) -> Result<(), Self::Error> {
    let mut state = self.state.lock().unwrap();
    if !state.is_duplicate(&record) {
      state.append(record);
    }
    Ok(())
  }

  async fn get_grant(&self, grant_id: Uuid) -> Result<Option<Grant>, Self::Error> {
    let state = self.state.lock().unwrap();
    Ok(state.grants.iter().find(|g| g.grant_id == grant_id).cloned())
  }

  async fn list_grants(&self, account_id: AccountId) -> Result<Vec<Grant>, Self::Error> {
    let state = self.state.lock().unwrap();
    Ok(
      state
        .grants
        .iter()
        .filter(|g| g.account_id == account_id)
        .cloned()
        .collect(),
    )
  }

  async fn list_debits(&self, account_id: AccountId) -> Result<Vec<Debit>, Self::Error> {
    let state = self.state.lock().unwrap();
    Ok(
      state
        .debits
        .iter()
        .filter(|d| d.account_id == account_id)
        .cloned()
        .collect(),
    )
  }

  async fn list_rating_events(
    &self,
    entity_id: EntityId,
  ) -> Result<Vec<RatingEvent>, Self::Error> {
    let state = self.state.lock().unwrap();
    Ok(
      state
        .events
        .iter()
        .filter(|e| e.entity_id == entity_id)
        .cloned()
        .collect(),
    )
  }
}
