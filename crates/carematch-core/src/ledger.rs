//! [`CreditLedger`]: the single owner of every account's token balance.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  account::{Account, Debit, Grant, GrantSource, Role},
  coordinator::{ConsistencyCoordinator, Transition},
  document::{Document, DocumentKey},
  ids::AccountId,
  store::{DocumentStore, LedgerRecord},
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
  /// Tokens granted once when an account is opened. Zero disables the grant.
  pub signup_default_grant: i64,
}

// ─── Audit ───────────────────────────────────────────────────────────────────

/// The materialised balance compared against a replay of the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
  pub account_id:    AccountId,
  pub total_granted: i64,
  pub total_debited: i64,
  pub balance:       i64,
  pub consistent:    bool,
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

enum Applied {
  Fresh(Grant),
  Replayed(Uuid),
}

pub struct CreditLedger<S> {
  coordinator: ConsistencyCoordinator<S>,
  config:      LedgerConfig,
}

impl<S> Clone for CreditLedger<S> {
  fn clone(&self) -> Self {
    Self {
      coordinator: self.coordinator.clone(),
      config:      self.config.clone(),
    }
  }
}

/// Idempotency key of the one-off signup grant.
pub fn signup_key(account_id: &AccountId) -> String {
  format!("{account_id}:signup")
}

/// The source that owns `key` for this account, if it has the shape of a
/// key the ledger or the reward evaluator mints itself.
pub fn reserved_source(account_id: &AccountId, key: &str) -> Option<GrantSource> {
  let suffix = key.strip_prefix(account_id.as_str())?.strip_prefix(':')?;
  if suffix == "signup" {
    Some(GrantSource::SignupDefault)
  } else if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
    Some(GrantSource::ReviewBonus)
  } else {
    None
  }
}

impl<S: DocumentStore> CreditLedger<S> {
  pub fn new(coordinator: ConsistencyCoordinator<S>, config: LedgerConfig) -> Self {
    Self { coordinator, config }
  }

  fn key(account_id: &AccountId) -> DocumentKey {
    Account::key_for(account_id.as_str())
  }

  /// Create the account if it does not exist, then apply the signup default
  /// grant. Safe to call repeatedly; the role of an existing account is left
  /// as it is.
  pub async fn open_account(
    &self,
    account_id: &AccountId,
    role: Role,
  ) -> Result<Account> {
    let created = self
      .coordinator
      .run_transactional(Self::key(account_id), |current: Option<&Account>| {
        Ok(match current {
          Some(_) => Transition::Keep(false),
          None => Transition::write(Account::new(account_id.clone(), role), true),
        })
      })
      .await?;

    if created {
      tracing::info!(%account_id, %role, "account opened");
    }

    if self.config.signup_default_grant > 0 {
      self
        .credit(
          account_id,
          self.config.signup_default_grant,
          GrantSource::SignupDefault,
          signup_key(account_id),
        )
        .await?;
    }

    self
      .account(account_id)
      .await?
      .ok_or_else(|| Error::NotFound(Self::key(account_id)))
  }

  pub async fn account(&self, account_id: &AccountId) -> Result<Option<Account>> {
    Ok(
      self
        .coordinator
        .read::<Account>(&Self::key(account_id))
        .await?
        .map(|v| v.doc),
    )
  }

  /// Add `amount` tokens to the account, exactly once per `idempotency_key`.
  ///
  /// A replayed key returns the grant created by the first call and leaves
  /// the balance alone. Keys shaped like signup or review bonus keys are
  /// refused for any other source.
  pub async fn credit(
    &self,
    account_id: &AccountId,
    amount: i64,
    source: GrantSource,
    idempotency_key: impl Into<String>,
  ) -> Result<Grant> {
    if amount <= 0 {
      return Err(Error::InvalidAmount(amount));
    }
    let idempotency_key = idempotency_key.into();
    if let Some(owner) = reserved_source(account_id, &idempotency_key)
      && owner != source
    {
      return Err(Error::ReservedKey { key: idempotency_key, owner });
    }
    let key = Self::key(account_id);

    let applied = self
      .coordinator
      .run_transactional(key.clone(), |current: Option<&Account>| {
        let account = current.ok_or_else(|| Error::NotFound(key.clone()))?;
        if let Some(grant_id) = account.applied_grants.get(&idempotency_key) {
          return Ok(Transition::Keep(Applied::Replayed(*grant_id)));
        }

        let grant = Grant {
          grant_id: Uuid::new_v4(),
          account_id: account_id.clone(),
          source,
          amount,
          idempotency_key: idempotency_key.clone(),
          created_at: Utc::now(),
        };

        let mut next = account.clone();
        next.token_balance = next
          .token_balance
          .checked_add(amount)
          .ok_or(Error::InvalidAmount(amount))?;
        next
          .applied_grants
          .insert(idempotency_key.clone(), grant.grant_id);

        Ok(
          Transition::write(next, Applied::Fresh(grant.clone()))
            .append(LedgerRecord::Grant(grant)),
        )
      })
      .await?;

    match applied {
      Applied::Fresh(grant) => {
        tracing::info!(
          %account_id,
          %source,
          amount,
          key = %grant.idempotency_key,
          "grant applied"
        );
        Ok(grant)
      }
      Applied::Replayed(grant_id) => {
        tracing::debug!(%account_id, key = %idempotency_key, "duplicate grant");
        self
          .coordinator
          .store()
          .get_grant(grant_id)
          .await
          .map_err(Error::store)?
          .ok_or_else(|| Error::NotFound(DocumentKey::new("grants", grant_id.to_string())))
      }
    }
  }

  /// Remove `amount` tokens. Fails without touching the balance when it is
  /// short. Returns the new balance.
  pub async fn debit(&self, account_id: &AccountId, amount: i64) -> Result<i64> {
    if amount <= 0 {
      return Err(Error::InvalidAmount(amount));
    }
    let key = Self::key(account_id);

    let balance = self
      .coordinator
      .run_transactional(key.clone(), |current: Option<&Account>| {
        let account = current.ok_or_else(|| Error::NotFound(key.clone()))?;
        if account.token_balance < amount {
          return Err(Error::InsufficientBalance {
            available: account.token_balance,
            requested: amount,
          });
        }

        let mut next = account.clone();
        next.token_balance -= amount;
        let balance = next.token_balance;
        let debit = Debit {
          debit_id: Uuid::new_v4(),
          account_id: account_id.clone(),
          amount,
          created_at: Utc::now(),
        };
        Ok(Transition::write(next, balance).append(LedgerRecord::Debit(debit)))
      })
      .await?;

    tracing::info!(%account_id, amount, balance, "tokens debited");
    Ok(balance)
  }

  pub async fn get_balance(&self, account_id: &AccountId) -> Result<i64> {
    self
      .account(account_id)
      .await?
      .map(|account| account.token_balance)
      .ok_or_else(|| Error::NotFound(Self::key(account_id)))
  }

  /// Grant history, oldest first.
  pub async fn grants(&self, account_id: &AccountId) -> Result<Vec<Grant>> {
    self
      .coordinator
      .store()
      .list_grants(account_id.clone())
      .await
      .map_err(Error::store)
  }

  /// Replay the grant and debit logs and compare with the stored balance.
  ///
  /// The account is read again after the logs; if its version moved, a
  /// write landed in between and the snapshot is taken again.
  pub async fn audit(&self, account_id: &AccountId) -> Result<LedgerAudit> {
    let key = Self::key(account_id);
    let max_attempts = self.coordinator.config().max_attempts.max(1);
    let store = self.coordinator.store();

    for attempt in 1..=max_attempts {
      let before = self
        .coordinator
        .read::<Account>(&key)
        .await?
        .ok_or_else(|| Error::NotFound(key.clone()))?;

      let grants = store
        .list_grants(account_id.clone())
        .await
        .map_err(Error::store)?;
      let debits = store
        .list_debits(account_id.clone())
        .await
        .map_err(Error::store)?;

      let after = self.coordinator.read::<Account>(&key).await?;
      if after.as_ref().map(|v| v.version) != Some(before.version) {
        tracing::debug!(%account_id, attempt, "account moved during audit, rereading");
        continue;
      }

      let balance = before.doc.token_balance;
      let total_granted: i64 = grants.iter().map(|g| g.amount).sum();
      let total_debited: i64 = debits.iter().map(|d| d.amount).sum();

      let consistent = total_granted - total_debited == balance;
      if !consistent {
        tracing::warn!(
          %account_id,
          balance,
          total_granted,
          total_debited,
          "balance does not match ledger"
        );
      }

      return Ok(LedgerAudit {
        account_id: account_id.clone(),
        total_granted,
        total_debited,
        balance,
        consistent,
      });
    }

    Err(Error::ConcurrencyExhausted { key, attempts: max_attempts })
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::BTreeMap, sync::Arc};

  use super::*;
  use crate::{coordinator::CoordinatorConfig, testing::MemoryStore};

  async fn ledger() -> (Arc<MemoryStore>, CreditLedger<MemoryStore>, AccountId) {
    let store = Arc::new(MemoryStore::default());
    let coordinator =
      ConsistencyCoordinator::new(store.clone(), CoordinatorConfig::default());
    let ledger = CreditLedger::new(coordinator, LedgerConfig::default());
    let id = AccountId::new("p1");
    ledger.open_account(&id, Role::Parent).await.unwrap();
    (store, ledger, id)
  }

  #[test]
  fn reserved_keys_match_minted_shapes() {
    let id = AccountId::new("p1");
    assert_eq!(reserved_source(&id, "p1:signup"), Some(GrantSource::SignupDefault));
    assert_eq!(reserved_source(&id, "p1:2"), Some(GrantSource::ReviewBonus));
    assert_eq!(reserved_source(&id, "p1:17"), Some(GrantSource::ReviewBonus));
    assert_eq!(reserved_source(&id, "p1:"), None);
    assert_eq!(reserved_source(&id, "p1:2a"), None);
    assert_eq!(reserved_source(&id, "p12:3"), None);
    assert_eq!(reserved_source(&id, "p2:1"), None);
    assert_eq!(reserved_source(&id, "refund-42"), None);
  }

  #[tokio::test]
  async fn adjustment_cannot_claim_a_bonus_key() {
    let (_, ledger, id) = ledger().await;

    let err = ledger
      .credit(&id, 1, GrantSource::AdminAdjustment, "p1:2")
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      Error::ReservedKey { owner: GrantSource::ReviewBonus, .. }
    ));
    let err = ledger
      .credit(&id, 1, GrantSource::SubscriptionPurchase, "p1:signup")
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      Error::ReservedKey { owner: GrantSource::SignupDefault, .. }
    ));
    assert!(ledger.grants(&id).await.unwrap().is_empty());

    // The bonus itself still lands under its key.
    let bonus = ledger
      .credit(&id, 1, GrantSource::ReviewBonus, "p1:2")
      .await
      .unwrap();
    assert_eq!(bonus.source, GrantSource::ReviewBonus);
    assert_eq!(ledger.get_balance(&id).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn audit_rereads_when_a_credit_lands_mid_snapshot() {
    let (store, ledger, id) = ledger().await;
    ledger
      .credit(&id, 2, GrantSource::AdminAdjustment, "seed")
      .await
      .unwrap();

    // Another session credits one token right after the audit's first read
    // of the account.
    let late = Grant {
      grant_id:        Uuid::new_v4(),
      account_id:      id.clone(),
      source:          GrantSource::AdminAdjustment,
      amount:          1,
      idempotency_key: "late".into(),
      created_at:      Utc::now(),
    };
    store.after_read(1, move |state| {
      state.update::<Account>("p1", |account| {
        account.token_balance += 1;
        account.applied_grants.insert("late".into(), late.grant_id);
      });
      state.grants.push(late);
    });

    let audit = ledger.audit(&id).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.balance, 3);
    assert_eq!(audit.total_granted, 3);
  }

  #[tokio::test]
  async fn audit_of_unknown_account_is_not_found() {
    let (_, ledger, _) = ledger().await;
    let err = ledger.audit(&"ghost".into()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn applied_grants_mirror_the_grant_log() {
    let (_, ledger, id) = ledger().await;
    for key in ["order-1", "order-2", "order-1", "refund-9"] {
      ledger
        .credit(&id, 1, GrantSource::AdminAdjustment, key)
        .await
        .unwrap();
    }

    let account = ledger.account(&id).await.unwrap().unwrap();
    let logged: BTreeMap<String, Uuid> = ledger
      .grants(&id)
      .await
      .unwrap()
      .into_iter()
      .map(|g| (g.idempotency_key, g.grant_id))
      .collect();
    assert_eq!(account.applied_grants, logged);
    assert_eq!(account.applied_grants.len(), 3);
    assert_eq!(account.token_balance, 3);
  }
}
