//! `carematch`: operator tool for the credit ledger, review bonuses, profile
//! ratings and subscription windows.
//!
//! # Usage
//!
//! ```
//! carematch open-account parent-17 --role parent
//! carematch credit parent-17 5 --key refund-2291
//! carematch approve-review parent-17
//! carematch --config /etc/carematch.toml audit parent-17
//! ```
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use carematch_core::{
  account::{GrantSource, Role},
  ids::{AccountId, EntityId},
  services::Services,
  subscription::Plan,
};
use carematch_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "CareMatch ledger and rating operator tool")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "carematch.toml", env = "CAREMATCH_CONFIG")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create an account (no-op if it exists) and apply the signup grant.
  OpenAccount {
    account: String,
    #[arg(long, default_value = "parent")]
    role:    Role,
  },
  /// Credit tokens under an idempotency key.
  Credit {
    account: String,
    amount:  i64,
    /// Re-running with the same key is a no-op.
    #[arg(long)]
    key:     String,
    #[arg(long, default_value = "admin_adjustment")]
    source:  GrantSource,
  },
  /// Spend tokens.
  Debit { account: String, amount: i64 },
  Balance { account: String },
  /// Compare the stored balance with the grant and debit logs.
  Audit { account: String },
  /// List an account's grants, oldest first.
  Grants { account: String },
  /// Record one moderator-approved review and credit any bonus it earns.
  ApproveReview { account: String },
  /// Show an account's review bonus counter.
  Bonuses { account: String },
  /// Create an unrated therapist profile aggregate.
  RegisterEntity { entity: String },
  /// Fold an approved star rating into a profile.
  Rate {
    entity: String,
    stars:  u8,
    #[arg(long)]
    rater:  String,
  },
  /// Show a profile's aggregate rating.
  Entity { entity: String },
  /// List the rating events recorded for a profile.
  Ratings { entity: String },
  /// Start a subscription window after a verified payment.
  Purchase {
    account:    String,
    #[arg(long)]
    plan:       String,
    #[arg(long)]
    months:     u32,
    #[arg(long)]
    interviews: u32,
    /// Reference of the confirmed payment; replays are no-ops.
    #[arg(long)]
    payment:    String,
  },
  /// Take interviews from the subscription window.
  Consume {
    account: String,
    #[arg(default_value_t = 1)]
    n:       u32,
  },
  /// Show the subscription window and whether it is active.
  Status { account: String },
  /// Charge one interview, subscription first, then tokens.
  StartInterview { account: String },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = AppConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let services = Services::new(Arc::new(store), &cfg.core());

  run(&services, cli.command).await
}

async fn run(services: &Services<SqliteStore>, command: Command) -> anyhow::Result<()> {
  match command {
    Command::OpenAccount { account, role } => {
      print(&services.ledger.open_account(&AccountId(account), role).await?)
    }
    Command::Credit { account, amount, key, source } => {
      print(&services.ledger.credit(&AccountId(account), amount, source, key).await?)
    }
    Command::Debit { account, amount } => {
      let account_id = AccountId(account);
      let token_balance = services.ledger.debit(&account_id, amount).await?;
      print(&Balance { account_id, token_balance })
    }
    Command::Balance { account } => {
      let account_id = AccountId(account);
      let token_balance = services.ledger.get_balance(&account_id).await?;
      print(&Balance { account_id, token_balance })
    }
    Command::Audit { account } => print(&services.ledger.audit(&AccountId(account)).await?),
    Command::Grants { account } => print(&services.ledger.grants(&AccountId(account)).await?),
    Command::ApproveReview { account } => {
      print(&services.rewards.on_review_approved(&AccountId(account)).await?)
    }
    Command::Bonuses { account } => {
      print(&services.rewards.counter(&AccountId(account)).await?)
    }
    Command::RegisterEntity { entity } => {
      print(&services.ratings.register_entity(&EntityId(entity)).await?)
    }
    Command::Rate { entity, stars, rater } => print(
      &services
        .ratings
        .record_rating(&EntityId(entity), &AccountId(rater), stars)
        .await?,
    ),
    Command::Entity { entity } => {
      print(&services.ratings.get_entity(&EntityId(entity)).await?)
    }
    Command::Ratings { entity } => {
      print(&services.ratings.rating_events(&EntityId(entity)).await?)
    }
    Command::Purchase { account, plan, months, interviews, payment } => {
      let plan = Plan { plan_id: plan, months, total_interviews: interviews };
      print(
        &services
          .subscriptions
          .purchase(&AccountId(account), &plan, payment)
          .await?,
      )
    }
    Command::Consume { account, n } => {
      let account_id = AccountId(account);
      let remaining_interviews = services.subscriptions.consume(&account_id, n).await?;
      print(&serde_json::json!({
        "account_id": account_id,
        "remaining_interviews": remaining_interviews,
      }))
    }
    Command::Status { account } => {
      let account_id = AccountId(account);
      let window = services.subscriptions.window(&account_id).await?;
      let active = services.subscriptions.is_active(&account_id).await?;
      print(&serde_json::json!({ "active": active, "window": window }))
    }
    Command::StartInterview { account } => {
      print(&services.gate.start_interview(&AccountId(account)).await?)
    }
  }
}

#[derive(Serialize)]
struct Balance {
  account_id:    AccountId,
  token_balance: i64,
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
