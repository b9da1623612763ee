//! SQL schema for the carematch SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Mutable documents. Every write bumps `version` by one and is conditional on
-- the version the writer read.
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT    NOT NULL,
    doc_id      TEXT    NOT NULL,
    version     INTEGER NOT NULL CHECK (version > 0),
    body_json   TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL,   -- ISO 8601 UTC
    PRIMARY KEY (collection, doc_id)
);

-- The tables below are strictly append-only.
-- No UPDATE or DELETE is ever issued against them.
CREATE TABLE IF NOT EXISTS grants (
    grant_id        TEXT    PRIMARY KEY,
    account_id      TEXT    NOT NULL,
    source          TEXT    NOT NULL,   -- 'signup_default' | 'subscription_purchase' | 'review_bonus' | 'admin_adjustment'
    amount          INTEGER NOT NULL CHECK (amount > 0),
    idempotency_key TEXT    NOT NULL,
    created_at      TEXT    NOT NULL,
    UNIQUE (account_id, idempotency_key)
);

CREATE TABLE IF NOT EXISTS debits (
    debit_id    TEXT    PRIMARY KEY,
    account_id  TEXT    NOT NULL,
    amount      INTEGER NOT NULL CHECK (amount > 0),
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS rating_events (
    event_id    TEXT    PRIMARY KEY,
    entity_id   TEXT    NOT NULL,
    rater_id    TEXT    NOT NULL,
    stars       INTEGER NOT NULL CHECK (stars BETWEEN 1 AND 5),
    created_at  TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS grants_account_idx        ON grants(account_id, created_at);
CREATE INDEX IF NOT EXISTS debits_account_idx        ON debits(account_id, created_at);
CREATE INDEX IF NOT EXISTS rating_events_entity_idx  ON rating_events(entity_id, created_at);

PRAGMA user_version = 1;
";
