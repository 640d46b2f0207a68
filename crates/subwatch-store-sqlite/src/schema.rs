//! SQL schema for the subwatch SQLite store.
//!
//! Executed once at connection startup. `user_version` records the layout.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS watchlist (
    login       TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);

-- One row per identity, overwritten by every reconciliation pass.
CREATE TABLE IF NOT EXISTS subscription_state (
    login           TEXT PRIMARY KEY,
    classification  TEXT NOT NULL,   -- 'none' | 'affiliate' | 'partner'
    since           TEXT,            -- ISO 8601 UTC; NULL unless notifiable
    updated_at      TEXT NOT NULL
);

PRAGMA user_version = 1;
";

/// Shared by `upsert` and `set_many`.
pub const UPSERT_STATE: &str = "
INSERT INTO subscription_state (login, classification, since, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (login) DO UPDATE SET
    classification = excluded.classification,
    since          = excluded.since,
    updated_at     = excluded.updated_at
";
