//! SQL migration definitions for the LeadScout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: search_sessions, leads, execution_sessions",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One governed run
CREATE TABLE IF NOT EXISTS search_sessions (
    id              TEXT PRIMARY KEY,
    account_id      TEXT NOT NULL,
    agent_type      TEXT NOT NULL,
    categories_json TEXT NOT NULL,
    geography       TEXT NOT NULL,
    quota_charge    INTEGER NOT NULL,
    started_at      TEXT NOT NULL,
    finished_at     TEXT,
    status          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_search_sessions_account ON search_sessions(account_id);

-- Ranked, qualified leads with their provenance blob
CREATE TABLE IF NOT EXISTS leads (
    id                TEXT PRIMARY KEY,
    session_id        TEXT NOT NULL REFERENCES search_sessions(id) ON DELETE CASCADE,
    rank              INTEGER NOT NULL,
    source_id         TEXT NOT NULL,
    url               TEXT NOT NULL,
    url_hash          TEXT NOT NULL,
    title             TEXT NOT NULL,
    description       TEXT NOT NULL,
    compensation_text TEXT NOT NULL,
    posted_text       TEXT NOT NULL,
    posted_at         TEXT,
    contact_text      TEXT,
    location          TEXT,
    recency_score     INTEGER NOT NULL,
    estimated_value   REAL NOT NULL,
    value_confident   INTEGER NOT NULL,
    quality_score     REAL NOT NULL,
    urgency_json      TEXT NOT NULL,
    relevance_score   REAL NOT NULL,
    matched_terms_json TEXT NOT NULL,
    category          TEXT NOT NULL,
    search_metadata   TEXT NOT NULL,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_leads_session ON leads(session_id);
CREATE INDEX IF NOT EXISTS idx_leads_url_hash ON leads(url_hash);

-- Progress records polled by callers
CREATE TABLE IF NOT EXISTS execution_sessions (
    id         TEXT PRIMARY KEY,
    agent_type TEXT NOT NULL,
    status     TEXT NOT NULL,
    percent    INTEGER NOT NULL,
    stage      TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
