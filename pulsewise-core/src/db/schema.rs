//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: directory, agents, conversations, runs
    r#"
    -- ============================================
    -- Company directory (owned by the surrounding HR system)
    -- ============================================

    CREATE TABLE IF NOT EXISTS employees (
        id               TEXT NOT NULL,
        company_id       TEXT NOT NULL,
        name             TEXT NOT NULL,
        email            TEXT,
        department       TEXT,
        is_active        INTEGER NOT NULL DEFAULT 1,

        PRIMARY KEY (company_id, id)
    );

    CREATE INDEX IF NOT EXISTS idx_employees_department ON employees(company_id, department);

    -- ============================================
    -- Agent catalog
    -- ============================================

    CREATE TABLE IF NOT EXISTS agent_templates (
        id                 TEXT PRIMARY KEY,
        name               TEXT NOT NULL,
        slug               TEXT NOT NULL UNIQUE,
        agent_type         TEXT NOT NULL,     -- 'pulse_check', 'onboarding', ...
        description        TEXT NOT NULL,
        max_messages       INTEGER NOT NULL,
        escalation_enabled INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agent_instances (
        id               TEXT PRIMARY KEY,
        company_id       TEXT NOT NULL,
        agent_id         TEXT NOT NULL REFERENCES agent_templates(id),
        created_by       TEXT NOT NULL,
        name             TEXT NOT NULL,
        config           JSON NOT NULL,      -- flat audience/tone object
        status           TEXT NOT NULL,      -- 'active', 'paused', 'draft'
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_agent_instances_company ON agent_instances(company_id);

    -- Only populated for 'specific' audiences
    CREATE TABLE IF NOT EXISTS agent_targets (
        agent_instance_id TEXT NOT NULL REFERENCES agent_instances(id),
        employee_id       TEXT NOT NULL,

        PRIMARY KEY (agent_instance_id, employee_id)
    );

    CREATE TABLE IF NOT EXISTS agent_schedules (
        agent_instance_id TEXT PRIMARY KEY REFERENCES agent_instances(id),
        company_id        TEXT NOT NULL,
        cadence           TEXT NOT NULL,
        timezone          TEXT NOT NULL,
        next_run_at       DATETIME NOT NULL,
        last_run_at       DATETIME,
        is_active         INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_agent_schedules_due ON agent_schedules(next_run_at) WHERE is_active = 1;

    -- ============================================
    -- Conversations (append-only messages)
    -- ============================================

    CREATE TABLE IF NOT EXISTS conversations (
        id                  TEXT PRIMARY KEY,
        company_id          TEXT NOT NULL,
        agent_instance_id   TEXT NOT NULL REFERENCES agent_instances(id),
        participant_user_id TEXT NOT NULL,
        status              TEXT NOT NULL,   -- 'active', 'completed', 'escalated', 'closed'
        started_at          DATETIME NOT NULL,
        last_message_at     DATETIME,
        message_count       INTEGER NOT NULL DEFAULT 0,
        unread_count        INTEGER NOT NULL DEFAULT 0,
        completed_at        DATETIME
    );

    -- One active conversation per (instance, employee)
    CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_one_active
        ON conversations(agent_instance_id, participant_user_id)
        WHERE status = 'active';
    CREATE INDEX IF NOT EXISTS idx_conversations_company ON conversations(company_id, status);
    CREATE INDEX IF NOT EXISTS idx_conversations_participant ON conversations(company_id, participant_user_id);

    CREATE TABLE IF NOT EXISTS messages (
        id               TEXT PRIMARY KEY,
        conversation_id  TEXT NOT NULL REFERENCES conversations(id),
        seq              INTEGER NOT NULL,
        sender_type      TEXT NOT NULL,      -- 'agent', 'employee', 'system'
        sender_id        TEXT,
        content          TEXT NOT NULL,
        content_type     TEXT NOT NULL,
        is_read          INTEGER NOT NULL DEFAULT 0,
        created_at       DATETIME NOT NULL,

        UNIQUE(conversation_id, seq)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts ON messages(conversation_id, created_at, seq);

    -- ============================================
    -- Derived (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS feedback_summaries (
        conversation_id  TEXT PRIMARY KEY REFERENCES conversations(id),
        company_id       TEXT NOT NULL,
        sentiment        TEXT NOT NULL,
        sentiment_score  REAL NOT NULL,
        engagement_score REAL NOT NULL,
        tags             JSON NOT NULL,
        action_items     JSON NOT NULL,
        risk_level       TEXT NOT NULL,
        escalated        INTEGER NOT NULL,
        classifier       TEXT NOT NULL,
        computed_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_feedback_summaries_company ON feedback_summaries(company_id);

    CREATE TABLE IF NOT EXISTS agent_escalations (
        id               TEXT PRIMARY KEY,
        conversation_id  TEXT NOT NULL REFERENCES conversations(id),
        company_id       TEXT NOT NULL,
        escalation_type  TEXT NOT NULL,
        severity         TEXT NOT NULL,
        reason           TEXT NOT NULL,
        status           TEXT NOT NULL,      -- 'open', 'resolved'
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_agent_escalations_open ON agent_escalations(company_id) WHERE status = 'open';

    -- ============================================
    -- Run bookkeeping
    -- ============================================

    CREATE TABLE IF NOT EXISTS agent_runs (
        id                    TEXT PRIMARY KEY,
        company_id            TEXT NOT NULL,
        agent_instance_id     TEXT NOT NULL REFERENCES agent_instances(id),
        run_trigger           TEXT NOT NULL,  -- 'manual', 'schedule'
        started_at            DATETIME NOT NULL,
        targets_total         INTEGER NOT NULL,
        conversations_created INTEGER NOT NULL,
        skipped_existing      INTEGER NOT NULL,
        messages_sent         INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_agent_runs_instance ON agent_runs(agent_instance_id, started_at);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
