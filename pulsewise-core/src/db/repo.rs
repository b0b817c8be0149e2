//! Database repository layer
//!
//! Provides query and insert operations for all entity types. Every tenant
//! query carries `company_id` in its predicate.
//!
//! Two operations carry the store's concurrency guarantees:
//! - [`Database::open_conversation`] relies on the partial unique index
//!   `idx_conversations_one_active` for atomic create-if-absent.
//! - [`Database::append_message`] runs in a `BEGIN IMMEDIATE` transaction, so
//!   the status check, `seq` assignment and counter updates happen under the
//!   database write lock, across processes as well as threads.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Filter for listing conversations within one company.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub agent_instance_id: Option<String>,
    pub participant_user_id: Option<String>,
    pub status: Option<ConversationStatus>,
    pub limit: Option<usize>,
}

/// Per-instance counts derived from the conversation tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceStats {
    pub conversation_count: i64,
    pub active_conversations: i64,
    pub message_count: i64,
}

/// Database handle (single connection, shared behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

/// Storage format for timestamps: fixed-width so text order is time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(0, format!("bad timestamp {value:?}: {e}")))
}

fn parse_opt_ts(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T>(value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|e| conversion_error(0, e))
}

impl Database {
    /// Open or create a database at the given path with default store settings
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &StoreConfig::default())
    }

    /// Open or create a database at the given path
    pub fn open_with(path: &Path, store: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets readers proceed while one process appends; the busy
        // timeout makes competing writers wait instead of failing.
        conn.busy_timeout(std::time::Duration::from_millis(store.busy_timeout_ms))?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        super::schema::run_migrations(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    // ============================================
    // Employee directory
    // ============================================

    /// Insert or update an employee
    pub fn upsert_employee(&self, employee: &Employee) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO employees (id, company_id, name, email, department, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(company_id, id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                department = excluded.department,
                is_active = excluded.is_active
            "#,
            params![
                employee.id,
                employee.company_id,
                employee.name,
                employee.email,
                employee.department,
                employee.is_active,
            ],
        )?;
        Ok(())
    }

    /// Active employees of a company, optionally restricted to one department
    pub fn list_active_employees(
        &self,
        company_id: &str,
        department: Option<&str>,
    ) -> Result<Vec<Employee>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM employees
            WHERE company_id = ?1
              AND is_active = 1
              AND (?2 IS NULL OR department = ?2)
            ORDER BY id ASC
            "#,
        )?;

        let employees = stmt
            .query_map(params![company_id, department], Self::row_to_employee)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(employees)
    }

    fn row_to_employee(row: &Row) -> rusqlite::Result<Employee> {
        Ok(Employee {
            id: row.get("id")?,
            company_id: row.get("company_id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            department: row.get("department")?,
            is_active: row.get("is_active")?,
        })
    }

    // ============================================
    // Template operations
    // ============================================

    /// Insert a system template, leaving an existing row with the same id untouched
    pub fn insert_template_if_absent(&self, template: &AgentTemplate) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO agent_templates (id, name, slug, agent_type, description,
                                         max_messages, escalation_enabled)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT DO NOTHING
            "#,
            params![
                template.id,
                template.name,
                template.slug,
                template.agent_type.as_str(),
                template.description,
                template.default_config.max_messages,
                template.default_config.escalation_enabled,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Get a template by ID
    pub fn get_template(&self, id: &str) -> Result<Option<AgentTemplate>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agent_templates WHERE id = ?",
            [id],
            Self::row_to_template,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a template by its slug
    pub fn get_template_by_slug(&self, slug: &str) -> Result<Option<AgentTemplate>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agent_templates WHERE slug = ?",
            [slug],
            Self::row_to_template,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all templates
    pub fn list_templates(&self) -> Result<Vec<AgentTemplate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM agent_templates ORDER BY slug ASC")?;
        let templates = stmt
            .query_map([], Self::row_to_template)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    fn row_to_template(row: &Row) -> rusqlite::Result<AgentTemplate> {
        let agent_type: String = row.get("agent_type")?;
        Ok(AgentTemplate {
            id: row.get("id")?,
            name: row.get("name")?,
            slug: row.get("slug")?,
            agent_type: parse_enum(&agent_type)?,
            description: row.get("description")?,
            default_config: TemplateConfig {
                max_messages: row.get("max_messages")?,
                escalation_enabled: row.get("escalation_enabled")?,
            },
        })
    }

    // ============================================
    // Instance operations
    // ============================================

    /// Insert an instance with its explicit targets and optional schedule in one transaction
    pub fn insert_instance(
        &self,
        instance: &AgentInstance,
        targets: &[String],
        schedule: Option<&AgentSchedule>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO agent_instances (id, company_id, agent_id, created_by, name, config,
                                         status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                instance.id,
                instance.company_id,
                instance.agent_id,
                instance.created_by,
                instance.name,
                instance.config.to_json().to_string(),
                instance.status.as_str(),
                ts(instance.created_at),
                ts(instance.updated_at),
            ],
        )?;

        Self::replace_targets(&tx, &instance.id, targets)?;

        if let Some(schedule) = schedule {
            Self::upsert_schedule_tx(&tx, schedule)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn replace_targets(tx: &Transaction, instance_id: &str, targets: &[String]) -> Result<()> {
        tx.execute(
            "DELETE FROM agent_targets WHERE agent_instance_id = ?",
            [instance_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO agent_targets (agent_instance_id, employee_id) VALUES (?1, ?2)",
        )?;
        for employee_id in targets {
            stmt.execute(params![instance_id, employee_id])?;
        }
        Ok(())
    }

    /// Get an instance by ID
    pub fn get_instance(&self, company_id: &str, id: &str) -> Result<Option<AgentInstance>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agent_instances WHERE company_id = ?1 AND id = ?2",
            [company_id, id],
            Self::row_to_instance,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List instances of a company, newest first
    pub fn list_instances(&self, company_id: &str) -> Result<Vec<AgentInstance>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_instances WHERE company_id = ? ORDER BY created_at DESC, id ASC",
        )?;
        let instances = stmt
            .query_map([company_id], Self::row_to_instance)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(instances)
    }

    /// Set an instance's status. Returns false when no such instance exists.
    pub fn update_instance_status(
        &self,
        company_id: &str,
        id: &str,
        status: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE agent_instances
            SET status = ?1, updated_at = ?2
            WHERE company_id = ?3 AND id = ?4
            "#,
            params![status.as_str(), ts(now), company_id, id],
        )?;
        Ok(changed > 0)
    }

    /// Replace an instance's config and explicit targets. Returns false when no such instance exists.
    pub fn update_instance_config(
        &self,
        company_id: &str,
        id: &str,
        config: &InstanceConfig,
        targets: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE agent_instances
            SET config = ?1, updated_at = ?2
            WHERE company_id = ?3 AND id = ?4
            "#,
            params![config.to_json().to_string(), ts(now), company_id, id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        Self::replace_targets(&tx, id, targets)?;
        tx.commit()?;
        Ok(true)
    }

    /// Stored explicit targets of an instance
    pub fn list_targets(&self, company_id: &str, instance_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.employee_id
            FROM agent_targets t
            JOIN agent_instances i ON i.id = t.agent_instance_id
            WHERE i.company_id = ?1 AND t.agent_instance_id = ?2
            ORDER BY t.employee_id ASC
            "#,
        )?;
        let ids = stmt
            .query_map([company_id, instance_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Conversation and message counts per instance, keyed by instance id
    pub fn instance_stats(&self, company_id: &str) -> Result<HashMap<String, InstanceStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                c.agent_instance_id,
                COUNT(DISTINCT c.id) as conversation_count,
                COUNT(DISTINCT CASE WHEN c.status = 'active' THEN c.id END) as active_count,
                COUNT(m.id) as message_count
            FROM conversations c
            LEFT JOIN messages m ON m.conversation_id = c.id
            WHERE c.company_id = ?
            GROUP BY c.agent_instance_id
            "#,
        )?;

        let rows = stmt
            .query_map([company_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    InstanceStats {
                        conversation_count: row.get(1)?,
                        active_conversations: row.get(2)?,
                        message_count: row.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(rows)
    }

    fn row_to_instance(row: &Row) -> rusqlite::Result<AgentInstance> {
        let config_str: String = row.get("config")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        let config_value: serde_json::Value = serde_json::from_str(&config_str)
            .map_err(|e| conversion_error(0, format!("bad instance config: {e}")))?;
        let config = InstanceConfig::from_json(&config_value)
            .map_err(|e| conversion_error(0, e.to_string()))?;

        Ok(AgentInstance {
            id: row.get("id")?,
            company_id: row.get("company_id")?,
            agent_id: row.get("agent_id")?,
            created_by: row.get("created_by")?,
            name: row.get("name")?,
            config,
            status: parse_enum(&status)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    // ============================================
    // Schedule operations
    // ============================================

    fn upsert_schedule_tx(tx: &Transaction, schedule: &AgentSchedule) -> Result<()> {
        tx.execute(
            r#"
            INSERT INTO agent_schedules (agent_instance_id, company_id, cadence, timezone,
                                         next_run_at, last_run_at, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(agent_instance_id) DO UPDATE SET
                cadence = excluded.cadence,
                timezone = excluded.timezone,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at,
                is_active = excluded.is_active
            "#,
            params![
                schedule.agent_instance_id,
                schedule.company_id,
                schedule.cadence.as_str(),
                schedule.timezone,
                ts(schedule.next_run_at),
                schedule.last_run_at.map(ts),
                schedule.is_active,
            ],
        )?;
        Ok(())
    }

    /// Get the schedule of an instance
    pub fn get_schedule(&self, company_id: &str, instance_id: &str) -> Result<Option<AgentSchedule>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agent_schedules WHERE company_id = ?1 AND agent_instance_id = ?2",
            [company_id, instance_id],
            Self::row_to_schedule,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Record that a scheduled instance ran
    pub fn record_schedule_run(
        &self,
        company_id: &str,
        instance_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        is_active: bool,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE agent_schedules
            SET last_run_at = ?1, next_run_at = ?2, is_active = ?3
            WHERE company_id = ?4 AND agent_instance_id = ?5
            "#,
            params![ts(last_run_at), ts(next_run_at), is_active, company_id, instance_id],
        )?;
        Ok(())
    }

    /// Active schedules of active instances that are due at `now`, across all companies.
    ///
    /// This is the only cross-tenant query; it feeds the system scheduler, and
    /// every returned row carries its own `company_id`.
    pub fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<AgentSchedule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.*
            FROM agent_schedules s
            JOIN agent_instances i
              ON i.id = s.agent_instance_id AND i.company_id = s.company_id
            WHERE s.is_active = 1
              AND i.status = 'active'
              AND s.next_run_at <= ?1
            ORDER BY s.next_run_at ASC
            "#,
        )?;
        let schedules = stmt
            .query_map([ts(now)], Self::row_to_schedule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    fn row_to_schedule(row: &Row) -> rusqlite::Result<AgentSchedule> {
        let cadence: String = row.get("cadence")?;
        let next_run_at: String = row.get("next_run_at")?;
        Ok(AgentSchedule {
            agent_instance_id: row.get("agent_instance_id")?,
            company_id: row.get("company_id")?,
            cadence: parse_enum(&cadence)?,
            timezone: row.get("timezone")?,
            next_run_at: parse_ts(&next_run_at)?,
            last_run_at: parse_opt_ts(row.get("last_run_at")?)?,
            is_active: row.get("is_active")?,
        })
    }

    // ============================================
    // Conversation operations
    // ============================================

    /// The active conversation for (instance, employee), if any
    pub fn find_active_conversation(
        &self,
        company_id: &str,
        instance_id: &str,
        participant_user_id: &str,
    ) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        conn.query_row(
            r#"
            SELECT * FROM conversations
            WHERE company_id = ?1
              AND agent_instance_id = ?2
              AND participant_user_id = ?3
              AND status = 'active'
            "#,
            [company_id, instance_id, participant_user_id],
            Self::row_to_conversation,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Atomically create an active conversation together with its first message.
    ///
    /// Fails with [`Error::Conflict`] when another active conversation for the
    /// same (instance, participant) already exists; nothing is written then.
    pub fn open_conversation(
        &self,
        conversation: &Conversation,
        first: &NewMessage,
    ) -> Result<(Conversation, Message)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            r#"
            INSERT INTO conversations (id, company_id, agent_instance_id, participant_user_id,
                                       status, started_at, last_message_at, message_count,
                                       unread_count, completed_at)
            VALUES (?1, ?2, ?3, ?4, 'active', ?5, NULL, 0, 0, NULL)
            ON CONFLICT DO NOTHING
            "#,
            params![
                conversation.id,
                conversation.company_id,
                conversation.agent_instance_id,
                conversation.participant_user_id,
                ts(conversation.started_at),
            ],
        )?;

        if inserted == 0 {
            return Err(Error::Conflict {
                entity: "conversation",
                key: format!(
                    "{}/{}",
                    conversation.agent_instance_id, conversation.participant_user_id
                ),
            });
        }

        let mut opened = conversation.clone();
        opened.status = ConversationStatus::Active;
        let message = Self::append_tx(&tx, &mut opened, first, conversation.started_at)?;
        tx.commit()?;

        Ok((opened, message))
    }

    /// Append a message to an active conversation.
    ///
    /// The conversation is re-read inside the write transaction, so a
    /// concurrent escalation or close is detected here rather than appended to.
    pub fn append_message(
        &self,
        company_id: &str,
        conversation_id: &str,
        message: &NewMessage,
        now: DateTime<Utc>,
    ) -> Result<(Conversation, Message)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut conversation = Self::load_conversation_tx(&tx, company_id, conversation_id)?;
        if let Some(err) = conversation.status.reject_message(&conversation.id) {
            return Err(err);
        }

        let appended = Self::append_tx(&tx, &mut conversation, message, now)?;
        tx.commit()?;

        Ok((conversation, appended))
    }

    fn load_conversation_tx(
        tx: &Transaction,
        company_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation> {
        tx.query_row(
            "SELECT * FROM conversations WHERE company_id = ?1 AND id = ?2",
            [company_id, conversation_id],
            Self::row_to_conversation,
        )
        .optional()?
        .ok_or_else(|| Error::not_found("conversation", conversation_id))
    }

    /// Insert `message` as the next one in `conversation` and bump its counters.
    fn append_tx(
        tx: &Transaction,
        conversation: &mut Conversation,
        message: &NewMessage,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        // Stored precision; comparing at a finer one could reorder equal timestamps
        let now = now.trunc_subsecs(6);
        let last: Option<(u32, String)> = tx
            .query_row(
                r#"
                SELECT seq, created_at FROM messages
                WHERE conversation_id = ?
                ORDER BY seq DESC
                LIMIT 1
                "#,
                [&conversation.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (seq, created_at) = match last {
            Some((last_seq, last_ts)) => {
                let last_ts = parse_ts(&last_ts)?;
                let created_at = if now > last_ts {
                    now
                } else {
                    last_ts + Duration::microseconds(1)
                };
                (last_seq + 1, created_at)
            }
            None => (1, now),
        };

        let appended = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            seq,
            sender_type: message.sender_type,
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            content_type: message.content_type.clone(),
            is_read: false,
            created_at,
        };

        tx.execute(
            r#"
            INSERT INTO messages (id, conversation_id, seq, sender_type, sender_id,
                                  content, content_type, is_read, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
            params![
                appended.id,
                appended.conversation_id,
                appended.seq,
                appended.sender_type.as_str(),
                appended.sender_id,
                appended.content,
                appended.content_type,
                ts(appended.created_at),
            ],
        )?;

        // Employees read their own messages; everything else is unread for them.
        let unread_increment: u32 = match appended.sender_type {
            SenderType::Employee => 0,
            SenderType::Agent | SenderType::System => 1,
        };

        tx.execute(
            r#"
            UPDATE conversations
            SET message_count = ?1,
                unread_count = unread_count + ?2,
                last_message_at = ?3
            WHERE id = ?4
            "#,
            params![seq, unread_increment, ts(created_at), conversation.id],
        )?;

        conversation.message_count = seq;
        conversation.unread_count += unread_increment;
        conversation.last_message_at = Some(created_at);

        Ok(appended)
    }

    /// Move an active conversation to a terminal state.
    ///
    /// Fails with the state's rejection error if the conversation already left `active`.
    pub fn transition_conversation(
        &self,
        company_id: &str,
        conversation_id: &str,
        to: ConversationStatus,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let conversation = Self::finish_tx(&tx, company_id, conversation_id, to, now)?;
        tx.commit()?;
        Ok(conversation)
    }

    /// Escalate an active conversation and record the escalation atomically.
    pub fn escalate_conversation(
        &self,
        company_id: &str,
        conversation_id: &str,
        escalation: &Escalation,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let conversation = Self::finish_tx(
            &tx,
            company_id,
            conversation_id,
            ConversationStatus::Escalated,
            now,
        )?;

        tx.execute(
            r#"
            INSERT INTO agent_escalations (id, conversation_id, company_id, escalation_type,
                                           severity, reason, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                escalation.id,
                escalation.conversation_id,
                escalation.company_id,
                escalation.escalation_type.as_str(),
                escalation.severity.as_str(),
                escalation.reason,
                escalation.status.as_str(),
                ts(escalation.created_at),
            ],
        )?;

        tx.commit()?;
        Ok(conversation)
    }

    fn finish_tx(
        tx: &Transaction,
        company_id: &str,
        conversation_id: &str,
        to: ConversationStatus,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut conversation = Self::load_conversation_tx(tx, company_id, conversation_id)?;
        if let Some(err) = conversation.status.reject_message(&conversation.id) {
            return Err(err);
        }

        tx.execute(
            r#"
            UPDATE conversations
            SET status = ?1, completed_at = ?2
            WHERE id = ?3 AND status = 'active'
            "#,
            params![to.as_str(), ts(now), conversation.id],
        )?;

        conversation.status = to;
        conversation.completed_at = Some(now);
        Ok(conversation)
    }

    /// Mark every non-employee message read and clear the unread counter.
    ///
    /// Allowed in every state; read tracking is the one mutation terminal
    /// conversations accept.
    pub fn mark_conversation_read(
        &self,
        company_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut conversation = Self::load_conversation_tx(&tx, company_id, conversation_id)?;

        tx.execute(
            r#"
            UPDATE messages SET is_read = 1
            WHERE conversation_id = ?1 AND sender_type != 'employee'
            "#,
            [conversation_id],
        )?;
        tx.execute(
            "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
            [conversation_id],
        )?;

        tx.commit()?;
        conversation.unread_count = 0;
        Ok(conversation)
    }

    /// Get a conversation by ID
    pub fn get_conversation(&self, company_id: &str, id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM conversations WHERE company_id = ?1 AND id = ?2",
            [company_id, id],
            Self::row_to_conversation,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List conversations of a company with optional filtering
    pub fn list_conversations(
        &self,
        company_id: &str,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>> {
        let conn = self.lock()?;

        let mut sql = String::from("SELECT * FROM conversations WHERE company_id = ?");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(company_id.to_string())];

        if let Some(instance_id) = &filter.agent_instance_id {
            sql.push_str(" AND agent_instance_id = ?");
            params.push(Box::new(instance_id.clone()));
        }

        if let Some(participant) = &filter.participant_user_id {
            sql.push_str(" AND participant_user_id = ?");
            params.push(Box::new(participant.clone()));
        }

        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }

        sql.push_str(" ORDER BY last_message_at DESC NULLS LAST, id ASC");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let conversations = stmt
            .query_map(params_refs.as_slice(), Self::row_to_conversation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(conversations)
    }

    fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
        let status: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        Ok(Conversation {
            id: row.get("id")?,
            company_id: row.get("company_id")?,
            agent_instance_id: row.get("agent_instance_id")?,
            participant_user_id: row.get("participant_user_id")?,
            status: parse_enum(&status)?,
            started_at: parse_ts(&started_at)?,
            last_message_at: parse_opt_ts(row.get("last_message_at")?)?,
            message_count: row.get("message_count")?,
            unread_count: row.get("unread_count")?,
            completed_at: parse_opt_ts(row.get("completed_at")?)?,
        })
    }

    // ============================================
    // Message operations
    // ============================================

    /// One page of messages in order, starting after `after`
    pub fn list_messages(
        &self,
        company_id: &str,
        conversation_id: &str,
        after: Option<MessageCursor>,
        limit: usize,
    ) -> Result<MessagePage> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.*
            FROM messages m
            JOIN conversations c ON c.id = m.conversation_id
            WHERE c.company_id = ?1
              AND m.conversation_id = ?2
              AND (?3 IS NULL OR m.created_at > ?3 OR (m.created_at = ?3 AND m.seq > ?4))
            ORDER BY m.created_at ASC, m.seq ASC
            LIMIT ?5
            "#,
        )?;

        let messages = stmt
            .query_map(
                params![
                    company_id,
                    conversation_id,
                    after.map(|c| ts(c.created_at)),
                    after.map(|c| c.seq).unwrap_or(0),
                    limit as i64,
                ],
                Self::row_to_message,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next_cursor = if messages.len() == limit {
            messages.last().map(MessageCursor::from)
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Full ordered history of a conversation
    pub fn all_messages(&self, company_id: &str, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.*
            FROM messages m
            JOIN conversations c ON c.id = m.conversation_id
            WHERE c.company_id = ?1 AND m.conversation_id = ?2
            ORDER BY m.seq ASC
            "#,
        )?;
        let messages = stmt
            .query_map([company_id, conversation_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Count stored messages of a conversation
    pub fn count_messages(&self, company_id: &str, conversation_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM messages m
            JOIN conversations c ON c.id = m.conversation_id
            WHERE c.company_id = ?1 AND m.conversation_id = ?2
            "#,
            [company_id, conversation_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
        let sender_type: String = row.get("sender_type")?;
        let created_at: String = row.get("created_at")?;
        Ok(Message {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            seq: row.get("seq")?,
            sender_type: parse_enum(&sender_type)?,
            sender_id: row.get("sender_id")?,
            content: row.get("content")?,
            content_type: row.get("content_type")?,
            is_read: row.get("is_read")?,
            created_at: parse_ts(&created_at)?,
        })
    }

    // ============================================
    // Summary operations
    // ============================================

    /// Store a summary, superseding any previous one for the conversation
    pub fn upsert_summary(&self, company_id: &str, summary: &FeedbackSummary) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO feedback_summaries (conversation_id, company_id, sentiment, sentiment_score,
                                            engagement_score, tags, action_items, risk_level,
                                            escalated, classifier, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(conversation_id) DO UPDATE SET
                sentiment = excluded.sentiment,
                sentiment_score = excluded.sentiment_score,
                engagement_score = excluded.engagement_score,
                tags = excluded.tags,
                action_items = excluded.action_items,
                risk_level = excluded.risk_level,
                escalated = excluded.escalated,
                classifier = excluded.classifier,
                computed_at = excluded.computed_at
            "#,
            params![
                summary.conversation_id,
                company_id,
                summary.sentiment.as_str(),
                summary.sentiment_score,
                summary.engagement_score,
                serde_json::to_string(&summary.tags)?,
                serde_json::to_string(&summary.action_items)?,
                summary.risk_level.as_str(),
                summary.escalated,
                summary.classifier,
                ts(summary.computed_at),
            ],
        )?;
        Ok(())
    }

    /// Drop the cached summary so readers see it as unavailable
    pub fn delete_summary(&self, company_id: &str, conversation_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM feedback_summaries WHERE company_id = ?1 AND conversation_id = ?2",
            [company_id, conversation_id],
        )?;
        Ok(())
    }

    /// Cached summary of a conversation
    pub fn get_summary(
        &self,
        company_id: &str,
        conversation_id: &str,
    ) -> Result<Option<FeedbackSummary>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM feedback_summaries WHERE company_id = ?1 AND conversation_id = ?2",
            [company_id, conversation_id],
            Self::row_to_summary,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Cached summaries of a company, optionally for one instance
    pub fn list_summaries(
        &self,
        company_id: &str,
        instance_id: Option<&str>,
    ) -> Result<Vec<FeedbackSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.*
            FROM feedback_summaries s
            JOIN conversations c ON c.id = s.conversation_id
            WHERE s.company_id = ?1
              AND (?2 IS NULL OR c.agent_instance_id = ?2)
            ORDER BY s.conversation_id ASC
            "#,
        )?;
        let summaries = stmt
            .query_map(params![company_id, instance_id], Self::row_to_summary)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn row_to_summary(row: &Row) -> rusqlite::Result<FeedbackSummary> {
        let sentiment: String = row.get("sentiment")?;
        let risk_level: String = row.get("risk_level")?;
        let tags: String = row.get("tags")?;
        let action_items: String = row.get("action_items")?;
        let computed_at: String = row.get("computed_at")?;

        Ok(FeedbackSummary {
            conversation_id: row.get("conversation_id")?,
            sentiment: parse_enum(&sentiment)?,
            sentiment_score: row.get("sentiment_score")?,
            engagement_score: row.get("engagement_score")?,
            tags: serde_json::from_str(&tags)
                .map_err(|e| conversion_error(0, format!("bad tags: {e}")))?,
            action_items: serde_json::from_str(&action_items)
                .map_err(|e| conversion_error(0, format!("bad action items: {e}")))?,
            risk_level: parse_enum(&risk_level)?,
            escalated: row.get("escalated")?,
            computed_at: parse_ts(&computed_at)?,
            classifier: row.get("classifier")?,
        })
    }

    // ============================================
    // Escalation operations
    // ============================================

    /// Escalations of a company, newest first, optionally filtered by status
    pub fn list_escalations(
        &self,
        company_id: &str,
        status: Option<EscalationStatus>,
    ) -> Result<Vec<Escalation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM agent_escalations
            WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC
            "#,
        )?;
        let escalations = stmt
            .query_map(
                params![company_id, status.map(|s| s.as_str())],
                Self::row_to_escalation,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(escalations)
    }

    fn row_to_escalation(row: &Row) -> rusqlite::Result<Escalation> {
        let escalation_type: String = row.get("escalation_type")?;
        let severity: String = row.get("severity")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(Escalation {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            company_id: row.get("company_id")?,
            escalation_type: parse_enum(&escalation_type)?,
            severity: parse_enum(&severity)?,
            reason: row.get("reason")?,
            status: parse_enum(&status)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    // ============================================
    // Run bookkeeping
    // ============================================

    /// Record a completed run
    pub fn insert_run(&self, run: &AgentRun) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO agent_runs (id, company_id, agent_instance_id, run_trigger, started_at,
                                    targets_total, conversations_created, skipped_existing,
                                    messages_sent)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                run.id,
                run.company_id,
                run.agent_instance_id,
                run.trigger.as_str(),
                ts(run.started_at),
                run.targets_total,
                run.conversations_created,
                run.skipped_existing,
                run.messages_sent,
            ],
        )?;
        Ok(())
    }

    /// Runs of an instance, newest first
    pub fn list_runs(&self, company_id: &str, instance_id: &str) -> Result<Vec<AgentRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM agent_runs
            WHERE company_id = ?1 AND agent_instance_id = ?2
            ORDER BY started_at DESC
            "#,
        )?;
        let runs = stmt
            .query_map([company_id, instance_id], |row| {
                let trigger: String = row.get("run_trigger")?;
                let started_at: String = row.get("started_at")?;
                Ok(AgentRun {
                    id: row.get("id")?,
                    company_id: row.get("company_id")?,
                    agent_instance_id: row.get("agent_instance_id")?,
                    trigger: parse_enum(&trigger)?,
                    started_at: parse_ts(&started_at)?,
                    targets_total: row.get("targets_total")?,
                    conversations_created: row.get("conversations_created")?,
                    skipped_existing: row.get("skipped_existing")?,
                    messages_sent: row.get("messages_sent")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPANY: &str = "acme";

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.insert_template_if_absent(&create_test_template()).unwrap();
        db.insert_instance(&create_test_instance("inst-1"), &[], None)
            .unwrap();
        db
    }

    fn create_test_template() -> AgentTemplate {
        AgentTemplate {
            id: "tpl-pulse".to_string(),
            name: "Pulse Check".to_string(),
            slug: "pulse-check".to_string(),
            agent_type: AgentType::PulseCheck,
            description: "Weekly check-in".to_string(),
            default_config: TemplateConfig {
                max_messages: 5,
                escalation_enabled: true,
            },
        }
    }

    fn create_test_instance(id: &str) -> AgentInstance {
        AgentInstance {
            id: id.to_string(),
            company_id: COMPANY.to_string(),
            agent_id: "tpl-pulse".to_string(),
            created_by: "admin-1".to_string(),
            name: "Weekly pulse".to_string(),
            config: InstanceConfig {
                tone_preset: TonePreset::FriendlyPeer,
                audience: Audience::All,
            },
            status: InstanceStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn open_test_conversation(db: &Database, employee: &str) -> Result<(Conversation, Message)> {
        let conversation = Conversation::new(COMPANY, "inst-1", employee, Utc::now());
        db.open_conversation(&conversation, &NewMessage::agent("Hi there!"))
    }

    #[test]
    fn test_instance_round_trip() {
        let db = setup();
        let instance = db.get_instance(COMPANY, "inst-1").unwrap().unwrap();
        assert_eq!(instance.config.audience, Audience::All);
        assert_eq!(instance.status, InstanceStatus::Active);

        // Other tenants cannot see it
        assert!(db.get_instance("globex", "inst-1").unwrap().is_none());
    }

    #[test]
    fn test_open_conversation_is_create_if_absent() {
        let db = setup();

        let (conversation, greeting) = open_test_conversation(&db, "emp-1").unwrap();
        assert_eq!(conversation.message_count, 1);
        assert_eq!(conversation.unread_count, 1);
        assert_eq!(greeting.seq, 1);

        let err = open_test_conversation(&db, "emp-1").unwrap_err();
        assert!(err.is_conflict());

        let active = db
            .list_conversations(
                COMPANY,
                &ConversationFilter {
                    status: Some(ConversationStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(db.count_messages(COMPANY, &conversation.id).unwrap(), 1);
    }

    #[test]
    fn test_new_conversation_allowed_after_completion() {
        let db = setup();
        let (first, _) = open_test_conversation(&db, "emp-1").unwrap();
        db.transition_conversation(COMPANY, &first.id, ConversationStatus::Completed, Utc::now())
            .unwrap();

        assert!(open_test_conversation(&db, "emp-1").is_ok());
    }

    #[test]
    fn test_append_keeps_order_with_identical_clock() {
        let db = setup();
        let (conversation, greeting) = open_test_conversation(&db, "emp-1").unwrap();

        // A clock that does not advance must still produce strictly increasing timestamps
        let frozen = greeting.created_at;
        let (_, reply) = db
            .append_message(COMPANY, &conversation.id, &NewMessage::employee("emp-1", "ok"), frozen)
            .unwrap();
        let (updated, follow_up) = db
            .append_message(COMPANY, &conversation.id, &NewMessage::agent("great"), frozen)
            .unwrap();

        assert!(reply.created_at > greeting.created_at);
        assert!(follow_up.created_at > reply.created_at);
        assert_eq!(follow_up.seq, 3);
        assert_eq!(updated.message_count, 3);
        // Greeting and follow-up are unread; the employee's own reply is not counted
        assert_eq!(updated.unread_count, 2);

        let stored = db.get_conversation(COMPANY, &conversation.id).unwrap().unwrap();
        assert_eq!(stored.message_count as i64, db.count_messages(COMPANY, &conversation.id).unwrap());
    }

    #[test]
    fn test_append_rejects_terminal_conversations() {
        let db = setup();
        let (conversation, _) = open_test_conversation(&db, "emp-1").unwrap();
        db.transition_conversation(COMPANY, &conversation.id, ConversationStatus::Closed, Utc::now())
            .unwrap();

        let err = db
            .append_message(COMPANY, &conversation.id, &NewMessage::agent("late"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(db.count_messages(COMPANY, &conversation.id).unwrap(), 1);
    }

    #[test]
    fn test_escalation_is_recorded_with_transition() {
        let db = setup();
        let (conversation, _) = open_test_conversation(&db, "emp-1").unwrap();
        let escalation = Escalation {
            id: "esc-1".to_string(),
            conversation_id: conversation.id.clone(),
            company_id: COMPANY.to_string(),
            escalation_type: EscalationType::SafetySignal,
            severity: Severity::High,
            reason: "distress language".to_string(),
            status: EscalationStatus::Open,
            created_at: Utc::now(),
        };

        let escalated = db
            .escalate_conversation(COMPANY, &conversation.id, &escalation, Utc::now())
            .unwrap();
        assert_eq!(escalated.status, ConversationStatus::Escalated);

        let open = db
            .list_escalations(COMPANY, Some(EscalationStatus::Open))
            .unwrap();
        assert_eq!(open.len(), 1);

        // A second escalation attempt sees the terminal state
        let again = db.escalate_conversation(COMPANY, &conversation.id, &escalation, Utc::now());
        assert!(matches!(again, Err(Error::Escalated { .. })));
    }

    #[test]
    fn test_cursor_pagination() {
        let db = setup();
        let (conversation, _) = open_test_conversation(&db, "emp-1").unwrap();
        for i in 0..4 {
            db.append_message(
                COMPANY,
                &conversation.id,
                &NewMessage::employee("emp-1", format!("message {i}")),
                Utc::now(),
            )
            .unwrap();
        }

        let first = db.list_messages(COMPANY, &conversation.id, None, 2).unwrap();
        assert_eq!(first.messages.len(), 2);
        let cursor = first.next_cursor.expect("full page yields a cursor");

        let second = db
            .list_messages(COMPANY, &conversation.id, Some(cursor), 2)
            .unwrap();
        assert_eq!(second.messages[0].seq, 3);

        let third = db
            .list_messages(COMPANY, &conversation.id, second.next_cursor, 2)
            .unwrap();
        assert_eq!(third.messages.len(), 1);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn test_mark_read_allowed_on_terminal_conversation() {
        let db = setup();
        let (conversation, _) = open_test_conversation(&db, "emp-1").unwrap();
        db.transition_conversation(COMPANY, &conversation.id, ConversationStatus::Completed, Utc::now())
            .unwrap();

        let read = db.mark_conversation_read(COMPANY, &conversation.id).unwrap();
        assert_eq!(read.unread_count, 0);
        let messages = db.all_messages(COMPANY, &conversation.id).unwrap();
        assert!(messages.iter().all(|m| m.is_read));
    }

    #[test]
    fn test_instance_stats_count_messages() {
        let db = setup();
        let (conversation, _) = open_test_conversation(&db, "emp-1").unwrap();
        open_test_conversation(&db, "emp-2").unwrap();
        db.append_message(
            COMPANY,
            &conversation.id,
            &NewMessage::employee("emp-1", "hello"),
            Utc::now(),
        )
        .unwrap();

        let stats = db.instance_stats(COMPANY).unwrap();
        let stats = stats.get("inst-1").copied().unwrap_or_default();
        assert_eq!(stats.conversation_count, 2);
        assert_eq!(stats.active_conversations, 2);
        assert_eq!(stats.message_count, 3);
    }
}
