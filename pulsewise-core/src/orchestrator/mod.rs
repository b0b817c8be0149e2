//! Agent orchestration
//!
//! The run-time engine with two entry points:
//!
//! - **Run**: fan an instance out to its resolved audience, opening one
//!   conversation per employee that has none active, each starting with a
//!   scripted greeting. Safe to repeat and to race: the store's partial unique
//!   index lets exactly one opener win per employee.
//! - **Reply**: append an employee message, re-summarize, then escalate,
//!   complete, or answer with a scripted follow-up.
//!
//! ## Conversation states
//!
//! ```text
//!            ┌──────────► completed   (budget reached, or employee closed)
//!            │
//!   active ──┼──────────► escalated   (high risk; HR takes over)
//!            │
//!            └──────────► closed      (admin action)
//! ```
//!
//! Terminal conversations accept no messages; read tracking still works.

pub mod scripts;

use crate::audience;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::schedule;
use crate::summarizer::{self, Summarizer};
use crate::types::*;
use chrono::{DateTime, Utc};
use scripts::{FollowUp, ScriptLibrary, ScriptProvider};
use serde::Serialize;

/// Result of one instance run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub company_id: String,
    pub agent_instance_id: String,
    pub trigger: RunTrigger,
    pub targets_total: usize,
    /// Conversations opened by this run
    pub created: Vec<Conversation>,
    /// Targets that already had an active conversation
    pub skipped_existing: usize,
    pub messages_sent: usize,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Result of a scheduler tick.
#[derive(Debug, Default, Serialize)]
pub struct TickReport {
    pub runs: Vec<RunReport>,
    /// (instance id, error) for runs that failed
    pub failures: Vec<(String, String)>,
}

/// Result of handling one employee reply.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub conversation: Conversation,
    /// Agent reply, if the agent answered
    pub response: Option<Message>,
    pub escalated: bool,
    /// None when the summary could not be computed
    pub summary: Option<FeedbackSummary>,
}

impl ReplyOutcome {
    pub fn status(&self) -> ConversationStatus {
        self.conversation.status
    }
}

pub struct Orchestrator<'a> {
    db: &'a Database,
    summarizer: Summarizer,
    scripts: Box<dyn ScriptProvider>,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator with the lexicon classifier and built-in scripts.
    pub fn new(db: &'a Database, config: &Config) -> Self {
        Self {
            db,
            summarizer: Summarizer::lexicon(config.risk.clone()),
            scripts: Box::new(ScriptLibrary::new()),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_scripts(mut self, scripts: Box<dyn ScriptProvider>) -> Self {
        self.scripts = scripts;
        self
    }

    // ============================================
    // Run
    // ============================================

    /// Admin-triggered run.
    pub fn run_for(&self, principal: &Principal, instance_id: &str) -> Result<RunReport> {
        principal.require_admin("run agent instances")?;
        self.run(&principal.company_id, instance_id)
    }

    /// Manual run at the current time.
    pub fn run(&self, company_id: &str, instance_id: &str) -> Result<RunReport> {
        self.run_at(company_id, instance_id, Utc::now(), RunTrigger::Manual)
    }

    /// Run an instance against its audience as of `now`.
    pub fn run_at(
        &self,
        company_id: &str,
        instance_id: &str,
        now: DateTime<Utc>,
        trigger: RunTrigger,
    ) -> Result<RunReport> {
        let instance = self
            .db
            .get_instance(company_id, instance_id)?
            .ok_or_else(|| Error::not_found("agent instance", instance_id))?;

        if instance.status != InstanceStatus::Active {
            return Err(Error::invalid_state(
                "agent instance",
                instance_id,
                instance.status,
            ));
        }

        let template = self.template_for(&instance)?;
        let targets = audience::resolve_audience(self.db, &instance)?;
        let greeting = self
            .scripts
            .greeting(template.agent_type, instance.config.tone_preset);

        tracing::info!(
            company_id,
            instance_id,
            trigger = %trigger,
            targets = targets.len(),
            "Starting agent run"
        );

        let mut created = Vec::new();
        let mut skipped_existing = 0;

        for employee_id in &targets {
            if self
                .db
                .find_active_conversation(company_id, instance_id, employee_id)?
                .is_some()
            {
                tracing::debug!(instance_id, employee_id = %employee_id, "Skipping target with active conversation");
                skipped_existing += 1;
                continue;
            }

            let conversation = Conversation::new(company_id, instance_id, employee_id, now);
            match self
                .db
                .open_conversation(&conversation, &NewMessage::agent(greeting.as_str()))
            {
                Ok((opened, _greeting)) => {
                    tracing::debug!(
                        instance_id,
                        employee_id = %employee_id,
                        conversation_id = %opened.id,
                        "Opened conversation"
                    );
                    created.push(opened);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(instance_id, employee_id = %employee_id, "Lost create race, skipping");
                    skipped_existing += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let next_run_at = match self.db.get_schedule(company_id, instance_id)? {
            Some(current) => {
                let next = schedule::after_run(&current, now)?;
                self.db.record_schedule_run(
                    company_id,
                    instance_id,
                    now,
                    next.next_run_at,
                    next.is_active,
                )?;
                next.is_active.then_some(next.next_run_at)
            }
            None => None,
        };

        let report = RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            agent_instance_id: instance_id.to_string(),
            trigger,
            targets_total: targets.len(),
            messages_sent: created.len(),
            created,
            skipped_existing,
            next_run_at,
        };

        self.db.insert_run(&AgentRun {
            id: report.run_id.clone(),
            company_id: report.company_id.clone(),
            agent_instance_id: report.agent_instance_id.clone(),
            trigger,
            started_at: now,
            targets_total: report.targets_total as u32,
            conversations_created: report.created.len() as u32,
            skipped_existing: report.skipped_existing as u32,
            messages_sent: report.messages_sent as u32,
        })?;

        tracing::info!(
            company_id,
            instance_id,
            created = report.created.len(),
            skipped = report.skipped_existing,
            next_run_at = ?report.next_run_at,
            "Agent run complete"
        );

        Ok(report)
    }

    /// Run every active instance whose schedule is due at `now`.
    ///
    /// A failing instance is logged and reported; the others still run.
    pub fn run_due(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.db.list_due_schedules(now)?;
        tracing::info!(due = due.len(), "Scheduler tick");

        let mut report = TickReport::default();
        for listed in due {
            // Another invoker may have run it since the listing
            let still_due = self
                .db
                .get_schedule(&listed.company_id, &listed.agent_instance_id)
                .map(|current| current.is_some_and(|s| schedule::is_due(&s, now)));
            let result = match still_due {
                Ok(true) => self.run_at(
                    &listed.company_id,
                    &listed.agent_instance_id,
                    now,
                    RunTrigger::Schedule,
                ),
                Ok(false) => {
                    tracing::debug!(
                        instance_id = %listed.agent_instance_id,
                        "Schedule already advanced, skipping"
                    );
                    continue;
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(run) => report.runs.push(run),
                Err(e) => {
                    tracing::warn!(
                        company_id = %listed.company_id,
                        instance_id = %listed.agent_instance_id,
                        error = %e,
                        "Scheduled run failed"
                    );
                    report
                        .failures
                        .push((listed.agent_instance_id.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    // ============================================
    // Replies
    // ============================================

    /// Handle an employee reply at the current time.
    pub fn handle_employee_reply(
        &self,
        principal: &Principal,
        conversation_id: &str,
        content: &str,
    ) -> Result<ReplyOutcome> {
        self.handle_employee_reply_at(principal, conversation_id, content, Utc::now())
    }

    /// Append the participant's message and advance the conversation.
    pub fn handle_employee_reply_at(
        &self,
        principal: &Principal,
        conversation_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ReplyOutcome> {
        let company_id = principal.company_id.as_str();
        let conversation = self.load_conversation(company_id, conversation_id)?;

        if principal.user_id != conversation.participant_user_id {
            return Err(Error::Forbidden(format!(
                "user {} is not the participant of conversation {}",
                principal.user_id, conversation_id
            )));
        }
        if let Some(err) = conversation.status.reject_message(conversation_id) {
            return Err(err);
        }
        if content.trim().is_empty() {
            return Err(Error::validation("content", "must not be empty"));
        }

        let instance = self
            .db
            .get_instance(company_id, &conversation.agent_instance_id)?
            .ok_or_else(|| Error::not_found("agent instance", &conversation.agent_instance_id))?;
        let template = self.template_for(&instance)?;

        // Status is re-read inside the append transaction
        let (conversation, _) = self.db.append_message(
            company_id,
            conversation_id,
            &NewMessage::employee(&principal.user_id, content),
            now,
        )?;

        let messages = self.db.all_messages(company_id, conversation_id)?;
        let summary = self.refresh_summary(
            company_id,
            conversation_id,
            &messages,
            template.default_config.escalation_enabled,
            now,
        );

        if let Some(high_risk) = summary.as_ref().filter(|s| s.risk_level == RiskLevel::High) {
            let escalation = self.escalation_for(&conversation, high_risk, &messages, now);
            let conversation =
                self.db
                    .escalate_conversation(company_id, conversation_id, &escalation, now)?;

            tracing::warn!(
                company_id,
                conversation_id,
                escalation_type = %escalation.escalation_type,
                severity = %escalation.severity,
                "Conversation escalated"
            );

            return Ok(ReplyOutcome {
                conversation,
                response: None,
                escalated: true,
                summary,
            });
        }

        // The budget counts agent messages, greeting included
        let agent_turn = messages
            .iter()
            .filter(|m| m.sender_type == SenderType::Agent)
            .count();
        if agent_turn >= template.default_config.max_messages as usize {
            let conversation = self.db.transition_conversation(
                company_id,
                conversation_id,
                ConversationStatus::Completed,
                now,
            )?;
            tracing::info!(
                company_id,
                conversation_id,
                agent_messages = agent_turn,
                message_count = conversation.message_count,
                "Conversation completed: message budget reached"
            );
            return Ok(ReplyOutcome {
                conversation,
                response: None,
                escalated: false,
                summary,
            });
        }

        if summarizer::is_closure(content) {
            let closing = self
                .scripts
                .closing(template.agent_type, instance.config.tone_preset);
            let (_, message) =
                self.db
                    .append_message(company_id, conversation_id, &NewMessage::agent(closing), now)?;
            let conversation = self.db.transition_conversation(
                company_id,
                conversation_id,
                ConversationStatus::Completed,
                now,
            )?;
            tracing::info!(company_id, conversation_id, "Conversation completed: closed by employee");
            return Ok(ReplyOutcome {
                conversation,
                response: Some(message),
                escalated: false,
                summary,
            });
        }

        let topics = summarizer::detect_topics(content);
        let text = self.scripts.follow_up(&FollowUp {
            agent_type: template.agent_type,
            tone: instance.config.tone_preset,
            agent_turn,
            last_reply: content,
            topic: topics.first().copied(),
        });

        let (conversation, message) =
            self.db
                .append_message(company_id, conversation_id, &NewMessage::agent(text), now)?;

        tracing::debug!(
            company_id,
            conversation_id,
            message_count = conversation.message_count,
            "Agent replied"
        );

        Ok(ReplyOutcome {
            conversation,
            response: Some(message),
            escalated: false,
            summary,
        })
    }

    /// Recompute and cache the summary. A failure drops the cached summary
    /// and returns None; it never undoes the message write.
    fn refresh_summary(
        &self,
        company_id: &str,
        conversation_id: &str,
        messages: &[Message],
        escalation_enabled: bool,
        now: DateTime<Utc>,
    ) -> Option<FeedbackSummary> {
        let result = self
            .summarizer
            .summarize(conversation_id, messages, escalation_enabled, now)
            .and_then(|summary| {
                self.db.upsert_summary(company_id, &summary)?;
                Ok(summary)
            });

        match result {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(
                    company_id,
                    conversation_id,
                    classifier = self.summarizer.classifier_name(),
                    error = %e,
                    "Summary unavailable"
                );
                if let Err(e) = self.db.delete_summary(company_id, conversation_id) {
                    tracing::warn!(conversation_id, error = %e, "Failed to clear stale summary");
                }
                None
            }
        }
    }

    fn escalation_for(
        &self,
        conversation: &Conversation,
        summary: &FeedbackSummary,
        messages: &[Message],
        now: DateTime<Utc>,
    ) -> Escalation {
        let (escalation_type, severity, reason) = match self.summarizer.safety_signal(messages) {
            Some(term) => (
                EscalationType::SafetySignal,
                Severity::High,
                format!("distress language detected: \"{term}\""),
            ),
            None => (
                EscalationType::NegativeSentiment,
                Severity::Medium,
                format!(
                    "sentiment score {:.2} below escalation threshold",
                    summary.sentiment_score
                ),
            ),
        };

        Escalation {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            company_id: conversation.company_id.clone(),
            escalation_type,
            severity,
            reason,
            status: EscalationStatus::Open,
            created_at: now,
        }
    }

    // ============================================
    // Read tracking and admin actions
    // ============================================

    /// Participant marks agent messages read. Allowed in any state.
    pub fn mark_read(&self, principal: &Principal, conversation_id: &str) -> Result<Conversation> {
        let conversation = self.load_conversation(&principal.company_id, conversation_id)?;
        if principal.user_id != conversation.participant_user_id {
            return Err(Error::Forbidden(format!(
                "user {} is not the participant of conversation {}",
                principal.user_id, conversation_id
            )));
        }
        self.db
            .mark_conversation_read(&principal.company_id, conversation_id)
    }

    /// Admin close of an active conversation.
    pub fn close(
        &self,
        principal: &Principal,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        principal.require_admin("close conversations")?;
        let conversation = self.db.transition_conversation(
            &principal.company_id,
            conversation_id,
            ConversationStatus::Closed,
            now,
        )?;
        tracing::info!(
            company_id = %principal.company_id,
            conversation_id,
            closed_by = %principal.user_id,
            "Conversation closed"
        );
        Ok(conversation)
    }

    /// A conversation and one page of its messages, for the participant or an admin.
    pub fn view(
        &self,
        principal: &Principal,
        conversation_id: &str,
        after: Option<MessageCursor>,
        limit: usize,
    ) -> Result<(Conversation, MessagePage)> {
        let conversation = self.load_conversation(&principal.company_id, conversation_id)?;
        if !principal.is_admin && principal.user_id != conversation.participant_user_id {
            return Err(Error::Forbidden(format!(
                "user {} may not view conversation {}",
                principal.user_id, conversation_id
            )));
        }
        let page = self
            .db
            .list_messages(&principal.company_id, conversation_id, after, limit)?;
        Ok((conversation, page))
    }

    fn load_conversation(&self, company_id: &str, conversation_id: &str) -> Result<Conversation> {
        self.db
            .get_conversation(company_id, conversation_id)?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))
    }

    fn template_for(&self, instance: &AgentInstance) -> Result<AgentTemplate> {
        self.db
            .get_template(&instance.agent_id)?
            .ok_or_else(|| Error::not_found("agent template", instance.agent_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentRegistry, NewInstance};
    use crate::seed;
    use crate::summarizer::SentimentClassifier;
    use chrono::{Duration, SubsecRound};
    use serde_json::json;
    use std::sync::Arc;

    const COMPANY: &str = "acme";

    fn setup() -> Database {
        crate::logging::init_test();
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        seed::install_templates(&db).unwrap();
        for id in ["emp-1", "emp-2", "emp-3"] {
            db.upsert_employee(&Employee {
                id: id.to_string(),
                company_id: COMPANY.to_string(),
                name: id.to_string(),
                email: None,
                department: Some("Engineering".to_string()),
                is_active: true,
            })
            .unwrap();
        }
        db
    }

    fn admin() -> Principal {
        Principal::admin("admin-1", COMPANY)
    }

    fn create_instance(db: &Database, config: serde_json::Value, cadence: Option<Cadence>) -> AgentInstance {
        AgentRegistry::new(db)
            .create(
                &admin(),
                NewInstance {
                    template_id: seed::PULSE_CHECK_TEMPLATE_ID.to_string(),
                    name: "Pulse".to_string(),
                    config,
                    schedule: cadence.map(|cadence| ScheduleSpec {
                        cadence,
                        timezone: "UTC".to_string(),
                    }),
                },
                Utc::now(),
            )
            .unwrap()
    }

    fn single_target(db: &Database) -> (AgentInstance, Conversation) {
        let instance = create_instance(
            db,
            json!({
                "tone_preset": "friendly_peer",
                "audience_type": "specific",
                "target_employee_ids": ["emp-1"]
            }),
            None,
        );
        let report = Orchestrator::new(db, &Config::default())
            .run(COMPANY, &instance.id)
            .unwrap();
        let conversation = report.created.into_iter().next().unwrap();
        (instance, conversation)
    }

    #[test]
    fn test_run_greets_single_target() {
        let db = setup();
        let (_, conversation) = single_target(&db);

        assert_eq!(conversation.status, ConversationStatus::Active);
        assert_eq!(conversation.message_count, 1);
        assert_eq!(conversation.unread_count, 1);

        let messages = db.all_messages(COMPANY, &conversation.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_type, SenderType::Agent);
        assert!(messages[0].sender_id.is_none());
        assert!(messages[0]
            .content
            .starts_with("Hi there! Just wanted to check in"));
    }

    #[test]
    fn test_run_is_idempotent() {
        let db = setup();
        let instance = create_instance(&db, json!({ "audience_type": "all" }), None);
        let orchestrator = Orchestrator::new(&db, &Config::default());

        let first = orchestrator.run(COMPANY, &instance.id).unwrap();
        let second = orchestrator.run(COMPANY, &instance.id).unwrap();

        assert_eq!(first.created.len(), 3);
        assert_eq!(second.created.len(), 0);
        assert_eq!(second.skipped_existing, 3);
        assert_eq!(db.list_runs(COMPANY, &instance.id).unwrap().len(), 2);
    }

    #[test]
    fn test_run_rejects_missing_and_paused() {
        let db = setup();
        let orchestrator = Orchestrator::new(&db, &Config::default());
        assert!(matches!(
            orchestrator.run(COMPANY, "missing"),
            Err(Error::NotFound { .. })
        ));

        let instance = create_instance(&db, json!({ "audience_type": "all" }), None);
        db.update_instance_status(COMPANY, &instance.id, InstanceStatus::Paused, Utc::now())
            .unwrap();
        let err = orchestrator.run(COMPANY, &instance.id).unwrap_err();
        assert!(matches!(err, Error::InvalidState { ref state, .. } if state == "paused"));

        // Employees may not trigger runs
        assert!(matches!(
            orchestrator.run_for(&Principal::employee("emp-1", COMPANY), &instance.id),
            Err(Error::Forbidden(_))
        ));
    }

    struct Terse;

    impl ScriptProvider for Terse {
        fn greeting(&self, _agent_type: AgentType, _tone: TonePreset) -> String {
            "How's it going?".to_string()
        }

        fn follow_up(&self, turn: &FollowUp<'_>) -> String {
            format!("Noted ({}).", turn.topic.unwrap_or("general"))
        }

        fn closing(&self, _agent_type: AgentType, _tone: TonePreset) -> String {
            "Bye.".to_string()
        }
    }

    #[test]
    fn test_custom_script_provider() {
        let db = setup();
        let instance = create_instance(
            &db,
            json!({ "audience_type": "specific", "target_employee_ids": ["emp-2"] }),
            None,
        );
        let orchestrator =
            Orchestrator::new(&db, &Config::default()).with_scripts(Box::new(Terse));

        let conversation = orchestrator
            .run(COMPANY, &instance.id)
            .unwrap()
            .created
            .remove(0);
        let greeting = db.all_messages(COMPANY, &conversation.id).unwrap();
        assert_eq!(greeting[0].content, "How's it going?");

        let outcome = orchestrator
            .handle_employee_reply(
                &Principal::employee("emp-2", COMPANY),
                &conversation.id,
                "Too many meetings",
            )
            .unwrap();
        assert_eq!(outcome.response.unwrap().content, "Noted (workload).");
    }

    #[test]
    fn test_distress_reply_escalates() {
        let db = setup();
        let (_, conversation) = single_target(&db);
        let orchestrator = Orchestrator::new(&db, &Config::default());
        let employee = Principal::employee("emp-1", COMPANY);

        let outcome = orchestrator
            .handle_employee_reply(
                &employee,
                &conversation.id,
                "I've been drowning in meetings and can't cope",
            )
            .unwrap();

        assert!(outcome.escalated);
        assert!(outcome.response.is_none());
        assert_eq!(outcome.status(), ConversationStatus::Escalated);
        assert_eq!(outcome.summary.as_ref().unwrap().risk_level, RiskLevel::High);

        let escalations = db.list_escalations(COMPANY, None).unwrap();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].escalation_type, EscalationType::SafetySignal);
        assert_eq!(escalations[0].conversation_id, conversation.id);

        // Further replies are rejected and append nothing
        let err = orchestrator
            .handle_employee_reply(&employee, &conversation.id, "hello?")
            .unwrap_err();
        assert!(matches!(err, Error::Escalated { .. }));
        assert_eq!(db.count_messages(COMPANY, &conversation.id).unwrap(), 2);
    }

    #[test]
    fn test_message_budget_completes_conversation() {
        let db = setup();
        let (_, conversation) = single_target(&db);
        let orchestrator = Orchestrator::new(&db, &Config::default());
        let employee = Principal::employee("emp-1", COMPANY);

        // Greeting plus four follow-ups fill the pulse check's five agent turns
        let replies = [
            "Pretty good week overall",
            "Meetings are fine",
            "Sounds ok",
            "Working on the roadmap",
        ];
        for (i, reply) in replies.iter().enumerate() {
            let outcome = orchestrator
                .handle_employee_reply(&employee, &conversation.id, reply)
                .unwrap();
            assert!(outcome.response.is_some(), "reply {} should get a follow-up", i + 1);
            assert_eq!(outcome.status(), ConversationStatus::Active);
            assert_eq!(outcome.conversation.message_count as usize, 3 + 2 * i);
        }

        let last = orchestrator
            .handle_employee_reply(&employee, &conversation.id, "Same as usual")
            .unwrap();
        assert!(last.response.is_none());
        assert_eq!(last.status(), ConversationStatus::Completed);

        let messages = db.all_messages(COMPANY, &conversation.id).unwrap();
        let agent_messages = messages
            .iter()
            .filter(|m| m.sender_type == SenderType::Agent)
            .count();
        assert_eq!(agent_messages, 5);
        assert_eq!(messages.len(), 10);
        assert_eq!(messages.last().unwrap().sender_type, SenderType::Employee);

        let err = orchestrator
            .handle_employee_reply(&employee, &conversation.id, "one more thing")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { ref state, .. } if state == "completed"));
        assert_eq!(db.count_messages(COMPANY, &conversation.id).unwrap(), 10);
    }

    #[test]
    fn test_closure_phrase_completes_with_sign_off() {
        let db = setup();
        let (_, conversation) = single_target(&db);
        let orchestrator = Orchestrator::new(&db, &Config::default());

        let outcome = orchestrator
            .handle_employee_reply(
                &Principal::employee("emp-1", COMPANY),
                &conversation.id,
                "All fine here, that's all",
            )
            .unwrap();

        assert_eq!(outcome.status(), ConversationStatus::Completed);
        let closing = outcome.response.unwrap();
        assert!(closing.content.contains("Thanks for taking the time"));
        assert_eq!(outcome.conversation.message_count, 3);
    }

    #[test]
    fn test_only_participant_may_reply() {
        let db = setup();
        let (_, conversation) = single_target(&db);
        let orchestrator = Orchestrator::new(&db, &Config::default());

        for principal in [Principal::employee("emp-2", COMPANY), admin()] {
            let err = orchestrator
                .handle_employee_reply(&principal, &conversation.id, "hi")
                .unwrap_err();
            assert!(matches!(err, Error::Forbidden(_)));
        }

        // Other tenants see nothing
        let err = orchestrator
            .handle_employee_reply(&Principal::employee("emp-1", "globex"), &conversation.id, "hi")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = orchestrator
            .handle_employee_reply(&Principal::employee("emp-1", COMPANY), &conversation.id, "  ")
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    struct Offline;

    impl SentimentClassifier for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        fn score(&self, _text: &str) -> Result<f64> {
            Err(Error::Classifier("model unavailable".to_string()))
        }
    }

    #[test]
    fn test_classifier_failure_does_not_block_reply() {
        let db = setup();
        let (_, conversation) = single_target(&db);
        let orchestrator = Orchestrator::new(&db, &Config::default()).with_summarizer(
            Summarizer::new(Arc::new(Offline), Config::default().risk),
        );

        let outcome = orchestrator
            .handle_employee_reply(
                &Principal::employee("emp-1", COMPANY),
                &conversation.id,
                "Work is okay",
            )
            .unwrap();

        assert!(outcome.summary.is_none());
        assert!(!outcome.escalated);
        assert!(outcome.response.is_some());
        assert!(db.get_summary(COMPANY, &conversation.id).unwrap().is_none());
        assert_eq!(db.count_messages(COMPANY, &conversation.id).unwrap(), 3);
    }

    #[test]
    fn test_run_due_respects_schedule_and_status() {
        let db = setup();
        let weekly = create_instance(&db, json!({ "audience_type": "all" }), Some(Cadence::Weekly));
        let once = create_instance(
            &db,
            json!({ "audience_type": "specific", "target_employee_ids": ["emp-2"] }),
            Some(Cadence::Once),
        );
        let paused = create_instance(&db, json!({ "audience_type": "all" }), Some(Cadence::Daily));
        db.update_instance_status(COMPANY, &paused.id, InstanceStatus::Paused, Utc::now())
            .unwrap();

        let orchestrator = Orchestrator::new(&db, &Config::default());

        // Nothing is due yet
        assert!(orchestrator.run_due(Utc::now()).unwrap().runs.is_empty());

        let later = (Utc::now() + Duration::days(8)).trunc_subsecs(0);
        let tick = orchestrator.run_due(later).unwrap();
        let ran: Vec<&str> = tick.runs.iter().map(|r| r.agent_instance_id.as_str()).collect();
        assert_eq!(tick.runs.len(), 2);
        assert!(ran.contains(&weekly.id.as_str()));
        assert!(ran.contains(&once.id.as_str()));
        assert!(tick.failures.is_empty());

        let once_schedule = db.get_schedule(COMPANY, &once.id).unwrap().unwrap();
        assert!(!once_schedule.is_active);
        assert_eq!(once_schedule.last_run_at, Some(later));

        let weekly_schedule = db.get_schedule(COMPANY, &weekly.id).unwrap().unwrap();
        assert!(weekly_schedule.next_run_at > later);

        // Immediately ticking again runs nothing
        assert!(orchestrator.run_due(later).unwrap().runs.is_empty());
    }

    #[test]
    fn test_mark_read_and_admin_close() {
        let db = setup();
        let (_, conversation) = single_target(&db);
        let orchestrator = Orchestrator::new(&db, &Config::default());
        let employee = Principal::employee("emp-1", COMPANY);

        assert!(matches!(
            orchestrator.close(&employee, &conversation.id, Utc::now()),
            Err(Error::Forbidden(_))
        ));
        let closed = orchestrator
            .close(&admin(), &conversation.id, Utc::now())
            .unwrap();
        assert_eq!(closed.status, ConversationStatus::Closed);

        let read = orchestrator.mark_read(&employee, &conversation.id).unwrap();
        assert_eq!(read.unread_count, 0);

        let err = orchestrator
            .handle_employee_reply(&employee, &conversation.id, "hello")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { ref state, .. } if state == "closed"));

        let (_, page) = orchestrator
            .view(&admin(), &conversation.id, None, 10)
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(orchestrator
            .view(&Principal::employee("emp-2", COMPANY), &conversation.id, None, 10)
            .is_err());
    }
}
