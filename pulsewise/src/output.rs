//! Text and JSON rendering for CLI results.

use anyhow::Result;
use pulsewise_core::seed::DemoCompany;
use pulsewise_core::types::{
    AgentTemplate, Audience, Conversation, Escalation, Message, SenderType,
};
use pulsewise_core::{AnalyticsSnapshot, InstanceOverview, ReplyOutcome, RunReport, TickReport};
use serde::Serialize;
use std::collections::BTreeSet;

/// A conversation with its full message history, as printed by `conversation view`.
#[derive(Serialize)]
struct ConversationView<'a> {
    conversation: &'a Conversation,
    messages: &'a [Message],
}

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn line(&self, text: &str) {
        if self.json {
            println!("{}", serde_json::json!({ "message": text }));
        } else {
            println!("{}", text);
        }
    }

    /// Print `value` as JSON when requested, otherwise run `text`.
    fn emit<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }

    pub fn demo_company(&self, installed: usize, company: &DemoCompany) -> Result<()> {
        self.emit(company, || {
            println!("Installed {} template(s)", installed);
            println!(
                "Loaded demo company '{}': {} employees ({} active)",
                company.company_id, company.employees, company.active_employees
            );
            println!("Admin user: {}", company.admin_user_id);
        })
    }

    pub fn templates(&self, templates: &[AgentTemplate]) -> Result<()> {
        self.emit(templates, || {
            if templates.is_empty() {
                println!("No templates installed. Run `pulsewise seed` first.");
                return;
            }
            for t in templates {
                println!(
                    "{:<18} {:<18} max_messages={:<3} escalation={}",
                    t.slug,
                    t.name,
                    t.default_config.max_messages,
                    if t.default_config.escalation_enabled { "on" } else { "off" }
                );
            }
        })
    }

    pub fn overview(&self, overview: &InstanceOverview) -> Result<()> {
        self.emit(overview, || print_overview(overview))
    }

    pub fn overviews(&self, overviews: &[InstanceOverview]) -> Result<()> {
        self.emit(overviews, || {
            if overviews.is_empty() {
                println!("No agent instances.");
            }
            for (i, overview) in overviews.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_overview(overview);
            }
        })
    }

    pub fn targets(&self, targets: &BTreeSet<String>) -> Result<()> {
        self.emit(targets, || {
            println!("{} target(s)", targets.len());
            for id in targets {
                println!("  - {}", id);
            }
        })
    }

    pub fn run(&self, report: &RunReport) -> Result<()> {
        self.emit(report, || print_run(report))
    }

    pub fn tick(&self, tick: &TickReport) -> Result<()> {
        self.emit(tick, || {
            println!(
                "Tick complete: {} run(s), {} failure(s)",
                tick.runs.len(),
                tick.failures.len()
            );
            for report in &tick.runs {
                print_run(report);
            }
            for (instance_id, error) in &tick.failures {
                println!("  ! {}: {}", instance_id, error);
            }
        })
    }

    pub fn reply(&self, outcome: &ReplyOutcome) -> Result<()> {
        self.emit(outcome, || {
            if let Some(response) = &outcome.response {
                println!("Agent: {}", response.content);
            }
            if outcome.escalated {
                println!("Conversation escalated. HR will follow up personally.");
            }
            println!(
                "Status: {} ({} message(s))",
                outcome.status(),
                outcome.conversation.message_count
            );
            if let Some(summary) = &outcome.summary {
                println!(
                    "Sentiment: {} ({:.2}), risk: {}",
                    summary.sentiment, summary.sentiment_score, summary.risk_level
                );
            }
        })
    }

    pub fn conversations(&self, conversations: &[Conversation]) -> Result<()> {
        self.emit(conversations, || {
            if conversations.is_empty() {
                println!("No conversations.");
            }
            for c in conversations {
                println!(
                    "{}  {:<10} {:<12} messages={:<3} unread={}",
                    c.id, c.status, c.participant_user_id, c.message_count, c.unread_count
                );
            }
        })
    }

    pub fn conversation(&self, conversation: &Conversation, messages: &[Message]) -> Result<()> {
        let view = ConversationView {
            conversation,
            messages,
        };
        self.emit(&view, || {
            println!(
                "Conversation {} with {} [{}]",
                conversation.id, conversation.participant_user_id, conversation.status
            );
            for m in messages {
                let who = match m.sender_type {
                    SenderType::Agent => "agent",
                    SenderType::Employee => m.sender_id.as_deref().unwrap_or("employee"),
                    SenderType::System => "system",
                };
                println!(
                    "  #{:<3} {} {}: {}",
                    m.seq,
                    m.created_at.format("%Y-%m-%d %H:%M:%S"),
                    who,
                    m.content
                );
            }
        })
    }

    pub fn escalations(&self, escalations: &[Escalation]) -> Result<()> {
        self.emit(escalations, || {
            if escalations.is_empty() {
                println!("No escalations.");
            }
            for e in escalations {
                println!(
                    "{}  {:<8} {:<18} {:<8} conversation={}",
                    e.created_at.format("%Y-%m-%d %H:%M"),
                    e.status,
                    e.escalation_type,
                    e.severity,
                    e.conversation_id
                );
                println!("    {}", e.reason);
            }
        })
    }

    pub fn snapshot(&self, s: &AnalyticsSnapshot) -> Result<()> {
        self.emit(s, || {
            println!("Conversations:   {}", s.total_conversations);
            println!("  Active:        {}", s.active_conversations);
            println!("  Completed:     {}", s.completed_conversations);
            println!("  Escalated:     {}", s.escalated_conversations);
            println!("  Closed:        {}", s.closed_conversations);
            println!("Targets:         {}", s.total_targets);
            println!("Participation:   {:.0}%", s.participation_rate * 100.0);
            println!("Open escalations: {}", s.open_escalations);
            println!();
            println!("Summarized:      {}", s.summarized_conversations);
            println!("Avg sentiment:   {:.2}", s.avg_sentiment_score);
            let d = &s.sentiment_distribution;
            println!(
                "Sentiment:       positive={} neutral={} negative={} mixed={}",
                d.positive, d.neutral, d.negative, d.mixed
            );
            let r = &s.risk_distribution;
            println!(
                "Risk:            low={} moderate={} high={}",
                r.low, r.moderate, r.high
            );
            if !s.top_tags.is_empty() {
                println!("Top tags:");
                for tag in &s.top_tags {
                    println!("  {:<14} {}", tag.tag, tag.count);
                }
            }
        })
    }
}

fn print_overview(o: &InstanceOverview) {
    let i = &o.instance;
    println!("{} ({})", i.name, i.id);
    println!("  Template:  {}", o.template.slug);
    println!("  Status:    {}", i.status);
    println!(
        "  Audience:  {} / tone {}",
        describe_audience(&i.config.audience),
        i.config.tone_preset
    );
    match &o.schedule {
        Some(s) if s.is_active => println!(
            "  Schedule:  {} ({}), next run {}",
            s.cadence,
            s.timezone,
            s.next_run_at.to_rfc3339()
        ),
        Some(s) => println!("  Schedule:  {} (finished)", s.cadence),
        None => println!("  Schedule:  manual"),
    }
    println!(
        "  Conversations: {} ({} active), {} message(s)",
        o.conversation_count, o.active_conversations, o.message_count
    );
}

fn describe_audience(audience: &Audience) -> String {
    match audience {
        Audience::All => "all employees".to_string(),
        Audience::Department { name } => format!("department {}", name),
        Audience::Specific { employee_ids } => format!("{} named employee(s)", employee_ids.len()),
    }
}

fn print_run(report: &RunReport) {
    println!(
        "Run complete: {} conversation(s) opened, {} skipped, {} target(s)",
        report.created.len(),
        report.skipped_existing,
        report.targets_total
    );
    for c in &report.created {
        println!("  + {} -> {}", c.id, c.participant_user_id);
    }
    if let Some(next) = report.next_run_at {
        println!("Next run: {}", next.to_rfc3339());
    }
}
