//! Core domain types for pulsewise
//!
//! These types are the canonical data model shared by the store, the
//! orchestrator and the analytics layer.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Template** | A system-defined conversational behavior (pulse check, onboarding, ...) |
//! | **Instance** | A company's configured deployment of a template |
//! | **Audience** | Who an instance talks to: everyone, a department, or an explicit list |
//! | **Target** | One resolved (instance, employee) pair |
//! | **Conversation** | A turn-based exchange between one instance and one employee |
//! | **Escalation** | A conversation handed to a human; terminal for automated handling |
//!
//! Enums are stored as snake_case strings. Every enum here has a matching
//! `as_str` and `FromStr` so repository rows round-trip without serde.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum.
macro_rules! string_enum {
    ($ty:ident, $label:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    _ => Err(format!(concat!("unknown ", $label, ": {}"), s)),
                }
            }
        }
    };
}

// ============================================
// Identity
// ============================================

/// Role of the calling principal inside its company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Employee,
}

string_enum!(Role, "role", {
    Admin => "admin",
    Manager => "manager",
    Employee => "employee",
});

/// The authenticated caller, as supplied by the identity collaborator.
///
/// The core trusts these fields and never re-derives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub company_id: String,
    pub role: Role,
    pub is_admin: bool,
}

impl Principal {
    /// An HR admin of `company_id`.
    pub fn admin(user_id: impl Into<String>, company_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            company_id: company_id.into(),
            role: Role::Admin,
            is_admin: true,
        }
    }

    /// A regular employee of `company_id`.
    pub fn employee(user_id: impl Into<String>, company_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            company_id: company_id.into(),
            role: Role::Employee,
            is_admin: false,
        }
    }

    /// Fail with `Forbidden` unless this principal is an admin.
    pub fn require_admin(&self, action: &str) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "user {} may not {}",
                self.user_id, action
            )))
        }
    }
}

// ============================================
// Company directory
// ============================================

/// An employee row from the company directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
}

// ============================================
// Templates
// ============================================

/// Conversational behavior pattern of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    PulseCheck,
    Onboarding,
    ExitInterview,
    ManagerCoaching,
    ChatAgent,
}

string_enum!(AgentType, "agent type", {
    PulseCheck => "pulse_check",
    Onboarding => "onboarding",
    ExitInterview => "exit_interview",
    ManagerCoaching => "manager_coaching",
    ChatAgent => "chat_agent",
});

impl AgentType {
    /// Returns the display name for this agent type
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::PulseCheck => "Pulse Check",
            AgentType::Onboarding => "Onboarding Buddy",
            AgentType::ExitInterview => "Exit Interview",
            AgentType::ManagerCoaching => "Manager Coaching",
            AgentType::ChatAgent => "HR Assistant",
        }
    }
}

/// Behavior defaults carried by a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Total messages (agent + employee) before the conversation completes
    pub max_messages: u32,
    /// Whether strongly negative sentiment alone escalates
    pub escalation_enabled: bool,
}

/// Immutable, system-provided agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub agent_type: AgentType,
    pub description: String,
    pub default_config: TemplateConfig,
}

// ============================================
// Instances
// ============================================

/// Voice used by the scripted messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TonePreset {
    FriendlyPeer,
    Professional,
    Empathetic,
    Direct,
}

string_enum!(TonePreset, "tone preset", {
    FriendlyPeer => "friendly_peer",
    Professional => "professional",
    Empathetic => "empathetic",
    Direct => "direct",
});

/// Who an agent instance talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "audience_type", rename_all = "snake_case")]
pub enum Audience {
    /// Every active employee of the company
    All,
    /// Active employees of one department (exact, case-sensitive)
    Department {
        #[serde(rename = "target_department")]
        name: String,
    },
    /// An explicit employee list
    Specific {
        #[serde(rename = "target_employee_ids")]
        employee_ids: Vec<String>,
    },
}

impl Audience {
    pub fn kind(&self) -> &'static str {
        match self {
            Audience::All => "all",
            Audience::Department { .. } => "department",
            Audience::Specific { .. } => "specific",
        }
    }

    /// Ids stored as explicit targets; only `Specific` audiences have them.
    pub fn explicit_ids(&self) -> Option<&[String]> {
        match self {
            Audience::Specific { employee_ids } => Some(employee_ids),
            _ => None,
        }
    }
}

/// Typed instance configuration, decoded once from the loose JSON the
/// surrounding system sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub tone_preset: TonePreset,
    #[serde(flatten)]
    pub audience: Audience,
}

/// Wire shape before validation: every field optional so errors can name
/// the missing one.
#[derive(Debug, Deserialize)]
struct RawInstanceConfig {
    tone_preset: Option<String>,
    audience_type: Option<String>,
    target_department: Option<String>,
    target_employee_ids: Option<Vec<String>>,
}

impl InstanceConfig {
    /// Decode and validate a JSON config object.
    ///
    /// `tone_preset` defaults to `friendly_peer`. The audience fields required
    /// by `audience_type` must be present and non-empty.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let raw: RawInstanceConfig = serde_json::from_value(value.clone())
            .map_err(|e| Error::validation("config", e.to_string()))?;

        let tone_preset = match raw.tone_preset.as_deref() {
            None => TonePreset::FriendlyPeer,
            Some(s) => s
                .parse()
                .map_err(|e: String| Error::validation("tone_preset", e))?,
        };

        let audience = match raw.audience_type.as_deref() {
            None => return Err(Error::validation("audience_type", "is required")),
            Some("all") => Audience::All,
            Some("department") => {
                let name = raw
                    .target_department
                    .filter(|d| !d.trim().is_empty())
                    .ok_or_else(|| {
                        Error::validation("target_department", "is required for department audiences")
                    })?;
                Audience::Department { name }
            }
            Some("specific") => {
                let mut seen = BTreeSet::new();
                let ids: Vec<String> = raw
                    .target_employee_ids
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|id| !id.trim().is_empty() && seen.insert(id.clone()))
                    .collect();
                if ids.is_empty() {
                    return Err(Error::validation(
                        "target_employee_ids",
                        "must list at least one employee for specific audiences",
                    ));
                }
                Audience::Specific { employee_ids: ids }
            }
            Some(other) => {
                return Err(Error::validation(
                    "audience_type",
                    format!("unknown audience type: {}", other),
                ))
            }
        };

        Ok(Self {
            tone_preset,
            audience,
        })
    }

    /// Encode back into the flat JSON shape stored in `agent_instances.config`.
    pub fn to_json(&self) -> serde_json::Value {
        // Serializing a struct of strings and a tagged enum cannot fail.
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Lifecycle of an instance. Any status may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Paused,
    Draft,
}

string_enum!(InstanceStatus, "instance status", {
    Active => "active",
    Paused => "paused",
    Draft => "draft",
});

/// A company's configured deployment of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub company_id: String,
    /// FK to agent_templates
    pub agent_id: String,
    pub created_by: String,
    pub name: String,
    pub config: InstanceConfig,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Schedules
// ============================================

/// Recurrence pattern of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Once,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

string_enum!(Cadence, "cadence", {
    Once => "once",
    Daily => "daily",
    Weekly => "weekly",
    Biweekly => "biweekly",
    Monthly => "monthly",
});

/// Schedule requested at instance creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub cadence: Cadence,
    /// IANA timezone name
    pub timezone: String,
}

/// When an instance next runs. At most one per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSchedule {
    pub agent_instance_id: String,
    pub company_id: String,
    pub cadence: Cadence,
    pub timezone: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

// ============================================
// Conversations
// ============================================

/// Conversation state machine.
///
/// `Active` is initial; all other states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Escalated,
    Closed,
}

string_enum!(ConversationStatus, "conversation status", {
    Active => "active",
    Completed => "completed",
    Escalated => "escalated",
    Closed => "closed",
});

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConversationStatus::Active)
    }

    /// The error a new message against this state produces, if any.
    pub fn reject_message(&self, conversation_id: &str) -> Option<Error> {
        match self {
            ConversationStatus::Active => None,
            ConversationStatus::Escalated => Some(Error::Escalated {
                conversation_id: conversation_id.to_string(),
            }),
            other => Some(Error::invalid_state("conversation", conversation_id, other)),
        }
    }
}

/// A turn-based exchange between one instance and one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub company_id: String,
    pub agent_instance_id: String,
    pub participant_user_id: String,
    pub status: ConversationStatus,
    pub started_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub unread_count: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// A fresh active conversation with no messages yet.
    pub fn new(
        company_id: &str,
        agent_instance_id: &str,
        participant_user_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            agent_instance_id: agent_instance_id.to_string(),
            participant_user_id: participant_user_id.to_string(),
            status: ConversationStatus::Active,
            started_at: now,
            last_message_at: None,
            message_count: 0,
            unread_count: 0,
            completed_at: None,
        }
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Agent,
    Employee,
    System,
}

string_enum!(SenderType, "sender type", {
    Agent => "agent",
    Employee => "employee",
    System => "system",
});

/// An appended message. `seq` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub seq: u32,
    pub sender_type: SenderType,
    /// None for agent messages
    pub sender_id: Option<String>,
    pub content: String,
    pub content_type: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A message before the store assigns its position.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub content: String,
    pub content_type: String,
}

impl NewMessage {
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            sender_type: SenderType::Agent,
            sender_id: None,
            content: content.into(),
            content_type: "text".to_string(),
        }
    }

    pub fn employee(user_id: &str, content: impl Into<String>) -> Self {
        Self {
            sender_type: SenderType::Employee,
            sender_id: Some(user_id.to_string()),
            content: content.into(),
            content_type: "text".to_string(),
        }
    }
}

/// Pagination cursor: the `(created_at, seq)` of the last message seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub seq: u32,
}

impl From<&Message> for MessageCursor {
    fn from(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            seq: message.seq,
        }
    }
}

/// One page of messages plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<MessageCursor>,
}

// ============================================
// Summaries
// ============================================

/// Overall sentiment category of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

string_enum!(Sentiment, "sentiment", {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
    Mixed => "mixed",
});

/// Urgency classification of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

string_enum!(RiskLevel, "risk level", {
    Low => "low",
    Moderate => "moderate",
    High => "high",
});

/// Priority of a suggested action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

string_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// A short imperative follow-up for HR or the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    /// In [0, 1]
    pub confidence: f64,
    pub priority: Priority,
}

/// Derived summary of a conversation. Always recomputable from its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub conversation_id: String,
    pub sentiment: Sentiment,
    /// Roughly in [-1, 1]
    pub sentiment_score: f64,
    /// In [0, 1]
    pub engagement_score: f64,
    pub tags: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub risk_level: RiskLevel,
    pub escalated: bool,
    pub computed_at: DateTime<Utc>,
    /// Name of the classifier that produced the sentiment score
    pub classifier: String,
}

// ============================================
// Escalations
// ============================================

/// What triggered an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    /// Distress or safety language was present
    SafetySignal,
    /// Strongly negative sentiment on an escalation-enabled template
    NegativeSentiment,
}

string_enum!(EscalationType, "escalation type", {
    SafetySignal => "safety_signal",
    NegativeSentiment => "negative_sentiment",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(Severity, "severity", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    Resolved,
}

string_enum!(EscalationStatus, "escalation status", {
    Open => "open",
    Resolved => "resolved",
});

/// A conversation flagged for human HR follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub conversation_id: String,
    pub company_id: String,
    pub escalation_type: EscalationType,
    pub severity: Severity,
    pub reason: String,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Runs
// ============================================

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Schedule,
}

string_enum!(RunTrigger, "run trigger", {
    Manual => "manual",
    Schedule => "schedule",
});

/// Bookkeeping row for one execution of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub company_id: String,
    pub agent_instance_id: String,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub targets_total: u32,
    pub conversations_created: u32,
    pub skipped_existing: u32,
    pub messages_sent: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enum_round_trip_strings() {
        assert_eq!("pulse_check".parse::<AgentType>(), Ok(AgentType::PulseCheck));
        assert_eq!(ConversationStatus::Escalated.as_str(), "escalated");
        assert!("sometimes".parse::<Cadence>().is_err());
    }

    #[test]
    fn test_decode_department_config() {
        let config = InstanceConfig::from_json(&json!({
            "tone_preset": "empathetic",
            "audience_type": "department",
            "target_department": "Engineering"
        }))
        .unwrap();

        assert_eq!(config.tone_preset, TonePreset::Empathetic);
        assert_eq!(
            config.audience,
            Audience::Department {
                name: "Engineering".to_string()
            }
        );
    }

    #[test]
    fn test_decode_specific_config_dedupes_ids() {
        let config = InstanceConfig::from_json(&json!({
            "audience_type": "specific",
            "target_employee_ids": ["e1", "e2", "e1", ""]
        }))
        .unwrap();

        assert_eq!(config.tone_preset, TonePreset::FriendlyPeer);
        assert_eq!(
            config.audience.explicit_ids(),
            Some(&["e1".to_string(), "e2".to_string()][..])
        );
    }

    #[test]
    fn test_decode_rejects_missing_audience_fields() {
        let err = InstanceConfig::from_json(&json!({ "audience_type": "department" })).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "target_department"));

        let err = InstanceConfig::from_json(&json!({ "audience_type": "specific" })).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "target_employee_ids"));

        let err = InstanceConfig::from_json(&json!({ "tone_preset": "direct" })).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "audience_type"));

        let err = InstanceConfig::from_json(&json!({
            "audience_type": "all",
            "tone_preset": "sarcastic"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "tone_preset"));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = InstanceConfig {
            tone_preset: TonePreset::Professional,
            audience: Audience::Specific {
                employee_ids: vec!["e9".to_string()],
            },
        };
        let value = config.to_json();
        assert_eq!(value["audience_type"], "specific");
        assert_eq!(value["target_employee_ids"][0], "e9");
        assert_eq!(InstanceConfig::from_json(&value).unwrap(), config);
    }

    #[test]
    fn test_terminal_states_reject_messages() {
        assert!(ConversationStatus::Active.reject_message("c").is_none());
        assert!(matches!(
            ConversationStatus::Escalated.reject_message("c"),
            Some(Error::Escalated { .. })
        ));
        assert!(matches!(
            ConversationStatus::Closed.reject_message("c"),
            Some(Error::InvalidState { .. })
        ));
        assert!(ConversationStatus::Completed.is_terminal());
    }

    #[test]
    fn test_require_admin() {
        assert!(Principal::admin("a", "co").require_admin("run agents").is_ok());
        assert!(matches!(
            Principal::employee("e", "co").require_admin("run agents"),
            Err(Error::Forbidden(_))
        ));
    }
}
