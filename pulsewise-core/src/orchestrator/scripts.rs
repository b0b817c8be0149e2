//! Scripted agent messages
//!
//! Agents do not generate text; they pick lines from a table keyed by
//! `(agent_type, tone)`. [`ScriptProvider`] is the seam a generative backend
//! would implement instead.

use crate::types::{AgentType, TonePreset};
use std::collections::HashMap;

/// Context for the agent's next turn.
#[derive(Debug, Clone, Copy)]
pub struct FollowUp<'a> {
    pub agent_type: AgentType,
    pub tone: TonePreset,
    /// Agent messages already in the conversation, greeting included
    pub agent_turn: usize,
    /// The employee message being answered
    pub last_reply: &'a str,
    /// First topic detected in `last_reply`
    pub topic: Option<&'a str>,
}

/// Source of agent message text.
pub trait ScriptProvider: Send + Sync {
    /// First message of a conversation
    fn greeting(&self, agent_type: AgentType, tone: TonePreset) -> String;

    /// Agent reply to an employee message
    fn follow_up(&self, turn: &FollowUp<'_>) -> String;

    /// Sign-off after the employee closes the conversation
    fn closing(&self, agent_type: AgentType, tone: TonePreset) -> String;
}

const FALLBACK_GREETING: &str =
    "Hello! I'm checking in on behalf of your HR team. How are things going for you?";

const GREETINGS: &[(AgentType, TonePreset, &str)] = &[
    (
        AgentType::PulseCheck,
        TonePreset::FriendlyPeer,
        "Hi there! Just wanted to check in and see how your week is going. Anything on your mind?",
    ),
    (
        AgentType::PulseCheck,
        TonePreset::Professional,
        "Good morning. This is your weekly pulse check. How would you describe your week so far?",
    ),
    (
        AgentType::PulseCheck,
        TonePreset::Empathetic,
        "Hi, I hope you're doing okay. How are you really feeling about work this week?",
    ),
    (
        AgentType::PulseCheck,
        TonePreset::Direct,
        "Quick pulse check: how was your week, on a scale from rough to great?",
    ),
    (
        AgentType::Onboarding,
        TonePreset::FriendlyPeer,
        "Hey, welcome aboard! How are your first days going? Got everything you need?",
    ),
    (
        AgentType::Onboarding,
        TonePreset::Professional,
        "Welcome to the company. How is your onboarding progressing so far?",
    ),
    (
        AgentType::Onboarding,
        TonePreset::Empathetic,
        "Welcome! Starting somewhere new can be a lot. How are you settling in?",
    ),
    (
        AgentType::ExitInterview,
        TonePreset::Professional,
        "Thank you for taking a few minutes for this exit conversation. What prompted your decision to move on?",
    ),
    (
        AgentType::ExitInterview,
        TonePreset::Empathetic,
        "Thanks for making time for this. We'd really value hearing about your experience here. What led to your decision?",
    ),
    (
        AgentType::ManagerCoaching,
        TonePreset::FriendlyPeer,
        "Hi! Ready for a quick coaching check-in? What's the biggest challenge with your team right now?",
    ),
    (
        AgentType::ManagerCoaching,
        TonePreset::Direct,
        "Coaching check-in: what is the one team issue you most want to fix this month?",
    ),
    (
        AgentType::ChatAgent,
        TonePreset::FriendlyPeer,
        "Hi! I'm your HR assistant. What can I help you with today?",
    ),
];

const FOLLOW_UPS: &[(AgentType, &[&str])] = &[
    (
        AgentType::PulseCheck,
        &[
            "What has been the most energizing part of your work lately?",
            "Is there anything blocking you that we could help remove?",
            "How supported do you feel by your team right now?",
        ],
    ),
    (
        AgentType::Onboarding,
        &[
            "Do you have access to all the tools and systems you need?",
            "Have you had a chance to meet your team and your buddy?",
            "Is anything about your role still unclear?",
        ],
    ),
    (
        AgentType::ExitInterview,
        &[
            "What could we have done differently to keep you?",
            "How would you describe your relationship with your manager?",
            "Would you recommend working here to a friend? Why or why not?",
        ],
    ),
    (
        AgentType::ManagerCoaching,
        &[
            "How have you approached that with your team so far?",
            "What support would help you lead through this?",
            "What would a good outcome look like in a month?",
        ],
    ),
    (
        AgentType::ChatAgent,
        &[
            "Could you tell me a bit more so I can point you in the right direction?",
            "Is there anything else I can look into for you?",
        ],
    ),
];

/// The built-in script table.
#[derive(Debug, Clone)]
pub struct ScriptLibrary {
    greetings: HashMap<(AgentType, TonePreset), &'static str>,
    follow_ups: HashMap<AgentType, &'static [&'static str]>,
}

impl ScriptLibrary {
    pub fn new() -> Self {
        Self {
            greetings: GREETINGS
                .iter()
                .map(|(agent_type, tone, text)| ((*agent_type, *tone), *text))
                .collect(),
            follow_ups: FOLLOW_UPS.iter().copied().collect(),
        }
    }

    fn acknowledgement(tone: TonePreset, turn: &FollowUp<'_>) -> String {
        let base = match tone {
            TonePreset::FriendlyPeer => "Thanks for sharing!",
            TonePreset::Professional => "Thank you for the feedback.",
            TonePreset::Empathetic => "I really appreciate you being open about that.",
            TonePreset::Direct => "Noted.",
        };
        match turn.topic {
            Some(topic) => format!("{base} I've noted your point about {topic}."),
            None => base.to_string(),
        }
    }
}

impl Default for ScriptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptProvider for ScriptLibrary {
    fn greeting(&self, agent_type: AgentType, tone: TonePreset) -> String {
        self.greetings
            .get(&(agent_type, tone))
            .copied()
            .unwrap_or(FALLBACK_GREETING)
            .to_string()
    }

    fn follow_up(&self, turn: &FollowUp<'_>) -> String {
        let questions = self
            .follow_ups
            .get(&turn.agent_type)
            .copied()
            .unwrap_or_default();

        // Turn 1 is the greeting, so the first follow-up asks question 0
        let question = match questions.len() {
            0 => "Is there anything else you'd like to share?",
            n => questions[turn.agent_turn.saturating_sub(1) % n],
        };

        format!("{} {}", Self::acknowledgement(turn.tone, turn), question)
    }

    fn closing(&self, agent_type: AgentType, tone: TonePreset) -> String {
        let thanks = match agent_type {
            AgentType::ExitInterview => "Thank you for your honest feedback, and best of luck in what's next.",
            AgentType::Onboarding => "Thanks! Reach out any time while you settle in.",
            _ => "Thanks for taking the time to chat.",
        };
        match tone {
            TonePreset::Direct | TonePreset::Professional => thanks.to_string(),
            TonePreset::FriendlyPeer | TonePreset::Empathetic => {
                format!("{thanks} Take care!")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_check_friendly_greeting() {
        let scripts = ScriptLibrary::new();
        let greeting = scripts.greeting(AgentType::PulseCheck, TonePreset::FriendlyPeer);
        assert!(greeting.starts_with("Hi there! Just wanted to check in"));
    }

    #[test]
    fn test_missing_pair_uses_fallback() {
        let scripts = ScriptLibrary::new();
        assert_eq!(
            scripts.greeting(AgentType::ExitInterview, TonePreset::FriendlyPeer),
            FALLBACK_GREETING
        );
    }

    #[test]
    fn test_follow_up_advances_with_turn() {
        let scripts = ScriptLibrary::new();
        let mut turn = FollowUp {
            agent_type: AgentType::Onboarding,
            tone: TonePreset::Direct,
            agent_turn: 1,
            last_reply: "fine",
            topic: None,
        };
        let first = scripts.follow_up(&turn);
        assert_eq!(first, "Noted. Do you have access to all the tools and systems you need?");

        turn.agent_turn = 2;
        turn.topic = Some("tools");
        let second = scripts.follow_up(&turn);
        assert!(second.contains("your point about tools"));
        assert!(second.ends_with("Have you had a chance to meet your team and your buddy?"));
    }

    #[test]
    fn test_closing_varies_by_tone() {
        let scripts = ScriptLibrary::new();
        assert!(scripts
            .closing(AgentType::PulseCheck, TonePreset::FriendlyPeer)
            .ends_with("Take care!"));
        assert!(!scripts
            .closing(AgentType::PulseCheck, TonePreset::Direct)
            .contains("Take care"));
    }
}
