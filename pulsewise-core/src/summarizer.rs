//! Conversation summarization
//!
//! Derives a [`FeedbackSummary`] from a conversation's message history. Only
//! employee-authored messages are scored. Summaries are recomputed from the
//! full history after every employee message and replace the cached row.
//!
//! ## Risk rule
//!
//! | Risk | Condition |
//! |------|-----------|
//! | high | a distress/safety term is present, or the score is below `negative_threshold` on an escalation-enabled template |
//! | moderate | overall sentiment is negative |
//! | low | otherwise |
//!
//! Sentiment scoring is pluggable through [`SentimentClassifier`]; the
//! default [`LexiconClassifier`] is rule based.

use crate::config::RiskConfig;
use crate::error::{Error, Result};
use crate::types::{
    ActionItem, FeedbackSummary, Message, Priority, RiskLevel, SenderType, Sentiment,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Scores a piece of text for sentiment.
///
/// Implementations return a value in `[-1, 1]`; values outside are clamped
/// and non-finite values are a classifier error.
pub trait SentimentClassifier: Send + Sync {
    /// Stable identifier recorded on each summary
    fn name(&self) -> &str;

    /// Score one message
    fn score(&self, text: &str) -> Result<f64>;
}

// ============================================
// Lexicon classifier
// ============================================

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "happy", "love", "loving", "enjoy", "enjoying", "excited", "supported",
    "productive", "thanks", "thank", "awesome", "fine", "better", "clear", "helpful",
    "appreciate", "appreciated", "motivated", "positive", "fun", "welcome", "welcomed",
    "glad", "excellent", "smooth", "calm", "proud",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "stressed", "stress", "stressful", "tired", "exhausted", "frustrated",
    "frustrating", "unhappy", "overwhelmed", "drowning", "worried", "angry", "annoyed",
    "difficult", "struggling", "confused", "burnout", "sad", "toxic", "unfair", "ignored",
    "hate", "terrible", "awful", "lonely", "anxious", "undervalued", "overworked", "lost",
];

const NEGATIONS: &[&str] = &["not", "never", "no", "don't", "isn't", "wasn't", "aren't"];

/// Counts positive and negative lexicon hits; score is `(pos - neg) / (pos + neg)`.
///
/// A negation directly before a word flips its polarity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl SentimentClassifier for LexiconClassifier {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn score(&self, text: &str) -> Result<f64> {
        let tokens = tokenize(text);
        let (mut positive, mut negative) = (0u32, 0u32);

        for (i, token) in tokens.iter().enumerate() {
            let negated = i > 0 && NEGATIONS.contains(&tokens[i - 1].as_str());
            let polarity = if POSITIVE_WORDS.contains(&token.as_str()) {
                1
            } else if NEGATIVE_WORDS.contains(&token.as_str()) {
                -1
            } else {
                0
            };
            match (polarity, negated) {
                (1, false) | (-1, true) => positive += 1,
                (-1, false) | (1, true) => negative += 1,
                _ => {}
            }
        }

        let hits = positive + negative;
        if hits == 0 {
            return Ok(0.0);
        }
        Ok((positive as f64 - negative as f64) / hits as f64)
    }
}

/// Lowercase words, apostrophes kept so "can't" stays one token.
fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether one of the last two words of `prefix` is a negation.
fn negated_before(prefix: &str) -> bool {
    tokenize(prefix)
        .iter()
        .rev()
        .take(2)
        .any(|t| NEGATIONS.contains(&t.as_str()))
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

// ============================================
// Topic and distress tables
// ============================================

/// Distress and safety language; any hit makes a conversation high risk.
pub const DISTRESS_TERMS: &[&str] = &[
    "can't cope",
    "cannot cope",
    "drowning",
    "breaking point",
    "burned out",
    "burnt out",
    "hopeless",
    "panic attack",
    "harassed",
    "harassment",
    "unsafe",
    "self-harm",
    "hurt myself",
    "suicidal",
    "bullied",
    "bullying",
    "discriminated",
    "threatened",
    "can't go on",
];

struct Topic {
    tag: &'static str,
    keywords: &'static [&'static str],
    action: &'static str,
}

const TOPICS: &[Topic] = &[
    Topic {
        tag: "workload",
        keywords: &["workload", "meetings", "meeting", "deadline", "deadlines", "overtime", "busy", "hours", "overworked"],
        action: "Review workload and meeting load with the team lead",
    },
    Topic {
        tag: "wellbeing",
        keywords: &["stress", "stressed", "burnout", "tired", "exhausted", "cope", "overwhelmed", "sleep", "health", "drowning", "anxious"],
        action: "Check in on wellbeing and share support resources",
    },
    Topic {
        tag: "manager",
        keywords: &["manager", "boss", "supervisor", "lead", "1:1", "one-on-one"],
        action: "Schedule a 1:1 between the employee and their manager",
    },
    Topic {
        tag: "team",
        keywords: &["team", "colleague", "colleagues", "coworker", "coworkers", "teammate", "teammates"],
        action: "Discuss team dynamics at the next retro",
    },
    Topic {
        tag: "career",
        keywords: &["career", "promotion", "growth", "learn", "learning", "skills", "mentor", "mentorship"],
        action: "Set up a career development conversation",
    },
    Topic {
        tag: "compensation",
        keywords: &["salary", "pay", "compensation", "bonus", "raise", "equity", "benefits"],
        action: "Review compensation and benefits questions with HR",
    },
    Topic {
        tag: "onboarding",
        keywords: &["onboarding", "laptop", "access", "setup", "training", "orientation"],
        action: "Follow up on open onboarding tasks",
    },
    Topic {
        tag: "tools",
        keywords: &["tools", "tool", "software", "slack", "jira", "system", "systems"],
        action: "Collect tooling feedback for IT",
    },
    Topic {
        tag: "remote work",
        keywords: &["remote", "office", "hybrid", "commute", "wfh"],
        action: "Review remote and hybrid arrangements",
    },
    Topic {
        tag: "culture",
        keywords: &["culture", "values", "inclusion", "recognition", "morale"],
        action: "Share culture feedback with the people team",
    },
];

fn topic_hits(topic: &Topic, tokens: &[String], text: &str) -> u32 {
    topic
        .keywords
        .iter()
        .map(|kw| {
            if kw.contains(|c: char| !c.is_alphanumeric()) {
                text.matches(kw).count() as u32
            } else {
                tokens.iter().filter(|t| t.as_str() == *kw).count() as u32
            }
        })
        .sum()
}

/// Topic tags mentioned in one message, in table order.
pub fn detect_topics(text: &str) -> Vec<&'static str> {
    let normalized = normalize(text);
    let tokens = tokenize(text);
    TOPICS
        .iter()
        .filter(|topic| topic_hits(topic, &tokens, &normalized) > 0)
        .map(|topic| topic.tag)
        .collect()
}

// ============================================
// Summarizer
// ============================================

/// Computes feedback summaries with a pluggable classifier.
#[derive(Clone)]
pub struct Summarizer {
    classifier: Arc<dyn SentimentClassifier>,
    risk: RiskConfig,
    /// Built-in terms plus configured extras, lowercased, blanks dropped
    distress_terms: Vec<String>,
}

impl Summarizer {
    pub fn new(classifier: Arc<dyn SentimentClassifier>, risk: RiskConfig) -> Self {
        let distress_terms = DISTRESS_TERMS
            .iter()
            .map(|t| t.to_string())
            .chain(
                risk.extra_distress_terms
                    .iter()
                    .map(|t| normalize(t.trim()))
                    .filter(|t| !t.is_empty()),
            )
            .collect();
        Self {
            classifier,
            risk,
            distress_terms,
        }
    }

    /// Lexicon classifier with the given thresholds
    pub fn lexicon(risk: RiskConfig) -> Self {
        Self::new(Arc::new(LexiconClassifier::new()), risk)
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// First distress term found in the employee messages, if any.
    ///
    /// An occurrence preceded by a negation within two words ("no longer
    /// drowning") does not count.
    pub fn safety_signal(&self, messages: &[Message]) -> Option<String> {
        employee_messages(messages).find_map(|m| {
            let text = normalize(&m.content);
            self.distress_terms
                .iter()
                .find(|term| {
                    text.match_indices(term.as_str())
                        .any(|(at, _)| !negated_before(&text[..at]))
                })
                .cloned()
        })
    }

    /// Summarize a conversation's full message history.
    ///
    /// Fails only when the classifier fails.
    pub fn summarize(
        &self,
        conversation_id: &str,
        messages: &[Message],
        escalation_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<FeedbackSummary> {
        let employee: Vec<&Message> = employee_messages(messages).collect();

        let mut scores = Vec::with_capacity(employee.len());
        for message in &employee {
            let score = self.classifier.score(&message.content)?;
            if !score.is_finite() {
                return Err(Error::Classifier(format!(
                    "{} returned a non-finite score for message {}",
                    self.classifier.name(),
                    message.seq
                )));
            }
            scores.push(score.clamp(-1.0, 1.0));
        }

        let sentiment_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let sentiment = self.categorize(sentiment_score, &scores);

        let safety_signal = self.safety_signal(messages).is_some();
        let risk_level = if safety_signal
            || (escalation_enabled && sentiment_score < self.risk.negative_threshold)
        {
            RiskLevel::High
        } else if sentiment == Sentiment::Negative {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        };

        let tags = extract_tags(&employee);
        let action_items = derive_action_items(&employee, risk_level, sentiment);

        Ok(FeedbackSummary {
            conversation_id: conversation_id.to_string(),
            sentiment,
            sentiment_score,
            engagement_score: engagement(messages, &employee),
            tags,
            action_items,
            risk_level,
            escalated: risk_level == RiskLevel::High,
            computed_at: now,
            classifier: self.classifier.name().to_string(),
        })
    }

    /// Mixed when individual messages fall on both sides of the band while
    /// the average stays inside it.
    fn categorize(&self, average: f64, scores: &[f64]) -> Sentiment {
        let band = self.risk.sentiment_band;
        if average > band {
            Sentiment::Positive
        } else if average < -band {
            Sentiment::Negative
        } else if scores.iter().any(|s| *s > band) && scores.iter().any(|s| *s < -band) {
            Sentiment::Mixed
        } else {
            Sentiment::Neutral
        }
    }
}

fn employee_messages(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages
        .iter()
        .filter(|m| m.sender_type == SenderType::Employee)
}

/// Half reply ratio, half verbosity (30 words per reply saturates).
fn engagement(all: &[Message], employee: &[&Message]) -> f64 {
    if employee.is_empty() {
        return 0.0;
    }
    let agent = all
        .iter()
        .filter(|m| m.sender_type == SenderType::Agent)
        .count()
        .max(1);
    let ratio = (employee.len() as f64 / agent as f64).min(1.0);
    let words: usize = employee
        .iter()
        .map(|m| m.content.split_whitespace().count())
        .sum();
    let verbosity = (words as f64 / employee.len() as f64 / 30.0).min(1.0);
    0.5 * ratio + 0.5 * verbosity
}

fn extract_tags(employee: &[&Message]) -> Vec<String> {
    TOPICS
        .iter()
        .filter(|topic| {
            employee.iter().any(|m| {
                let text = normalize(&m.content);
                topic_hits(topic, &tokenize(&m.content), &text) > 0
            })
        })
        .map(|topic| topic.tag.to_string())
        .collect()
}

/// Employee closure phrases ("that's all", "bye", ...).
pub fn is_closure(text: &str) -> bool {
    const PHRASES: &[&str] = &[
        "that's all",
        "that is all",
        "that's it for now",
        "nothing else",
        "i'm done",
        "no thanks",
    ];
    let normalized = normalize(text);
    PHRASES.iter().any(|p| normalized.contains(p))
        || tokenize(text)
            .iter()
            .any(|t| t == "bye" || t == "goodbye")
}

/// Action items come from the two most recent employee messages.
fn derive_action_items(
    employee: &[&Message],
    risk_level: RiskLevel,
    sentiment: Sentiment,
) -> Vec<ActionItem> {
    let priority = match (risk_level, sentiment) {
        (RiskLevel::High, _) => Priority::High,
        (RiskLevel::Moderate, _) | (_, Sentiment::Negative) => Priority::Medium,
        _ => Priority::Low,
    };

    let mut items: Vec<ActionItem> = Vec::new();
    for message in employee.iter().rev().take(2) {
        let text = normalize(&message.content);
        let tokens = tokenize(&message.content);
        for topic in TOPICS {
            let hits = topic_hits(topic, &tokens, &text);
            if hits == 0 || items.iter().any(|i| i.text == topic.action) {
                continue;
            }
            items.push(ActionItem {
                text: topic.action.to_string(),
                confidence: (0.5 + 0.1 * hits as f64).min(0.95),
                priority,
            });
        }
    }

    if risk_level == RiskLevel::High && items.is_empty() {
        items.push(ActionItem {
            text: "Reach out to the employee personally".to_string(),
            confidence: 0.9,
            priority: Priority::High,
        });
    }

    items
}
