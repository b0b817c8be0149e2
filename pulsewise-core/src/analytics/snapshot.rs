//! Company-wide aggregation of conversations and their summaries.

use crate::types::{Conversation, ConversationStatus, FeedbackSummary, RiskLevel, Sentiment};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Conversation counts per sentiment category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    pub mixed: usize,
}

/// Conversation counts per risk level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskDistribution {
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Dashboard numbers for a set of conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    // Totals
    pub total_conversations: usize,
    pub active_conversations: usize,
    pub completed_conversations: usize,
    pub escalated_conversations: usize,
    pub closed_conversations: usize,

    // Summaries
    /// Conversations with a cached summary
    pub summarized_conversations: usize,
    pub sentiment_distribution: SentimentDistribution,
    pub risk_distribution: RiskDistribution,
    /// Most frequent tags, ties broken by tag
    pub top_tags: Vec<TagCount>,
    /// Mean sentiment score; 0 when no summaries exist
    pub avg_sentiment_score: f64,

    // Reach
    pub total_targets: usize,
    /// Conversations per target; 0 when there are no targets
    pub participation_rate: f64,
    pub open_escalations: usize,
}

/// Aggregate conversations and their summaries.
///
/// Summaries for conversations outside `conversations` are ignored.
pub fn aggregate(
    conversations: &[Conversation],
    summaries: &[FeedbackSummary],
    total_targets: usize,
    top_n: usize,
) -> AnalyticsSnapshot {
    let mut snapshot = AnalyticsSnapshot {
        total_conversations: conversations.len(),
        total_targets,
        ..Default::default()
    };

    for conversation in conversations {
        match conversation.status {
            ConversationStatus::Active => snapshot.active_conversations += 1,
            ConversationStatus::Completed => snapshot.completed_conversations += 1,
            ConversationStatus::Escalated => snapshot.escalated_conversations += 1,
            ConversationStatus::Closed => snapshot.closed_conversations += 1,
        }
    }

    let ids: HashSet<&str> = conversations.iter().map(|c| c.id.as_str()).collect();
    let summaries: Vec<&FeedbackSummary> = summaries
        .iter()
        .filter(|s| ids.contains(s.conversation_id.as_str()))
        .collect();

    let mut tag_counts: HashMap<&str, usize> = HashMap::new();
    let mut score_total = 0.0;

    for summary in &summaries {
        let sentiment = &mut snapshot.sentiment_distribution;
        match summary.sentiment {
            Sentiment::Positive => sentiment.positive += 1,
            Sentiment::Neutral => sentiment.neutral += 1,
            Sentiment::Negative => sentiment.negative += 1,
            Sentiment::Mixed => sentiment.mixed += 1,
        }

        let risk = &mut snapshot.risk_distribution;
        match summary.risk_level {
            RiskLevel::Low => risk.low += 1,
            RiskLevel::Moderate => risk.moderate += 1,
            RiskLevel::High => risk.high += 1,
        }

        for tag in &summary.tags {
            *tag_counts.entry(tag.as_str()).or_default() += 1;
        }
        score_total += summary.sentiment_score;
    }

    snapshot.summarized_conversations = summaries.len();
    if !summaries.is_empty() {
        snapshot.avg_sentiment_score = score_total / summaries.len() as f64;
    }
    if total_targets > 0 {
        snapshot.participation_rate = conversations.len() as f64 / total_targets as f64;
    }

    let mut tags: Vec<TagCount> = tag_counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect();
    tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    tags.truncate(top_n);
    snapshot.top_tags = tags;

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conversation(id: &str, status: ConversationStatus) -> Conversation {
        let mut c = Conversation::new("acme", "inst-1", id, Utc::now());
        c.id = id.to_string();
        c.status = status;
        c
    }

    fn summary(id: &str, sentiment: Sentiment, score: f64, tags: &[&str]) -> FeedbackSummary {
        FeedbackSummary {
            conversation_id: id.to_string(),
            sentiment,
            sentiment_score: score,
            engagement_score: 0.5,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            action_items: Vec::new(),
            risk_level: if score < -0.5 {
                RiskLevel::High
            } else {
                RiskLevel::Low
            },
            escalated: false,
            computed_at: Utc::now(),
            classifier: "lexicon".to_string(),
        }
    }

    #[test]
    fn test_empty_input() {
        let snapshot = aggregate(&[], &[], 0, 5);
        assert_eq!(snapshot.total_conversations, 0);
        assert_eq!(snapshot.avg_sentiment_score, 0.0);
        assert_eq!(snapshot.participation_rate, 0.0);
        assert!(snapshot.top_tags.is_empty());
    }

    #[test]
    fn test_counts_and_distribution() {
        let conversations = vec![
            conversation("c1", ConversationStatus::Active),
            conversation("c2", ConversationStatus::Completed),
            conversation("c3", ConversationStatus::Escalated),
        ];
        let summaries = vec![
            summary("c1", Sentiment::Positive, 0.8, &["team", "career"]),
            summary("c3", Sentiment::Negative, -1.0, &["workload", "team"]),
            // Not in the conversation set
            summary("c9", Sentiment::Negative, -1.0, &["workload"]),
        ];

        let snapshot = aggregate(&conversations, &summaries, 4, 5);

        assert_eq!(snapshot.active_conversations, 1);
        assert_eq!(snapshot.completed_conversations, 1);
        assert_eq!(snapshot.escalated_conversations, 1);
        assert_eq!(snapshot.summarized_conversations, 2);
        assert_eq!(snapshot.sentiment_distribution.positive, 1);
        assert_eq!(snapshot.sentiment_distribution.negative, 1);
        assert_eq!(snapshot.risk_distribution.high, 1);
        assert!((snapshot.avg_sentiment_score - (-0.1)).abs() < 1e-9);
        assert_eq!(snapshot.participation_rate, 0.75);
    }

    #[test]
    fn test_top_tags_ties_break_by_name() {
        let conversations = vec![
            conversation("c1", ConversationStatus::Active),
            conversation("c2", ConversationStatus::Active),
        ];
        let summaries = vec![
            summary("c1", Sentiment::Neutral, 0.0, &["workload", "culture", "tools"]),
            summary("c2", Sentiment::Neutral, 0.0, &["workload", "career"]),
        ];

        let snapshot = aggregate(&conversations, &summaries, 2, 3);
        let tags: Vec<(&str, usize)> = snapshot
            .top_tags
            .iter()
            .map(|t| (t.tag.as_str(), t.count))
            .collect();
        assert_eq!(tags, vec![("workload", 2), ("career", 1), ("culture", 1)]);
    }
}
