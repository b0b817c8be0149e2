//! Analytics for HR dashboards
//!
//! [`aggregate`] is a pure function over conversations and cached summaries.
//! [`Analytics`] loads those inputs from the store for one company, optionally
//! narrowed to a single instance.

mod snapshot;

pub use snapshot::{aggregate, AnalyticsSnapshot, RiskDistribution, SentimentDistribution, TagCount};

use crate::audience;
use crate::config::AnalyticsConfig;
use crate::db::{ConversationFilter, Database};
use crate::error::{Error, Result};
use crate::types::{EscalationStatus, Principal};
use std::collections::HashSet;

pub struct Analytics<'a> {
    db: &'a Database,
    top_tags: usize,
}

impl<'a> Analytics<'a> {
    pub fn new(db: &'a Database, config: &AnalyticsConfig) -> Self {
        Self {
            db,
            top_tags: config.top_tags,
        }
    }

    /// Snapshot of the principal's company, or of one of its instances.
    ///
    /// Targets are resolved fresh, so the participation rate reflects
    /// current headcount.
    pub fn company_snapshot(
        &self,
        principal: &Principal,
        instance_id: Option<&str>,
    ) -> Result<AnalyticsSnapshot> {
        principal.require_admin("view analytics")?;
        let company_id = principal.company_id.as_str();

        let instances = match instance_id {
            Some(id) => vec![self
                .db
                .get_instance(company_id, id)?
                .ok_or_else(|| Error::not_found("agent instance", id))?],
            None => self.db.list_instances(company_id)?,
        };

        let mut total_targets = 0;
        for instance in &instances {
            total_targets += audience::resolve_audience(self.db, instance)?.len();
        }

        let conversations = self.db.list_conversations(
            company_id,
            &ConversationFilter {
                agent_instance_id: instance_id.map(str::to_string),
                ..Default::default()
            },
        )?;
        let summaries = self.db.list_summaries(company_id, instance_id)?;

        let mut snapshot = aggregate(&conversations, &summaries, total_targets, self.top_tags);

        let ids: HashSet<&str> = conversations.iter().map(|c| c.id.as_str()).collect();
        snapshot.open_escalations = self
            .db
            .list_escalations(company_id, Some(EscalationStatus::Open))?
            .iter()
            .filter(|e| ids.contains(e.conversation_id.as_str()))
            .count();

        tracing::debug!(
            company_id,
            instance_id = ?instance_id,
            conversations = snapshot.total_conversations,
            targets = total_targets,
            "Computed analytics snapshot"
        );

        Ok(snapshot)
    }
}
