//! Agent instance registry
//!
//! Owns the per-company catalog of configured agent instances. All
//! operations are admin-only and scoped to the principal's company.

use crate::audience;
use crate::db::{Database, InstanceStats};
use crate::error::{Error, Result};
use crate::schedule;
use crate::types::{
    AgentInstance, AgentSchedule, AgentTemplate, InstanceConfig, InstanceStatus, Principal,
    ScheduleSpec,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Request to create an instance. `config` is the loose JSON shape the
/// surrounding system sends; it is decoded and validated here.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub template_id: String,
    pub name: String,
    pub config: serde_json::Value,
    pub schedule: Option<ScheduleSpec>,
}

/// An instance with its template, schedule and derived stats.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceOverview {
    pub instance: AgentInstance,
    pub template: AgentTemplate,
    pub schedule: Option<AgentSchedule>,
    pub conversation_count: i64,
    pub active_conversations: i64,
    pub message_count: i64,
}

impl InstanceOverview {
    fn new(
        instance: AgentInstance,
        template: AgentTemplate,
        schedule: Option<AgentSchedule>,
        stats: InstanceStats,
    ) -> Self {
        Self {
            instance,
            template,
            schedule,
            conversation_count: stats.conversation_count,
            active_conversations: stats.active_conversations,
            message_count: stats.message_count,
        }
    }
}

pub struct AgentRegistry<'a> {
    db: &'a Database,
}

impl<'a> AgentRegistry<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create an active instance, its explicit targets and its schedule.
    pub fn create(
        &self,
        principal: &Principal,
        request: NewInstance,
        now: DateTime<Utc>,
    ) -> Result<AgentInstance> {
        principal.require_admin("create agent instances")?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }

        let template = self
            .db
            .get_template(&request.template_id)?
            .ok_or_else(|| {
                Error::validation(
                    "template_id",
                    format!("unknown template: {}", request.template_id),
                )
            })?;

        let config = InstanceConfig::from_json(&request.config)?;

        let instance = AgentInstance {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: principal.company_id.clone(),
            agent_id: template.id.clone(),
            created_by: principal.user_id.clone(),
            name: name.to_string(),
            config,
            status: InstanceStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let schedule = request
            .schedule
            .as_ref()
            .map(|spec| schedule::plan(&instance.company_id, &instance.id, spec, now))
            .transpose()?;

        let explicit = instance
            .config
            .audience
            .explicit_ids()
            .unwrap_or_default()
            .to_vec();

        self.db
            .insert_instance(&instance, &explicit, schedule.as_ref())?;

        let resolved = audience::resolve_audience(self.db, &instance)?;

        tracing::info!(
            company_id = %instance.company_id,
            instance_id = %instance.id,
            template = %template.slug,
            audience = instance.config.audience.kind(),
            targets = resolved.len(),
            next_run_at = ?schedule.as_ref().map(|s| s.next_run_at),
            "Created agent instance"
        );

        Ok(instance)
    }

    /// Move an instance to any status. Conversations and schedules are untouched.
    pub fn set_status(
        &self,
        principal: &Principal,
        instance_id: &str,
        status: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<AgentInstance> {
        principal.require_admin("change agent instance status")?;

        if !self
            .db
            .update_instance_status(&principal.company_id, instance_id, status, now)?
        {
            return Err(Error::not_found("agent instance", instance_id));
        }

        tracing::info!(
            company_id = %principal.company_id,
            instance_id,
            status = %status,
            "Agent instance status changed"
        );

        self.load(&principal.company_id, instance_id)
    }

    /// Replace an instance's config; explicit targets are re-derived from it.
    pub fn update_config(
        &self,
        principal: &Principal,
        instance_id: &str,
        config: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<AgentInstance> {
        principal.require_admin("update agent instances")?;

        let config = InstanceConfig::from_json(config)?;
        let explicit = config.audience.explicit_ids().unwrap_or_default().to_vec();

        if !self.db.update_instance_config(
            &principal.company_id,
            instance_id,
            &config,
            &explicit,
            now,
        )? {
            return Err(Error::not_found("agent instance", instance_id));
        }

        tracing::info!(
            company_id = %principal.company_id,
            instance_id,
            audience = config.audience.kind(),
            "Agent instance config updated"
        );

        self.load(&principal.company_id, instance_id)
    }

    /// One instance with template, schedule and stats.
    pub fn get(&self, principal: &Principal, instance_id: &str) -> Result<InstanceOverview> {
        principal.require_admin("view agent instances")?;

        let instance = self.load(&principal.company_id, instance_id)?;
        let stats = self
            .db
            .instance_stats(&principal.company_id)?
            .remove(&instance.id)
            .unwrap_or_default();
        self.overview(instance, stats)
    }

    /// All instances of the principal's company with derived stats.
    pub fn list(&self, principal: &Principal) -> Result<Vec<InstanceOverview>> {
        principal.require_admin("list agent instances")?;

        let mut stats = self.db.instance_stats(&principal.company_id)?;
        self.db
            .list_instances(&principal.company_id)?
            .into_iter()
            .map(|instance| {
                let instance_stats = stats.remove(&instance.id).unwrap_or_default();
                self.overview(instance, instance_stats)
            })
            .collect()
    }

    /// The employees this instance would target if it ran now.
    pub fn targets(&self, principal: &Principal, instance_id: &str) -> Result<BTreeSet<String>> {
        principal.require_admin("view agent targets")?;
        let instance = self.load(&principal.company_id, instance_id)?;
        audience::resolve_audience(self.db, &instance)
    }

    fn load(&self, company_id: &str, instance_id: &str) -> Result<AgentInstance> {
        self.db
            .get_instance(company_id, instance_id)?
            .ok_or_else(|| Error::not_found("agent instance", instance_id))
    }

    fn overview(&self, instance: AgentInstance, stats: InstanceStats) -> Result<InstanceOverview> {
        let template = self
            .db
            .get_template(&instance.agent_id)?
            .ok_or_else(|| Error::not_found("agent template", instance.agent_id.clone()))?;
        let schedule = self.db.get_schedule(&instance.company_id, &instance.id)?;
        Ok(InstanceOverview::new(instance, template, schedule, stats))
    }
}
