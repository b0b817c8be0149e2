//! Seed data
//!
//! The system template catalog, plus a demo company directory for trying the
//! engine end to end. Both load through the regular store operations.

use crate::db::Database;
use crate::error::Result;
use crate::types::{AgentTemplate, AgentType, Employee, TemplateConfig};
use serde::Serialize;

pub const PULSE_CHECK_TEMPLATE_ID: &str = "tpl-pulse-check";
pub const ONBOARDING_TEMPLATE_ID: &str = "tpl-onboarding";
pub const EXIT_INTERVIEW_TEMPLATE_ID: &str = "tpl-exit-interview";
pub const MANAGER_COACHING_TEMPLATE_ID: &str = "tpl-manager-coaching";
pub const CHAT_AGENT_TEMPLATE_ID: &str = "tpl-chat-agent";

/// User id of the demo company's HR admin
pub const DEMO_ADMIN_ID: &str = "hr-admin";

/// The system-defined templates.
pub fn system_templates() -> Vec<AgentTemplate> {
    let template = |id: &str,
                    slug: &str,
                    agent_type: AgentType,
                    description: &str,
                    max_messages: u32,
                    escalation_enabled: bool| {
        AgentTemplate {
            id: id.to_string(),
            name: agent_type.display_name().to_string(),
            slug: slug.to_string(),
            agent_type,
            description: description.to_string(),
            default_config: TemplateConfig {
                max_messages,
                escalation_enabled,
            },
        }
    };

    vec![
        template(
            PULSE_CHECK_TEMPLATE_ID,
            "pulse-check",
            AgentType::PulseCheck,
            "Short recurring check-in on mood and workload",
            5,
            true,
        ),
        template(
            ONBOARDING_TEMPLATE_ID,
            "onboarding",
            AgentType::Onboarding,
            "Guides new hires through their first weeks",
            12,
            true,
        ),
        template(
            EXIT_INTERVIEW_TEMPLATE_ID,
            "exit-interview",
            AgentType::ExitInterview,
            "Structured conversation with departing employees",
            10,
            false,
        ),
        template(
            MANAGER_COACHING_TEMPLATE_ID,
            "manager-coaching",
            AgentType::ManagerCoaching,
            "Coaching prompts for people managers",
            10,
            false,
        ),
        template(
            CHAT_AGENT_TEMPLATE_ID,
            "chat-agent",
            AgentType::ChatAgent,
            "Open-ended HR assistant",
            20,
            true,
        ),
    ]
}

/// Install the system templates. Existing rows are left as they are.
///
/// Returns the number of templates inserted.
pub fn install_templates(db: &Database) -> Result<usize> {
    let mut inserted = 0;
    for template in system_templates() {
        if db.insert_template_if_absent(&template)? {
            inserted += 1;
        }
    }
    tracing::info!(inserted, "Installed system templates");
    Ok(inserted)
}

/// What [`load_demo_company`] created.
#[derive(Debug, Clone, Serialize)]
pub struct DemoCompany {
    pub company_id: String,
    pub admin_user_id: String,
    pub employees: usize,
    pub active_employees: usize,
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Ben", "Chloe", "Dev", "Elena", "Farid", "Grace", "Hiro", "Ines", "Jonas", "Kemi",
    "Luca", "Maya", "Noah", "Olga",
];

/// (department, id prefix, headcount, inactive)
const DEPARTMENTS: &[(&str, &str, usize, usize)] = &[
    ("Engineering", "eng", 15, 3),
    ("Sales", "sales", 5, 1),
    ("People", "people", 3, 0),
    ("Design", "design", 2, 0),
];

/// Load a demo directory into `company_id`. Safe to repeat.
///
/// The last `inactive` employees of each department are marked inactive.
pub fn load_demo_company(db: &Database, company_id: &str) -> Result<DemoCompany> {
    install_templates(db)?;

    let mut employees = 0;
    let mut active_employees = 0;

    for (department, prefix, headcount, inactive) in DEPARTMENTS {
        for n in 0..*headcount {
            let id = format!("{prefix}-{:02}", n + 1);
            let first = FIRST_NAMES[n % FIRST_NAMES.len()];
            let is_active = n < headcount - inactive;

            db.upsert_employee(&Employee {
                id: id.clone(),
                company_id: company_id.to_string(),
                name: format!("{first} {department}"),
                email: Some(format!("{id}@{company_id}.example")),
                department: Some(department.to_string()),
                is_active,
            })?;

            employees += 1;
            if is_active {
                active_employees += 1;
            }
        }
    }

    tracing::info!(company_id, employees, active_employees, "Loaded demo company");

    Ok(DemoCompany {
        company_id: company_id.to_string(),
        admin_user_id: DEMO_ADMIN_ID.to_string(),
        employees,
        active_employees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audience;
    use crate::types::Audience;

    #[test]
    fn test_templates_install_once() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        assert_eq!(install_templates(&db).unwrap(), 5);
        assert_eq!(install_templates(&db).unwrap(), 0);

        let pulse = db.get_template_by_slug("pulse-check").unwrap().unwrap();
        assert_eq!(pulse.id, PULSE_CHECK_TEMPLATE_ID);
        assert_eq!(pulse.default_config.max_messages, 5);
        assert!(pulse.default_config.escalation_enabled);
        assert_eq!(db.list_templates().unwrap().len(), 5);
    }

    #[test]
    fn test_demo_company_directory() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let demo = load_demo_company(&db, "demo").unwrap();
        assert_eq!(demo.employees, 25);
        assert_eq!(demo.active_employees, 21);

        // Reloading does not duplicate anyone
        load_demo_company(&db, "demo").unwrap();

        let engineering = audience::resolve(
            &db,
            "demo",
            &Audience::Department {
                name: "Engineering".to_string(),
            },
        )
        .unwrap();
        assert_eq!(engineering.len(), 12);
    }
}
