//! Audience resolution
//!
//! Turns an instance's [`Audience`] into the concrete set of employee ids it
//! targets. Resolution is read-only and re-runs on every execution, so
//! headcount changes are picked up without rewriting stored targets.

use crate::db::Database;
use crate::error::Result;
use crate::types::{AgentInstance, Audience};
use std::collections::BTreeSet;

/// Resolve the audience of `instance` to active employee ids, sorted.
///
/// - `All`: every active employee of the company
/// - `Department`: active employees whose department matches exactly
/// - `Specific`: the instance's stored target rows that still exist and are active
pub fn resolve_audience(db: &Database, instance: &AgentInstance) -> Result<BTreeSet<String>> {
    match &instance.config.audience {
        Audience::Specific { .. } => {
            let stored = db.list_targets(&instance.company_id, &instance.id)?;
            let ids = active_subset(db, &instance.company_id, &stored)?;
            tracing::debug!(
                company_id = %instance.company_id,
                instance_id = %instance.id,
                stored = stored.len(),
                targets = ids.len(),
                "Resolved stored targets"
            );
            Ok(ids)
        }
        audience => resolve(db, &instance.company_id, audience),
    }
}

/// Resolve an audience within one company.
pub fn resolve(db: &Database, company_id: &str, audience: &Audience) -> Result<BTreeSet<String>> {
    let ids: BTreeSet<String> = match audience {
        Audience::All => db
            .list_active_employees(company_id, None)?
            .into_iter()
            .map(|e| e.id)
            .collect(),
        Audience::Department { name } => db
            .list_active_employees(company_id, Some(name.as_str()))?
            .into_iter()
            .map(|e| e.id)
            .collect(),
        Audience::Specific { employee_ids } => active_subset(db, company_id, employee_ids)?,
    };

    tracing::debug!(
        company_id,
        audience = audience.kind(),
        targets = ids.len(),
        "Resolved audience"
    );

    Ok(ids)
}

/// The ids in `ids` that belong to active employees of the company.
fn active_subset(db: &Database, company_id: &str, ids: &[String]) -> Result<BTreeSet<String>> {
    let active: BTreeSet<String> = db
        .list_active_employees(company_id, None)?
        .into_iter()
        .map(|e| e.id)
        .collect();
    Ok(ids.iter().filter(|id| active.contains(*id)).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use crate::types::{Employee, InstanceConfig, InstanceStatus};
    use chrono::Utc;

    fn employee(id: &str, company: &str, department: Option<&str>, active: bool) -> Employee {
        Employee {
            id: id.to_string(),
            company_id: company.to_string(),
            name: format!("Employee {id}"),
            email: None,
            department: department.map(str::to_string),
            is_active: active,
        }
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        // 15 engineers, the last three inactive
        for i in 0..15 {
            let e = employee(&format!("eng-{i:02}"), "acme", Some("Engineering"), i < 12);
            db.upsert_employee(&e).unwrap();
        }
        db.upsert_employee(&employee("sales-1", "acme", Some("Sales"), true))
            .unwrap();
        db.upsert_employee(&employee("eng-lower", "acme", Some("engineering"), true))
            .unwrap();
        db.upsert_employee(&employee("no-dept", "acme", None, true))
            .unwrap();
        db.upsert_employee(&employee("other-co", "globex", Some("Engineering"), true))
            .unwrap();
        db
    }

    #[test]
    fn test_department_counts_only_active_exact_matches() {
        let db = setup();
        let ids = resolve(
            &db,
            "acme",
            &Audience::Department {
                name: "Engineering".to_string(),
            },
        )
        .unwrap();

        assert_eq!(ids.len(), 12);
        assert!(ids.iter().all(|id| id.starts_with("eng-")));
        assert!(!ids.contains("eng-lower"));
        assert!(!ids.contains("eng-12"));
    }

    #[test]
    fn test_all_is_scoped_to_company() {
        let db = setup();
        let ids = resolve(&db, "acme", &Audience::All).unwrap();
        // 12 active engineers, sales-1, eng-lower, no-dept
        assert_eq!(ids.len(), 15);
        assert!(!ids.contains("other-co"));
    }

    #[test]
    fn test_specific_filters_missing_and_inactive() {
        let db = setup();
        let ids = resolve(
            &db,
            "acme",
            &Audience::Specific {
                employee_ids: vec![
                    "sales-1".to_string(),
                    "eng-13".to_string(),
                    "ghost".to_string(),
                    "other-co".to_string(),
                ],
            },
        )
        .unwrap();

        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["sales-1".to_string()]);
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let db = setup();
        let audience = Audience::All;
        assert_eq!(
            resolve(&db, "acme", &audience).unwrap(),
            resolve(&db, "acme", &audience).unwrap()
        );
    }

    #[test]
    fn test_instance_targets_come_from_stored_rows() {
        let db = setup();
        seed::install_templates(&db).unwrap();

        let config = InstanceConfig::from_json(&serde_json::json!({
            "audience_type": "specific",
            "target_employee_ids": ["sales-1", "eng-13"]
        }))
        .unwrap();
        let instance = AgentInstance {
            id: "inst-1".to_string(),
            company_id: "acme".to_string(),
            agent_id: seed::PULSE_CHECK_TEMPLATE_ID.to_string(),
            created_by: "admin-1".to_string(),
            name: "Named pulse".to_string(),
            config,
            status: InstanceStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let stored = ["sales-1", "eng-13", "no-dept"].map(str::to_string);
        db.insert_instance(&instance, &stored, None).unwrap();

        let ids = resolve_audience(&db, &instance).unwrap();
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["no-dept".to_string(), "sales-1".to_string()]
        );
    }
}
