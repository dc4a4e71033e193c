use std::collections::BTreeMap;

use time::OffsetDateTime;
use time::macros::datetime;

use crate::core::{
    AuditAction, AuditChanges, AuditEntry, FieldTransition, MitigationStatus, Risk, risk_score,
};

use super::Sequence;

#[allow(clippy::too_many_arguments)]
fn seed_risk(
    id: &str,
    name: &str,
    description: &str,
    category: &str,
    likelihood: u8,
    impact: u8,
    status: MitigationStatus,
    reference: &str,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
) -> Risk {
    Risk {
        risk_id: id.to_string(),
        risk_name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        likelihood,
        impact,
        risk_score: risk_score(likelihood, impact),
        mitigation_status: status,
        regulatory_reference: Some(reference.to_string()),
        created_at,
        updated_at,
        treatments: vec![],
    }
}

pub fn initial_risks() -> Vec<Risk> {
    vec![
        seed_risk(
            "1",
            "Temperature Excursion During Transport",
            "Risk of temperature-sensitive medicines being exposed to temperatures outside the specified range during transportation.",
            "Temperature Control",
            3,
            4,
            MitigationStatus::InProgress,
            "1",
            datetime!(2024-01-15 0:00 UTC),
            datetime!(2024-09-15 0:00 UTC),
        ),
        seed_risk(
            "2",
            "Packaging Integrity Failure",
            "Risk of primary or secondary packaging being damaged during handling and transport, potentially compromising product quality.",
            "Packaging",
            2,
            3,
            MitigationStatus::Completed,
            "2",
            datetime!(2024-02-10 0:00 UTC),
            datetime!(2024-08-20 0:00 UTC),
        ),
        seed_risk(
            "3",
            "Chain of Custody Documentation Gap",
            "Risk of incomplete or missing documentation in the chain of custody, affecting traceability and regulatory compliance.",
            "Documentation",
            2,
            4,
            MitigationStatus::NotStarted,
            "3",
            datetime!(2024-03-05 0:00 UTC),
            datetime!(2024-09-10 0:00 UTC),
        ),
        seed_risk(
            "4",
            "Contamination During Storage",
            "Risk of cross-contamination or environmental contamination during intermediate storage at distribution centers.",
            "Storage Conditions",
            1,
            5,
            MitigationStatus::InProgress,
            "1",
            datetime!(2024-04-12 0:00 UTC),
            datetime!(2024-09-25 0:00 UTC),
        ),
        seed_risk(
            "5",
            "Theft or Diversion",
            "Risk of pharmaceutical products being stolen or diverted from the legitimate supply chain.",
            "Security",
            2,
            4,
            MitigationStatus::Completed,
            "4",
            datetime!(2024-05-08 0:00 UTC),
            datetime!(2024-09-12 0:00 UTC),
        ),
    ]
}

fn status_transition(from: MitigationStatus, to: MitigationStatus) -> AuditChanges {
    let mut changes = BTreeMap::new();
    changes.insert(
        "mitigation_status".to_string(),
        FieldTransition {
            from: serde_json::Value::String(from.as_str().to_string()),
            to: serde_json::Value::String(to.as_str().to_string()),
        },
    );
    AuditChanges::Transitions(changes)
}

pub fn initial_audit_trail() -> Vec<AuditEntry> {
    vec![
        AuditEntry {
            audit_id: "1".to_string(),
            risk_id: "1".to_string(),
            user_id: Some("2".to_string()),
            action: AuditAction::Update,
            timestamp: datetime!(2024-09-15 0:00 UTC),
            changes: status_transition(MitigationStatus::NotStarted, MitigationStatus::InProgress),
        },
        AuditEntry {
            audit_id: "2".to_string(),
            risk_id: "2".to_string(),
            user_id: Some("1".to_string()),
            action: AuditAction::Update,
            timestamp: datetime!(2024-08-20 0:00 UTC),
            changes: status_transition(MitigationStatus::InProgress, MitigationStatus::Completed),
        },
    ]
}

pub(crate) fn initial_sequence() -> Sequence {
    Sequence {
        next_risk_id: 6,
        next_audit_id: 3,
    }
}
