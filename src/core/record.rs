use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::{MitigationStatus, RiskBand, risk_score};

pub const SUGGESTED_CATEGORIES: &[&str] = &[
    "Temperature Control",
    "Packaging",
    "Documentation",
    "Storage Conditions",
    "Security",
    "Transportation",
    "Quality",
    "Supply Chain",
    "Equipment",
    "Data Management",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Risk {
    pub risk_id: String,
    pub risk_name: String,
    pub description: String,
    pub category: String,
    pub(crate) likelihood: u8,
    pub(crate) impact: u8,
    pub(crate) risk_score: u8,
    pub mitigation_status: MitigationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulatory_reference: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub treatments: Vec<Treatment>,
}

impl Risk {
    pub fn likelihood(&self) -> u8 {
        self.likelihood
    }

    pub fn impact(&self) -> u8 {
        self.impact
    }

    pub fn risk_score(&self) -> u8 {
        self.risk_score
    }

    pub fn band(&self) -> RiskBand {
        RiskBand::from_score(self.risk_score)
    }

    pub(crate) fn refresh_score(&mut self) {
        self.risk_score = risk_score(self.likelihood, self.impact);
    }

    pub(crate) fn from_input(
        risk_id: String,
        input: RiskInput,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            risk_id,
            risk_name: input.risk_name,
            description: input.description,
            category: input.category,
            likelihood: input.likelihood,
            impact: input.impact,
            risk_score: risk_score(input.likelihood, input.impact),
            mitigation_status: input.mitigation_status,
            regulatory_reference: input.regulatory_reference,
            created_at: now,
            updated_at: now,
            treatments: input.treatments,
        }
    }

    pub(crate) fn apply(&mut self, patch: &RiskPatch, now: OffsetDateTime) {
        if let Some(name) = &patch.risk_name {
            self.risk_name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(likelihood) = patch.likelihood {
            self.likelihood = likelihood;
        }
        if let Some(impact) = patch.impact {
            self.impact = impact;
        }
        if let Some(status) = patch.mitigation_status {
            self.mitigation_status = status;
        }
        if let Some(reference) = &patch.regulatory_reference {
            self.regulatory_reference = reference.clone();
        }
        if let Some(treatments) = &patch.treatments {
            self.treatments = treatments.clone();
        }
        self.refresh_score();
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskInput {
    pub risk_name: String,
    pub description: String,
    pub category: String,
    pub likelihood: u8,
    pub impact: u8,
    pub mitigation_status: MitigationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulatory_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub treatments: Vec<Treatment>,
}

/// Partial update of a risk. The patch is logged verbatim as the audit
/// payload of an update, so a field set to its current value still shows up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation_status: Option<MitigationStatus>,
    /// `Some(None)` clears the reference and is logged as `null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub regulatory_reference: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatments: Option<Vec<Treatment>>,
}

impl RiskPatch {
    pub fn is_empty(&self) -> bool {
        self == &RiskPatch::default()
    }
}

// A key that is present maps to `Some`, so an explicit `null` survives a reload.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treatment {
    pub treatment_id: String,
    pub treatment_type: String,
    pub description: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    pub priority: String,
    pub status: String,
    #[serde(default)]
    pub progress: u8,
}

pub const TREATMENT_TYPES: &[&str] = &["Mitigate", "Transfer", "Accept", "Avoid"];
pub const TREATMENT_PRIORITIES: &[&str] = &["Low", "Medium", "High", "Critical"];

/// Next treatment id for `risk`, unique within its treatment list.
pub fn next_treatment_id(risk: &Risk) -> String {
    let mut n = risk.treatments.len() + 1;
    loop {
        let id = format!("{}-t{n}", risk.risk_id);
        if !risk.treatments.iter().any(|t| t.treatment_id == id) {
            return id;
        }
        n += 1;
    }
}
