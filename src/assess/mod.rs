//! Risk assessment templates.
//!
//! Each template bundles the typical risks of one GMP/GDP area. Generating
//! an assessment adds every template risk to the register as an ordinary
//! risk, so each one gets its own id, score and `create` audit entry.

use serde::Serialize;

use crate::core::{MitigationStatus, Risk, RiskInput, User};
use crate::store::kv::KvStore;
use crate::store::{RiskStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub template_id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub risks: &'static [TemplateRisk],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateRisk {
    pub title: &'static str,
    pub category: &'static str,
    pub likelihood: u8,
    pub impact: u8,
    pub description: &'static str,
    pub causes: [&'static str; 4],
    pub effects: [&'static str; 4],
    pub controls: [&'static str; 4],
}

impl TemplateRisk {
    pub const fn risk_score(&self) -> u8 {
        self.likelihood * self.impact
    }

    /// Register entry for this template risk. Causes, effects and controls
    /// have no dedicated field and are folded into the description.
    pub fn to_input(&self, assessment: Option<&str>) -> RiskInput {
        let mut description = format!(
            "{}\nCauses: {}\nEffects: {}\nControls: {}",
            self.description,
            self.causes.join(", "),
            self.effects.join(", "),
            self.controls.join(", "),
        );
        if let Some(title) = assessment.map(str::trim).filter(|t| !t.is_empty()) {
            description.push_str(&format!("\nAssessment: {title}"));
        }
        RiskInput {
            risk_name: self.title.to_string(),
            description,
            category: self.category.to_string(),
            likelihood: self.likelihood,
            impact: self.impact,
            mitigation_status: MitigationStatus::NotStarted,
            regulatory_reference: None,
            treatments: vec![],
        }
    }
}

pub fn templates() -> &'static [Template] {
    TEMPLATES
}

pub fn find(template_id: &str) -> Option<&'static Template> {
    let wanted = template_id.trim();
    TEMPLATES
        .iter()
        .find(|t| t.template_id.eq_ignore_ascii_case(wanted))
}

/// Adds every risk of `template` to the register, in template order.
/// Stops at the first rejected risk; risks added before it stay.
pub fn generate<S: KvStore>(
    store: &mut RiskStore<S>,
    template: &Template,
    assessment: Option<&str>,
    actor: Option<&User>,
) -> Result<Vec<Risk>, StoreError> {
    let mut created = Vec::with_capacity(template.risks.len());
    for risk in template.risks {
        created.push(store.add(risk.to_input(assessment), actor)?);
    }
    tracing::info!(
        template = template.template_id,
        risks = created.len(),
        "assessment generated"
    );
    Ok(created)
}

static TEMPLATES: &[Template] = &[
    Template {
        template_id: "manufacturing",
        title: "Manufacturing Process",
        description: "Risks related to pharmaceutical manufacturing operations",
        risks: &[
            TemplateRisk {
                title: "Equipment Failure During Production",
                category: "Equipment",
                likelihood: 3,
                impact: 4,
                description: "Critical manufacturing equipment fails during production run",
                causes: ["Mechanical wear", "Electrical failure", "Software malfunction", "Poor maintenance"],
                effects: ["Production delays", "Product quality issues", "Batch rejection", "Regulatory non-compliance"],
                controls: ["Preventive maintenance", "Equipment monitoring", "Backup systems", "Operator training"],
            },
            TemplateRisk {
                title: "Cross-Contamination Between Products",
                category: "Quality",
                likelihood: 2,
                impact: 5,
                description: "Contamination between different pharmaceutical products",
                causes: ["Inadequate cleaning", "Shared equipment", "Personnel error", "Facility design"],
                effects: ["Product recall", "Patient safety risk", "Regulatory action", "Brand damage"],
                controls: ["Cleaning validation", "Dedicated equipment", "Personnel training", "Environmental monitoring"],
            },
            TemplateRisk {
                title: "Raw Material Quality Deviation",
                category: "Supply Chain",
                likelihood: 3,
                impact: 4,
                description: "Incoming raw materials do not meet specifications",
                causes: ["Supplier quality issues", "Transportation damage", "Storage conditions", "Testing errors"],
                effects: ["Production delays", "Quality issues", "Batch failure", "Supply disruption"],
                controls: ["Supplier qualification", "Incoming inspection", "Storage controls", "Testing protocols"],
            },
        ],
    },
    Template {
        template_id: "supply-chain",
        title: "Supply Chain",
        description: "Risks in pharmaceutical supply chain operations",
        risks: &[
            TemplateRisk {
                title: "Cold Chain Temperature Excursion",
                category: "Transportation",
                likelihood: 3,
                impact: 5,
                description: "Temperature-sensitive products exposed to temperature outside specified range",
                causes: ["Equipment failure", "Power outage", "Human error", "Extreme weather"],
                effects: ["Product degradation", "Efficacy loss", "Patient safety risk", "Product recall"],
                controls: ["Temperature monitoring", "Backup systems", "Training", "Contingency plans"],
            },
            TemplateRisk {
                title: "Supplier Quality System Failure",
                category: "Supply Chain",
                likelihood: 2,
                impact: 4,
                description: "Key supplier fails to maintain adequate quality systems",
                causes: ["System breakdown", "Personnel changes", "Regulatory changes", "Financial issues"],
                effects: ["Supply disruption", "Quality issues", "Regulatory non-compliance", "Patient risk"],
                controls: ["Supplier audits", "Quality agreements", "Alternative suppliers", "Monitoring systems"],
            },
            TemplateRisk {
                title: "Counterfeit Product Infiltration",
                category: "Security",
                likelihood: 2,
                impact: 5,
                description: "Counterfeit products enter the legitimate supply chain",
                causes: ["Weak security", "Complex supply chain", "Inadequate verification", "Criminal activity"],
                effects: ["Patient safety risk", "Brand damage", "Regulatory action", "Legal liability"],
                controls: ["Serialization", "Track and trace", "Supplier verification", "Security measures"],
            },
        ],
    },
    Template {
        template_id: "quality-system",
        title: "Quality System",
        description: "Risks in pharmaceutical quality management systems",
        risks: &[
            TemplateRisk {
                title: "Data Integrity Breach",
                category: "Data Management",
                likelihood: 3,
                impact: 5,
                description: "Compromise of data integrity in critical quality systems",
                causes: ["System vulnerabilities", "Human error", "Intentional manipulation", "Inadequate controls"],
                effects: ["Regulatory action", "Product recall", "Loss of trust", "Legal consequences"],
                controls: ["Access controls", "Audit trails", "Training", "System validation"],
            },
            TemplateRisk {
                title: "Deviation Investigation Delays",
                category: "Quality",
                likelihood: 4,
                impact: 3,
                description: "Delays in investigating and resolving quality deviations",
                causes: ["Resource constraints", "Complex investigations", "Poor prioritization", "System limitations"],
                effects: ["Regulatory non-compliance", "Repeat occurrences", "Product quality risk", "Audit findings"],
                controls: ["Resource planning", "Investigation procedures", "Tracking systems", "Training"],
            },
            TemplateRisk {
                title: "Change Control Process Failure",
                category: "Change Management",
                likelihood: 3,
                impact: 4,
                description: "Inadequate change control leading to unintended consequences",
                causes: ["Poor risk assessment", "Inadequate review", "Communication failure", "System limitations"],
                effects: ["Product quality impact", "Regulatory non-compliance", "Process disruption", "Safety risk"],
                controls: ["Change control procedures", "Risk assessment", "Cross-functional review", "Training"],
            },
        ],
    },
    Template {
        template_id: "product-development",
        title: "Product Development",
        description: "Risks in pharmaceutical product development",
        risks: &[
            TemplateRisk {
                title: "Clinical Trial Data Integrity Issues",
                category: "Clinical",
                likelihood: 2,
                impact: 5,
                description: "Compromise of clinical trial data integrity",
                causes: ["Protocol deviations", "Data manipulation", "System failures", "Inadequate oversight"],
                effects: ["Regulatory rejection", "Study delays", "Patient safety risk", "Legal consequences"],
                controls: ["Data monitoring", "Audit procedures", "Training", "System validation"],
            },
            TemplateRisk {
                title: "Formulation Stability Failure",
                category: "Development",
                likelihood: 3,
                impact: 4,
                description: "Product formulation fails stability testing requirements",
                causes: ["Formulation issues", "Packaging problems", "Storage conditions", "Testing errors"],
                effects: ["Development delays", "Reformulation needed", "Regulatory delays", "Increased costs"],
                controls: ["Stability protocols", "Accelerated testing", "Packaging studies", "Environmental controls"],
            },
            TemplateRisk {
                title: "Regulatory Submission Rejection",
                category: "Regulatory",
                likelihood: 3,
                impact: 4,
                description: "Regulatory authority rejects product submission",
                causes: ["Inadequate data", "Regulatory changes", "Quality issues", "Submission errors"],
                effects: ["Launch delays", "Additional studies", "Increased costs", "Competitive disadvantage"],
                controls: ["Regulatory strategy", "Pre-submission meetings", "Quality reviews", "Expert consultation"],
            },
        ],
    },
    Template {
        template_id: "facility-equipment",
        title: "Facility & Equipment",
        description: "Risks related to facilities and equipment",
        risks: &[
            TemplateRisk {
                title: "HVAC System Failure",
                category: "Facility",
                likelihood: 3,
                impact: 4,
                description: "Heating, ventilation, and air conditioning system failure",
                causes: ["Equipment failure", "Power outage", "Maintenance issues", "Design problems"],
                effects: ["Environmental excursions", "Product quality impact", "Production shutdown", "Regulatory non-compliance"],
                controls: ["Preventive maintenance", "Backup systems", "Monitoring", "Emergency procedures"],
            },
            TemplateRisk {
                title: "Utility System Interruption",
                category: "Utilities",
                likelihood: 2,
                impact: 4,
                description: "Interruption of critical utilities (power, water, steam)",
                causes: ["External failures", "Equipment breakdown", "Maintenance activities", "Natural disasters"],
                effects: ["Production shutdown", "Product loss", "Equipment damage", "Safety risks"],
                controls: ["Backup systems", "Emergency generators", "Utility monitoring", "Contingency plans"],
            },
            TemplateRisk {
                title: "Cleanroom Contamination",
                category: "Environment",
                likelihood: 2,
                impact: 5,
                description: "Microbial or particulate contamination in cleanroom environment",
                causes: ["Personnel practices", "Equipment failure", "Facility breach", "Maintenance activities"],
                effects: ["Product contamination", "Batch rejection", "Production shutdown", "Regulatory action"],
                controls: ["Environmental monitoring", "Personnel training", "Facility maintenance", "Contamination control"],
            },
        ],
    },
];
