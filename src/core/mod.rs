mod audit;
mod record;
mod reference;
mod risk;
mod summary;
mod user;

pub use audit::{AuditAction, AuditChanges, AuditEntry, FieldTransition};
pub use record::{
    Risk, RiskInput, RiskPatch, SUGGESTED_CATEGORIES, TREATMENT_PRIORITIES, TREATMENT_TYPES,
    Treatment, next_treatment_id,
};
pub use reference::RegulatoryReference;
pub use risk::{FACTOR_RANGE, HIGH_RISK_THRESHOLD, MitigationStatus, RiskBand, risk_score};
pub use summary::{MitigationStats, RegisterSummary};
pub use user::{AccountStatus, Role, User, UserAccount};
