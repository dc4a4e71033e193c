//! Append-only audit trail of risk mutations.
//!
//! Entries are appended by the risk store only; this module owns the
//! read side: querying, display ordering and change formatting.

use serde::{Deserialize, Serialize};

use crate::core::{AuditAction, AuditChanges, AuditEntry, Risk};
use crate::identity::UserDirectory;

pub const UNKNOWN_RISK: &str = "Unknown Risk";
pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub user_id: Option<String>,
    pub risk_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_risk(mut self, risk_id: &str) -> Self {
        self.risk_id = Some(risk_id.to_string());
        self
    }

    pub fn with_search(mut self, term: &str) -> Self {
        self.search = Some(term.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: Vec<AuditEntry>) -> Self {
        Self { entries }
    }

    pub(crate) fn append(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, audit_id: &str) -> Option<&AuditEntry> {
        self.entries.iter().find(|e| e.audit_id == audit_id)
    }

    /// Entries matching `filter`, newest first.
    pub fn query<'a>(
        &'a self,
        filter: &AuditQuery,
        risks: &[Risk],
        users: &UserDirectory,
    ) -> Vec<&'a AuditEntry> {
        let term = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        let mut results: Vec<&AuditEntry> = self
            .entries
            .iter()
            .filter(|e| filter.action.is_none_or(|a| e.action == a))
            .filter(|e| {
                filter
                    .user_id
                    .as_deref()
                    .is_none_or(|u| e.user_id.as_deref() == Some(u))
            })
            .filter(|e| filter.risk_id.as_deref().is_none_or(|r| e.risk_id == r))
            .filter(|e| {
                let Some(term) = term.as_deref() else {
                    return true;
                };
                resolve_risk_name(e, risks).to_lowercase().contains(term)
                    || resolve_user_name(e, users).to_lowercase().contains(term)
                    || e.action.as_str().contains(term)
            })
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    pub fn sorted_newest_first(&self) -> Vec<&AuditEntry> {
        let mut entries: Vec<&AuditEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Distinct acting user ids in first-seen order.
    pub fn unique_users(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for e in &self.entries {
            if let Some(id) = e.user_id.as_deref() {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        out
    }

    pub fn unique_actions(&self) -> Vec<AuditAction> {
        let mut out = Vec::new();
        for e in &self.entries {
            if !out.contains(&e.action) {
                out.push(e.action);
            }
        }
        out
    }
}

/// Risk name for display: the live record, else the snapshot carried by a
/// create/delete payload.
pub fn resolve_risk_name(entry: &AuditEntry, risks: &[Risk]) -> String {
    if let Some(risk) = risks.iter().find(|r| r.risk_id == entry.risk_id) {
        return risk.risk_name.clone();
    }
    match &entry.changes {
        AuditChanges::Created { created: risk } | AuditChanges::Deleted { deleted: risk } => {
            risk.risk_name.clone()
        }
        _ => UNKNOWN_RISK.to_string(),
    }
}

pub fn resolve_user_name(entry: &AuditEntry, users: &UserDirectory) -> String {
    entry
        .user_id
        .as_deref()
        .and_then(|id| users.find_by_id(id))
        .map(|u| u.name.clone())
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

pub fn format_changes(changes: &AuditChanges) -> String {
    match changes {
        AuditChanges::Created { created } => {
            format!("created: {} (score {})", created.risk_name, created.risk_score())
        }
        AuditChanges::Deleted { deleted } => {
            format!("deleted: {} (score {})", deleted.risk_name, deleted.risk_score())
        }
        AuditChanges::Transitions(map) => {
            if map.is_empty() {
                return "変更の記録はありません".to_string();
            }
            map.iter()
                .map(|(field, t)| {
                    format!("{field}: {} → {}", display_value(&t.from), display_value(&t.to))
                })
                .collect::<Vec<_>>()
                .join(", ")
        }
        AuditChanges::Patch(patch) => {
            let Ok(serde_json::Value::Object(map)) = serde_json::to_value(patch) else {
                return "変更の記録はありません".to_string();
            };
            if map.is_empty() {
                return "変更の記録はありません".to_string();
            }
            map.iter()
                .map(|(field, value)| format!("{field}: {}", display_value(value)))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "(なし)".to_string(),
        other => other.to_string(),
    }
}
