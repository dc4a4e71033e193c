//! Risk register store.
//!
//! [`RiskStore`] is the single owner of the risk collection and its audit
//! trail. Every successful mutation recomputes the risk score, appends one
//! audit entry and writes both collections back to the [`KvStore`] before
//! returning. Persistence failures are logged and do not fail the mutation;
//! the in-memory state stays authoritative for the session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::audit::AuditLog;
use crate::core::{
    AuditAction, AuditChanges, AuditEntry, FACTOR_RANGE, HIGH_RISK_THRESHOLD, MitigationStats,
    MitigationStatus, RegisterSummary, Risk, RiskBand, RiskInput, RiskPatch, User,
};

pub mod kv;
pub mod seed;

use kv::KvStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("リスクが見つかりません: {0}")]
    NotFound(String),
    #[error("入力が不足しています: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Sequence {
    pub(crate) next_risk_id: u64,
    pub(crate) next_audit_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<MitigationStatus>,
    pub min_score: Option<u8>,
}

impl RiskFilter {
    pub fn matches(&self, risk: &Risk) -> bool {
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            if !risk.risk_name.to_lowercase().contains(&term)
                && !risk.description.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        if let Some(category) = self.category.as_deref() {
            if !risk.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if risk.mitigation_status != status {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            if risk.risk_score() < min {
                return false;
            }
        }
        true
    }
}

pub struct RiskStore<S: KvStore> {
    kv: S,
    risks: Vec<Risk>,
    audit: AuditLog,
    seq: Sequence,
}

impl<S: KvStore> RiskStore<S> {
    /// Loads persisted state, or seeds the demo dataset on first start.
    pub fn open(kv: S) -> Self {
        let initialized = match kv.get(kv::INITIALIZED_KEY) {
            Ok(v) => v.is_some(),
            Err(err) => {
                tracing::warn!("初期化フラグを読み込めませんでした: {err:#}");
                true
            }
        };

        if !initialized {
            tracing::info!("初回起動: デモデータで初期化します");
            let mut store = Self {
                kv,
                risks: seed::initial_risks(),
                audit: AuditLog::from_entries(seed::initial_audit_trail()),
                seq: seed::initial_sequence(),
            };
            store.persist();
            if let Err(err) = store.kv.set(kv::INITIALIZED_KEY, "true") {
                tracing::error!("初期化フラグを保存できませんでした: {err:#}");
            }
            return store;
        }

        let mut risks: Vec<Risk> = load_or(&kv, kv::RISKS_KEY, seed::initial_risks);
        for risk in &mut risks {
            risk.refresh_score();
        }
        let audit = AuditLog::from_entries(load_or(
            &kv,
            kv::AUDIT_TRAIL_KEY,
            seed::initial_audit_trail,
        ));
        let seq = match kv::load_json::<Sequence>(&kv, kv::SEQUENCE_KEY) {
            Ok(Some(seq)) => seq,
            Ok(None) => derive_sequence(&risks, &audit),
            Err(err) => {
                tracing::warn!("{err:#}");
                derive_sequence(&risks, &audit)
            }
        };
        let seq = reconcile_sequence(seq, derive_sequence(&risks, &audit));

        Self {
            kv,
            risks,
            audit,
            seq,
        }
    }

    pub fn risks(&self) -> &[Risk] {
        &self.risks
    }

    pub fn audit_trail(&self) -> &AuditLog {
        &self.audit
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    pub fn into_kv(self) -> S {
        self.kv
    }

    pub fn add(&mut self, input: RiskInput, actor: Option<&User>) -> Result<Risk, StoreError> {
        validate_input(&input)?;

        let now = OffsetDateTime::now_utc();
        let risk_id = self.seq.next_risk_id.to_string();
        self.seq.next_risk_id += 1;

        let risk = Risk::from_input(risk_id, input, now);
        self.risks.push(risk.clone());
        self.record(
            &risk.risk_id,
            actor,
            AuditAction::Create,
            AuditChanges::Created {
                created: Box::new(risk.clone()),
            },
            now,
        );
        self.persist();
        tracing::debug!(risk_id = %risk.risk_id, score = risk.risk_score(), "risk added");
        Ok(risk)
    }

    pub fn update(
        &mut self,
        risk_id: &str,
        patch: RiskPatch,
        actor: Option<&User>,
    ) -> Result<Risk, StoreError> {
        validate_patch(&patch)?;

        let Some(risk) = self.risks.iter_mut().find(|r| r.risk_id == risk_id) else {
            return Err(StoreError::NotFound(risk_id.to_string()));
        };

        let now = OffsetDateTime::now_utc();
        risk.apply(&patch, now);
        let updated = risk.clone();

        self.record(
            risk_id,
            actor,
            AuditAction::Update,
            AuditChanges::Patch(patch),
            now,
        );
        self.persist();
        tracing::debug!(risk_id, score = updated.risk_score(), "risk updated");
        Ok(updated)
    }

    pub fn delete(&mut self, risk_id: &str, actor: Option<&User>) -> Result<Risk, StoreError> {
        let Some(idx) = self.risks.iter().position(|r| r.risk_id == risk_id) else {
            return Err(StoreError::NotFound(risk_id.to_string()));
        };

        let removed = self.risks.remove(idx);
        let now = OffsetDateTime::now_utc();
        self.record(
            risk_id,
            actor,
            AuditAction::Delete,
            AuditChanges::Deleted {
                deleted: Box::new(removed.clone()),
            },
            now,
        );
        self.persist();
        tracing::debug!(risk_id, "risk deleted");
        Ok(removed)
    }

    pub fn get_by_id(&self, risk_id: &str) -> Option<&Risk> {
        self.risks.iter().find(|r| r.risk_id == risk_id)
    }

    pub fn get_by_category(&self) -> BTreeMap<String, Vec<Risk>> {
        let mut out: BTreeMap<String, Vec<Risk>> = BTreeMap::new();
        for risk in &self.risks {
            out.entry(risk.category.clone())
                .or_default()
                .push(risk.clone());
        }
        out
    }

    pub fn get_mitigation_stats(&self) -> MitigationStats {
        let mut stats = MitigationStats::default();
        for risk in &self.risks {
            stats.record(risk.mitigation_status);
        }
        stats
    }

    pub fn get_high_risk_items(&self) -> Vec<&Risk> {
        self.risks
            .iter()
            .filter(|r| r.risk_score() >= HIGH_RISK_THRESHOLD)
            .collect()
    }

    pub fn filter(&self, filter: &RiskFilter) -> Vec<&Risk> {
        self.risks.iter().filter(|r| filter.matches(r)).collect()
    }

    pub fn summary(&self) -> RegisterSummary {
        let total = self.risks.len();
        let mitigation = self.get_mitigation_stats();
        let score_sum: u32 = self.risks.iter().map(|r| u32::from(r.risk_score())).sum();
        let average_score = if total == 0 {
            0.0
        } else {
            (f64::from(score_sum) / total as f64 * 10.0).round() / 10.0
        };
        let mitigation_rate_percent = if total == 0 {
            0
        } else {
            ((mitigation.completed * 100 + total / 2) / total) as u8
        };

        let mut bands: BTreeMap<RiskBand, usize> =
            RiskBand::ALL.iter().map(|b| (*b, 0)).collect();
        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        for risk in &self.risks {
            *bands.entry(risk.band()).or_default() += 1;
            *categories.entry(risk.category.clone()).or_default() += 1;
        }

        RegisterSummary {
            total_risks: total,
            high_risk_items: self.get_high_risk_items().len(),
            mitigation_rate_percent,
            average_score,
            mitigation,
            bands,
            categories,
        }
    }

    /// Restores the seed dataset, dropping all audit history past the seed.
    pub fn reset(&mut self) {
        self.risks = seed::initial_risks();
        self.audit = AuditLog::from_entries(seed::initial_audit_trail());
        self.seq = seed::initial_sequence();
        self.persist();
        if let Err(err) = self.kv.set(kv::INITIALIZED_KEY, "true") {
            tracing::error!("初期化フラグを保存できませんでした: {err:#}");
        }
        tracing::info!("デモデータに戻しました");
    }

    fn record(
        &mut self,
        risk_id: &str,
        actor: Option<&User>,
        action: AuditAction,
        changes: AuditChanges,
        now: OffsetDateTime,
    ) {
        let audit_id = self.seq.next_audit_id.to_string();
        self.seq.next_audit_id += 1;
        self.audit.append(AuditEntry {
            audit_id,
            risk_id: risk_id.to_string(),
            user_id: actor.map(|u| u.user_id.clone()),
            action,
            timestamp: now,
            changes,
        });
    }

    fn persist(&mut self) {
        if let Err(err) = kv::save_json(&mut self.kv, kv::RISKS_KEY, &self.risks) {
            tracing::error!("リスク一覧を保存できませんでした: {err:#}");
        }
        if let Err(err) = kv::save_json(&mut self.kv, kv::AUDIT_TRAIL_KEY, &self.audit) {
            tracing::error!("監査証跡を保存できませんでした: {err:#}");
        }
        if let Err(err) = kv::save_json(&mut self.kv, kv::SEQUENCE_KEY, &self.seq) {
            tracing::error!("採番状態を保存できませんでした: {err:#}");
        }
    }
}

fn load_or<T, F>(kv: &impl KvStore, key: &str, fallback: F) -> T
where
    T: serde::de::DeserializeOwned,
    F: FnOnce() -> T,
{
    match kv::load_json::<T>(kv, key) {
        Ok(Some(v)) => v,
        Ok(None) => fallback(),
        Err(err) => {
            tracing::warn!("保存データを読み込めないため初期データを使用します: {err:#}");
            fallback()
        }
    }
}

/// Sequence that cannot collide with any id already present.
fn derive_sequence(risks: &[Risk], audit: &AuditLog) -> Sequence {
    let max_risk = risks
        .iter()
        .map(|r| r.risk_id.as_str())
        .chain(audit.entries().iter().map(|e| e.risk_id.as_str()))
        .filter_map(|id| id.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    let max_audit = audit
        .entries()
        .iter()
        .filter_map(|e| e.audit_id.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Sequence {
        next_risk_id: max_risk + 1,
        next_audit_id: max_audit + 1,
    }
}

fn reconcile_sequence(stored: Sequence, derived: Sequence) -> Sequence {
    Sequence {
        next_risk_id: stored.next_risk_id.max(derived.next_risk_id),
        next_audit_id: stored.next_audit_id.max(derived.next_audit_id),
    }
}

fn validate_factor(field: &str, value: u8) -> Result<(), StoreError> {
    if FACTOR_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "{field} は 1..=5 で指定してください（指定値: {value}）"
        )))
    }
}

fn validate_input(input: &RiskInput) -> Result<(), StoreError> {
    let mut missing = Vec::new();
    if input.risk_name.trim().is_empty() {
        missing.push("risk_name");
    }
    if input.description.trim().is_empty() {
        missing.push("description");
    }
    if input.category.trim().is_empty() {
        missing.push("category");
    }
    if !missing.is_empty() {
        return Err(StoreError::Validation(format!(
            "必須項目が空です: {}",
            missing.join(", ")
        )));
    }
    validate_factor("likelihood", input.likelihood)?;
    validate_factor("impact", input.impact)?;
    Ok(())
}

fn validate_patch(patch: &RiskPatch) -> Result<(), StoreError> {
    if patch.risk_name.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(StoreError::Validation("risk_name は空にできません".to_string()));
    }
    if patch.description.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(StoreError::Validation("description は空にできません".to_string()));
    }
    if patch.category.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(StoreError::Validation("category は空にできません".to_string()));
    }
    if matches!(&patch.regulatory_reference, Some(Some(r)) if r.trim().is_empty()) {
        return Err(StoreError::Validation(
            "regulatory_reference は空にできません（解除は --clear-reference）".to_string(),
        ));
    }
    if let Some(likelihood) = patch.likelihood {
        validate_factor("likelihood", likelihood)?;
    }
    if let Some(impact) = patch.impact {
        validate_factor("impact", impact)?;
    }
    Ok(())
}
