use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{MitigationStatus, RiskBand};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationStats {
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl MitigationStats {
    pub fn record(&mut self, status: MitigationStatus) {
        match status {
            MitigationStatus::NotStarted => self.not_started += 1,
            MitigationStatus::InProgress => self.in_progress += 1,
            MitigationStatus::Completed => self.completed += 1,
        }
    }

    pub fn get(&self, status: MitigationStatus) -> usize {
        match status {
            MitigationStatus::NotStarted => self.not_started,
            MitigationStatus::InProgress => self.in_progress,
            MitigationStatus::Completed => self.completed,
        }
    }

    pub fn total(&self) -> usize {
        self.not_started + self.in_progress + self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSummary {
    pub total_risks: usize,
    pub high_risk_items: usize,
    pub mitigation_rate_percent: u8,
    pub average_score: f64,
    pub mitigation: MitigationStats,
    pub bands: BTreeMap<RiskBand, usize>,
    pub categories: BTreeMap<String, usize>,
}
