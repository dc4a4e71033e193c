use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const FACTOR_RANGE: RangeInclusive<u8> = 1..=5;
pub const HIGH_RISK_THRESHOLD: u8 = 12;

pub const fn risk_score(likelihood: u8, impact: u8) -> u8 {
    likelihood.saturating_mul(impact)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl MitigationStatus {
    pub const ALL: [MitigationStatus; 3] = [
        MitigationStatus::NotStarted,
        MitigationStatus::InProgress,
        MitigationStatus::Completed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            MitigationStatus::NotStarted => "not_started",
            MitigationStatus::InProgress => "in_progress",
            MitigationStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for MitigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MitigationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "not_started" => Ok(MitigationStatus::NotStarted),
            "in_progress" => Ok(MitigationStatus::InProgress),
            "completed" => Ok(MitigationStatus::Completed),
            _ => Err(format!(
                "対策ステータスが不正です: {s}（not_started|in_progress|completed を指定してください）"
            )),
        }
    }
}

/// Display band of a risk score. Bands only drive presentation; the
/// high-risk filter uses [`HIGH_RISK_THRESHOLD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    MediumHigh,
    High,
}

impl RiskBand {
    pub const ALL: [RiskBand; 4] = [
        RiskBand::Low,
        RiskBand::Medium,
        RiskBand::MediumHigh,
        RiskBand::High,
    ];

    pub const fn from_score(score: u8) -> Self {
        if score >= 15 {
            RiskBand::High
        } else if score >= 10 {
            RiskBand::MediumHigh
        } else if score >= 6 {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::MediumHigh => "medium_high",
            RiskBand::High => "high",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
