//! FMEA reference material: Risk Priority Number and rating scales.
//!
//! RPN = Severity × Occurrence × Detection, each factor rated 1..=10. This
//! is reference tooling and is independent of the risk register's
//! likelihood × impact score.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

pub const RATING_RANGE: RangeInclusive<u8> = 1..=10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FmeaError {
    #[error("{factor} は 1..=10 で指定してください（指定値: {value}）")]
    OutOfRange { factor: Factor, value: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Severity,
    Occurrence,
    Detection,
}

impl Factor {
    pub const ALL: [Factor; 3] = [Factor::Severity, Factor::Occurrence, Factor::Detection];

    pub const fn as_str(self) -> &'static str {
        match self {
            Factor::Severity => "severity",
            Factor::Occurrence => "occurrence",
            Factor::Detection => "detection",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Factor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "severity" | "s" => Ok(Factor::Severity),
            "occurrence" | "o" => Ok(Factor::Occurrence),
            "detection" | "d" => Ok(Factor::Detection),
            _ => Err(format!(
                "評価項目が不正です: {s}（severity|occurrence|detection を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RpnPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl RpnPriority {
    pub const fn from_value(rpn: u16) -> Self {
        if rpn >= 200 {
            RpnPriority::Critical
        } else if rpn >= 100 {
            RpnPriority::High
        } else if rpn >= 50 {
            RpnPriority::Medium
        } else {
            RpnPriority::Low
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RpnPriority::Critical => "Critical - Immediate Action Required",
            RpnPriority::High => "High - Action Required",
            RpnPriority::Medium => "Medium - Action Recommended",
            RpnPriority::Low => "Low - Monitor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rpn {
    pub severity: u8,
    pub occurrence: u8,
    pub detection: u8,
    pub value: u16,
    pub priority: RpnPriority,
}

impl Rpn {
    pub fn new(severity: u8, occurrence: u8, detection: u8) -> Result<Self, FmeaError> {
        for (factor, value) in [
            (Factor::Severity, severity),
            (Factor::Occurrence, occurrence),
            (Factor::Detection, detection),
        ] {
            if !RATING_RANGE.contains(&value) {
                return Err(FmeaError::OutOfRange { factor, value });
            }
        }
        let value = u16::from(severity) * u16::from(occurrence) * u16::from(detection);
        Ok(Self {
            severity,
            occurrence,
            detection,
            value,
            priority: RpnPriority::from_value(value),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleEntry {
    pub score: u8,
    pub description: &'static str,
}

const fn e(score: u8, description: &'static str) -> ScaleEntry {
    ScaleEntry { score, description }
}

const SEVERITY: [ScaleEntry; 10] = [
    e(1, "Minor - No impact on product quality or patient safety"),
    e(2, "Low - Slight impact, easily correctable"),
    e(3, "Moderate - Some impact on quality"),
    e(4, "High - Significant quality impact"),
    e(5, "Very High - Major quality impact"),
    e(6, "Extreme - Potential patient harm"),
    e(7, "Serious - Likely patient harm"),
    e(8, "Hazardous - Severe patient harm"),
    e(9, "Very Hazardous - Life-threatening"),
    e(10, "Catastrophic - Death or permanent disability"),
];

const OCCURRENCE: [ScaleEntry; 10] = [
    e(1, "Remote - Extremely unlikely (< 1 in 1,000,000)"),
    e(2, "Very Low - Very unlikely (1 in 100,000)"),
    e(3, "Low - Unlikely (1 in 10,000)"),
    e(4, "Moderately Low - Occasional (1 in 1,000)"),
    e(5, "Moderate - Possible (1 in 100)"),
    e(6, "Moderately High - Frequent (1 in 50)"),
    e(7, "High - Very frequent (1 in 20)"),
    e(8, "Very High - Repeated failures (1 in 10)"),
    e(9, "Extremely High - Almost certain (1 in 5)"),
    e(10, "Certain - Failure is inevitable (> 1 in 2)"),
];

const DETECTION: [ScaleEntry; 10] = [
    e(1, "Very High - Certain detection"),
    e(2, "High - Almost certain detection"),
    e(3, "Moderately High - High detection probability"),
    e(4, "Moderate - Moderate detection probability"),
    e(5, "Low - Low detection probability"),
    e(6, "Very Low - Very low detection probability"),
    e(7, "Remote - Remote detection probability"),
    e(8, "Very Remote - Very remote detection probability"),
    e(9, "Extremely Remote - Extremely remote detection"),
    e(10, "Absolute Uncertainty - No detection possible"),
];

pub fn scale(factor: Factor) -> &'static [ScaleEntry] {
    match factor {
        Factor::Severity => &SEVERITY,
        Factor::Occurrence => &OCCURRENCE,
        Factor::Detection => &DETECTION,
    }
}

pub fn describe(factor: Factor, score: u8) -> Option<&'static str> {
    scale(factor)
        .iter()
        .find(|entry| entry.score == score)
        .map(|entry| entry.description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpn_is_product_with_priority_bands() {
        let rpn = Rpn::new(5, 4, 5).unwrap();
        assert_eq!(rpn.value, 100);
        assert_eq!(rpn.priority, RpnPriority::High);

        assert_eq!(Rpn::new(1, 1, 1).unwrap().priority, RpnPriority::Low);
        assert_eq!(Rpn::new(5, 5, 2).unwrap().priority, RpnPriority::Medium);
        assert_eq!(Rpn::new(10, 10, 2).unwrap().priority, RpnPriority::Critical);
        assert_eq!(Rpn::new(10, 10, 10).unwrap().value, 1000);
    }

    #[test]
    fn rpn_rejects_out_of_range_factors() {
        assert_eq!(
            Rpn::new(1, 11, 1).unwrap_err(),
            FmeaError::OutOfRange {
                factor: Factor::Occurrence,
                value: 11,
            }
        );
        assert!(Rpn::new(0, 1, 1).is_err());
    }

    #[test]
    fn scales_cover_every_rating() {
        for factor in Factor::ALL {
            let scale = scale(factor);
            assert_eq!(scale.len(), 10);
            for (i, entry) in scale.iter().enumerate() {
                assert_eq!(usize::from(entry.score), i + 1);
            }
        }
        assert_eq!(
            describe(Factor::Detection, 10),
            Some("Absolute Uncertainty - No detection possible")
        );
        assert_eq!(describe(Factor::Severity, 0), None);
    }
}
