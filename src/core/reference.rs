use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatoryReference {
    pub reference_id: String,
    pub title: String,
    pub source: String,
    pub section: String,
    pub description: String,
    pub url: String,
    pub category: String,
    pub applicable_regions: Vec<String>,
    pub last_updated: String,
    pub key_requirements: Vec<String>,
}
