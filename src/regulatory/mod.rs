use crate::core::RegulatoryReference;

/// Read-only catalogue of GMP/GDP citations.
#[derive(Debug, Clone)]
pub struct RegulatoryStore {
    references: Vec<RegulatoryReference>,
}

impl Default for RegulatoryStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RegulatoryStore {
    pub fn new(references: Vec<RegulatoryReference>) -> Self {
        Self { references }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_references())
    }

    pub fn references(&self) -> &[RegulatoryReference] {
        &self.references
    }

    pub fn get_by_id(&self, reference_id: &str) -> Option<&RegulatoryReference> {
        self.references
            .iter()
            .find(|r| r.reference_id == reference_id)
    }

    /// Exact source match, ignoring ASCII case and surrounding whitespace.
    pub fn by_source(&self, source: &str) -> Vec<&RegulatoryReference> {
        self.references
            .iter()
            .filter(|r| same_label(&r.source, source))
            .collect()
    }

    /// Exact category match, ignoring ASCII case and surrounding whitespace.
    pub fn by_category(&self, category: &str) -> Vec<&RegulatoryReference> {
        self.references
            .iter()
            .filter(|r| same_label(&r.category, category))
            .collect()
    }

    /// Case-insensitive substring search over title, description, category,
    /// source and key requirements.
    pub fn search(&self, term: &str) -> Vec<&RegulatoryReference> {
        let term = term.trim().to_lowercase();
        self.references
            .iter()
            .filter(|r| matches_term(r, &term))
            .collect()
    }

    /// Combines `by_source`, `by_category` and `search`; unset fields do not
    /// filter.
    pub fn filter(&self, filter: &ReferenceFilter) -> Vec<&RegulatoryReference> {
        let mut found = match filter.source.as_deref() {
            Some(source) => self.by_source(source),
            None => self.references.iter().collect(),
        };
        if let Some(category) = filter.category.as_deref() {
            let in_category = self.by_category(category);
            found.retain(|r| in_category.iter().any(|c| c.reference_id == r.reference_id));
        }
        if let Some(term) = filter.search.as_deref() {
            let term = term.trim().to_lowercase();
            found.retain(|r| matches_term(r, &term));
        }
        found
    }

    pub fn unique_categories(&self) -> Vec<&str> {
        unique(self.references.iter().map(|r| r.category.as_str()))
    }

    pub fn unique_sources(&self) -> Vec<&str> {
        unique(self.references.iter().map(|r| r.source.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceFilter {
    pub search: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
}

fn same_label(value: &str, wanted: &str) -> bool {
    value.trim().eq_ignore_ascii_case(wanted.trim())
}

fn matches_term(r: &RegulatoryReference, term: &str) -> bool {
    r.title.to_lowercase().contains(term)
        || r.description.to_lowercase().contains(term)
        || r.category.to_lowercase().contains(term)
        || r.source.to_lowercase().contains(term)
        || r.key_requirements
            .iter()
            .any(|k| k.to_lowercase().contains(term))
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn reference(
    id: &str,
    title: &str,
    source: &str,
    section: &str,
    description: &str,
    url: &str,
    category: &str,
    regions: &[&str],
    last_updated: &str,
    requirements: &[&str],
) -> RegulatoryReference {
    RegulatoryReference {
        reference_id: id.to_string(),
        title: title.to_string(),
        source: source.to_string(),
        section: section.to_string(),
        description: description.to_string(),
        url: url.to_string(),
        category: category.to_string(),
        applicable_regions: regions.iter().map(|s| (*s).to_string()).collect(),
        last_updated: last_updated.to_string(),
        key_requirements: requirements.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn builtin_references() -> Vec<RegulatoryReference> {
    vec![
        reference(
            "1",
            "EU Guidelines on Good Distribution Practice (GDP) - Temperature Control",
            "EU GDP",
            "5.2.1",
            "Requirements for maintaining appropriate temperature conditions during storage and transportation of medicinal products.",
            "https://ec.europa.eu/health/documents/eudralex/vol-4_en",
            "Temperature Management",
            &["EU", "EEA"],
            "2024-01-15",
            &[
                "Continuous temperature monitoring during transport",
                "Validated temperature-controlled storage facilities",
                "Documentation of temperature excursions and corrective actions",
            ],
        ),
        reference(
            "2",
            "ICH Q9 - Quality Risk Management",
            "ICH",
            "3.2",
            "International guidance on quality risk management principles and tools for pharmaceutical development, manufacturing, and distribution.",
            "https://www.ich.org/page/quality-guidelines",
            "Risk Management",
            &["Global"],
            "2023-11-20",
            &[
                "Systematic approach to risk assessment",
                "Risk evaluation and control measures",
                "Regular review and monitoring of risk controls",
            ],
        ),
        reference(
            "3",
            "FDA 21 CFR Part 211 - Current Good Manufacturing Practice",
            "FDA",
            "211.142",
            "US FDA regulations for warehousing procedures and requirements for pharmaceutical products.",
            "https://www.accessdata.fda.gov/scripts/cdrh/cfdocs/cfcfr/CFRSearch.cfm",
            "Storage and Warehousing",
            &["USA"],
            "2024-03-10",
            &[
                "Proper storage conditions and environmental controls",
                "Segregation of different product types",
                "Regular inspection and maintenance of storage areas",
            ],
        ),
        reference(
            "4",
            "EU GDP Guidelines - Security Requirements",
            "EU GDP",
            "7.1",
            "Security measures to prevent theft, diversion, and counterfeiting of medicinal products.",
            "https://ec.europa.eu/health/documents/eudralex/vol-4_en",
            "Security",
            &["EU", "EEA"],
            "2024-02-28",
            &[
                "Secure storage and transport arrangements",
                "Personnel security and access controls",
                "Incident reporting and investigation procedures",
            ],
        ),
        reference(
            "5",
            "WHO Technical Report Series - Good Storage Practices",
            "WHO",
            "4.3",
            "World Health Organization guidelines for good storage practices for pharmaceutical products.",
            "https://www.who.int/medicines/areas/quality_safety/quality_assurance/guidelines/en/",
            "Storage Conditions",
            &["Global"],
            "2023-09-12",
            &[
                "Appropriate storage conditions for different product types",
                "Environmental monitoring and control systems",
                "Stock rotation and inventory management",
            ],
        ),
        reference(
            "6",
            "ECA Guide to GDP - Documentation Requirements",
            "ECA",
            "2.4",
            "European Compliance Academy guidance on documentation requirements for good distribution practice.",
            "https://www.gmp-compliance.org/guidelines/gmp-guideline",
            "Documentation",
            &["EU", "Global"],
            "2024-01-30",
            &[
                "Complete batch records and distribution documentation",
                "Traceability throughout the supply chain",
                "Regular review and update of documentation systems",
            ],
        ),
    ]
}
