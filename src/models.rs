use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub utme_score: f64,
    pub olevel_grades: HashMap<String, String>,
    pub post_utme_score: Option<f64>,
    pub result_limit: Option<usize>,
    pub catalog_file: Option<String>,
    pub output_directory: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut olevel_grades = HashMap::new();
        olevel_grades.insert("English Language".to_string(), "B3".to_string());
        olevel_grades.insert("Mathematics".to_string(), "B2".to_string());

        Self {
            utme_score: 0.0,
            olevel_grades,
            post_utme_score: None,
            result_limit: Some(10),
            catalog_file: Some("catalog.json".to_string()),
            output_directory: Some("output".to_string()),
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstitutionType {
    University,
    Polytechnic,
    College,
    Nursing,
    Military,
}

impl InstitutionType {
    /// Accreditation is issued at institution level for colleges (NCCE) and
    /// polytechnics (NBTE); universities carry per-program statuses.
    pub fn accredited_at_institution_level(&self) -> bool {
        matches!(self, InstitutionType::College | InstitutionType::Polytechnic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Federal,
    State,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionAccreditation {
    Accredited,
    NotAccredited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InstitutionType,
    pub ownership: Ownership,
    pub state: String,
    pub city: Option<String>,
    pub accreditation: Option<InstitutionAccreditation>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub programs: Vec<Program>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub institution_id: String,
    pub name: String,
    pub faculty: Option<String>,
    pub accreditation_status: Option<String>,
    pub accreditation_maturity_year: Option<i32>,
    pub accreditation_last_updated: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_data_quality")]
    pub data_quality_score: u32,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub cutoff_history: Vec<CutoffEntry>,
}

fn default_data_quality() -> u32 {
    70
}

impl Program {
    /// Re-accreditation is a read-time derived fact, never stored.
    pub fn is_re_accredited(&self) -> bool {
        self.accreditation_maturity_year
            .map(|year| year >= RE_ACCREDITATION_BASELINE_YEAR)
            .unwrap_or(false)
    }
}

/// Maturity years at or beyond this baseline count as currently re-accredited.
pub const RE_ACCREDITATION_BASELINE_YEAR: i32 = 2024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionMode {
    Utme,
    PostUtme,
    DirectEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutoffConfidence {
    Verified,
    Estimated,
    Unverified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoffEntry {
    pub year: i32,
    pub cutoff: f64,
    pub mode: AdmissionMode,
    pub confidence: CutoffConfidence,
    pub source_url: Option<String>,
}

/// One row of the authority dataset, consumed once per reconciliation run.
#[derive(Debug, Clone)]
pub struct ExternalAccreditationRecord {
    pub institution: String,
    pub program: String,
    pub status: String,
    pub maturity_year: Option<i32>,
    pub faculty: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchClassification {
    Exact,
    Fuzzy { similarity: f64 },
    Unmatched { reason: String },
}

/// Outcome of resolving one external record against the catalog snapshot.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub classification: MatchClassification,
    pub institution_id: Option<String>,
    pub program_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedRecord {
    pub institution: String,
    pub program: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub matched: usize,
    pub updated: usize,
    pub created: usize,
    pub renamed: usize,
    pub discontinued: usize,
    pub errors: Vec<String>,
    pub unmatched: Vec<UnmatchedRecord>,
    pub total_records: usize,
}

impl ReconciliationSummary {
    pub fn message(&self) -> String {
        format!(
            "Processed {} records: {} matched, {} updated, {} created, {} renamed, {} discontinued",
            self.total_records, self.matched, self.updated, self.created, self.renamed,
            self.discontinued
        )
    }
}

#[derive(Debug, Clone)]
pub struct ApplicantInput {
    pub utme_score: f64,
    pub olevel_grades: HashMap<String, String>,
    pub post_utme_score: Option<f64>,
}

impl ApplicantInput {
    pub fn from_config(config: &Config) -> Self {
        Self {
            utme_score: config.utme_score,
            olevel_grades: config.olevel_grades.clone(),
            post_utme_score: config.post_utme_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Safe,
    Target,
    Reach,
}

impl Category {
    /// Rank used as the final ordering key: safe > target > reach.
    pub fn rank(&self) -> u8 {
        match self {
            Category::Safe => 3,
            Category::Target => 2,
            Category::Reach => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibilityResult {
    pub program_id: String,
    pub program_name: String,
    pub institution_id: String,
    pub institution_name: String,
    pub composite_score: f64,
    pub probability: Option<f64>,
    pub confidence_interval: Option<(f64, f64)>,
    pub category: Category,
    pub priority_score: i32,
    pub accreditation_warning: Option<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationMeta {
    pub composite_score: f64,
    pub total_candidates: usize,
    pub recommended: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_program(id: &str, institution_id: &str, name: &str) -> Program {
        Program {
            id: id.to_string(),
            institution_id: institution_id.to_string(),
            name: name.to_string(),
            faculty: None,
            accreditation_status: Some("Full".to_string()),
            accreditation_maturity_year: Some(2026),
            accreditation_last_updated: None,
            active: true,
            data_quality_score: 70,
            missing_fields: vec![],
            cutoff_history: vec![],
        }
    }

    #[test]
    fn re_accreditation_is_derived_from_maturity_year() {
        let mut program = sample_program("p1", "i1", "Computer Science");
        assert!(program.is_re_accredited());

        program.accreditation_maturity_year = Some(2023);
        assert!(!program.is_re_accredited());

        program.accreditation_maturity_year = None;
        assert!(!program.is_re_accredited());
    }

    #[test]
    fn summary_message_lists_all_counters() {
        let summary = ReconciliationSummary {
            matched: 3,
            updated: 3,
            created: 1,
            renamed: 2,
            discontinued: 1,
            total_records: 5,
            ..Default::default()
        };
        assert_eq!(
            summary.message(),
            "Processed 5 records: 3 matched, 3 updated, 1 created, 2 renamed, 1 discontinued"
        );
    }
}
