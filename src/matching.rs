use crate::models::{Institution, MatchClassification, MatchResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Minimum similarity for a fuzzy institution match (strictly greater than).
pub const INSTITUTION_SIMILARITY_THRESHOLD: f64 = 0.80;
/// Minimum similarity for a fuzzy program match (strictly greater than).
pub const PROGRAM_SIMILARITY_THRESHOLD: f64 = 0.75;
/// Fuzzy program matches above this similarity are treated as renames.
pub const RENAME_SIMILARITY_THRESHOLD: f64 = 0.90;

/// Canonicalize a free-text name for comparison: lower-case, strip everything
/// outside `[a-z0-9 ]`, collapse whitespace runs, trim. Idempotent.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = true;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_was_space = false;
        } else if c.is_whitespace() && !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Remove leading row numbers that leak into institution names from
/// spreadsheet exports, e.g. "100 Central Washington College".
pub fn clean_institution_name(name: &str) -> String {
    static LEADING_NUMBER: OnceLock<Regex> = OnceLock::new();
    let leading_number = LEADING_NUMBER.get_or_init(|| Regex::new(r"^\d+\s+").unwrap());
    leading_number.replace(name, "").trim().to_string()
}

/// Levenshtein-based similarity over normalized forms, in [0, 1].
/// Two empty strings are defined as identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    let max_len = na.chars().count().max(nb.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(&na, &nb);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct ProgramEntry {
    pub id: String,
    pub name: String,
    pub normalized: String,
    pub active: bool,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct InstitutionEntry {
    pub id: String,
    pub name: String,
    pub normalized: String,
}

/// Read-only lookup structure built once per reconciliation run. Passing it
/// explicitly keeps runs independently testable; newly created programs are
/// inserted back so later records in the same run can match against them.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    institutions: Vec<InstitutionEntry>,
    institution_index: HashMap<String, String>,
    programs: HashMap<String, Vec<ProgramEntry>>,
}

impl CatalogSnapshot {
    pub fn build(institutions: &[Institution]) -> Self {
        let mut snapshot = CatalogSnapshot::default();
        for institution in institutions {
            let normalized = normalize_name(&institution.name);
            snapshot
                .institution_index
                .insert(normalized.clone(), institution.id.clone());
            snapshot.institutions.push(InstitutionEntry {
                id: institution.id.clone(),
                name: institution.name.clone(),
                normalized,
            });
            let entries = institution
                .programs
                .iter()
                .map(|p| ProgramEntry {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    normalized: normalize_name(&p.name),
                    active: p.active,
                    last_updated: p.accreditation_last_updated,
                })
                .collect();
            snapshot.programs.insert(institution.id.clone(), entries);
        }
        snapshot
    }

    pub fn programs_of(&self, institution_id: &str) -> &[ProgramEntry] {
        self.programs
            .get(institution_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_programs(&self, institution_id: &str) -> bool {
        !self.programs_of(institution_id).is_empty()
    }

    pub fn insert_program(
        &mut self,
        institution_id: &str,
        id: &str,
        name: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        self.programs
            .entry(institution_id.to_string())
            .or_default()
            .push(ProgramEntry {
                id: id.to_string(),
                name: name.to_string(),
                normalized: normalize_name(name),
                active: true,
                last_updated: Some(now),
            });
    }

    pub fn rename_program(&mut self, institution_id: &str, program_id: &str, new_name: &str) {
        if let Some(entries) = self.programs.get_mut(institution_id) {
            if let Some(entry) = entries.iter_mut().find(|e| e.id == program_id) {
                entry.name = new_name.to_string();
                entry.normalized = normalize_name(new_name);
            }
        }
    }
}

/// Resolve an institution name: exact match on the normalized-name index,
/// then fuzzy over every institution. Equal similarity scores are broken by
/// lexicographic id so resolution does not depend on iteration order.
pub fn resolve_institution(snapshot: &CatalogSnapshot, name: &str) -> Option<String> {
    let normalized = normalize_name(name);
    if let Some(id) = snapshot.institution_index.get(&normalized) {
        return Some(id.clone());
    }

    let mut best: Option<(&InstitutionEntry, f64)> = None;
    for entry in &snapshot.institutions {
        let sim = similarity(&entry.normalized, &normalized);
        if sim <= INSTITUTION_SIMILARITY_THRESHOLD {
            continue;
        }
        match &best {
            Some((b, bs)) if sim < *bs || (sim == *bs && entry.id >= b.id) => {}
            _ => best = Some((entry, sim)),
        }
    }
    best.map(|(entry, _)| entry.id.clone())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgramResolution {
    Exact { program_id: String },
    Fuzzy { program_id: String, similarity: f64 },
    NotFound,
}

/// Resolve a program name within a single institution's programs.
pub fn resolve_program(
    snapshot: &CatalogSnapshot,
    institution_id: &str,
    name: &str,
) -> ProgramResolution {
    let normalized = normalize_name(name);
    let programs = snapshot.programs_of(institution_id);

    if let Some(exact) = programs.iter().find(|p| p.normalized == normalized) {
        return ProgramResolution::Exact {
            program_id: exact.id.clone(),
        };
    }

    let mut best: Option<(&ProgramEntry, f64)> = None;
    for entry in programs {
        let sim = similarity(&entry.normalized, &normalized);
        if sim <= PROGRAM_SIMILARITY_THRESHOLD {
            continue;
        }
        match &best {
            Some((b, bs)) if sim < *bs || (sim == *bs && entry.id >= b.id) => {}
            _ => best = Some((entry, sim)),
        }
    }
    match best {
        Some((entry, sim)) => ProgramResolution::Fuzzy {
            program_id: entry.id.clone(),
            similarity: sim,
        },
        None => ProgramResolution::NotFound,
    }
}

/// Resolve one external record end to end: institution first, then program
/// scoped to it. Every record yields exactly one classification.
pub fn resolve_record(
    snapshot: &CatalogSnapshot,
    institution_name: &str,
    program_name: &str,
) -> MatchResult {
    let institution_id = match resolve_institution(snapshot, institution_name) {
        Some(id) => id,
        None => {
            return MatchResult {
                classification: MatchClassification::Unmatched {
                    reason: "institution not found".to_string(),
                },
                institution_id: None,
                program_id: None,
            }
        }
    };

    match resolve_program(snapshot, &institution_id, program_name) {
        ProgramResolution::Exact { program_id } => MatchResult {
            classification: MatchClassification::Exact,
            institution_id: Some(institution_id),
            program_id: Some(program_id),
        },
        ProgramResolution::Fuzzy {
            program_id,
            similarity,
        } => MatchResult {
            classification: MatchClassification::Fuzzy { similarity },
            institution_id: Some(institution_id),
            program_id: Some(program_id),
        },
        ProgramResolution::NotFound => {
            let reason = if snapshot.has_programs(&institution_id) {
                "program not found".to_string()
            } else {
                "program not found and institution has no programs".to_string()
            };
            MatchResult {
                classification: MatchClassification::Unmatched { reason },
                institution_id: Some(institution_id),
                program_id: None,
            }
        }
    }
}
