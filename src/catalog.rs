use crate::models::{Institution, Program};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("institution not found: {0}")]
    InstitutionNotFound(String),
    #[error("program not found: {0}")]
    ProgramNotFound(String),
    #[error("program {program_id} already exists under institution {institution_id}")]
    DuplicateProgram {
        institution_id: String,
        program_id: String,
    },
    #[error("failed to read catalog file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write catalog file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid catalog file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// The catalog as the engines see it: bounded, synchronous find/create/update
/// calls. The persistent layout behind this seam is not the engines' concern.
pub trait CatalogStore {
    fn institutions(&self) -> Vec<Institution>;
    fn get_program(&self, program_id: &str) -> Result<Program, CatalogError>;
    fn create_program(&mut self, program: Program) -> Result<(), CatalogError>;
    fn update_program(&mut self, program: Program) -> Result<(), CatalogError>;
    fn upsert_institution(&mut self, institution: Institution) -> Result<(), CatalogError>;
}

/// JSON-file-backed catalog held fully in memory for the duration of a run.
#[derive(Debug, Default)]
pub struct JsonCatalog {
    institutions: Vec<Institution>,
}

impl JsonCatalog {
    pub fn new(institutions: Vec<Institution>) -> Self {
        Self { institutions }
    }

    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_string(),
            source,
        })?;
        let institutions =
            serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
                path: path.to_string(),
                source,
            })?;
        Ok(Self { institutions })
    }

    pub fn save(&self, path: &str) -> Result<(), CatalogError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| CatalogError::Write {
                    path: path.to_string(),
                    source,
                })?;
            }
        }
        let content =
            serde_json::to_string_pretty(&self.institutions).map_err(|source| {
                CatalogError::Parse {
                    path: path.to_string(),
                    source,
                }
            })?;
        std::fs::write(path, content).map_err(|source| CatalogError::Write {
            path: path.to_string(),
            source,
        })
    }
}

impl CatalogStore for JsonCatalog {
    fn institutions(&self) -> Vec<Institution> {
        self.institutions.clone()
    }

    fn get_program(&self, program_id: &str) -> Result<Program, CatalogError> {
        self.institutions
            .iter()
            .flat_map(|i| i.programs.iter())
            .find(|p| p.id == program_id)
            .cloned()
            .ok_or_else(|| CatalogError::ProgramNotFound(program_id.to_string()))
    }

    fn create_program(&mut self, program: Program) -> Result<(), CatalogError> {
        let institution = self
            .institutions
            .iter_mut()
            .find(|i| i.id == program.institution_id)
            .ok_or_else(|| CatalogError::InstitutionNotFound(program.institution_id.clone()))?;
        if institution.programs.iter().any(|p| p.id == program.id) {
            return Err(CatalogError::DuplicateProgram {
                institution_id: institution.id.clone(),
                program_id: program.id,
            });
        }
        institution.programs.push(program);
        Ok(())
    }

    fn update_program(&mut self, program: Program) -> Result<(), CatalogError> {
        let institution = self
            .institutions
            .iter_mut()
            .find(|i| i.id == program.institution_id)
            .ok_or_else(|| CatalogError::InstitutionNotFound(program.institution_id.clone()))?;
        let slot = institution
            .programs
            .iter_mut()
            .find(|p| p.id == program.id)
            .ok_or_else(|| CatalogError::ProgramNotFound(program.id.clone()))?;
        *slot = program;
        Ok(())
    }

    fn upsert_institution(&mut self, institution: Institution) -> Result<(), CatalogError> {
        match self.institutions.iter_mut().find(|i| i.id == institution.id) {
            Some(slot) => *slot = institution,
            None => self.institutions.push(institution),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEntityType {
    Institution,
    Program,
}

impl fmt::Display for AuditEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEntityType::Institution => write!(f, "institution"),
            AuditEntityType::Program => write!(f, "program"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Create => write!(f, "create"),
            AuditAction::Update => write!(f, "update"),
        }
    }
}

/// Emitted for every catalog mutation, carrying before/after values.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub entity_type: AuditEntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub before_value: Option<serde_json::Value>,
    pub after_value: Option<serde_json::Value>,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Audit logging must never break the main flow; implementations swallow
/// their own failures.
pub trait AuditSink {
    fn record(&mut self, event: AuditEvent);
}

/// Collects events in memory; the default sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    pub events: Vec<AuditEvent>,
}

impl AuditSink for MemoryAuditLog {
    fn record(&mut self, event: AuditEvent) {
        self.events.push(event);
    }
}

/// Appends one CSV row per mutation.
pub struct CsvAuditLog {
    writer: csv::Writer<std::fs::File>,
}

impl CsvAuditLog {
    pub fn create(path: &str) -> anyhow::Result<Self> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record([
            "Timestamp",
            "Actor",
            "Entity_Type",
            "Entity_Id",
            "Action",
            "Before",
            "After",
        ])?;
        Ok(Self { writer })
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl AuditSink for CsvAuditLog {
    fn record(&mut self, event: AuditEvent) {
        let before = event
            .before_value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let after = event
            .after_value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let result = self.writer.write_record([
            event.timestamp.to_rfc3339().as_str(),
            event.actor_id.as_str(),
            event.entity_type.to_string().as_str(),
            event.entity_id.as_str(),
            event.action.to_string().as_str(),
            before.as_str(),
            after.as_str(),
        ]);
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to write audit event");
        }
    }
}
