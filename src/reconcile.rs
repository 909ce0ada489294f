use crate::catalog::{
    AuditAction, AuditEntityType, AuditEvent, AuditSink, CatalogError, CatalogStore,
};
use crate::matching::{
    self, CatalogSnapshot, RENAME_SIMILARITY_THRESHOLD, PROGRAM_SIMILARITY_THRESHOLD,
};
use crate::models::{
    ExternalAccreditationRecord, InstitutionAccreditation, MatchClassification, Program,
    ReconciliationSummary, UnmatchedRecord,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// A program absent from a fresh dataset is only discontinued once its last
/// accreditation update is older than this window.
pub const STALENESS_WINDOW_DAYS: i64 = 365;

/// Field markers attached to programs created from accreditation data alone.
const CREATED_MISSING_FIELDS: [&str; 3] = ["description", "duration", "admission_requirements"];

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("dataset contains no records")]
    EmptyDataset,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub actor_id: String,
    pub now: DateTime<Utc>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            actor_id: "reconciler".to_string(),
            now: Utc::now(),
        }
    }
}

/// One reconciliation run: resolve every external record against a snapshot
/// taken at the start, mutate the catalog per record, then scan matched
/// institutions for discontinued programs. Failures are isolated per record;
/// nothing here rolls back.
pub struct Reconciler<'a> {
    store: &'a mut dyn CatalogStore,
    audit: &'a mut dyn AuditSink,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a mut dyn CatalogStore,
        audit: &'a mut dyn AuditSink,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            audit,
            options,
        }
    }

    pub fn run(
        &mut self,
        records: &[ExternalAccreditationRecord],
    ) -> Result<ReconciliationSummary, ReconcileError> {
        if records.is_empty() {
            return Err(ReconcileError::EmptyDataset);
        }

        let mut snapshot = CatalogSnapshot::build(&self.store.institutions());
        let mut summary = ReconciliationSummary {
            total_records: records.len(),
            ..Default::default()
        };
        // Normalized external program names per matched institution, kept for
        // the discontinuation scan.
        let mut external_names: HashMap<String, Vec<String>> = HashMap::new();

        for record in records {
            if record.institution.is_empty() || record.program.is_empty() {
                summary.errors.push(format!(
                    "Skipping row: missing institution or program name ({:?} / {:?})",
                    record.institution, record.program
                ));
                continue;
            }

            let result = matching::resolve_record(&snapshot, &record.institution, &record.program);
            if let Some(institution_id) = &result.institution_id {
                external_names
                    .entry(institution_id.clone())
                    .or_default()
                    .push(matching::normalize_name(&record.program));
            }

            let outcome = match (&result.classification, &result.institution_id, &result.program_id)
            {
                (MatchClassification::Exact, _, Some(program_id)) => {
                    self.apply_match(record, program_id, None, &mut summary, &mut snapshot)
                }
                (MatchClassification::Fuzzy { similarity }, _, Some(program_id)) => self
                    .apply_match(
                        record,
                        program_id,
                        Some(*similarity),
                        &mut summary,
                        &mut snapshot,
                    ),
                (MatchClassification::Unmatched { .. }, Some(institution_id), None)
                    if snapshot.has_programs(institution_id) =>
                {
                    let institution_id = institution_id.clone();
                    self.create_program(record, &institution_id, &mut summary, &mut snapshot)
                }
                (MatchClassification::Unmatched { reason }, _, _) => {
                    summary.unmatched.push(UnmatchedRecord {
                        institution: record.institution.clone(),
                        program: record.program.clone(),
                        reason: reason.clone(),
                    });
                    Ok(())
                }
                // resolve_record never produces these shapes
                _ => Ok(()),
            };

            if let Err(e) = outcome {
                warn!(program = %record.program, error = %e, "failed to reconcile record");
                summary
                    .errors
                    .push(format!("Error processing {}: {}", record.program, e));
            }
        }

        self.discontinue_stale_programs(&snapshot, &external_names, &mut summary);

        Ok(summary)
    }

    /// Matched-exact and matched-fuzzy share the same field update; a fuzzy
    /// match above the rename threshold additionally takes the external name.
    fn apply_match(
        &mut self,
        record: &ExternalAccreditationRecord,
        program_id: &str,
        similarity: Option<f64>,
        summary: &mut ReconciliationSummary,
        snapshot: &mut CatalogSnapshot,
    ) -> Result<(), CatalogError> {
        let before = self.store.get_program(program_id)?;
        let mut after = before.clone();

        after.accreditation_status = Some(record.status.clone());
        after.accreditation_maturity_year = record.maturity_year;
        after.accreditation_last_updated = Some(self.options.now);
        // Present in the authority dataset, so the program is active again
        // even if a previous run discontinued it.
        after.active = true;
        if record.faculty.is_some() {
            after.faculty = record.faculty.clone();
        }

        let renamed = match similarity {
            Some(sim) if sim > RENAME_SIMILARITY_THRESHOLD && before.name != record.program => {
                after.name = record.program.clone();
                true
            }
            _ => false,
        };

        self.store.update_program(after.clone())?;
        if renamed {
            snapshot.rename_program(&before.institution_id, program_id, &record.program);
            summary.renamed += 1;
        }
        summary.matched += 1;
        summary.updated += 1;
        self.emit(
            AuditEntityType::Program,
            program_id,
            AuditAction::Update,
            Some(&before),
            Some(&after),
        );
        Ok(())
    }

    fn create_program(
        &mut self,
        record: &ExternalAccreditationRecord,
        institution_id: &str,
        summary: &mut ReconciliationSummary,
        snapshot: &mut CatalogSnapshot,
    ) -> Result<(), CatalogError> {
        let program = Program {
            id: program_id_for(institution_id, &record.program),
            institution_id: institution_id.to_string(),
            name: record.program.clone(),
            faculty: record.faculty.clone(),
            accreditation_status: Some(record.status.clone()),
            accreditation_maturity_year: record.maturity_year,
            accreditation_last_updated: Some(self.options.now),
            active: true,
            data_quality_score: 70,
            missing_fields: CREATED_MISSING_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cutoff_history: vec![],
        };

        self.store.create_program(program.clone())?;
        // Insert into the snapshot immediately so a second record for the
        // same program within this run matches instead of duplicating.
        snapshot.insert_program(institution_id, &program.id, &program.name, self.options.now);
        summary.created += 1;
        self.emit(
            AuditEntityType::Program,
            &program.id,
            AuditAction::Create,
            None,
            Some(&program),
        );
        Ok(())
    }

    /// Second pass: for every institution the dataset touched, deactivate
    /// active programs that no external record resembles, guarded by the
    /// staleness window. One batch scan over the snapshot, no per-row reads.
    fn discontinue_stale_programs(
        &mut self,
        snapshot: &CatalogSnapshot,
        external_names: &HashMap<String, Vec<String>>,
        summary: &mut ReconciliationSummary,
    ) {
        let cutoff = self.options.now - Duration::days(STALENESS_WINDOW_DAYS);

        for (institution_id, names) in external_names {
            for entry in snapshot.programs_of(institution_id) {
                if !entry.active {
                    continue;
                }
                let seen = names
                    .iter()
                    .any(|n| matching::similarity(n, &entry.normalized) > PROGRAM_SIMILARITY_THRESHOLD);
                if seen {
                    continue;
                }
                let stale = match entry.last_updated {
                    None => true,
                    Some(ts) => ts < cutoff,
                };
                if !stale {
                    continue;
                }

                match self.store.get_program(&entry.id) {
                    Ok(before) if before.active => {
                        let mut after = before.clone();
                        after.active = false;
                        match self.store.update_program(after.clone()) {
                            Ok(()) => {
                                summary.discontinued += 1;
                                self.emit(
                                    AuditEntityType::Program,
                                    &entry.id,
                                    AuditAction::Update,
                                    Some(&before),
                                    Some(&after),
                                );
                            }
                            Err(e) => summary
                                .errors
                                .push(format!("Error discontinuing {}: {}", entry.name, e)),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => summary
                        .errors
                        .push(format!("Error discontinuing {}: {}", entry.name, e)),
                }
            }
        }
    }

    fn emit<T: Serialize>(
        &mut self,
        entity_type: AuditEntityType,
        entity_id: &str,
        action: AuditAction,
        before: Option<&T>,
        after: Option<&T>,
    ) {
        self.audit.record(AuditEvent {
            entity_type,
            entity_id: entity_id.to_string(),
            action,
            before_value: before.and_then(|v| serde_json::to_value(v).ok()),
            after_value: after.and_then(|v| serde_json::to_value(v).ok()),
            actor_id: self.options.actor_id.clone(),
            timestamp: self.options.now,
        });
    }
}

/// Deterministic program id derived from the owning institution and the
/// normalized name, so re-imports of the same dataset stay idempotent.
fn program_id_for(institution_id: &str, program_name: &str) -> String {
    format!(
        "{}:{}",
        institution_id,
        matching::normalize_name(program_name).replace(' ', "-")
    )
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PropagationSummary {
    pub institutions: usize,
    pub programs_updated: usize,
    pub errors: Vec<String>,
}

/// Propagate institution-level accreditation down to programs for the
/// institution types whose authority accredits the institution as a whole.
/// Only fills programs that carry no status of their own.
pub fn propagate_institution_accreditation(
    store: &mut dyn CatalogStore,
    audit: &mut dyn AuditSink,
    options: &ReconcileOptions,
) -> PropagationSummary {
    let mut summary = PropagationSummary::default();
    let current_year = options.now.year();

    for institution in store.institutions() {
        if !institution.kind.accredited_at_institution_level() {
            continue;
        }
        let Some(accreditation) = institution.accreditation else {
            continue;
        };
        if institution.programs.is_empty() {
            continue;
        }

        let (status, maturity_year) = match accreditation {
            // No per-program maturity dates at this level; default five years.
            InstitutionAccreditation::Accredited => ("Full", Some(current_year + 5)),
            InstitutionAccreditation::NotAccredited => ("Denied", None),
        };

        let mut touched = false;
        for program in &institution.programs {
            if program.accreditation_status.is_some() {
                continue;
            }
            let before = program.clone();
            let mut after = before.clone();
            after.accreditation_status = Some(status.to_string());
            after.accreditation_maturity_year = maturity_year;
            after.accreditation_last_updated = Some(options.now);
            after.active = status != "Denied";

            match store.update_program(after.clone()) {
                Ok(()) => {
                    summary.programs_updated += 1;
                    touched = true;
                    audit.record(AuditEvent {
                        entity_type: AuditEntityType::Program,
                        entity_id: after.id.clone(),
                        action: AuditAction::Update,
                        before_value: serde_json::to_value(&before).ok(),
                        after_value: serde_json::to_value(&after).ok(),
                        actor_id: options.actor_id.clone(),
                        timestamp: options.now,
                    });
                }
                Err(e) => summary
                    .errors
                    .push(format!("{} - {}: {}", institution.name, program.name, e)),
            }
        }
        if touched {
            summary.institutions += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{JsonCatalog, MemoryAuditLog};
    use crate::models::{Institution, InstitutionType, Ownership};

    fn institution(id: &str, name: &str, kind: InstitutionType, programs: Vec<Program>) -> Institution {
        Institution {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            ownership: Ownership::Federal,
            state: "Lagos".to_string(),
            city: None,
            accreditation: None,
            active: true,
            programs,
        }
    }

    fn program(id: &str, institution_id: &str, name: &str) -> Program {
        Program {
            id: id.to_string(),
            institution_id: institution_id.to_string(),
            name: name.to_string(),
            faculty: None,
            accreditation_status: None,
            accreditation_maturity_year: None,
            accreditation_last_updated: Some(Utc::now()),
            active: true,
            data_quality_score: 70,
            missing_fields: vec![],
            cutoff_history: vec![],
        }
    }

    fn record(institution: &str, program: &str, status: &str, year: i32) -> ExternalAccreditationRecord {
        ExternalAccreditationRecord {
            institution: institution.to_string(),
            program: program.to_string(),
            status: status.to_string(),
            maturity_year: Some(year),
            faculty: None,
        }
    }

    fn run(
        catalog: &mut JsonCatalog,
        records: &[ExternalAccreditationRecord],
    ) -> (ReconciliationSummary, MemoryAuditLog) {
        let mut audit = MemoryAuditLog::default();
        let mut reconciler = Reconciler::new(catalog, &mut audit, ReconcileOptions::default());
        let summary = reconciler.run(records).unwrap();
        (summary, audit)
    }

    #[test]
    fn fuzzy_high_match_renames_and_updates() {
        // Dataset says "Computer Sciences"; the catalog holds "Computer
        // Science" (similarity ~0.94), with a typo in the institution name.
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Computer Science")],
        )]);

        let (summary, audit) = run(
            &mut catalog,
            &[record("University of Lago", "Computer Sciences", "Full", 2026)],
        );

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.renamed, 1);
        assert_eq!(summary.created, 0);

        let updated = catalog.get_program("p1").unwrap();
        assert_eq!(updated.name, "Computer Sciences");
        assert_eq!(updated.accreditation_status.as_deref(), Some("Full"));
        assert_eq!(updated.accreditation_maturity_year, Some(2026));
        assert!(updated.active);
        assert_eq!(audit.events.len(), 1);
        assert!(audit.events[0].before_value.is_some());
        assert!(audit.events[0].after_value.is_some());
    }

    #[test]
    fn fuzzy_low_match_updates_without_rename() {
        // 10 chars vs distance 1 => similarity 0.90, inside (0.75, 0.90].
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "abcdefghij")],
        )]);

        let (summary, _) = run(
            &mut catalog,
            &[record("University of Lagos", "abcdefghix", "Interim", 2025)],
        );

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.renamed, 0);
        let updated = catalog.get_program("p1").unwrap();
        assert_eq!(updated.name, "abcdefghij");
        assert_eq!(updated.accreditation_status.as_deref(), Some("Interim"));
    }

    #[test]
    fn unmatched_program_with_existing_programs_is_created() {
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Mechanical Engineering")],
        )]);

        let (summary, audit) = run(
            &mut catalog,
            &[record("University of Lagos", "Computer Sciences", "Full", 2026)],
        );

        assert_eq!(summary.created, 1);
        assert_eq!(summary.matched, 0);
        let institutions = catalog.institutions();
        assert_eq!(institutions[0].programs.len(), 2);
        let created = &institutions[0].programs[1];
        assert_eq!(created.name, "Computer Sciences");
        assert_eq!(created.data_quality_score, 70);
        assert!(created.missing_fields.contains(&"description".to_string()));
        assert_eq!(audit.events[0].action, AuditAction::Create);
        assert!(audit.events[0].before_value.is_none());
    }

    #[test]
    fn institution_with_no_programs_is_unmatched_not_created() {
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![],
        )]);

        let (summary, _) = run(
            &mut catalog,
            &[record("University of Lagos", "Computer Sciences", "Full", 2026)],
        );

        assert_eq!(summary.created, 0);
        assert_eq!(summary.unmatched.len(), 1);
        assert_eq!(
            summary.unmatched[0].reason,
            "program not found and institution has no programs"
        );
    }

    #[test]
    fn unknown_institution_is_unmatched() {
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Law")],
        )]);

        let (summary, _) = run(
            &mut catalog,
            &[record("Totally Different Institution", "Law", "Full", 2026)],
        );

        assert_eq!(summary.unmatched.len(), 1);
        assert_eq!(summary.unmatched[0].reason, "institution not found");
    }

    #[test]
    fn missing_names_are_record_level_errors_and_do_not_abort() {
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Law")],
        )]);

        let (summary, _) = run(
            &mut catalog,
            &[
                record("", "Law", "Full", 2026),
                record("University of Lagos", "Law", "Full", 2026),
            ],
        );

        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.matched, 1);
    }

    #[test]
    fn empty_dataset_aborts_before_processing() {
        let mut catalog = JsonCatalog::new(vec![]);
        let mut audit = MemoryAuditLog::default();
        let mut reconciler = Reconciler::new(&mut catalog, &mut audit, ReconcileOptions::default());
        assert!(matches!(reconciler.run(&[]), Err(ReconcileError::EmptyDataset)));
    }

    #[test]
    fn duplicate_rows_in_one_run_create_only_one_program() {
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Mechanical Engineering")],
        )]);

        let (summary, _) = run(
            &mut catalog,
            &[
                record("University of Lagos", "Computer Sciences", "Full", 2026),
                record("University of Lagos", "Computer Sciences", "Full", 2026),
            ],
        );

        // Second row matches the program created by the first.
        assert_eq!(summary.created, 1);
        assert_eq!(summary.matched, 1);
        assert_eq!(catalog.institutions()[0].programs.len(), 2);
    }

    #[test]
    fn rerun_on_stable_data_is_idempotent() {
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Mechanical Engineering")],
        )]);
        let records = vec![record("University of Lagos", "Computer Sciences", "Full", 2026)];

        let (first, _) = run(&mut catalog, &records);
        assert_eq!(first.created, 1);

        let (second, _) = run(&mut catalog, &records);
        assert_eq!(second.created, 0);
        assert_eq!(second.renamed, 0);
        assert_eq!(second.matched, 1);
        assert_eq!(second.matched, second.updated);
    }

    #[test]
    fn stale_unseen_program_is_discontinued() {
        let mut stale = program("p2", "inst-1", "Ancient Studies");
        stale.accreditation_last_updated = Some(Utc::now() - Duration::days(400));
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Law"), stale],
        )]);

        let (summary, _) = run(&mut catalog, &[record("University of Lagos", "Law", "Full", 2026)]);

        assert_eq!(summary.discontinued, 1);
        assert!(!catalog.get_program("p2").unwrap().active);
        // The matched program stays active.
        assert!(catalog.get_program("p1").unwrap().active);
    }

    #[test]
    fn recently_updated_unseen_program_survives_the_scan() {
        let mut fresh = program("p2", "inst-1", "Ancient Studies");
        fresh.accreditation_last_updated = Some(Utc::now() - Duration::days(30));
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Law"), fresh],
        )]);

        let (summary, _) = run(&mut catalog, &[record("University of Lagos", "Law", "Full", 2026)]);

        assert_eq!(summary.discontinued, 0);
        assert!(catalog.get_program("p2").unwrap().active);
    }

    #[test]
    fn program_with_no_update_timestamp_is_discontinued_when_unseen() {
        let mut untracked = program("p2", "inst-1", "Ancient Studies");
        untracked.accreditation_last_updated = None;
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Law"), untracked],
        )]);

        let (summary, _) = run(&mut catalog, &[record("University of Lagos", "Law", "Full", 2026)]);
        assert_eq!(summary.discontinued, 1);
    }

    #[test]
    fn rematch_reactivates_a_discontinued_program() {
        let mut inactive = program("p1", "inst-1", "Law");
        inactive.active = false;
        let mut catalog = JsonCatalog::new(vec![institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![inactive],
        )]);

        let (summary, _) = run(&mut catalog, &[record("University of Lagos", "Law", "Full", 2026)]);
        assert_eq!(summary.matched, 1);
        assert!(catalog.get_program("p1").unwrap().active);
    }

    #[test]
    fn propagation_fills_only_programs_without_status() {
        let mut with_status = program("p1", "inst-1", "Accountancy");
        with_status.accreditation_status = Some("Interim".to_string());
        let without_status = program("p2", "inst-1", "Marketing");

        let mut inst = institution(
            "inst-1",
            "Federal Polytechnic Ilaro",
            InstitutionType::Polytechnic,
            vec![with_status, without_status],
        );
        inst.accreditation = Some(InstitutionAccreditation::Accredited);
        let mut catalog = JsonCatalog::new(vec![inst]);
        let mut audit = MemoryAuditLog::default();

        let summary = propagate_institution_accreditation(
            &mut catalog,
            &mut audit,
            &ReconcileOptions::default(),
        );

        assert_eq!(summary.institutions, 1);
        assert_eq!(summary.programs_updated, 1);
        assert_eq!(
            catalog.get_program("p2").unwrap().accreditation_status.as_deref(),
            Some("Full")
        );
        assert_eq!(
            catalog.get_program("p1").unwrap().accreditation_status.as_deref(),
            Some("Interim")
        );
    }

    #[test]
    fn propagation_of_not_accredited_denies_and_deactivates() {
        let mut inst = institution(
            "inst-1",
            "College of Education Akwanga",
            InstitutionType::College,
            vec![program("p1", "inst-1", "Primary Education")],
        );
        inst.accreditation = Some(InstitutionAccreditation::NotAccredited);
        let mut catalog = JsonCatalog::new(vec![inst]);
        let mut audit = MemoryAuditLog::default();

        propagate_institution_accreditation(&mut catalog, &mut audit, &ReconcileOptions::default());

        let p = catalog.get_program("p1").unwrap();
        assert_eq!(p.accreditation_status.as_deref(), Some("Denied"));
        assert!(!p.active);
    }

    #[test]
    fn university_programs_are_not_touched_by_propagation() {
        let mut inst = institution(
            "inst-1",
            "University of Lagos",
            InstitutionType::University,
            vec![program("p1", "inst-1", "Law")],
        );
        inst.accreditation = Some(InstitutionAccreditation::Accredited);
        let mut catalog = JsonCatalog::new(vec![inst]);
        let mut audit = MemoryAuditLog::default();

        let summary = propagate_institution_accreditation(
            &mut catalog,
            &mut audit,
            &ReconcileOptions::default(),
        );
        assert_eq!(summary.programs_updated, 0);
        assert_eq!(catalog.get_program("p1").unwrap().accreditation_status, None);
    }
}
