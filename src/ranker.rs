use crate::models::{
    ApplicantInput, Category, EligibilityResult, Institution, InstitutionAccreditation, Program,
    RecommendationMeta,
};
use crate::scoring::{self, Estimate};
use crate::trend::{self, TrendDirection};
use std::cmp::Ordering;

const PRIORITY_FULL: i32 = 10;
const PRIORITY_INTERIM: i32 = 5;
const PENALTY_EXPIRED: i32 = -5;
const PENALTY_EXPIRING_SOON: i32 = -2;
/// Maturity years within this many years of now draw the expiring-soon penalty.
const EXPIRY_HORIZON_YEARS: i32 = 2;

#[derive(Debug, Clone, Default)]
pub struct AccreditationPriority {
    pub score: i32,
    pub warning: Option<String>,
    pub denied: bool,
}

/// Derive the accreditation priority for one program. Colleges and
/// polytechnics are accredited as institutions, so when the program carries
/// no status of its own the institution-level status stands in.
pub fn accreditation_priority(
    program: &Program,
    institution: &Institution,
    current_year: i32,
) -> AccreditationPriority {
    let effective_status = program.accreditation_status.clone().or_else(|| {
        if institution.kind.accredited_at_institution_level() {
            institution.accreditation.map(|a| match a {
                InstitutionAccreditation::Accredited => "Full".to_string(),
                InstitutionAccreditation::NotAccredited => "Denied".to_string(),
            })
        } else {
            None
        }
    });

    let mut priority = AccreditationPriority::default();
    let mut warnings: Vec<String> = Vec::new();

    match effective_status.as_deref() {
        Some("Full") => priority.score += PRIORITY_FULL,
        Some("Interim") => {
            priority.score += PRIORITY_INTERIM;
            warnings.push("Accreditation is interim and pending full approval".to_string());
        }
        Some("Denied") => {
            priority.denied = true;
            return priority;
        }
        _ => {}
    }

    if let Some(year) = program.accreditation_maturity_year {
        if year < current_year {
            priority.score += PENALTY_EXPIRED;
            warnings.push(format!("Accreditation expired in {}", year));
        } else if year <= current_year + EXPIRY_HORIZON_YEARS {
            priority.score += PENALTY_EXPIRING_SOON;
            warnings.push(format!("Accreditation expires in {}", year));
        }
    }

    if !warnings.is_empty() {
        priority.warning = Some(warnings.join("; "));
    }
    priority
}

/// Rank every active program in the catalog for one applicant. Programs with
/// denied accreditation, no usable cutoff history, or probability below 0.30
/// never appear in the output.
pub fn recommend(
    institutions: &[Institution],
    input: &ApplicantInput,
    limit: usize,
    current_year: i32,
) -> (Vec<EligibilityResult>, RecommendationMeta) {
    let composite = scoring::composite_score(input);
    let mut candidates = 0usize;
    let mut results: Vec<EligibilityResult> = Vec::new();

    for institution in institutions.iter().filter(|i| i.active) {
        for program in institution.programs.iter().filter(|p| p.active) {
            candidates += 1;

            let priority = accreditation_priority(program, institution, current_year);
            if priority.denied {
                continue;
            }

            let estimate = scoring::estimate(composite, &program.cutoff_history);
            let (Some(probability), Some(category)) = (estimate.probability, estimate.category)
            else {
                continue;
            };

            results.push(EligibilityResult {
                program_id: program.id.clone(),
                program_name: program.name.clone(),
                institution_id: institution.id.clone(),
                institution_name: institution.name.clone(),
                composite_score: composite,
                probability: Some(probability),
                confidence_interval: estimate.confidence_interval,
                category,
                priority_score: priority.score,
                accreditation_warning: priority.warning,
                rationale: rationale(composite, input, program, institution, &estimate),
            });
        }
    }

    // Stable sort keeps equal candidates in catalog order.
    results.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then_with(|| {
                b.probability
                    .partial_cmp(&a.probability)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.category.rank().cmp(&a.category.rank()))
    });
    results.truncate(limit);

    let meta = RecommendationMeta {
        composite_score: composite,
        total_candidates: candidates,
        recommended: results.len(),
    };
    (results, meta)
}

fn rationale(
    composite: f64,
    input: &ApplicantInput,
    program: &Program,
    institution: &Institution,
    estimate: &Estimate,
) -> String {
    let olevel_points = scoring::convert_grades_to_points(&input.olevel_grades);
    let mut text = format!(
        "Your composite score ({composite}) is based on a UTME score of {} and O-level points of {olevel_points}. ",
        input.utme_score
    );

    if let Some((year, cutoff)) = estimate.latest_cutoff {
        let difference = composite - cutoff;
        let side = if difference >= 0.0 { "above" } else { "below" };
        text.push_str(&format!(
            "This is {:.1} points {side} the {year} cutoff ({cutoff}) for {} at {}. ",
            difference.abs(),
            program.name,
            institution.name
        ));
    }

    if let Some(probability) = estimate.probability {
        text.push_str(&format!(
            "Based on historical data, your estimated admission probability is {:.0}%. ",
            probability * 100.0
        ));
    }

    let cutoff_trend = trend::calculate_trend(&program.cutoff_history);
    match cutoff_trend.direction {
        TrendDirection::Increasing => text.push_str(&format!(
            "The cutoff has been rising by about {:.1} points per year. ",
            cutoff_trend.rate
        )),
        TrendDirection::Decreasing => text.push_str(&format!(
            "The cutoff has been falling by about {:.1} points per year. ",
            cutoff_trend.rate
        )),
        TrendDirection::Stable => {}
    }
    if let Some(predicted) = trend::predict_next_cutoff(&program.cutoff_history) {
        text.push_str(&format!(
            "Based on current trends, next year's cutoff is projected around {:.0}. ",
            predicted
        ));
    }

    if let Some(category) = estimate.category {
        let label = match category {
            Category::Safe => "This is considered a SAFE choice.",
            Category::Target => "This is considered a TARGET choice.",
            Category::Reach => "This is considered a REACH choice.",
        };
        text.push_str(label);
    }
    text
}
