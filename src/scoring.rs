use crate::models::{ApplicantInput, Category, CutoffEntry};
use std::collections::HashMap;

/// Highest O-level point value (A1); the scale ceiling for the aggregate.
const MAX_GRADE_POINTS: f64 = 6.0;
/// UTME is scored out of 400; composite works on a 0-100 scale.
const UTME_MAX: f64 = 400.0;
/// Logistic steepness: ten composite points either side of the cutoff spans
/// roughly the 0.27-0.73 probability band.
const LOGISTIC_SCALE: f64 = 10.0;
/// Stored cutoffs above this are on the raw UTME scale and get normalized.
const UTME_SCALE_CUTOFF: f64 = 100.0;

/// Points for a recognized O-level grade. Unrecognized grades are skipped by
/// the caller rather than counted as zero.
pub fn grade_points(grade: &str) -> Option<f64> {
    match grade.to_uppercase().as_str() {
        "A1" => Some(6.0),
        "B2" => Some(5.0),
        "B3" => Some(4.0),
        "C4" => Some(3.0),
        "C5" => Some(2.0),
        "C6" => Some(1.0),
        "D7" | "E8" | "F9" => Some(0.0),
        _ => None,
    }
}

/// Average points per recognized subject, scaled to 0-100 and rounded to two
/// decimals. An empty or all-invalid map yields 0.
pub fn convert_grades_to_points(grades: &HashMap<String, String>) -> f64 {
    let mut total = 0.0;
    let mut count = 0u32;
    for grade in grades.values() {
        if let Some(points) = grade_points(grade) {
            total += points;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let average = total / count as f64;
    round2(average / MAX_GRADE_POINTS * 100.0)
}

/// One composite score on a 0-100 scale: 60% normalized UTME, 40% O-level
/// aggregate. With a Post-UTME score the blend shifts to 50/30/20 so the
/// screening result carries real weight without dominating.
pub fn composite_score(input: &ApplicantInput) -> f64 {
    let utme_norm = (input.utme_score / UTME_MAX * 100.0).clamp(0.0, 100.0);
    let olevel = convert_grades_to_points(&input.olevel_grades);

    let composite = match input.post_utme_score {
        Some(post_utme) => {
            0.5 * utme_norm + 0.3 * olevel + 0.2 * post_utme.clamp(0.0, 100.0)
        }
        None => 0.6 * utme_norm + 0.4 * olevel,
    };
    round2(composite)
}

/// Probability estimate for one program given the applicant's composite score
/// and that program's cutoff history.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub probability: Option<f64>,
    pub confidence_interval: Option<(f64, f64)>,
    /// None means the program is excluded from recommendations outright.
    pub category: Option<Category>,
    pub years_of_data: usize,
    /// Latest usable cutoff, normalized to the composite's 0-100 scale.
    pub latest_cutoff: Option<(i32, f64)>,
}

/// Map a composite score against the cutoff series. Empty or unusable history
/// degrades to a rule-based category with no probability claim; otherwise a
/// logistic curve around the latest cutoff, with an interval that widens as
/// the history thins out.
pub fn estimate(composite: f64, cutoff_history: &[CutoffEntry]) -> Estimate {
    let mut usable: Vec<&CutoffEntry> = cutoff_history
        .iter()
        .filter(|c| c.cutoff > 0.0)
        .collect();
    usable.sort_by(|a, b| b.year.cmp(&a.year));

    let Some(latest) = usable.first() else {
        return Estimate {
            probability: None,
            confidence_interval: None,
            category: Some(rule_based_category(composite)),
            years_of_data: 0,
            latest_cutoff: None,
        };
    };

    let cutoff_norm = normalize_cutoff(latest.cutoff);
    let difference = composite - cutoff_norm;
    let probability = (1.0 / (1.0 + (-difference / LOGISTIC_SCALE).exp())).clamp(0.0, 1.0);

    let margin = 0.10 + 0.15 / usable.len() as f64;
    let interval = (
        (probability - margin).max(0.0),
        (probability + margin).min(1.0),
    );

    Estimate {
        // Categorization happens on the raw probability so the 0.30 floor
        // is exact; rounding is display-only.
        probability: Some(probability),
        confidence_interval: Some(interval),
        category: categorize(probability),
        years_of_data: usable.len(),
        latest_cutoff: Some((latest.year, cutoff_norm)),
    }
}

/// Category from probability. Below 0.30 is not "reach", it is exclusion.
pub fn categorize(probability: f64) -> Option<Category> {
    if probability >= 0.70 {
        Some(Category::Safe)
    } else if probability >= 0.40 {
        Some(Category::Target)
    } else if probability >= 0.30 {
        Some(Category::Reach)
    } else {
        None
    }
}

/// Cutoffs recorded on the raw UTME scale (0-400) are brought onto the
/// composite's 0-100 scale; values at or below 100 are taken as-is.
fn normalize_cutoff(cutoff: f64) -> f64 {
    if cutoff > UTME_SCALE_CUTOFF {
        cutoff / UTME_MAX * 100.0
    } else {
        cutoff
    }
}

fn rule_based_category(composite: f64) -> Category {
    if composite >= 60.0 {
        Category::Safe
    } else if composite >= 50.0 {
        Category::Target
    } else {
        Category::Reach
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
