use crate::models::CutoffEntry;
use serde::Serialize;

/// Year-over-year movement below this (in points) counts as stable.
const STABLE_RATE_LIMIT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendConfidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Average absolute points of movement per year.
    pub rate: f64,
    pub confidence: TrendConfidence,
}

fn sorted_points(history: &[CutoffEntry]) -> Vec<(i32, f64)> {
    let mut points: Vec<(i32, f64)> = history
        .iter()
        .filter(|c| c.cutoff > 0.0)
        .map(|c| (c.year, c.cutoff))
        .collect();
    points.sort_by_key(|(year, _)| *year);
    points
}

/// Direction and consistency of a cutoff series. Confidence comes from the
/// coefficient of variation of the year-over-year residuals together with the
/// number of data points.
pub fn calculate_trend(history: &[CutoffEntry]) -> Trend {
    let points = sorted_points(history);
    if points.len() < 2 {
        return Trend {
            direction: TrendDirection::Stable,
            rate: 0.0,
            confidence: TrendConfidence::Low,
        };
    }

    let first = points[0].1;
    let last = points[points.len() - 1].1;
    let rate = (last - first) / (points.len() - 1) as f64;

    let direction = if rate.abs() < STABLE_RATE_LIMIT {
        TrendDirection::Stable
    } else if rate > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    let variance = points
        .windows(2)
        .map(|w| {
            let expected = w[0].1 + rate;
            (w[1].1 - expected).powi(2)
        })
        .sum::<f64>()
        / (points.len() - 1) as f64;
    let average = points.iter().map(|(_, c)| c).sum::<f64>() / points.len() as f64;
    let coefficient_of_variation = variance.sqrt() / average;

    let confidence = if coefficient_of_variation < 0.1 && points.len() >= 5 {
        TrendConfidence::High
    } else if coefficient_of_variation < 0.2 && points.len() >= 3 {
        TrendConfidence::Medium
    } else {
        TrendConfidence::Low
    };

    Trend {
        direction,
        rate: rate.abs(),
        confidence,
    }
}

/// Least-squares projection of the next year's cutoff, clamped to the UTME
/// range. Needs at least two usable points.
pub fn predict_next_cutoff(history: &[CutoffEntry]) -> Option<f64> {
    let points = sorted_points(history);
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(y, _)| *y as f64).sum();
    let sum_y: f64 = points.iter().map(|(_, c)| c).sum();
    let sum_xy: f64 = points.iter().map(|(y, c)| *y as f64 * c).sum();
    let sum_x2: f64 = points.iter().map(|(y, _)| (*y as f64).powi(2)).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let next_year = points[points.len() - 1].0 as f64 + 1.0;
    Some((slope * next_year + intercept).round().clamp(0.0, 400.0))
}
