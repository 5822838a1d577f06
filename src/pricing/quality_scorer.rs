//! Quality Scorer
//!
//! Pure, stateless mapping from raw provider telemetry to a composite
//! [0,100] quality score. No internal state, no lock — just a function plus
//! a couple of private dimension scorers, in the shape of
//! `vault::kelly::calculate_kelly_position`.

use crate::pricing::types::{QualityMetrics, RawProviderMetrics};

/// Composite weights; must sum to 1.0.
const WEIGHT_UPTIME: f64 = 0.30;
const WEIGHT_MEDIAN_LATENCY: f64 = 0.20;
const WEIGHT_ERROR_RATE: f64 = 0.20;
const WEIGHT_RATING: f64 = 0.20;
const WEIGHT_P99_LATENCY: f64 = 0.10;

/// Map raw telemetry into the composite quality score and its intermediate
/// percentages.
pub fn score_quality(raw: &RawProviderMetrics) -> QualityMetrics {
    let uptime_percent = if raw.total_minutes > 0.0 {
        100.0 * raw.uptime_minutes / raw.total_minutes
    } else {
        0.0
    };

    let total_calls = raw.success_count + raw.failure_count;
    let error_rate_percent = if total_calls > 0 {
        100.0 * raw.failure_count as f64 / total_calls as f64
    } else {
        0.0
    };

    let uptime_score = score_uptime(uptime_percent);
    let median_latency_score = score_latency(raw.median_latency_ms, 50.0, 200.0, 500.0, 1000.0);
    let p99_latency_score = score_latency(raw.p99_latency_ms, 150.0, 600.0, 1500.0, 3000.0);
    let error_rate_score = score_error_rate(error_rate_percent);
    let rating_score = score_rating(raw.average_rating, raw.rating_count);

    let composite = (WEIGHT_UPTIME * uptime_score
        + WEIGHT_MEDIAN_LATENCY * median_latency_score
        + WEIGHT_ERROR_RATE * error_rate_score
        + WEIGHT_RATING * rating_score
        + WEIGHT_P99_LATENCY * p99_latency_score)
        .clamp(0.0, 100.0)
        .round();

    QualityMetrics {
        uptime_percent,
        median_latency_ms: raw.median_latency_ms,
        p99_latency_ms: raw.p99_latency_ms,
        error_rate_percent,
        average_rating: raw.average_rating,
        rating_count: raw.rating_count,
        composite_score: composite,
    }
}

fn score_uptime(uptime_percent: f64) -> f64 {
    if uptime_percent >= 99.99 {
        100.0
    } else if uptime_percent >= 99.95 {
        97.0
    } else if uptime_percent >= 99.9 {
        95.0
    } else if uptime_percent >= 99.5 {
        80.0
    } else if uptime_percent >= 99.0 {
        60.0
    } else if uptime_percent >= 98.0 {
        30.0
    } else if uptime_percent >= 95.0 {
        10.0
    } else {
        0.0
    }
}

/// Piecewise-linear latency scorer shared by median and p99 (the latter
/// called with benchmarks scaled x3).
fn score_latency(latency_ms: f64, excellent: f64, good: f64, acceptable: f64, poor: f64) -> f64 {
    if latency_ms <= excellent {
        100.0
    } else if latency_ms <= good {
        lerp(excellent, good, 100.0, 70.0, latency_ms)
    } else if latency_ms <= acceptable {
        lerp(good, acceptable, 70.0, 40.0, latency_ms)
    } else if latency_ms <= poor {
        lerp(acceptable, poor, 40.0, 10.0, latency_ms)
    } else {
        0.0
    }
}

fn score_error_rate(error_rate_percent: f64) -> f64 {
    if error_rate_percent <= 0.0 {
        100.0
    } else if error_rate_percent < 0.1 {
        95.0
    } else if error_rate_percent < 0.5 {
        80.0
    } else if error_rate_percent < 1.0 {
        60.0
    } else if error_rate_percent < 2.0 {
        40.0
    } else if error_rate_percent < 5.0 {
        20.0
    } else {
        0.0
    }
}

/// Bayesian-adjusted rating score: pulls low-sample ratings toward a neutral
/// 3.5 prior, then maps [1,5] -> [0,100].
fn score_rating(average_rating: f64, rating_count: u64) -> f64 {
    let confidence = (1.0_f64).min((rating_count as f64).sqrt() / 50.0_f64.sqrt());
    let adjusted = average_rating * confidence + 3.5 * (1.0 - confidence);
    lerp(1.0, 5.0, 0.0, 100.0, adjusted).clamp(0.0, 100.0)
}

fn lerp(lo_x: f64, hi_x: f64, lo_y: f64, hi_y: f64, x: f64) -> f64 {
    if (hi_x - lo_x).abs() < f64::EPSILON {
        return hi_y;
    }
    lo_y + (hi_y - lo_y) * (x - lo_x) / (hi_x - lo_x)
}
