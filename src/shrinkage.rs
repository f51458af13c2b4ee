//! Empirical-Bayes shrinkage of small-sample error rates toward a group prior.
//!
//! `shrunk = (n * raw + w * prior) / (n + w)`: with no evaluations the prior is
//! returned as-is, and the estimate converges to the raw rate as `n` grows.

use crate::config::ShrinkageConfig;
use crate::models::{Confidence, RateEstimate};

pub fn shrink(raw_rate: f64, sample_size: u32, prior_rate: f64, prior_weight: f64) -> f64 {
    if sample_size == 0 {
        return prior_rate;
    }
    let n = sample_size as f64;
    let shrunk = (n * raw_rate + prior_weight * prior_rate) / (n + prior_weight);
    // Rounding can push the result a hair outside the interpolation interval.
    let (low, high) = if raw_rate <= prior_rate {
        (raw_rate, prior_rate)
    } else {
        (prior_rate, raw_rate)
    };
    shrunk.clamp(low, high)
}

pub fn confidence(sample_size: u32, config: &ShrinkageConfig) -> Confidence {
    if sample_size >= config.high_min_evaluations {
        Confidence::High
    } else if sample_size >= config.moderate_min_evaluations {
        Confidence::Moderate
    } else {
        Confidence::Low
    }
}

pub fn estimate(
    raw_rate: f64,
    sample_size: u32,
    prior_rate: f64,
    prior_weight: f64,
    config: &ShrinkageConfig,
) -> RateEstimate {
    RateEstimate {
        raw: raw_rate,
        shrunk: shrink(raw_rate, sample_size, prior_rate, prior_weight),
        prior: prior_rate,
        sample_size,
        confidence: confidence(sample_size, config),
    }
}
