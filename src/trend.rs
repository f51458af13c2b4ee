use crate::config::{RampConfig, TrendConfig};
use crate::models::{Trend, TrendDirection};
use crate::period::PeriodKey;
use crate::stats::weighted_fit;

/// Classifies the latest period against the mean of the periods before it.
///
/// The series is keyed by period and may arrive in any order. Fewer than two
/// periods yields `InsufficientData`, never `Stable`. The decayed weighted
/// slope and its t-test p-value ride along without changing the direction.
pub fn detect_trend(series: &[(PeriodKey, f64)], config: &TrendConfig) -> Trend {
    if series.len() < 2 {
        return Trend::insufficient(series.len());
    }

    let mut ordered = series.to_vec();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    let values: Vec<f64> = ordered.iter().map(|(_, rate)| *rate).collect();

    let (history, latest) = values.split_at(values.len() - 1);
    let recent = latest[0];
    let window = config.baseline_periods.max(1);
    let used = history.len().min(window);
    let baseline_values = &history[history.len() - used..];
    let baseline = baseline_values.iter().sum::<f64>() / used as f64;

    let direction = if recent < baseline - config.epsilon {
        TrendDirection::Improving
    } else if recent > baseline + config.epsilon {
        TrendDirection::Worsening
    } else {
        TrendDirection::Stable
    };

    // Newest point weighted 1, each older one by another decay factor.
    let n = values.len();
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let weights: Vec<f64> = (0..n)
        .map(|i| config.decay_factor.powi((n - 1 - i) as i32))
        .collect();
    let fit = weighted_fit(&xs, &values, &weights);

    Trend {
        direction,
        confidence: used as f64 / window as f64,
        recent: Some(recent),
        baseline: Some(baseline),
        slope: Some(fit.slope),
        p_value: Some(fit.p_value),
        is_significant: fit.p_value < config.significance_level,
        periods: n,
    }
}

/// Folds per-domain trends into the single trend used for scoring.
pub fn combine(attitude: &Trend, operational: &Trend) -> Trend {
    use TrendDirection::*;

    let direction = match (attitude.direction, operational.direction) {
        (Worsening, _) | (_, Worsening) => Worsening,
        (InsufficientData, InsufficientData) => InsufficientData,
        (Improving, Improving | Stable | InsufficientData)
        | (Stable | InsufficientData, Improving) => Improving,
        _ => Stable,
    };

    if direction == InsufficientData {
        return Trend::insufficient(attitude.periods.max(operational.periods));
    }

    let confidence = match (attitude.direction, operational.direction) {
        (InsufficientData, _) => operational.confidence,
        (_, InsufficientData) => attitude.confidence,
        _ => attitude.confidence.min(operational.confidence),
    };

    let mean = |a: Option<f64>, b: Option<f64>| match (a, b) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (a, b) => a.or(b),
    };

    Trend {
        direction,
        confidence,
        recent: mean(attitude.recent, operational.recent),
        baseline: mean(attitude.baseline, operational.baseline),
        slope: mean(attitude.slope, operational.slope),
        p_value: match (attitude.p_value, operational.p_value) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        },
        is_significant: attitude.is_significant || operational.is_significant,
        periods: attitude.periods.max(operational.periods),
    }
}

/// True when a new hire inside the ramp window sits further above target than
/// a linear ramp from `ramp.start_rate` down to `target_rate` allows.
///
/// Tenured agents past the ramp window are never flagged here; their
/// underperformance is a tier/threshold concern instead.
pub fn is_stabilization_delayed(
    tenure_months: f64,
    current_rate: f64,
    expected_ramp_months: f64,
    target_rate: f64,
    ramp: &RampConfig,
) -> bool {
    if tenure_months > expected_ramp_months || expected_ramp_months <= 0.0 {
        return false;
    }
    let progress = (tenure_months / expected_ramp_months).clamp(0.0, 1.0);
    let allowed_excess = ((ramp.start_rate - target_rate) * (1.0 - progress)).max(0.0);
    let excess = current_rate - target_rate;
    excess > allowed_excess + ramp.margin
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(rates: &[f64]) -> Vec<(PeriodKey, f64)> {
        let first = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        rates
            .iter()
            .enumerate()
            .map(|(i, rate)| {
                let start = first + Duration::days(7 * i as i64);
                let period = PeriodKey::new(start, start + Duration::days(6)).unwrap();
                (period, *rate)
            })
            .collect()
    }

    #[test]
    fn fewer_than_two_periods_is_insufficient() {
        let config = TrendConfig::default();
        assert_eq!(
            detect_trend(&[], &config).direction,
            TrendDirection::InsufficientData
        );
        assert_eq!(
            detect_trend(&series(&[4.0]), &config).direction,
            TrendDirection::InsufficientData
        );
    }

    #[test]
    fn classifies_against_rolling_baseline() {
        let config = TrendConfig::default();
        let worsening = detect_trend(&series(&[3.0, 3.2, 2.8, 4.5]), &config);
        assert_eq!(worsening.direction, TrendDirection::Worsening);
        assert!((worsening.baseline.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(worsening.confidence, 1.0);

        let improving = detect_trend(&series(&[6.0, 5.0, 2.0]), &config);
        assert_eq!(improving.direction, TrendDirection::Improving);
        assert!(improving.slope.unwrap() < 0.0);
    }

    #[test]
    fn baseline_only_uses_last_window_periods() {
        let config = TrendConfig::default();
        // The 20.0 outlier falls outside the three-period window.
        let trend = detect_trend(&series(&[20.0, 3.0, 3.0, 3.0, 3.2]), &config);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn small_changes_inside_epsilon_are_stable() {
        let config = TrendConfig::default();
        let trend = detect_trend(&series(&[3.0, 3.4]), &config);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert!((trend.confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unordered_input_is_sorted_by_period() {
        let config = TrendConfig::default();
        let mut points = series(&[3.0, 3.0, 6.0]);
        points.reverse();
        assert_eq!(
            detect_trend(&points, &config).direction,
            TrendDirection::Worsening
        );
    }

    #[test]
    fn steady_climb_is_significant() {
        let config = TrendConfig::default();
        let trend = detect_trend(&series(&[2.0, 3.0, 4.1, 5.0, 6.0]), &config);
        assert!(trend.slope.unwrap() > 0.9);
        assert!(trend.p_value.unwrap() < 0.01);
        assert!(trend.is_significant);
    }

    #[test]
    fn noise_is_not_significant_and_does_not_decide_direction() {
        let config = TrendConfig::default();
        let flat = detect_trend(&series(&[3.0, 3.3, 2.9, 3.1, 3.0]), &config);
        assert!(flat.p_value.unwrap() > 0.5);
        assert!(!flat.is_significant);

        // Baseline rule says worsening even though the slope is not significant.
        let jump = detect_trend(&series(&[3.0, 3.2, 2.8, 4.5]), &config);
        assert_eq!(jump.direction, TrendDirection::Worsening);
        assert!(!jump.is_significant);

        let two = detect_trend(&series(&[2.0, 6.0]), &config);
        assert_eq!(two.p_value, Some(1.0));
    }

    #[test]
    fn combined_trend_prefers_worsening() {
        let config = TrendConfig::default();
        let improving = detect_trend(&series(&[6.0, 2.0]), &config);
        let worsening = detect_trend(&series(&[2.0, 6.0]), &config);
        let none = Trend::insufficient(1);

        assert_eq!(
            combine(&improving, &worsening).direction,
            TrendDirection::Worsening
        );
        assert_eq!(
            combine(&improving, &none).direction,
            TrendDirection::Improving
        );
        assert_eq!(
            combine(&none, &none).direction,
            TrendDirection::InsufficientData
        );
    }

    #[test]
    fn new_hire_above_ramp_is_delayed() {
        let ramp = RampConfig::default();
        // Two months into a three month ramp the allowance is (9.0 - 3.6) / 3.
        assert!(is_stabilization_delayed(2.0, 7.0, 3.0, 3.6, &ramp));
        assert!(!is_stabilization_delayed(2.0, 4.0, 3.0, 3.6, &ramp));
    }

    #[test]
    fn early_high_rates_are_expected() {
        let ramp = RampConfig::default();
        assert!(!is_stabilization_delayed(0.5, 8.0, 3.0, 3.6, &ramp));
    }

    #[test]
    fn tenured_agents_are_never_delayed() {
        let ramp = RampConfig::default();
        assert!(!is_stabilization_delayed(18.0, 12.0, 3.0, 3.6, &ramp));
    }
}
