use crate::config::RiskConfig;
use crate::models::{
    DataStatus, RateEstimate, RiskScore, RiskTier, TenureBand, Trend, TrendDirection,
    WeaknessAssessment,
};
use crate::period::PeriodKey;
use crate::weakness::{top_domain_errors, top_share};

#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub attitude_shrunk: f64,
    pub operational_shrunk: f64,
    pub trend: TrendDirection,
    pub tenure_band: TenureBand,
    pub top_weakness_share: f64,
    /// Categorized errors in the top weakness's domain.
    pub top_domain_errors: u32,
}

/// Composite 0..=100 score and its tier.
///
/// base = weighted domain points, each `shrunk / target * points_at_target`
/// capped at 100, scaled by the tenure multiplier; then the trend adjustment
/// and the concentration penalty are added.
pub fn score(inputs: &RiskInputs, config: &RiskConfig) -> (f64, RiskTier) {
    let attitude = domain_points(inputs.attitude_shrunk, config.attitude_target, config);
    let operational = domain_points(inputs.operational_shrunk, config.operational_target, config);
    let base = config.combined(attitude, operational)
        * config.tenure_multipliers.get(inputs.tenure_band);

    let trend = match inputs.trend {
        TrendDirection::Worsening => config.worsening_penalty,
        TrendDirection::Improving => -config.improving_credit,
        TrendDirection::Stable | TrendDirection::InsufficientData => 0.0,
    };

    let numeric = (base + trend + concentration(inputs, config)).clamp(0.0, 100.0);
    (numeric, config.tier_cut_points.tier_for(numeric))
}

fn domain_points(shrunk: f64, target: f64, config: &RiskConfig) -> f64 {
    (shrunk / target * config.points_at_target).clamp(0.0, 100.0)
}

/// Penalty for one category dominating its domain. A handful of errors cannot
/// dominate anything, so shares backed by fewer than
/// `concentration_min_errors` errors add nothing.
fn concentration(inputs: &RiskInputs, config: &RiskConfig) -> f64 {
    let share = inputs.top_weakness_share;
    if inputs.top_domain_errors < config.concentration_min_errors
        || share <= config.concentration_threshold
        || config.concentration_threshold >= 1.0
    {
        return 0.0;
    }
    let excess = (share - config.concentration_threshold) / (1.0 - config.concentration_threshold);
    config.concentration_penalty * excess.min(1.0)
}

#[allow(clippy::too_many_arguments)]
pub fn build_risk_score(
    agent_id: &str,
    period: PeriodKey,
    attitude: RateEstimate,
    operational: RateEstimate,
    trend: Trend,
    tenure_band: TenureBand,
    stabilization_delayed: bool,
    weaknesses: &[WeaknessAssessment],
    config: &RiskConfig,
) -> RiskScore {
    let inputs = RiskInputs {
        attitude_shrunk: attitude.shrunk,
        operational_shrunk: operational.shrunk,
        trend: trend.direction,
        tenure_band,
        top_weakness_share: top_share(weaknesses),
        top_domain_errors: top_domain_errors(weaknesses),
    };
    let (numeric_score, tier) = score(&inputs, config);

    RiskScore {
        agent_id: agent_id.to_string(),
        period,
        attitude,
        operational,
        trend,
        tenure_band: Some(tenure_band),
        stabilization_delayed,
        numeric_score,
        tier,
        data_status: DataStatus::Scored,
    }
}

/// Score for a period without evaluations: safe, zero, and marked as no-data.
pub fn no_data_score(
    agent_id: &str,
    period: PeriodKey,
    attitude: RateEstimate,
    operational: RateEstimate,
    trend: Trend,
) -> RiskScore {
    RiskScore {
        agent_id: agent_id.to_string(),
        period,
        attitude,
        operational,
        trend,
        tenure_band: None,
        stabilization_delayed: false,
        numeric_score: 0.0,
        tier: RiskTier::Safe,
        data_status: DataStatus::NoData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(attitude: f64, operational: f64) -> RiskInputs {
        RiskInputs {
            attitude_shrunk: attitude,
            operational_shrunk: operational,
            trend: TrendDirection::Stable,
            tenure_band: TenureBand::Intermediate,
            top_weakness_share: 0.0,
            top_domain_errors: 0,
        }
    }

    #[test]
    fn tiers_follow_cut_points() {
        let config = RiskConfig::default();
        let cuts = &config.tier_cut_points;
        assert_eq!(cuts.tier_for(0.0), RiskTier::Safe);
        assert_eq!(cuts.tier_for(39.9), RiskTier::Safe);
        assert_eq!(cuts.tier_for(40.0), RiskTier::Watch);
        assert_eq!(cuts.tier_for(60.0), RiskTier::Risk);
        assert_eq!(cuts.tier_for(80.0), RiskTier::Critical);
        assert_eq!(cuts.tier_for(100.0), RiskTier::Critical);
    }

    #[test]
    fn on_target_agent_is_safe() {
        let config = RiskConfig::default();
        let (score, tier) = score(&inputs(3.3, 3.9), &config);
        assert!((score - 35.0).abs() < 1e-9);
        assert_eq!(tier, RiskTier::Safe);
    }

    #[test]
    fn higher_rates_never_lower_the_score() {
        let config = RiskConfig::default();
        let mut previous = -1.0;
        for step in 0..40 {
            let rate = step as f64 * 0.5;
            let (score, _) = score(&inputs(rate, rate), &config);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn trend_adjusts_score() {
        let config = RiskConfig::default();
        let (stable, _) = score(&inputs(5.0, 5.0), &config);

        let mut worsening = inputs(5.0, 5.0);
        worsening.trend = TrendDirection::Worsening;
        let mut improving = inputs(5.0, 5.0);
        improving.trend = TrendDirection::Improving;

        assert!((score(&worsening, &config).0 - stable - 10.0).abs() < 1e-9);
        assert!((stable - score(&improving, &config).0 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn dominant_weakness_raises_urgency() {
        let config = RiskConfig::default();
        let (spread, _) = score(&inputs(5.0, 5.0), &config);

        let mut concentrated = inputs(5.0, 5.0);
        concentrated.top_weakness_share = 1.0;
        concentrated.top_domain_errors = 6;
        let (dominant, _) = score(&concentrated, &config);
        assert!((dominant - spread - 10.0).abs() < 1e-9);

        concentrated.top_weakness_share = 0.5;
        assert_eq!(score(&concentrated, &config).0, spread);
    }

    #[test]
    fn a_lone_error_does_not_count_as_dominating() {
        let config = RiskConfig::default();
        let (spread, _) = score(&inputs(5.0, 5.0), &config);

        let mut single = inputs(5.0, 5.0);
        single.top_weakness_share = 1.0;
        single.top_domain_errors = 1;
        assert_eq!(score(&single, &config).0, spread);

        single.top_domain_errors = config.concentration_min_errors;
        assert!(score(&single, &config).0 > spread);
    }

    #[test]
    fn new_hires_are_amplified() {
        let config = RiskConfig::default();
        let (baseline, _) = score(&inputs(5.0, 5.0), &config);
        let mut new_hire = inputs(5.0, 5.0);
        new_hire.tenure_band = TenureBand::NewHire;
        assert!((score(&new_hire, &config).0 - baseline * 1.2).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped() {
        let config = RiskConfig::default();
        let mut extreme = inputs(90.0, 90.0);
        extreme.trend = TrendDirection::Worsening;
        extreme.top_weakness_share = 1.0;
        extreme.top_domain_errors = 20;
        let (score, tier) = score(&extreme, &config);
        assert_eq!(score, 100.0);
        assert_eq!(tier, RiskTier::Critical);
    }
}
