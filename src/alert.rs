//! Threshold alerts with a lifecycle across periods.
//!
//! new -> continuing while the trigger stays breached -> resolving while clear
//! -> dropped on the `clear_grace_periods`-th consecutive clear period. With a
//! grace of 1 the first clear period drops the alert outright. A breach while
//! resolving re-opens the same alert.

use crate::config::{AlertConfig, EngineConfig};
use crate::models::{
    AgentPeriodAggregate, AlertSeverity, AlertStatus, AlertTrigger, CoachingAlert, RiskScore,
    RiskTier,
};
use crate::period::PeriodKey;

pub struct AlertContext<'a> {
    pub risk: &'a RiskScore,
    pub aggregate: &'a AgentPeriodAggregate,
    /// Combined shrunk rate of the previous period, when it had data.
    pub previous_combined: Option<f64>,
}

impl AlertContext<'_> {
    fn period(&self) -> PeriodKey {
        self.risk.period
    }
}

struct Reading {
    breached: bool,
    observed: f64,
    threshold: f64,
    severity: AlertSeverity,
    reason: String,
}

/// Evaluates one trigger against its prior alert, if any.
pub fn evaluate(
    ctx: &AlertContext<'_>,
    trigger: AlertTrigger,
    prior: Option<&CoachingAlert>,
    config: &EngineConfig,
) -> Option<CoachingAlert> {
    let reading = read(ctx, trigger, config);

    match (reading, prior) {
        (None, None) => None,
        // Nothing to measure this period: carry the open alert unchanged.
        (None, Some(prior)) => Some(CoachingAlert {
            period: ctx.period(),
            ..prior.clone()
        }),
        (Some(reading), None) if reading.breached => Some(open(ctx, trigger, reading, None)),
        (Some(_), None) => None,
        (Some(reading), Some(prior)) if reading.breached => {
            Some(open(ctx, trigger, reading, Some(prior)))
        }
        (Some(reading), Some(prior)) => resolve(ctx, reading, prior, &config.alerts),
    }
}

/// Evaluates every trigger; at most one alert per (agent, trigger).
pub fn evaluate_all(
    ctx: &AlertContext<'_>,
    prior: &[CoachingAlert],
    config: &EngineConfig,
) -> Vec<CoachingAlert> {
    AlertTrigger::ALL
        .iter()
        .filter_map(|trigger| {
            let previous = prior
                .iter()
                .find(|alert| alert.trigger == *trigger && alert.agent_id == ctx.risk.agent_id);
            evaluate(ctx, *trigger, previous, config)
        })
        .collect()
}

fn open(
    ctx: &AlertContext<'_>,
    trigger: AlertTrigger,
    reading: Reading,
    prior: Option<&CoachingAlert>,
) -> CoachingAlert {
    CoachingAlert {
        agent_id: ctx.risk.agent_id.clone(),
        period: ctx.period(),
        trigger,
        trigger_reason: reading.reason,
        threshold_breached: reading.threshold,
        observed: reading.observed,
        first_seen_period: prior.map_or(ctx.period(), |p| p.first_seen_period),
        status: if prior.is_some() {
            AlertStatus::Continuing
        } else {
            AlertStatus::New
        },
        severity: reading.severity,
        clear_periods: 0,
    }
}

fn resolve(
    ctx: &AlertContext<'_>,
    reading: Reading,
    prior: &CoachingAlert,
    config: &AlertConfig,
) -> Option<CoachingAlert> {
    let clear_periods = match prior.status {
        AlertStatus::Resolving => prior.clear_periods + 1,
        AlertStatus::New | AlertStatus::Continuing => 1,
    };
    if clear_periods >= config.clear_grace_periods {
        return None;
    }
    Some(CoachingAlert {
        period: ctx.period(),
        observed: reading.observed,
        status: AlertStatus::Resolving,
        severity: AlertSeverity::Warning,
        clear_periods,
        ..prior.clone()
    })
}

fn read(ctx: &AlertContext<'_>, trigger: AlertTrigger, config: &EngineConfig) -> Option<Reading> {
    let alerts = &config.alerts;
    let risk = ctx.risk;
    if !ctx.aggregate.has_data() {
        return None;
    }
    let band = risk.tenure_band?;
    let combined = config
        .risk
        .combined(risk.attitude.shrunk, risk.operational.shrunk);

    let rate_severity = |observed: f64, threshold: f64| {
        if risk.tier == RiskTier::Critical || observed > threshold * alerts.critical_multiplier {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    };

    let reading = match trigger {
        AlertTrigger::RiskTier => {
            let threshold = tier_floor(alerts.tier_trigger, config);
            Reading {
                breached: risk.tier >= alerts.tier_trigger,
                observed: risk.numeric_score,
                threshold,
                severity: if risk.tier == RiskTier::Critical {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                },
                reason: format!(
                    "risk score {:.1} is in the {} tier",
                    risk.numeric_score,
                    risk.tier.as_str()
                ),
            }
        }
        AlertTrigger::AttitudeRate => {
            let threshold = alerts.attitude_thresholds.get(band);
            let observed = risk.attitude.shrunk;
            Reading {
                breached: observed > threshold,
                observed,
                threshold,
                severity: rate_severity(observed, threshold),
                reason: format!(
                    "attitude error rate {:.1}% exceeds the {} threshold {:.1}%",
                    observed,
                    band.as_str(),
                    threshold
                ),
            }
        }
        AlertTrigger::OperationalRate => {
            let threshold = alerts.operational_thresholds.get(band);
            let observed = risk.operational.shrunk;
            Reading {
                breached: observed > threshold,
                observed,
                threshold,
                severity: rate_severity(observed, threshold),
                reason: format!(
                    "operational error rate {:.1}% exceeds the {} threshold {:.1}%",
                    observed,
                    band.as_str(),
                    threshold
                ),
            }
        }
        AlertTrigger::Deterioration => {
            // A week-over-week jump needs a minimal sample to mean anything.
            if ctx.aggregate.evaluation_count < alerts.deterioration_min_evaluations {
                return None;
            }
            let previous = ctx.previous_combined.filter(|p| *p > 0.0)?;
            let threshold = previous * (1.0 + alerts.deterioration_ratio);
            Reading {
                breached: combined >= threshold,
                observed: combined,
                threshold,
                severity: rate_severity(combined, threshold),
                reason: format!(
                    "combined error rate rose from {:.1}% to {:.1}%",
                    previous, combined
                ),
            }
        }
        AlertTrigger::StabilizationDelay => {
            let threshold = config.risk.combined_target();
            let tenure = ctx.aggregate.tenure_months.unwrap_or_default();
            Reading {
                breached: risk.stabilization_delayed,
                observed: combined,
                threshold,
                severity: rate_severity(combined, threshold),
                reason: format!(
                    "new hire at {:.1} months still at {:.1}% against a {:.1}% target",
                    tenure, combined, threshold
                ),
            }
        }
    };

    Some(reading)
}

fn tier_floor(tier: RiskTier, config: &EngineConfig) -> f64 {
    let cuts = &config.risk.tier_cut_points;
    match tier {
        RiskTier::Safe => 0.0,
        RiskTier::Watch => cuts.watch,
        RiskTier::Risk => cuts.risk,
        RiskTier::Critical => cuts.critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, DataStatus, RateEstimate, TenureBand, Trend};
    use chrono::{Duration, NaiveDate};

    fn week(offset: i64) -> PeriodKey {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(7 * offset);
        PeriodKey::new(start, start + Duration::days(6)).unwrap()
    }

    fn estimate(shrunk: f64) -> RateEstimate {
        RateEstimate {
            raw: shrunk,
            shrunk,
            prior: 3.0,
            sample_size: 12,
            confidence: Confidence::Moderate,
        }
    }

    fn scored(period: PeriodKey, attitude: f64, operational: f64, tier: RiskTier) -> (RiskScore, AgentPeriodAggregate) {
        let risk = RiskScore {
            agent_id: "a-1".to_string(),
            period,
            attitude: estimate(attitude),
            operational: estimate(operational),
            trend: Trend::insufficient(1),
            tenure_band: Some(TenureBand::Veteran),
            stabilization_delayed: false,
            numeric_score: 30.0,
            tier,
            data_status: DataStatus::Scored,
        };
        let mut aggregate = AgentPeriodAggregate::empty("a-1", period);
        aggregate.evaluation_count = 12;
        aggregate.tenure_months = Some(30.0);
        (risk, aggregate)
    }

    fn run(
        period: PeriodKey,
        attitude: f64,
        prior: Option<&CoachingAlert>,
        config: &EngineConfig,
    ) -> Option<CoachingAlert> {
        let (risk, aggregate) = scored(period, attitude, 2.0, RiskTier::Safe);
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &aggregate,
            previous_combined: None,
        };
        evaluate(&ctx, AlertTrigger::AttitudeRate, prior, config)
    }

    #[test]
    fn alert_lifecycle_runs_new_continuing_resolving_cleared() {
        let config = EngineConfig::default();

        let first = run(week(0), 5.0, None, &config).unwrap();
        assert_eq!(first.status, AlertStatus::New);
        assert_eq!(first.threshold_breached, 3.3);

        let second = run(week(1), 5.5, Some(&first), &config).unwrap();
        assert_eq!(second.status, AlertStatus::Continuing);
        assert_eq!(second.first_seen_period, week(0));

        let third = run(week(2), 4.8, Some(&second), &config).unwrap();
        assert_eq!(third.status, AlertStatus::Continuing);

        let fourth = run(week(3), 2.0, Some(&third), &config).unwrap();
        assert_eq!(fourth.status, AlertStatus::Resolving);
        assert_eq!(fourth.clear_periods, 1);
        assert_eq!(fourth.first_seen_period, week(0));

        assert!(run(week(4), 2.1, Some(&fourth), &config).is_none());
    }

    #[test]
    fn breach_while_resolving_reopens_as_continuing() {
        let config = EngineConfig::default();
        let opened = run(week(0), 5.0, None, &config).unwrap();
        let resolving = run(week(1), 2.0, Some(&opened), &config).unwrap();
        let reopened = run(week(2), 6.0, Some(&resolving), &config).unwrap();
        assert_eq!(reopened.status, AlertStatus::Continuing);
        assert_eq!(reopened.clear_periods, 0);
        assert_eq!(reopened.first_seen_period, week(0));
    }

    #[test]
    fn clear_agent_without_history_gets_no_alert() {
        let config = EngineConfig::default();
        assert!(run(week(0), 2.0, None, &config).is_none());
    }

    #[test]
    fn thresholds_depend_on_tenure_band() {
        let config = EngineConfig::default();
        let (mut risk, aggregate) = scored(week(0), 5.0, 2.0, RiskTier::Safe);
        risk.tenure_band = Some(TenureBand::NewHire);
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &aggregate,
            previous_combined: None,
        };
        assert!(evaluate(&ctx, AlertTrigger::AttitudeRate, None, &config).is_none());

        risk.tenure_band = Some(TenureBand::Veteran);
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &aggregate,
            previous_combined: None,
        };
        assert!(evaluate(&ctx, AlertTrigger::AttitudeRate, None, &config).is_some());
    }

    #[test]
    fn risk_tier_fires_even_below_rate_thresholds() {
        let config = EngineConfig::default();
        let (risk, aggregate) = scored(week(0), 2.0, 2.0, RiskTier::Risk);
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &aggregate,
            previous_combined: None,
        };
        let alerts = evaluate_all(&ctx, &[], &config);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].trigger, AlertTrigger::RiskTier);
        assert_eq!(alerts[0].threshold_breached, 60.0);
    }

    #[test]
    fn grace_period_sets_how_long_an_alert_resolves() {
        let resolving_periods = |grace: u32| {
            let mut config = EngineConfig::default();
            config.alerts.clear_grace_periods = grace;
            let mut alert = run(week(0), 5.0, None, &config);
            let mut kept = 0;
            for offset in 1..10 {
                alert = run(week(offset), 2.0, alert.as_ref(), &config);
                match &alert {
                    Some(open) => {
                        assert_eq!(open.status, AlertStatus::Resolving);
                        assert_eq!(open.clear_periods, offset as u32);
                        kept += 1;
                    }
                    None => break,
                }
            }
            kept
        };

        assert_eq!(resolving_periods(1), 0);
        assert_eq!(resolving_periods(2), 1);
        assert_eq!(resolving_periods(3), 2);
    }

    #[test]
    fn single_evaluation_still_raises_tier_alert() {
        let config = EngineConfig::default();
        let (mut risk, mut aggregate) = scored(week(1), 9.0, 9.0, RiskTier::Critical);
        risk.numeric_score = 95.0;
        aggregate.evaluation_count = 1;
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &aggregate,
            previous_combined: Some(2.0),
        };

        let alerts = evaluate_all(&ctx, &[], &config);
        let tier = alerts
            .iter()
            .find(|a| a.trigger == AlertTrigger::RiskTier)
            .unwrap();
        assert_eq!(tier.severity, AlertSeverity::Critical);
        // Too few evaluations to judge a week-over-week jump.
        assert!(alerts.iter().all(|a| a.trigger != AlertTrigger::Deterioration));
    }

    #[test]
    fn deterioration_compares_with_previous_period() {
        let config = EngineConfig::default();
        let (risk, aggregate) = scored(week(1), 3.0, 3.0, RiskTier::Safe);
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &aggregate,
            previous_combined: Some(1.8),
        };
        let alert = evaluate(&ctx, AlertTrigger::Deterioration, None, &config).unwrap();
        assert!((alert.threshold_breached - 2.7).abs() < 1e-9);
    }

    #[test]
    fn no_data_carries_open_alert_forward() {
        let config = EngineConfig::default();
        let opened = run(week(0), 5.0, None, &config).unwrap();

        let (risk, _) = scored(week(1), 0.0, 0.0, RiskTier::Safe);
        let empty = AgentPeriodAggregate::empty("a-1", week(1));
        let ctx = AlertContext {
            risk: &risk,
            aggregate: &empty,
            previous_combined: None,
        };
        let carried = evaluate(&ctx, AlertTrigger::AttitudeRate, Some(&opened), &config).unwrap();
        assert_eq!(carried.status, AlertStatus::New);
        assert_eq!(carried.period, week(1));

        assert!(evaluate_all(&ctx, &[], &config).is_empty());
    }
}
