use std::sync::Arc;

use chrono::Datelike;
use tracing::debug;

use crate::aggregate::{aggregate_records, opportunity_rate};
use crate::alert::{evaluate_all, AlertContext};
use crate::coaching::prescribe;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{
    AgentPeriodAggregate, CoachingAlert, Domain, EvaluationRecord, PeriodRates, RateEstimate,
    ReportContent, Trend,
};
use crate::period::PeriodKey;
use crate::risk::{build_risk_score, no_data_score};
use crate::shrinkage::estimate;
use crate::store::{EvaluationStore, GroupTotals};
use crate::trend::{combine, detect_trend, is_stabilization_delayed};
use crate::weakness::{classify, compare_with_group, top_items};

/// Aggregated and shrunk view of a single period.
struct PeriodView {
    aggregate: AgentPeriodAggregate,
    attitude: RateEstimate,
    operational: RateEstimate,
    /// Service group totals for the period, when the group had evaluations.
    group: Option<GroupTotals>,
}

/// Runs aggregation, shrinkage, trend, weakness, risk, coaching and alerts for
/// one agent and period. Pure with respect to its inputs: the same store rows,
/// config and prior alerts always produce the same content.
pub struct Pipeline<E> {
    config: Arc<EngineConfig>,
    evaluations: Arc<E>,
}

impl<E> Clone for Pipeline<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            evaluations: Arc::clone(&self.evaluations),
        }
    }
}

impl<E: EvaluationStore> Pipeline<E> {
    pub fn new(config: Arc<EngineConfig>, evaluations: Arc<E>) -> Self {
        Self {
            config,
            evaluations,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluations(&self) -> &E {
        &self.evaluations
    }

    pub async fn aggregate(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> Result<AgentPeriodAggregate, EngineError> {
        let records = self
            .evaluations
            .query_evaluations(agent_id, period.start, period.end)
            .await
            .map_err(|e| EngineError::store(agent_id, e))?;
        Ok(aggregate_records(agent_id, period, &records, &self.config))
    }

    pub async fn run(
        &self,
        agent_id: &str,
        period: PeriodKey,
        prior_alerts: &[CoachingAlert],
    ) -> Result<ReportContent, EngineError> {
        let config = self.config.as_ref();
        let history = period.preceding(config.trend.history_periods);
        let month_start = period.start.with_day(1).unwrap_or(period.start);
        let window_start = history
            .first()
            .map_or(period.start, |p| p.start)
            .min(month_start);

        // One read covers the current period, the trend window and the month to date.
        let records = self
            .evaluations
            .query_evaluations(agent_id, window_start, period.end)
            .await
            .map_err(|e| EngineError::store(agent_id, e))?;

        let mut past = Vec::with_capacity(history.len());
        for key in &history {
            past.push(self.view(agent_id, *key, &records).await?);
        }
        let current = self.view(agent_id, period, &records).await?;

        let series = |domain: Domain| -> Vec<(PeriodKey, f64)> {
            past.iter()
                .chain(std::iter::once(&current))
                .filter(|view| view.aggregate.has_data())
                .map(|view| {
                    let estimate = match domain {
                        Domain::Attitude => &view.attitude,
                        Domain::Operational => &view.operational,
                    };
                    (view.aggregate.period, estimate.shrunk)
                })
                .collect()
        };
        // Without data this period there is no latest point to compare.
        let (attitude_trend, operational_trend) = if current.aggregate.has_data() {
            (
                detect_trend(&series(Domain::Attitude), &config.trend),
                detect_trend(&series(Domain::Operational), &config.trend),
            )
        } else {
            let periods = series(Domain::Attitude).len();
            (Trend::insufficient(periods), Trend::insufficient(periods))
        };
        let trend = combine(&attitude_trend, &operational_trend);

        let mut weaknesses = classify(&current.aggregate, config);
        if let Some(group) = &current.group {
            compare_with_group(&mut weaknesses, &current.aggregate, group, config);
        }

        let risk_score = match current.aggregate.tenure_months {
            Some(tenure) if current.aggregate.has_data() => {
                let band = config.tenure_bands.band_for(tenure);
                let combined = config
                    .risk
                    .combined(current.attitude.shrunk, current.operational.shrunk);
                let delayed = is_stabilization_delayed(
                    tenure,
                    combined,
                    config.ramp.expected_ramp_months,
                    config.risk.combined_target(),
                    &config.ramp,
                );
                build_risk_score(
                    agent_id,
                    period,
                    current.attitude.clone(),
                    current.operational.clone(),
                    trend,
                    band,
                    delayed,
                    &weaknesses,
                    &config.risk,
                )
            }
            _ => no_data_score(
                agent_id,
                period,
                current.attitude.clone(),
                current.operational.clone(),
                trend,
            ),
        };

        let prescription = prescribe(&risk_score, &weaknesses, config);

        let previous = past
            .last()
            .filter(|view| view.aggregate.period == period.previous() && view.aggregate.has_data());
        let previous_combined =
            previous.map(|view| config.risk.combined(view.attitude.shrunk, view.operational.shrunk));
        let previous_period = previous.map(|view| PeriodRates::from(&view.aggregate));

        let month = PeriodKey::new(month_start, period.end)?;
        let month_aggregate = aggregate_records(agent_id, month, &records, config);
        let month_to_date = month_aggregate
            .has_data()
            .then(|| PeriodRates::from(&month_aggregate));

        let alerts = evaluate_all(
            &AlertContext {
                risk: &risk_score,
                aggregate: &current.aggregate,
                previous_combined,
            },
            prior_alerts,
            config,
        );

        debug!(
            agent_id,
            period = %period,
            evaluations = current.aggregate.evaluation_count,
            score = risk_score.numeric_score,
            tier = risk_score.tier.as_str(),
            alerts = alerts.len(),
            "pipeline complete"
        );

        Ok(ReportContent {
            top_items: top_items(&current.aggregate, config),
            aggregate: current.aggregate,
            risk_score,
            attitude_trend,
            operational_trend,
            weaknesses,
            previous_period,
            month_to_date,
            prescription,
            alerts,
        })
    }

    async fn view(
        &self,
        agent_id: &str,
        period: PeriodKey,
        records: &[EvaluationRecord],
    ) -> Result<PeriodView, EngineError> {
        let aggregate = aggregate_records(agent_id, period, records, &self.config);
        let group = self.group(&aggregate).await?;
        let (attitude_prior, operational_prior) = self.priors(group.as_ref());
        let shrinkage = &self.config.shrinkage;

        Ok(PeriodView {
            attitude: estimate(
                aggregate.attitude_error_rate,
                aggregate.evaluation_count,
                attitude_prior,
                shrinkage.attitude_prior_weight,
                shrinkage,
            ),
            operational: estimate(
                aggregate.operational_error_rate,
                aggregate.evaluation_count,
                operational_prior,
                shrinkage.operational_prior_weight,
                shrinkage,
            ),
            aggregate,
            group,
        })
    }

    /// Totals for the agent's service group and channel, `None` when the group
    /// is unknown or had no evaluations in the period.
    async fn group(
        &self,
        aggregate: &AgentPeriodAggregate,
    ) -> Result<Option<GroupTotals>, EngineError> {
        let (Some(group), Some(channel)) = (&aggregate.service_group, &aggregate.channel) else {
            return Ok(None);
        };
        let totals = self
            .evaluations
            .group_totals(group, channel, aggregate.period)
            .await
            .map_err(|e| EngineError::store(&aggregate.agent_id, e))?;
        Ok((totals.evaluation_count > 0).then_some(totals))
    }

    /// Group mean rates, or the configured defaults without a group.
    fn priors(&self, group: Option<&GroupTotals>) -> (f64, f64) {
        let shrinkage = &self.config.shrinkage;
        match group {
            Some(totals) => (
                opportunity_rate(
                    totals.attitude_errors,
                    totals.evaluation_count,
                    self.config.items_in_domain(Domain::Attitude),
                ),
                opportunity_rate(
                    totals.operational_errors,
                    totals.evaluation_count,
                    self.config.items_in_domain(Domain::Operational),
                ),
            ),
            None => (
                shrinkage.default_attitude_prior,
                shrinkage.default_operational_prior,
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        AlertTrigger, DataStatus, EvaluationRecord, RiskTier, TenureBand, TrendDirection,
    };
    use crate::store::InMemoryStore;
    use chrono::{Duration, NaiveDate};
    use std::collections::BTreeMap;

    pub(crate) fn week(offset: i64) -> PeriodKey {
        let start = NaiveDate::from_ymd_opt(2026, 2, 12).unwrap() + Duration::weeks(offset);
        PeriodKey::new(start, start + Duration::days(6)).unwrap()
    }

    pub(crate) fn record(
        agent_id: &str,
        period: PeriodKey,
        tenure_months: f64,
        codes: &[&str],
        attitude: u32,
        operational: u32,
    ) -> EvaluationRecord {
        EvaluationRecord {
            agent_id: agent_id.to_string(),
            evaluated_on: period.start,
            tenure_months,
            service_group: "billing".to_string(),
            channel: "voice".to_string(),
            error_flags: codes.iter().map(|c| (c.to_string(), true)).collect::<BTreeMap<_, _>>(),
            attitude_error_count: attitude,
            operational_error_count: operational,
        }
    }

    fn pipeline(records: Vec<EvaluationRecord>) -> Pipeline<InMemoryStore> {
        Pipeline::new(
            Arc::new(EngineConfig::default()),
            Arc::new(InMemoryStore::with_records(records)),
        )
    }

    #[tokio::test]
    async fn aggregate_reads_only_the_requested_period() {
        let pipeline = pipeline(vec![
            record("a-1", week(-1), 6.0, &["guide_error"], 0, 1),
            record("a-1", week(0), 6.0, &["guide_error", "greeting_error"], 1, 1),
            record("a-1", week(0), 6.5, &[], 0, 0),
        ]);
        let aggregate = pipeline.aggregate("a-1", week(0)).await.unwrap();

        assert_eq!(aggregate.evaluation_count, 2);
        assert_eq!(aggregate.category_counts.get("knowledge"), Some(&1));
        assert!((aggregate.attitude_error_rate - 10.0).abs() < 1e-9);
        assert!((aggregate.operational_error_rate - 100.0 / 22.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn agent_without_evaluations_gets_no_data_report() {
        let pipeline = pipeline(vec![record("other", week(0), 30.0, &[], 0, 0)]);
        let content = pipeline.run("a-1", week(0), &[]).await.unwrap();

        assert_eq!(content.aggregate.evaluation_count, 0);
        assert_eq!(content.risk_score.data_status, DataStatus::NoData);
        assert_eq!(content.risk_score.tier, RiskTier::Safe);
        assert_eq!(content.risk_score.attitude.shrunk, 3.0);
        assert_eq!(content.risk_score.operational.shrunk, 3.5);
        assert!(content.weaknesses.is_empty());
        assert!(content.alerts.is_empty());
        assert_eq!(content.prescription.primary_weakness, None);
    }

    #[tokio::test]
    async fn clean_veteran_is_safe_and_unalerted() {
        let records = (0..10).map(|_| record("a-1", week(0), 40.0, &[], 0, 0)).collect();
        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();

        assert_eq!(content.risk_score.tenure_band, Some(TenureBand::Veteran));
        assert_eq!(content.risk_score.tier, RiskTier::Safe);
        assert_eq!(content.risk_score.attitude.raw, 0.0);
        assert!(content.alerts.is_empty());
    }

    #[tokio::test]
    async fn struggling_new_hire_is_flagged() {
        // Every evaluation misses guidance twice and skips the empathy line.
        let records = (0..12)
            .map(|_| {
                record(
                    "a-1",
                    week(0),
                    1.0,
                    &["guide_error", "wrong_guide_error", "empathy_error"],
                    1,
                    2,
                )
            })
            .collect();
        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();

        assert_eq!(content.risk_score.tenure_band, Some(TenureBand::NewHire));
        assert!(content.risk_score.stabilization_delayed);
        assert!(content.risk_score.tier >= RiskTier::Risk);
        assert_eq!(content.weaknesses[0].category_id, "knowledge");
        assert!(content
            .alerts
            .iter()
            .any(|a| a.trigger == AlertTrigger::StabilizationDelay));
        assert!(!content.prescription.recommended_actions.is_empty());
    }

    #[tokio::test]
    async fn rising_rates_across_weeks_read_as_worsening() {
        let mut records = Vec::new();
        for (offset, errors) in [(-3, 1), (-2, 1), (-1, 1), (0, 6)] {
            for _ in 0..15 {
                records.push(record("a-1", week(offset), 30.0, &["guide_error"], 0, errors));
            }
        }
        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();

        assert_eq!(content.operational_trend.direction, TrendDirection::Worsening);
        assert_eq!(content.risk_score.trend.direction, TrendDirection::Worsening);
        assert!(content
            .alerts
            .iter()
            .any(|a| a.trigger == AlertTrigger::Deterioration));
    }

    #[tokio::test]
    async fn single_evaluation_at_critical_raises_tier_alert() {
        let config = EngineConfig::default();
        let every_code: Vec<&str> = config.error_codes.iter().map(|m| m.code.as_str()).collect();
        let mut records = vec![record("a-1", week(0), 30.0, &every_code, 5, 11)];
        for peer in 0..20 {
            records.push(record(&format!("peer-{peer}"), week(0), 30.0, &[], 0, 0));
        }

        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();

        assert_eq!(content.aggregate.evaluation_count, 1);
        assert_eq!(content.risk_score.tier, RiskTier::Critical);
        let tier_alert = content
            .alerts
            .iter()
            .find(|a| a.trigger == AlertTrigger::RiskTier)
            .unwrap();
        assert_eq!(tier_alert.severity, crate::models::AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn week_without_data_has_no_trend_reading() {
        let mut records = Vec::new();
        for offset in [-3, -2, -1] {
            for _ in 0..5 {
                records.push(record("a-1", week(offset), 30.0, &["guide_error"], 0, 1));
            }
        }
        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();

        assert_eq!(content.risk_score.data_status, DataStatus::NoData);
        for trend in [&content.attitude_trend, &content.operational_trend, &content.risk_score.trend] {
            assert_eq!(trend.direction, TrendDirection::InsufficientData);
            assert_eq!(trend.recent, None);
        }
        assert_eq!(content.previous_period.unwrap().evaluation_count, 5);
    }

    #[tokio::test]
    async fn report_carries_items_previous_week_and_month_to_date() {
        let mut records = Vec::new();
        // Week -2 starts on Jan 29 and falls outside February.
        for offset in [-2, -1, 0] {
            for _ in 0..4 {
                records.push(record("a-1", week(offset), 20.0, &["guide_error", "empathy_error"], 1, 1));
            }
        }
        records.push(record("a-1", week(0), 20.0, &["guide_error"], 0, 1));

        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();

        let codes: Vec<(&str, u32)> = content
            .top_items
            .iter()
            .map(|item| (item.code.as_str(), item.count))
            .collect();
        assert_eq!(codes, vec![("guide_error", 5), ("empathy_error", 4)]);

        let previous = content.previous_period.unwrap();
        assert_eq!(previous.period, week(-1));
        assert_eq!(previous.evaluation_count, 4);
        assert!((previous.attitude_error_rate - 20.0).abs() < 1e-9);

        let month = content.month_to_date.unwrap();
        assert_eq!(month.period.start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(month.period.end, week(0).end);
        assert_eq!(month.evaluation_count, 9);
    }

    #[tokio::test]
    async fn weaknesses_are_compared_with_the_service_group() {
        let mut records: Vec<EvaluationRecord> = (0..10)
            .map(|_| record("a-1", week(0), 20.0, &["guide_error", "wrong_guide_error"], 0, 2))
            .collect();
        for peer in 0..40 {
            records.push(record(&format!("peer-{peer}"), week(0), 20.0, &[], 0, 0));
        }

        let content = pipeline(records).run("a-1", week(0), &[]).await.unwrap();
        let knowledge = content.weaknesses[0].group_comparison.clone().unwrap();
        assert_eq!(content.weaknesses[0].category_id, "knowledge");
        assert!(knowledge.agent_rate > knowledge.group_rate);
        assert!(knowledge.is_significant);
    }

    #[tokio::test]
    async fn rerunning_yields_identical_content() {
        let records = (0..6)
            .map(|_| record("a-1", week(0), 8.0, &["history_error"], 0, 1))
            .collect();
        let pipeline = pipeline(records);
        let first = pipeline.run("a-1", week(0), &[]).await.unwrap();
        let second = pipeline.run("a-1", week(0), &[]).await.unwrap();
        assert_eq!(first, second);
    }
}
