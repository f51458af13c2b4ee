use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::period::PeriodKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Attitude,
    Operational,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Attitude => "attitude",
            Domain::Operational => "operational",
        }
    }
}

/// One evaluated interaction as read from the evaluation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub agent_id: String,
    pub evaluated_on: NaiveDate,
    pub tenure_months: f64,
    pub service_group: String,
    pub channel: String,
    pub error_flags: BTreeMap<String, bool>,
    pub attitude_error_count: u32,
    pub operational_error_count: u32,
}

impl EvaluationRecord {
    pub fn raised_flags(&self) -> impl Iterator<Item = &str> {
        self.error_flags
            .iter()
            .filter(|(_, raised)| **raised)
            .map(|(code, _)| code.as_str())
    }

    pub fn total_error_count(&self) -> u32 {
        self.attitude_error_count + self.operational_error_count
    }
}

/// An evaluation row before validation. Every column may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvaluation {
    pub agent_id: Option<String>,
    pub evaluated_on: Option<NaiveDate>,
    pub tenure_months: Option<f64>,
    pub service_group: Option<String>,
    pub channel: Option<String>,
    pub error_codes: Vec<String>,
    pub attitude_error_count: Option<i64>,
    pub operational_error_count: Option<i64>,
}

impl RawEvaluation {
    /// Rejects rows with missing or negative required fields instead of reading them as zero.
    pub fn into_record(self) -> Result<EvaluationRecord, EngineError> {
        let agent_id = required_text(self.agent_id, "agent_id")?;
        let evaluated_on = self
            .evaluated_on
            .ok_or_else(|| EngineError::invalid_record("evaluated_on", "missing"))?;
        let tenure_months = self
            .tenure_months
            .ok_or_else(|| EngineError::invalid_record("tenure_months", "missing"))?;
        if !tenure_months.is_finite() || tenure_months < 0.0 {
            return Err(EngineError::invalid_record(
                "tenure_months",
                format!("{tenure_months} is not a valid tenure"),
            ));
        }

        Ok(EvaluationRecord {
            agent_id,
            evaluated_on,
            tenure_months,
            service_group: required_text(self.service_group, "service_group")?,
            channel: required_text(self.channel, "channel")?,
            error_flags: self
                .error_codes
                .into_iter()
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .map(|code| (code, true))
                .collect(),
            attitude_error_count: count(self.attitude_error_count, "attitude_error_count")?,
            operational_error_count: count(self.operational_error_count, "operational_error_count")?,
        })
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, EngineError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EngineError::invalid_record(field, "missing")),
    }
}

fn count(value: Option<i64>, field: &str) -> Result<u32, EngineError> {
    let value = value.ok_or_else(|| EngineError::invalid_record(field, "missing"))?;
    u32::try_from(value)
        .map_err(|_| EngineError::invalid_record(field, format!("{value} is not a valid count")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPeriodAggregate {
    pub agent_id: String,
    pub period: PeriodKey,
    pub evaluation_count: u32,
    pub attitude_error_count: u32,
    pub operational_error_count: u32,
    /// Percent of attitude error opportunities raised.
    pub attitude_error_rate: f64,
    /// Percent of operational error opportunities raised.
    pub operational_error_rate: f64,
    pub category_counts: BTreeMap<String, u32>,
    /// Raised count per mapped raw error code.
    #[serde(default)]
    pub code_counts: BTreeMap<String, u32>,
    pub tenure_months: Option<f64>,
    pub service_group: Option<String>,
    pub channel: Option<String>,
}

impl AgentPeriodAggregate {
    pub fn empty(agent_id: &str, period: PeriodKey) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            period,
            evaluation_count: 0,
            attitude_error_count: 0,
            operational_error_count: 0,
            attitude_error_rate: 0.0,
            operational_error_rate: 0.0,
            category_counts: BTreeMap::new(),
            code_counts: BTreeMap::new(),
            tenure_months: None,
            service_group: None,
            channel: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.evaluation_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenureBand {
    NewHire,
    Junior,
    Intermediate,
    Senior,
    Veteran,
}

impl TenureBand {
    pub const ALL: [TenureBand; 5] = [
        TenureBand::NewHire,
        TenureBand::Junior,
        TenureBand::Intermediate,
        TenureBand::Senior,
        TenureBand::Veteran,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenureBand::NewHire => "new-hire",
            TenureBand::Junior => "junior",
            TenureBand::Intermediate => "intermediate",
            TenureBand::Senior => "senior",
            TenureBand::Veteran => "veteran",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingCategory {
    pub id: String,
    pub display_name: String,
    pub domain: Domain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaknessSeverity {
    Normal,
    Weak,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaknessAssessment {
    pub category_id: String,
    pub display_name: String,
    pub domain: Domain,
    pub count: u32,
    /// Share of this category within its domain's error total.
    pub share: f64,
    pub rank: u32,
    pub severity: WeaknessSeverity,
    #[serde(default)]
    pub group_comparison: Option<GroupComparison>,
}

/// Two-proportion z-test of a category's error rate against the agent's
/// service group in the same period. Rates are percent of opportunities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupComparison {
    pub agent_rate: f64,
    pub group_rate: f64,
    pub z_score: f64,
    pub p_value: f64,
    pub is_significant: bool,
}

/// Raised count of one raw error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemErrorCount {
    pub code: String,
    pub label: String,
    pub category_id: String,
    pub count: u32,
}

/// Raw rates of a window other than the report period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRates {
    pub period: PeriodKey,
    pub evaluation_count: u32,
    pub attitude_error_rate: f64,
    pub operational_error_rate: f64,
}

impl From<&AgentPeriodAggregate> for PeriodRates {
    fn from(aggregate: &AgentPeriodAggregate) -> Self {
        Self {
            period: aggregate.period,
            evaluation_count: aggregate.evaluation_count,
            attitude_error_rate: aggregate.attitude_error_rate,
            operational_error_rate: aggregate.operational_error_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendDirection {
    Improving,
    Worsening,
    Stable,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Worsening => "worsening",
            TrendDirection::Stable => "stable",
            TrendDirection::InsufficientData => "insufficient-data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Fraction of the configured baseline window actually backed by data.
    pub confidence: f64,
    pub recent: Option<f64>,
    pub baseline: Option<f64>,
    pub slope: Option<f64>,
    /// Two-sided p-value of the weighted slope; descriptive, direction comes from the baseline.
    #[serde(default)]
    pub p_value: Option<f64>,
    #[serde(default)]
    pub is_significant: bool,
    pub periods: usize,
}

impl Trend {
    pub fn insufficient(periods: usize) -> Self {
        Self {
            direction: TrendDirection::InsufficientData,
            confidence: 0.0,
            recent: None,
            baseline: None,
            slope: None,
            p_value: None,
            is_significant: false,
            periods,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Safe,
    Watch,
    Risk,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::Watch => "watch",
            RiskTier::Risk => "risk",
            RiskTier::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    pub raw: f64,
    pub shrunk: f64,
    pub prior: f64,
    pub sample_size: u32,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    Scored,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub agent_id: String,
    pub period: PeriodKey,
    pub attitude: RateEstimate,
    pub operational: RateEstimate,
    pub trend: Trend,
    pub tenure_band: Option<TenureBand>,
    pub stabilization_delayed: bool,
    pub numeric_score: f64,
    pub tier: RiskTier,
    pub data_status: DataStatus,
}

impl RiskScore {
    pub fn combined_shrunk(&self, attitude_weight: f64, operational_weight: f64) -> f64 {
        let total = attitude_weight + operational_weight;
        (attitude_weight * self.attitude.shrunk + operational_weight * self.operational.shrunk)
            / total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Routine,
    Elevated,
    High,
    Immediate,
}

impl From<RiskTier> for Urgency {
    fn from(tier: RiskTier) -> Self {
        match tier {
            RiskTier::Safe => Urgency::Routine,
            RiskTier::Watch => Urgency::Elevated,
            RiskTier::Risk => Urgency::High,
            RiskTier::Critical => Urgency::Immediate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    SelfDirected,
    Monthly,
    Biweekly,
    Weekly,
}

impl From<RiskTier> for FollowUp {
    fn from(tier: RiskTier) -> Self {
        match tier {
            RiskTier::Safe => FollowUp::SelfDirected,
            RiskTier::Watch => FollowUp::Monthly,
            RiskTier::Risk => FollowUp::Biweekly,
            RiskTier::Critical => FollowUp::Weekly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    AttitudeErrorRate,
    OperationalErrorRate,
    CombinedErrorRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimaryWeakness {
    Category {
        category_id: String,
        display_name: String,
    },
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub category_id: String,
    pub target_metric: TargetMetric,
    pub intervention: String,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingPrescription {
    pub agent_id: String,
    pub period: PeriodKey,
    pub tier: RiskTier,
    pub primary_weakness: Option<PrimaryWeakness>,
    pub recommended_actions: Vec<RecommendedAction>,
    pub urgency: Urgency,
    pub follow_up: FollowUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTrigger {
    RiskTier,
    AttitudeRate,
    OperationalRate,
    Deterioration,
    StabilizationDelay,
}

impl AlertTrigger {
    pub const ALL: [AlertTrigger; 5] = [
        AlertTrigger::RiskTier,
        AlertTrigger::AttitudeRate,
        AlertTrigger::OperationalRate,
        AlertTrigger::Deterioration,
        AlertTrigger::StabilizationDelay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTrigger::RiskTier => "risk-tier",
            AlertTrigger::AttitudeRate => "attitude-rate",
            AlertTrigger::OperationalRate => "operational-rate",
            AlertTrigger::Deterioration => "deterioration",
            AlertTrigger::StabilizationDelay => "stabilization-delay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Continuing,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingAlert {
    pub agent_id: String,
    pub period: PeriodKey,
    pub trigger: AlertTrigger,
    pub trigger_reason: String,
    pub threshold_breached: f64,
    pub observed: f64,
    pub first_seen_period: PeriodKey,
    pub status: AlertStatus,
    pub severity: AlertSeverity,
    /// Consecutive clear periods counted while resolving.
    pub clear_periods: u32,
}

/// The derived, regenerable part of a weekly report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportContent {
    pub aggregate: AgentPeriodAggregate,
    pub risk_score: RiskScore,
    pub attitude_trend: Trend,
    pub operational_trend: Trend,
    pub weaknesses: Vec<WeaknessAssessment>,
    /// Most frequent raw error codes, highest count first.
    #[serde(default)]
    pub top_items: Vec<ItemErrorCount>,
    #[serde(default)]
    pub previous_period: Option<PeriodRates>,
    /// From the first of the month the period starts in through the period end.
    #[serde(default)]
    pub month_to_date: Option<PeriodRates>,
    pub prescription: CoachingPrescription,
    pub alerts: Vec<CoachingAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub agent_id: String,
    pub period: PeriodKey,
    pub generated_at: DateTime<Utc>,
    pub config_version: u32,
    #[serde(flatten)]
    pub content: ReportContent,
}

impl WeeklyReport {
    pub fn is_no_data(&self) -> bool {
        self.content.risk_score.data_status == DataStatus::NoData
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Cache,
    Fresh,
    /// Computed but the cache write failed; the next read recomputes.
    FreshUncached,
}

impl ReportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSource::Cache => "cache",
            ReportSource::Fresh => "fresh",
            ReportSource::FreshUncached => "fresh (not cached)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportLookup {
    pub report: WeeklyReport,
    pub source: ReportSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Job-state record for one batch run, persisted next to the reports it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: Uuid,
    pub period: PeriodKey,
    pub requested: usize,
    pub generated: usize,
    pub skipped: usize,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn start(period: PeriodKey, requested: usize) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            period,
            requested,
            generated: 0,
            skipped: 0,
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
