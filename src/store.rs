use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::models::{BatchJob, EvaluationRecord, WeeklyReport};
use crate::period::PeriodKey;

/// Raw error totals for an agent's service group and channel over a period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTotals {
    pub evaluation_count: u32,
    pub attitude_errors: u32,
    pub operational_errors: u32,
    /// Raised count per raw error code.
    pub code_counts: BTreeMap<String, u32>,
}

/// Read-only source of evaluation rows.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Rows for one agent with `start <= date <= end`; empty when nothing matches.
    async fn query_evaluations(
        &self,
        agent_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<EvaluationRecord>>;

    async fn group_totals(
        &self,
        service_group: &str,
        channel: &str,
        period: PeriodKey,
    ) -> anyhow::Result<GroupTotals>;

    async fn agents_with_evaluations(&self, period: PeriodKey) -> anyhow::Result<Vec<String>>;

    async fn error_codes_in_use(&self) -> anyhow::Result<Vec<String>>;
}

/// Keyed store of generated reports and batch job records.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn load_report(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> anyhow::Result<Option<WeeklyReport>>;

    /// Upsert keyed by (agent_id, period).
    async fn save_report(&self, report: &WeeklyReport) -> anyhow::Result<()>;

    async fn save_job(&self, job: &BatchJob) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<EvaluationRecord>>,
    reports: RwLock<BTreeMap<(String, PeriodKey), WeeklyReport>>,
    jobs: RwLock<BTreeMap<uuid::Uuid, BatchJob>>,
}

impl InMemoryStore {
    pub fn with_records(records: Vec<EvaluationRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn jobs(&self) -> Vec<BatchJob> {
        self.jobs.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl EvaluationStore for InMemoryStore {
    async fn query_evaluations(
        &self,
        agent_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<EvaluationRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.agent_id == agent_id && r.evaluated_on >= start && r.evaluated_on <= end)
            .cloned()
            .collect())
    }

    async fn group_totals(
        &self,
        service_group: &str,
        channel: &str,
        period: PeriodKey,
    ) -> anyhow::Result<GroupTotals> {
        let records = self.records.read().await;
        let mut totals = GroupTotals::default();
        for record in records.iter().filter(|r| {
            r.service_group == service_group
                && r.channel == channel
                && r.evaluated_on >= period.start
                && r.evaluated_on <= period.end
        }) {
            totals.evaluation_count += 1;
            totals.attitude_errors += record.attitude_error_count;
            totals.operational_errors += record.operational_error_count;
            for code in record.raised_flags() {
                *totals.code_counts.entry(code.to_string()).or_insert(0) += 1;
            }
        }
        Ok(totals)
    }

    async fn agents_with_evaluations(&self, period: PeriodKey) -> anyhow::Result<Vec<String>> {
        let records = self.records.read().await;
        let agents: BTreeSet<String> = records
            .iter()
            .filter(|r| r.evaluated_on >= period.start && r.evaluated_on <= period.end)
            .map(|r| r.agent_id.clone())
            .collect();
        Ok(agents.into_iter().collect())
    }

    async fn error_codes_in_use(&self) -> anyhow::Result<Vec<String>> {
        let records = self.records.read().await;
        let codes: BTreeSet<String> = records
            .iter()
            .flat_map(|r| r.raised_flags().map(str::to_string).collect::<Vec<_>>())
            .collect();
        Ok(codes.into_iter().collect())
    }
}

#[async_trait]
impl ReportStore for InMemoryStore {
    async fn load_report(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> anyhow::Result<Option<WeeklyReport>> {
        let reports = self.reports.read().await;
        Ok(reports.get(&(agent_id.to_string(), period)).cloned())
    }

    async fn save_report(&self, report: &WeeklyReport) -> anyhow::Result<()> {
        let mut reports = self.reports.write().await;
        reports.insert((report.agent_id.clone(), report.period), report.clone());
        Ok(())
    }

    async fn save_job(&self, job: &BatchJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }
}
