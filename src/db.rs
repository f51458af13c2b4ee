use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{BatchJob, EvaluationRecord, RawEvaluation, WeeklyReport};
use crate::period::PeriodKey;
use crate::store::{EvaluationStore, GroupTotals, ReportStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let agents = [
        ("agt-1001", "Mina Cho", "billing", "voice", 1.5),
        ("agt-1002", "Daniel Park", "billing", "voice", 7.0),
        ("agt-1003", "Sora Kim", "dispatch", "chat", 30.0),
    ];
    let first_day = NaiveDate::from_ymd_opt(2026, 1, 29).context("invalid date")?;

    for (agent_id, name, group, channel, _) in agents {
        upsert_agent(pool, agent_id, name, group, channel).await?;
    }

    let mut inserted = 0usize;
    for (index, (agent_id, _, group, channel, tenure)) in agents.into_iter().enumerate() {
        for day in 0..21i64 {
            // Deterministic error pattern: the new hire struggles with guidance,
            // the junior agent with records, the veteran is mostly clean.
            let codes: Vec<String> = match (index, day % 4) {
                (0, 0) | (0, 2) => vec!["guide_error".into(), "empathy_error".into()],
                (0, _) => vec!["wrong_guide_error".into()],
                (1, 1) => vec!["history_error".into(), "consult_type_error".into()],
                (1, _) => Vec::new(),
                (_, 3) if day > 14 => vec!["greeting_error".into()],
                _ => Vec::new(),
            };
            let attitude = codes.iter().filter(|c| c.contains("empathy") || c.contains("greeting")).count() as i32;
            let operational = codes.len() as i32 - attitude;

            let result = insert_evaluation(
                pool,
                &EvaluationRow {
                    agent_id,
                    evaluated_on: first_day + Duration::days(day),
                    tenure_months: tenure + day as f64 / 30.0,
                    service_group: group,
                    channel,
                    error_codes: &codes,
                    attitude_error_count: attitude,
                    operational_error_count: operational,
                    source_key: &format!("seed-{agent_id}-{day:03}"),
                },
            )
            .await?;
            inserted += result as usize;
        }
    }

    Ok(inserted)
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub rejected: usize,
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    agent_id: Option<String>,
    full_name: Option<String>,
    evaluated_on: Option<NaiveDate>,
    tenure_months: Option<f64>,
    service_group: Option<String>,
    channel: Option<String>,
    /// Raised error codes separated by `;`.
    error_codes: Option<String>,
    attitude_error_count: Option<i64>,
    operational_error_count: Option<i64>,
    source_key: Option<String>,
}

/// A CSV row that passed validation.
#[derive(Debug)]
pub struct CsvEvaluation {
    pub record: EvaluationRecord,
    pub full_name: Option<String>,
    pub source_key: String,
}

/// Reads evaluation rows, rejecting incomplete rows and rows carrying error
/// codes the configuration cannot classify. Rejections are logged and counted.
pub fn read_evaluations_csv(
    csv_path: &Path,
    config: &EngineConfig,
) -> anyhow::Result<(Vec<CsvEvaluation>, usize)> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut accepted = Vec::new();
    let mut rejected = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(line = line + 2, error = %err, "unreadable evaluation row; skipped");
                rejected += 1;
                continue;
            }
        };
        match validate_row(row, config) {
            Ok(mut evaluation) => {
                if evaluation.source_key.is_empty() {
                    evaluation.source_key = format!(
                        "import-{}-{}-{}",
                        evaluation.record.agent_id,
                        evaluation.record.evaluated_on,
                        line + 2
                    );
                }
                accepted.push(evaluation);
            }
            Err(err) => {
                warn!(line = line + 2, error = %err, "evaluation row rejected");
                rejected += 1;
            }
        }
    }

    Ok((accepted, rejected))
}

fn validate_row(row: CsvRow, config: &EngineConfig) -> Result<CsvEvaluation, EngineError> {
    let raw = RawEvaluation {
        agent_id: row.agent_id,
        evaluated_on: row.evaluated_on,
        tenure_months: row.tenure_months,
        service_group: row.service_group,
        channel: row.channel,
        error_codes: row
            .error_codes
            .unwrap_or_default()
            .split(';')
            .map(str::to_string)
            .collect(),
        attitude_error_count: row.attitude_error_count,
        operational_error_count: row.operational_error_count,
    };
    let record = raw.into_record()?;
    if let Some(code) = record
        .raised_flags()
        .find(|code| config.category_for_code(code).is_none())
    {
        return Err(EngineError::invalid_record(
            "error_codes",
            format!("{code} is not mapped to a coaching category"),
        ));
    }

    Ok(CsvEvaluation {
        record,
        full_name: row.full_name.filter(|name| !name.trim().is_empty()),
        source_key: row.source_key.unwrap_or_default().trim().to_string(),
    })
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &Path,
    config: &EngineConfig,
) -> anyhow::Result<ImportSummary> {
    let (rows, rejected) = read_evaluations_csv(csv_path, config)?;
    let mut summary = ImportSummary {
        inserted: 0,
        rejected,
    };

    for row in rows {
        let record = &row.record;
        upsert_agent(
            pool,
            &record.agent_id,
            row.full_name.as_deref().unwrap_or(&record.agent_id),
            &record.service_group,
            &record.channel,
        )
        .await?;

        let codes: Vec<String> = record.raised_flags().map(str::to_string).collect();
        let inserted = insert_evaluation(
            pool,
            &EvaluationRow {
                agent_id: &record.agent_id,
                evaluated_on: record.evaluated_on,
                tenure_months: record.tenure_months,
                service_group: &record.service_group,
                channel: &record.channel,
                error_codes: &codes,
                attitude_error_count: i32::try_from(record.attitude_error_count)?,
                operational_error_count: i32::try_from(record.operational_error_count)?,
                source_key: &row.source_key,
            },
        )
        .await?;

        if inserted {
            summary.inserted += 1;
        }
    }

    Ok(summary)
}

async fn upsert_agent(
    pool: &PgPool,
    agent_id: &str,
    full_name: &str,
    service_group: &str,
    channel: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO qc_coaching.agents (agent_id, full_name, service_group, channel)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (agent_id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            service_group = EXCLUDED.service_group,
            channel = EXCLUDED.channel
        "#,
    )
    .bind(agent_id)
    .bind(full_name)
    .bind(service_group)
    .bind(channel)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert agent {agent_id}"))?;
    Ok(())
}

struct EvaluationRow<'a> {
    agent_id: &'a str,
    evaluated_on: NaiveDate,
    tenure_months: f64,
    service_group: &'a str,
    channel: &'a str,
    error_codes: &'a [String],
    attitude_error_count: i32,
    operational_error_count: i32,
    source_key: &'a str,
}

/// Inserts one evaluation; returns false when the source key was already loaded.
async fn insert_evaluation(pool: &PgPool, row: &EvaluationRow<'_>) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO qc_coaching.evaluations
        (id, agent_id, evaluated_on, tenure_months, service_group, channel,
         error_codes, attitude_error_count, operational_error_count, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(row.agent_id)
    .bind(row.evaluated_on)
    .bind(row.tenure_months)
    .bind(row.service_group)
    .bind(row.channel)
    .bind(row.error_codes)
    .bind(row.attitude_error_count)
    .bind(row.operational_error_count)
    .bind(row.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Postgres-backed evaluation source and report cache.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EvaluationStore for PgStore {
    async fn query_evaluations(
        &self,
        agent_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<EvaluationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, evaluated_on, tenure_months, service_group, channel,
                   error_codes, attitude_error_count, operational_error_count, source_key
            FROM qc_coaching.evaluations
            WHERE agent_id = $1 AND evaluated_on BETWEEN $2 AND $3
            ORDER BY evaluated_on, source_key
            "#,
        )
        .bind(agent_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("failed to query evaluations")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let raw = RawEvaluation {
                agent_id: row.get("agent_id"),
                evaluated_on: row.get("evaluated_on"),
                tenure_months: row.get("tenure_months"),
                service_group: row.get("service_group"),
                channel: row.get("channel"),
                error_codes: row
                    .get::<Option<Vec<String>>, _>("error_codes")
                    .unwrap_or_default(),
                attitude_error_count: row
                    .get::<Option<i32>, _>("attitude_error_count")
                    .map(i64::from),
                operational_error_count: row
                    .get::<Option<i32>, _>("operational_error_count")
                    .map(i64::from),
            };
            match raw.into_record() {
                Ok(record) => records.push(record),
                Err(err) => {
                    let source_key: String = row.get("source_key");
                    warn!(agent_id, source_key = %source_key, error = %err, "skipping invalid evaluation row");
                }
            }
        }

        Ok(records)
    }

    async fn group_totals(
        &self,
        service_group: &str,
        channel: &str,
        period: PeriodKey,
    ) -> anyhow::Result<GroupTotals> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS evaluations,
                   COALESCE(SUM(attitude_error_count), 0)::BIGINT AS attitude_errors,
                   COALESCE(SUM(operational_error_count), 0)::BIGINT AS operational_errors
            FROM qc_coaching.evaluations
            WHERE service_group = $1 AND channel = $2
              AND evaluated_on BETWEEN $3 AND $4
            "#,
        )
        .bind(service_group)
        .bind(channel)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&self.pool)
        .await
        .context("failed to query group totals")?;

        let code_rows = sqlx::query(
            r#"
            SELECT code, COUNT(*)::BIGINT AS raised
            FROM qc_coaching.evaluations, unnest(error_codes) AS code
            WHERE service_group = $1 AND channel = $2
              AND evaluated_on BETWEEN $3 AND $4
            GROUP BY code
            "#,
        )
        .bind(service_group)
        .bind(channel)
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await
        .context("failed to query group error codes")?;

        let mut code_counts = BTreeMap::new();
        for code_row in code_rows {
            code_counts.insert(
                code_row.get::<String, _>("code"),
                u32::try_from(code_row.get::<i64, _>("raised"))?,
            );
        }

        Ok(GroupTotals {
            evaluation_count: u32::try_from(row.get::<i64, _>("evaluations"))?,
            attitude_errors: u32::try_from(row.get::<i64, _>("attitude_errors"))?,
            operational_errors: u32::try_from(row.get::<i64, _>("operational_errors"))?,
            code_counts,
        })
    }

    async fn agents_with_evaluations(&self, period: PeriodKey) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT agent_id
            FROM qc_coaching.evaluations
            WHERE evaluated_on BETWEEN $1 AND $2
            ORDER BY agent_id
            "#,
        )
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await
        .context("failed to list agents")?;

        Ok(rows.into_iter().map(|row| row.get("agent_id")).collect())
    }

    async fn error_codes_in_use(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT unnest(error_codes) AS code FROM qc_coaching.evaluations ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list error codes")?;

        Ok(rows.into_iter().map(|row| row.get("code")).collect())
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn load_report(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> anyhow::Result<Option<WeeklyReport>> {
        let row = sqlx::query(
            "SELECT report FROM qc_coaching.weekly_report_cache WHERE agent_id = $1 AND period_key = $2",
        )
        .bind(agent_id)
        .bind(period.key())
        .fetch_optional(&self.pool)
        .await
        .context("failed to read report cache")?;

        match row {
            Some(row) => {
                let Json(report) = row
                    .try_get::<Json<WeeklyReport>, _>("report")
                    .context("cached report could not be decoded")?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    async fn save_report(&self, report: &WeeklyReport) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO qc_coaching.weekly_report_cache
            (agent_id, period_key, period_start, period_end, report, config_version, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (agent_id, period_key) DO UPDATE
            SET report = EXCLUDED.report,
                config_version = EXCLUDED.config_version,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(&report.agent_id)
        .bind(report.period.key())
        .bind(report.period.start)
        .bind(report.period.end)
        .bind(Json(report))
        .bind(i32::try_from(report.config_version)?)
        .bind(report.generated_at)
        .execute(&self.pool)
        .await
        .context("failed to write report cache")?;
        Ok(())
    }

    async fn save_job(&self, job: &BatchJob) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO qc_coaching.batch_jobs
            (job_id, period_key, requested, generated, skipped, status, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (job_id) DO UPDATE
            SET generated = EXCLUDED.generated,
                skipped = EXCLUDED.skipped,
                status = EXCLUDED.status,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(job.job_id)
        .bind(job.period.key())
        .bind(i32::try_from(job.requested)?)
        .bind(i32::try_from(job.generated)?)
        .bind(i32::try_from(job.skipped)?)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .context("failed to record batch job")?;
        Ok(())
    }
}
