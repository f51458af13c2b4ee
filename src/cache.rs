//! Weekly report cache with single-flight generation and the batch job.
//!
//! At most one generation per (agent, period) key runs at a time inside this
//! process. Readers that miss wait on the in-flight generation and then read
//! the cache; if the wait exceeds `batch.lock_wait_seconds` they compute the
//! report themselves rather than block.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::models::{BatchJob, JobStatus, ReportLookup, ReportSource, WeeklyReport};
use crate::period::PeriodKey;
use crate::pipeline::Pipeline;
use crate::store::{EvaluationStore, ReportStore};

type FlightKey = (String, PeriodKey);

pub struct ReportCache<E, R> {
    pipeline: Pipeline<E>,
    reports: Arc<R>,
    in_flight: DashMap<FlightKey, Arc<Mutex<()>>>,
}

impl<E, R> ReportCache<E, R>
where
    E: EvaluationStore + 'static,
    R: ReportStore + 'static,
{
    pub fn new(pipeline: Pipeline<E>, reports: Arc<R>) -> Self {
        Self {
            pipeline,
            reports,
            in_flight: DashMap::new(),
        }
    }

    pub async fn get(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> Result<Option<WeeklyReport>, EngineError> {
        self.reports
            .load_report(agent_id, period)
            .await
            .map_err(|source| EngineError::Cache {
                key: cache_key(agent_id, period),
                source,
            })
    }

    /// Upsert; a later put for the same key replaces the earlier report.
    pub async fn put(&self, report: &WeeklyReport) -> Result<(), EngineError> {
        self.reports
            .save_report(report)
            .await
            .map_err(|source| EngineError::Cache {
                key: cache_key(&report.agent_id, report.period),
                source,
            })
    }

    /// Cached report when present, otherwise generated and cached.
    pub async fn get_or_generate(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> Result<ReportLookup, EngineError> {
        if let Some(report) = self.read_through(agent_id, period).await {
            return Ok(ReportLookup {
                report,
                source: ReportSource::Cache,
            });
        }

        let lock = self.flight(agent_id, period);
        let wait = Duration::from_secs(self.pipeline.config().batch.lock_wait_seconds);
        let result = match tokio::time::timeout(wait, lock.lock()).await {
            Ok(_guard) => {
                // Another flight may have filled the cache while we waited.
                match self.read_through(agent_id, period).await {
                    Some(report) => Ok(ReportLookup {
                        report,
                        source: ReportSource::Cache,
                    }),
                    None => self.compute_and_store(agent_id, period).await,
                }
            }
            Err(_) => {
                warn!(agent_id, period = %period, "in-flight generation is slow; computing directly");
                self.compute_and_store(agent_id, period).await
            }
        };
        drop(lock);
        self.release(agent_id, period);
        result
    }

    /// Regenerates unconditionally and overwrites the cached entry.
    pub async fn generate(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> Result<ReportLookup, EngineError> {
        let lock = self.flight(agent_id, period);
        let result = {
            let _guard = lock.lock().await;
            self.compute_and_store(agent_id, period).await
        };
        drop(lock);
        self.release(agent_id, period);
        result
    }

    /// Generates reports for `agent_ids`, or every agent with evaluations in
    /// the period, with at most `workers` generations in flight.
    ///
    /// A failure for one agent is logged and skipped. Once `shutdown` flips to
    /// true no further agents are dispatched; in-flight ones finish.
    pub async fn generate_batch(
        self: &Arc<Self>,
        agent_ids: Option<Vec<String>>,
        period: PeriodKey,
        workers: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<BatchJob, EngineError> {
        let agents: BTreeSet<String> = match agent_ids {
            Some(ids) => ids.into_iter().collect(),
            None => self
                .pipeline
                .evaluations()
                .agents_with_evaluations(period)
                .await
                .map_err(|e| EngineError::store("*", e))?
                .into_iter()
                .collect(),
        };

        let mut job = BatchJob::start(period, agents.len());
        self.record_job(&job).await;
        info!(job_id = %job.job_id, period = %period, agents = agents.len(), workers, "batch started");

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for agent_id in agents {
            // Shutdown also wins while waiting for a free worker.
            let permit = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .context("batch semaphore closed")
                    .map_err(|source| EngineError::Cache {
                        key: period.key(),
                        source,
                    })?,
            };
            let cache = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let result = cache.generate(&agent_id, period).await;
                (agent_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((agent_id, Ok(lookup))) if lookup.source == ReportSource::Fresh => {
                    debug!(agent_id = %agent_id, "report generated");
                    job.generated += 1;
                }
                Ok((agent_id, Ok(_))) => {
                    warn!(agent_id = %agent_id, "report generated but not cached; skipped");
                    job.skipped += 1;
                }
                Ok((agent_id, Err(err))) => {
                    warn!(agent_id = %agent_id, error = %err, "report generation failed; skipped");
                    job.skipped += 1;
                }
                Err(err) => {
                    warn!(error = %err, "report task aborted");
                    job.skipped += 1;
                }
            }
        }

        job.status = if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        job.finished_at = Some(Utc::now());
        self.record_job(&job).await;
        info!(
            job_id = %job.job_id,
            status = job.status.as_str(),
            generated = job.generated,
            skipped = job.skipped,
            elapsed_seconds = job.elapsed_seconds(),
            "batch finished"
        );
        Ok(job)
    }

    async fn compute_and_store(
        &self,
        agent_id: &str,
        period: PeriodKey,
    ) -> Result<ReportLookup, EngineError> {
        let prior_alerts = match self.read_through(agent_id, period.previous()).await {
            Some(previous) => previous.content.alerts,
            None => Vec::new(),
        };

        let content = self
            .pipeline
            .run(agent_id, period, &prior_alerts)
            .await
            .map_err(|err| {
                warn!(agent_id, period = %period, error = %err, "report generation failed");
                EngineError::Unavailable {
                    agent_id: agent_id.to_string(),
                    period: period.key(),
                }
            })?;

        let report = WeeklyReport {
            agent_id: agent_id.to_string(),
            period,
            generated_at: Utc::now(),
            config_version: self.pipeline.config().version,
            content,
        };

        let source = match self.put(&report).await {
            Ok(()) => ReportSource::Fresh,
            Err(err) => {
                warn!(agent_id, period = %period, error = %err, "report cache write failed");
                ReportSource::FreshUncached
            }
        };
        Ok(ReportLookup { report, source })
    }

    /// Cache read that degrades to a miss when the store cannot be read.
    async fn read_through(&self, agent_id: &str, period: PeriodKey) -> Option<WeeklyReport> {
        match self.get(agent_id, period).await {
            Ok(report) => report,
            Err(err) => {
                warn!(agent_id, period = %period, error = %err, "report cache read failed; treating as miss");
                None
            }
        }
    }

    async fn record_job(&self, job: &BatchJob) {
        if let Err(err) = self.reports.save_job(job).await {
            warn!(job_id = %job.job_id, error = %err, "failed to persist batch job state");
        }
    }

    fn flight(&self, agent_id: &str, period: PeriodKey) -> Arc<Mutex<()>> {
        self.in_flight
            .entry((agent_id.to_string(), period))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the key's lock once no caller holds or awaits it.
    fn release(&self, agent_id: &str, period: PeriodKey) {
        self.in_flight
            .remove_if(&(agent_id.to_string(), period), |_, lock| {
                Arc::strong_count(lock) == 1
            });
    }
}

/// Resolves once the flag reads true; never, if the sender is gone without signalling.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

fn cache_key(agent_id: &str, period: PeriodKey) -> String {
    format!("{agent_id}/{}", period.key())
}
