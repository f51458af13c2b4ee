use std::collections::BTreeMap;

use tracing::warn;

use crate::config::EngineConfig;
use crate::models::{AgentPeriodAggregate, Domain, EvaluationRecord};
use crate::period::PeriodKey;

/// Rolls an agent's evaluations for one period into counts and rates.
///
/// Records outside the period or belonging to another agent are ignored. An
/// empty range produces the zero-valued aggregate rather than an error.
pub fn aggregate_records(
    agent_id: &str,
    period: PeriodKey,
    records: &[EvaluationRecord],
    config: &EngineConfig,
) -> AgentPeriodAggregate {
    let mut aggregate = AgentPeriodAggregate::empty(agent_id, period);
    let index = config.code_index();
    let mut latest: Option<&EvaluationRecord> = None;
    let mut category_counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut code_counts: BTreeMap<String, u32> = BTreeMap::new();

    for record in records {
        if record.agent_id != agent_id
            || record.evaluated_on < period.start
            || record.evaluated_on > period.end
        {
            continue;
        }

        aggregate.evaluation_count += 1;
        aggregate.attitude_error_count += record.attitude_error_count;
        aggregate.operational_error_count += record.operational_error_count;

        for code in record.raised_flags() {
            match index.get(code) {
                Some(category) => {
                    *category_counts.entry(category.id.clone()).or_insert(0) += 1;
                    *code_counts.entry(code.to_string()).or_insert(0) += 1;
                }
                None => warn!(agent_id, code, "error flag has no category mapping; ignored"),
            }
        }

        if latest.map_or(true, |current| record.evaluated_on >= current.evaluated_on) {
            latest = Some(record);
        }
    }

    if aggregate.evaluation_count == 0 {
        return aggregate;
    }

    aggregate.attitude_error_rate = opportunity_rate(
        aggregate.attitude_error_count,
        aggregate.evaluation_count,
        config.items_in_domain(Domain::Attitude),
    );
    aggregate.operational_error_rate = opportunity_rate(
        aggregate.operational_error_count,
        aggregate.evaluation_count,
        config.items_in_domain(Domain::Operational),
    );
    aggregate.category_counts = category_counts;
    aggregate.code_counts = code_counts;

    if let Some(record) = latest {
        aggregate.tenure_months = Some(record.tenure_months);
        aggregate.service_group = Some(record.service_group.clone());
        aggregate.channel = Some(record.channel.clone());
    }

    aggregate
}

/// Errors as a percentage of the error opportunities evaluated.
pub fn opportunity_rate(errors: u32, evaluations: u32, items_per_evaluation: usize) -> f64 {
    let opportunities = evaluations as f64 * items_per_evaluation as f64;
    if opportunities == 0.0 {
        0.0
    } else {
        errors as f64 / opportunities * 100.0
    }
}
