use std::collections::BTreeMap;

use crate::aggregate::opportunity_rate;
use crate::config::EngineConfig;
use crate::models::{
    AgentPeriodAggregate, Domain, GroupComparison, ItemErrorCount, WeaknessAssessment,
    WeaknessSeverity,
};
use crate::stats::z_two_sided_p;
use crate::store::GroupTotals;

/// Ranks the aggregate's error categories, most frequent first.
///
/// Ties break on category id so repeated runs give the same order. Categories
/// with no errors are left out.
pub fn classify(aggregate: &AgentPeriodAggregate, config: &EngineConfig) -> Vec<WeaknessAssessment> {
    let mut domain_totals: BTreeMap<Domain, u32> = BTreeMap::new();
    let mut entries = Vec::new();

    for (category_id, count) in &aggregate.category_counts {
        if *count == 0 {
            continue;
        }
        let Some(category) = config.category(category_id) else {
            continue;
        };
        *domain_totals.entry(category.domain).or_insert(0) += count;
        entries.push((category, *count));
    }

    entries.sort_by(|(a, a_count), (b, b_count)| b_count.cmp(a_count).then_with(|| a.id.cmp(&b.id)));

    entries
        .into_iter()
        .enumerate()
        .map(|(position, (category, count))| {
            let domain_total = domain_totals.get(&category.domain).copied().unwrap_or(0);
            WeaknessAssessment {
                category_id: category.id.clone(),
                display_name: category.display_name.clone(),
                domain: category.domain,
                count,
                share: if domain_total == 0 {
                    0.0
                } else {
                    count as f64 / domain_total as f64
                },
                rank: position as u32 + 1,
                severity: severity(count, aggregate.evaluation_count, config),
                group_comparison: None,
            }
        })
        .collect()
}

fn severity(count: u32, evaluations: u32, config: &EngineConfig) -> WeaknessSeverity {
    if evaluations == 0 {
        return WeaknessSeverity::Normal;
    }
    let per_evaluation = count as f64 / evaluations as f64;
    if per_evaluation >= config.weakness.critical_rate {
        WeaknessSeverity::Critical
    } else if per_evaluation >= config.weakness.weak_rate {
        WeaknessSeverity::Weak
    } else {
        WeaknessSeverity::Normal
    }
}

/// Share held by the top-ranked category, zero when there are no weaknesses.
pub fn top_share(weaknesses: &[WeaknessAssessment]) -> f64 {
    weaknesses.first().map(|w| w.share).unwrap_or(0.0)
}

/// Errors across the top-ranked category's domain.
pub fn top_domain_errors(weaknesses: &[WeaknessAssessment]) -> u32 {
    let Some(top) = weaknesses.first() else {
        return 0;
    };
    weaknesses
        .iter()
        .filter(|w| w.domain == top.domain)
        .map(|w| w.count)
        .sum()
}

/// Tests each category's opportunity rate against the service group's rate
/// for the same period with a pooled two-proportion z-test.
pub fn compare_with_group(
    weaknesses: &mut [WeaknessAssessment],
    aggregate: &AgentPeriodAggregate,
    group: &GroupTotals,
    config: &EngineConfig,
) {
    if !aggregate.has_data() || group.evaluation_count == 0 {
        return;
    }

    let mut group_counts: BTreeMap<&str, u32> = BTreeMap::new();
    for (code, count) in &group.code_counts {
        if let Some(category) = config.category_for_code(code) {
            *group_counts.entry(category.id.as_str()).or_insert(0) += count;
        }
    }

    for weakness in weaknesses.iter_mut() {
        let items = config.items_in_category(&weakness.category_id);
        let agent_n = aggregate.evaluation_count as f64 * items as f64;
        let group_n = group.evaluation_count as f64 * items as f64;
        if agent_n == 0.0 {
            continue;
        }
        let group_errors = group_counts
            .get(weakness.category_id.as_str())
            .copied()
            .unwrap_or(0);

        let agent_p = weakness.count as f64 / agent_n;
        let group_p = group_errors as f64 / group_n;
        let pooled = (weakness.count as f64 + group_errors as f64) / (agent_n + group_n);
        let se = (pooled * (1.0 - pooled) * (1.0 / agent_n + 1.0 / group_n)).sqrt();
        let (z_score, p_value) = if pooled <= 0.0 || pooled >= 1.0 || se < 1e-12 {
            (0.0, 1.0)
        } else {
            let z = (agent_p - group_p) / se;
            (z, z_two_sided_p(z))
        };

        weakness.group_comparison = Some(GroupComparison {
            agent_rate: opportunity_rate(weakness.count, aggregate.evaluation_count, items),
            group_rate: opportunity_rate(group_errors, group.evaluation_count, items),
            z_score,
            p_value,
            is_significant: p_value < config.weakness.significance_level,
        });
    }
}

/// The most frequent raw error codes, ties broken by code.
pub fn top_items(aggregate: &AgentPeriodAggregate, config: &EngineConfig) -> Vec<ItemErrorCount> {
    let mut items: Vec<ItemErrorCount> = aggregate
        .code_counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .filter_map(|(code, count)| {
            let mapping = config.error_code(code)?;
            Some(ItemErrorCount {
                code: code.clone(),
                label: mapping.label.clone(),
                category_id: mapping.category.clone(),
                count: *count,
            })
        })
        .collect();
    items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
    items.truncate(config.weakness.top_items);
    items
}
