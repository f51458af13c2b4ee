use std::fmt::Write;

use crate::models::{
    AlertStatus, PeriodRates, PrimaryWeakness, RateEstimate, ReportSource, Trend, WeeklyReport,
};

fn rate_line(label: &str, estimate: &RateEstimate) -> String {
    format!(
        "- {label}: {:.2}% shrunk (raw {:.2}%, prior {:.2}%, n={}, {:?} confidence)",
        estimate.shrunk, estimate.raw, estimate.prior, estimate.sample_size, estimate.confidence
    )
}

fn window_line(label: &str, rates: &PeriodRates) -> String {
    format!(
        "- {label} ({}): attitude {:.2}%, operational {:.2}% over {} evaluations",
        rates.period, rates.attitude_error_rate, rates.operational_error_rate, rates.evaluation_count
    )
}

fn trend_line(label: &str, trend: &Trend) -> String {
    match (trend.recent, trend.baseline) {
        (Some(recent), Some(baseline)) => format!(
            "- {label}: {} ({:.2}% vs baseline {:.2}%, {} periods, slope p={:.3}{})",
            trend.direction.as_str(),
            recent,
            baseline,
            trend.periods,
            trend.p_value.unwrap_or(1.0),
            if trend.is_significant { ", significant" } else { "" }
        ),
        _ => format!("- {label}: {} ({} periods)", trend.direction.as_str(), trend.periods),
    }
}

/// Markdown coaching summary for one agent and period.
pub fn build_report(report: &WeeklyReport, source: ReportSource) -> String {
    let content = &report.content;
    let risk = &content.risk_score;
    let mut output = String::new();

    let _ = writeln!(output, "# QC Coaching Report: {}", report.agent_id);
    let _ = writeln!(
        output,
        "Period {} (generated {}, {})",
        report.period,
        report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        source.as_str()
    );
    let _ = writeln!(output);

    if report.is_no_data() {
        let _ = writeln!(output, "No evaluations recorded for this period.");
        if !content.alerts.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "## Open Alerts");
            for alert in &content.alerts {
                let _ = writeln!(
                    output,
                    "- {} (open since {})",
                    alert.trigger.as_str(),
                    alert.first_seen_period
                );
            }
        }
        return output;
    }

    let _ = writeln!(output, "## Risk");
    let _ = writeln!(
        output,
        "- Tier: {} (score {:.1})",
        risk.tier.as_str(),
        risk.numeric_score
    );
    if let Some(band) = risk.tenure_band {
        let tenure = content.aggregate.tenure_months.unwrap_or_default();
        let _ = writeln!(output, "- Tenure: {:.1} months ({})", tenure, band.as_str());
    }
    if risk.stabilization_delayed {
        let _ = writeln!(output, "- Stabilization is behind the expected ramp");
    }
    let _ = writeln!(output, "{}", rate_line("Attitude", &risk.attitude));
    let _ = writeln!(output, "{}", rate_line("Operational", &risk.operational));
    let _ = writeln!(output, "{}", trend_line("Attitude trend", &content.attitude_trend));
    let _ = writeln!(output, "{}", trend_line("Operational trend", &content.operational_trend));
    if let Some(previous) = &content.previous_period {
        let _ = writeln!(output, "{}", window_line("Previous period", previous));
    }
    if let Some(month) = &content.month_to_date {
        let _ = writeln!(output, "{}", window_line("Month to date", month));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weaknesses");
    if content.weaknesses.is_empty() {
        let _ = writeln!(output, "No categorized errors in {} evaluations.", content.aggregate.evaluation_count);
    } else {
        for weakness in &content.weaknesses {
            let versus_group = match &weakness.group_comparison {
                Some(group) => format!(
                    "; {:.1}% vs group {:.1}% (p={:.3}{})",
                    group.agent_rate,
                    group.group_rate,
                    group.p_value,
                    if group.is_significant { ", significant" } else { "" }
                ),
                None => String::new(),
            };
            let _ = writeln!(
                output,
                "{}. {} ({}): {} errors, {:.0}% of the domain, {:?}{}",
                weakness.rank,
                weakness.display_name,
                weakness.domain.as_str(),
                weakness.count,
                weakness.share * 100.0,
                weakness.severity,
                versus_group
            );
        }
    }

    if !content.top_items.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Top Items");
        for item in &content.top_items {
            let _ = writeln!(output, "- {} ({}): {}", item.label, item.code, item.count);
        }
    }

    let prescription = &content.prescription;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Coaching Plan");
    match &prescription.primary_weakness {
        Some(PrimaryWeakness::Category { display_name, .. }) => {
            let _ = writeln!(output, "Focus: {display_name}");
        }
        Some(PrimaryWeakness::General) => {
            let _ = writeln!(output, "Focus: overall error rate");
        }
        None => {
            let _ = writeln!(output, "No coaching needed this period.");
        }
    }
    for action in &prescription.recommended_actions {
        let _ = writeln!(output, "- [{:?}] {}", action.urgency, action.intervention);
    }
    let _ = writeln!(output, "Follow-up: {:?}", prescription.follow_up);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts");
    if content.alerts.is_empty() {
        let _ = writeln!(output, "No active alerts.");
    } else {
        for alert in &content.alerts {
            let status = match alert.status {
                AlertStatus::New => "new",
                AlertStatus::Continuing => "continuing",
                AlertStatus::Resolving => "resolving",
            };
            let _ = writeln!(
                output,
                "- [{:?}] {} ({}, since {}): {}",
                alert.severity,
                alert.trigger.as_str(),
                status,
                alert.first_seen_period,
                alert.trigger_reason
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pipeline::tests::{record, week};
    use crate::pipeline::Pipeline;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use std::sync::Arc;

    async fn report_for(records: Vec<crate::models::EvaluationRecord>) -> WeeklyReport {
        let pipeline = Pipeline::new(
            Arc::new(EngineConfig::default()),
            Arc::new(InMemoryStore::with_records(records)),
        );
        WeeklyReport {
            agent_id: "a-1".to_string(),
            period: week(0),
            generated_at: Utc::now(),
            config_version: 1,
            content: pipeline.run("a-1", week(0), &[]).await.unwrap(),
        }
    }

    #[tokio::test]
    async fn renders_plan_and_alerts() {
        let records = (0..8)
            .map(|_| record("a-1", week(0), 1.0, &["guide_error", "empathy_error"], 1, 1))
            .collect();
        let output = build_report(&report_for(records).await, ReportSource::Fresh);

        assert!(output.starts_with("# QC Coaching Report: a-1"));
        assert!(output.contains("## Coaching Plan"));
        assert!(output.contains("Focus: "));
        assert!(output.contains("stabilization-delay"));
        assert!(output.contains(", fresh)"));
        assert!(output.contains("## Top Items"));
        assert!(output.contains("- Guideline not followed (guide_error): 8"));
        assert!(output.contains("- Month to date ("));
    }

    #[tokio::test]
    async fn no_data_report_is_short() {
        let output = build_report(&report_for(Vec::new()).await, ReportSource::Cache);
        assert!(output.contains("No evaluations recorded for this period."));
        assert!(!output.contains("## Risk"));
    }
}
