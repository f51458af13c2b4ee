use crate::config::{EngineConfig, GENERAL_CATEGORY};
use crate::models::{
    CoachingPrescription, Domain, FollowUp, PrimaryWeakness, RecommendedAction, RiskScore,
    RiskTier, TargetMetric, Urgency, WeaknessAssessment,
};

/// Builds the action plan for one agent and period.
///
/// Actions come from the configured catalog for (category, tier), walking the
/// ranked weaknesses in order and stopping at `batch.max_actions`.
pub fn prescribe(
    risk: &RiskScore,
    weaknesses: &[WeaknessAssessment],
    config: &EngineConfig,
) -> CoachingPrescription {
    let urgency = Urgency::from(risk.tier);

    let primary_weakness = match weaknesses.first() {
        Some(top) => Some(PrimaryWeakness::Category {
            category_id: top.category_id.clone(),
            display_name: top.display_name.clone(),
        }),
        None if risk.tier != RiskTier::Safe => Some(PrimaryWeakness::General),
        None => None,
    };

    let mut recommended_actions = Vec::new();
    for weakness in weaknesses {
        let target_metric = match weakness.domain {
            Domain::Attitude => TargetMetric::AttitudeErrorRate,
            Domain::Operational => TargetMetric::OperationalErrorRate,
        };
        for intervention in config.actions_for(&weakness.category_id, risk.tier) {
            recommended_actions.push(RecommendedAction {
                category_id: weakness.category_id.clone(),
                target_metric,
                intervention: intervention.clone(),
                urgency,
            });
        }
    }

    if primary_weakness == Some(PrimaryWeakness::General) {
        for intervention in config.actions_for(GENERAL_CATEGORY, risk.tier) {
            recommended_actions.push(RecommendedAction {
                category_id: GENERAL_CATEGORY.to_string(),
                target_metric: TargetMetric::CombinedErrorRate,
                intervention: intervention.clone(),
                urgency,
            });
        }
    }

    recommended_actions.truncate(config.batch.max_actions);

    CoachingPrescription {
        agent_id: risk.agent_id.clone(),
        period: risk.period,
        tier: risk.tier,
        primary_weakness,
        recommended_actions,
        urgency,
        follow_up: FollowUp::from(risk.tier),
    }
}
