//! Reference data and tunables, loaded once at startup and validated.
//!
//! A missing section in the YAML file falls back to the built-in default for
//! that section, so an organization can override only the cut points or only
//! the action catalog.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CoachingCategory, Domain, RiskTier, TenureBand};

pub const GENERAL_CATEGORY: &str = "general";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("duplicate coaching category id: {0}")]
    DuplicateCategory(String),

    #[error("error code {code} maps to unknown category {category}")]
    UnknownCategory { code: String, category: String },

    #[error("error code {0} is mapped more than once")]
    DuplicateErrorCode(String),

    #[error("error code {0} is used by the evaluation store but has no category mapping")]
    UnmappedErrorCode(String),

    #[error("domain {0} has no mapped error codes")]
    EmptyDomain(&'static str),

    #[error("{0} must be strictly increasing")]
    NonMonotonic(&'static str),

    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("{0} alert thresholds must not loosen as tenure increases")]
    LooseningThreshold(&'static str),

    #[error("action catalog references unknown category {0}")]
    UnknownActionCategory(String),

    #[error("{0} must lie strictly between 0 and 1")]
    OutOfUnitRange(&'static str),

    #[error("trend history of {history} periods cannot fill a baseline of {baseline}")]
    ShortTrendHistory { history: usize, baseline: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCodeMapping {
    pub code: String,
    pub category: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenureBandConfig {
    pub new_hire_below_months: f64,
    pub junior_below_months: f64,
    pub intermediate_below_months: f64,
    pub senior_below_months: f64,
}

impl Default for TenureBandConfig {
    fn default() -> Self {
        Self {
            new_hire_below_months: 3.0,
            junior_below_months: 6.0,
            intermediate_below_months: 12.0,
            senior_below_months: 24.0,
        }
    }
}

impl TenureBandConfig {
    pub fn band_for(&self, tenure_months: f64) -> TenureBand {
        if tenure_months < self.new_hire_below_months {
            TenureBand::NewHire
        } else if tenure_months < self.junior_below_months {
            TenureBand::Junior
        } else if tenure_months < self.intermediate_below_months {
            TenureBand::Intermediate
        } else if tenure_months < self.senior_below_months {
            TenureBand::Senior
        } else {
            TenureBand::Veteran
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkageConfig {
    pub attitude_prior_weight: f64,
    pub operational_prior_weight: f64,
    /// Used when the agent's service group has no evaluations in the period.
    pub default_attitude_prior: f64,
    pub default_operational_prior: f64,
    pub moderate_min_evaluations: u32,
    pub high_min_evaluations: u32,
}

impl Default for ShrinkageConfig {
    fn default() -> Self {
        Self {
            attitude_prior_weight: 10.0,
            operational_prior_weight: 10.0,
            default_attitude_prior: 3.0,
            default_operational_prior: 3.5,
            moderate_min_evaluations: 5,
            high_min_evaluations: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub baseline_periods: usize,
    /// Minimum meaningful change, in rate percentage points.
    pub epsilon: f64,
    pub decay_factor: f64,
    /// Prior periods loaded to build the trend series.
    pub history_periods: usize,
    /// p-value below which the weighted slope counts as significant.
    pub significance_level: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            baseline_periods: 3,
            epsilon: 0.5,
            decay_factor: 0.85,
            history_periods: 4,
            significance_level: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    pub expected_ramp_months: f64,
    /// Combined error rate a new hire is expected to start from.
    pub start_rate: f64,
    pub margin: f64,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            expected_ramp_months: 3.0,
            start_rate: 9.0,
            margin: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandValues {
    pub new_hire: f64,
    pub junior: f64,
    pub intermediate: f64,
    pub senior: f64,
    pub veteran: f64,
}

impl BandValues {
    pub fn get(&self, band: TenureBand) -> f64 {
        match band {
            TenureBand::NewHire => self.new_hire,
            TenureBand::Junior => self.junior,
            TenureBand::Intermediate => self.intermediate,
            TenureBand::Senior => self.senior,
            TenureBand::Veteran => self.veteran,
        }
    }

    fn in_band_order(&self) -> [f64; 5] {
        TenureBand::ALL.map(|band| self.get(band))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCutPoints {
    pub watch: f64,
    pub risk: f64,
    pub critical: f64,
}

impl TierCutPoints {
    pub fn tier_for(&self, score: f64) -> RiskTier {
        if score >= self.critical {
            RiskTier::Critical
        } else if score >= self.risk {
            RiskTier::Risk
        } else if score >= self.watch {
            RiskTier::Watch
        } else {
            RiskTier::Safe
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub attitude_target: f64,
    pub operational_target: f64,
    pub attitude_weight: f64,
    pub operational_weight: f64,
    /// Points a domain contributes when its shrunk rate sits exactly on target.
    pub points_at_target: f64,
    pub worsening_penalty: f64,
    pub improving_credit: f64,
    pub concentration_threshold: f64,
    pub concentration_penalty: f64,
    /// Categorized errors needed before one category can count as dominating.
    pub concentration_min_errors: u32,
    pub tenure_multipliers: BandValues,
    pub tier_cut_points: TierCutPoints,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            attitude_target: 3.3,
            operational_target: 3.9,
            attitude_weight: 0.5,
            operational_weight: 0.5,
            points_at_target: 35.0,
            worsening_penalty: 10.0,
            improving_credit: 10.0,
            concentration_threshold: 0.5,
            concentration_penalty: 10.0,
            concentration_min_errors: 3,
            tenure_multipliers: BandValues {
                new_hire: 1.2,
                junior: 1.1,
                intermediate: 1.0,
                senior: 1.0,
                veteran: 1.05,
            },
            tier_cut_points: TierCutPoints {
                watch: 40.0,
                risk: 60.0,
                critical: 80.0,
            },
        }
    }
}

impl RiskConfig {
    pub fn combined(&self, attitude: f64, operational: f64) -> f64 {
        (self.attitude_weight * attitude + self.operational_weight * operational)
            / (self.attitude_weight + self.operational_weight)
    }

    pub fn combined_target(&self) -> f64 {
        self.combined(self.attitude_target, self.operational_target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaknessConfig {
    /// Category errors per evaluation at which a category reads as weak.
    pub weak_rate: f64,
    pub critical_rate: f64,
    /// p-value below which a category differs from its service group.
    pub significance_level: f64,
    /// Raw error codes listed in the report.
    pub top_items: usize,
}

impl Default for WeaknessConfig {
    fn default() -> Self {
        Self {
            weak_rate: 0.10,
            critical_rate: 0.20,
            significance_level: 0.10,
            top_items: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub attitude_thresholds: BandValues,
    pub operational_thresholds: BandValues,
    pub tier_trigger: RiskTier,
    /// Relative increase of the combined rate over the previous period.
    pub deterioration_ratio: f64,
    /// Evaluations the current period needs before a deterioration alert can fire.
    pub deterioration_min_evaluations: u32,
    /// Consecutive clear periods that drop an alert; the last one removes it.
    pub clear_grace_periods: u32,
    pub critical_multiplier: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            attitude_thresholds: BandValues {
                new_hire: 6.0,
                junior: 5.0,
                intermediate: 4.0,
                senior: 3.5,
                veteran: 3.3,
            },
            operational_thresholds: BandValues {
                new_hire: 7.0,
                junior: 6.0,
                intermediate: 5.0,
                senior: 4.5,
                veteran: 3.9,
            },
            tier_trigger: RiskTier::Risk,
            deterioration_ratio: 0.5,
            deterioration_min_evaluations: 2,
            clear_grace_periods: 2,
            critical_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub category: String,
    pub tier: RiskTier,
    pub interventions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
    pub max_actions: usize,
    /// How long an on-demand read waits on an in-flight generation before computing itself.
    pub lock_wait_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_actions: 3,
            lock_wait_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub version: u32,
    pub categories: Vec<CoachingCategory>,
    pub error_codes: Vec<ErrorCodeMapping>,
    pub tenure_bands: TenureBandConfig,
    pub shrinkage: ShrinkageConfig,
    pub trend: TrendConfig,
    pub ramp: RampConfig,
    pub risk: RiskConfig,
    pub weakness: WeaknessConfig,
    pub alerts: AlertConfig,
    pub actions: Vec<ActionEntry>,
    pub batch: BatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            categories: default_categories(),
            error_codes: default_error_codes(),
            tenure_bands: TenureBandConfig::default(),
            shrinkage: ShrinkageConfig::default(),
            trend: TrendConfig::default(),
            ramp: RampConfig::default(),
            risk: RiskConfig::default(),
            weakness: WeaknessConfig::default(),
            alerts: AlertConfig::default(),
            actions: default_actions(),
            batch: BatchConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut category_ids = BTreeSet::new();
        for category in &self.categories {
            if !category_ids.insert(category.id.as_str()) {
                return Err(ConfigError::DuplicateCategory(category.id.clone()));
            }
        }

        let mut codes = BTreeSet::new();
        for mapping in &self.error_codes {
            if !codes.insert(mapping.code.as_str()) {
                return Err(ConfigError::DuplicateErrorCode(mapping.code.clone()));
            }
            if !category_ids.contains(mapping.category.as_str()) {
                return Err(ConfigError::UnknownCategory {
                    code: mapping.code.clone(),
                    category: mapping.category.clone(),
                });
            }
        }

        for domain in [Domain::Attitude, Domain::Operational] {
            if self.items_in_domain(domain) == 0 {
                return Err(ConfigError::EmptyDomain(domain.as_str()));
            }
        }

        let bands = &self.tenure_bands;
        strictly_increasing(
            &[
                bands.new_hire_below_months,
                bands.junior_below_months,
                bands.intermediate_below_months,
                bands.senior_below_months,
            ],
            "tenure band boundaries",
        )?;

        let cuts = &self.risk.tier_cut_points;
        strictly_increasing(&[cuts.watch, cuts.risk, cuts.critical], "tier cut points")?;

        positive(self.shrinkage.attitude_prior_weight, "attitude prior weight")?;
        positive(self.shrinkage.operational_prior_weight, "operational prior weight")?;
        positive(self.risk.attitude_target, "attitude target")?;
        positive(self.risk.operational_target, "operational target")?;
        positive(
            self.risk.attitude_weight + self.risk.operational_weight,
            "domain weight total",
        )?;
        positive(self.ramp.expected_ramp_months, "expected ramp months")?;
        positive(self.trend.baseline_periods as f64, "trend baseline periods")?;
        positive(self.trend.history_periods as f64, "trend history periods")?;
        if self.trend.history_periods < self.trend.baseline_periods {
            return Err(ConfigError::ShortTrendHistory {
                history: self.trend.history_periods,
                baseline: self.trend.baseline_periods,
            });
        }
        unit_range(self.trend.significance_level, "trend significance level")?;
        unit_range(self.weakness.significance_level, "weakness significance level")?;
        positive(self.weakness.weak_rate, "weak category rate")?;
        strictly_increasing(
            &[self.weakness.weak_rate, self.weakness.critical_rate],
            "weakness severity rates",
        )?;
        positive(self.alerts.clear_grace_periods as f64, "alert clear grace periods")?;
        positive(self.batch.workers as f64, "batch workers")?;
        positive(self.batch.lock_wait_seconds as f64, "interactive lock wait")?;

        non_loosening(&self.alerts.attitude_thresholds, "attitude")?;
        non_loosening(&self.alerts.operational_thresholds, "operational")?;

        for entry in &self.actions {
            if entry.category != GENERAL_CATEGORY && !category_ids.contains(entry.category.as_str())
            {
                return Err(ConfigError::UnknownActionCategory(entry.category.clone()));
            }
        }

        Ok(())
    }

    /// Rejects error codes the evaluation store emits that this config cannot classify.
    pub fn validate_store_codes<'a>(
        &self,
        store_codes: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        for code in store_codes {
            if self.category_for_code(code).is_none() {
                return Err(ConfigError::UnmappedErrorCode(code.to_string()));
            }
        }
        Ok(())
    }

    pub fn category(&self, id: &str) -> Option<&CoachingCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn category_for_code(&self, code: &str) -> Option<&CoachingCategory> {
        self.error_codes
            .iter()
            .find(|m| m.code == code)
            .and_then(|m| self.category(&m.category))
    }

    /// Error opportunities per evaluation in one category.
    pub fn items_in_category(&self, category_id: &str) -> usize {
        self.error_codes
            .iter()
            .filter(|m| m.category == category_id)
            .count()
    }

    pub fn error_code(&self, code: &str) -> Option<&ErrorCodeMapping> {
        self.error_codes.iter().find(|m| m.code == code)
    }

    /// Error opportunities per evaluation in a domain.
    pub fn items_in_domain(&self, domain: Domain) -> usize {
        self.error_codes
            .iter()
            .filter(|m| self.category(&m.category).map(|c| c.domain) == Some(domain))
            .count()
    }

    pub fn code_index(&self) -> HashMap<&str, &CoachingCategory> {
        self.error_codes
            .iter()
            .filter_map(|m| self.category(&m.category).map(|c| (m.code.as_str(), c)))
            .collect()
    }

    pub fn actions_for(&self, category: &str, tier: RiskTier) -> &[String] {
        self.actions
            .iter()
            .find(|entry| entry.category == category && entry.tier == tier)
            .map(|entry| entry.interventions.as_slice())
            .unwrap_or(&[])
    }
}

fn strictly_increasing(values: &[f64], what: &'static str) -> Result<(), ConfigError> {
    if values.windows(2).all(|pair| pair[0] < pair[1]) {
        Ok(())
    } else {
        Err(ConfigError::NonMonotonic(what))
    }
}

fn positive(value: f64, what: &'static str) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive(what))
    }
}

fn unit_range(value: f64, what: &'static str) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange(what))
    }
}

fn non_loosening(values: &BandValues, what: &'static str) -> Result<(), ConfigError> {
    let ordered = values.in_band_order();
    if ordered.windows(2).all(|pair| pair[1] <= pair[0]) {
        Ok(())
    } else {
        Err(ConfigError::LooseningThreshold(what))
    }
}

fn category(id: &str, display_name: &str, domain: Domain) -> CoachingCategory {
    CoachingCategory {
        id: id.to_string(),
        display_name: display_name.to_string(),
        domain,
    }
}

fn default_categories() -> Vec<CoachingCategory> {
    vec![
        category("greeting", "Greeting and etiquette", Domain::Attitude),
        category("empathy", "Empathy and emotional care", Domain::Attitude),
        category("inquiry", "Inquiry discovery and verification", Domain::Operational),
        category("knowledge", "Product knowledge and guidance", Domain::Operational),
        category("processing", "System processing", Domain::Operational),
        category("records", "Records and history keeping", Domain::Operational),
    ]
}

fn default_error_codes() -> Vec<ErrorCodeMapping> {
    [
        ("greeting_error", "greeting", "Missing opening or closing greeting"),
        ("additional_inquiry_error", "greeting", "Missing additional inquiry prompt"),
        ("empathy_error", "empathy", "Missing empathy expression"),
        ("apology_error", "empathy", "Missing apology expression"),
        ("unkind_error", "empathy", "Unkind tone"),
        ("identity_check_error", "inquiry", "Identity verification skipped"),
        ("required_search_error", "inquiry", "Required lookup skipped"),
        ("wrong_guide_error", "knowledge", "Incorrect guidance"),
        ("guide_error", "knowledge", "Guideline not followed"),
        ("process_missing_error", "processing", "System processing missing"),
        ("process_incomplete_error", "processing", "System processing incomplete"),
        ("system_error", "processing", "System operation error"),
        ("id_mapping_error", "processing", "Call or trip id mapping missing"),
        ("history_error", "records", "Consultation history incomplete"),
        ("flag_keyword_error", "records", "Flag or keyword missing"),
        ("consult_type_error", "records", "Consultation type misclassified"),
    ]
    .into_iter()
    .map(|(code, category, label)| ErrorCodeMapping {
        code: code.to_string(),
        category: category.to_string(),
        label: label.to_string(),
    })
    .collect()
}

fn default_actions() -> Vec<ActionEntry> {
    let templates: [(&str, &str, &str); 7] = [
        (
            "greeting",
            "Use the greeting checklist and review one exemplary call per day",
            "One-on-one etiquette coaching with two days of side-by-side monitoring",
        ),
        (
            "empathy",
            "Listen to two exemplary calls daily and collect empathy phrasing",
            "One-on-one emotional care coaching with daily role-play",
        ),
        (
            "inquiry",
            "Use the verification and lookup checklist with a weekly case review",
            "Retrain on the inquiry process with side-by-side monitoring",
        ),
        (
            "knowledge",
            "Study guides for weak consultation types with a weekly misguidance review",
            "One-on-one training on weak consultation types with daily guide quizzes and mentoring",
        ),
        (
            "processing",
            "Use the processing checklist with a weekly audit of processed cases",
            "Retrain on system processing with side-by-side monitoring and daily audits",
        ),
        (
            "records",
            "Review the history-writing guide with a weekly record audit",
            "Retrain on record keeping with focused consultation-type coaching",
        ),
        (
            GENERAL_CATEGORY,
            "Review recent evaluations together and agree on one improvement goal",
            "Daily evaluation review with a supervisor until rates return to target",
        ),
    ];

    let mut actions = Vec::new();
    for (category, weak, critical) in templates {
        actions.push(ActionEntry {
            category: category.to_string(),
            tier: RiskTier::Watch,
            interventions: vec![weak.to_string()],
        });
        actions.push(ActionEntry {
            category: category.to_string(),
            tier: RiskTier::Risk,
            interventions: vec![
                weak.to_string(),
                "Bi-weekly coaching session on the flagged items".to_string(),
            ],
        });
        actions.push(ActionEntry {
            category: category.to_string(),
            tier: RiskTier::Critical,
            interventions: vec![
                critical.to_string(),
                "Weekly progress check with the team lead".to_string(),
            ],
        });
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.items_in_domain(Domain::Attitude), 5);
        assert_eq!(config.items_in_domain(Domain::Operational), 11);
    }

    #[test]
    fn tenure_bands_follow_month_boundaries() {
        let bands = TenureBandConfig::default();
        assert_eq!(bands.band_for(0.0), TenureBand::NewHire);
        assert_eq!(bands.band_for(2.9), TenureBand::NewHire);
        assert_eq!(bands.band_for(3.0), TenureBand::Junior);
        assert_eq!(bands.band_for(11.0), TenureBand::Intermediate);
        assert_eq!(bands.band_for(12.0), TenureBand::Senior);
        assert_eq!(bands.band_for(60.0), TenureBand::Veteran);
    }

    #[test]
    fn thresholds_never_loosen_with_tenure() {
        let config = EngineConfig::default();
        let mut previous = (f64::INFINITY, f64::INFINITY);
        for month in 0..48 {
            let band = config.tenure_bands.band_for(month as f64);
            let current = (
                config.alerts.attitude_thresholds.get(band),
                config.alerts.operational_thresholds.get(band),
            );
            assert!(current.0 <= previous.0);
            assert!(current.1 <= previous.1);
            previous = current;
        }
    }

    #[test]
    fn rejects_unknown_category_mapping() {
        let mut config = EngineConfig::default();
        config.error_codes.push(ErrorCodeMapping {
            code: "courtesy_error".to_string(),
            category: "courtesy".to_string(),
            label: "Courtesy".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn rejects_non_monotonic_cut_points() {
        let mut config = EngineConfig::default();
        config.risk.tier_cut_points.risk = 85.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonMonotonic("tier cut points"))
        );
    }

    #[test]
    fn rejects_loosening_thresholds() {
        let mut config = EngineConfig::default();
        config.alerts.operational_thresholds.veteran = 8.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::LooseningThreshold("operational"))
        );
    }

    #[test]
    fn rejects_inconsistent_windows_and_rates() {
        let mut config = EngineConfig::default();
        config.trend.history_periods = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive("trend history periods"))
        );

        let mut config = EngineConfig::default();
        config.trend.history_periods = 2;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ShortTrendHistory {
                history: 2,
                baseline: 3
            })
        );

        let mut config = EngineConfig::default();
        config.weakness.weak_rate = 0.2;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonMonotonic("weakness severity rates"))
        );

        let mut config = EngineConfig::default();
        config.trend.significance_level = 1.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange("trend significance level"))
        );
    }

    #[test]
    fn zero_lock_wait_is_rejected() {
        let mut config = EngineConfig::default();
        config.batch.lock_wait_seconds = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive("interactive lock wait"))
        );
    }

    #[test]
    fn rejects_store_codes_without_mapping() {
        let config = EngineConfig::default();
        assert!(config
            .validate_store_codes(["greeting_error", "guide_error"])
            .is_ok());
        assert_eq!(
            config.validate_store_codes(["greeting_error", "mystery_error"]),
            Err(ConfigError::UnmappedErrorCode("mystery_error".to_string()))
        );
    }

    #[test]
    fn partial_yaml_overrides_keep_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "version: 3\nrisk:\n  tier_cut_points:\n    watch: 30\n    risk: 50\n    critical: 70\n"
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.risk.tier_cut_points.watch, 30.0);
        assert_eq!(config.risk.attitude_target, 3.3);
        assert_eq!(config.error_codes.len(), 16);
    }

    #[test]
    fn actions_lookup_by_category_and_tier() {
        let config = EngineConfig::default();
        assert_eq!(config.actions_for("empathy", RiskTier::Critical).len(), 2);
        assert!(config.actions_for("empathy", RiskTier::Safe).is_empty());
        assert!(!config.actions_for(GENERAL_CATEGORY, RiskTier::Watch).is_empty());
    }
}
