use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use wellness_core::{
    optimize_selection_with_limits, rank, reference_catalog, CandidateItem, RankKey, Record,
    ResourceLimits, SelectionResult, SortDirection, DEFAULT_MAX_STATES,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

const RISK_FACTOR_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskThresholds {
    pub moderate: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { moderate: 40.0, high: 70.0 }
    }
}

impl RiskThresholds {
    /// Bands are closed below: a score equal to a threshold belongs to the
    /// higher band, so 40 is moderate and 70 is high with the defaults.
    #[must_use]
    pub fn classify(&self, score: f64) -> RiskBand {
        if score >= self.high {
            RiskBand::High
        } else if score >= self.moderate {
            RiskBand::Moderate
        } else {
            RiskBand::Low
        }
    }
}

/// Column names the report reads from each record.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ReportFields {
    pub name: String,
    pub department: String,
    pub role: String,
    pub risk_factor: String,
    pub initiative: String,
    pub metrics: Vec<String>,
}

impl Default for ReportFields {
    fn default() -> Self {
        Self {
            name: "name".to_string(),
            department: "department".to_string(),
            role: "role".to_string(),
            risk_factor: "primary_risk_factor".to_string(),
            initiative: "wellness_initiative".to_string(),
            metrics: vec![
                "burnout_level".to_string(),
                "engagement_level".to_string(),
                "job_satisfaction".to_string(),
                "weekly_overtime_hours".to_string(),
                "daily_breaks".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub budget: i64,
    pub risk_field: String,
    pub top_n: usize,
    pub thresholds: RiskThresholds,
    pub fields: ReportFields,
    pub max_states: usize,
    pub catalog: Option<Vec<CandidateItem>>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            budget: 7_000,
            risk_field: "burnout_level".to_string(),
            top_n: 5,
            thresholds: RiskThresholds::default(),
            fields: ReportFields::default(),
            max_states: DEFAULT_MAX_STATES,
            catalog: None,
        }
    }
}

impl ReportConfig {
    /// Check settings that serde cannot express.
    ///
    /// # Errors
    /// Returns an error for non-finite or inverted thresholds, an empty risk
    /// field, or a zero `top_n`.
    pub fn validate(&self) -> Result<()> {
        let RiskThresholds { moderate, high } = self.thresholds;
        if !moderate.is_finite() || !high.is_finite() {
            return Err(anyhow!("risk thresholds MUST be finite numbers"));
        }
        if moderate > high {
            return Err(anyhow!(
                "moderate threshold {moderate} MUST NOT exceed high threshold {high}"
            ));
        }
        if self.risk_field.trim().is_empty() {
            return Err(anyhow!("risk_field MUST be provided"));
        }
        if self.top_n == 0 {
            return Err(anyhow!("top_n MUST be >= 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> Vec<CandidateItem> {
        self.catalog.clone().unwrap_or_else(reference_catalog)
    }

    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits { max_states: self.max_states }
    }
}

/// Load and validate a report configuration file (YAML or JSON).
///
/// # Errors
/// Returns an error when the file cannot be decoded or fails validation.
pub fn load_report_config(path: &Path) -> Result<ReportConfig> {
    let config: ReportConfig = wellness_source::load_document(path)?;
    config.validate().with_context(|| format!("invalid report config {}", path.display()))?;
    Ok(config)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedSubject {
    pub rank: usize,
    pub name: Option<String>,
    pub department: Option<String>,
    pub role: Option<String>,
    pub score: f64,
    pub band: RiskBand,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BandCount {
    pub band: RiskBand,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentSummary {
    pub department: String,
    pub employees: usize,
    pub mean_risk: f64,
    /// Metric name to mean rounded to one decimal, `null` without numeric data.
    pub averages: Map<String, Value>,
}

impl RankKey for DepartmentSummary {
    fn rank_key(&self, field: &str) -> Option<f64> {
        if field == "mean_risk" {
            return Some(self.mean_risk);
        }
        self.averages.get(field).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitiativeSummary {
    pub initiative: String,
    pub employees: usize,
    pub mean_risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestmentPlan {
    pub budget: i64,
    pub total_benefit: u64,
    pub total_cost: u64,
    pub selected: Vec<CandidateItem>,
    pub employees_covered: Option<usize>,
    pub cost_per_employee: Option<f64>,
}

impl InvestmentPlan {
    fn from_selection(
        budget: i64,
        selection: &SelectionResult,
        catalog: &[CandidateItem],
        employees: Option<usize>,
    ) -> Self {
        let cost_per_employee = employees
            .filter(|count| *count > 0)
            .map(|count| round_to(ratio(selection.total_cost, count), 2));
        Self {
            budget,
            total_benefit: selection.total_benefit,
            total_cost: selection.total_cost,
            selected: selection.resolve(catalog).into_iter().cloned().collect(),
            employees_covered: employees,
            cost_per_employee,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WellnessReport {
    pub report_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub employees: usize,
    pub risk_field: String,
    pub thresholds: RiskThresholds,
    pub risk_distribution: Vec<BandCount>,
    pub top_at_risk: Vec<RankedSubject>,
    pub departments: Vec<DepartmentSummary>,
    pub risk_factors: Vec<ValueCount>,
    pub initiatives: Vec<InitiativeSummary>,
    pub plan: Option<InvestmentPlan>,
    pub plan_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankRequest {
    pub records: Vec<Record>,
    pub field: Option<String>,
    #[serde(default = "default_descending")]
    pub descending: bool,
    pub limit: Option<usize>,
}

fn default_descending() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankResponse {
    pub field: String,
    pub direction: SortDirection,
    pub total: usize,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanRequest {
    pub catalog: Option<Vec<CandidateItem>>,
    pub budget: Option<i64>,
    pub max_states: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportRequest {
    pub records: Vec<Record>,
    pub config: Option<ReportConfig>,
}

/// Build the full wellness report for one record population.
///
/// Ranking failures are fatal. Optimizer failures are recorded in
/// `plan_error` and the rest of the report is still produced.
///
/// # Errors
/// Returns an error when the config is invalid or any record lacks a numeric
/// risk field.
pub fn build_report(records: &[Record], config: &ReportConfig) -> Result<WellnessReport> {
    config.validate()?;
    let ranked = rank(records, &config.risk_field, SortDirection::Descending)
        .with_context(|| format!("failed to rank records by {}", config.risk_field))?;
    let scores = ranked
        .iter()
        .map(|record| record.number(&config.risk_field).unwrap_or_default())
        .collect::<Vec<_>>();

    let top_at_risk = ranked
        .iter()
        .zip(&scores)
        .take(config.top_n)
        .enumerate()
        .map(|(index, (record, score))| RankedSubject {
            rank: index + 1,
            name: label_of(record, &config.fields.name),
            department: label_of(record, &config.fields.department),
            role: label_of(record, &config.fields.role),
            score: *score,
            band: config.thresholds.classify(*score),
        })
        .collect();

    let catalog = config.catalog();
    let (plan, plan_error) =
        match optimize_selection_with_limits(&catalog, config.budget, &config.limits()) {
            Ok(selection) => (
                Some(InvestmentPlan::from_selection(
                    config.budget,
                    &selection,
                    &catalog,
                    Some(records.len()),
                )),
                None,
            ),
            Err(err) => {
                tracing::warn!(error = %err, budget = config.budget, "investment plan skipped");
                (None, Some(err.to_string()))
            }
        };

    let report = WellnessReport {
        report_id: compute_report_id(records, config)?,
        generated_at: OffsetDateTime::now_utc(),
        employees: records.len(),
        risk_field: config.risk_field.clone(),
        thresholds: config.thresholds,
        risk_distribution: risk_distribution(&scores, &config.thresholds),
        top_at_risk,
        departments: department_summaries(records, config)?,
        risk_factors: value_counts(records, &config.fields.risk_factor, RISK_FACTOR_LIMIT),
        initiatives: initiative_summaries(records, config),
        plan,
        plan_error,
    };
    tracing::info!(
        report_id = %report.report_id,
        employees = report.employees,
        planned = report.plan.is_some(),
        "built wellness report"
    );
    Ok(report)
}

fn risk_distribution(scores: &[f64], thresholds: &RiskThresholds) -> Vec<BandCount> {
    let mut counts = BTreeMap::from([(RiskBand::Low, 0), (RiskBand::Moderate, 0), (RiskBand::High, 0)]);
    for score in scores {
        *counts.entry(thresholds.classify(*score)).or_default() += 1;
    }
    counts.into_iter().rev().map(|(band, count)| BandCount { band, count }).collect()
}

/// Text form of a categorical cell. Numeric codes and booleans count too.
fn label_of(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(text) => Some(text.clone()),
        value @ (Value::Number(_) | Value::Bool(_)) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Group records by the label in `field`, in first-seen order.
fn group_by<'a>(records: &'a [Record], field: &str) -> Vec<(String, Vec<&'a Record>)> {
    let mut positions = BTreeMap::new();
    let mut groups: Vec<(String, Vec<&Record>)> = Vec::new();
    for record in records {
        let Some(value) = label_of(record, field) else {
            continue;
        };
        let position = *positions.entry(value.clone()).or_insert_with(|| {
            groups.push((value, Vec::new()));
            groups.len() - 1
        });
        groups[position].1.push(record);
    }
    groups
}

fn mean_of(records: &[&Record], field: &str) -> Option<f64> {
    let values = records.iter().filter_map(|record| record.number(field)).collect::<Vec<_>>();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / usize_to_f64(values.len()))
}

fn department_summaries(records: &[Record], config: &ReportConfig) -> Result<Vec<DepartmentSummary>> {
    let summaries = group_by(records, &config.fields.department)
        .into_iter()
        .map(|(department, members)| {
            let averages = config
                .fields
                .metrics
                .iter()
                .map(|metric| {
                    let mean = mean_of(&members, metric).map(|mean| round_to(mean, 1));
                    (metric.clone(), mean.map_or(Value::Null, Value::from))
                })
                .collect::<Map<_, _>>();
            DepartmentSummary {
                department,
                employees: members.len(),
                mean_risk: mean_of(&members, &config.risk_field)
                    .map(|mean| round_to(mean, 1))
                    .unwrap_or_default(),
                averages,
            }
        })
        .collect::<Vec<_>>();

    let ordered = rank(&summaries, "mean_risk", SortDirection::Descending)
        .context("failed to order department summaries")?;
    Ok(ordered.into_iter().cloned().collect())
}

fn value_counts(records: &[Record], field: &str, limit: usize) -> Vec<ValueCount> {
    let mut counts = group_by(records, field)
        .into_iter()
        .map(|(value, members)| ValueCount { value, count: members.len() })
        .collect::<Vec<_>>();
    counts.sort_by(|lhs, rhs| rhs.count.cmp(&lhs.count));
    counts.truncate(limit);
    counts
}

fn initiative_summaries(records: &[Record], config: &ReportConfig) -> Vec<InitiativeSummary> {
    group_by(records, &config.fields.initiative)
        .into_iter()
        .map(|(initiative, members)| InitiativeSummary {
            initiative,
            employees: members.len(),
            mean_risk: mean_of(&members, &config.risk_field)
                .map(|mean| round_to(mean, 1))
                .unwrap_or_default(),
        })
        .collect()
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: usize) -> f64 {
    numerator as f64 / usize_to_f64(denominator)
}

fn compute_report_id(records: &[Record], config: &ReportConfig) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(
        serde_json::to_string(config).context("failed to serialize report config")?.as_bytes(),
    );
    hasher.update(records.len().to_string().as_bytes());

    let mut rows = records
        .iter()
        .map(|record| serde_json::to_string(record).context("failed to serialize record"))
        .collect::<Result<Vec<_>>>()?;
    rows.sort_unstable();
    for row in rows {
        hasher.update(row.as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    Ok(format!("rpt_{}", &digest_hex[..16]))
}

#[derive(Debug, Clone, Default)]
pub struct WellnessApi {
    config: ReportConfig,
}

impl WellnessApi {
    #[must_use]
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    /// Build an API over a configuration file.
    ///
    /// # Errors
    /// Returns an error when the file cannot be loaded or is invalid.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::new(load_report_config(path)?))
    }

    #[must_use]
    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> Vec<CandidateItem> {
        self.config.catalog()
    }

    /// Rank records by `field` (the configured risk field by default).
    ///
    /// # Errors
    /// Returns an error when any record lacks a numeric value for the field.
    pub fn rank(&self, request: RankRequest) -> Result<RankResponse> {
        let field = request.field.unwrap_or_else(|| self.config.risk_field.clone());
        let direction = SortDirection::from_descending(request.descending);
        let ranked = rank(&request.records, &field, direction)
            .with_context(|| format!("failed to rank records by {field}"))?;
        let limit = request.limit.unwrap_or(ranked.len());

        Ok(RankResponse {
            field,
            direction,
            total: ranked.len(),
            records: ranked.into_iter().take(limit).cloned().collect(),
        })
    }

    /// Rank the records stored in a CSV file.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or ranking fails.
    pub fn rank_file(
        &self,
        path: &Path,
        field: Option<String>,
        descending: bool,
        limit: Option<usize>,
    ) -> Result<RankResponse> {
        let records = wellness_source::load_records(path)?;
        self.rank(RankRequest { records, field, descending, limit })
    }

    /// Requested table limits never exceed the configured ceiling.
    fn capped_limits(&self, requested: Option<usize>) -> ResourceLimits {
        let ceiling = self.config.max_states;
        ResourceLimits { max_states: requested.map_or(ceiling, |max_states| max_states.min(ceiling)) }
    }

    /// Select the best intervention subset for a budget.
    ///
    /// # Errors
    /// Returns an error for negative budgets, duplicate labels, or oversized
    /// selection tables.
    pub fn plan(&self, request: PlanRequest) -> Result<InvestmentPlan> {
        let catalog = request.catalog.unwrap_or_else(|| self.config.catalog());
        let budget = request.budget.unwrap_or(self.config.budget);
        let limits = self.capped_limits(request.max_states);

        let selection = optimize_selection_with_limits(&catalog, budget, &limits)
            .with_context(|| format!("failed to plan investments for budget {budget}"))?;
        Ok(InvestmentPlan::from_selection(budget, &selection, &catalog, None))
    }

    /// Build a report with the request's config, or this API's config.
    ///
    /// # Errors
    /// See [`build_report`].
    pub fn report(&self, request: ReportRequest) -> Result<WellnessReport> {
        match request.config {
            Some(mut config) => {
                config.max_states = self.capped_limits(Some(config.max_states)).max_states;
                build_report(&request.records, &config)
            }
            None => build_report(&request.records, &self.config),
        }
    }

    /// Build a report from the records in a CSV file.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or the report fails.
    pub fn report_file(&self, path: &Path) -> Result<WellnessReport> {
        let records = wellness_source::load_records(path)?;
        build_report(&records, &self.config)
    }
}
