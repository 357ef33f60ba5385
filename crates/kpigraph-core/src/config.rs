//! Configuration schema (kpigraph.toml)
//!
//! Everything the pipeline recognizes is data: the metric taxonomy, the
//! entity suffix strip-list, per-metric value rules and the edge cadence.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use crate::diagnostic::{DiagnosticCode, Severity};

/// A canonical metric and the substrings that identify it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Canonical metric name (e.g., "sales_revenue")
    pub name: String,

    /// Case-insensitive, accent-insensitive alias substrings
    pub aliases: Vec<String>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            name: name.into(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Ordered metric taxonomy; earlier entries win equal-length ties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    pub metrics: Vec<MetricDefinition>,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            metrics: vec![
                MetricDefinition::new("sales_revenue", &["sales revenue", "revenue", "turnover"]),
                MetricDefinition::new("vehicle_sales", &["vehicle sales", "unit sales", "sales"]),
                MetricDefinition::new("operating_result", &["operating result", "operating profit", "profit"]),
                MetricDefinition::new("production", &["production", "produced", "manufactured"]),
                MetricDefinition::new("deliveries", &["deliveries", "delivered"]),
                MetricDefinition::new("return_on_sales", &["return on sales", "operating return", "margin"]),
                MetricDefinition::new("vehicle_production", &["vehicle production", "car production", "auto production"]),
                MetricDefinition::new("brand_sales", &["brand sales", "model sales"]),
                MetricDefinition::new("financial_performance", &["financial performance", "financial results"]),
            ],
        }
    }
}

/// Entity key normalization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Corporate suffixes removed from the end of entity labels
    pub strip_suffixes: Vec<String>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            strip_suffixes: ["AG", "Group", "SE", "GmbH", "Inc", "Ltd", "plc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Header resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Smallest 4-digit token accepted as a fiscal year
    pub min_year: i32,

    /// Largest 4-digit token accepted as a fiscal year
    pub max_year: i32,

    /// Blank upper-header cells inherit the label on their left
    pub fill_merged_cells: bool,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            min_year: 1990,
            max_year: 2100,
            fill_merged_cells: true,
        }
    }
}

impl HeaderConfig {
    pub fn is_plausible_year(&self, year: i32) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }
}

/// Cell value parsing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueConfig {
    /// Cell texts meaning "no value reported"
    pub missing_markers: Vec<String>,

    /// Words and symbols recognized as units
    pub unit_keywords: Vec<String>,
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            missing_markers: ["–", "—", "-", "−", "x", "n/a", "n.a.", "...", "…"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            unit_keywords: [
                "thousand", "million", "billion", "mn", "bn", "units", "vehicles", "€", "$", "£", "%",
                "percent", "eur", "usd",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ValueConfig {
    /// Check a trimmed cell against the missing-value markers
    pub fn is_missing_marker(&self, text: &str) -> bool {
        self.missing_markers
            .iter()
            .any(|marker| marker.eq_ignore_ascii_case(text))
    }
}

/// Expected shape of a metric's values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueRule {
    /// Magnitude between -100 and 100
    Percent,

    /// Non-negative whole number
    Count,

    /// Magnitude >= 0
    NonNegative,

    /// Magnitude within optional bounds (inclusive)
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },

    /// Raw cell text must match a regular expression
    Pattern { pattern: String },
}

/// When temporal edges are recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCadence {
    /// After every `add` batch
    #[default]
    PerBatch,

    /// Once, when the builder is finished
    Deferred,
}

/// Graph building settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub edge_cadence: EdgeCadence,
}

/// Denominator used for the consistency rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    /// valid / (valid + invalid) over every examined node; nodes without an
    /// applicable rule count as valid
    #[default]
    AllNodes,

    /// Only nodes with at least one applicable rule enter the denominator
    RuleCovered,
}

/// Semantic verifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub rate_basis: RateBasis,

    /// Years a node may lie after its evidence year
    pub temporal_tolerance_years: u32,

    /// Years a comparative column may lie before its evidence year
    pub comparative_years: u32,

    /// Whether a temporal mismatch makes the node invalid (it is always reported)
    pub temporal_mismatch_invalid: bool,

    /// Fall back to a year embedded in the table id (e.g. "VW2019_T4e9153")
    pub derive_year_from_table_id: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            rate_basis: RateBasis::AllNodes,
            temporal_tolerance_years: 0,
            comparative_years: 5,
            temporal_mismatch_invalid: true,
            derive_year_from_table_id: true,
        }
    }
}

/// Severity threshold overrides for specific diagnostic codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of diagnostic code to severity override
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl Default for SeverityThreshold {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }
}

impl SeverityThreshold {
    /// Get severity for a diagnostic code, or default
    pub fn get_severity(&self, code: DiagnosticCode, default: Severity) -> Severity {
        self.overrides
            .get(code.as_str())
            .copied()
            .unwrap_or(default)
    }

    /// Set severity override for a code
    pub fn set_override(&mut self, code: DiagnosticCode, severity: Severity) {
        self.overrides.insert(code.as_str().to_string(), severity);
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Metric taxonomy
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    /// Entity normalization
    #[serde(default)]
    pub entities: EntityConfig,

    /// Header resolution
    #[serde(default)]
    pub headers: HeaderConfig,

    /// Value parsing
    #[serde(default)]
    pub values: ValueConfig,

    /// Per-metric value rules, keyed by canonical metric name
    #[serde(default = "default_rules")]
    pub rules: BTreeMap<String, ValueRule>,

    /// Graph building
    #[serde(default)]
    pub graph: GraphConfig,

    /// Verification
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Severity thresholds
    #[serde(default)]
    pub severity: SeverityThreshold,
}

fn default_rules() -> BTreeMap<String, ValueRule> {
    let mut rules = BTreeMap::new();
    rules.insert("return_on_sales".to_string(), ValueRule::Percent);
    rules.insert("deliveries".to_string(), ValueRule::NonNegative);
    rules.insert("production".to_string(), ValueRule::NonNegative);
    rules.insert("vehicle_sales".to_string(), ValueRule::NonNegative);
    rules
}

impl Default for Config {
    fn default() -> Self {
        Self {
            taxonomy: TaxonomyConfig::default(),
            entities: EntityConfig::default(),
            headers: HeaderConfig::default(),
            values: ValueConfig::default(),
            rules: default_rules(),
            graph: GraphConfig::default(),
            verifier: VerifierConfig::default(),
            severity: SeverityThreshold::default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.headers.min_year > self.headers.max_year {
            return Err(ConfigError::InvalidValue(format!(
                "headers.min_year ({}) is greater than headers.max_year ({})",
                self.headers.min_year, self.headers.max_year
            )));
        }

        for metric in &self.taxonomy.metrics {
            if metric.name.contains(crate::observation::NODE_ID_SEPARATOR) {
                return Err(ConfigError::InvalidValue(format!(
                    "taxonomy metric '{}' contains '{}'",
                    metric.name,
                    crate::observation::NODE_ID_SEPARATOR
                )));
            }
            if metric.aliases.iter().any(|alias| alias.trim().is_empty()) {
                return Err(ConfigError::InvalidValue(format!(
                    "taxonomy metric '{}' has an empty alias",
                    metric.name
                )));
            }
        }

        for (metric, rule) in &self.rules {
            match rule {
                ValueRule::Pattern { pattern } => {
                    regex::Regex::new(pattern).map_err(|e| {
                        ConfigError::InvalidValue(format!("rules.{}: bad pattern: {}", metric, e))
                    })?;
                }
                ValueRule::Range { min: Some(min), max: Some(max) } if min > max => {
                    return Err(ConfigError::InvalidValue(format!(
                        "rules.{}: min ({}) is greater than max ({})",
                        metric, min, max
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Severity for a code after configured overrides
    pub fn severity_for(&self, code: DiagnosticCode) -> Severity {
        self.severity.get_severity(code, code.default_severity())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}
