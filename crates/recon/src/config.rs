use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;

use crate::error::ReconError;
use crate::normalize::title_case;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub root_directory: PathBuf,
    /// Maximum tolerated percentage difference, shared by every system.
    #[serde(alias = "percentage_threshold")]
    pub match_threshold_percent: f64,
    pub systems: BTreeMap<String, SystemConfig>,
    /// Worker threads for per-file normalization. Defaults to available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Normalized source header → canonical column name.
    #[serde(alias = "column_mapping")]
    pub columns: BTreeMap<String, String>,
    pub output_filename: String,
    pub staging_folder: PathBuf,
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub aggregate_functions: Option<BTreeMap<String, AggregateFn>>,
    #[serde(default)]
    pub add_columns: BTreeMap<String, Derivation>,
    #[serde(default)]
    pub ancestor_rule: AncestorRule,
}

impl SystemConfig {
    pub fn output_path(&self) -> PathBuf {
        self.staging_folder.join(&self.output_filename)
    }
}

/// Value source for an `add_columns` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Derivation {
    /// Basename of the practitioner folder.
    #[serde(rename = "folder_name")]
    FolderName,
    /// Segment chosen by the system's [`AncestorRule`].
    #[serde(rename = "parent_folder_before_last", alias = "ancestor_folder")]
    AncestorFolder,
}

/// How the ancestor folder is picked from the practitioner folder path.
///
/// Two layouts exist in the field and neither is the "right" one, so the
/// choice is explicit per system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AncestorRule {
    /// Segment just before the last one; needs more than two segments.
    #[default]
    SecondToLast,
    /// Tenth segment from the end; needs more than ten segments.
    TenthFromLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Median,
}

impl std::fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Mean => write!(f, "mean"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
            Self::Median => write!(f, "median"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconciliationConfig {
    /// External reference (ledger) table. Reconciliation is skipped when unset.
    #[serde(default)]
    pub reference_file: Option<PathBuf>,
    #[serde(default)]
    pub columns: ReconColumns,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconColumns {
    pub reference_key: String,
    pub own_charges: String,
    pub own_payments: String,
    pub own_adjustments: String,
    pub reference_charges: String,
    pub reference_payments: String,
    pub reference_adjustments: String,
}

impl Default for ReconColumns {
    fn default() -> Self {
        Self {
            reference_key: "Matchkey".into(),
            own_charges: "MTDcharges".into(),
            own_payments: "MTDpayments".into(),
            own_adjustments: "EngageAdjustments".into(),
            reference_charges: "Engage_Charges".into(),
            reference_payments: "Engage_Payments".into(),
            reference_adjustments: "Engage_Adjustments".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Every system's summary concatenated, with a `System` column.
    #[serde(default)]
    pub combined_summary: Option<PathBuf>,
    /// Every reconciled row across systems.
    #[serde(default)]
    pub combined_reconciliation: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(input: &str) -> Result<Self, ReconError> {
        let config: PipelineConfig =
            serde_json::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse by file extension: `.json` is JSON, anything else TOML.
    pub fn from_str_for_path(input: &str, path: &Path) -> Result<Self, ReconError> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(input)
        } else {
            Self::from_toml(input)
        }
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if !self.match_threshold_percent.is_finite() || self.match_threshold_percent < 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "match_threshold_percent must be a non-negative number, got {}",
                self.match_threshold_percent
            )));
        }

        if self.systems.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one system is required".into(),
            ));
        }

        if self.workers == Some(0) {
            return Err(ReconError::ConfigValidation("workers must be at least 1".into()));
        }

        for (name, system) in &self.systems {
            if system.columns.is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "system '{name}': columns mapping is empty"
                )));
            }

            if system.output_filename.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "system '{name}': output_filename is empty"
                )));
            }

            if let Some(ref fmt) = system.date_format {
                validate_date_format(fmt).map_err(|msg| {
                    ReconError::ConfigValidation(format!("system '{name}': {msg}"))
                })?;
            }
        }

        Ok(())
    }

    /// Non-fatal findings worth logging before a run.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, system) in &self.systems {
            for key in system.columns.keys() {
                let normalized = title_case(key.trim());
                if &normalized != key {
                    warnings.push(format!(
                        "system '{name}': column '{key}' can never match a normalized header \
                         (headers are trimmed and title-cased; did you mean '{normalized}'?)"
                    ));
                }
            }
            if let Some(ref funcs) = system.aggregate_functions {
                let produced: HashSet<&str> = system
                    .columns
                    .values()
                    .map(String::as_str)
                    .chain(system.add_columns.keys().map(String::as_str))
                    .collect();
                for column in funcs.keys() {
                    if !produced.contains(column.as_str()) {
                        warnings.push(format!(
                            "system '{name}': aggregate column '{column}' is not produced by the mapping"
                        ));
                    }
                }
            }
        }
        warnings
    }

    /// Resolve relative paths against the configuration file's directory.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base_dir.join(&*p);
            }
        };
        resolve(&mut self.root_directory);
        for system in self.systems.values_mut() {
            resolve(&mut system.staging_folder);
        }
        if let Some(ref mut p) = self.reconciliation.reference_file {
            resolve(p);
        }
        if let Some(ref mut p) = self.output.combined_summary {
            resolve(p);
        }
        if let Some(ref mut p) = self.output.combined_reconciliation {
            resolve(p);
        }
    }

    pub fn system_root(&self, system: &str) -> PathBuf {
        self.root_directory.join(system)
    }
}

fn validate_date_format(fmt: &str) -> Result<(), String> {
    if fmt.is_empty() {
        return Err("date_format is empty".into());
    }
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid date_format '{fmt}'"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
