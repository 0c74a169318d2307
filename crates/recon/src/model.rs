use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

/// Canonical practitioner column every normalized row carries.
pub const PRACTITIONER_COLUMN: &str = "Practitioner Name";

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// A single typed cell as read from (or written to) a tabular file.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the cell. Text is accepted when it parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) if !n.is_nan() => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
            _ => None,
        }
    }

    /// String used when the cell takes part in a join key.
    pub fn to_key_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(s) => f.write_str(s),
            // Integers without decimals
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Self::DateTime(dt) => {
                if dt.num_seconds_from_midnight() == 0 && dt.nanosecond() == 0 {
                    write!(f, "{}", dt.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S"))
                }
            }
        }
    }
}

/// Header row plus data rows. Rows may be shorter than the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

static EMPTY_CELL: CellValue = CellValue::Empty;

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Spreadsheet,
    Csv,
    Tsv,
}

impl FileKind {
    /// Allow-listed extensions. Anything else is ignored by the scanner.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            _ => None,
        }
    }
}

/// One candidate source file found under a practitioner folder.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub path: PathBuf,
    pub practitioner_folder: String,
    pub ancestor_folder: Option<String>,
    pub kind: FileKind,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// A row restricted to canonical columns.
///
/// A column missing from `values` was absent from the source file; a column
/// mapped to `CellValue::Empty` was present but null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRow {
    pub values: BTreeMap<String, CellValue>,
}

impl NormalizedRow {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.values.get(column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn practitioner(&self) -> Option<&CellValue> {
        self.get(PRACTITIONER_COLUMN)
    }
}

/// Canonical columns of one file after the mapping intersection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSchema {
    /// (normalized source header, canonical name) pairs that survived.
    pub present: Vec<(String, String)>,
    /// Mapping keys the file did not carry.
    pub missing: Vec<String>,
    /// Derived columns injected after renaming.
    pub derived: Vec<String>,
}

impl FileSchema {
    /// Output column order for this file.
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.present.iter().map(|(_, c)| c.clone()).collect();
        for d in &self.derived {
            if !cols.contains(d) {
                cols.push(d.clone());
            }
        }
        cols
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub file: FileRef,
    pub schema: FileSchema,
    pub rows: Vec<NormalizedRow>,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PeriodColumn {
    DatePost,
    Month,
}

impl PeriodColumn {
    /// Priority order: "Date Post" wins over "Month".
    pub const PRIORITY: [PeriodColumn; 2] = [PeriodColumn::DatePost, PeriodColumn::Month];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DatePost => "Date Post",
            Self::Month => "Month",
        }
    }

    /// First period column (by priority) contained in `columns`.
    pub fn detect<S: AsRef<str>>(columns: &[S]) -> Option<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|p| columns.iter().any(|c| c.as_ref() == p.name()))
    }
}

impl fmt::Display for PeriodColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One output row of the standardized summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryRow {
    pub values: BTreeMap<String, CellValue>,
}

impl SummaryRow {
    pub fn get(&self, column: &str) -> &CellValue {
        self.values.get(column).unwrap_or(&EMPTY_CELL)
    }
}

/// Standardized summary for one system, in output column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    pub columns: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn period_column(&self) -> Option<PeriodColumn> {
        PeriodColumn::detect(&self.columns)
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.columns.clone());
        for row in &self.rows {
            table
                .rows
                .push(self.columns.iter().map(|c| row.get(c).clone()).collect());
        }
        table
    }

    /// Rebuild a summary from a table read back from the staging area.
    pub fn from_table(table: &Table) -> Self {
        let rows = (0..table.row_count())
            .map(|r| SummaryRow {
                values: table
                    .headers
                    .iter()
                    .enumerate()
                    .map(|(c, h)| (h.clone(), table.cell(r, c).clone()))
                    .collect(),
            })
            .collect();
        Self {
            columns: table.headers.clone(),
            rows,
        }
    }
}

/// Where the per-column reductions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionSource {
    Configured,
    DefaultSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassThroughReason {
    /// Neither period column exists.
    NoPeriodColumn,
    /// Grouping by "Date Post" without configured aggregate functions.
    UnconfiguredDatePost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AggregationMode {
    Grouped {
        period: PeriodColumn,
        reductions: ReductionSource,
    },
    PassThrough {
        reason: PassThroughReason,
    },
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub summary: SummaryTable,
    pub mode: AggregationMode,
    /// Rows left out of grouping because the practitioner or period was null.
    pub rows_without_key: usize,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Charges / payments / adjustments triple. `None` means missing or non-numeric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub charges: Option<f64>,
    pub payments: Option<f64>,
    pub adjustments: Option<f64>,
}

impl Metrics {
    /// Names of the metrics that are `None`.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("charges", self.charges),
            ("payments", self.payments),
            ("adjustments", self.adjustments),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentages {
    pub charges: f64,
    pub payments: f64,
    pub adjustments: f64,
}

impl Percentages {
    pub fn max(&self) -> f64 {
        self.charges.max(self.payments).max(self.adjustments)
    }
}

/// One ledger-side row of the external reference table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceRow {
    pub match_key: String,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStatus {
    Match,
    Mismatch,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "Match"),
            Self::Mismatch => write!(f, "Mismatch"),
        }
    }
}

/// Differences for one own/reference pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub diff: Metrics,
    pub diff_pct: Percentages,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRow {
    pub system: String,
    pub concat_key: String,
    pub own: Metrics,
    pub reference: Metrics,
    pub diff: Metrics,
    pub diff_pct: Percentages,
    pub match_status: MatchStatus,
    /// Left empty for manual review.
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconSummary {
    pub total: usize,
    pub matched: usize,
    pub mismatched: usize,
    /// Joined rows with an own-side metric missing. Those metrics compare
    /// as a zero percentage, so a Match here is not a confirmed match.
    pub incomplete: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SystemStatus {
    Completed,
    NoData,
    Failed { kind: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Completed(ReconSummary),
    Skipped { kind: String, reason: String },
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemReport {
    pub name: String,
    pub status: SystemStatus,
    pub files_scanned: usize,
    pub files_normalized: usize,
    pub skipped: Vec<SkippedFile>,
    pub rows_normalized: usize,
    pub rows_without_key: usize,
    pub summary_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
    pub reconciliation: ReconciliationOutcome,
}

impl SystemReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SystemStatus::Completed,
            files_scanned: 0,
            files_normalized: 0,
            skipped: Vec::new(),
            rows_normalized: 0,
            rows_without_key: 0,
            summary_rows: 0,
            aggregation: None,
            summary_path: None,
            reconciliation: ReconciliationOutcome::NotConfigured,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub engine_version: String,
    pub run_at: String,
    pub match_threshold_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub meta: RunMeta,
    pub systems: Vec<SystemReport>,
    pub reconciliation: ReconSummary,
    pub outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_errors: Vec<String>,
    #[serde(skip)]
    pub reconciled: Vec<ReconciledRow>,
}
