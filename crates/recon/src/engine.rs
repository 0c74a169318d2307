use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate_records, union_columns};
use crate::config::{PipelineConfig, SystemConfig};
use crate::error::ReconError;
use crate::evidence::compute_summary;
use crate::model::{
    CellValue, FileKind, FileRef, NormalizedFile, ReconSummary, ReconciledRow,
    ReconciliationOutcome, ReferenceRow, RunMeta, RunReport, SkippedFile, SummaryTable,
    SystemReport, SystemStatus, Table,
};
use crate::normalize::normalize_file;
use crate::reconcile::{load_reference, reconcile, reconciled_table};
use crate::scan::scan_system;
use crate::store::TableStore;

/// Reference table state, resolved once per run.
enum Reference {
    NotConfigured,
    Loaded(Vec<ReferenceRow>),
    Failed(ReconError),
}

/// Everything one system produced, merged into the run report by the caller.
struct SystemOutcome {
    report: SystemReport,
    summary: Option<SummaryTable>,
    reconciled: Vec<ReconciledRow>,
    outputs: Vec<PathBuf>,
    output_errors: Vec<String>,
}

/// Run the whole pipeline: every system is scanned, normalized, aggregated,
/// written to its staging folder and reconciled against the reference table.
///
/// Only configuration errors fail the run; everything else is recorded in
/// the report at the scope it happened.
pub fn run(config: &PipelineConfig, store: &dyn TableStore) -> Result<RunReport, ReconError> {
    config.validate()?;
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let reference = load_reference_table(config, store);
    let pool = build_pool(config.workers);

    let mut outcomes = Vec::with_capacity(config.systems.len());
    for (name, system) in &config.systems {
        let root = config.system_root(name);
        info!(system = %name, root = %root.display(), "processing system");
        let outcome = run_system(name, system, &root, config, store, pool.as_ref(), &reference);
        info!(
            system = %name,
            files = outcome.report.files_normalized,
            skipped = outcome.report.skipped.len(),
            summary_rows = outcome.report.summary_rows,
            "system finished"
        );
        outcomes.push(outcome);
    }

    let mut report = RunReport {
        meta: RunMeta {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            match_threshold_percent: config.match_threshold_percent,
        },
        systems: Vec::new(),
        reconciliation: ReconSummary::default(),
        outputs: Vec::new(),
        output_errors: Vec::new(),
        reconciled: Vec::new(),
    };

    let mut summaries: Vec<(String, SummaryTable)> = Vec::new();
    for outcome in outcomes {
        if let ReconciliationOutcome::Completed(ref s) = outcome.report.reconciliation {
            report.reconciliation.absorb(s);
        }
        if let Some(summary) = outcome.summary {
            summaries.push((outcome.report.name.clone(), summary));
        }
        report.outputs.extend(outcome.outputs);
        report.output_errors.extend(outcome.output_errors);
        report.reconciled.extend(outcome.reconciled);
        report.systems.push(outcome.report);
    }

    if let Some(ref path) = config.output.combined_summary {
        let table = combined_summary_table(&summaries);
        write_output(store, path, &table, &mut report.outputs, &mut report.output_errors);
    }
    if let Some(ref path) = config.output.combined_reconciliation {
        let table = reconciled_table(&report.reconciled, &config.reconciliation.columns);
        write_output(store, path, &table, &mut report.outputs, &mut report.output_errors);
    }

    info!(
        reconciled = report.reconciliation.total,
        matched = report.reconciliation.matched,
        mismatched = report.reconciliation.mismatched,
        incomplete = report.reconciliation.incomplete,
        "run finished"
    );
    Ok(report)
}

fn build_pool(workers: Option<usize>) -> Option<ThreadPool> {
    // 0 lets rayon pick the available parallelism.
    match rayon::ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .thread_name(|i| format!("ledgercheck-normalize-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!(error = %e, "could not start worker pool; normalizing sequentially");
            None
        }
    }
}

fn load_reference_table(config: &PipelineConfig, store: &dyn TableStore) -> Reference {
    let Some(ref path) = config.reconciliation.reference_file else {
        return Reference::NotConfigured;
    };
    let loaded = read_reference(path, store)
        .and_then(|table| load_reference(&table, &config.reconciliation.columns));
    match loaded {
        Ok(rows) => {
            info!(path = %path.display(), rows = rows.len(), "reference table loaded");
            Reference::Loaded(rows)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "reference table unusable; reconciliation skipped");
            Reference::Failed(e)
        }
    }
}

fn read_reference(path: &Path, store: &dyn TableStore) -> Result<Table, ReconError> {
    let kind = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FileKind::from_extension)
        .ok_or_else(|| ReconError::Reference {
            path: path.to_path_buf(),
            message: "unsupported file type".into(),
        })?;
    store
        .read_table(path, kind)
        .map_err(|message| ReconError::Reference {
            path: path.to_path_buf(),
            message,
        })
}

fn run_system(
    name: &str,
    system: &SystemConfig,
    root: &Path,
    config: &PipelineConfig,
    store: &dyn TableStore,
    pool: Option<&ThreadPool>,
    reference: &Reference,
) -> SystemOutcome {
    let mut outcome = SystemOutcome {
        report: SystemReport::new(name),
        summary: None,
        reconciled: Vec::new(),
        outputs: Vec::new(),
        output_errors: Vec::new(),
    };

    let files = match collect_files(root, system) {
        Ok(files) => files,
        Err(e) => {
            error!(system = %name, error = %e, "system skipped");
            outcome.report.status = SystemStatus::Failed {
                kind: e.kind().to_string(),
                error: e.to_string(),
            };
            outcome.report.reconciliation = skipped(&e);
            return outcome;
        }
    };
    outcome.report.files_scanned = files.len();

    let mut normalized: Vec<NormalizedFile> = Vec::new();
    for (file, result) in files.iter().zip(normalize_all(&files, system, store, pool)) {
        match result {
            Ok(n) => normalized.push(n),
            Err(e) => {
                warn!(system = %name, path = %file.path.display(), error = %e, "file skipped");
                outcome.report.skipped.push(SkippedFile {
                    path: file.path.clone(),
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    outcome.report.files_normalized = normalized.len();
    outcome.report.rows_normalized = normalized.iter().map(|f| f.rows.len()).sum();

    if outcome.report.rows_normalized == 0 {
        let e = ReconError::NoData {
            system: name.to_string(),
        };
        warn!(system = %name, error = %e, "nothing to summarize");
        outcome.report.status = SystemStatus::NoData;
        outcome.report.reconciliation = skipped(&e);
        return outcome;
    }

    let columns = union_columns(&normalized);
    let rows: Vec<_> = normalized.into_iter().flat_map(|f| f.rows).collect();
    let aggregation = aggregate_records(&columns, &rows, system);
    outcome.report.rows_without_key = aggregation.rows_without_key;
    outcome.report.summary_rows = aggregation.summary.rows.len();
    outcome.report.aggregation = Some(aggregation.mode);

    let summary_path = system.output_path();
    let before = outcome.outputs.len();
    write_output(
        store,
        &summary_path,
        &aggregation.summary.to_table(),
        &mut outcome.outputs,
        &mut outcome.output_errors,
    );
    if outcome.outputs.len() > before {
        outcome.report.summary_path = Some(summary_path);
    }

    outcome.report.reconciliation = match reference {
        Reference::NotConfigured => ReconciliationOutcome::NotConfigured,
        Reference::Failed(e) => skipped(e),
        Reference::Loaded(reference_rows) => match reconcile(
            name,
            &aggregation.summary,
            reference_rows,
            &config.reconciliation.columns,
            config.match_threshold_percent,
        ) {
            Ok(rows) => {
                let summary = compute_summary(&rows);
                info!(
                    system = %name,
                    joined = summary.total,
                    matched = summary.matched,
                    "reconciliation complete"
                );
                outcome.reconciled = rows;
                ReconciliationOutcome::Completed(summary)
            }
            Err(e) => {
                warn!(system = %name, error = %e, "reconciliation skipped");
                skipped(&e)
            }
        },
    };

    outcome.summary = Some(aggregation.summary);
    outcome
}

fn skipped(e: &ReconError) -> ReconciliationOutcome {
    ReconciliationOutcome::Skipped {
        kind: e.kind().to_string(),
        reason: e.to_string(),
    }
}

/// Drain the scan; a folder listing failure aborts the system.
fn collect_files(root: &Path, system: &SystemConfig) -> Result<Vec<FileRef>, ReconError> {
    scan_system(root, system.ancestor_rule)?.collect()
}

/// Normalize every file, in parallel when a pool is available. Results come
/// back in scan order.
fn normalize_all(
    files: &[FileRef],
    system: &SystemConfig,
    store: &dyn TableStore,
    pool: Option<&ThreadPool>,
) -> Vec<Result<NormalizedFile, ReconError>> {
    match pool {
        Some(pool) => pool.install(|| {
            files
                .par_iter()
                .map(|f| normalize_file(f, system, store))
                .collect()
        }),
        None => files.iter().map(|f| normalize_file(f, system, store)).collect(),
    }
}

fn write_output(
    store: &dyn TableStore,
    path: &Path,
    table: &Table,
    outputs: &mut Vec<PathBuf>,
    errors: &mut Vec<String>,
) {
    match store.write_table(path, table) {
        Ok(()) => {
            debug!(path = %path.display(), rows = table.row_count(), "wrote table");
            outputs.push(path.to_path_buf());
        }
        Err(message) => {
            let e = ReconError::Write {
                path: path.to_path_buf(),
                message,
            };
            error!(error = %e, "output not written");
            errors.push(e.to_string());
        }
    }
}

/// All system summaries stacked under a leading `System` column. Columns are
/// the union in first-seen order; absent cells stay empty.
pub fn combined_summary_table(summaries: &[(String, SummaryTable)]) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for (_, summary) in summaries {
        for c in &summary.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut headers = vec!["System".to_string()];
    headers.extend(columns.iter().cloned());
    let mut table = Table::new(headers);
    for (system, summary) in summaries {
        for row in &summary.rows {
            let mut cells = vec![CellValue::Text(system.clone())];
            cells.extend(columns.iter().map(|c| row.get(c).clone()));
            table.rows.push(cells);
        }
    }
    table
}
