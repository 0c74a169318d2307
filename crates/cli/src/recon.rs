//! `ledgercheck run` / `ledgercheck validate`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ledgercheck_io::FileTables;
use ledgercheck_recon::model::{
    AggregationMode, PassThroughReason, ReconciliationOutcome, ReductionSource, RunReport,
    SystemStatus,
};
use ledgercheck_recon::PipelineConfig;
use tracing::warn;

use crate::exit_codes::EXIT_PARTIAL;
use crate::CliError;

/// Read, parse, validate and resolve a config relative to its own directory.
fn load_config(config_path: &Path) -> Result<PipelineConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        CliError::usage(format!("cannot read config {}: {e}", config_path.display()))
    })?;

    let mut config = PipelineConfig::from_str_for_path(&config_str, config_path).map_err(|e| {
        CliError::config(e.to_string())
            .with_hint("run `ledgercheck validate <config>` after fixing the file")
    })?;

    let base_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base_dir);
    Ok(config)
}

pub fn cmd_run(config_path: PathBuf, json_output: bool, output_file: Option<PathBuf>) -> Result<(), CliError> {
    let config = load_config(&config_path)?;

    let report = ledgercheck_recon::run(&config, &FileTables).map_err(|e| {
        if e.is_fatal() {
            CliError::config(e.to_string())
        } else {
            CliError::general(e.to_string())
        }
    })?;

    let json_str = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::general(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    // Human summary to stderr
    eprint!("{}", render_summary(&report));

    let failed_systems = report
        .systems
        .iter()
        .filter(|s| matches!(s.status, SystemStatus::Failed { .. }))
        .count();
    if failed_systems > 0 || !report.output_errors.is_empty() {
        return Err(CliError {
            code: EXIT_PARTIAL,
            message: format!(
                "run incomplete: {} system(s) failed, {} output(s) not written",
                failed_systems,
                report.output_errors.len()
            ),
            hint: None,
        });
    }
    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;

    for warning in config.warnings() {
        warn!("{warning}");
    }

    let reference = match config.reconciliation.reference_file {
        Some(ref path) => format!("reference {}", path.display()),
        None => "no reference table".to_string(),
    };
    eprintln!(
        "valid: {} system(s) [{}], threshold {}%, {}",
        config.systems.len(),
        config.systems.keys().cloned().collect::<Vec<_>>().join(", "),
        config.match_threshold_percent,
        reference,
    );
    Ok(())
}

fn describe_aggregation(mode: &AggregationMode) -> String {
    match mode {
        AggregationMode::Grouped { period, reductions } => format!(
            "grouped by {period}, {}",
            match reductions {
                ReductionSource::Configured => "configured functions",
                ReductionSource::DefaultSum => "default sum",
            }
        ),
        AggregationMode::PassThrough { reason } => match reason {
            PassThroughReason::NoPeriodColumn => "not grouped (no period column)".to_string(),
            PassThroughReason::UnconfiguredDatePost => {
                "not grouped (Date Post without aggregate_functions)".to_string()
            }
        },
    }
}

/// Human-readable run summary.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    for system in &report.systems {
        let status = match &system.status {
            SystemStatus::Completed => "completed".to_string(),
            SystemStatus::NoData => "no data".to_string(),
            SystemStatus::Failed { error, .. } => format!("failed ({error})"),
        };
        let _ = writeln!(
            out,
            "system '{}': {}, {} file(s) scanned, {} normalized, {} skipped, {} row(s) -> {} summary row(s)",
            system.name,
            status,
            system.files_scanned,
            system.files_normalized,
            system.skipped.len(),
            system.rows_normalized,
            system.summary_rows,
        );
        if let Some(ref mode) = system.aggregation {
            let _ = writeln!(out, "  aggregation: {}", describe_aggregation(mode));
        }
        if system.rows_without_key > 0 {
            let _ = writeln!(
                out,
                "  {} row(s) without practitioner or period left out",
                system.rows_without_key
            );
        }
        for skipped in &system.skipped {
            let _ = writeln!(out, "  skipped {}: {}", skipped.path.display(), skipped.reason);
        }
        match &system.reconciliation {
            ReconciliationOutcome::Completed(s) => {
                let _ = writeln!(
                    out,
                    "  reconciliation: {} joined, {} matched, {} mismatched",
                    s.total, s.matched, s.mismatched
                );
                if s.incomplete > 0 {
                    let _ = writeln!(
                        out,
                        "  {} joined row(s) missing an own-side metric; check before trusting Match",
                        s.incomplete
                    );
                }
            }
            ReconciliationOutcome::Skipped { reason, .. } => {
                let _ = writeln!(out, "  reconciliation skipped: {reason}");
            }
            ReconciliationOutcome::NotConfigured => {}
        }
    }

    let total = &report.reconciliation;
    let _ = writeln!(
        out,
        "total: {} reconciled, {} matched, {} mismatched",
        total.total, total.matched, total.mismatched
    );
    for path in &report.outputs {
        let _ = writeln!(out, "wrote {}", path.display());
    }
    for error in &report.output_errors {
        let _ = writeln!(out, "not written: {error}");
    }
    out
}
