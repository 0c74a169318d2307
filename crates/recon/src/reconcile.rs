use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::classify::classify;
use crate::config::ReconColumns;
use crate::error::ReconError;
use crate::model::{
    CellValue, Comparison, Metrics, Percentages, ReconciledRow, ReferenceRow, SummaryTable, Table,
    PRACTITIONER_COLUMN,
};

/// Decimal places kept on differences and percentages.
pub const ROUND_DECIMALS: i32 = 10;

/// Round half away from zero to `decimals` places.
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / factor
}

/// Build reference rows from the external ledger table.
///
/// The key column and the three reference metric columns are required.
/// Rows with an empty key cannot join anything and are dropped.
pub fn load_reference(table: &Table, columns: &ReconColumns) -> Result<Vec<ReferenceRow>, ReconError> {
    let index = |name: &str| {
        table.column_index(name).ok_or_else(|| ReconError::MissingColumn {
            table: "reference".into(),
            column: name.to_string(),
        })
    };
    let key = index(&columns.reference_key)?;
    let charges = index(&columns.reference_charges)?;
    let payments = index(&columns.reference_payments)?;
    let adjustments = index(&columns.reference_adjustments)?;

    let rows: Vec<ReferenceRow> = (0..table.row_count())
        .filter_map(|r| {
            let match_key = table.cell(r, key).to_key_string().trim().to_string();
            if match_key.is_empty() {
                return None;
            }
            Some(ReferenceRow {
                match_key,
                metrics: Metrics {
                    charges: table.cell(r, charges).as_f64(),
                    payments: table.cell(r, payments).as_f64(),
                    adjustments: table.cell(r, adjustments).as_f64(),
                },
            })
        })
        .collect();

    debug!(rows = rows.len(), "loaded reference rows");
    Ok(rows)
}

fn diff(own: Option<f64>, reference: Option<f64>) -> Option<f64> {
    Some(round_to(own? - reference?, ROUND_DECIMALS))
}

/// |diff| / own × 100. A zero own value or a missing side gives 0.
///
/// The own value keeps its sign, so a negative own value (typical for
/// adjustments) yields a negative percentage, which always classifies as
/// within the threshold.
fn pct(diff: Option<f64>, own: Option<f64>) -> f64 {
    match (diff, own) {
        (Some(d), Some(o)) if o != 0.0 => {
            let p = round_to(d.abs() / o * 100.0, ROUND_DECIMALS);
            if p.is_finite() {
                p
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Compare one own/reference pair.
pub fn compare(own: &Metrics, reference: &Metrics, threshold_percent: f64) -> Comparison {
    let diff = Metrics {
        charges: diff(own.charges, reference.charges),
        payments: diff(own.payments, reference.payments),
        adjustments: diff(own.adjustments, reference.adjustments),
    };
    let diff_pct = Percentages {
        charges: pct(diff.charges, own.charges),
        payments: pct(diff.payments, own.payments),
        adjustments: pct(diff.adjustments, own.adjustments),
    };
    Comparison {
        diff,
        diff_pct,
        status: classify(&diff_pct, threshold_percent),
    }
}

/// Inner-join a system summary against the reference rows on
/// `Practitioner Name + "_" + period` and compare each joined pair.
///
/// Rows without a counterpart on either side are dropped. Output follows the
/// summary row order; duplicate reference keys each produce a row.
pub fn reconcile(
    system: &str,
    summary: &SummaryTable,
    reference: &[ReferenceRow],
    columns: &ReconColumns,
    threshold_percent: f64,
) -> Result<Vec<ReconciledRow>, ReconError> {
    let period = summary
        .period_column()
        .ok_or_else(|| ReconError::ReconciliationKey {
            available: summary.columns.clone(),
        })?;

    let mut by_key: BTreeMap<&str, Vec<&ReferenceRow>> = BTreeMap::new();
    for row in reference {
        by_key.entry(row.match_key.as_str()).or_default().push(row);
    }

    let mut out = Vec::new();
    for row in &summary.rows {
        let concat_key = format!(
            "{}_{}",
            row.get(PRACTITIONER_COLUMN).to_key_string(),
            row.get(period.name()).to_key_string()
        );
        let Some(matches) = by_key.get(concat_key.as_str()) else {
            continue;
        };
        let own = Metrics {
            charges: row.get(&columns.own_charges).as_f64(),
            payments: row.get(&columns.own_payments).as_f64(),
            adjustments: row.get(&columns.own_adjustments).as_f64(),
        };
        let missing = own.missing();
        if !missing.is_empty() {
            warn!(
                system,
                key = %concat_key,
                missing = ?missing,
                "own-side metric missing or non-numeric; compared as 0%"
            );
        }
        for reference_row in matches {
            let comparison = compare(&own, &reference_row.metrics, threshold_percent);
            out.push(ReconciledRow {
                system: system.to_string(),
                concat_key: concat_key.clone(),
                own,
                reference: reference_row.metrics,
                diff: comparison.diff,
                diff_pct: comparison.diff_pct,
                match_status: comparison.status,
                comment: String::new(),
            });
        }
    }

    debug!(system, joined = out.len(), summary_rows = summary.rows.len(), "reconciled");
    Ok(out)
}

/// Output layout of reconciled rows.
pub fn reconciled_table(rows: &[ReconciledRow], columns: &ReconColumns) -> Table {
    let headers = [
        "System",
        "Concat_Key",
        columns.own_charges.as_str(),
        columns.own_payments.as_str(),
        columns.own_adjustments.as_str(),
        columns.reference_charges.as_str(),
        columns.reference_payments.as_str(),
        columns.reference_adjustments.as_str(),
        "DiffCharges",
        "DiffPayments",
        "DiffAdjustments",
        "DiffCharges_Perc",
        "DiffPayments_Perc",
        "DiffAdjustments_Perc",
        "Match_Status",
        "Comment",
    ];
    let mut table = Table::new(headers.iter().map(|h| h.to_string()).collect());

    let num = |v: Option<f64>| v.map_or(CellValue::Empty, CellValue::Number);
    for r in rows {
        table.rows.push(vec![
            CellValue::Text(r.system.clone()),
            CellValue::Text(r.concat_key.clone()),
            num(r.own.charges),
            num(r.own.payments),
            num(r.own.adjustments),
            num(r.reference.charges),
            num(r.reference.payments),
            num(r.reference.adjustments),
            num(r.diff.charges),
            num(r.diff.payments),
            num(r.diff.adjustments),
            CellValue::Number(r.diff_pct.charges),
            CellValue::Number(r.diff_pct.payments),
            CellValue::Number(r.diff_pct.adjustments),
            CellValue::Text(r.match_status.to_string()),
            CellValue::Text(r.comment.clone()),
        ]);
    }
    table
}
