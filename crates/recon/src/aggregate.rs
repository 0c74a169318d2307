use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::{AggregateFn, SystemConfig};
use crate::model::{
    Aggregation, AggregationMode, CellValue, NormalizedFile, NormalizedRow, PassThroughReason,
    PeriodColumn, ReductionSource, SummaryRow, SummaryTable, PRACTITIONER_COLUMN,
};

/// Union of every file's canonical columns, in first-seen order.
pub fn union_columns(files: &[NormalizedFile]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for file in files {
        for column in file.schema.columns() {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
    }
    if !columns.iter().any(|c| c == PRACTITIONER_COLUMN) {
        columns.insert(0, PRACTITIONER_COLUMN.to_string());
    }
    columns
}

/// Group rows by (practitioner, period) and reduce each group to one row.
///
/// Falls back to pass-through (rows returned ungrouped) when no period
/// column exists, or when grouping by "Date Post" has no configured
/// reductions. Reductions see each group's values in sorted order, so the
/// result does not depend on row order.
pub fn aggregate_records(
    columns: &[String],
    rows: &[NormalizedRow],
    system: &SystemConfig,
) -> Aggregation {
    let Some(period) = PeriodColumn::detect(columns) else {
        debug!("no period column; passing rows through");
        return pass_through(columns, rows, PassThroughReason::NoPeriodColumn);
    };

    let metric_columns = columns
        .iter()
        .filter(|c| c.as_str() != PRACTITIONER_COLUMN && c.as_str() != period.name());

    let (reductions, source): (Vec<(String, AggregateFn)>, ReductionSource) =
        if let Some(ref funcs) = system.aggregate_functions {
            for column in funcs.keys() {
                if !columns.contains(column) {
                    warn!(column = %column, "aggregate column not present in any file; skipped");
                }
            }
            let reductions = metric_columns
                .filter_map(|c| funcs.get(c).map(|f| (c.clone(), *f)))
                .collect();
            (reductions, ReductionSource::Configured)
        } else if period == PeriodColumn::Month {
            let reductions = metric_columns
                .filter(|c| is_numeric_column(rows, c))
                .map(|c| (c.clone(), AggregateFn::Sum))
                .collect();
            (reductions, ReductionSource::DefaultSum)
        } else {
            warn!(
                period = %period,
                "no aggregate_functions configured for 'Date Post' grouping; rows passed through"
            );
            return pass_through(columns, rows, PassThroughReason::UnconfiguredDatePost);
        };

    for (column, func) in &reductions {
        if *func == AggregateFn::Count {
            continue;
        }
        let skipped = non_numeric_cells(rows, column);
        if skipped > 0 {
            warn!(column = %column, cells = skipped, func = %func, "non-numeric cells skipped by reduction");
        }
    }

    let mut groups: BTreeMap<(String, String), Vec<&NormalizedRow>> = BTreeMap::new();
    let mut rows_without_key = 0;
    for row in rows {
        let practitioner = row.practitioner().filter(|v| !v.is_empty());
        let period_value = row.get(period.name()).filter(|v| !v.is_empty());
        match (practitioner, period_value) {
            (Some(p), Some(v)) => groups
                .entry((p.to_key_string(), v.to_key_string()))
                .or_default()
                .push(row),
            _ => rows_without_key += 1,
        }
    }
    if rows_without_key > 0 {
        warn!(rows = rows_without_key, "rows with null practitioner or period left out of grouping");
    }

    let mut summary_columns = vec![PRACTITIONER_COLUMN.to_string(), period.name().to_string()];
    summary_columns.extend(reductions.iter().map(|(c, _)| c.clone()));

    let summary_rows = groups
        .into_iter()
        .map(|((practitioner, period_key), members)| {
            let mut values = BTreeMap::new();
            values.insert(
                PRACTITIONER_COLUMN.to_string(),
                representative(&members, PRACTITIONER_COLUMN, practitioner),
            );
            values.insert(
                period.name().to_string(),
                representative(&members, period.name(), period_key),
            );
            for (column, func) in &reductions {
                let cells: Vec<&CellValue> = members.iter().filter_map(|r| r.get(column)).collect();
                values.insert(column.clone(), reduce(*func, &cells));
            }
            SummaryRow { values }
        })
        .collect::<Vec<_>>();

    debug!(groups = summary_rows.len(), period = %period, "aggregated");

    Aggregation {
        summary: SummaryTable {
            columns: summary_columns,
            rows: summary_rows,
        },
        mode: AggregationMode::Grouped {
            period,
            reductions: source,
        },
        rows_without_key,
    }
}

fn pass_through(columns: &[String], rows: &[NormalizedRow], reason: PassThroughReason) -> Aggregation {
    Aggregation {
        summary: SummaryTable {
            columns: columns.to_vec(),
            rows: rows
                .iter()
                .map(|r| SummaryRow {
                    values: r.values.clone(),
                })
                .collect(),
        },
        mode: AggregationMode::PassThrough { reason },
        rows_without_key: 0,
    }
}

/// Group key cell: the shared value when every member agrees, otherwise the
/// key text itself.
fn representative(members: &[&NormalizedRow], column: &str, key: String) -> CellValue {
    let mut cells = members.iter().filter_map(|r| r.get(column));
    match cells.next() {
        Some(first) if cells.all(|c| c == first) => first.clone(),
        _ => CellValue::Text(key),
    }
}

/// A column is numeric when at least one of its values reads as a number.
/// Stray text cells (`"1,234.50"`, `"n/a"`) do not drop the whole column.
fn is_numeric_column(rows: &[NormalizedRow], column: &str) -> bool {
    rows.iter()
        .filter_map(|r| r.get(column))
        .any(|cell| cell.as_f64().is_some())
}

/// Non-null cells of `column` that a numeric reduction will skip.
fn non_numeric_cells(rows: &[NormalizedRow], column: &str) -> usize {
    rows.iter()
        .filter_map(|r| r.get(column))
        .filter(|cell| !cell.is_empty() && cell.as_f64().is_none())
        .count()
}

/// Apply one reduction. Nulls and non-numeric values are skipped, as are
/// NaNs; `count` counts every non-null cell.
pub fn reduce(func: AggregateFn, cells: &[&CellValue]) -> CellValue {
    if func == AggregateFn::Count {
        let n = cells.iter().filter(|c| !c.is_empty()).count();
        return CellValue::Number(n as f64);
    }

    let mut nums: Vec<f64> = cells.iter().filter_map(|c| c.as_f64()).collect();
    nums.sort_by(f64::total_cmp);

    let value = match func {
        AggregateFn::Sum => Some(nums.iter().sum()),
        AggregateFn::Mean => {
            (!nums.is_empty()).then(|| nums.iter().sum::<f64>() / nums.len() as f64)
        }
        AggregateFn::Min => nums.first().copied(),
        AggregateFn::Max => nums.last().copied(),
        AggregateFn::Median => median(&nums),
        AggregateFn::Count => None,
    };
    value.map_or(CellValue::Empty, CellValue::Number)
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AncestorRule;

    fn system(funcs: Option<&[(&str, AggregateFn)]>) -> SystemConfig {
        SystemConfig {
            columns: BTreeMap::new(),
            output_filename: "out.xlsx".into(),
            staging_folder: "staging".into(),
            date_format: None,
            aggregate_functions: funcs.map(|f| f.iter().map(|(c, a)| (c.to_string(), *a)).collect()),
            add_columns: BTreeMap::new(),
            ancestor_rule: AncestorRule::SecondToLast,
        }
    }

    fn row(practitioner: &str, period_col: &str, period: &str, charges: f64, note: &str) -> NormalizedRow {
        let mut values = BTreeMap::new();
        values.insert(PRACTITIONER_COLUMN.to_string(), CellValue::Text(practitioner.into()));
        values.insert(period_col.to_string(), CellValue::Text(period.into()));
        values.insert("MTDcharges".to_string(), CellValue::Number(charges));
        values.insert("Note".to_string(), CellValue::Text(note.into()));
        NormalizedRow { values }
    }

    fn cols(period_col: &str) -> Vec<String> {
        vec![
            PRACTITIONER_COLUMN.to_string(),
            period_col.to_string(),
            "MTDcharges".to_string(),
            "Note".to_string(),
        ]
    }

    #[test]
    fn month_defaults_to_numeric_sum() {
        let rows = vec![
            row("Dr A", "Month", "April_2025", 100.0, "x"),
            row("Dr A", "Month", "April_2025", 50.5, "y"),
            row("Dr B", "Month", "April_2025", 10.0, "z"),
        ];
        let agg = aggregate_records(&cols("Month"), &rows, &system(None));

        assert_eq!(
            agg.mode,
            AggregationMode::Grouped {
                period: PeriodColumn::Month,
                reductions: ReductionSource::DefaultSum
            }
        );
        assert_eq!(agg.summary.columns, vec![PRACTITIONER_COLUMN, "Month", "MTDcharges"]);
        assert_eq!(agg.summary.rows.len(), 2);
        assert_eq!(agg.summary.rows[0].get("MTDcharges"), &CellValue::Number(150.5));
        assert_eq!(agg.summary.rows[1].get(PRACTITIONER_COLUMN), &CellValue::Text("Dr B".into()));
    }

    #[test]
    fn month_sum_keeps_column_with_stray_text() {
        let mut rows = vec![
            row("Dr A", "Month", "April_2025", 100.0, "x"),
            row("Dr A", "Month", "April_2025", 0.0, "y"),
        ];
        rows[1]
            .values
            .insert("MTDcharges".into(), CellValue::Text("1,234.50".into()));
        let agg = aggregate_records(&cols("Month"), &rows, &system(None));

        assert_eq!(agg.summary.columns, vec![PRACTITIONER_COLUMN, "Month", "MTDcharges"]);
        assert_eq!(agg.summary.rows[0].get("MTDcharges"), &CellValue::Number(100.0));
    }

    #[test]
    fn all_text_column_is_not_summed() {
        let rows = vec![row("Dr A", "Month", "April_2025", 1.0, "x")];
        assert!(!is_numeric_column(&rows, "Note"));
        assert_eq!(non_numeric_cells(&rows, "Note"), 1);
        assert_eq!(non_numeric_cells(&rows, "MTDcharges"), 0);
    }

    #[test]
    fn configured_functions_drop_other_columns() {
        let rows = vec![
            row("Dr A", "Date Post", "April_2025", 100.0, "x"),
            row("Dr A", "Date Post", "April_2025", 20.0, "y"),
        ];
        let sys = system(Some(&[("MTDcharges", AggregateFn::Mean)]));
        let agg = aggregate_records(&cols("Date Post"), &rows, &sys);
        assert_eq!(agg.summary.columns, vec![PRACTITIONER_COLUMN, "Date Post", "MTDcharges"]);
        assert_eq!(agg.summary.rows[0].get("MTDcharges"), &CellValue::Number(60.0));
    }

    #[test]
    fn no_period_column_passes_through() {
        let columns = vec![PRACTITIONER_COLUMN.to_string(), "MTDcharges".to_string()];
        let mut r = NormalizedRow::default();
        r.values.insert(PRACTITIONER_COLUMN.into(), CellValue::Text("Dr A".into()));
        r.values.insert("MTDcharges".into(), CellValue::Number(1.0));
        let agg = aggregate_records(&columns, &[r.clone(), r], &system(None));
        assert_eq!(
            agg.mode,
            AggregationMode::PassThrough {
                reason: PassThroughReason::NoPeriodColumn
            }
        );
        assert_eq!(agg.summary.rows.len(), 2);
    }

    #[test]
    fn date_post_without_functions_is_flagged_gap() {
        let rows = vec![row("Dr A", "Date Post", "April_2025", 1.0, "x")];
        let agg = aggregate_records(&cols("Date Post"), &rows, &system(None));
        assert_eq!(
            agg.mode,
            AggregationMode::PassThrough {
                reason: PassThroughReason::UnconfiguredDatePost
            }
        );
    }

    #[test]
    fn null_period_rows_left_out() {
        let mut rows = vec![row("Dr A", "Month", "April_2025", 1.0, "x")];
        let mut blank = row("Dr A", "Month", "", 2.0, "y");
        blank.values.insert("Month".into(), CellValue::Empty);
        rows.push(blank);
        let agg = aggregate_records(&cols("Month"), &rows, &system(None));
        assert_eq!(agg.rows_without_key, 1);
        assert_eq!(agg.summary.rows.len(), 1);
        assert_eq!(agg.summary.rows[0].get("MTDcharges"), &CellValue::Number(1.0));
    }

    #[test]
    fn permutation_gives_identical_summary() {
        let rows = vec![
            row("Dr A", "Month", "May_2025", 0.1, "a"),
            row("Dr A", "Month", "May_2025", 0.2, "b"),
            row("Dr A", "Month", "May_2025", 0.3, "c"),
            row("Dr B", "Month", "May_2025", 1e16, "d"),
            row("Dr B", "Month", "May_2025", 1.0, "e"),
            row("Dr B", "Month", "May_2025", -1e16, "f"),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();
        let forward = aggregate_records(&cols("Month"), &rows, &system(None));
        let backward = aggregate_records(&cols("Month"), &reversed, &system(None));
        assert_eq!(forward.summary, backward.summary);
    }

    #[test]
    fn reductions() {
        let cells = [
            CellValue::Number(4.0),
            CellValue::Empty,
            CellValue::Number(1.0),
            CellValue::Text("3".into()),
            CellValue::Text("n/a".into()),
        ];
        let refs: Vec<&CellValue> = cells.iter().collect();
        assert_eq!(reduce(AggregateFn::Sum, &refs), CellValue::Number(8.0));
        assert_eq!(reduce(AggregateFn::Min, &refs), CellValue::Number(1.0));
        assert_eq!(reduce(AggregateFn::Max, &refs), CellValue::Number(4.0));
        assert_eq!(reduce(AggregateFn::Median, &refs), CellValue::Number(3.0));
        assert_eq!(reduce(AggregateFn::Count, &refs), CellValue::Number(4.0));
        assert_eq!(reduce(AggregateFn::Mean, &[]), CellValue::Empty);
        assert_eq!(reduce(AggregateFn::Sum, &[]), CellValue::Number(0.0));
    }
}
