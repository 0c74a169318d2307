use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{Derivation, SystemConfig};
use crate::error::ReconError;
use crate::model::{
    CellValue, FileRef, FileSchema, NormalizedFile, NormalizedRow, PeriodColumn, Table,
    PRACTITIONER_COLUMN,
};
use crate::period;
use crate::store::TableStore;

/// Title-case a header: every alphabetic run starts upper-case and continues
/// lower-case ("MTD charges" → "Mtd Charges", "date_post" → "Date_Post").
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

pub fn normalize_header(header: &str) -> String {
    title_case(header.trim())
}

/// Read one source file and normalize it.
pub fn normalize_file(
    file: &FileRef,
    system: &SystemConfig,
    store: &dyn TableStore,
) -> Result<NormalizedFile, ReconError> {
    let table = store
        .read_table(&file.path, file.kind)
        .map_err(|message| ReconError::FileRead {
            path: file.path.clone(),
            message,
        })?;
    normalize_table(file, &table, system)
}

/// Map one raw table onto the system's canonical columns.
pub fn normalize_table(
    file: &FileRef,
    table: &Table,
    system: &SystemConfig,
) -> Result<NormalizedFile, ReconError> {
    let headers: Vec<String> = table.headers.iter().map(|h| normalize_header(h)).collect();

    // (column index, canonical name) in file order; first duplicate header wins.
    let mut selected: Vec<(usize, String)> = Vec::new();
    let mut schema = FileSchema::default();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(canonical) = system.columns.get(header) {
            if selected.iter().all(|(_, c)| c != canonical) {
                selected.push((idx, canonical.clone()));
                schema.present.push((header.clone(), canonical.clone()));
            }
        }
    }
    // A key is missing only when no alias supplied its canonical column.
    schema.missing = system
        .columns
        .iter()
        .filter(|&(key, canonical)| {
            !headers.contains(key) && selected.iter().all(|(_, s)| s != canonical)
        })
        .map(|(k, _)| k.clone())
        .collect();

    if selected.is_empty() {
        return Err(ReconError::SchemaMismatch {
            path: file.path.clone(),
            headers,
        });
    }

    if !schema.missing.is_empty() {
        debug!(
            path = %file.path.display(),
            missing = ?schema.missing,
            "mapped columns absent from file"
        );
    }

    let canonical: Vec<&str> = selected.iter().map(|(_, c)| c.as_str()).collect();
    let period_column = PeriodColumn::detect(&canonical);
    let reformat_period = period_column.zip(system.date_format.as_deref());

    let derived = derived_values(file, &system.add_columns);
    schema.derived = derived.keys().cloned().collect();
    if !derived.contains_key(PRACTITIONER_COLUMN) && !canonical.contains(&PRACTITIONER_COLUMN) {
        schema.derived.push(PRACTITIONER_COLUMN.to_string());
    }

    let mut rows = Vec::with_capacity(table.row_count());
    for r in 0..table.row_count() {
        let cells: Vec<&CellValue> = selected.iter().map(|(c, _)| table.cell(r, *c)).collect();
        // Trailing/blank spreadsheet rows carry nothing.
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }

        let mut values: BTreeMap<String, CellValue> = selected
            .iter()
            .zip(cells)
            .map(|((_, name), cell)| (name.clone(), cell.clone()))
            .collect();

        if let Some((column, date_format)) = reformat_period {
            if let Some(v) = values.get_mut(column.name()) {
                *v = period::reformat(v, date_format);
            }
        }

        for (column, value) in &derived {
            values.insert(column.clone(), value.clone());
        }

        values
            .entry(PRACTITIONER_COLUMN.to_string())
            .or_insert_with(|| CellValue::Text(file.practitioner_folder.clone()));

        rows.push(NormalizedRow { values });
    }

    Ok(NormalizedFile {
        file: file.clone(),
        schema,
        rows,
    })
}

fn derived_values(
    file: &FileRef,
    add_columns: &BTreeMap<String, Derivation>,
) -> BTreeMap<String, CellValue> {
    add_columns
        .iter()
        .map(|(column, derivation)| {
            let value = match derivation {
                Derivation::FolderName => Some(file.practitioner_folder.clone()),
                Derivation::AncestorFolder => file.ancestor_folder.clone(),
            };
            (column.clone(), value.map_or(CellValue::Empty, CellValue::Text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AncestorRule;
    use crate::model::FileKind;

    fn system(columns: &[(&str, &str)], date_format: Option<&str>) -> SystemConfig {
        SystemConfig {
            columns: columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            output_filename: "out.xlsx".into(),
            staging_folder: "staging".into(),
            date_format: date_format.map(String::from),
            aggregate_functions: None,
            add_columns: BTreeMap::new(),
            ancestor_rule: AncestorRule::SecondToLast,
        }
    }

    fn file_ref() -> FileRef {
        FileRef {
            path: "/data/intergy/Dr Smith/april.xlsx".into(),
            practitioner_folder: "Dr Smith".into(),
            ancestor_folder: Some("intergy".into()),
            kind: FileKind::Spreadsheet,
        }
    }

    fn table(headers: &[&str], rows: Vec<Vec<CellValue>>) -> Table {
        Table {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    #[test]
    fn title_case_headers() {
        assert_eq!(normalize_header("  date post "), "Date Post");
        assert_eq!(normalize_header("MTDcharges"), "Mtdcharges");
        assert_eq!(normalize_header("total_AMOUNT"), "Total_Amount");
        assert_eq!(normalize_header("1st visit"), "1St Visit");
    }

    #[test]
    fn selects_and_renames_intersection() {
        let sys = system(
            &[("Charges", "MTDcharges"), ("Payments", "MTDpayments"), ("Refunds", "Refunds")],
            None,
        );
        let t = table(
            &["charges ", "PAYMENTS", "Internal Note"],
            vec![vec![CellValue::Number(100.0), CellValue::Number(40.0), text("x")]],
        );
        let out = normalize_table(&file_ref(), &t, &sys).unwrap();

        assert_eq!(out.rows.len(), 1);
        let row = &out.rows[0];
        assert_eq!(row.get("MTDcharges"), Some(&CellValue::Number(100.0)));
        assert_eq!(row.get("MTDpayments"), Some(&CellValue::Number(40.0)));
        // Unmapped source column discarded, unmatched mapping never synthesized.
        assert!(!row.has_column("Internal Note"));
        assert!(!row.has_column("Refunds"));
        assert_eq!(out.schema.missing, vec!["Refunds".to_string()]);
        // Practitioner injected from the folder.
        assert_eq!(row.practitioner(), Some(&text("Dr Smith")));
    }

    #[test]
    fn header_aliases_normalize_per_file() {
        let sys = system(
            &[
                ("Provider", PRACTITIONER_COLUMN),
                ("Rendering Provider", PRACTITIONER_COLUMN),
                ("Charges", "MTDcharges"),
            ],
            None,
        );
        let first = table(&["Provider", "Charges"], vec![vec![text("Dr A"), CellValue::Number(1.0)]]);
        let second = table(
            &["rendering provider", "Charges"],
            vec![vec![text("Dr B"), CellValue::Number(2.0)]],
        );

        let a = normalize_table(&file_ref(), &first, &sys).unwrap();
        let b = normalize_table(&file_ref(), &second, &sys).unwrap();
        assert_eq!(a.rows[0].practitioner(), Some(&text("Dr A")));
        assert_eq!(b.rows[0].practitioner(), Some(&text("Dr B")));
        assert!(a.schema.missing.is_empty());
        assert!(b.schema.missing.is_empty());
        assert_eq!(a.schema.columns(), b.schema.columns());

        // Both spellings in one file: the first column wins.
        let both = table(
            &["Rendering Provider", "Provider", "Charges"],
            vec![vec![text("Dr C"), text("Dr D"), CellValue::Number(3.0)]],
        );
        let c = normalize_table(&file_ref(), &both, &sys).unwrap();
        assert_eq!(c.rows[0].practitioner(), Some(&text("Dr C")));
    }

    #[test]
    fn no_intersection_is_schema_mismatch() {
        let sys = system(&[("Charges", "MTDcharges")], None);
        let t = table(&["Foo", "Bar"], vec![vec![text("1"), text("2")]]);
        let err = normalize_table(&file_ref(), &t, &sys).unwrap_err();
        match err {
            ReconError::SchemaMismatch { headers, .. } => assert_eq!(headers, vec!["Foo", "Bar"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn period_reformatted_and_unparsable_becomes_null() {
        let sys = system(&[("Date Post", "Date Post"), ("Charges", "MTDcharges")], Some("%B_%Y"));
        let t = table(
            &["Date Post", "Charges"],
            vec![
                vec![text("2025-04-15"), CellValue::Number(1.0)],
                vec![text("pending"), CellValue::Number(2.0)],
            ],
        );
        let out = normalize_table(&file_ref(), &t, &sys).unwrap();
        assert_eq!(out.rows[0].get("Date Post"), Some(&text("April_2025")));
        assert_eq!(out.rows[1].get("Date Post"), Some(&CellValue::Empty));
    }

    #[test]
    fn month_untouched_without_date_format() {
        let sys = system(&[("Month", "Month")], None);
        let t = table(&["Month"], vec![vec![text("2025-04-15")]]);
        let out = normalize_table(&file_ref(), &t, &sys).unwrap();
        assert_eq!(out.rows[0].get("Month"), Some(&text("2025-04-15")));
    }

    #[test]
    fn derived_columns_from_folders() {
        let mut sys = system(&[("Charges", "MTDcharges")], None);
        sys.add_columns
            .insert(PRACTITIONER_COLUMN.into(), Derivation::FolderName);
        sys.add_columns.insert("Source".into(), Derivation::AncestorFolder);
        let t = table(&["Charges"], vec![vec![CellValue::Number(5.0)]]);

        let out = normalize_table(&file_ref(), &t, &sys).unwrap();
        let row = &out.rows[0];
        assert_eq!(row.practitioner(), Some(&text("Dr Smith")));
        assert_eq!(row.get("Source"), Some(&text("intergy")));

        let mut shallow = file_ref();
        shallow.ancestor_folder = None;
        let out = normalize_table(&shallow, &t, &sys).unwrap();
        assert_eq!(out.rows[0].get("Source"), Some(&CellValue::Empty));
    }

    #[test]
    fn blank_rows_skipped() {
        let sys = system(&[("Charges", "MTDcharges")], None);
        let t = table(
            &["Charges"],
            vec![vec![CellValue::Number(5.0)], vec![CellValue::Empty], vec![]],
        );
        let out = normalize_table(&file_ref(), &t, &sys).unwrap();
        assert_eq!(out.rows.len(), 1);
    }
}
