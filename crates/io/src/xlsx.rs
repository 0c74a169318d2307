//! Excel import/export.
//!
//! Import goes through calamine (xlsx, xls, xlsb, ods) and keeps only the
//! first worksheet. Export writes xlsx with rust_xlsxwriter.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use chrono::Timelike;
use ledgercheck_recon::model::{CellValue, Table};
use ledgercheck_recon::period::{datetime_to_excel_serial, excel_serial_to_datetime, parse_lenient};
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};

/// Largest row index an xlsx sheet can hold (1,048,576 rows).
const MAX_ROWS: usize = 1_048_576;

/// Import the first worksheet of an Excel file. The first row of the used
/// range is the header row.
pub fn import(path: &Path) -> Result<Table, String> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open Excel file: {}", e))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| "Excel file contains no sheets".to_string())?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| format!("Failed to read sheet '{}': {}", sheet_name, e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(|c| data_to_cell(c).to_string()).collect(),
        None => return Err(format!("Sheet '{}' is empty", sheet_name)),
    };

    let mut table = Table::new(headers);
    for row in rows {
        table.rows.push(row.iter().map(data_to_cell).collect());
    }
    Ok(table)
}

fn data_to_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => {
            if s.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(s.clone())
            }
        }
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        // Error cells carry no usable value
        Data::Error(_) => CellValue::Empty,
        Data::DateTime(dt) => {
            // 1900 date system assumed
            let serial = dt.as_f64();
            match excel_serial_to_datetime(serial) {
                Some(dt) => CellValue::DateTime(dt),
                None => CellValue::Number(serial),
            }
        }
        Data::DateTimeIso(s) => {
            let text = CellValue::Text(s.clone());
            parse_lenient(&text).map_or(text, CellValue::DateTime)
        }
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

/// Export a table as a single-sheet xlsx workbook with a bold header row.
pub fn export(table: &Table, path: &Path, sheet_name: &str) -> Result<(), String> {
    if table.row_count() + 1 > MAX_ROWS {
        return Err(format!(
            "{} rows exceed the xlsx sheet limit of {}",
            table.row_count(),
            MAX_ROWS - 1
        ));
    }

    let mut xlsx_workbook = XlsxWorkbook::new();
    let worksheet = xlsx_workbook
        .add_worksheet()
        .set_name(sheet_name)
        .map_err(|e| format!("Failed to create sheet '{}': {}", sheet_name, e))?;

    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    for (col, header) in table.headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, header, &header_format)
            .map_err(|e| format!("Failed to write header ({}): {}", col, e))?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let row32 = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate().take(table.headers.len()) {
            let col16 = c as u16;
            let written = match cell {
                CellValue::Empty => continue,
                CellValue::Text(s) => worksheet.write_string(row32, col16, s).map(|_| ()),
                CellValue::Number(n) if n.is_finite() => {
                    worksheet.write_number(row32, col16, *n).map(|_| ())
                }
                CellValue::Number(_) => continue,
                CellValue::Bool(b) => worksheet.write_boolean(row32, col16, *b).map(|_| ()),
                CellValue::DateTime(dt) => {
                    let format = if dt.num_seconds_from_midnight() == 0 {
                        &date_format
                    } else {
                        &datetime_format
                    };
                    worksheet
                        .write_number_with_format(row32, col16, datetime_to_excel_serial(dt), format)
                        .map(|_| ())
                }
            };
            written.map_err(|e| format!("Failed to write cell ({}, {}): {}", r + 1, c, e))?;
        }
    }

    xlsx_workbook
        .save(path)
        .map_err(|e| format!("Failed to save XLSX file: {}", e))?;
    Ok(())
}
