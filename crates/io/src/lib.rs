// File I/O operations

pub mod csv;
pub mod xlsx;

use std::path::Path;

use ledgercheck_recon::model::{FileKind, Table};
use ledgercheck_recon::TableStore;

/// Sheet name used for every xlsx table written.
pub const OUTPUT_SHEET_NAME: &str = "Sheet1";

/// Filesystem-backed [`TableStore`] for CSV, TSV and Excel files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTables;

impl TableStore for FileTables {
    fn read_table(&self, path: &Path, kind: FileKind) -> Result<Table, String> {
        match kind {
            FileKind::Spreadsheet => xlsx::import(path),
            FileKind::Csv => csv::import(path, None),
            FileKind::Tsv => csv::import_tsv(path),
        }
    }

    fn write_table(&self, path: &Path, table: &Table) -> Result<(), String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }

        match ext.as_str() {
            "xlsx" => xlsx::export(table, path, OUTPUT_SHEET_NAME),
            "csv" => csv::export(table, path),
            "tsv" => csv::export_tsv(table, path),
            other => Err(format!("unsupported output format '.{}'", other)),
        }
    }
}
