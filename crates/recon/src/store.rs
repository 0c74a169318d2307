use std::path::Path;

use crate::model::{FileKind, Table};

/// Read/write capability for flat tables.
///
/// The engine never touches file formats itself; `ledgercheck-io` provides
/// the CSV/TSV/XLSX implementation. Implementations must be shareable across
/// the normalization worker pool.
pub trait TableStore: Sync {
    /// Read the first sheet (or the whole delimited file) with its first row
    /// as headers.
    fn read_table(&self, path: &Path, kind: FileKind) -> Result<Table, String>;

    /// Write a table, creating parent directories as needed. The format
    /// follows the path's extension.
    fn write_table(&self, path: &Path, table: &Table) -> Result<(), String>;
}
