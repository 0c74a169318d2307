// CSV/TSV import/export

use std::io::Read;
use std::path::Path;

use ledgercheck_recon::model::{CellValue, Table};

/// Read a delimited file with its first record as headers. The delimiter is
/// sniffed when not given.
pub fn import(path: &Path, delimiter: Option<u8>) -> Result<Table, String> {
    let content = read_file_as_utf8(path)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(content));
    import_from_string(content, delimiter)
}

pub fn import_tsv(path: &Path) -> Result<Table, String> {
    import(path, Some(b'\t'))
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Must produce >1 field on the first line to be viable
        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Score: lines agreeing with line 1, weighted by its field count
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    // Try UTF-8 first; on failure, recover the buffer from the error
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            // Fall back to Windows-1252 (common for Excel-exported CSVs)
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Typed view of a raw field: blank → empty, numeric → number, else text.
fn infer_cell(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        _ => CellValue::Text(field.to_string()),
    }
}

fn import_from_string(content: &str, delimiter: u8) -> Result<Table, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| e.to_string())?
            .iter()
            .map(String::from)
            .collect(),
        None => return Err("file is empty".to_string()),
    };

    let mut table = Table::new(headers);
    for result in records {
        let record = result.map_err(|e| e.to_string())?;
        table.rows.push(record.iter().map(infer_cell).collect());
    }
    Ok(table)
}

pub fn export(table: &Table, path: &Path) -> Result<(), String> {
    export_with_delimiter(table, path, b',')
}

pub fn export_tsv(table: &Table, path: &Path) -> Result<(), String> {
    export_with_delimiter(table, path, b'\t')
}

fn export_with_delimiter(table: &Table, path: &Path, delimiter: u8) -> Result<(), String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;

    writer
        .write_record(&table.headers)
        .map_err(|e| e.to_string())?;

    for r in 0..table.row_count() {
        let record: Vec<String> = (0..table.headers.len())
            .map(|c| table.cell(r, c).to_string())
            .collect();
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }

    writer.flush().map_err(|e| e.to_string())?;
    Ok(())
}
