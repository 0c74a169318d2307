//! Lenient date parsing for period columns.
//!
//! Values that cannot be read as a date become `None` and end up as a null
//! period; they never fail the file.

use std::fmt::Write;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

use crate::model::CellValue;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

// Month-first before day-first, so 03/04/2025 is March 4th and 13/04/2025
// still parses.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%d-%b-%y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

// Parsed with a synthetic first day of month appended.
const MONTH_FORMATS: &[&str] = &[
    "%B %Y", "%b %Y", "%B-%Y", "%b-%Y", "%B_%Y", "%b_%Y", "%Y-%m", "%Y/%m", "%m/%Y", "%m-%Y",
];

/// Largest serial Excel accepts (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Parse a cell as a date/time, accepting the shapes commonly found in
/// practice-management exports. Returns `None` for anything unrecognized.
pub fn parse_lenient(value: &CellValue) -> Option<NaiveDateTime> {
    match value {
        CellValue::DateTime(dt) => Some(*dt),
        CellValue::Number(n) => excel_serial_to_datetime(*n),
        CellValue::Text(s) => parse_text(s.trim()),
        CellValue::Empty | CellValue::Bool(_) => None,
    }
}

fn parse_text(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    let with_day = format!("{s} 1");
    for fmt in MONTH_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&with_day, &format!("{fmt} %d")) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    // Serial numbers that arrived as text (CSV exports of Excel dates).
    s.parse::<f64>().ok().and_then(excel_serial_to_datetime)
}

/// Convert an Excel 1900-system serial into a timestamp.
///
/// The epoch sits at 1899-12-30 so serials after the phantom 1900-02-29
/// (serial 60) land on the right day.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_EXCEL_SERIAL {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::days(days) + Duration::seconds(seconds))
}

/// Inverse of [`excel_serial_to_datetime`], used when writing spreadsheets.
pub fn datetime_to_excel_serial(dt: &NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let delta = *dt - epoch;
    delta.num_seconds() as f64 / 86_400.0
}

/// Reformat a period value with a strftime pattern. Unparsable → `Empty`.
pub fn reformat(value: &CellValue, date_format: &str) -> CellValue {
    let Some(dt) = parse_lenient(value) else {
        return CellValue::Empty;
    };
    let mut out = String::new();
    match write!(out, "{}", dt.format(date_format)) {
        Ok(()) => CellValue::Text(out),
        Err(_) => CellValue::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn parses_common_shapes() {
        assert_eq!(parse_lenient(&text("2025-04-15")), Some(ymd(2025, 4, 15)));
        assert_eq!(parse_lenient(&text("04/15/2025")), Some(ymd(2025, 4, 15)));
        assert_eq!(parse_lenient(&text("15/04/2025")), Some(ymd(2025, 4, 15)));
        assert_eq!(parse_lenient(&text("April 2025")), Some(ymd(2025, 4, 1)));
        assert_eq!(parse_lenient(&text("Apr-2025")), Some(ymd(2025, 4, 1)));
        assert_eq!(parse_lenient(&text("2025-04")), Some(ymd(2025, 4, 1)));
        assert_eq!(
            parse_lenient(&text("2025-04-15 13:45:00")),
            NaiveDate::from_ymd_opt(2025, 4, 15).unwrap().and_hms_opt(13, 45, 0)
        );
    }

    #[test]
    fn unparsable_is_none() {
        assert_eq!(parse_lenient(&text("not a date")), None);
        assert_eq!(parse_lenient(&text("")), None);
        assert_eq!(parse_lenient(&CellValue::Empty), None);
        assert_eq!(parse_lenient(&CellValue::Bool(true)), None);
        assert_eq!(parse_lenient(&CellValue::Number(-3.0)), None);
    }

    #[test]
    fn excel_serials() {
        assert_eq!(excel_serial_to_datetime(45762.0), Some(ymd(2025, 4, 15)));
        assert_eq!(excel_serial_to_datetime(61.0), Some(ymd(1900, 3, 1)));
        let noon = excel_serial_to_datetime(45762.5).unwrap();
        assert_eq!(noon, NaiveDate::from_ymd_opt(2025, 4, 15).unwrap().and_hms_opt(12, 0, 0).unwrap());
        assert_eq!(datetime_to_excel_serial(&noon), 45762.5);
    }

    #[test]
    fn reformat_month_year() {
        assert_eq!(reformat(&text("2025-04-15"), "%B_%Y"), text("April_2025"));
        assert_eq!(reformat(&CellValue::Number(45762.0), "%Y-%m"), text("2025-04"));
        assert_eq!(reformat(&text("garbage"), "%B_%Y"), CellValue::Empty);
    }
}
