//! Parsing and validation of uploaded production CSV files.
//!
//! An upload is either accepted whole or rejected whole: every row is parsed
//! before anything reaches the store.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::models::ProductionRecord;

pub const DATE_COLUMN: &str = "Date";
pub const VALUE_COLUMN: &str = "Production";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%m-%d-%y",
    "%d-%b-%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%Y%m%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// chrono's `%Y` also takes one or two digit years; those belong to `%y`.
const MIN_FULL_YEAR: i32 = 1000;

fn full_year(format: &str, date: NaiveDate) -> bool {
    !format.contains("%Y") || date.year() >= MIN_FULL_YEAR
}

/// Validated contents of one upload.
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    pub rows_read: usize,
    /// One record per date, ascending. A date repeated in the file keeps its last value.
    pub records: Vec<ProductionRecord>,
}

#[derive(serde::Deserialize)]
struct CsvRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Production")]
    production: String,
}

pub fn parse_production_csv<R: Read>(input: R) -> Result<ParsedUpload> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = [DATE_COLUMN, VALUE_COLUMN]
        .into_iter()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .collect();
    if !missing.is_empty() {
        return Err(ForecastError::Schema(format!(
            "missing column(s) {}; the CSV needs {DATE_COLUMN} and {VALUE_COLUMN} columns",
            missing.join(", ")
        )));
    }

    let mut by_date = BTreeMap::new();
    let mut rows_read = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row_number = index + 1;
        let row = result.map_err(|err| ForecastError::RowValidation {
            row: row_number,
            message: err.to_string(),
        })?;

        let date = parse_date(&row.date).ok_or_else(|| ForecastError::RowValidation {
            row: row_number,
            message: format!("date {:?} is not a recognised calendar date", row.date),
        })?;
        let value = parse_value(&row.production).map_err(|message| {
            ForecastError::RowValidation {
                row: row_number,
                message,
            }
        })?;

        by_date.insert(date, value);
        rows_read += 1;
    }

    debug!(rows_read, distinct_dates = by_date.len(), "parsed production upload");

    Ok(ParsedUpload {
        rows_read,
        records: by_date
            .into_iter()
            .map(|(date, value)| ProductionRecord { date, value })
            .collect(),
    })
}

/// Accepts the common calendar spellings plus quarter labels such as `2021Q3`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        match NaiveDate::parse_from_str(raw, format) {
            Ok(date) if full_year(format, date) => return Some(date),
            _ => {}
        }
    }
    for format in DATETIME_FORMATS {
        match NaiveDateTime::parse_from_str(raw, format) {
            Ok(datetime) if full_year(format, datetime.date()) => return Some(datetime.date()),
            _ => {}
        }
    }
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(datetime.date_naive());
    }

    parse_quarter(raw)
}

fn parse_quarter(raw: &str) -> Option<NaiveDate> {
    let upper = raw.to_ascii_uppercase();
    let (year, quarter) = upper.split_once('Q')?;
    let year: i32 = year.trim_end_matches(['-', ' ']).parse().ok()?;
    let quarter: u32 = quarter.parse().ok()?;
    if !(1..=4).contains(&quarter) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
}

fn parse_value(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("production value {raw:?} is not a number"))?;
    if !value.is_finite() {
        return Err(format!("production value {raw:?} is not finite"));
    }
    if value < 0.0 {
        return Err(format!("production value {value} is negative"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_and_sorts_rows() {
        let csv = "Date,Production\n2021-07-01,90\n2021-01-01,100\n2021-04-01,120\n";
        let parsed = parse_production_csv(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows_read, 3);
        let dates: Vec<NaiveDate> = parsed.records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![ymd(2021, 1, 1), ymd(2021, 4, 1), ymd(2021, 7, 1)]);
        assert_eq!(parsed.records[0].value, 100.0);
    }

    #[test]
    fn repeated_dates_keep_last_value() {
        let csv = "Date,Production\n2021-01-01,100\n01/01/2021,150\n";
        let parsed = parse_production_csv(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows_read, 2);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].value, 150.0);
    }

    #[test]
    fn extra_columns_are_ignored() {
        let csv = "Region,Date,Production\nDavao,3/31/2020,12.5\n";
        let parsed = parse_production_csv(csv.as_bytes()).unwrap();
        assert_eq!(parsed.records[0].date, ymd(2020, 3, 31));
        assert_eq!(parsed.records[0].value, 12.5);
    }

    #[test]
    fn missing_production_column_is_schema_error() {
        let csv = "Date,Output\n2021-01-01,100\n";
        let err = parse_production_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ForecastError::Schema(_)));
        assert!(err.to_string().contains("Production"));
    }

    #[test]
    fn non_numeric_value_fails_with_row_number() {
        let csv = "Date,Production\n2021-01-01,100\n2021-04-01,abc\n";
        let err = parse_production_csv(csv.as_bytes()).unwrap_err();
        match err {
            ForecastError::RowValidation { row, .. } => assert_eq!(row, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn negative_and_unparseable_dates_are_rejected() {
        let negative = "Date,Production\n2021-01-01,-4\n";
        assert!(matches!(
            parse_production_csv(negative.as_bytes()),
            Err(ForecastError::RowValidation { row: 1, .. })
        ));

        let bad_date = "Date,Production\nnot-a-date,4\n";
        assert!(matches!(
            parse_production_csv(bad_date.as_bytes()),
            Err(ForecastError::RowValidation { row: 1, .. })
        ));

        let nan = "Date,Production\n2021-01-01,NaN\n";
        assert!(parse_production_csv(nan.as_bytes()).is_err());
    }

    #[test]
    fn tolerant_date_formats() {
        assert_eq!(parse_date("2020-03-31"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("3/31/2020"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("3/31/20"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("3-31-20"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("12/01/99"), Some(ymd(1999, 12, 1)));
        assert_eq!(parse_date("2020/03/31"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("31-Mar-2020"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("March 31, 2020"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("2020-03-31 08:15:00"), Some(ymd(2020, 3, 31)));
        assert_eq!(parse_date("2020Q2"), Some(ymd(2020, 4, 1)));
        assert_eq!(parse_date("2020-Q4"), Some(ymd(2020, 10, 1)));
        assert_eq!(parse_date("2020Q5"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("13/45/2020"), None);
    }
}
