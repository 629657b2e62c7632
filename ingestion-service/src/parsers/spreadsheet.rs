use super::tabular::{parse_grid, CellValue};
use super::{ParseResult, StatementFormat, StatementParser};
use crate::error::ParseError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::io::{Cursor, Read};
use tracing::debug;

/// Excel workbooks (`.xlsx`, `.xls`). Only the first sheet is read.
pub struct SpreadsheetParser;

impl StatementParser for SpreadsheetParser {
    fn format(&self) -> StatementFormat {
        StatementFormat::Spreadsheet
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xlsx", "xls"]
    }

    fn parse(&self, input: &mut dyn Read, file_name: &str) -> Result<ParseResult, ParseError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| ParseError::new(format!("unreadable workbook: {}", e)))?;
        let first_sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ParseError::new("workbook has no sheets"))?;
        let range = workbook
            .worksheet_range(&first_sheet)
            .map_err(|e| ParseError::new(format!("unreadable sheet {}: {}", first_sheet, e)))?;

        debug!(
            file_name = %file_name,
            sheet = %first_sheet,
            rows = range.height(),
            "Reading workbook"
        );

        let rows: Vec<Vec<CellValue>> = range
            .rows()
            .map(|row| row.iter().map(to_cell).collect())
            .collect();

        parse_grid(&rows, file_name)
    }
}

fn to_cell(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) | Data::DurationIso(s) => CellValue::text(s.as_str()),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::Date)
            .unwrap_or_else(|_| CellValue::text(s.as_str())),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::text(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(CellValue::Date)
            .unwrap_or(CellValue::Empty),
    }
}

/// Excel stores dates as days since 1899-12-30 (1900 date system).
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    epoch
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excel_serials_convert() {
        let ts = excel_serial_to_datetime(45568.5).unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2024, 10, 3).unwrap());
        assert_eq!(ts.format("%H:%M").to_string(), "12:00");
        assert_eq!(excel_serial_to_datetime(-1.0), None);
    }

    #[test]
    fn cells_map_to_grid_values() {
        assert_eq!(to_cell(&Data::Empty), CellValue::Empty);
        assert_eq!(to_cell(&Data::Float(12.5)), CellValue::Number(12.5));
        assert_eq!(to_cell(&Data::Int(7)), CellValue::Number(7.0));
        assert_eq!(
            to_cell(&Data::String("  ".into())),
            CellValue::Empty
        );
        assert_eq!(
            to_cell(&Data::DateTimeIso("2024-10-03T00:00:00".into())),
            CellValue::Date(
                NaiveDate::from_ymd_opt(2024, 10, 3)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let err = SpreadsheetParser
            .parse(&mut Cursor::new(b"not a workbook".to_vec()), "statement.xlsx")
            .unwrap_err();
        assert!(err.message.contains("unreadable workbook"));
    }
}
