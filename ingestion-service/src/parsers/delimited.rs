use super::tabular::{parse_grid, CellValue};
use super::{decode_text, ParseResult, StatementFormat, StatementParser};
use crate::error::ParseError;
use std::io::Read;
use tracing::debug;

/// CSV exports. The delimiter (`,`, `;` or tab) is sniffed from the first
/// non-empty line.
pub struct DelimitedParser;

impl StatementParser for DelimitedParser {
    fn format(&self) -> StatementFormat {
        StatementFormat::Delimited
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }

    fn parse(&self, input: &mut dyn Read, file_name: &str) -> Result<ParseResult, ParseError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let text = decode_text(&bytes)?;
        let delimiter = sniff_delimiter(&text);
        debug!(file_name = %file_name, delimiter = %(delimiter as char), "Reading CSV statement");

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ParseError::new(format!("malformed CSV: {}", e)))?;
            rows.push(record.iter().map(CellValue::text).collect::<Vec<_>>());
        }

        parse_grid(&rows, file_name)
    }
}

fn sniff_delimiter(text: &str) -> u8 {
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };
    let count = |c: char| line.matches(c).count();
    let (semicolons, commas, tabs) = (count(';'), count(','), count('\t'));

    if tabs > semicolons && tabs > commas {
        b'\t'
    } else if semicolons >= commas && semicolons > 0 {
        b';'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::io::Cursor;

    fn parse(text: &str) -> ParseResult {
        DelimitedParser
            .parse(&mut Cursor::new(text.as_bytes().to_vec()), "statement.csv")
            .unwrap()
    }

    #[test]
    fn semicolon_export_with_decimal_commas() {
        let result = parse(
            "Номер счета;40702810900000012345\n\
             Дата;Номер;Сумма;Назначение платежа\n\
             01.10.2024;5;1 500,25;Аренда\n",
        );
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].amount, Some(Decimal::new(150025, 2)));
        assert_eq!(
            result.account_metadata.and_then(|m| m.account_number),
            Some("40702810900000012345".to_string())
        );
    }

    #[test]
    fn comma_export_with_quoted_fields() {
        let result = parse(
            "date,number,amount,purpose\n\
             2024-10-01,7,\"1,250.00\",\"Rent, October\"\n",
        );
        assert_eq!(result.records[0].amount, Some(Decimal::new(125000, 2)));
        assert_eq!(
            result.records[0].payment_purpose.as_deref(),
            Some("Rent, October")
        );
    }

    #[test]
    fn sniffs_first_non_empty_line() {
        assert_eq!(sniff_delimiter("\n\na;b;c\n"), b';');
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn headerless_file_fails() {
        let err = DelimitedParser
            .parse(&mut Cursor::new(b"just,some,words\n".to_vec()), "x.csv")
            .unwrap_err();
        assert!(err.message.contains("header"));
    }
}
