//! Bank statement parsers and the registry that picks one per upload.

mod delimited;
mod one_c;
mod spreadsheet;
mod tabular;

use crate::error::ParseError;
use crate::models::{AccountMetadata, StatementRecord};
use encoding_rs::WINDOWS_1251;
use serde::Serialize;
use std::io::Read;
use thiserror::Error;
use tracing::debug;

pub use delimited::DelimitedParser;
pub use one_c::OneCParser;
pub use spreadsheet::SpreadsheetParser;

/// Output of one parser run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub records: Vec<StatementRecord>,
    pub account_metadata: Option<AccountMetadata>,
}

/// Statement formats this service understands, in selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFormat {
    OneC,
    Spreadsheet,
    Delimited,
}

impl StatementFormat {
    pub const ALL: [StatementFormat; 3] = [Self::OneC, Self::Spreadsheet, Self::Delimited];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneC => "one_c",
            Self::Spreadsheet => "spreadsheet",
            Self::Delimited => "delimited",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OneC => "1C:Enterprise exchange file",
            Self::Spreadsheet => "Excel workbook",
            Self::Delimited => "CSV export",
        }
    }

    pub fn parser(&self) -> Box<dyn StatementParser> {
        match self {
            Self::OneC => Box::new(OneCParser),
            Self::Spreadsheet => Box::new(SpreadsheetParser),
            Self::Delimited => Box::new(DelimitedParser),
        }
    }
}

/// Format label stored for uploads no parser claimed.
pub const UNKNOWN_FORMAT: &str = "unknown";

pub trait StatementParser: Send + Sync {
    fn format(&self) -> StatementFormat;

    /// Lowercase file extensions this parser claims, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn can_parse(&self, file_name: &str) -> bool {
        extension_of(file_name)
            .map(|ext| self.extensions().contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Reads the whole statement in one pass.
    fn parse(&self, input: &mut dyn Read, file_name: &str) -> Result<ParseResult, ParseError>;
}

fn extension_of(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("extension .{extension} is claimed by both {first} and {second}")]
    OverlappingExtension {
        extension: &'static str,
        first: &'static str,
        second: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedFormat {
    pub format: StatementFormat,
    pub name: &'static str,
    pub extensions: Vec<&'static str>,
}

/// Ordered parser table. Selection is first match on file name.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn StatementParser>>,
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Box<dyn StatementParser>>) -> Result<Self, RegistryError> {
        for (i, parser) in parsers.iter().enumerate() {
            for earlier in &parsers[..i] {
                if let Some(ext) = parser
                    .extensions()
                    .iter()
                    .find(|ext| earlier.extensions().contains(ext))
                {
                    return Err(RegistryError::OverlappingExtension {
                        extension: ext,
                        first: earlier.format().as_str(),
                        second: parser.format().as_str(),
                    });
                }
            }
        }
        Ok(Self { parsers })
    }

    /// Registry with every built-in format.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        Self::new(StatementFormat::ALL.iter().map(|f| f.parser()).collect())
    }

    pub fn select(&self, file_name: &str) -> Option<&dyn StatementParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(file_name))
            .map(|p| p.as_ref())
    }

    pub fn supported_formats(&self) -> Vec<SupportedFormat> {
        self.parsers
            .iter()
            .map(|p| SupportedFormat {
                format: p.format(),
                name: p.format().display_name(),
                extensions: p.extensions().to_vec(),
            })
            .collect()
    }
}

/// Decodes statement text exported as UTF-8 (with or without BOM) or
/// windows-1251.
pub(crate) fn decode_text(bytes: &[u8]) -> Result<String, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_string());
    }
    let (text, had_errors) = WINDOWS_1251.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(ParseError::new(
            "file is neither UTF-8 nor windows-1251 text",
        ));
    }
    debug!("Decoded statement as windows-1251");
    Ok(text.into_owned())
}

/// Trims and drops empty values.
pub(crate) fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeParser(StatementFormat, &'static [&'static str]);

    impl StatementParser for FakeParser {
        fn format(&self) -> StatementFormat {
            self.0
        }

        fn extensions(&self) -> &'static [&'static str] {
            self.1
        }

        fn parse(&self, _: &mut dyn Read, _: &str) -> Result<ParseResult, ParseError> {
            Ok(ParseResult::default())
        }
    }

    #[test]
    fn defaults_cover_every_format() {
        let registry = ParserRegistry::with_defaults().unwrap();
        assert_eq!(
            registry.select("выписка.TXT").map(|p| p.format()),
            Some(StatementFormat::OneC)
        );
        assert_eq!(
            registry.select("statement.xlsx").map(|p| p.format()),
            Some(StatementFormat::Spreadsheet)
        );
        assert_eq!(
            registry.select("statement.xls").map(|p| p.format()),
            Some(StatementFormat::Spreadsheet)
        );
        assert_eq!(
            registry.select("statement_oct.csv").map(|p| p.format()),
            Some(StatementFormat::Delimited)
        );
    }

    #[test]
    fn unknown_extensions_are_not_claimed() {
        let registry = ParserRegistry::with_defaults().unwrap();
        assert!(registry.select("statement.pdf").is_none());
        assert!(registry.select("csv").is_none());
        assert!(registry.select(".csv").is_none());
    }

    #[test]
    fn overlapping_extensions_are_rejected() {
        let result = ParserRegistry::new(vec![
            Box::new(FakeParser(StatementFormat::Delimited, &["csv", "txt"])),
            Box::new(FakeParser(StatementFormat::OneC, &["txt"])),
        ]);
        assert_eq!(
            result.err(),
            Some(RegistryError::OverlappingExtension {
                extension: "txt",
                first: "delimited",
                second: "one_c",
            })
        );
    }

    #[test]
    fn supported_formats_follow_registration_order() {
        let formats = ParserRegistry::with_defaults().unwrap().supported_formats();
        let order: Vec<_> = formats.iter().map(|f| f.format).collect();
        assert_eq!(order, StatementFormat::ALL.to_vec());
        assert_eq!(formats[1].extensions, vec!["xlsx", "xls"]);
    }
}
