//! 1C:Enterprise client-bank exchange files (`1CClientBankExchange`).
//!
//! The file is a flat list of `Key=Value` lines grouped into a header,
//! account sections (`СекцияРасчСчет` .. `КонецРасчСчет`) and document
//! sections (`СекцияДокумент` .. `КонецДокумента`). Banks export it in
//! windows-1251 or UTF-8.

use super::tabular::{parse_amount, parse_date};
use super::{decode_text, non_empty, ParseResult, StatementFormat, StatementParser};
use crate::error::ParseError;
use crate::models::{AccountMetadata, StatementRecord, DEFAULT_CURRENCY};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use tracing::info;

const ACCOUNT_SECTION_START: &str = "СекцияРасчСчет";
const ACCOUNT_SECTION_END: &str = "КонецРасчСчет";
const DOCUMENT_SECTION_START: &str = "СекцияДокумент";
const DOCUMENT_SECTION_END: &str = "КонецДокумента";
const DOCUMENT_KIND: &str = "ВидДокумента";
const PAYMENT_KIND_MARKER: &str = "платежн";

static INN_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[,\s]+ИНН[:\s]+(\d+)").expect("INN pattern is valid")
});

pub struct OneCParser;

impl StatementParser for OneCParser {
    fn format(&self) -> StatementFormat {
        StatementFormat::OneC
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt"]
    }

    fn parse(&self, input: &mut dyn Read, file_name: &str) -> Result<ParseResult, ParseError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let text = decode_text(&bytes)?;

        let mut section = Section::Header;
        let mut header: HashMap<String, String> = HashMap::new();
        let mut document: HashMap<String, String> = HashMap::new();
        let mut section_opening: Option<String> = None;
        let mut section_closing: Option<String> = None;
        let mut records = Vec::new();
        let mut skipped_documents = 0usize;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line == ACCOUNT_SECTION_START {
                section = Section::Account;
                continue;
            }
            if line == ACCOUNT_SECTION_END {
                section = Section::Body;
                continue;
            }
            if line == DOCUMENT_SECTION_START || line.starts_with("СекцияДокумент=") {
                section = Section::Document;
                document.clear();
                if let Some((_, kind)) = line.split_once('=') {
                    document.insert(DOCUMENT_KIND.to_string(), kind.trim().to_string());
                }
                continue;
            }
            if line == DOCUMENT_SECTION_END {
                if section == Section::Document {
                    if is_payment(&document) {
                        records.push(to_record(&document, header.get("РасчСчет")));
                    } else {
                        skipped_documents += 1;
                    }
                }
                section = Section::Body;
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match section {
                Section::Header => {
                    header.insert(key.to_string(), value.to_string());
                }
                Section::Account => match key {
                    "НачальныйОстаток" if section_opening.is_none() => {
                        section_opening = Some(value.to_string());
                    }
                    "КонечныйОстаток" => section_closing = Some(value.to_string()),
                    _ => {}
                },
                Section::Document => {
                    document.insert(key.to_string(), value.to_string());
                }
                Section::Body => {}
            }
        }

        let metadata = header_metadata(&header, section_opening, section_closing);
        info!(
            file_name = %file_name,
            records = records.len(),
            skipped_documents = skipped_documents,
            "Parsed 1C exchange file"
        );

        Ok(ParseResult {
            records,
            account_metadata: (!metadata.is_empty()).then_some(metadata),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Account,
    Document,
    Body,
}

fn is_payment(document: &HashMap<String, String>) -> bool {
    document
        .get(DOCUMENT_KIND)
        .map(|kind| kind.to_lowercase().contains(PAYMENT_KIND_MARKER))
        .unwrap_or(false)
}

fn field(document: &HashMap<String, String>, key: &str) -> Option<String> {
    document.get(key).and_then(|v| non_empty(v))
}

fn to_record(document: &HashMap<String, String>, statement_account: Option<&String>) -> StatementRecord {
    let document_date = field(document, "Дата").and_then(|d| parse_date(&d));
    let booked_date = field(document, "ДатаСписано")
        .or_else(|| field(document, "ДатаПоступило"))
        .and_then(|d| parse_date(&d))
        .or(document_date);

    let (payer_name, payer_inline_inn) = field(document, "Плательщик1")
        .or_else(|| field(document, "Плательщик"))
        .map(|raw| split_name_and_inn(&raw))
        .unwrap_or((None, None));
    let (recipient_name, recipient_inline_inn) = field(document, "Получатель1")
        .or_else(|| field(document, "Получатель"))
        .map(|raw| split_name_and_inn(&raw))
        .unwrap_or((None, None));

    StatementRecord {
        document_number: field(document, "Номер"),
        document_date,
        amount: field(document, "Сумма").and_then(|a| parse_amount(&a)).map(|a| a.abs()),
        transaction_date: booked_date.and_then(|d| d.and_hms_opt(0, 0, 0)),
        account_number: statement_account.and_then(|a| non_empty(a)),
        payer_name,
        payer_tax_id: field(document, "ПлательщикИНН").or(payer_inline_inn),
        payer_account: field(document, "ПлательщикСчет")
            .or_else(|| field(document, "ПлательщикРасчСчет")),
        recipient_name,
        recipient_tax_id: field(document, "ПолучательИНН").or(recipient_inline_inn),
        recipient_account: field(document, "ПолучательСчет")
            .or_else(|| field(document, "ПолучательРасчСчет")),
        payment_purpose: field(document, "НазначениеПлатежа"),
        currency: DEFAULT_CURRENCY.to_string(),
    }
}

/// Splits `ООО "Олимп", ИНН: 2462074498` into name and INN.
fn split_name_and_inn(raw: &str) -> (Option<String>, Option<String>) {
    match INN_SUFFIX.captures(raw) {
        Some(caps) => {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(raw.len());
            (
                non_empty(&raw[..start]),
                caps.get(1).map(|m| m.as_str().to_string()),
            )
        }
        None => (non_empty(raw), None),
    }
}

fn header_metadata(
    header: &HashMap<String, String>,
    section_opening: Option<String>,
    section_closing: Option<String>,
) -> AccountMetadata {
    let get = |key: &str| header.get(key).and_then(|v| non_empty(v));

    AccountMetadata {
        client_name: None,
        tax_id: None,
        account_name: None,
        account_number: get("РасчСчет"),
        currency: get("РасчСчет").map(|_| DEFAULT_CURRENCY.to_string()),
        previous_statement_date: get("ДатаНачала").and_then(|d| parse_date(&d)),
        statement_date: get("ДатаКонца").and_then(|d| parse_date(&d)),
        opening_balance: get("НачальныйОстаток")
            .or(section_opening)
            .and_then(|b| parse_amount(&b)),
        closing_balance: section_closing.and_then(|b| parse_amount(&b)),
    }
}
