//! Shared reader for grid-shaped statements (spreadsheets and CSV).
//!
//! A grid is a list of rows of [`CellValue`]. Label/value rows before the
//! header carry account metadata; the header row is the first row where a
//! date column and an amount column (or debit/credit pair) both resolve;
//! every later row with a readable date is a transaction.

use super::{non_empty, ParseResult};
use crate::error::ParseError;
use crate::models::{AccountMetadata, StatementRecord, DEFAULT_CURRENCY};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl CellValue {
    pub(crate) fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Self::Empty
        } else {
            Self::Text(value)
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn as_string(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Text(s) => non_empty(s),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Self::Number(n) => Some(n.to_string()),
            Self::Date(ts) => Some(ts.format("%d.%m.%Y").to_string()),
        }
    }

    fn as_amount(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Decimal::from_f64(*n).map(|d| d.round_dp(2)),
            Self::Text(s) => parse_amount(s),
            _ => None,
        }
    }

    fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(ts) => Some(*ts),
            Self::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

const DATE_ALIASES: &[&str] = &[
    "дата документа",
    "дата операции",
    "дата проводки",
    "дата",
    "date",
    "transaction date",
    "booking date",
];
const AMOUNT_ALIASES: &[&str] = &["сумма", "amount", "sum"];
const DEBIT_ALIASES: &[&str] = &["дебет", "debit", "списание", "расход", "withdrawal"];
const CREDIT_ALIASES: &[&str] = &["кредит", "credit", "поступление", "приход", "deposit"];
const DOCUMENT_NUMBER_ALIASES: &[&str] = &[
    "номер документа",
    "№ документа",
    "document number",
    "номер",
    "number",
    "№",
];
const PAYER_ACCOUNT_ALIASES: &[&str] = &["счет плательщика", "счет дт", "payer account"];
const RECIPIENT_ACCOUNT_ALIASES: &[&str] = &[
    "счет получателя",
    "счет кт",
    "recipient account",
    "beneficiary account",
];
const PAYER_TAX_ID_ALIASES: &[&str] = &["инн плательщика", "payer inn", "payer tax id"];
const RECIPIENT_TAX_ID_ALIASES: &[&str] = &["инн получателя", "recipient inn", "recipient tax id"];
const PAYER_NAME_ALIASES: &[&str] = &["плательщик", "payer"];
const RECIPIENT_NAME_ALIASES: &[&str] = &["получатель", "recipient", "beneficiary", "контрагент"];
const PURPOSE_ALIASES: &[&str] = &[
    "назначение платежа",
    "назначение",
    "purpose",
    "description",
    "описание",
];
const CURRENCY_ALIASES: &[&str] = &["валюта", "currency"];

/// Column positions resolved from a header row.
#[derive(Debug, Clone, Default, PartialEq)]
struct Columns {
    date: usize,
    amount: Option<usize>,
    debit: Option<usize>,
    credit: Option<usize>,
    document_number: Option<usize>,
    payer_account: Option<usize>,
    recipient_account: Option<usize>,
    payer_tax_id: Option<usize>,
    recipient_tax_id: Option<usize>,
    payer_name: Option<usize>,
    recipient_name: Option<usize>,
    purpose: Option<usize>,
    currency: Option<usize>,
}

/// Finds a column for the first alias that matches exactly, then for the
/// first alias contained in a header. Claimed columns are never reused.
fn resolve(headers: &[String], aliases: &[&str], claimed: &mut Vec<usize>) -> Option<usize> {
    let free = |i: &usize| !claimed.contains(i) && !headers[*i].is_empty();

    let found = aliases
        .iter()
        .find_map(|alias| (0..headers.len()).filter(free).find(|&i| headers[i] == *alias))
        .or_else(|| {
            aliases.iter().find_map(|alias| {
                (0..headers.len())
                    .filter(free)
                    .find(|&i| headers[i].contains(alias))
            })
        });

    if let Some(i) = found {
        claimed.push(i);
    }
    found
}

impl Columns {
    fn from_header(row: &[CellValue]) -> Option<Self> {
        let headers: Vec<String> = row
            .iter()
            .map(|c| c.as_string().unwrap_or_default().to_lowercase())
            .collect();

        // Row-number columns ("№ п/п") never hold document numbers.
        let mut claimed: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.contains("п/п"))
            .map(|(i, _)| i)
            .collect();

        let date = resolve(&headers, DATE_ALIASES, &mut claimed)?;
        let debit = resolve(&headers, DEBIT_ALIASES, &mut claimed);
        let credit = resolve(&headers, CREDIT_ALIASES, &mut claimed);
        let amount = resolve(&headers, AMOUNT_ALIASES, &mut claimed);
        if amount.is_none() && debit.is_none() && credit.is_none() {
            return None;
        }

        let payer_account = resolve(&headers, PAYER_ACCOUNT_ALIASES, &mut claimed);
        let recipient_account = resolve(&headers, RECIPIENT_ACCOUNT_ALIASES, &mut claimed);
        let payer_tax_id = resolve(&headers, PAYER_TAX_ID_ALIASES, &mut claimed);
        let recipient_tax_id = resolve(&headers, RECIPIENT_TAX_ID_ALIASES, &mut claimed);
        let document_number = resolve(&headers, DOCUMENT_NUMBER_ALIASES, &mut claimed);
        let purpose = resolve(&headers, PURPOSE_ALIASES, &mut claimed);
        let currency = resolve(&headers, CURRENCY_ALIASES, &mut claimed);
        let payer_name = resolve(&headers, PAYER_NAME_ALIASES, &mut claimed);
        let recipient_name = resolve(&headers, RECIPIENT_NAME_ALIASES, &mut claimed);

        Some(Self {
            date,
            amount,
            debit,
            credit,
            document_number,
            payer_account,
            recipient_account,
            payer_tax_id,
            recipient_tax_id,
            payer_name,
            recipient_name,
            purpose,
            currency,
        })
    }
}

fn cell(row: &[CellValue], index: Option<usize>) -> Option<&CellValue> {
    index.and_then(|i| row.get(i))
}

fn text_at(row: &[CellValue], index: Option<usize>) -> Option<String> {
    cell(row, index).and_then(CellValue::as_string)
}

fn amount_at(row: &[CellValue], index: Option<usize>) -> Option<Decimal> {
    cell(row, index).and_then(CellValue::as_amount)
}

/// Reads the row amount as an unsigned magnitude. `None` marks an
/// unreadable amount, including a debit/credit pair with nothing in it.
fn row_amount(row: &[CellValue], columns: &Columns) -> Option<Decimal> {
    if let Some(amount) = amount_at(row, columns.amount) {
        return Some(amount.abs());
    }
    let credit = amount_at(row, columns.credit);
    let debit = amount_at(row, columns.debit);
    credit
        .filter(|a| !a.is_zero())
        .or(debit.filter(|a| !a.is_zero()))
        .or(credit)
        .or(debit)
        .map(|a| a.abs())
}

/// Applies one label/value row to the metadata. Returns whether the label
/// was recognised.
fn apply_metadata_row(row: &[CellValue], metadata: &mut AccountMetadata) -> bool {
    let Some(label) = row.first().and_then(CellValue::as_string) else {
        return false;
    };
    let label = label.to_lowercase();
    let value = row.iter().skip(1).find(|c| !c.is_empty());
    let text = value.and_then(CellValue::as_string);
    let has = |needles: &[&str]| needles.iter().any(|n| label.contains(n));

    if has(&["дата предыдущей выписки", "previous statement date"]) {
        metadata.previous_statement_date = value.and_then(CellValue::as_timestamp).map(|ts| ts.date());
    } else if has(&["дата выписки", "statement date", "дата формирования"]) {
        metadata.statement_date = value.and_then(CellValue::as_timestamp).map(|ts| ts.date());
    } else if has(&["входящий остаток", "opening balance"]) {
        metadata.opening_balance = value.and_then(CellValue::as_amount);
    } else if has(&["исходящий остаток", "closing balance"]) {
        metadata.closing_balance = value.and_then(CellValue::as_amount);
    } else if has(&["инн", "inn", "tax id"]) {
        metadata.tax_id = text;
    } else if has(&["клиент", "client"]) {
        metadata.client_name = text;
    } else if has(&["наименование счета", "account name"]) {
        metadata.account_name = text;
    } else if has(&["номер счета", "account number"]) {
        metadata.account_number = text;
    } else if has(&["валюта счета", "account currency", "валюта", "currency"]) {
        metadata.currency = text.map(|t| currency_code(&t));
    } else {
        return false;
    }
    true
}

/// Maps currency names and ISO numeric codes to alphabetic codes.
pub(crate) fn currency_code(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("810") || lower.contains("643") || lower.contains("рубл") || lower.contains("rub") {
        "RUB".to_string()
    } else if lower.contains("840") || lower.contains("доллар") || lower.contains("dollar") || lower.contains("usd") {
        "USD".to_string()
    } else if lower.contains("978") || lower.contains("евро") || lower.contains("euro") || lower.contains("eur") {
        "EUR".to_string()
    } else if lower.contains("156") || lower.contains("юан") || lower.contains("yuan") || lower.contains("cny") {
        "CNY".to_string()
    } else {
        raw.trim().to_uppercase()
    }
}

pub(crate) fn parse_grid(rows: &[Vec<CellValue>], file_name: &str) -> Result<ParseResult, ParseError> {
    let mut metadata = AccountMetadata::default();
    let mut columns: Option<Columns> = None;
    let mut records = Vec::new();
    let mut skipped_rows = 0usize;

    for (index, row) in rows.iter().enumerate() {
        if row.iter().all(CellValue::is_empty) {
            continue;
        }

        if columns.is_none() {
            match Columns::from_header(row) {
                Some(found) => {
                    debug!(row = index + 1, columns = ?found, "Found statement header");
                    columns = Some(found);
                }
                None => {
                    apply_metadata_row(row, &mut metadata);
                }
            }
            continue;
        }
        let Some(cols) = columns.as_ref() else {
            continue;
        };

        let Some(timestamp) = cell(row, Some(cols.date)).and_then(CellValue::as_timestamp) else {
            // Totals, footers and trailing balance rows.
            if !apply_metadata_row(row, &mut metadata) {
                skipped_rows += 1;
            }
            continue;
        };

        let amount = row_amount(row, cols);
        if amount.is_some_and(|a| a.is_zero()) {
            continue;
        }

        let currency = text_at(row, cols.currency)
            .map(|c| currency_code(&c))
            .or_else(|| metadata.currency.clone())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        records.push(StatementRecord {
            document_number: text_at(row, cols.document_number),
            document_date: Some(timestamp.date()),
            amount,
            transaction_date: Some(timestamp),
            account_number: metadata.account_number.clone(),
            payer_name: text_at(row, cols.payer_name),
            payer_tax_id: text_at(row, cols.payer_tax_id),
            payer_account: text_at(row, cols.payer_account),
            recipient_name: text_at(row, cols.recipient_name),
            recipient_tax_id: text_at(row, cols.recipient_tax_id),
            recipient_account: text_at(row, cols.recipient_account),
            payment_purpose: text_at(row, cols.purpose),
            currency,
        });
    }

    if columns.is_none() {
        return Err(ParseError::new(
            "no header row with date and amount columns was found",
        ));
    }

    info!(
        file_name = %file_name,
        records = records.len(),
        skipped_rows = skipped_rows,
        "Parsed tabular statement"
    );

    Ok(ParseResult {
        records,
        account_metadata: (!metadata.is_empty()).then_some(metadata),
    })
}

/// Parses bank-formatted amounts: `1 234,56`, `1,234.56`, `-15.00 Kp/Cr`.
pub(crate) fn parse_amount(raw: &str) -> Option<Decimal> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (kept.rfind('.'), kept.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (None, Some(_)) => kept.replace(',', "."),
        _ => kept,
    };
    Decimal::from_str(&normalized).ok()
}

const DATE_FORMATS: &[&str] = &["%d.%m.%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%y"];
const TIMESTAMP_FORMATS: &[&str] = &[
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.trim().split_whitespace().next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| parse_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> CellValue {
        CellValue::text(s)
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn grid() -> Vec<Vec<CellValue>> {
        vec![
            vec![t("Клиент"), t("ООО Ромашка")],
            vec![t("ИНН"), t("7701234567")],
            vec![t("Номер счета"), t("40702810900000012345")],
            vec![t("Валюта счета"), t("Российский рубль (810)")],
            vec![t("Входящий остаток"), t("1 000,00 Kp/Cr")],
            vec![],
            vec![
                t("№ п/п"),
                t("Дата"),
                t("Номер документа"),
                t("Счет плательщика"),
                t("Плательщик"),
                t("Счет получателя"),
                t("Получатель"),
                t("Сумма"),
                t("Назначение платежа"),
            ],
            vec![
                CellValue::Number(1.0),
                t("03.10.2024"),
                CellValue::Number(17.0),
                t("40702810900000012345"),
                t("ООО Ромашка"),
                t("40702810400000054321"),
                t("ООО Олимп"),
                CellValue::Number(-250.0),
                t("Оплата по счету 5"),
            ],
            vec![
                CellValue::Number(2.0),
                t("04.10.2024"),
                t("18"),
                t("40702810400000054321"),
                t("ИП Иванов"),
                t("40702810900000012345"),
                t("ООО Ромашка"),
                t("abc"),
                t("Возврат"),
            ],
            vec![
                CellValue::Number(3.0),
                t("05.10.2024"),
                t("19"),
                CellValue::Empty,
                CellValue::Empty,
                CellValue::Empty,
                CellValue::Empty,
                t("0,00"),
                t("Нулевая"),
            ],
            vec![t("Итого"), CellValue::Empty, CellValue::Empty, CellValue::Empty, CellValue::Empty, CellValue::Empty, CellValue::Empty, t("250,00")],
            vec![t("Исходящий остаток"), t("750,00")],
        ]
    }

    #[test]
    fn reads_metadata_header_and_rows() {
        let result = parse_grid(&grid(), "statement.xlsx").unwrap();
        assert_eq!(result.records.len(), 2);

        let first = &result.records[0];
        assert_eq!(first.document_number.as_deref(), Some("17"));
        assert_eq!(first.amount, Some(dec("250")));
        assert_eq!(first.payer_name.as_deref(), Some("ООО Ромашка"));
        assert_eq!(first.recipient_account.as_deref(), Some("40702810400000054321"));
        assert_eq!(first.account_number.as_deref(), Some("40702810900000012345"));
        assert_eq!(first.currency, "RUB");

        let metadata = result.account_metadata.unwrap();
        assert_eq!(metadata.client_name.as_deref(), Some("ООО Ромашка"));
        assert_eq!(metadata.tax_id.as_deref(), Some("7701234567"));
        assert_eq!(metadata.opening_balance, Some(dec("1000.00")));
        assert_eq!(metadata.closing_balance, Some(dec("750.00")));
    }

    #[test]
    fn unreadable_amount_is_kept_without_amount() {
        let result = parse_grid(&grid(), "statement.xlsx").unwrap();
        let second = &result.records[1];
        assert_eq!(second.document_number.as_deref(), Some("18"));
        assert_eq!(second.amount, None);
    }

    #[test]
    fn debit_and_credit_columns() {
        let rows = vec![
            vec![t("Дата операции"), t("Описание"), t("Дебет"), t("Кредит")],
            vec![t("01.10.2024"), t("Комиссия"), t("15,50"), CellValue::Empty],
            vec![t("02.10.2024"), t("Поступление"), CellValue::Empty, t("1 200,00")],
            vec![t("03.10.2024"), t("Пусто"), CellValue::Empty, CellValue::Empty],
            vec![t("04.10.2024"), t("Сторно"), t("0,00"), CellValue::Empty],
        ];
        let result = parse_grid(&rows, "bank.csv").unwrap();
        let amounts: Vec<_> = result.records.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![Some(dec("15.50")), Some(dec("1200.00")), None]);
        assert_eq!(result.records[0].payment_purpose.as_deref(), Some("Комиссия"));
        assert_eq!(result.records[2].payment_purpose.as_deref(), Some("Пусто"));
    }

    #[test]
    fn unreadable_debit_and_credit_is_kept_without_amount() {
        let rows = vec![
            vec![t("Дата операции"), t("Описание"), t("Дебет"), t("Кредит")],
            vec![t("03.10.2024"), t("Сбой"), t("abc"), CellValue::Empty],
        ];
        let result = parse_grid(&rows, "bank.csv").unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].amount, None);
        assert_eq!(result.records[0].payment_purpose.as_deref(), Some("Сбой"));
    }

    #[test]
    fn exact_alias_beats_substring() {
        let rows = vec![
            vec![t("Дата валютирования"), t("Дата"), t("Сумма")],
            vec![t("not a date"), t("01.10.2024"), t("10")],
        ];
        let result = parse_grid(&rows, "bank.csv").unwrap();
        assert_eq!(result.records.len(), 1);
    }

    #[test]
    fn missing_header_is_a_parse_error() {
        let rows = vec![vec![t("hello"), t("world")]];
        assert!(parse_grid(&rows, "bank.csv").is_err());
    }

    #[test]
    fn amount_formats() {
        assert_eq!(parse_amount("1 234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("-15.00 Kp/Cr"), Some(dec("-15.00")));
        assert_eq!(parse_amount("\u{a0}500\u{a0}000,00"), Some(dec("500000.00")));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 10, 3);
        assert_eq!(parse_date("03.10.2024"), expected);
        assert_eq!(parse_date("2024-10-03"), expected);
        assert_eq!(parse_date("03/10/2024 12:30"), expected);
        assert_eq!(
            parse_timestamp("03.10.2024 12:30:00").map(|ts| ts.time().to_string()),
            Some("12:30:00".to_string())
        );
        assert_eq!(parse_date("Итого"), None);
    }

    #[test]
    fn currency_codes() {
        assert_eq!(currency_code("Российский рубль (810)"), "RUB");
        assert_eq!(currency_code("840"), "USD");
        assert_eq!(currency_code("gbp"), "GBP");
    }
}
