//! Content-derived external identity for imported transactions.
//!
//! The key covers the fields a bank keeps stable between a preliminary and a
//! final export of one transaction: document number, booking date, amount,
//! payer account and recipient account, scoped by the owning user. Narrative
//! fields are excluded so corrected descriptions update the existing row.

use crate::error::{RowError, RowFailure};
use crate::models::StatementRecord;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

const SEPARATOR: &str = "|";

/// Lowercase hex SHA-256 over the `|`-joined components.
fn digest(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(components.join(SEPARATOR).as_bytes());
    hex::encode(hasher.finalize())
}

/// External identity of one record, or why it cannot have one.
pub fn external_id(user_id: Uuid, record: &StatementRecord) -> Result<String, RowError> {
    external_id_with_occurrence(user_id, record, 1)
}

/// `occurrence` > 1 is appended for repeated payloads that carry no
/// document number.
fn external_id_with_occurrence(
    user_id: Uuid,
    record: &StatementRecord,
    occurrence: u32,
) -> Result<String, RowError> {
    let amount = record
        .amount
        .ok_or_else(|| RowError::new(record.display_number(), RowFailure::MissingAmount))?;
    let date = record
        .effective_date()
        .ok_or_else(|| RowError::new(record.display_number(), RowFailure::MissingDate))?;

    let user = user_id.to_string();
    let date = date.format("%Y-%m-%d").to_string();
    let amount = amount.abs().normalize().to_string();
    let ordinal = occurrence.to_string();

    let mut components = vec![
        user.as_str(),
        record.document_number.as_deref().unwrap_or("").trim(),
        date.as_str(),
        amount.as_str(),
        record.payer_account.as_deref().unwrap_or("").trim(),
        record.recipient_account.as_deref().unwrap_or("").trim(),
    ];
    if occurrence > 1 {
        components.push(ordinal.as_str());
    }
    Ok(digest(&components))
}

/// Identities for every record of one statement, in order.
///
/// Records without a document number whose key repeats within the file get
/// their occurrence ordinal mixed in, so two equal same-day transfers stay
/// two transactions and a re-upload of the same file maps onto the same
/// keys.
pub fn assign_identities(
    user_id: Uuid,
    records: &[StatementRecord],
) -> Vec<Result<String, RowError>> {
    let mut seen: HashMap<String, u32> = HashMap::new();

    records
        .iter()
        .map(|record| {
            let base = external_id(user_id, record)?;
            if record.document_number.as_deref().is_some_and(|n| !n.trim().is_empty()) {
                return Ok(base);
            }
            let occurrence = seen.entry(base.clone()).or_insert(0);
            *occurrence += 1;
            if *occurrence == 1 {
                Ok(base)
            } else {
                external_id_with_occurrence(user_id, record, *occurrence)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn record(doc: Option<&str>, amount: &str, purpose: &str) -> StatementRecord {
        StatementRecord {
            document_number: doc.map(str::to_string),
            document_date: NaiveDate::from_ymd_opt(2024, 10, 3),
            amount: Some(amount.parse().unwrap()),
            payer_account: Some("40702810900000012345".into()),
            recipient_account: Some("40702810400000054321".into()),
            payment_purpose: Some(purpose.into()),
            currency: "RUB".into(),
            ..Default::default()
        }
    }

    #[test]
    fn narrative_drift_keeps_identity() {
        let user = Uuid::new_v4();
        let preliminary = record(Some("17"), "250.00", "Оплата");
        let mut corrected = record(Some("17"), "250.00", "Оплата по счету 5 от 01.10.2024");
        corrected.recipient_name = Some("ООО Олимп".into());
        assert_eq!(
            external_id(user, &preliminary).unwrap(),
            external_id(user, &corrected).unwrap()
        );
    }

    #[test]
    fn amount_scale_does_not_matter() {
        let user = Uuid::new_v4();
        assert_eq!(
            external_id(user, &record(Some("1"), "250.00", "a")).unwrap(),
            external_id(user, &record(Some("1"), "250", "a")).unwrap()
        );
    }

    #[test]
    fn different_amounts_differ() {
        let user = Uuid::new_v4();
        assert_ne!(
            external_id(user, &record(Some("17"), "250.00", "a")).unwrap(),
            external_id(user, &record(Some("17"), "250.01", "a")).unwrap()
        );
    }

    #[test]
    fn identity_is_scoped_per_user() {
        let rec = record(Some("17"), "250.00", "a");
        assert_ne!(
            external_id(Uuid::new_v4(), &rec).unwrap(),
            external_id(Uuid::new_v4(), &rec).unwrap()
        );
    }

    #[test]
    fn key_is_lowercase_hex_sha256() {
        let id = external_id(Uuid::new_v4(), &record(Some("1"), "1", "a")).unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn missing_amount_is_a_row_error() {
        let mut rec = record(Some("9"), "1", "a");
        rec.amount = None;
        let err = external_id(Uuid::new_v4(), &rec).unwrap_err();
        assert!(matches!(err.reason, RowFailure::MissingAmount));
        assert_eq!(err.document_number, "9");
    }

    #[test]
    fn transaction_date_backs_up_document_date() {
        let mut rec = record(Some("9"), "1", "a");
        rec.document_date = None;
        assert!(external_id(Uuid::new_v4(), &rec).is_err());
        rec.transaction_date = NaiveDate::from_ymd_opt(2024, 10, 3).and_then(|d| d.and_hms_opt(9, 0, 0));
        assert!(external_id(Uuid::new_v4(), &rec).is_ok());
    }

    #[test]
    fn repeated_payloads_without_number_get_distinct_stable_keys() {
        let user = Uuid::new_v4();
        let records = vec![
            record(None, "100", "Перевод"),
            record(None, "100", "Перевод"),
            record(None, "100", "Перевод"),
        ];
        let first: Vec<_> = assign_identities(user, &records)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let second: Vec<_> = assign_identities(user, &records)
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(first, second);
        assert_eq!(first[0], external_id(user, &records[0]).unwrap());
        assert_ne!(first[0], first[1]);
        assert_ne!(first[1], first[2]);
    }

    #[test]
    fn repeated_document_numbers_share_a_key() {
        let user = Uuid::new_v4();
        let records = vec![record(Some("5"), "100", "a"), record(Some("5"), "100", "b")];
        let ids: Vec<_> = assign_identities(user, &records)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(ids[0], ids[1]);
    }

    #[test]
    fn amount_is_unsigned_in_key() {
        let user = Uuid::new_v4();
        let mut negative = record(Some("3"), "10", "a");
        negative.amount = Some(Decimal::new(-1000, 2));
        assert_eq!(
            external_id(user, &negative).unwrap(),
            external_id(user, &record(Some("3"), "10", "a")).unwrap()
        );
    }
}
