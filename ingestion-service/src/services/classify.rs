use crate::models::{StatementRecord, TransactionDirection};

/// Direction of a record relative to the statement's own account.
///
/// With both counterparty accounts present, the record is an expense when
/// the payer is the statement account and income otherwise. Anything less
/// is booked as an expense.
pub fn classify(record: &StatementRecord, statement_account: Option<&str>) -> TransactionDirection {
    let own = present(statement_account).or_else(|| present(record.account_number.as_deref()));

    match (
        present(record.payer_account.as_deref()),
        present(record.recipient_account.as_deref()),
    ) {
        (Some(payer), Some(_)) if Some(payer) == own => TransactionDirection::Expense,
        (Some(_), Some(_)) => TransactionDirection::Income,
        _ => TransactionDirection::Expense,
    }
}

fn present(account: Option<&str>) -> Option<&str> {
    account.map(str::trim).filter(|a| !a.is_empty())
}
