//! Per-taxpayer aggregate ledger and on-demand statistics types.

use crate::document::{DocumentKind, DocumentRecord, VerificationState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Running aggregate over one taxpayer's full record set.
///
/// Always recomputed from the complete record set after a bulk write, never
/// incrementally patched, so it cannot drift from the rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxpayerLedger {
    pub total: u64,
    pub unverified: u64,
    pub active: u64,
    pub cancelled: u64,
    pub error: u64,
    pub income: u64,
    pub expense: u64,
    pub transfer: u64,
    pub payroll: u64,
    pub payment: u64,
    /// Sum of active income-document amounts (payroll/payment excluded).
    #[serde(with = "rust_decimal::serde::str")]
    pub active_income: Decimal,
    /// Sum of active expense-document amounts.
    #[serde(with = "rust_decimal::serde::str")]
    pub active_expense: Decimal,
}

impl TaxpayerLedger {
    /// Fold the full record set into a fresh ledger.
    pub fn compute<'a>(records: impl IntoIterator<Item = &'a DocumentRecord>) -> Self {
        let mut ledger = Self::default();
        for record in records {
            ledger.total += 1;
            match record.status.state {
                VerificationState::Unverified => ledger.unverified += 1,
                VerificationState::Active => ledger.active += 1,
                VerificationState::Cancelled => ledger.cancelled += 1,
                VerificationState::Error => ledger.error += 1,
            }
            match record.kind {
                DocumentKind::Income => ledger.income += 1,
                DocumentKind::Expense => ledger.expense += 1,
                DocumentKind::Transfer => ledger.transfer += 1,
                DocumentKind::Payroll => ledger.payroll += 1,
                DocumentKind::Payment => ledger.payment += 1,
            }
            if record.status.state == VerificationState::Active
                && !record.kind.excluded_from_totals()
            {
                match record.kind {
                    DocumentKind::Income => ledger.active_income += record.taxable_amount(),
                    DocumentKind::Expense => ledger.active_expense += record.taxable_amount(),
                    _ => {}
                }
            }
        }
        ledger
    }

    /// Status counts must always partition the total.
    pub fn is_consistent(&self) -> bool {
        self.unverified + self.active + self.cancelled + self.error == self.total
    }
}

/// Statistics for one calendar period.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub count: u64,
    pub active: u64,
    pub cancelled: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub income_total: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub expense_total: Decimal,
}

/// One counterparty line in a summary report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterpartyEntry {
    pub rfc: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total: Decimal,
    /// Share of the grand total, as a percentage.
    pub share_pct: f64,
}

/// Clients (from income flow) and suppliers (from expense flow).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CounterpartySummary {
    pub clients: Vec<CounterpartyEntry>,
    pub suppliers: Vec<CounterpartyEntry>,
}

/// A cached job annotated for diagnostics listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedJobInfo {
    pub job: crate::job::RetrievalJob,
    pub valid: bool,
    pub age_hours: f64,
}

impl CachedJobInfo {
    pub fn annotate(job: crate::job::RetrievalJob, now: OffsetDateTime) -> Self {
        let valid = !job.is_expired(now);
        let age_hours = job.age_hours(now);
        Self { job, valid, age_hours }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Party, StatusCheck};
    use crate::identity::{FiscalUuid, Rfc};
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn record(kind: DocumentKind, state: VerificationState, total: &str) -> DocumentRecord {
        let now = datetime!(2024-03-15 12:00:00 UTC);
        DocumentRecord {
            uuid: FiscalUuid::parse("AD662D33-6934-459C-A128-BDF0393E0F44").unwrap(),
            kind,
            is_payroll_complement: kind == DocumentKind::Payroll,
            issue_date: now,
            total: total.parse().unwrap(),
            subtotal: None,
            currency: "MXN".to_string(),
            payment_method: None,
            issuer: Party {
                rfc: Rfc::parse("XAXX010101000").unwrap(),
                name: "Issuer".to_string(),
            },
            receiver: Party {
                rfc: Rfc::parse("XEXX010101000").unwrap(),
                name: "Receiver".to_string(),
            },
            line_items: vec![],
            status: StatusCheck {
                state,
                raw_state: String::new(),
                cancellation_status: None,
                checked_at: now,
            },
            storage_path: String::new(),
            stored_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn ledger_partitions_status_counts() {
        let records = vec![
            record(DocumentKind::Income, VerificationState::Active, "100"),
            record(DocumentKind::Expense, VerificationState::Cancelled, "50"),
            record(DocumentKind::Transfer, VerificationState::Unverified, "0"),
        ];
        let ledger = TaxpayerLedger::compute(&records);
        assert_eq!(ledger.total, 3);
        assert!(ledger.is_consistent());
        assert_eq!(ledger.active_income, Decimal::from(100));
        assert_eq!(ledger.active_expense, Decimal::ZERO);
    }

    #[test]
    fn payroll_and_payment_excluded_from_monetary_totals() {
        let records = vec![
            record(DocumentKind::Payroll, VerificationState::Active, "8000"),
            record(DocumentKind::Payment, VerificationState::Active, "0"),
            record(DocumentKind::Income, VerificationState::Active, "2500"),
        ];
        let ledger = TaxpayerLedger::compute(&records);
        assert_eq!(ledger.active_income, Decimal::from(2500));
        assert_eq!(ledger.payroll, 1);
        assert_eq!(ledger.payment, 1);
    }

    #[test]
    fn cancelled_records_do_not_contribute_amounts() {
        let records = vec![record(DocumentKind::Income, VerificationState::Cancelled, "999")];
        let ledger = TaxpayerLedger::compute(&records);
        assert_eq!(ledger.active_income, Decimal::ZERO);
        assert_eq!(ledger.cancelled, 1);
    }
}
