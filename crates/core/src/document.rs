//! Document records, kinds, and verification status.

use crate::identity::{FiscalUuid, Rfc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use time::OffsetDateTime;

/// Classification of a fiscal document, from its TipoDeComprobante code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Income,
    Expense,
    Transfer,
    Payroll,
    Payment,
}

impl DocumentKind {
    /// Map the single-letter wire code (I/E/T/N/P).
    pub fn from_code(code: &str) -> crate::Result<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "I" => Ok(Self::Income),
            "E" => Ok(Self::Expense),
            "T" => Ok(Self::Transfer),
            "N" => Ok(Self::Payroll),
            "P" => Ok(Self::Payment),
            other => Err(crate::Error::InvalidKindCode(other.to_string())),
        }
    }

    /// Stable lowercase form used in database rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
            Self::Payroll => "payroll",
            Self::Payment => "payment",
        }
    }

    /// Parse the stable form back.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "transfer" => Ok(Self::Transfer),
            "payroll" => Ok(Self::Payroll),
            "payment" => Ok(Self::Payment),
            other => Err(crate::Error::InvalidKindCode(other.to_string())),
        }
    }

    /// Kinds excluded from monetary income/expense totals.
    ///
    /// Payroll documents are deductions rather than trade flow, and payment
    /// complements carry a zero total by definition.
    pub fn excluded_from_totals(&self) -> bool {
        matches!(self, Self::Payroll | Self::Payment)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cancellation-status verification state of a stored document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    /// Never checked, or the last check failed.
    Unverified,
    /// The remote reports the document as in force.
    Active,
    /// The remote reports the document as cancelled.
    Cancelled,
    /// The remote answered but the state was unrecognizable.
    Error,
}

impl VerificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::InvalidVerificationState(other.to_string())),
        }
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one remote status verification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusCheck {
    pub state: VerificationState,
    /// The remote's textual Estado field, verbatim.
    pub raw_state: String,
    /// Secondary cancellation-status field, when present.
    pub cancellation_status: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

impl StatusCheck {
    /// A never-verified placeholder.
    pub fn unverified() -> Self {
        Self {
            state: VerificationState::Unverified,
            raw_state: String::new(),
            cancellation_status: None,
            checked_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A party (issuer or receiver) on a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub rfc: Rfc,
    pub name: String,
}

/// One concept line on a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

/// A classified, status-annotated fiscal document owned by one taxpayer.
///
/// `kind` and `is_payroll_complement` are derived purely from the parsed XML
/// and never change on re-verification; only `status` does.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub uuid: FiscalUuid,
    pub kind: DocumentKind,
    pub is_payroll_complement: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    #[serde(with = "rust_decimal::serde::str")]
    pub total: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub subtotal: Option<Decimal>,
    pub currency: String,
    pub payment_method: Option<String>,
    pub issuer: Party,
    pub receiver: Party,
    pub line_items: Vec<LineItem>,
    pub status: StatusCheck,
    /// Vault key of the raw XML payload.
    pub storage_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DocumentRecord {
    /// The amount used for income/expense statistics: the pre-tax subtotal
    /// when available, else the total.
    pub fn taxable_amount(&self) -> Decimal {
        self.subtotal.unwrap_or(self.total)
    }
}

/// Stable record identifier: hex SHA-256 over `"<RFC>:<UUID>"`.
///
/// Keys a record uniquely per taxpayer so that re-importing the same
/// document overwrites rather than duplicates.
pub fn record_id(owner: &Rfc, uuid: &FiscalUuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(uuid.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}
