//! Taxpayer identity and fiscal document identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A taxpayer registry code (RFC).
///
/// 12 characters for corporate taxpayers, 13 for individuals. Normalized to
/// uppercase on parse. Only ASCII letters, digits, and `&` (which appears in
/// corporate RFCs) are accepted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rfc(String);

impl Rfc {
    /// Parse and normalize an RFC, validating length and alphabet.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let rfc = s.trim().to_ascii_uppercase();
        if rfc.len() != 12 && rfc.len() != 13 {
            return Err(crate::Error::InvalidRfc(format!(
                "must be 12 or 13 chars, got {}",
                rfc.len()
            )));
        }
        for c in rfc.chars() {
            if !matches!(c, 'A'..='Z' | '0'..='9' | '&') {
                return Err(crate::Error::InvalidRfc(format!("invalid character: {c}")));
            }
        }
        Ok(Self(rfc))
    }

    /// Get the RFC string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a corporate (12-char) RFC.
    pub fn is_corporate(&self) -> bool {
        self.0.len() == 12
    }
}

impl TryFrom<String> for Rfc {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<Rfc> for String {
    fn from(rfc: Rfc) -> Self {
        rfc.0
    }
}

impl fmt::Debug for Rfc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rfc({self})")
    }
}

impl fmt::Display for Rfc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A CFDI folio fiscal: the UUID assigned by the stamping authority.
///
/// Canonical form is uppercase hyphenated (36 chars); input is accepted
/// case-insensitively.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiscalUuid(String);

impl FiscalUuid {
    /// Parse a folio fiscal, normalizing to uppercase.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let u = s.trim().to_ascii_uppercase();
        let bytes = u.as_bytes();
        if bytes.len() != 36 {
            return Err(crate::Error::InvalidFiscalUuid(format!(
                "must be 36 chars, got {}",
                bytes.len()
            )));
        }
        for (i, c) in u.chars().enumerate() {
            let ok = match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => c.is_ascii_hexdigit(),
            };
            if !ok {
                return Err(crate::Error::InvalidFiscalUuid(format!(
                    "invalid character {c:?} at position {i}"
                )));
            }
        }
        Ok(Self(u))
    }

    /// Get the canonical UUID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FiscalUuid {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<FiscalUuid> for String {
    fn from(u: FiscalUuid) -> Self {
        u.0
    }
}

impl fmt::Debug for FiscalUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiscalUuid({self})")
    }
}

impl fmt::Display for FiscalUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
