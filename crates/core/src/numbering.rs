use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Human-readable document number, e.g. `FAC-2026-0042`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentNumber(pub String);

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Independent numbering sequences. Quote and invoice counters never share values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    Quote,
    Invoice,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Invoice => "invoice",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberingScheme {
    pub quote_prefix: String,
    pub invoice_prefix: String,
}

impl Default for NumberingScheme {
    fn default() -> Self {
        Self { quote_prefix: "DEV".to_string(), invoice_prefix: "FAC".to_string() }
    }
}

impl NumberingScheme {
    pub fn new(
        quote_prefix: impl Into<String>,
        invoice_prefix: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let scheme =
            Self { quote_prefix: quote_prefix.into(), invoice_prefix: invoice_prefix.into() };
        validate_prefix("quote_number_prefix", &scheme.quote_prefix)?;
        validate_prefix("invoice_number_prefix", &scheme.invoice_prefix)?;
        if scheme.quote_prefix == scheme.invoice_prefix {
            return Err(DomainError::invalid_field(
                "invoice_number_prefix",
                "must differ from quote_number_prefix",
            ));
        }
        Ok(scheme)
    }

    /// Sequences restart every calendar year.
    pub fn period(at: DateTime<Utc>) -> i32 {
        at.year()
    }

    pub fn format(&self, kind: SequenceKind, period: i32, value: u64) -> DocumentNumber {
        let prefix = match kind {
            SequenceKind::Quote => &self.quote_prefix,
            SequenceKind::Invoice => &self.invoice_prefix,
        };
        DocumentNumber(format!("{prefix}-{period}-{value:04}"))
    }
}

pub(crate) fn validate_prefix(field: &str, prefix: &str) -> Result<(), DomainError> {
    let valid = !prefix.is_empty()
        && prefix.len() <= 8
        && prefix.chars().all(|ch| ch.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(DomainError::invalid_field(field, "must be 1-8 ASCII letters or digits"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{NumberingScheme, SequenceKind};

    #[test]
    fn formats_zero_padded_numbers_per_kind() {
        let scheme = NumberingScheme::default();

        assert_eq!(scheme.format(SequenceKind::Quote, 2026, 7).0, "DEV-2026-0007");
        assert_eq!(scheme.format(SequenceKind::Invoice, 2026, 12345).0, "FAC-2026-12345");
    }

    #[test]
    fn period_is_calendar_year() {
        let at = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).single().expect("valid timestamp");
        assert_eq!(NumberingScheme::period(at), 2026);
    }

    #[test]
    fn rejects_blank_or_shared_prefixes() {
        assert!(NumberingScheme::new("", "FAC").is_err());
        assert!(NumberingScheme::new("DEV", "DEV").is_err());
        assert!(NumberingScheme::new("DE-V", "FAC").is_err());
        assert!(NumberingScheme::new("Q", "INV").is_ok());
    }
}
