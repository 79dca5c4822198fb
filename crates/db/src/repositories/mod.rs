use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fieldops_core::{
    ApplicationError, ConversionPlan, DocumentKind, DocumentNumber, DomainError, Invoice,
    InvoiceId, Quote, QuoteId, QuoteStatus,
};

pub mod document;
pub mod memory;
mod rows;
mod sequence;

pub use document::SqlDocumentRepository;
pub use memory::InMemoryDocumentRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A stored row decoded but no longer satisfies the aggregate's invariants.
    #[error("stored document is inconsistent: {0}")]
    Integrity(#[from] DomainError),
    #[error("{document} `{id}` was modified concurrently")]
    Conflict { document: DocumentKind, id: String },
    #[error("{document} `{id}` was not found")]
    NotFound { document: DocumentKind, id: String },
}

impl RepositoryError {
    pub(crate) fn conflict(document: DocumentKind, id: impl Into<String>) -> Self {
        Self::Conflict { document, id: id.into() }
    }

    pub(crate) fn not_found(document: DocumentKind, id: impl Into<String>) -> Self {
        Self::NotFound { document, id: id.into() }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => {
                Self::Domain(DomainError::InternalConsistency(message))
            }
            RepositoryError::Integrity(error) => {
                Self::Domain(DomainError::InternalConsistency(error.to_string()))
            }
            RepositoryError::Conflict { document, .. } => {
                Self::Domain(DomainError::state_conflict(document, "modified", "write"))
            }
            RepositoryError::NotFound { document, id } => Self::NotFound { document, id },
        }
    }
}

/// Persistence boundary for quotes, invoices and their numbering sequences.
///
/// Every write is conditioned on the aggregate's `version`. A stale version
/// fails with `RepositoryError::Conflict` and leaves storage untouched.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;

    async fn find_quote_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Option<Quote>, RepositoryError>;

    async fn list_quotes_by_status(
        &self,
        status: QuoteStatus,
    ) -> Result<Vec<Quote>, RepositoryError>;

    async fn find_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError>;

    async fn find_invoice_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Option<Invoice>, RepositoryError>;

    async fn find_invoice_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Invoice>, RepositoryError>;

    /// Allocates the next quote number for the year of `at`.
    async fn next_quote_number(&self, at: DateTime<Utc>)
        -> Result<DocumentNumber, RepositoryError>;

    /// Stores a new quote and returns it at version 1.
    async fn insert_quote(&self, quote: Quote) -> Result<Quote, RepositoryError>;

    /// Replaces the stored quote if its version still matches; returns it with the bumped version.
    async fn update_quote(&self, quote: Quote) -> Result<Quote, RepositoryError>;

    async fn update_invoice(&self, invoice: Invoice) -> Result<Invoice, RepositoryError>;

    /// Atomically marks the quote invoiced, numbers the invoice and stores it.
    ///
    /// The quote write is conditioned on the stored quote still being accepted,
    /// unlinked and at the plan's version. Nothing is persisted on failure.
    async fn commit_conversion(
        &self,
        plan: ConversionPlan,
    ) -> Result<(Quote, Invoice), RepositoryError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use fieldops_core::{
        ClientId, DocumentNumber, LineItemInput, MissionId, NewQuote, Quote, QuoteId, UserId,
    };

    pub(crate) fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 9, 15, 30).single().expect("valid timestamp")
    }

    pub(crate) fn draft_quote(id: &str, number: DocumentNumber) -> Quote {
        Quote::create(
            QuoteId(id.to_string()),
            number,
            NewQuote {
                client_id: ClientId("CLI-001".to_string()),
                mission_id: Some(MissionId("MIS-001".to_string())),
                title: "Heat pump installation".to_string(),
                description: Some("Outdoor unit on the north wall".to_string()),
                valid_until: NaiveDate::from_ymd_opt(2026, 4, 30).expect("valid date"),
                vat_rate: Decimal::from(18),
                lines: vec![
                    LineItemInput::new("Heat pump", Decimal::ONE, Decimal::new(420000, 2)),
                    LineItemInput::new("Labour", Decimal::new(65, 1), Decimal::new(5500, 2)),
                ],
            },
            at(1),
        )
        .expect("valid quote")
    }

    /// Drives a stored draft through submit, validation and client acceptance in memory.
    pub(crate) fn accept(mut quote: Quote) -> Quote {
        quote.submit().expect("submit");
        quote
            .validate_internally(UserId("U-DIR".to_string()), Some("ok".to_string()), at(2))
            .expect("validate");
        quote.record_client_acceptance(None, at(3)).expect("accept");
        quote
    }
}
