//! Application services for the quote-to-invoice lifecycle.
//!
//! Each service loads an aggregate through a [`DocumentRepository`], applies
//! one domain operation and writes it back under the aggregate's version.
//! Nothing here retries; a lost race is reported to the caller as a state
//! conflict (or, for conversion, a failed precondition).

use std::sync::Arc;

use fieldops_core::config::BillingConfig;
use fieldops_core::{ApplicationError, DomainError};
use fieldops_db::DocumentRepository;
use tracing::error;

pub mod conversion;
pub mod invoice;
pub mod quote;

pub use conversion::ConversionService;
pub use invoice::InvoiceService;
pub use quote::QuoteService;

/// The three services wired to one shared repository.
pub struct Billing<R> {
    pub quotes: QuoteService<R>,
    pub invoices: InvoiceService<R>,
    pub conversion: ConversionService<R>,
}

impl<R: DocumentRepository> Billing<R> {
    pub fn new(repository: Arc<R>, config: &BillingConfig) -> Self {
        Self {
            quotes: QuoteService::new(Arc::clone(&repository)),
            invoices: InvoiceService::new(Arc::clone(&repository)),
            conversion: ConversionService::new(repository, config.payment_term_days),
        }
    }
}

/// Converts to the caller-facing error, logging integrity failures on the way out.
pub(crate) fn surface(
    error: impl Into<ApplicationError>,
    operation: &'static str,
    document_id: &str,
) -> ApplicationError {
    let error = error.into();
    if let ApplicationError::Domain(DomainError::InternalConsistency(detail)) = &error {
        error!(
            event_name = "billing.consistency_violation",
            operation,
            document_id,
            detail = %detail,
            "stored or computed document state is inconsistent"
        );
    }
    error
}
