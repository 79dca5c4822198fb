use std::sync::Arc;

use chrono::Utc;
use fieldops_core::{
    prepare_conversion, ApplicationError, DocumentKind, DomainError, Invoice, InvoiceId, QuoteId,
};
use fieldops_db::{DocumentRepository, RepositoryError};
use tracing::{info, warn};

use crate::surface;

/// Materialises the invoice for an accepted quote.
pub struct ConversionService<R> {
    repository: Arc<R>,
    payment_term_days: u32,
}

impl<R: DocumentRepository> ConversionService<R> {
    pub fn new(repository: Arc<R>, payment_term_days: u32) -> Self {
        Self { repository, payment_term_days }
    }

    /// Issues the invoice and freezes the quote in one commit.
    ///
    /// Of two concurrent calls for the same quote, one wins and the other
    /// fails with a precondition error naming the invoice that was issued.
    pub async fn convert(&self, quote_id: &QuoteId) -> Result<Invoice, ApplicationError> {
        let quote = self
            .repository
            .find_quote(quote_id)
            .await
            .map_err(|error| surface(error, "convert", &quote_id.0))?
            .ok_or_else(|| quote_not_found(quote_id))?;

        let now = Utc::now();
        let plan = prepare_conversion(&quote, InvoiceId::generate(), now, self.payment_term_days)
            .map_err(|error| surface(error, "convert", &quote_id.0))?;

        match self.repository.commit_conversion(plan).await {
            Ok((quote, invoice)) => {
                info!(
                    event_name = "billing.conversion.completed",
                    quote_id = %quote.id(),
                    quote_number = %quote.number(),
                    invoice_id = %invoice.id(),
                    invoice_number = %invoice.number(),
                    amount_incl_tax = %invoice.totals().amount_incl_tax,
                    due_at = %invoice.due_at(),
                    "quote converted into invoice"
                );
                Ok(invoice)
            }
            Err(RepositoryError::Conflict { .. }) => Err(self.lost_race(quote_id).await),
            Err(error) => Err(surface(error, "convert", &quote_id.0)),
        }
    }

    /// Re-checks the preconditions against the quote as it is now stored.
    async fn lost_race(&self, quote_id: &QuoteId) -> ApplicationError {
        let current = match self.repository.find_quote(quote_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return quote_not_found(quote_id),
            Err(error) => return surface(error, "convert", &quote_id.0),
        };

        warn!(
            event_name = "billing.conversion.lost_race",
            quote_id = %quote_id,
            current_status = %current.status(),
            invoice_id = current.invoice_id().map(|id| id.0.as_str()).unwrap_or("none"),
            "quote changed before the conversion could commit"
        );

        let retry = InvoiceId::generate();
        match prepare_conversion(&current, retry, Utc::now(), self.payment_term_days) {
            Err(error) => surface(error, "convert", &quote_id.0),
            Ok(_) => DomainError::state_conflict(
                DocumentKind::Quote,
                current.status().as_str(),
                "convert",
            )
            .into(),
        }
    }
}

fn quote_not_found(quote_id: &QuoteId) -> ApplicationError {
    ApplicationError::NotFound { document: DocumentKind::Quote, id: quote_id.0.clone() }
}
