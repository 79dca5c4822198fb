use std::sync::Arc;

use chrono::Utc;
use fieldops_core::{
    ApplicationError, DocumentKind, DocumentNumber, DomainError, Invoice, InvoiceId, QuoteId,
};
use fieldops_db::{DocumentRepository, RepositoryError};
use tracing::{info, warn};

use crate::surface;

/// Post-issue lifecycle of invoices. Invoices are only ever created by
/// [`crate::ConversionService`].
pub struct InvoiceService<R> {
    repository: Arc<R>,
}

impl<R: DocumentRepository> InvoiceService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn get_invoice(&self, id: &InvoiceId) -> Result<Invoice, ApplicationError> {
        self.repository
            .find_invoice(id)
            .await
            .map_err(|error| surface(error, "get_invoice", &id.0))?
            .ok_or_else(|| not_found(&id.0))
    }

    pub async fn get_invoice_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Invoice, ApplicationError> {
        self.repository
            .find_invoice_by_number(number)
            .await
            .map_err(|error| surface(error, "get_invoice_by_number", &number.0))?
            .ok_or_else(|| not_found(&number.0))
    }

    /// The invoice issued from `quote_id`, if the quote has been converted.
    pub async fn invoice_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Invoice>, ApplicationError> {
        self.repository
            .find_invoice_for_quote(quote_id)
            .await
            .map_err(|error| surface(error, "invoice_for_quote", &quote_id.0))
    }

    pub async fn send(&self, id: &InvoiceId) -> Result<Invoice, ApplicationError> {
        self.modify(id, "send", "billing.invoice.sent", Invoice::send).await
    }

    pub async fn record_payment(
        &self,
        id: &InvoiceId,
        method: &str,
        reference: Option<String>,
    ) -> Result<Invoice, ApplicationError> {
        let now = Utc::now();
        self.modify(id, "record_payment", "billing.invoice.paid", |invoice| {
            invoice.record_payment(method, reference, now)
        })
        .await
    }

    pub async fn cancel(&self, id: &InvoiceId) -> Result<Invoice, ApplicationError> {
        self.modify(id, "cancel", "billing.invoice.cancelled", Invoice::cancel).await
    }

    async fn modify<F>(
        &self,
        id: &InvoiceId,
        operation: &'static str,
        event_name: &'static str,
        change: F,
    ) -> Result<Invoice, ApplicationError>
    where
        F: FnOnce(&mut Invoice) -> Result<(), DomainError>,
    {
        let mut invoice = self.get_invoice(id).await?;
        change(&mut invoice).map_err(|error| surface(error, operation, &id.0))?;

        match self.repository.update_invoice(invoice).await {
            Ok(saved) => {
                info!(
                    event_name,
                    invoice_id = %saved.id(),
                    invoice_number = %saved.number(),
                    quote_id = %saved.quote_id(),
                    status = %saved.status(),
                    version = saved.version(),
                    "invoice updated"
                );
                Ok(saved)
            }
            Err(RepositoryError::Conflict { .. }) => match self.get_invoice(id).await {
                Ok(current) => {
                    warn!(
                        event_name = "billing.invoice.write_conflict",
                        invoice_id = %id,
                        operation,
                        current_status = %current.status(),
                        current_version = current.version(),
                        "invoice changed while the operation was in flight"
                    );
                    Err(DomainError::state_conflict(
                        DocumentKind::Invoice,
                        current.status().as_str(),
                        operation,
                    )
                    .into())
                }
                Err(error) => Err(error),
            },
            Err(error) => Err(surface(error, operation, &id.0)),
        }
    }
}

fn not_found(id: &str) -> ApplicationError {
    ApplicationError::NotFound { document: DocumentKind::Invoice, id: id.to_string() }
}
