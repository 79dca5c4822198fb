use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use fieldops_core::{
    ConversionPlan, DocumentKind, DocumentNumber, Invoice, InvoiceId, NumberingScheme, Quote,
    QuoteId, QuoteStatus, SequenceKind,
};

use super::{DocumentRepository, RepositoryError};

#[derive(Default)]
struct Store {
    quotes: HashMap<String, Quote>,
    invoices: HashMap<String, Invoice>,
    sequences: HashMap<(SequenceKind, i32), u64>,
}

impl Store {
    fn allocate(
        &mut self,
        numbering: &NumberingScheme,
        kind: SequenceKind,
        at: DateTime<Utc>,
    ) -> DocumentNumber {
        let period = NumberingScheme::period(at);
        let value = self.sequences.entry((kind, period)).or_insert(0);
        *value += 1;
        numbering.format(kind, period, *value)
    }
}

/// Same contract as the SQL repository, held behind a single lock.
#[derive(Default)]
pub struct InMemoryDocumentRepository {
    store: RwLock<Store>,
    numbering: NumberingScheme,
}

impl InMemoryDocumentRepository {
    pub fn new(numbering: NumberingScheme) -> Self {
        Self { store: RwLock::default(), numbering }
    }
}

#[async_trait::async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.quotes.get(&id.0).cloned())
    }

    async fn find_quote_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Option<Quote>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.quotes.values().find(|quote| quote.number() == number).cloned())
    }

    async fn list_quotes_by_status(
        &self,
        status: QuoteStatus,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let store = self.store.read().await;
        let mut quotes: Vec<Quote> =
            store.quotes.values().filter(|quote| quote.status() == status).cloned().collect();
        quotes.sort_by(|left, right| left.number().0.cmp(&right.number().0));
        Ok(quotes)
    }

    async fn find_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.invoices.get(&id.0).cloned())
    }

    async fn find_invoice_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.invoices.values().find(|invoice| invoice.number() == number).cloned())
    }

    async fn find_invoice_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.invoices.values().find(|invoice| invoice.quote_id() == quote_id).cloned())
    }

    async fn next_quote_number(
        &self,
        at: DateTime<Utc>,
    ) -> Result<DocumentNumber, RepositoryError> {
        let mut store = self.store.write().await;
        Ok(store.allocate(&self.numbering, SequenceKind::Quote, at))
    }

    async fn insert_quote(&self, quote: Quote) -> Result<Quote, RepositoryError> {
        let mut store = self.store.write().await;
        let duplicate = store.quotes.contains_key(&quote.id().0)
            || store.quotes.values().any(|existing| existing.number() == quote.number());
        if duplicate {
            return Err(RepositoryError::conflict(DocumentKind::Quote, quote.id().0.clone()));
        }

        let quote = quote.with_version(1);
        store.quotes.insert(quote.id().0.clone(), quote.clone());
        Ok(quote)
    }

    async fn update_quote(&self, quote: Quote) -> Result<Quote, RepositoryError> {
        let mut store = self.store.write().await;
        let stored = store
            .quotes
            .get_mut(&quote.id().0)
            .ok_or_else(|| RepositoryError::not_found(DocumentKind::Quote, quote.id().0.clone()))?;
        if stored.version() != quote.version() {
            return Err(RepositoryError::conflict(DocumentKind::Quote, quote.id().0.clone()));
        }

        let next_version = quote.version() + 1;
        let quote = quote.with_version(next_version);
        *stored = quote.clone();
        Ok(quote)
    }

    async fn update_invoice(&self, invoice: Invoice) -> Result<Invoice, RepositoryError> {
        let mut store = self.store.write().await;
        let stored = store.invoices.get_mut(&invoice.id().0).ok_or_else(|| {
            RepositoryError::not_found(DocumentKind::Invoice, invoice.id().0.clone())
        })?;
        if stored.version() != invoice.version() {
            return Err(RepositoryError::conflict(DocumentKind::Invoice, invoice.id().0.clone()));
        }

        let next_version = invoice.version() + 1;
        let invoice = invoice.with_version(next_version);
        *stored = invoice.clone();
        Ok(invoice)
    }

    async fn commit_conversion(
        &self,
        plan: ConversionPlan,
    ) -> Result<(Quote, Invoice), RepositoryError> {
        let ConversionPlan { quote, invoice } = plan;
        let mut store = self.store.write().await;

        let stored = store
            .quotes
            .get(&quote.id().0)
            .ok_or_else(|| RepositoryError::not_found(DocumentKind::Quote, quote.id().0.clone()))?;
        let claimable = stored.status() == QuoteStatus::AcceptedByClient
            && stored.invoice_id().is_none()
            && stored.version() == quote.version();
        let already_linked =
            store.invoices.values().any(|existing| existing.quote_id() == quote.id());
        if !claimable || already_linked {
            return Err(RepositoryError::conflict(DocumentKind::Quote, quote.id().0.clone()));
        }

        let number = store.allocate(&self.numbering, SequenceKind::Invoice, invoice.issued_at());
        let invoice = invoice.issue(number).with_version(1);
        let next_version = quote.version() + 1;
        let quote = quote.with_version(next_version);

        store.quotes.insert(quote.id().0.clone(), quote.clone());
        store.invoices.insert(invoice.id().0.clone(), invoice.clone());
        Ok((quote, invoice))
    }
}
