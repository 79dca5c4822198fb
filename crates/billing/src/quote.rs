use std::sync::Arc;

use chrono::Utc;
use fieldops_core::{
    ApplicationError, DocumentKind, DocumentNumber, DomainError, LineItemInput, NewQuote, Quote,
    QuoteDetails, QuoteId, QuoteStatus, UserId,
};
use fieldops_db::{DocumentRepository, RepositoryError};
use tracing::{info, warn};

use crate::surface;

pub struct QuoteService<R> {
    repository: Arc<R>,
}

impl<R: DocumentRepository> QuoteService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Validates the input, allocates the next quote number and stores a draft.
    pub async fn create_quote(&self, input: NewQuote) -> Result<Quote, ApplicationError> {
        let now = Utc::now();
        input.validate(now)?;

        let number = self.repository.next_quote_number(now).await?;
        let quote = Quote::create(QuoteId::generate(), number, input, now)?;
        let quote = self.repository.insert_quote(quote).await?;

        info!(
            event_name = "billing.quote.created",
            quote_id = %quote.id(),
            quote_number = %quote.number(),
            line_count = quote.lines().len(),
            amount_incl_tax = %quote.totals().amount_incl_tax,
            "quote created"
        );
        Ok(quote)
    }

    pub async fn get_quote(&self, id: &QuoteId) -> Result<Quote, ApplicationError> {
        self.repository
            .find_quote(id)
            .await
            .map_err(|error| surface(error, "get_quote", &id.0))?
            .ok_or_else(|| not_found(&id.0))
    }

    pub async fn get_quote_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Quote, ApplicationError> {
        self.repository
            .find_quote_by_number(number)
            .await
            .map_err(|error| surface(error, "get_quote_by_number", &number.0))?
            .ok_or_else(|| not_found(&number.0))
    }

    pub async fn list_by_status(
        &self,
        status: QuoteStatus,
    ) -> Result<Vec<Quote>, ApplicationError> {
        self.repository
            .list_quotes_by_status(status)
            .await
            .map_err(|error| surface(error, "list_quotes", status.as_str()))
    }

    pub async fn add_line(
        &self,
        id: &QuoteId,
        line: LineItemInput,
    ) -> Result<Quote, ApplicationError> {
        self.modify(id, "add_line", "billing.quote.line_added", |quote| quote.add_line(line)).await
    }

    pub async fn update_line(
        &self,
        id: &QuoteId,
        index: usize,
        line: LineItemInput,
    ) -> Result<Quote, ApplicationError> {
        self.modify(id, "update_line", "billing.quote.line_updated", |quote| {
            quote.update_line(index, line)
        })
        .await
    }

    pub async fn remove_line(&self, id: &QuoteId, index: usize) -> Result<Quote, ApplicationError> {
        self.modify(id, "remove_line", "billing.quote.line_removed", |quote| {
            quote.remove_line(index)
        })
        .await
    }

    pub async fn reorder_lines(
        &self,
        id: &QuoteId,
        permutation: Vec<usize>,
    ) -> Result<Quote, ApplicationError> {
        self.modify(id, "reorder_lines", "billing.quote.lines_reordered", |quote| {
            quote.reorder_lines(&permutation)
        })
        .await
    }

    pub async fn update_details(
        &self,
        id: &QuoteId,
        details: QuoteDetails,
    ) -> Result<Quote, ApplicationError> {
        let now = Utc::now();
        self.modify(id, "update_details", "billing.quote.details_updated", |quote| {
            quote.update_details(details, now)
        })
        .await
    }

    pub async fn submit(&self, id: &QuoteId) -> Result<Quote, ApplicationError> {
        self.modify(id, "submit", "billing.quote.submitted", Quote::submit).await
    }

    pub async fn validate_internally(
        &self,
        id: &QuoteId,
        approver: UserId,
        comment: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let now = Utc::now();
        self.modify(id, "validate_internally", "billing.quote.validated", |quote| {
            quote.validate_internally(approver, comment, now)
        })
        .await
    }

    pub async fn reject_internally(
        &self,
        id: &QuoteId,
        approver: UserId,
        comment: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let now = Utc::now();
        self.modify(id, "reject_internally", "billing.quote.rejected_internally", |quote| {
            quote.reject_internally(approver, comment, now)
        })
        .await
    }

    pub async fn record_client_acceptance(
        &self,
        id: &QuoteId,
        comment: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let now = Utc::now();
        self.modify(id, "record_client_acceptance", "billing.quote.accepted_by_client", |quote| {
            quote.record_client_acceptance(comment, now)
        })
        .await
    }

    pub async fn record_client_rejection(
        &self,
        id: &QuoteId,
        comment: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let now = Utc::now();
        self.modify(id, "record_client_rejection", "billing.quote.rejected_by_client", |quote| {
            quote.record_client_rejection(comment, now)
        })
        .await
    }

    /// Load, apply, write back under the loaded version.
    ///
    /// A rejected operation returns before anything is written, so the stored
    /// quote is untouched.
    async fn modify<F>(
        &self,
        id: &QuoteId,
        operation: &'static str,
        event_name: &'static str,
        change: F,
    ) -> Result<Quote, ApplicationError>
    where
        F: FnOnce(&mut Quote) -> Result<(), DomainError>,
    {
        let mut quote = self.get_quote(id).await?;
        change(&mut quote).map_err(|error| surface(error, operation, &id.0))?;

        match self.repository.update_quote(quote).await {
            Ok(saved) => {
                info!(
                    event_name,
                    quote_id = %saved.id(),
                    quote_number = %saved.number(),
                    status = %saved.status(),
                    version = saved.version(),
                    "quote updated"
                );
                Ok(saved)
            }
            Err(RepositoryError::Conflict { .. }) => Err(self.lost_race(id, operation).await),
            Err(error) => Err(surface(error, operation, &id.0)),
        }
    }

    /// Re-reads the quote so the conflict names the state that won.
    async fn lost_race(&self, id: &QuoteId, operation: &'static str) -> ApplicationError {
        match self.get_quote(id).await {
            Ok(current) => {
                warn!(
                    event_name = "billing.quote.write_conflict",
                    quote_id = %id,
                    operation,
                    current_status = %current.status(),
                    current_version = current.version(),
                    "quote changed while the operation was in flight"
                );
                let current_status = current.status().as_str();
                DomainError::state_conflict(DocumentKind::Quote, current_status, operation).into()
            }
            Err(error) => error,
        }
    }
}

fn not_found(id: &str) -> ApplicationError {
    ApplicationError::NotFound { document: DocumentKind::Quote, id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use fieldops_core::{
        ApplicationError, ClientId, DomainError, LineItemInput, NewQuote, QuoteId, QuoteStatus,
        UserId,
    };
    use fieldops_db::{DocumentRepository, InMemoryDocumentRepository};
    use rust_decimal::Decimal;

    use super::QuoteService;

    fn new_quote(lines: Vec<LineItemInput>) -> NewQuote {
        NewQuote {
            client_id: ClientId("client-7".to_string()),
            mission_id: None,
            title: "Boiler replacement".to_string(),
            description: None,
            valid_until: (Utc::now() + Duration::days(30)).date_naive(),
            vat_rate: Decimal::new(18, 0),
            lines,
        }
    }

    fn boiler_quote() -> NewQuote {
        new_quote(vec![line("Boiler", 1, 900)])
    }

    fn line(designation: &str, quantity: i64, unit_price: i64) -> LineItemInput {
        LineItemInput::new(designation, Decimal::new(quantity, 0), Decimal::new(unit_price, 0))
    }

    #[tokio::test]
    async fn create_quote_assigns_sequential_numbers() {
        let service = QuoteService::new(Arc::new(InMemoryDocumentRepository::default()));

        let first = service.create_quote(boiler_quote()).await.expect("first");
        let second = service.create_quote(new_quote(Vec::new())).await.expect("second");

        assert_eq!(first.status(), QuoteStatus::Draft);
        assert_eq!(first.version(), 1);
        assert!(first.number().0.ends_with("-0001"));
        assert!(second.number().0.ends_with("-0002"));
    }

    #[tokio::test]
    async fn invalid_input_does_not_consume_a_number() {
        let repository = Arc::new(InMemoryDocumentRepository::default());
        let service = QuoteService::new(Arc::clone(&repository));

        let mut input = new_quote(vec![line("", 1, 10)]);
        input.title = "  ".to_string();
        let error = service.create_quote(input).await.expect_err("invalid");
        match error {
            ApplicationError::Domain(DomainError::Validation(errors)) => {
                let fields: Vec<&str> = errors.fields.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["title", "lines[0].designation"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let created = service.create_quote(new_quote(Vec::new())).await.expect("valid");
        assert!(created.number().0.ends_with("-0001"));
        let drafts = repository.list_quotes_by_status(QuoteStatus::Draft).await.expect("list");
        assert_eq!(drafts.len(), 1);
    }

    #[tokio::test]
    async fn draft_edits_persist_and_bump_the_version() {
        let service = QuoteService::new(Arc::new(InMemoryDocumentRepository::default()));
        let quote = service.create_quote(boiler_quote()).await.expect("create");

        let quote = service.add_line(quote.id(), line("Labour", 4, 50)).await.expect("add");
        let quote = service.reorder_lines(quote.id(), vec![1, 0]).await.expect("reorder");
        assert_eq!(quote.lines()[0].designation(), "Labour");
        assert_eq!(quote.totals().amount_excl_tax, Decimal::new(110_000, 2));
        assert_eq!(quote.version(), 3);

        let stored = service.get_quote(quote.id()).await.expect("get");
        assert_eq!(stored, quote);
    }

    #[tokio::test]
    async fn rejected_transition_leaves_stored_quote_unchanged() {
        let service = QuoteService::new(Arc::new(InMemoryDocumentRepository::default()));
        let quote = service.create_quote(boiler_quote()).await.expect("create");

        let error = service
            .validate_internally(quote.id(), UserId("dir-1".to_string()), None)
            .await
            .expect_err("draft cannot be validated");

        assert_eq!(error.error_class(), "state_conflict");
        assert_eq!(service.get_quote(quote.id()).await.expect("get"), quote);
    }

    #[tokio::test]
    async fn unknown_quote_is_not_found() {
        let service = QuoteService::new(Arc::new(InMemoryDocumentRepository::default()));

        let error = service.submit(&QuoteId("missing".to_string())).await.expect_err("missing");

        assert!(matches!(error, ApplicationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_approvers_get_exactly_one_success() {
        let service = Arc::new(QuoteService::new(Arc::new(InMemoryDocumentRepository::default())));
        let quote = service.create_quote(boiler_quote()).await.expect("create");
        service.submit(quote.id()).await.expect("submit");

        let (validated, rejected) = tokio::join!(
            service.validate_internally(quote.id(), UserId("dir-1".to_string()), None),
            service.reject_internally(quote.id(), UserId("dir-2".to_string()), None),
        );

        assert!(validated.is_ok() ^ rejected.is_ok());
        let loser = validated.err().or(rejected.err()).expect("one loser");
        assert_eq!(loser.error_class(), "state_conflict");
    }
}
