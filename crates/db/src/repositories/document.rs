use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use fieldops_core::{
    ConversionPlan, DocumentKind, DocumentNumber, Invoice, InvoiceId, NumberingScheme, Quote,
    QuoteId, QuoteStatus, SequenceKind,
};

use super::rows::{
    date, invoice_from_row, is_unique_violation, optional_timestamp, quote_from_row, timestamp,
    version, write_lines, INVOICE_COLUMNS, QUOTE_COLUMNS,
};
use super::sequence::allocate;
use super::{DocumentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDocumentRepository {
    pool: DbPool,
    numbering: NumberingScheme,
}

impl SqlDocumentRepository {
    pub fn new(pool: DbPool, numbering: NumberingScheme) -> Self {
        Self { pool, numbering }
    }

    async fn fetch_quote(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Quote>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE {column} = ?"))
            .bind(value)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(quote_from_row(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn fetch_invoice(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoice WHERE {column} = ?"))
            .bind(value)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(invoice_from_row(&mut conn, row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl DocumentRepository for SqlDocumentRepository {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        self.fetch_quote("id", &id.0).await
    }

    async fn find_quote_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Option<Quote>, RepositoryError> {
        self.fetch_quote("number", &number.0).await
    }

    async fn list_quotes_by_status(
        &self,
        status: QuoteStatus,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quote WHERE status = ? ORDER BY number ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&mut *conn)
        .await?;

        let mut quotes = Vec::with_capacity(rows.len());
        for row in rows {
            quotes.push(quote_from_row(&mut conn, row).await?);
        }
        Ok(quotes)
    }

    async fn find_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        self.fetch_invoice("id", &id.0).await
    }

    async fn find_invoice_by_number(
        &self,
        number: &DocumentNumber,
    ) -> Result<Option<Invoice>, RepositoryError> {
        self.fetch_invoice("number", &number.0).await
    }

    async fn find_invoice_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<Invoice>, RepositoryError> {
        self.fetch_invoice("quote_id", &quote_id.0).await
    }

    async fn next_quote_number(
        &self,
        at: DateTime<Utc>,
    ) -> Result<DocumentNumber, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        allocate(&mut conn, &self.numbering, SequenceKind::Quote, at).await
    }

    async fn insert_quote(&self, quote: Quote) -> Result<Quote, RepositoryError> {
        let parts = quote.to_parts();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quote (
                id, number, client_id, mission_id, title, description, created_at,
                valid_until, vat_rate, status, direction_validated_at, direction_comment,
                validated_by, client_responded_at, client_comment, invoice_id, version, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&parts.id.0)
        .bind(&parts.number.0)
        .bind(&parts.client_id.0)
        .bind(parts.mission_id.as_ref().map(|mission| mission.0.as_str()))
        .bind(&parts.title)
        .bind(&parts.description)
        .bind(timestamp(parts.created_at))
        .bind(date(parts.valid_until))
        .bind(parts.vat_rate.to_string())
        .bind(parts.status.as_str())
        .bind(optional_timestamp(parts.direction_validated_at))
        .bind(&parts.direction_comment)
        .bind(parts.validated_by.as_ref().map(|user| user.0.as_str()))
        .bind(optional_timestamp(parts.client_responded_at))
        .bind(&parts.client_comment)
        .bind(parts.invoice_id.as_ref().map(|invoice| invoice.0.as_str()))
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                RepositoryError::conflict(DocumentKind::Quote, parts.id.0.clone())
            } else {
                error.into()
            }
        })?;

        write_lines(&mut tx, "quote_line", "quote_id", &parts.id.0, quote.lines()).await?;
        tx.commit().await?;

        Ok(quote.with_version(1))
    }

    async fn update_quote(&self, quote: Quote) -> Result<Quote, RepositoryError> {
        let parts = quote.to_parts();
        let next_version = parts.version + 1;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE quote SET
                title = ?,
                description = ?,
                valid_until = ?,
                vat_rate = ?,
                status = ?,
                direction_validated_at = ?,
                direction_comment = ?,
                validated_by = ?,
                client_responded_at = ?,
                client_comment = ?,
                invoice_id = ?,
                version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&parts.title)
        .bind(&parts.description)
        .bind(date(parts.valid_until))
        .bind(parts.vat_rate.to_string())
        .bind(parts.status.as_str())
        .bind(optional_timestamp(parts.direction_validated_at))
        .bind(&parts.direction_comment)
        .bind(parts.validated_by.as_ref().map(|user| user.0.as_str()))
        .bind(optional_timestamp(parts.client_responded_at))
        .bind(&parts.client_comment)
        .bind(parts.invoice_id.as_ref().map(|invoice| invoice.0.as_str()))
        .bind(version(next_version))
        .bind(timestamp(Utc::now()))
        .bind(&parts.id.0)
        .bind(version(parts.version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(missing_or_stale(&mut tx, DocumentKind::Quote, "quote", &parts.id.0).await);
        }

        write_lines(&mut tx, "quote_line", "quote_id", &parts.id.0, quote.lines()).await?;
        tx.commit().await?;

        Ok(quote.with_version(next_version))
    }

    async fn update_invoice(&self, invoice: Invoice) -> Result<Invoice, RepositoryError> {
        let next_version = invoice.version() + 1;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE invoice SET
                status = ?,
                paid_at = ?,
                payment_method = ?,
                payment_reference = ?,
                version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(invoice.status().as_str())
        .bind(optional_timestamp(invoice.paid_at()))
        .bind(invoice.payment_method())
        .bind(invoice.payment_reference())
        .bind(version(next_version))
        .bind(timestamp(Utc::now()))
        .bind(&invoice.id().0)
        .bind(version(invoice.version()))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let id = invoice.id().0.clone();
            return Err(missing_or_stale(&mut tx, DocumentKind::Invoice, "invoice", &id).await);
        }
        tx.commit().await?;

        Ok(invoice.with_version(next_version))
    }

    async fn commit_conversion(
        &self,
        plan: ConversionPlan,
    ) -> Result<(Quote, Invoice), RepositoryError> {
        let ConversionPlan { quote, invoice } = plan;
        let expected_version = quote.version();
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE quote
             SET status = ?, invoice_id = ?, version = ?, updated_at = ?
             WHERE id = ? AND status = ? AND invoice_id IS NULL AND version = ?",
        )
        .bind(QuoteStatus::Invoiced.as_str())
        .bind(&invoice.id().0)
        .bind(version(expected_version + 1))
        .bind(timestamp(invoice.issued_at()))
        .bind(&quote.id().0)
        .bind(QuoteStatus::AcceptedByClient.as_str())
        .bind(version(expected_version))
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Err(
                missing_or_stale(&mut tx, DocumentKind::Quote, "quote", &quote.id().0).await
            );
        }

        let number =
            allocate(&mut tx, &self.numbering, SequenceKind::Invoice, invoice.issued_at()).await?;
        let invoice = invoice.issue(number);
        insert_invoice(&mut tx, &invoice).await?;
        tx.commit().await?;

        Ok((quote.with_version(expected_version + 1), invoice.with_version(1)))
    }
}

async fn insert_invoice(
    conn: &mut SqliteConnection,
    invoice: &Invoice,
) -> Result<(), RepositoryError> {
    let totals = invoice.totals();
    sqlx::query(
        "INSERT INTO invoice (
            id, number, quote_id, client_id, vat_rate, amount_excl_tax, amount_incl_tax,
            status, issued_at, due_at, paid_at, payment_method, payment_reference,
            version, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(&invoice.id().0)
    .bind(&invoice.number().0)
    .bind(&invoice.quote_id().0)
    .bind(&invoice.client_id().0)
    .bind(invoice.vat_rate().percent().to_string())
    .bind(totals.amount_excl_tax.to_string())
    .bind(totals.amount_incl_tax.to_string())
    .bind(invoice.status().as_str())
    .bind(timestamp(invoice.issued_at()))
    .bind(timestamp(invoice.due_at()))
    .bind(optional_timestamp(invoice.paid_at()))
    .bind(invoice.payment_method())
    .bind(invoice.payment_reference())
    .bind(timestamp(invoice.issued_at()))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        if is_unique_violation(&error) {
            RepositoryError::conflict(DocumentKind::Invoice, invoice.quote_id().0.clone())
        } else {
            error.into()
        }
    })?;

    write_lines(conn, "invoice_line", "invoice_id", &invoice.id().0, invoice.lines()).await
}

/// Distinguishes a missing row from a version mismatch after a zero-row update.
async fn missing_or_stale(
    conn: &mut SqliteConnection,
    document: DocumentKind,
    table: &str,
    id: &str,
) -> RepositoryError {
    let exists = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await;

    match exists {
        Ok(0) => RepositoryError::not_found(document, id),
        Ok(_) => RepositoryError::conflict(document, id),
        Err(error) => error.into(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sqlx::Row;

    use fieldops_core::{
        prepare_conversion, DocumentKind, DocumentNumber, InvoiceId, InvoiceStatus,
        NumberingScheme, QuoteStatus,
    };

    use super::SqlDocumentRepository;
    use crate::repositories::test_support::{accept, at, draft_quote};
    use crate::repositories::{DocumentRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, SqlDocumentRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlDocumentRepository::new(pool.clone(), NumberingScheme::default());
        (pool, repo)
    }

    async fn stored_draft(repo: &SqlDocumentRepository, id: &str) -> fieldops_core::Quote {
        let number = repo.next_quote_number(at(1)).await.expect("number");
        repo.insert_quote(draft_quote(id, number)).await.expect("insert")
    }

    #[tokio::test]
    async fn quote_round_trips_with_lines_in_order() {
        let (_pool, repo) = setup().await;
        let stored = stored_draft(&repo, "Q-1").await;

        let found = repo.find_quote(stored.id()).await.expect("find").expect("exists");
        assert_eq!(found, stored);
        assert_eq!(found.version(), 1);
        assert_eq!(found.lines()[1].designation(), "Labour");

        let by_number =
            repo.find_quote_by_number(stored.number()).await.expect("find").expect("exists");
        assert_eq!(by_number.id(), stored.id());
    }

    #[tokio::test]
    async fn quote_numbers_are_sequential_per_year() {
        let (_pool, repo) = setup().await;

        let first = repo.next_quote_number(at(1)).await.expect("first");
        let second = repo.next_quote_number(at(2)).await.expect("second");
        let next_year = repo
            .next_quote_number(at(2) + Duration::days(365))
            .await
            .expect("next year");

        assert_eq!(first, DocumentNumber("DEV-2026-0001".to_string()));
        assert_eq!(second, DocumentNumber("DEV-2026-0002".to_string()));
        assert_eq!(next_year, DocumentNumber("DEV-2027-0001".to_string()));
    }

    #[tokio::test]
    async fn stale_quote_update_is_rejected() {
        let (_pool, repo) = setup().await;
        let stored = stored_draft(&repo, "Q-1").await;

        let mut first = stored.clone();
        first.submit().expect("submit");
        let saved = repo.update_quote(first).await.expect("first writer wins");
        assert_eq!(saved.version(), 2);

        let mut second = stored;
        second.submit().expect("submit");
        let error = repo.update_quote(second).await.expect_err("stale version");
        assert!(matches!(error, RepositoryError::Conflict { document: DocumentKind::Quote, .. }));

        let current = repo.find_quote(saved.id()).await.expect("find").expect("exists");
        assert_eq!(current.status(), QuoteStatus::Sent);
        assert_eq!(current.version(), 2);
    }

    #[tokio::test]
    async fn updating_unknown_quote_is_not_found() {
        let (_pool, repo) = setup().await;
        let number = DocumentNumber("DEV-2026-0099".to_string());
        let ghost = draft_quote("Q-404", number).with_version(1);

        let error = repo.update_quote(ghost).await.expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn draft_line_edits_replace_stored_lines() {
        let (_pool, repo) = setup().await;
        let mut quote = stored_draft(&repo, "Q-1").await;
        quote.remove_line(0).expect("remove");

        let saved = repo.update_quote(quote).await.expect("update");
        let found = repo.find_quote(saved.id()).await.expect("find").expect("exists");

        assert_eq!(found.lines().len(), 1);
        assert_eq!(found.lines()[0].order(), 1);
        assert_eq!(found.totals(), saved.totals());
    }

    #[tokio::test]
    async fn conversion_persists_both_sides_atomically() {
        let (pool, repo) = setup().await;
        let stored = stored_draft(&repo, "Q-1").await;
        let accepted = repo.update_quote(accept(stored)).await.expect("accepted");

        let plan = prepare_conversion(&accepted, InvoiceId("INV-1".to_string()), at(4), 30)
            .expect("plan");
        let (quote, invoice) = repo.commit_conversion(plan).await.expect("convert");

        assert_eq!(invoice.number(), &DocumentNumber("FAC-2026-0001".to_string()));
        assert_eq!(quote.invoice_id(), Some(invoice.id()));

        let stored_quote = repo.find_quote(quote.id()).await.expect("find").expect("exists");
        let stored_invoice =
            repo.find_invoice_for_quote(quote.id()).await.expect("find").expect("exists");
        assert_eq!(stored_quote, quote);
        assert_eq!(stored_invoice, invoice);
        assert_eq!(stored_invoice.status(), InvoiceStatus::Issued);
        assert_eq!(stored_invoice.lines(), accepted.lines());

        let line_count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM invoice_line WHERE invoice_id = 'INV-1'")
                .fetch_one(&pool)
                .await
                .expect("count")
                .get("count");
        assert_eq!(line_count, 2);
    }

    #[tokio::test]
    async fn losing_conversion_leaves_no_trace() {
        let (pool, repo) = setup().await;
        let stored = stored_draft(&repo, "Q-1").await;
        let accepted = repo.update_quote(accept(stored)).await.expect("accepted");

        let first = prepare_conversion(&accepted, InvoiceId("INV-1".to_string()), at(4), 30)
            .expect("plan");
        let second = prepare_conversion(&accepted, InvoiceId("INV-2".to_string()), at(4), 30)
            .expect("plan");

        repo.commit_conversion(first).await.expect("first conversion");
        let error = repo.commit_conversion(second).await.expect_err("second conversion");
        assert!(matches!(error, RepositoryError::Conflict { document: DocumentKind::Quote, .. }));

        let invoices: i64 = sqlx::query("SELECT COUNT(*) AS count FROM invoice")
            .fetch_one(&pool)
            .await
            .expect("count")
            .get("count");
        let sequence: i64 = sqlx::query(
            "SELECT last_value FROM document_sequence WHERE scheme = 'invoice' AND period = 2026",
        )
        .fetch_one(&pool)
        .await
        .expect("sequence")
        .get("last_value");
        assert_eq!(invoices, 1);
        assert_eq!(sequence, 1, "rolled-back conversion must not consume an invoice number");
    }

    #[tokio::test]
    async fn invoice_updates_use_versions() {
        let (_pool, repo) = setup().await;
        let stored = stored_draft(&repo, "Q-1").await;
        let accepted = repo.update_quote(accept(stored)).await.expect("accepted");
        let plan = prepare_conversion(&accepted, InvoiceId("INV-1".to_string()), at(4), 30)
            .expect("plan");
        let (_, invoice) = repo.commit_conversion(plan).await.expect("convert");

        let mut paid = invoice.clone();
        paid.record_payment("wire", Some("TX123".to_string()), at(20)).expect("pay");
        let paid = repo.update_invoice(paid).await.expect("update");

        let mut cancelled = invoice;
        cancelled.cancel().expect("cancel in memory");
        let error = repo.update_invoice(cancelled).await.expect_err("stale");
        assert!(matches!(error, RepositoryError::Conflict { document: DocumentKind::Invoice, .. }));

        let found = repo.find_invoice(paid.id()).await.expect("find").expect("exists");
        assert_eq!(found.status(), InvoiceStatus::Paid);
        assert_eq!(found.payment_reference(), Some("TX123"));
        assert_eq!(found.paid_at(), Some(at(20)));
        let by_number =
            repo.find_invoice_by_number(found.number()).await.expect("find").expect("exists");
        assert_eq!(by_number, found);
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let (_pool, repo) = setup().await;
        let first = stored_draft(&repo, "Q-1").await;
        stored_draft(&repo, "Q-2").await;

        let mut sent = first;
        sent.submit().expect("submit");
        repo.update_quote(sent).await.expect("update");

        let drafts = repo.list_quotes_by_status(QuoteStatus::Draft).await.expect("list");
        let sent = repo.list_quotes_by_status(QuoteStatus::Sent).await.expect("list");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id().0, "Q-2");
        assert_eq!(sent.len(), 1);
    }
}
