//! Turning an accepted quote into an invoice.
//!
//! Planning is pure: it checks the preconditions, snapshots the lines, and
//! produces both the invoiced quote and a numberless invoice. The persistence
//! layer allocates the invoice number and commits both halves in one
//! transaction.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::invoice::{Invoice, InvoiceId};
use crate::domain::line_item::LineItem;
use crate::domain::quote::{ClientId, Quote, QuoteId, QuoteStatus};
use crate::errors::DomainError;
use crate::numbering::DocumentNumber;
use crate::totals::{totals_for, Totals, VatRate};

/// An invoice that has everything except its number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingInvoice {
    pub(crate) id: InvoiceId,
    pub(crate) quote_id: QuoteId,
    pub(crate) client_id: ClientId,
    pub(crate) vat_rate: VatRate,
    pub(crate) lines: Vec<LineItem>,
    pub(crate) totals: Totals,
    pub(crate) issued_at: DateTime<Utc>,
    pub(crate) due_at: DateTime<Utc>,
}

impl PendingInvoice {
    pub fn id(&self) -> &InvoiceId {
        &self.id
    }

    pub fn quote_id(&self) -> &QuoteId {
        &self.quote_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn issue(self, number: DocumentNumber) -> Invoice {
        Invoice::issue(self, number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionPlan {
    /// Source quote already moved to `invoiced` and linked to the new invoice.
    pub quote: Quote,
    pub invoice: PendingInvoice,
}

pub fn prepare_conversion(
    quote: &Quote,
    invoice_id: InvoiceId,
    now: DateTime<Utc>,
    payment_term_days: u32,
) -> Result<ConversionPlan, DomainError> {
    if let Some(existing) = quote.invoice_id() {
        return Err(DomainError::Precondition(format!(
            "quote {} has already been converted into invoice {existing}",
            quote.number()
        )));
    }
    if quote.status() != QuoteStatus::AcceptedByClient {
        return Err(DomainError::Precondition(format!(
            "quote {} must be `{}` to be invoiced, found `{}`",
            quote.number(),
            QuoteStatus::AcceptedByClient,
            quote.status()
        )));
    }

    let lines: Vec<LineItem> = quote.lines().to_vec();
    let totals = totals_for(&lines, quote.vat_rate())?;
    // Holds while quote totals stay derived from the lines they are read with.
    if totals != quote.totals() {
        return Err(DomainError::InternalConsistency(format!(
            "snapshot totals {}/{} differ from quote {} totals {}/{}",
            totals.amount_excl_tax,
            totals.amount_incl_tax,
            quote.number(),
            quote.totals().amount_excl_tax,
            quote.totals().amount_incl_tax
        )));
    }

    let mut invoiced = quote.clone();
    invoiced.mark_invoiced(invoice_id.clone())?;

    Ok(ConversionPlan {
        quote: invoiced,
        invoice: PendingInvoice {
            id: invoice_id,
            quote_id: quote.id().clone(),
            client_id: quote.client_id().clone(),
            vat_rate: quote.vat_rate(),
            lines,
            totals,
            issued_at: now,
            due_at: now + Duration::days(i64::from(payment_term_days)),
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::prepare_conversion;
    use crate::domain::invoice::{InvoiceId, InvoiceStatus};
    use crate::domain::line_item::LineItemInput;
    use crate::domain::quote::{ClientId, NewQuote, Quote, QuoteId, QuoteStatus, UserId};
    use crate::errors::DomainError;
    use crate::numbering::DocumentNumber;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 8, 0, 0).single().expect("valid timestamp")
    }

    fn quote(accept: bool) -> Quote {
        let mut quote = Quote::create(
            QuoteId("Q-7".to_string()),
            DocumentNumber("DEV-2026-0007".to_string()),
            NewQuote {
                client_id: ClientId("CLI-9".to_string()),
                mission_id: None,
                title: "Roof repair".to_string(),
                description: None,
                valid_until: NaiveDate::from_ymd_opt(2026, 6, 30).expect("valid date"),
                vat_rate: Decimal::from(18),
                lines: vec![
                    LineItemInput::new("Labour", Decimal::new(35, 1), Decimal::new(4500, 2)),
                    LineItemInput::new("Tiles", Decimal::from(40), Decimal::new(125, 2)),
                ],
            },
            now() - Duration::days(5),
        )
        .expect("valid quote");
        quote.submit().expect("submit");
        quote.validate_internally(UserId("U-1".to_string()), None, now()).expect("validate");
        if accept {
            quote.record_client_acceptance(None, now()).expect("accept");
        }
        quote
    }

    #[test]
    fn accepted_quote_yields_linked_snapshot() {
        let source = quote(true);
        let plan = prepare_conversion(&source, InvoiceId("INV-7".to_string()), now(), 30)
            .expect("convertible");

        assert_eq!(plan.quote.status(), QuoteStatus::Invoiced);
        assert_eq!(plan.quote.invoice_id(), Some(&InvoiceId("INV-7".to_string())));

        let invoice = plan.invoice.issue(DocumentNumber("FAC-2026-0001".to_string()));
        assert_eq!(invoice.status(), InvoiceStatus::Issued);
        assert_eq!(invoice.quote_id(), source.id());
        assert_eq!(invoice.lines(), source.lines());
        assert_eq!(invoice.totals(), source.totals());
        assert_eq!(invoice.due_at(), invoice.issued_at() + Duration::days(30));
        // 3.5 * 45 + 40 * 1.25 = 207.50; * 1.18 = 244.85
        assert_eq!(invoice.totals().amount_incl_tax, Decimal::new(24485, 2));
    }

    #[test]
    fn payment_term_is_configurable() {
        let plan = prepare_conversion(&quote(true), InvoiceId("INV-8".to_string()), now(), 45)
            .expect("convertible");
        assert_eq!(plan.invoice.due_at - plan.invoice.issued_at, Duration::days(45));
    }

    #[test]
    fn only_accepted_quotes_convert() {
        let error = prepare_conversion(&quote(false), InvoiceId("INV-9".to_string()), now(), 30)
            .expect_err("validated is not accepted");
        assert!(matches!(error, DomainError::Precondition(_)));
    }

    #[test]
    fn converted_quote_cannot_convert_again() {
        let plan = prepare_conversion(&quote(true), InvoiceId("INV-1".to_string()), now(), 30)
            .expect("convertible");

        let error = prepare_conversion(&plan.quote, InvoiceId("INV-2".to_string()), now(), 30)
            .expect_err("already invoiced");
        match error {
            DomainError::Precondition(message) => assert!(message.contains("INV-1")),
            other => panic!("expected precondition failure, got {other:?}"),
        }
    }
}
