use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::invoice::Invoice;
use crate::domain::line_item::LineItem;
use crate::domain::quote::Quote;
use crate::domain::DocumentKind;
use crate::totals::round_currency;

/// Read model handed to the rendering engine. All amounts are final.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentView {
    pub kind: DocumentKind,
    pub id: String,
    pub number: String,
    pub status: String,
    pub client_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub dated_at: DateTime<Utc>,
    pub valid_until: Option<NaiveDate>,
    pub due_at: Option<DateTime<Utc>>,
    pub vat_rate: Decimal,
    pub lines: Vec<LineView>,
    pub amount_excl_tax: Decimal,
    pub tax_amount: Decimal,
    pub amount_incl_tax: Decimal,
    /// Invoice number for a converted quote, quote id for an invoice.
    pub linked_document: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LineView {
    pub order: u32,
    pub designation: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<&LineItem> for LineView {
    fn from(line: &LineItem) -> Self {
        Self {
            order: line.order(),
            designation: line.designation().to_string(),
            quantity: line.quantity(),
            unit_price: line.unit_price(),
            line_total: round_currency(line.line_total()),
        }
    }
}

impl From<&Quote> for DocumentView {
    fn from(quote: &Quote) -> Self {
        let totals = quote.totals();
        Self {
            kind: DocumentKind::Quote,
            id: quote.id().0.clone(),
            number: quote.number().0.clone(),
            status: quote.status().as_str().to_string(),
            client_id: quote.client_id().0.clone(),
            title: Some(quote.title().to_string()),
            description: quote.description().map(str::to_string),
            dated_at: quote.created_at(),
            valid_until: Some(quote.valid_until()),
            due_at: None,
            vat_rate: quote.vat_rate().percent(),
            lines: quote.lines().iter().map(LineView::from).collect(),
            amount_excl_tax: totals.amount_excl_tax,
            tax_amount: totals.tax_amount(),
            amount_incl_tax: totals.amount_incl_tax,
            linked_document: quote.invoice_id().map(|id| id.0.clone()),
        }
    }
}

impl From<&Invoice> for DocumentView {
    fn from(invoice: &Invoice) -> Self {
        let totals = invoice.totals();
        Self {
            kind: DocumentKind::Invoice,
            id: invoice.id().0.clone(),
            number: invoice.number().0.clone(),
            status: invoice.status().as_str().to_string(),
            client_id: invoice.client_id().0.clone(),
            title: None,
            description: None,
            dated_at: invoice.issued_at(),
            valid_until: None,
            due_at: Some(invoice.due_at()),
            vat_rate: invoice.vat_rate().percent(),
            lines: invoice.lines().iter().map(LineView::from).collect(),
            amount_excl_tax: totals.amount_excl_tax,
            tax_amount: totals.tax_amount(),
            amount_incl_tax: totals.amount_incl_tax,
            linked_document: Some(invoice.quote_id().0.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::DocumentView;
    use crate::domain::line_item::LineItemInput;
    use crate::domain::quote::{ClientId, NewQuote, Quote, QuoteId};
    use crate::numbering::DocumentNumber;

    #[test]
    fn quote_view_carries_computed_amounts() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).single().expect("valid timestamp");
        let quote = Quote::create(
            QuoteId("Q-3".to_string()),
            DocumentNumber("DEV-2026-0003".to_string()),
            NewQuote {
                client_id: ClientId("CLI-3".to_string()),
                mission_id: None,
                title: "Gutter cleaning".to_string(),
                description: None,
                valid_until: NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date"),
                vat_rate: Decimal::from(20),
                lines: vec![LineItemInput::new(
                    "Cleaning",
                    Decimal::new(15, 1),
                    Decimal::new(3333, 2),
                )],
            },
            now,
        )
        .expect("valid quote");

        let view = DocumentView::from(&quote);
        let json = serde_json::to_value(&view).expect("serialize");

        assert_eq!(json["kind"], "quote");
        assert_eq!(json["status"], "draft");
        // 1.5 * 33.33 = 49.995
        assert_eq!(view.lines[0].line_total, Decimal::new(5000, 2));
        assert_eq!(view.amount_excl_tax, Decimal::new(5000, 2));
        assert_eq!(view.tax_amount, Decimal::new(1000, 2));
        assert_eq!(json["amount_incl_tax"], "60.00");
    }
}
