use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversion::PendingInvoice;
use crate::domain::line_item::{build_lines, LineItem, LineItemInput};
use crate::domain::quote::{ClientId, QuoteId};
use crate::domain::DocumentKind;
use crate::errors::DomainError;
use crate::numbering::DocumentNumber;
use crate::totals::{totals_for, Totals, VatRate};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub String);

impl InvoiceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Issued,
    SentToClient,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::SentToClient => "sent_to_client",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "issued" => Some(Self::Issued),
            "sent_to_client" => Some(Self::SentToClient),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    fn next(self, action: InvoiceAction) -> Option<Self> {
        use InvoiceAction::*;
        use InvoiceStatus::*;

        match (self, action) {
            (Issued, Send) => Some(SentToClient),
            (Issued | SentToClient, RecordPayment) => Some(Paid),
            (Issued | SentToClient, Cancel) => Some(Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InvoiceAction {
    Send,
    RecordPayment,
    Cancel,
}

impl InvoiceAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::RecordPayment => "record_payment",
            Self::Cancel => "cancel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceParts {
    pub id: InvoiceId,
    pub number: DocumentNumber,
    pub quote_id: QuoteId,
    pub client_id: ClientId,
    pub vat_rate: Decimal,
    pub lines: Vec<LineItemInput>,
    pub amount_excl_tax: Decimal,
    pub amount_incl_tax: Decimal,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub version: u32,
}

/// Invoice aggregate. Lines and totals are a frozen snapshot of the source quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invoice {
    id: InvoiceId,
    number: DocumentNumber,
    quote_id: QuoteId,
    client_id: ClientId,
    vat_rate: VatRate,
    lines: Vec<LineItem>,
    totals: Totals,
    status: InvoiceStatus,
    issued_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    payment_method: Option<String>,
    payment_reference: Option<String>,
    version: u32,
}

impl Invoice {
    /// Only conversion creates invoices.
    pub(crate) fn issue(pending: PendingInvoice, number: DocumentNumber) -> Self {
        Self {
            id: pending.id,
            number,
            quote_id: pending.quote_id,
            client_id: pending.client_id,
            vat_rate: pending.vat_rate,
            lines: pending.lines,
            totals: pending.totals,
            status: InvoiceStatus::Issued,
            issued_at: pending.issued_at,
            due_at: pending.due_at,
            paid_at: None,
            payment_method: None,
            payment_reference: None,
            version: 0,
        }
    }

    /// Rehydrates a stored invoice, refusing rows whose totals no longer match their lines.
    pub fn restore(parts: InvoiceParts) -> Result<Self, DomainError> {
        let lines = build_lines(parts.lines)?;
        let vat_rate = VatRate::new(parts.vat_rate)?;
        let totals = totals_for(&lines, vat_rate)?;

        if totals.amount_excl_tax != parts.amount_excl_tax
            || totals.amount_incl_tax != parts.amount_incl_tax
        {
            return Err(DomainError::InternalConsistency(format!(
                "invoice {} stores totals {}/{} but its lines sum to {}/{}",
                parts.number,
                parts.amount_excl_tax,
                parts.amount_incl_tax,
                totals.amount_excl_tax,
                totals.amount_incl_tax
            )));
        }
        if parts.due_at < parts.issued_at {
            return Err(DomainError::InternalConsistency(format!(
                "invoice {} is due before it was issued",
                parts.number
            )));
        }
        if (parts.status == InvoiceStatus::Paid) != parts.paid_at.is_some() {
            return Err(DomainError::InternalConsistency(format!(
                "invoice {} payment timestamp does not match status `{}`",
                parts.number, parts.status
            )));
        }

        Ok(Self {
            id: parts.id,
            number: parts.number,
            quote_id: parts.quote_id,
            client_id: parts.client_id,
            vat_rate,
            lines,
            totals,
            status: parts.status,
            issued_at: parts.issued_at,
            due_at: parts.due_at,
            paid_at: parts.paid_at,
            payment_method: parts.payment_method,
            payment_reference: parts.payment_reference,
            version: parts.version,
        })
    }

    pub fn to_parts(&self) -> InvoiceParts {
        InvoiceParts {
            id: self.id.clone(),
            number: self.number.clone(),
            quote_id: self.quote_id.clone(),
            client_id: self.client_id.clone(),
            vat_rate: self.vat_rate.percent(),
            lines: self.lines.iter().map(LineItem::to_input).collect(),
            amount_excl_tax: self.totals.amount_excl_tax,
            amount_incl_tax: self.totals.amount_incl_tax,
            status: self.status,
            issued_at: self.issued_at,
            due_at: self.due_at,
            paid_at: self.paid_at,
            payment_method: self.payment_method.clone(),
            payment_reference: self.payment_reference.clone(),
            version: self.version,
        }
    }

    pub fn id(&self) -> &InvoiceId {
        &self.id
    }

    pub fn number(&self) -> &DocumentNumber {
        &self.number
    }

    pub fn quote_id(&self) -> &QuoteId {
        &self.quote_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn vat_rate(&self) -> VatRate {
        self.vat_rate
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Unpaid, uncancelled and past `due_at`. Informational only.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, InvoiceStatus::Issued | InvoiceStatus::SentToClient)
            && now > self.due_at
    }

    pub fn send(&mut self) -> Result<(), DomainError> {
        self.status = self.next_status(InvoiceAction::Send)?;
        Ok(())
    }

    pub fn record_payment(
        &mut self,
        method: &str,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let next = self.next_status(InvoiceAction::RecordPayment)?;
        let method = method.trim();
        if method.is_empty() {
            return Err(DomainError::invalid_field("payment_method", "must not be empty"));
        }

        self.status = next;
        self.paid_at = Some(now);
        self.payment_method = Some(method.to_string());
        self.payment_reference =
            reference.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.status = self.next_status(InvoiceAction::Cancel)?;
        Ok(())
    }

    fn next_status(&self, action: InvoiceAction) -> Result<InvoiceStatus, DomainError> {
        self.status.next(action).ok_or_else(|| {
            DomainError::state_conflict(
                DocumentKind::Invoice,
                self.status.as_str(),
                action.as_str(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{Invoice, InvoiceId, InvoiceStatus};
    use crate::domain::conversion::PendingInvoice;
    use crate::domain::line_item::{build_lines, LineItemInput};
    use crate::domain::quote::{ClientId, QuoteId};
    use crate::errors::DomainError;
    use crate::numbering::DocumentNumber;
    use crate::totals::{totals_for, VatRate};

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).single().expect("valid timestamp")
    }

    fn issued_invoice() -> Invoice {
        let lines = build_lines(vec![
            LineItemInput::new("Service visit", Decimal::from(2), Decimal::from(100)),
            LineItemInput::new("Filter", Decimal::ONE, Decimal::from(50)),
        ])
        .expect("valid lines");
        let vat_rate = VatRate::new(Decimal::from(18)).expect("valid rate");
        let totals = totals_for(&lines, vat_rate).expect("totals");

        let pending = PendingInvoice {
            id: InvoiceId("INV-1".to_string()),
            quote_id: QuoteId("Q-1".to_string()),
            client_id: ClientId("CLI-001".to_string()),
            vat_rate,
            lines,
            totals,
            issued_at: issued_at(),
            due_at: issued_at() + Duration::days(30),
        };
        pending.issue(DocumentNumber("FAC-2026-0001".to_string()))
    }

    fn invoice_in(status: InvoiceStatus) -> Invoice {
        let mut invoice = issued_invoice();
        match status {
            InvoiceStatus::Issued => {}
            InvoiceStatus::SentToClient => invoice.send().expect("send"),
            InvoiceStatus::Paid => {
                invoice.record_payment("cheque", None, issued_at()).expect("pay");
            }
            InvoiceStatus::Cancelled => invoice.cancel().expect("cancel"),
        }
        invoice
    }

    #[test]
    fn recording_a_payment_sets_metadata() {
        let mut invoice = issued_invoice();
        let paid_at = issued_at() + Duration::days(3);
        invoice.record_payment("wire", Some("TX123".to_string()), paid_at).expect("payment");

        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.payment_method(), Some("wire"));
        assert_eq!(invoice.payment_reference(), Some("TX123"));
        assert_eq!(invoice.paid_at(), Some(paid_at));
    }

    #[test]
    fn payment_requires_a_method() {
        let mut invoice = issued_invoice();
        let error = invoice.record_payment("  ", None, issued_at()).expect_err("blank method");

        assert!(matches!(error, DomainError::Validation(_)));
        assert_eq!(invoice.status(), InvoiceStatus::Issued);
        assert_eq!(invoice.paid_at(), None);
    }

    #[test]
    fn cancelling_a_paid_invoice_conflicts_and_changes_nothing() {
        let mut invoice = invoice_in(InvoiceStatus::Paid);
        let before = invoice.clone();

        let error = invoice.cancel().expect_err("paid is terminal");
        assert_eq!(
            error,
            DomainError::state_conflict(crate::domain::DocumentKind::Invoice, "paid", "cancel")
        );
        assert_eq!(invoice, before);
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        let cases = [
            (InvoiceStatus::Issued, [true, true, true]),
            (InvoiceStatus::SentToClient, [false, true, true]),
            (InvoiceStatus::Paid, [false, false, false]),
            (InvoiceStatus::Cancelled, [false, false, false]),
        ];

        for (status, [send, pay, cancel]) in cases {
            assert_eq!(invoice_in(status).send().is_ok(), send, "send from {status}");
            assert_eq!(
                invoice_in(status).record_payment("wire", None, issued_at()).is_ok(),
                pay,
                "record_payment from {status}"
            );
            assert_eq!(invoice_in(status).cancel().is_ok(), cancel, "cancel from {status}");
        }
    }

    #[test]
    fn overdue_only_while_open() {
        let late = issued_at() + Duration::days(31);

        assert!(!issued_invoice().is_overdue(issued_at() + Duration::days(30)));
        assert!(issued_invoice().is_overdue(late));
        assert!(invoice_in(InvoiceStatus::SentToClient).is_overdue(late));
        assert!(!invoice_in(InvoiceStatus::Paid).is_overdue(late));
        assert!(!invoice_in(InvoiceStatus::Cancelled).is_overdue(late));
    }

    #[test]
    fn restore_verifies_frozen_totals_and_dates() {
        let invoice = invoice_in(InvoiceStatus::Paid).with_version(2);
        assert_eq!(Invoice::restore(invoice.to_parts()).expect("restore"), invoice);

        let mut tampered = invoice.to_parts();
        tampered.amount_incl_tax = Decimal::new(29501, 2);
        assert!(matches!(Invoice::restore(tampered), Err(DomainError::InternalConsistency(_))));

        let mut early = invoice.to_parts();
        early.due_at = early.issued_at - Duration::days(1);
        assert!(matches!(Invoice::restore(early), Err(DomainError::InternalConsistency(_))));
    }

    #[test]
    fn status_storage_encoding_round_trips() {
        for status in [
            InvoiceStatus::Issued,
            InvoiceStatus::SentToClient,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
        ] {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert!(InvoiceStatus::Paid.is_terminal());
        assert!(!InvoiceStatus::SentToClient.is_terminal());
    }
}
