use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::invoice::InvoiceId;
use crate::domain::line_item::{position, validate_input, LineItem, LineItemInput};
use crate::domain::DocumentKind;
use crate::errors::{DomainError, ValidationErrors};
use crate::numbering::DocumentNumber;
use crate::totals::{totals_for, Totals, VatRate};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a client owned by another subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub String);

/// Opaque reference to an internal user (approver).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Validated,
    RejectedInternal,
    AcceptedByClient,
    RejectedByClient,
    Invoiced,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Validated => "validated",
            Self::RejectedInternal => "rejected_internal",
            Self::AcceptedByClient => "accepted_by_client",
            Self::RejectedByClient => "rejected_by_client",
            Self::Invoiced => "invoiced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "validated" => Some(Self::Validated),
            "rejected_internal" => Some(Self::RejectedInternal),
            "accepted_by_client" => Some(Self::AcceptedByClient),
            "rejected_by_client" => Some(Self::RejectedByClient),
            "invoiced" => Some(Self::Invoiced),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RejectedInternal | Self::RejectedByClient | Self::Invoiced)
    }

    fn next(self, action: QuoteAction) -> Option<Self> {
        use QuoteAction::*;
        use QuoteStatus::*;

        match (self, action) {
            (Draft, Submit) => Some(Sent),
            (Sent, ValidateInternally) => Some(Validated),
            (Sent, RejectInternally) => Some(RejectedInternal),
            (Validated, RecordClientAcceptance) => Some(AcceptedByClient),
            (Validated, RecordClientRejection) => Some(RejectedByClient),
            (AcceptedByClient, MarkInvoiced) => Some(Invoiced),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QuoteAction {
    Submit,
    ValidateInternally,
    RejectInternally,
    RecordClientAcceptance,
    RecordClientRejection,
    MarkInvoiced,
}

impl QuoteAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::ValidateInternally => "validate_internally",
            Self::RejectInternally => "reject_internally",
            Self::RecordClientAcceptance => "record_client_acceptance",
            Self::RecordClientRejection => "record_client_rejection",
            Self::MarkInvoiced => "mark_invoiced",
        }
    }
}

/// Input for creating a quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuote {
    pub client_id: ClientId,
    pub mission_id: Option<MissionId>,
    pub title: String,
    pub description: Option<String>,
    pub valid_until: NaiveDate,
    pub vat_rate: Decimal,
    pub lines: Vec<LineItemInput>,
}

impl NewQuote {
    /// Collects every field error at once, in field order.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        let mut errors = ValidationErrors::new();
        if self.client_id.0.trim().is_empty() {
            errors.push("client_id", "is required");
        }
        if self.mission_id.as_ref().is_some_and(|mission| mission.0.trim().is_empty()) {
            errors.push("mission_id", "must not be blank when provided");
        }
        validate_details(&self.title, self.valid_until, self.vat_rate, now, &mut errors);
        for (index, line) in self.lines.iter().enumerate() {
            validate_input(&format!("lines[{index}]"), line, &mut errors);
        }
        errors.into_result()
    }
}

/// Editable header fields of a draft quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDetails {
    pub title: String,
    pub description: Option<String>,
    pub valid_until: NaiveDate,
    pub vat_rate: Decimal,
}

/// Flat, storage-shaped view of a quote. `Quote::restore` re-checks every invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteParts {
    pub id: QuoteId,
    pub number: DocumentNumber,
    pub client_id: ClientId,
    pub mission_id: Option<MissionId>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub valid_until: NaiveDate,
    pub vat_rate: Decimal,
    pub lines: Vec<LineItemInput>,
    pub status: QuoteStatus,
    pub direction_validated_at: Option<DateTime<Utc>>,
    pub direction_comment: Option<String>,
    pub validated_by: Option<UserId>,
    pub client_responded_at: Option<DateTime<Utc>>,
    pub client_comment: Option<String>,
    pub invoice_id: Option<InvoiceId>,
    pub version: u32,
}

/// Quote aggregate.
///
/// Lines are editable only in `Draft`. Totals are recomputed by every write
/// that touches lines or the VAT rate, so they always match the lines held.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Quote {
    id: QuoteId,
    number: DocumentNumber,
    client_id: ClientId,
    mission_id: Option<MissionId>,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    valid_until: NaiveDate,
    vat_rate: VatRate,
    lines: Vec<LineItem>,
    totals: Totals,
    status: QuoteStatus,
    direction_validated_at: Option<DateTime<Utc>>,
    direction_comment: Option<String>,
    validated_by: Option<UserId>,
    client_responded_at: Option<DateTime<Utc>>,
    client_comment: Option<String>,
    invoice_id: Option<InvoiceId>,
    version: u32,
}

impl Quote {
    pub fn create(
        id: QuoteId,
        number: DocumentNumber,
        input: NewQuote,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        input.validate(now)?;

        let vat_rate = VatRate::new(input.vat_rate)?;
        let lines = number_lines(input.lines);
        let totals = totals_for(&lines, vat_rate)?;

        Ok(Self {
            id,
            number,
            client_id: input.client_id,
            mission_id: input.mission_id,
            title: input.title.trim().to_string(),
            description: normalize_text(input.description),
            created_at: now,
            valid_until: input.valid_until,
            vat_rate,
            lines,
            totals,
            status: QuoteStatus::Draft,
            direction_validated_at: None,
            direction_comment: None,
            validated_by: None,
            client_responded_at: None,
            client_comment: None,
            invoice_id: None,
            version: 0,
        })
    }

    pub fn restore(parts: QuoteParts) -> Result<Self, DomainError> {
        let mut errors = ValidationErrors::new();
        for (index, line) in parts.lines.iter().enumerate() {
            validate_input(&format!("lines[{index}]"), line, &mut errors);
        }
        errors.into_result()?;

        match (parts.status, &parts.invoice_id) {
            (QuoteStatus::Invoiced, None) => {
                return Err(DomainError::InternalConsistency(format!(
                    "quote {} is invoiced but has no invoice reference",
                    parts.id
                )));
            }
            (status, Some(_)) if status != QuoteStatus::Invoiced => {
                return Err(DomainError::InternalConsistency(format!(
                    "quote {} references an invoice while `{status}`",
                    parts.id
                )));
            }
            _ => {}
        }

        let vat_rate = VatRate::new(parts.vat_rate)?;
        let lines = number_lines(parts.lines);
        let totals = totals_for(&lines, vat_rate)?;

        Ok(Self {
            id: parts.id,
            number: parts.number,
            client_id: parts.client_id,
            mission_id: parts.mission_id,
            title: parts.title,
            description: parts.description,
            created_at: parts.created_at,
            valid_until: parts.valid_until,
            vat_rate,
            lines,
            totals,
            status: parts.status,
            direction_validated_at: parts.direction_validated_at,
            direction_comment: parts.direction_comment,
            validated_by: parts.validated_by,
            client_responded_at: parts.client_responded_at,
            client_comment: parts.client_comment,
            invoice_id: parts.invoice_id,
            version: parts.version,
        })
    }

    pub fn to_parts(&self) -> QuoteParts {
        QuoteParts {
            id: self.id.clone(),
            number: self.number.clone(),
            client_id: self.client_id.clone(),
            mission_id: self.mission_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            valid_until: self.valid_until,
            vat_rate: self.vat_rate.percent(),
            lines: self.lines.iter().map(LineItem::to_input).collect(),
            status: self.status,
            direction_validated_at: self.direction_validated_at,
            direction_comment: self.direction_comment.clone(),
            validated_by: self.validated_by.clone(),
            client_responded_at: self.client_responded_at,
            client_comment: self.client_comment.clone(),
            invoice_id: self.invoice_id.clone(),
            version: self.version,
        }
    }

    pub fn id(&self) -> &QuoteId {
        &self.id
    }

    pub fn number(&self) -> &DocumentNumber {
        &self.number
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn mission_id(&self) -> Option<&MissionId> {
        self.mission_id.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn valid_until(&self) -> NaiveDate {
        self.valid_until
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

    pub fn status(&self) -> QuoteStatus {
        self.status
    }

    pub fn direction_validated_at(&self) -> Option<DateTime<Utc>> {
        self.direction_validated_at
    }

    pub fn direction_comment(&self) -> Option<&str> {
        self.direction_comment.as_deref()
    }

    pub fn validated_by(&self) -> Option<&UserId> {
        self.validated_by.as_ref()
    }

    pub fn client_responded_at(&self) -> Option<DateTime<Utc>> {
        self.client_responded_at
    }

    pub fn client_comment(&self) -> Option<&str> {
        self.client_comment.as_deref()
    }

    pub fn invoice_id(&self) -> Option<&InvoiceId> {
        self.invoice_id.as_ref()
    }

    /// Optimistic-concurrency token; 0 until first persisted.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// True once `valid_until` has passed while the client has not yet answered.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        matches!(self.status, QuoteStatus::Draft | QuoteStatus::Sent | QuoteStatus::Validated)
            && self.valid_until < today
    }

    pub fn add_line(&mut self, input: LineItemInput) -> Result<(), DomainError> {
        self.ensure_draft("add_line")?;
        validate_line("line", &input)?;

        let mut lines = self.lines.clone();
        lines.push(LineItem::from_valid(input, position(lines.len())));
        self.replace_lines(lines)
    }

    pub fn update_line(&mut self, index: usize, input: LineItemInput) -> Result<(), DomainError> {
        self.ensure_draft("update_line")?;
        self.ensure_index(index)?;
        validate_line("line", &input)?;

        let mut lines = self.lines.clone();
        lines[index] = LineItem::from_valid(input, position(index));
        self.replace_lines(lines)
    }

    pub fn remove_line(&mut self, index: usize) -> Result<(), DomainError> {
        self.ensure_draft("remove_line")?;
        self.ensure_index(index)?;

        let mut lines = self.lines.clone();
        lines.remove(index);
        self.replace_lines(renumber(lines))
    }

    /// `permutation[i]` is the current index of the line that moves to position `i`.
    pub fn reorder_lines(&mut self, permutation: &[usize]) -> Result<(), DomainError> {
        self.ensure_draft("reorder_lines")?;

        let mut seen = vec![false; self.lines.len()];
        let is_permutation = permutation.len() == self.lines.len()
            && permutation.iter().all(|&index| {
                index < seen.len() && !std::mem::replace(&mut seen[index], true)
            });
        if !is_permutation {
            return Err(DomainError::invalid_field(
                "permutation",
                "must list every current line index exactly once",
            ));
        }

        let lines = permutation.iter().map(|&index| self.lines[index].clone()).collect();
        self.replace_lines(renumber(lines))
    }

    pub fn update_details(
        &mut self,
        details: QuoteDetails,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_draft("update_details")?;

        let mut errors = ValidationErrors::new();
        validate_details(&details.title, details.valid_until, details.vat_rate, now, &mut errors);
        errors.into_result()?;

        let vat_rate = VatRate::new(details.vat_rate)?;
        let totals = totals_for(&self.lines, vat_rate)?;

        self.title = details.title.trim().to_string();
        self.description = normalize_text(details.description);
        self.valid_until = details.valid_until;
        self.vat_rate = vat_rate;
        self.totals = totals;
        Ok(())
    }

    pub fn submit(&mut self) -> Result<(), DomainError> {
        let next = self.next_status(QuoteAction::Submit)?;
        if self.lines.is_empty() {
            return Err(DomainError::invalid_field("lines", "at least one line item is required"));
        }
        self.status = next;
        Ok(())
    }

    pub fn validate_internally(
        &mut self,
        approver: UserId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record_direction_decision(QuoteAction::ValidateInternally, approver, comment, now)
    }

    pub fn reject_internally(
        &mut self,
        approver: UserId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record_direction_decision(QuoteAction::RejectInternally, approver, comment, now)
    }

    pub fn record_client_acceptance(
        &mut self,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record_client_response(QuoteAction::RecordClientAcceptance, comment, now)
    }

    pub fn record_client_rejection(
        &mut self,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.record_client_response(QuoteAction::RecordClientRejection, comment, now)
    }

    /// Freezes the quote and links it to its invoice. Only conversion calls this.
    pub(crate) fn mark_invoiced(&mut self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.invoice_id.is_some() {
            return Err(DomainError::Precondition(format!(
                "quote {} has already been converted",
                self.number
            )));
        }
        let next = self.next_status(QuoteAction::MarkInvoiced)?;
        self.status = next;
        self.invoice_id = Some(invoice_id);
        Ok(())
    }

    fn record_direction_decision(
        &mut self,
        action: QuoteAction,
        approver: UserId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let next = self.next_status(action)?;
        if approver.0.trim().is_empty() {
            return Err(DomainError::invalid_field("approver_id", "is required"));
        }

        self.status = next;
        self.direction_validated_at = Some(now);
        self.validated_by = Some(approver);
        self.direction_comment = normalize_text(comment);
        Ok(())
    }

    fn record_client_response(
        &mut self,
        action: QuoteAction,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let next = self.next_status(action)?;

        self.status = next;
        self.client_responded_at = Some(now);
        self.client_comment = normalize_text(comment);
        Ok(())
    }

    fn next_status(&self, action: QuoteAction) -> Result<QuoteStatus, DomainError> {
        self.status.next(action).ok_or_else(|| {
            DomainError::state_conflict(DocumentKind::Quote, self.status.as_str(), action.as_str())
        })
    }

    fn ensure_draft(&self, requested: &str) -> Result<(), DomainError> {
        if self.status == QuoteStatus::Draft {
            Ok(())
        } else {
            Err(DomainError::state_conflict(DocumentKind::Quote, self.status.as_str(), requested))
        }
    }

    fn ensure_index(&self, index: usize) -> Result<(), DomainError> {
        if index < self.lines.len() {
            Ok(())
        } else {
            Err(DomainError::invalid_field(
                "line_index",
                format!("no line at index {index} (quote has {} lines)", self.lines.len()),
            ))
        }
    }

    fn replace_lines(&mut self, lines: Vec<LineItem>) -> Result<(), DomainError> {
        let totals = totals_for(&lines, self.vat_rate)?;
        self.lines = lines;
        self.totals = totals;
        Ok(())
    }
}

fn validate_line(path: &str, input: &LineItemInput) -> Result<(), DomainError> {
    let mut errors = ValidationErrors::new();
    validate_input(path, input, &mut errors);
    errors.into_result()
}

fn validate_details(
    title: &str,
    valid_until: NaiveDate,
    vat_rate: Decimal,
    now: DateTime<Utc>,
    errors: &mut ValidationErrors,
) {
    if title.trim().is_empty() {
        errors.push("title", "must not be empty");
    }
    if valid_until < now.date_naive() {
        errors.push("valid_until", "must not be before today");
    }
    if vat_rate < Decimal::ZERO {
        errors.push("vat_rate", "must not be negative");
    }
}

fn number_lines(inputs: Vec<LineItemInput>) -> Vec<LineItem> {
    inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| LineItem::from_valid(input, position(index)))
        .collect()
}

fn renumber(lines: Vec<LineItem>) -> Vec<LineItem> {
    lines.into_iter().enumerate().map(|(index, line)| line.renumbered(position(index))).collect()
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}
