pub mod config;
pub mod domain;
pub mod errors;
pub mod numbering;
pub mod totals;

pub use chrono;
pub use rust_decimal;

pub use domain::conversion::{prepare_conversion, ConversionPlan, PendingInvoice};
pub use domain::invoice::{Invoice, InvoiceId, InvoiceParts, InvoiceStatus};
pub use domain::line_item::{LineItem, LineItemInput};
pub use domain::quote::{
    ClientId, MissionId, NewQuote, Quote, QuoteDetails, QuoteId, QuoteParts, QuoteStatus, UserId,
};
pub use domain::view::{DocumentView, LineView};
pub use domain::DocumentKind;
pub use errors::{ApplicationError, DomainError, FieldError, InterfaceError, ValidationErrors};
pub use numbering::{DocumentNumber, NumberingScheme, SequenceKind};
pub use totals::{compute_totals, Totals, VatRate};
