use chrono::Utc;
use clap::Subcommand;
use fieldops_billing::Billing;
use fieldops_core::{
    ApplicationError, DocumentKind, DocumentNumber, DocumentView, Invoice, InvoiceId,
};
use fieldops_db::DocumentRepository;

use crate::commands::{quote, with_billing, CommandResult};

#[derive(Debug, Subcommand)]
pub enum InvoiceCommand {
    #[command(about = "Show an invoice by id or number")]
    Show { invoice: String },
    #[command(about = "Show the invoice issued from a quote")]
    ForQuote { quote: String },
    #[command(about = "Mark an issued invoice as sent to the client")]
    Send { invoice: String },
    #[command(about = "Record the payment of an invoice")]
    Pay {
        invoice: String,
        #[arg(long, help = "Payment method, e.g. wire, cheque, card")]
        method: String,
        #[arg(long)]
        reference: Option<String>,
    },
    #[command(about = "Cancel an unpaid invoice")]
    Cancel { invoice: String },
}

impl InvoiceCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Show { .. } => "invoice show",
            Self::ForQuote { .. } => "invoice for-quote",
            Self::Send { .. } => "invoice send",
            Self::Pay { .. } => "invoice pay",
            Self::Cancel { .. } => "invoice cancel",
        }
    }
}

pub fn run(command: InvoiceCommand) -> CommandResult {
    let name = command.name();
    with_billing(name, |billing| async move {
        match execute(&billing, command).await {
            Ok(invoice) => {
                let mut message = format!("invoice {} is `{}`", invoice.number(), invoice.status());
                if invoice.is_overdue(Utc::now()) {
                    message.push_str(" and overdue");
                }
                CommandResult::with_document(name, message, &DocumentView::from(&invoice))
            }
            Err(error) => CommandResult::from_error(name, &error),
        }
    })
}

async fn execute<R: DocumentRepository>(
    billing: &Billing<R>,
    command: InvoiceCommand,
) -> Result<Invoice, ApplicationError> {
    let invoices = &billing.invoices;
    match command {
        InvoiceCommand::Show { invoice } => resolve(billing, &invoice).await,
        InvoiceCommand::ForQuote { quote: reference } => {
            let source = quote::resolve(billing, &reference).await?;
            invoices.invoice_for_quote(source.id()).await?.ok_or_else(|| {
                ApplicationError::NotFound {
                    document: DocumentKind::Invoice,
                    id: format!("for quote {}", source.number()),
                }
            })
        }
        InvoiceCommand::Send { invoice } => {
            let id = resolve(billing, &invoice).await?.id().clone();
            invoices.send(&id).await
        }
        InvoiceCommand::Pay { invoice, method, reference } => {
            let id = resolve(billing, &invoice).await?.id().clone();
            invoices.record_payment(&id, &method, reference).await
        }
        InvoiceCommand::Cancel { invoice } => {
            let id = resolve(billing, &invoice).await?.id().clone();
            invoices.cancel(&id).await
        }
    }
}

async fn resolve<R: DocumentRepository>(
    billing: &Billing<R>,
    reference: &str,
) -> Result<Invoice, ApplicationError> {
    match billing.invoices.get_invoice(&InvoiceId(reference.to_string())).await {
        Err(ApplicationError::NotFound { .. }) => {
            billing.invoices.get_invoice_by_number(&DocumentNumber(reference.to_string())).await
        }
        other => other,
    }
}
