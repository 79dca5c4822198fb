use chrono::NaiveDate;
use clap::Subcommand;
use fieldops_billing::Billing;
use fieldops_core::{
    ApplicationError, ClientId, DocumentNumber, DocumentView, LineItemInput, MissionId, NewQuote,
    Quote, QuoteDetails, QuoteId, QuoteStatus, UserId,
};
use fieldops_db::DocumentRepository;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::{with_billing, CommandResult};

#[derive(Debug, Subcommand)]
pub enum QuoteCommand {
    #[command(about = "Create a draft quote and allocate its number")]
    Create {
        #[arg(long)]
        client: String,
        #[arg(long)]
        mission: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, help = "Last day the offer stands (YYYY-MM-DD)")]
        valid_until: NaiveDate,
        #[arg(long, help = "VAT rate in percent, e.g. 20 or 5.5")]
        vat_rate: Decimal,
        #[arg(
            long = "line",
            value_parser = parse_line,
            help = "Repeatable DESIGNATION:QUANTITY:UNIT_PRICE"
        )]
        lines: Vec<LineItemInput>,
    },
    #[command(about = "Show a quote by id or number")]
    Show { quote: String },
    #[command(about = "List quotes in a given status")]
    List {
        #[arg(long, value_parser = parse_status)]
        status: QuoteStatus,
    },
    #[command(about = "Append a line to a draft quote")]
    AddLine {
        quote: String,
        #[arg(value_parser = parse_line)]
        line: LineItemInput,
    },
    #[command(about = "Replace the line at INDEX (zero-based) of a draft quote")]
    UpdateLine {
        quote: String,
        index: usize,
        #[arg(value_parser = parse_line)]
        line: LineItemInput,
    },
    #[command(about = "Remove the line at INDEX (zero-based) of a draft quote")]
    RemoveLine { quote: String, index: usize },
    #[command(about = "Reorder draft lines; --order lists current indexes in their new order")]
    Reorder {
        quote: String,
        #[arg(long, value_delimiter = ',', required = true)]
        order: Vec<usize>,
    },
    #[command(about = "Edit the header of a draft quote")]
    Edit {
        quote: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        valid_until: NaiveDate,
        #[arg(long)]
        vat_rate: Decimal,
    },
    #[command(about = "Submit a draft quote for internal review")]
    Submit { quote: String },
    #[command(about = "Record the internal approval of a submitted quote")]
    Validate {
        quote: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Record the internal rejection of a submitted quote")]
    Reject {
        quote: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Record the client's acceptance of a validated quote")]
    ClientAccept {
        quote: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Record the client's refusal of a validated quote")]
    ClientReject {
        quote: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Issue the invoice for a client-accepted quote")]
    Convert { quote: String },
}

impl QuoteCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "quote create",
            Self::Show { .. } => "quote show",
            Self::List { .. } => "quote list",
            Self::AddLine { .. } => "quote add-line",
            Self::UpdateLine { .. } => "quote update-line",
            Self::RemoveLine { .. } => "quote remove-line",
            Self::Reorder { .. } => "quote reorder",
            Self::Edit { .. } => "quote edit",
            Self::Submit { .. } => "quote submit",
            Self::Validate { .. } => "quote validate",
            Self::Reject { .. } => "quote reject",
            Self::ClientAccept { .. } => "quote client-accept",
            Self::ClientReject { .. } => "quote client-reject",
            Self::Convert { .. } => "quote convert",
        }
    }
}

pub fn run(command: QuoteCommand) -> CommandResult {
    let name = command.name();
    with_billing(name, |billing| async move {
        match execute(&billing, command).await {
            Ok((message, document)) => CommandResult::with_document(name, message, &document),
            Err(error) => CommandResult::from_error(name, &error),
        }
    })
}

#[derive(Serialize)]
#[serde(untagged)]
enum Rendered {
    One(DocumentView),
    Many(Vec<DocumentView>),
}

async fn execute<R: DocumentRepository>(
    billing: &Billing<R>,
    command: QuoteCommand,
) -> Result<(String, Rendered), ApplicationError> {
    let quotes = &billing.quotes;
    let quote = match command {
        QuoteCommand::Create {
            client,
            mission,
            title,
            description,
            valid_until,
            vat_rate,
            lines,
        } => {
            let input = NewQuote {
                client_id: ClientId(client),
                mission_id: mission.map(MissionId),
                title,
                description,
                valid_until,
                vat_rate,
                lines,
            };
            let quote = quotes.create_quote(input).await?;
            return Ok((format!("created quote {}", quote.number()), one(&quote)));
        }
        QuoteCommand::Show { quote } => resolve(billing, &quote).await?,
        QuoteCommand::List { status } => {
            let found = quotes.list_by_status(status).await?;
            let message = format!("{} quote(s) in `{status}`", found.len());
            return Ok((message, Rendered::Many(found.iter().map(DocumentView::from).collect())));
        }
        QuoteCommand::AddLine { quote, line } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.add_line(&id, line).await?
        }
        QuoteCommand::UpdateLine { quote, index, line } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.update_line(&id, index, line).await?
        }
        QuoteCommand::RemoveLine { quote, index } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.remove_line(&id, index).await?
        }
        QuoteCommand::Reorder { quote, order } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.reorder_lines(&id, order).await?
        }
        QuoteCommand::Edit { quote, title, description, valid_until, vat_rate } => {
            let id = resolve(billing, &quote).await?.id().clone();
            let details = QuoteDetails { title, description, valid_until, vat_rate };
            quotes.update_details(&id, details).await?
        }
        QuoteCommand::Submit { quote } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.submit(&id).await?
        }
        QuoteCommand::Validate { quote, approver, comment } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.validate_internally(&id, UserId(approver), comment).await?
        }
        QuoteCommand::Reject { quote, approver, comment } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.reject_internally(&id, UserId(approver), comment).await?
        }
        QuoteCommand::ClientAccept { quote, comment } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.record_client_acceptance(&id, comment).await?
        }
        QuoteCommand::ClientReject { quote, comment } => {
            let id = resolve(billing, &quote).await?.id().clone();
            quotes.record_client_rejection(&id, comment).await?
        }
        QuoteCommand::Convert { quote } => {
            let source = resolve(billing, &quote).await?;
            let invoice = billing.conversion.convert(source.id()).await?;
            let message = format!("quote {} invoiced as {}", source.number(), invoice.number());
            return Ok((message, Rendered::One(DocumentView::from(&invoice))));
        }
    };

    Ok((format!("quote {} is `{}`", quote.number(), quote.status()), one(&quote)))
}

/// Accepts either the quote id or its document number.
pub(crate) async fn resolve<R: DocumentRepository>(
    billing: &Billing<R>,
    reference: &str,
) -> Result<Quote, ApplicationError> {
    match billing.quotes.get_quote(&QuoteId(reference.to_string())).await {
        Err(ApplicationError::NotFound { .. }) => {
            billing.quotes.get_quote_by_number(&DocumentNumber(reference.to_string())).await
        }
        other => other,
    }
}

fn one(quote: &Quote) -> Rendered {
    Rendered::One(DocumentView::from(quote))
}

/// Parses `DESIGNATION:QUANTITY:UNIT_PRICE`. The designation may itself contain `:`.
pub fn parse_line(raw: &str) -> Result<LineItemInput, String> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(unit_price), Some(quantity), Some(designation)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected DESIGNATION:QUANTITY:UNIT_PRICE, got `{raw}`"));
    };

    let quantity = quantity
        .trim()
        .parse::<Decimal>()
        .map_err(|error| format!("invalid quantity `{quantity}`: {error}"))?;
    let unit_price = unit_price
        .trim()
        .parse::<Decimal>()
        .map_err(|error| format!("invalid unit price `{unit_price}`: {error}"))?;
    Ok(LineItemInput::new(designation.trim(), quantity, unit_price))
}

fn parse_status(raw: &str) -> Result<QuoteStatus, String> {
    QuoteStatus::parse(raw).ok_or_else(|| format!("unknown quote status `{raw}`"))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::parse_line;

    #[test]
    fn line_argument_splits_from_the_right() {
        let line = parse_line("Valve: 15mm:2:12.50").expect("valid line");

        assert_eq!(line.designation, "Valve: 15mm");
        assert_eq!(line.quantity, Decimal::new(2, 0));
        assert_eq!(line.unit_price, Decimal::new(1250, 2));
    }

    #[test]
    fn malformed_line_argument_is_rejected() {
        assert!(parse_line("Labour:6.5").is_err());
        assert!(parse_line("Labour:six:55").unwrap_err().contains("invalid quantity"));
    }
}
