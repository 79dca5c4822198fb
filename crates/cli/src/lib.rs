pub mod commands;

use clap::{Parser, Subcommand};
use commands::invoice::InvoiceCommand;
use commands::quote::QuoteCommand;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "fieldops",
    about = "Fieldops billing operator CLI",
    long_about = "Run migrations, inspect configuration, and drive quotes and invoices \
                  through their lifecycle. Every command prints one JSON outcome.",
    after_help = "Examples:\n  fieldops doctor --json\n  fieldops quote submit DEV-2026-0001\n  \
                  fieldops quote convert DEV-2026-0001\n  \
                  fieldops invoice pay FAC-2026-0001 --method wire"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, numbering policy, DB connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Create, edit and move quotes through review and client approval")]
    Quote {
        #[command(subcommand)]
        command: QuoteCommand,
    },
    #[command(about = "Send, settle or cancel issued invoices")]
    Invoice {
        #[command(subcommand)]
        command: InvoiceCommand,
    },
}

pub fn execute(cli: Cli) -> commands::CommandResult {
    match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Quote { command } => commands::quote::run(command),
        Command::Invoice { command } => commands::invoice::run(command),
    }
}

pub fn run() -> ExitCode {
    let result = execute(Cli::parse());

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
