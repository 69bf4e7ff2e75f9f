pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "gemsource",
    about = "Gemsource operator CLI",
    long_about = "Operate the gemsource marketplace store: migrations, demo fixtures, config inspection, readiness checks, and cart workflow status.",
    after_help = "Examples:\n  gemsource doctor --json\n  gemsource seed\n  gemsource status cart-negotiation-001 --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic marketplace demo carts, quotations and orders")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, payment gateway readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Derive the canonical workflow status of one cart")]
    Status {
        #[arg(help = "Cart id, e.g. cart-negotiation-001")]
        cart_id: String,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Status { cart_id, json } => commands::status::run(&cart_id, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
