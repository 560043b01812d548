pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bazaar",
    about = "Bazaar support desk operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness, and run a support turn end to end.",
    after_help = "Examples:\n  bazaar migrate\n  bazaar config\n  bazaar doctor --json\n  bazaar ask --marketplace amazon --customer C-42 \"Where is my order ORD-99210?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model settings, intent rules, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Send one customer message through the support pipeline")]
    Ask {
        #[arg(long, help = "Marketplace the customer writes from")]
        marketplace: String,
        #[arg(long, help = "Customer identifier; omitted means an anonymous session")]
        customer: Option<String>,
        #[arg(long, help = "Customer locale, e.g. en or es-MX")]
        locale: Option<String>,
        #[arg(help = "Customer message text")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Ask { marketplace, customer, locale, text } => {
            commands::ask::run(commands::ask::AskArgs { marketplace, customer, locale, text })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
