pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "propdraft",
    about = "Propdraft operator CLI",
    long_about = "Operate the proposal extraction pipeline from a shell: migrations, \
config inspection, readiness checks, one-off extractions and provider token maintenance.",
    after_help = "Examples:\n  propdraft doctor --json\n  \
propdraft extract proposta.pdf --actor U-7 --product-group mobiliario\n  propdraft token status"
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
    #[command(about = "Validate config, provider credentials, DB connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Extract a PDF proposal and write a draft")]
    Extract {
        #[arg(help = "Path to the PDF document")]
        file: PathBuf,
        #[arg(long, help = "Id of the user the draft is attributed to")]
        actor: String,
        #[arg(long = "product-group", help = "Product group of the draft")]
        product_group: String,
        #[arg(long, help = "Preferred provider: auto, document_intelligence or generic_ocr")]
        method: Option<String>,
    },
    #[command(about = "Inspect or maintain the provider token cache")]
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Debug, Subcommand)]
enum TokenAction {
    #[command(about = "Show per-provider cache statistics")]
    Status,
    #[command(about = "Discard cached tokens and authenticate again")]
    Refresh,
    #[command(about = "Purge inactive or expired rows older than the retention window")]
    Cleanup,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("PROPDRAFT_CLI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries the JSON outcome, so diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Extract { file, actor, product_group, method } => {
            commands::extract::run(&file, &actor, &product_group, method.as_deref())
        }
        Command::Token { action } => match action {
            TokenAction::Status => commands::token::status(),
            TokenAction::Refresh => commands::token::refresh(),
            TokenAction::Cleanup => commands::token::cleanup(),
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
