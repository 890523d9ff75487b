use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod keys;
mod server;
mod trust;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the credential broker HTTP server
    Server {},
    /// Evaluate an identity token against a configured role without
    /// starting the server
    #[command(visible_alias = "eval")]
    Evaluate {
        /// Role to evaluate against
        #[arg(long)]
        role: String,
        /// File containing the identity token, or '-' for stdin
        #[arg(long, default_value = "-")]
        token_file: String,
        /// Requested session duration in seconds (clamped to the role's maximum)
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Load and validate the configuration, then exit
    #[command(visible_alias = "check")]
    Validate {},
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let settings = server::settings::Settings::new()?;

    match cli.command {
        Commands::Server {} => server::run_server(settings).await,
        Commands::Evaluate {
            role,
            token_file,
            duration,
        } => cli::handle_evaluate(settings, &role, &token_file, duration).await,
        Commands::Validate {} => cli::handle_validate(settings),
    }
}
