use clap::Parser;
use retirement_lab::api::{Cli, run_cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_cli(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
