use clap::Parser;
use loom::cli::{dispatch, Cli};

fn main() {
    let filter = std::env::var("LOOM_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    std::process::exit(dispatch(cli.command));
}
