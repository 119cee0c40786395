use clap::Parser;
use storage_queue_cli::{initialize_logging, run_cli, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(&cli.log_level, cli.json_logs) {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }

    if let Err(e) = run_cli(cli).await {
        error!(error = %e, "Command failed");
        std::process::exit(e.exit_code());
    }
}
