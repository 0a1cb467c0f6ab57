use clap::Parser;

use respd::config::{Cli, Config};

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err.0, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = respd::server::bootstrap::run(config) {
        tracing::error!(error = ?err, "server exited with an error");
        std::process::exit(1);
    }
}
