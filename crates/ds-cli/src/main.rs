//! dshadow: observe and mutate device shadows over RPC or MQTT.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ds_cli::cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.options.log_json);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "dshadow starting");

    // Cancelling drops the session, which releases its connection.
    tokio::select! {
        result = ds_cli::run(args) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
