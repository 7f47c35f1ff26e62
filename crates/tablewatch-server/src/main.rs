//! tablewatch - fan a table change feed out to logging sessions.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tablewatch_server::{run, Args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablewatch_server=info,tablewatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tablewatch");

    let args = Args::parse();
    let config = args.into_config();
    let print_snapshot = config.print_snapshot;

    tracing::info!(
        input = %config.input_name(),
        sessions = config.sessions,
        max_delivery_attempts = config.hub.max_delivery_attempts,
        delivery_timeout_ms = config.hub.delivery_timeout.as_millis() as u64,
        "configuration loaded"
    );

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    let summary = match run(config, shutdown_rx).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "tablewatch failed");
            return Err(e.into());
        }
    };
    drop(shutdown_tx);

    tracing::info!(
        received = summary.pump.received,
        changed = summary.pump.changed,
        rejected = summary.pump.rejected,
        rows = summary.snapshot.len(),
        notifications = summary.stats.notifications_dispatched,
        stop = ?summary.pump.stop,
        "tablewatch finished"
    );

    if print_snapshot {
        println!("{}", serde_json::to_string_pretty(&summary.snapshot)?);
    }

    Ok(())
}
