use clap::Parser;
use connstorm::config::Cli;
use connstorm::mysql::MySqlManager;
use connstorm::Storm;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let settings = match Cli::parse().into_settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    settings.logging.init();
    info!(target_db = %settings.connect, "connstorm starting");

    let manager = match MySqlManager::new(&settings.connect) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Invalid connection options");
            std::process::exit(1);
        }
    };

    let storm = Storm::new(manager, settings.storm);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run = tokio::spawn({
        let storm = storm.clone();
        async move { storm.run(shutdown_rx).await }
    });

    let result = tokio::select! {
        result = &mut run => result,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received (Ctrl+C)");
            let _ = shutdown_tx.send(true);
            run.await
        }
    };

    match result {
        Ok(Ok(summary)) => {
            info!(closed = summary.closed, state = %summary.state, "connstorm stopped");
        }
        Ok(Err(e)) => {
            error!(error = %e, "Fatal error");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "run task failed");
            std::process::exit(1);
        }
    }
}
