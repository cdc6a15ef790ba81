use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};

use place_server::handlers;
use place_server::{spawn_background_tasks, Cli, Config, ServerState};

#[tokio::main]
async fn main() {
    // Default to info-level logs when RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli);
    info!(
        width = config.width,
        height = config.height,
        save_location = %config.save_location.display(),
        "starting place server"
    );

    // Without durable state we must refuse to serve.
    let state = ServerState::init(config)
        .await
        .context("canvas snapshot init failed")?;

    spawn_background_tasks(&state);

    // INT/TERM: save the canvas, then exit cleanly.
    let signal_state = state.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("termination signal received, saving canvas");
        if let Err(err) = signal_state.snapshots.save(&signal_state.canvas).await {
            error!(%err, "final canvas save failed");
        }
        std::process::exit(0);
    });

    let addr = state.config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    handlers::serve(listener, state).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
