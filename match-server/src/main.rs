use clap::Parser;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server for networked two-player tic-tac-toe matches.
#[derive(Parser, Debug)]
#[command(name = "match-server")]
struct Args {
    /// The TCP port to listen on.
    #[arg(short = 'p', value_name = "port", value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

#[tokio::main]
/// Parses the port option, activates tracing, installs the hang-up signal
/// as the shutdown trigger, and serves until every session has drained.
/// Broken pipes never reach us as a signal; a write to a dead peer simply
/// fails and is handled where it happens.
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let args = Args::parse();

    let listener = match TcpListener::bind(("0.0.0.0", args.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(port = args.port, %err, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(port = args.port, "listening");

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            tracing::error!(%err, "failed to install the hang-up handler");
            return ExitCode::FAILURE;
        }
    };
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            hangup.recv().await;
            tracing::info!("hang-up received, shutting down");
            shutdown.cancel();
        });
    }

    if let Err(err) = match_server::serve(listener, shutdown).await {
        tracing::error!(%err, "server failed");
        return ExitCode::FAILURE;
    }
    tracing::info!("all sessions drained, terminating");
    ExitCode::SUCCESS
}
