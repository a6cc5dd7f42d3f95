use anyhow::{Context, Result};
use clap::Parser;
use docrag::{api, config, evaluations, logging};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "docrag",
    about = "Document upload, vector-store collections and evaluation scoring over HTTP"
)]
struct Cli {
    /// Port to bind; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "Server terminated");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let state = api::AppState::from_config(config)?;
    if let Some(path) = &config.evaluation_seed_file {
        let runs = evaluations::load_seed_file(path)?;
        let seeded = state
            .evaluations
            .seed(runs)
            .await
            .with_context(|| format!("invalid evaluation in seed file {}", path.display()))?;
        tracing::info!(seeded, path = %path.display(), "Seeded evaluation runs");
    }
    let app = api::create_router(state);

    let (listener, port) = bind_listener(cli.port.or(config.server_port))
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
