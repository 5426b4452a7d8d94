use clap::Parser;
use fonbox_proxy::application::{Relay, RelayConfig};
use fonbox_proxy::config::Config;
use fonbox_proxy::infrastructure::protocols::sip::TokioTransport;
use fonbox_proxy::interface::cli::Cli;
use fonbox_proxy::interface::{logging, metrics};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.overrides())?;
    logging::init_logging(&config.log)?;

    info!(
        "Starting fonbox-proxy {} for Box {}",
        env!("CARGO_PKG_VERSION"),
        config.box_addr
    );

    if let Some(listen) = config.metrics.listen {
        info!("Initializing Prometheus metrics exporter on {}", listen);
        metrics::init_metrics(listen)?;
    }

    let transport = TokioTransport::bind(config.tcp_listen(), config.udp_listen()).await?;
    info!(
        "Listening on {}/tcp and {}/udp",
        transport.tcp_local_addr(),
        transport.udp_local_addr()
    );

    let mut relay = Relay::new(
        transport,
        RelayConfig {
            box_addr: config.box_addr,
            dump_fon: config.log.dump_fon,
            dump_box: config.log.dump_box,
        },
    );

    tokio::select! {
        result = relay.run() => {
            if let Err(e) = result {
                error!("Listener failed: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {}
    }

    info!("Exit");
    Ok(())
}

/// Wait for SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
