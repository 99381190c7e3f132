#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use shake_relay::access::DnsResolver;
use shake_relay::config::{load_config, Args};
use shake_relay::event::CatalogLookup;
use shake_relay::lifecycle;
use shake_relay::listener::Listener;
use shake_relay::metrics::start_metrics_server;
use shake_relay::zone::{ZoneRegistry, ZoneStore};
use shake_relay::{run_with_shutdown, RelayState};
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let lifecycle = lifecycle::select(&args, &config);
    let _guard = lifecycle.enter()?;
    info!(
        "shake-relay v{} starting {}",
        env!("CARGO_PKG_VERSION"),
        lifecycle.name()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: shake_relay::config::RelayConfig) -> Result<()> {
    let listener = Listener::bind(config.listen_addr()).await?;

    let zone_file = config.aftershock.zone_file.clone();
    let lifetime = chrono::Duration::hours(i64::try_from(config.aftershock.zone_lifetime_h)?);
    let state = RelayState::from_config(
        &config,
        Box::new(DnsResolver::from_system_conf()),
        Box::new(CatalogLookup::new(config.catalog.events_dir.clone())),
        || {
            let store = ZoneStore::open(zone_file, lifetime)?;
            info!("loaded {} aftershock zones", store.len());
            Ok(Box::new(store) as Box<dyn ZoneRegistry>)
        },
    )?;

    if config.metrics.enabled {
        let addr = config.metrics.addr;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(addr).await {
                warn!("metrics server error: {}", e);
            }
        });
    }

    info!(
        "forwarding to {}:{}, {} allowed hosts",
        config.queue.host,
        config.queue.port,
        config.host_allowlist().len()
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    run_with_shutdown(listener, state, shutdown_rx).await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("received shutdown signal");
}
