use mtlsproxy_config::{ConfigSource, Settings};
use mtlsproxy_proxy::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;

    let level = if settings.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let source = ConfigSource::new(settings.config_dir);
    let mut profiles = source.snapshot()?;
    if profiles.is_empty() {
        return Err("no profiles configured".into());
    }
    for profile in &mut profiles {
        profile.resolve()?;
    }

    let mut supervisor = Supervisor::new();
    supervisor.apply(profiles).await;

    // Graceful exit on SIGTERM/SIGINT
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    // SIGHUP triggers one reload cycle (Unix only)
    #[cfg(unix)]
    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(sig) => Some(sig),
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler, reload disabled");
            None
        }
    };
    #[cfg(not(unix))]
    let mut sighup = ();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = recv_hangup(&mut sighup) => {
                info!("SIGHUP received, reloading profiles");
                supervisor.reload(&source).await;
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn recv_hangup(sighup: &mut Option<tokio::signal::unix::Signal>) {
    match sighup {
        Some(sig) => {
            sig.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn recv_hangup(_sighup: &mut ()) {
    std::future::pending::<()>().await
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            // Fall back to waiting forever
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                // Fall back to waiting forever
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
