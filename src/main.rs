use std::env;

use tracing::{info, warn};

use webharvest::api;
use webharvest::core::config::HarvestConfig;
use webharvest::store::JobStore as _;
use webharvest::AppState;

fn parse_port_from_args() -> Option<u16> {
    let mut args = env::args().peekable();
    while let Some(arg) = args.next() {
        if arg == "--port" {
            if let Some(value) = args.next() {
                if let Ok(port) = value.parse::<u16>() {
                    return Some(port);
                }
            }
        } else if let Some(rest) = arg.strip_prefix("--port=") {
            if let Ok(port) = rest.parse::<u16>() {
                return Some(port);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for key in ["WEBHARVEST_PORT", "PORT"] {
        if let Ok(value) = env::var(key) {
            if let Ok(port) = value.trim().parse::<u16>() {
                return Some(port);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            env::var("LOG_LEVEL").map(|level| tracing_subscriber::EnvFilter::new(level))
        })
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("starting webharvest {}", env!("CARGO_PKG_VERSION"));

    let config = HarvestConfig::from_env();
    let state = AppState::build(config).await?;

    if state.browser_pool.is_none() {
        warn!("running with the static HTTP renderer; JavaScript-heavy pages will degrade");
    }

    // First-run convenience: mint a default API key when none exist.
    api::auth::bootstrap_default_key(&state.store, &state.config.api_key_salt).await?;

    // Periodic cache sweep. Lookups already treat expired rows as absent;
    // this just reclaims the space.
    {
        let store = state.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.purge_expired_cache().await {
                    Ok(0) => {}
                    Ok(purged) => info!("cache sweep purged {purged} expired entries"),
                    Err(e) => warn!("cache sweep failed: {e}"),
                }
            }
        });
    }

    let app = api::build_router(state.clone());

    let port = parse_port_from_args().or_else(port_from_env).unwrap_or(8000);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {bind_addr}. Stop the existing process or run with \
                 --port {} (or set PORT/WEBHARVEST_PORT).",
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("webharvest listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: std::sync::Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
    if let Some(pool) = state.browser_pool.as_ref() {
        pool.shutdown().await;
    }
}
