use metrics_exporter_prometheus::PrometheusBuilder;
use relay_auth::{CredentialStore, RefreshPolicy};
use relay_config::GatewayConfig;
use relay_gate::AppState;
use relay_ledger::FileLedger;
use relay_runtime::{AdapterRegistry, AuditLog, ExecutionPipeline};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EVICT_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cfg = GatewayConfig::from_env()?;
    for w in &cfg.warnings {
        warn!("{w}");
    }

    if let Some(addr) = &cfg.metrics_addr {
        let addr: SocketAddr = addr.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("metrics on {addr}");
    }

    let registry = Arc::new(AdapterRegistry::new());
    load_adapters(&registry, &cfg.adapters_dir);

    let policy = RefreshPolicy {
        timeout: cfg.refresh_timeout,
        ..RefreshPolicy::default()
    };
    let credentials = match &cfg.credentials_path {
        Some(path) => {
            let store = CredentialStore::load(path, policy)?;
            info!(adapters = store.len(), "credentials loaded from {}", path.display());
            store
        }
        None => {
            warn!("RELAY_CREDENTIALS not set; every adapter will fail authentication");
            CredentialStore::new()
        }
    };

    let ledger = FileLedger::open(&cfg.audit_path).await?;
    info!("audit ledger at {}", ledger.path().display());
    let audit = Arc::new(AuditLog::new(Arc::new(ledger), cfg.audit_timeout));

    let pipeline = Arc::new(ExecutionPipeline::from_config(
        &cfg,
        Arc::clone(&registry),
        Arc::new(credentials),
        audit,
    ));

    #[cfg(unix)]
    spawn_reload_on_sighup(Arc::clone(&registry), cfg.adapters_dir.clone())?;

    let limiter = Arc::clone(pipeline.limiter());
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(EVICT_INTERVAL);
        loop {
            tick.tick().await;
            let evicted = limiter.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "rate-limit windows evicted");
            }
        }
    });

    let state = AppState::new(pipeline);
    info!(request_timeout_ms = state.request_timeout.as_millis() as u64, "request timeout");
    let app = relay_gate::app(state);
    let listener = TcpListener::bind(&cfg.bind).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn load_adapters(registry: &AdapterRegistry, dir: &Path) {
    match registry.load_dir(dir) {
        Ok(n) => {
            metrics::gauge!("relay_registry_adapters").set(n as f64);
            info!(adapters = n, "loaded adapters from {}", dir.display());
        }
        Err(e) => error!("adapter load from {} failed: {e}", dir.display()),
    }
}

#[cfg(unix)]
fn spawn_reload_on_sighup(registry: Arc<AdapterRegistry>, dir: PathBuf) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP: reloading adapters");
            load_adapters(&registry, &dir);
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
