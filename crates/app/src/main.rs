mod admin;
mod auth;
mod domains;
mod keepalive;
mod listings;
mod problem;
mod profile;
mod reports;
mod requests;
mod router;
mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use registrar_registry::{PoolConfig, RegistryClient, SessionPool};
use registrar_storage::Database;
use registrar_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let base_url = Url::parse(&config.registry.base_url)?;
    let http = reqwest::Client::builder().build()?;
    let client = RegistryClient::new(
        config.registry.client_id.clone(),
        config.registry.client_secret.clone(),
        base_url,
        http,
    );
    let pool = SessionPool::new(
        client,
        PoolConfig {
            size: config.registry.pool_size,
            keep_alive: config.registry.keep_alive,
            timeout: config.registry.timeout,
        },
    );
    match pool.prewarm().await {
        Ok(opened) => info!(stage = "registry", opened, "registry session pool prewarmed"),
        Err(err) => warn!(
            stage = "registry",
            error = %err,
            "prewarm failed; sessions will be established on demand"
        ),
    }
    keepalive::KeepAliveWorker::new(pool.clone(), config.registry.keep_alive).spawn();

    if config.admin.is_empty() {
        warn!(stage = "app", "no admin allow-list entries are configured");
    }

    let secret: Arc<[u8]> = Arc::from(config.secret_key.clone().into_boxed_slice());
    let state = router::AppState::new(metrics, database, secret, config.admin.clone(), pool);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
