use std::time::Duration;

use metrics::{counter, gauge};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use registrar_registry::SessionPool;

/// Background worker pinging idle registry sessions on the configured
/// keep-alive interval.
#[derive(Clone)]
pub struct KeepAliveWorker {
    pool: SessionPool,
    interval: Duration,
}

impl KeepAliveWorker {
    pub fn new(pool: SessionPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// Executes one keep-alive sweep.
    pub async fn run_once(&self) {
        let report = self.pool.ping_idle().await;
        counter!("registry_keepalive_total", "result" => "healthy").increment(report.healthy as u64);
        counter!("registry_keepalive_total", "result" => "refreshed")
            .increment(report.refreshed as u64);
        counter!("registry_keepalive_total", "result" => "failed").increment(report.failed as u64);

        let idle = self.pool.idle_len();
        gauge!("registry_pool_idle_sessions").set(idle as f64);
        info!(
            stage = "registry",
            healthy = report.healthy,
            refreshed = report.refreshed,
            failed = report.failed,
            idle,
            "keep-alive sweep completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;
    use url::Url;

    use registrar_registry::{PoolConfig, RegistryClient};

    use crate::telemetry;

    #[tokio::test]
    async fn run_once_pings_idle_sessions() {
        telemetry::init_metrics().expect("metrics");

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        let hello = server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions/current/hello");
                then.status(204);
            })
            .await;

        let client = RegistryClient::new(
            "registrar-test",
            "test-secret",
            Url::parse(&server.url("/registry/")).expect("url"),
            Client::builder().build().expect("client"),
        );
        let pool = SessionPool::new(
            client,
            PoolConfig {
                size: 1,
                keep_alive: Duration::from_secs(60),
                timeout: Duration::from_secs(1),
            },
        );
        pool.prewarm().await.expect("prewarm");

        let worker = KeepAliveWorker::new(pool.clone(), Duration::from_secs(60));
        worker.run_once().await;

        hello.assert_hits_async(1).await;
        assert_eq!(pool.idle_len(), 1);
    }
}
