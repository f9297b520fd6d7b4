use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::warn;

use crate::client::{RegistryClient, RegistryError, RegistrySession};

/// The three knobs that describe the session pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of gateway sessions held open.
    pub size: usize,
    /// Interval between keep-alive pings on idle sessions.
    pub keep_alive: Duration,
    /// Bound on waiting for a free session and on replacement logins.
    pub timeout: Duration,
}

/// Fixed-size pool of authenticated gateway sessions.
///
/// Capacity is enforced with a semaphore sized to the pool; sessions are
/// established lazily and returned to the idle list when the caller is
/// done. There is no retry policy and no circuit breaking: a failed
/// operation surfaces its error to the caller once, and a failed session
/// is simply discarded.
#[derive(Clone)]
pub struct SessionPool {
    client: RegistryClient,
    idle: Arc<Mutex<Vec<RegistrySession>>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
}

impl SessionPool {
    /// Creates an empty pool over the provided client.
    pub fn new(client: RegistryClient, config: PoolConfig) -> Self {
        Self {
            client,
            idle: Arc::new(Mutex::new(Vec::with_capacity(config.size))),
            permits: Arc::new(Semaphore::new(config.size)),
            config,
        }
    }

    /// Exposes the underlying client.
    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Configured pool size.
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Number of idle sessions currently held.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().expect("idle sessions poisoned").len()
    }

    /// Checks out a session, waiting at most the configured timeout for
    /// capacity. A fresh login is performed when no idle session is
    /// available, bounded by the same timeout.
    pub async fn acquire(&self) -> Result<PooledSession, PoolError> {
        let permit = timeout(self.config.timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Exhausted)?
            .map_err(|_| PoolError::Closed)?;

        let existing = self.idle.lock().expect("idle sessions poisoned").pop();
        let session = match existing {
            Some(session) => session,
            None => timeout(self.config.timeout, self.client.login())
                .await
                .map_err(|_| PoolError::ConnectTimeout)?
                .map_err(PoolError::Registry)?,
        };

        Ok(PooledSession {
            session: Some(session),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    /// Opens sessions until the pool is full. Called once at startup so
    /// the first requests do not pay the login latency.
    pub async fn prewarm(&self) -> Result<usize, PoolError> {
        let mut opened = 0;
        while self.idle_len() < self.config.size {
            let session = timeout(self.config.timeout, self.client.login())
                .await
                .map_err(|_| PoolError::ConnectTimeout)?
                .map_err(PoolError::Registry)?;
            self.release(session);
            opened += 1;
        }
        Ok(opened)
    }

    /// Pings every idle session once. Sessions that fail the greeting
    /// are dropped and replaced with a fresh login; when the replacement
    /// login also fails the slot recovers lazily on the next acquire.
    pub async fn ping_idle(&self) -> KeepAliveReport {
        let sessions: Vec<RegistrySession> = {
            let mut idle = self.idle.lock().expect("idle sessions poisoned");
            idle.drain(..).collect()
        };

        let mut report = KeepAliveReport::default();
        for session in sessions {
            match self.client.hello(&session).await {
                Ok(()) => {
                    report.healthy += 1;
                    self.release(session);
                }
                Err(err) => {
                    warn!(stage = "registry", error = %err, "keep-alive ping failed, replacing session");
                    match timeout(self.config.timeout, self.client.login()).await {
                        Ok(Ok(replacement)) => {
                            report.refreshed += 1;
                            self.release(replacement);
                        }
                        Ok(Err(err)) => {
                            warn!(stage = "registry", error = %err, "replacement login failed");
                            report.failed += 1;
                        }
                        Err(_) => {
                            warn!(stage = "registry", "replacement login timed out");
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        report
    }

    fn release(&self, session: RegistrySession) {
        self.idle
            .lock()
            .expect("idle sessions poisoned")
            .push(session);
    }
}

/// Outcome of one keep-alive sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveReport {
    pub healthy: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// A session checked out of the pool. Dropping it returns the session;
/// [`PooledSession::discard`] throws it away after a failed operation.
#[derive(Debug)]
pub struct PooledSession {
    session: Option<RegistrySession>,
    idle: Arc<Mutex<Vec<RegistrySession>>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// The gateway session to run operations under.
    pub fn session(&self) -> &RegistrySession {
        self.session
            .as_ref()
            .expect("session is present until discarded")
    }

    /// Drops the session instead of returning it to the pool. The next
    /// acquire on the freed slot performs a fresh login.
    pub fn discard(mut self) {
        self.session = None;
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.idle
                .lock()
                .expect("idle sessions poisoned")
                .push(session);
        }
    }
}

/// Errors raised while checking sessions out of the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no session became available within the pool timeout")]
    Exhausted,
    #[error("gateway login did not complete within the pool timeout")]
    ConnectTimeout,
    #[error("session pool is closed")]
    Closed,
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;
    use url::Url;

    fn pool_for(server: &MockServer, size: usize, timeout: Duration) -> SessionPool {
        let base = Url::parse(&server.url("/registry/")).expect("url");
        let client = RegistryClient::new(
            "registrar-test",
            "test-secret",
            base,
            Client::builder().build().expect("client"),
        );
        SessionPool::new(
            client,
            PoolConfig {
                size,
                keep_alive: Duration::from_secs(60),
                timeout,
            },
        )
    }

    #[tokio::test]
    async fn acquire_logs_in_lazily_and_reuses_returned_sessions() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        let pool = pool_for(&server, 2, Duration::from_secs(1));

        let leased = pool.acquire().await.expect("acquire");
        assert_eq!(pool.idle_len(), 0);
        drop(leased);
        assert_eq!(pool.idle_len(), 1);

        let _again = pool.acquire().await.expect("acquire reuses idle");
        login.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_instead_of_waiting_forever() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        let pool = pool_for(&server, 1, Duration::from_millis(100));

        let held = pool.acquire().await.expect("first acquire");
        let err = pool.acquire().await.expect_err("second should time out");
        assert!(matches!(err, PoolError::Exhausted));
        drop(held);
    }

    #[tokio::test]
    async fn discarded_sessions_force_a_fresh_login() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        let pool = pool_for(&server, 1, Duration::from_secs(1));

        let leased = pool.acquire().await.expect("acquire");
        leased.discard();
        assert_eq!(pool.idle_len(), 0);

        let _fresh = pool.acquire().await.expect("acquire after discard");
        login.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn prewarm_fills_the_pool() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        let pool = pool_for(&server, 3, Duration::from_secs(1));

        let opened = pool.prewarm().await.expect("prewarm");
        assert_eq!(opened, 3);
        assert_eq!(pool.idle_len(), 3);
        login.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn keep_alive_replaces_sessions_that_fail_the_ping() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        let hello = server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions/current/hello");
                then.status(401).body("session expired");
            })
            .await;
        let pool = pool_for(&server, 1, Duration::from_secs(1));
        pool.prewarm().await.expect("prewarm");

        let report = pool.ping_idle().await;
        assert_eq!(
            report,
            KeepAliveReport {
                healthy: 0,
                refreshed: 1,
                failed: 0,
            }
        );
        assert_eq!(pool.idle_len(), 1);
        hello.assert_hits_async(1).await;
        login.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn keep_alive_counts_healthy_sessions() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions");
                then.status(200).json_body(json!({ "session": "sess-1" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/registry/sessions/current/hello");
                then.status(204);
            })
            .await;
        let pool = pool_for(&server, 2, Duration::from_secs(1));
        pool.prewarm().await.expect("prewarm");

        let report = pool.ping_idle().await;
        assert_eq!(report.healthy, 2);
        assert_eq!(report.refreshed, 0);
        assert_eq!(pool.idle_len(), 2);
    }
}
