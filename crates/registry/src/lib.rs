pub mod client;
pub mod pool;

pub use client::{RegistryClient, RegistryDomain, RegistryError, RegistrySession};
pub use pool::{KeepAliveReport, PoolConfig, PoolError, PooledSession, SessionPool};
