//! Trawl - Proxy Pool Resilience Layer
//!
//! A resilience layer for scrapers that route outbound requests through a
//! pool of rotating proxies backed by a relational store.
//!
//! # Features
//!
//! - Proxy rotation with pluggable selection strategies (least recently
//!   used, round robin) over an in-memory health view
//! - Per-proxy health accounting with degradation thresholds, time-bounded
//!   exclusion of just-failed proxies, and probabilistic recovery
//! - Circuit breaker around the database so a store outage degrades
//!   serving instead of taking it down
//! - Retry executor with per-attempt timeouts, exponential backoff, and a
//!   final direct-connection fallback
//! - Batched persistence of usage reports off the request path
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trawl::{Config, ProxyPool, ScrapeRequest};
//! # use trawl::{Fetcher, FetchResponse, ProxyRecord, Result};
//! # struct MyFetcher;
//! # #[async_trait::async_trait]
//! # impl Fetcher for MyFetcher {
//! #     async fn fetch(&self, _: &str, _: &str, _: Option<&ProxyRecord>) -> Result<FetchResponse> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # async fn run() -> trawl::Result<()> {
//! let config = Config::from_env()?;
//! let pool = ProxyPool::connect(config, Arc::new(MyFetcher)).await?;
//!
//! let outcome = pool.execute(&ScrapeRequest::get("https://example.com")).await?;
//! println!("{} via {:?} in {} attempts", outcome.status, outcome.via, outcome.attempts);
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod rotation;
pub mod service;
pub mod store;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{Config, SharedConfig};
pub use database::Database;
pub use error::{AttemptFailure, Result, TrawlError};
pub use executor::{FetchResponse, Fetcher, ScrapeOutcome, ScrapeRequest, Via};
pub use health::HealthTracker;
pub use models::{
    CreateProxyRequest, ImportReport, ProxyRecord, ProxyStatus, ServiceStats, UsageLogEntry,
};
pub use rotation::{ProxySelector, RotationStrategy};
pub use service::ProxyPool;
pub use store::{MemoryProxyStore, PgProxyStore, ProxyStore};
