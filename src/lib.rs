//! # GitHub Repository Mining
//!
//! Searches GitHub for TypeScript + React repositories that carry a real Jest
//! test suite, filters out tutorials and templates, and appends the ones that
//! qualify to a CSV file.
//!
//! ## Main Components
//!
//! - [`RepoMiner`]: runs queries through pagination, detection and the sink
//! - [`RateLimitedClient`]: HTTP client that waits out GitHub's rate limits
//! - [`TechnologyDetector`]: layered language/framework/test-tooling probes
//! - [`Args`]: command line and environment configuration
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use clap::Parser;
//! use github_repo_mining_lib::{
//!     Args, CsvSink, GitHubApi, MinerConfig, RateLimitedClient, ReqwestTransport, RepoMiner,
//!     RunSummary, ShutdownToken, SystemClock, USER_AGENT,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let args = Args::parse();
//!     let config = MinerConfig::from(&args);
//!     let shutdown = ShutdownToken::new();
//!
//!     let transport = ReqwestTransport::new(USER_AGENT, Duration::from_secs(30))?;
//!     let client = RateLimitedClient::new(
//!         Arc::new(transport),
//!         Arc::new(SystemClock),
//!         config.rate_limit_policy(),
//!         config.request_timeout,
//!         shutdown.clone(),
//!     );
//!     let api = GitHubApi::new(client, "ghp_example");
//!
//!     let queries = config.query_builder().build(chrono::Utc::now().date_naive());
//!     let mut sink = CsvSink::open(&config.output).await?;
//!     let mut summary = RunSummary::default();
//!     RepoMiner::new(api, config, shutdown)
//!         .run(&queries, &mut sink, &mut summary)
//!         .await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

mod args;
pub mod concurrency;
pub mod config;
pub mod detector;
pub mod error;
pub mod github_api;
pub mod http_client;
pub mod manifest;
mod miner;
pub mod models;
pub mod noise;
pub mod pagination;
pub mod query_builder;
pub mod shutdown;
pub mod sink;

// Re-export main components for documentation and external use
pub use crate::args::{Args, SearchMode};
pub use crate::config::{resolve_token, MinerConfig};
pub use crate::detector::{RepoInspector, TechnologyDetector, TechnologyProfile};
pub use crate::error::{MinerError, Result};
pub use crate::github_api::{GitHubApi, USER_AGENT};
pub use crate::http_client::{RateLimitPolicy, RateLimitedClient, ReqwestTransport, SystemClock};
pub use crate::miner::{RepoMiner, RunSummary};
pub use crate::models::{QualificationDecision, QualificationRule, RepositoryCandidate};
pub use crate::pagination::{PaginationMode, SearchSource};
pub use crate::shutdown::ShutdownToken;
pub use crate::sink::CsvSink;
