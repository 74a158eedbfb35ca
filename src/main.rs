use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use github_repo_mining_lib::{
    resolve_token, Args, CsvSink, GitHubApi, MinerConfig, RateLimitedClient, RepoMiner,
    ReqwestTransport, RunSummary, ShutdownToken, SystemClock, USER_AGENT,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the tracing logger
    tracing_subscriber::fmt::init();

    dotenv().ok();

    let args = Args::parse();
    let config = MinerConfig::from(&args);

    // Fail before any network call when no token is available.
    let token = match resolve_token(args.token.as_deref(), |name| std::env::var(name).ok()) {
        Ok(token) => token,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = ShutdownToken::new();
    shutdown.install_signal_handlers();

    let transport = match ReqwestTransport::new(USER_AGENT, config.request_timeout) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let client = RateLimitedClient::new(
        Arc::new(transport),
        Arc::new(SystemClock),
        config.rate_limit_policy(),
        config.request_timeout,
        shutdown.clone(),
    );
    let api = GitHubApi::new(client, token);

    let queries = config.query_builder().build(Utc::now().date_naive());
    info!("Prepared {} search queries", queries.len());

    let mut sink = match CsvSink::open(&config.output).await {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to open {}: {}", config.output.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {wide_msg}")
    {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb.enable_steady_tick(Duration::from_millis(80));

    let output = config.output.clone();
    let miner = RepoMiner::new(api, config, shutdown).with_progress(pb);
    let mut summary = RunSummary::default();
    let result = miner.run(&queries, &mut sink, &mut summary).await;

    println!("{}", summary);
    match result {
        Ok(()) => {
            info!("Finished writing results to '{}'", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
