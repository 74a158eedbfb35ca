use std::collections::HashSet;
use std::fmt;

use indicatif::ProgressBar;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::concurrency::run_bounded;
use crate::config::MinerConfig;
use crate::detector::{RepoInspector, TechnologyDetector};
use crate::error::{MinerError, Result};
use crate::models::{
    OutputRow, QualificationDecision, RejectionReason, RepositoryCandidate, TechnologySignals,
};
use crate::noise::NoiseFilter;
use crate::pagination::{QueryPager, SearchSource};
use crate::shutdown::ShutdownToken;
use crate::sink::CsvSink;

/// Counters reported at the end of every run, including interrupted ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub queries: usize,
    pub pages: usize,
    pub analyzed: usize,
    pub qualified: usize,
    pub noise_skipped: usize,
    pub failed: usize,
    pub written: usize,
    pub cancelled: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queries run: {}, pages fetched: {}, analyzed: {}, qualified: {}, noise skipped: {}, failed: {}, rows written: {}{}",
            self.queries,
            self.pages,
            self.analyzed,
            self.qualified,
            self.noise_skipped,
            self.failed,
            self.written,
            if self.cancelled { " (interrupted)" } else { "" }
        )
    }
}

/// Drives queries through pagination, analysis and the sink.
pub struct RepoMiner<A> {
    api: A,
    config: MinerConfig,
    detector: TechnologyDetector,
    noise: NoiseFilter,
    shutdown: ShutdownToken,
    progress: ProgressBar,
}

impl<A> RepoMiner<A>
where
    A: SearchSource + RepoInspector,
{
    pub fn new(api: A, config: MinerConfig, shutdown: ShutdownToken) -> Self {
        let noise = config.noise_filter();
        Self {
            api,
            config,
            detector: TechnologyDetector::default(),
            noise,
            shutdown,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on `progress` instead of a hidden bar.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Run every query in order until they are exhausted, a cap is hit or a
    /// stop is requested. Only sink failures abort the run; `summary` is
    /// up to date either way.
    pub async fn run(
        &self,
        queries: &[String],
        sink: &mut CsvSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut seen = HashSet::new();

        for query in queries {
            if self.should_stop(summary) {
                break;
            }
            summary.queries += 1;
            info!("Running query {}/{}: {}", summary.queries, queries.len(), query);

            let mut pager = QueryPager::new(query.as_str(), self.config.mode, self.config.per_page);
            let outcome = self.drain(&mut pager, &mut seen, sink, summary).await;
            summary.pages += pager.pages_fetched() as usize;
            outcome?;
        }

        summary.cancelled = self.shutdown.is_requested();
        if summary.cancelled {
            warn!("Run interrupted");
        } else if self.cap_reached(summary) {
            info!("Configured limit reached, stopping");
        }
        self.progress.finish_with_message(format!("Done: {} qualified", summary.qualified));
        Ok(())
    }

    async fn drain(
        &self,
        pager: &mut QueryPager,
        seen: &mut HashSet<String>,
        sink: &mut CsvSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        while let Some(items) = pager.next_page(&self.api, &self.shutdown).await {
            // Drop repositories already returned by an earlier page or query
            let fresh: Vec<RepositoryCandidate> =
                items.into_iter().filter(|c| seen.insert(c.key())).collect();

            // Never dispatch past the analysis cap
            let batch = match self.config.max_analyzed {
                Some(max) => fresh
                    .into_iter()
                    .take(max.saturating_sub(summary.analyzed + summary.failed))
                    .collect(),
                None => fresh,
            };

            self.progress.set_message(format!(
                "{} | page {} | analyzing {} | qualified {}",
                pager.query(),
                pager.pages_fetched(),
                batch.len(),
                summary.qualified
            ));

            // Analyze the page with bounded concurrency, then record in page order
            let results = run_bounded(
                batch.iter().map(|candidate| self.analyze(candidate)),
                self.config.concurrency,
            )
            .await;

            for (candidate, result) in batch.iter().zip(results) {
                if self.qualified_cap_reached(summary) {
                    break;
                }
                self.record(candidate, result, sink, summary).await?;
            }

            if self.should_stop(summary) || pager.is_exhausted() {
                break;
            }

            // Pause between pages unless a stop arrives first
            if !self.config.page_delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.config.page_delay) => {}
                    _ = self.shutdown.requested() => {}
                }
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        candidate: &RepositoryCandidate,
        result: Result<(QualificationDecision, TechnologySignals)>,
        sink: &mut CsvSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let (decision, signals) = match result {
            Ok(analysis) => analysis,
            Err(MinerError::Cancelled) => {
                debug!("Skipped {} after stop request", candidate.full_name());
                return Ok(());
            }
            Err(e) => {
                summary.failed += 1;
                warn!("Failed to analyze {}: {}", candidate.full_name(), e);
                return Ok(());
            }
        };
        summary.analyzed += 1;

        match decision {
            QualificationDecision::Qualified => {
                summary.qualified += 1;
                let row = OutputRow::from_signals(candidate, &signals);
                if sink.append_if_new(&candidate.key(), &row).await? {
                    summary.written += 1;
                    info!(
                        "Qualified {} ({} stars, {})",
                        candidate.full_name(),
                        candidate.stars,
                        signals.evidence.join(", ")
                    );
                }
            }
            QualificationDecision::Rejected(RejectionReason::Noise(keyword)) => {
                summary.noise_skipped += 1;
                debug!("Skipping {}: noise keyword '{}'", candidate.full_name(), keyword);
            }
            QualificationDecision::Rejected(reason) => {
                debug!("Rejected {}: {}", candidate.full_name(), reason);
            }
        }
        self.progress.tick();
        Ok(())
    }

    /// Noise check first, then detection and the qualification rule.
    async fn analyze(
        &self,
        candidate: &RepositoryCandidate,
    ) -> Result<(QualificationDecision, TechnologySignals)> {
        if self.shutdown.is_requested() {
            return Err(MinerError::Cancelled);
        }

        if let Some(keyword) = self.noise_keyword(candidate).await? {
            let decision = QualificationDecision::Rejected(RejectionReason::Noise(keyword));
            return Ok((decision, TechnologySignals::default()));
        }

        let signals = self.detector.detect(&self.api, candidate).await;
        let decision = QualificationDecision::evaluate(&signals, self.config.rule);

        // Probes cut short by a stop leave signals unknown, so only a
        // positive verdict can be trusted once a stop was requested.
        if !decision.is_qualified() && self.shutdown.is_requested() {
            return Err(MinerError::Cancelled);
        }
        Ok((decision, signals))
    }

    async fn noise_keyword(&self, candidate: &RepositoryCandidate) -> Result<Option<String>> {
        if !self.config.exclude_noise {
            return Ok(None);
        }
        let hit = self.noise.classify(
            &candidate.name,
            candidate.description.as_deref(),
            &candidate.topics,
        );
        if let Some(hit) = hit {
            return Ok(Some(hit.keyword));
        }
        if !self.config.deep_readme_check {
            return Ok(None);
        }
        let readme = self.api.readme(&candidate.owner, &candidate.name).await?;
        Ok(readme
            .and_then(|text| self.noise.classify_readme(&text))
            .map(|hit| hit.keyword))
    }

    fn qualified_cap_reached(&self, summary: &RunSummary) -> bool {
        self.config
            .max_qualified
            .is_some_and(|max| summary.qualified >= max)
    }

    fn cap_reached(&self, summary: &RunSummary) -> bool {
        self.qualified_cap_reached(summary)
            || self
                .config
                .max_analyzed
                .is_some_and(|max| summary.analyzed + summary.failed >= max)
    }

    fn should_stop(&self, summary: &RunSummary) -> bool {
        self.shutdown.is_requested() || self.cap_reached(summary)
    }
}
