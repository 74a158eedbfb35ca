use std::path::PathBuf;
use std::time::Duration;

use crate::args::{Args, SearchMode};
use crate::error::{MinerError, Result};
use crate::http_client::RateLimitPolicy;
use crate::models::QualificationRule;
use crate::noise::NoiseFilter;
use crate::pagination::PaginationMode;
use crate::query_builder::QueryBuilder;

/// Environment variables searched for a token, in order.
pub const TOKEN_ENV_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN", "GITHUB_PAT"];

/// Pick the explicit token if given, else the first non-blank variable.
pub fn resolve_token<F>(explicit: Option<&str>, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
        .ok_or_else(|| MinerError::MissingCredential(TOKEN_ENV_VARS.join(", ")))
}

/// Everything a run needs, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub output: PathBuf,
    pub mode: PaginationMode,
    pub per_page: u32,
    pub page_delay: Duration,
    pub max_qualified: Option<usize>,
    pub max_analyzed: Option<usize>,
    pub rule: QualificationRule,
    pub exclude_noise: bool,
    pub deep_readme_check: bool,
    pub extra_course_keywords: Vec<String>,
    pub extra_boilerplate_keywords: Vec<String>,
    pub query_exclude_keywords: Vec<String>,
    pub excluded_topics: Vec<String>,
    pub time_windows: u32,
    pub min_stars: u32,
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub proactive_throttle: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("qualified_repositories.csv"),
            mode: PaginationMode::Cursor,
            per_page: 50,
            page_delay: Duration::from_millis(500),
            max_qualified: None,
            max_analyzed: None,
            rule: QualificationRule::Strict,
            exclude_noise: true,
            deep_readme_check: false,
            extra_course_keywords: Vec::new(),
            extra_boilerplate_keywords: Vec::new(),
            query_exclude_keywords: Vec::new(),
            excluded_topics: Vec::new(),
            time_windows: 0,
            min_stars: 0,
            concurrency: 5,
            request_timeout: Duration::from_secs(30),
            proactive_throttle: true,
        }
    }
}

impl From<&Args> for MinerConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: PathBuf::from(&args.output),
            mode: match args.search_mode {
                SearchMode::Graphql => PaginationMode::Cursor,
                SearchMode::Rest => PaginationMode::Offset,
            },
            per_page: args.batch_size,
            page_delay: Duration::from_millis(args.page_delay_ms),
            max_qualified: args.max_qualified,
            max_analyzed: args.max_analyzed,
            rule: if args.require_frontend_tests {
                QualificationRule::Strict
            } else {
                QualificationRule::RunnerOnly
            },
            exclude_noise: args.exclude_noise,
            deep_readme_check: args.deep_readme_check,
            extra_course_keywords: args.extra_course_keywords.clone(),
            extra_boilerplate_keywords: args.extra_boilerplate_keywords.clone(),
            query_exclude_keywords: args.query_exclude_keywords.clone(),
            excluded_topics: args.exclude_topics.clone(),
            time_windows: args.time_windows,
            min_stars: args.min_stars,
            concurrency: args.concurrency.max(1),
            request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
            proactive_throttle: args.proactive_throttle,
        }
    }
}

impl MinerConfig {
    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::new()
            .with_time_windows(self.time_windows)
            .with_min_stars(self.min_stars)
            .with_excluded_topics(self.excluded_topics.clone())
            .with_excluded_keywords(self.query_exclude_keywords.clone())
    }

    pub fn noise_filter(&self) -> NoiseFilter {
        NoiseFilter::new(
            &self.extra_course_keywords,
            &self.extra_boilerplate_keywords,
            &self.excluded_topics,
        )
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            proactive_throttle: self.proactive_throttle,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_explicit_token_wins() {
        let token = resolve_token(Some(" abc "), |_| Some("env".to_string())).unwrap();
        assert_eq!(token, "abc");
    }

    #[test]
    fn test_token_env_fallback_order() {
        let token = resolve_token(None, |name| match name {
            "GITHUB_TOKEN" => Some("   ".to_string()),
            "GH_TOKEN" => Some("gh".to_string()),
            "GITHUB_PAT" => Some("pat".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(token, "gh");
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let err = resolve_token(Some(""), |_| None).unwrap_err();
        assert!(matches!(err, MinerError::MissingCredential(_)));
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_from_args() {
        let args = Args::try_parse_from([
            "github-repo-mining",
            "--search-mode",
            "rest",
            "--require-frontend-tests",
            "false",
            "--concurrency",
            "0",
        ])
        .unwrap();
        let config = MinerConfig::from(&args);
        assert_eq!(config.mode, PaginationMode::Offset);
        assert_eq!(config.rule, QualificationRule::RunnerOnly);
        assert_eq!(config.concurrency, 1);
    }
}
