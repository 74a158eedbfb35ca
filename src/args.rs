use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};

/// Which search API drives pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    /// GraphQL search with cursors.
    Graphql,
    /// REST search with numbered pages.
    Rest,
}

/// Mine GitHub for TypeScript + React repositories with real Jest test suites
/// and append the qualifying ones to a CSV file.
///
/// Every option can also be set through the environment variable shown in its
/// help; a `.env` file in the working directory is loaded first.
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    long_about = "Searches GitHub for TypeScript + React repositories, checks each for Jest and frontend test libraries, skips tutorials and templates, and appends qualifying repositories to a CSV file."
)]
pub struct Args {
    /// CSV file qualifying repositories are appended to.
    #[clap(short, long, env = "OUTPUT_FILE", default_value = "qualified_repositories.csv")]
    pub output: String,

    /// Search API used for pagination.
    #[clap(long, env = "SEARCH_MODE", value_enum, default_value = "graphql")]
    pub search_mode: SearchMode,

    /// Results requested per page (1-100).
    #[clap(short = 'b', long, env = "BATCH_SIZE", default_value = "50")]
    pub batch_size: u32,

    /// Delay between result pages, in milliseconds.
    #[clap(long, env = "PAGE_DELAY_MS", default_value = "500")]
    pub page_delay_ms: u64,

    /// Stop after this many repositories qualified.
    #[clap(long, env = "MAX_QUALIFIED", value_name = "NUM")]
    pub max_qualified: Option<usize>,

    /// Stop after this many repositories were analyzed.
    #[clap(long, env = "MAX_ANALYZED", value_name = "NUM")]
    pub max_analyzed: Option<usize>,

    /// Require a frontend test library (Testing Library, Enzyme, ...) on top of Jest.
    #[clap(long, env = "REQUIRE_FRONTEND_TESTS", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub require_frontend_tests: bool,

    /// Skip tutorial, course and template repositories.
    #[clap(long, env = "EXCLUDE_NOISE", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub exclude_noise: bool,

    /// Also check the start of each README for noise keywords.
    #[clap(long, env = "DEEP_README_CHECK", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub deep_readme_check: bool,

    /// Extra course/tutorial keywords, comma separated.
    #[clap(long, env = "EXTRA_COURSE_KEYWORDS", value_delimiter = ',')]
    pub extra_course_keywords: Vec<String>,

    /// Extra boilerplate/template keywords, comma separated.
    #[clap(long, env = "EXTRA_BOILERPLATE_KEYWORDS", value_delimiter = ',')]
    pub extra_boilerplate_keywords: Vec<String>,

    /// Keywords excluded in the search query itself (`NOT word`), comma separated.
    #[clap(long, env = "QUERY_EXCLUDE_KEYWORDS", value_delimiter = ',')]
    pub query_exclude_keywords: Vec<String>,

    /// Topics that disqualify a repository, comma separated.
    #[clap(long, env = "EXCLUDE_TOPICS", value_delimiter = ',')]
    pub exclude_topics: Vec<String>,

    /// Split each query over this many recent calendar quarters (0 = off).
    #[clap(long, env = "TIME_WINDOWS", default_value = "0")]
    pub time_windows: u32,

    /// Only search repositories with at least this many stars (0 = any).
    #[clap(long, env = "MIN_STARS", default_value = "0")]
    pub min_stars: u32,

    /// Maximum number of repositories analyzed concurrently.
    #[clap(short = 'c', long, env = "CONCURRENCY", default_value = "5")]
    pub concurrency: usize,

    /// Per-request timeout in seconds.
    #[clap(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Spread requests out when the remaining quota runs low.
    #[clap(long, env = "PROACTIVE_THROTTLE", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub proactive_throttle: bool,

    /// GitHub API token. Falls back to GITHUB_TOKEN, GH_TOKEN or GITHUB_PAT.
    #[clap(short, long)]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["github-repo-mining"]).unwrap();
        assert_eq!(args.search_mode, SearchMode::Graphql);
        assert_eq!(args.batch_size, 50);
        assert!(args.require_frontend_tests);
        assert!(args.exclude_noise);
        assert!(!args.deep_readme_check);
        assert!(args.extra_course_keywords.is_empty());
    }

    #[test]
    fn test_lists_and_bools() {
        let args = Args::try_parse_from([
            "github-repo-mining",
            "--search-mode",
            "rest",
            "--require-frontend-tests",
            "no",
            "--exclude-topics",
            "tutorial,portfolio",
            "--max-qualified",
            "25",
        ])
        .unwrap();
        assert_eq!(args.search_mode, SearchMode::Rest);
        assert!(!args.require_frontend_tests);
        assert_eq!(args.exclude_topics, vec!["tutorial", "portfolio"]);
        assert_eq!(args.max_qualified, Some(25));
    }
}
