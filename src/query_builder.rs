use chrono::{Datelike, Duration, NaiveDate};

/// Search phrasings, broadest recall first. The text search is not exhaustive
/// for any one phrasing, so several overlapping ones are combined.
const BASE_FRAGMENTS: &[&str] = &[
    "language:TypeScript topic:react",
    "language:TypeScript react in:name,description,topics",
    "language:TypeScript topic:react topic:jest",
    "language:TypeScript react jest in:readme",
];

/// Builds the ordered list of search query strings for a run.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    fragments: Vec<String>,
    time_windows: u32,
    min_stars: u32,
    excluded_topics: Vec<String>,
    excluded_keywords: Vec<String>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            fragments: BASE_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
            time_windows: 0,
            min_stars: 0,
            excluded_topics: Vec::new(),
            excluded_keywords: Vec::new(),
        }
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the base fragments.
    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments = fragments.into_iter().map(Into::into).collect();
        self
    }

    /// Partition each fragment over the `windows` most recent calendar quarters.
    pub fn with_time_windows(mut self, windows: u32) -> Self {
        self.time_windows = windows;
        self
    }

    pub fn with_min_stars(mut self, min_stars: u32) -> Self {
        self.min_stars = min_stars;
        self
    }

    pub fn with_excluded_topics(mut self, topics: Vec<String>) -> Self {
        self.excluded_topics = topics;
        self
    }

    pub fn with_excluded_keywords(mut self, keywords: Vec<String>) -> Self {
        self.excluded_keywords = keywords;
        self
    }

    /// All queries, window-major, deduplicated in order. `today` anchors the
    /// quarter windows.
    pub fn build(&self, today: NaiveDate) -> Vec<String> {
        let suffix = self.qualifiers();
        let windows = quarter_windows(today, self.time_windows);

        let mut queries: Vec<String> = Vec::new();
        let mut push = |query: String| {
            if !queries.contains(&query) {
                queries.push(query);
            }
        };

        if windows.is_empty() {
            for fragment in &self.fragments {
                push(format!("{} {}", fragment, suffix));
            }
        } else {
            for (start, end) in &windows {
                for fragment in &self.fragments {
                    push(format!(
                        "{} created:{}..{} {}",
                        fragment,
                        start.format("%Y-%m-%d"),
                        end.format("%Y-%m-%d"),
                        suffix
                    ));
                }
            }
        }

        queries
    }

    fn qualifiers(&self) -> String {
        let mut parts = vec!["fork:false".to_string(), "archived:false".to_string()];
        if self.min_stars > 0 {
            parts.push(format!("stars:>={}", self.min_stars));
        }
        for topic in &self.excluded_topics {
            parts.push(format!("-topic:{}", topic));
        }
        for keyword in &self.excluded_keywords {
            parts.push(format!("NOT {}", keyword));
        }
        parts.join(" ")
    }
}

/// The `count` most recent calendar quarters as inclusive date ranges, the
/// current (partial) quarter first, ending at `today`.
pub fn quarter_windows(today: NaiveDate, count: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::with_capacity(count as usize);
    let mut year = today.year();
    let mut quarter = today.month0() / 3;
    let mut end = today;

    for _ in 0..count {
        let Some(start) = NaiveDate::from_ymd_opt(year, quarter * 3 + 1, 1) else {
            break;
        };
        windows.push((start, end));

        end = start - Duration::days(1);
        if quarter == 0 {
            quarter = 3;
            year -= 1;
        } else {
            quarter -= 1;
        }
    }

    windows
}
