use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::models::RepositoryCandidate;
use crate::shutdown::ShutdownToken;

/// The search API never serves matches beyond this many, whatever the total.
pub const SEARCH_RESULT_CAP: u64 = 1000;

/// Largest page size either search endpoint accepts.
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    /// GraphQL search, threading `endCursor` forward.
    Cursor,
    /// REST search, numbered pages.
    Offset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Cursor { first: u32, after: Option<String> },
    Offset { page: u32, per_page: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<RepositoryCandidate>,
    pub total_count: Option<u64>,
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
}

/// A paginated repository search service.
#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn search_page(&self, query: &str, request: &PageRequest) -> Result<SearchPage>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PagerState {
    Start,
    Cursor(String),
    Offset { next_page: u32, max_page: Option<u32> },
    Exhausted,
}

/// Walks the result pages of one query.
#[derive(Debug)]
pub struct QueryPager {
    query: String,
    mode: PaginationMode,
    per_page: u32,
    state: PagerState,
    pages_fetched: u32,
}

impl QueryPager {
    pub fn new(query: impl Into<String>, mode: PaginationMode, per_page: u32) -> Self {
        Self {
            query: query.into(),
            mode,
            per_page: per_page.clamp(1, MAX_PER_PAGE),
            state: PagerState::Start,
            pages_fetched: 0,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == PagerState::Exhausted
    }

    /// Last page number the REST search will actually serve.
    pub fn max_reachable_page(total_count: u64, per_page: u32) -> u32 {
        let reachable = total_count.min(SEARCH_RESULT_CAP);
        reachable.div_ceil(per_page.max(1) as u64) as u32
    }

    /// Fetch the next page. `None` means this query is done: exhausted,
    /// cancelled, or abandoned after a page error (which is logged).
    pub async fn next_page<S>(
        &mut self,
        source: &S,
        shutdown: &ShutdownToken,
    ) -> Option<Vec<RepositoryCandidate>>
    where
        S: SearchSource + ?Sized,
    {
        if shutdown.is_requested() {
            self.state = PagerState::Exhausted;
            return None;
        }

        let request = match &self.state {
            PagerState::Exhausted => return None,
            PagerState::Start => match self.mode {
                PaginationMode::Cursor => PageRequest::Cursor {
                    first: self.per_page,
                    after: None,
                },
                PaginationMode::Offset => PageRequest::Offset {
                    page: 1,
                    per_page: self.per_page,
                },
            },
            PagerState::Cursor(cursor) => PageRequest::Cursor {
                first: self.per_page,
                after: Some(cursor.clone()),
            },
            PagerState::Offset {
                next_page,
                max_page,
            } => {
                if max_page.is_some_and(|max| *next_page > max) {
                    self.state = PagerState::Exhausted;
                    return None;
                }
                PageRequest::Offset {
                    page: *next_page,
                    per_page: self.per_page,
                }
            }
        };

        let page = match source.search_page(&self.query, &request).await {
            Ok(page) => page,
            Err(e) => {
                error!("Error fetching results for '{}': {}", self.query, e);
                self.state = PagerState::Exhausted;
                return None;
            }
        };
        self.pages_fetched += 1;

        if page.items.is_empty() {
            debug!("No more results for '{}'", self.query);
            self.state = PagerState::Exhausted;
            return None;
        }

        self.state = self.advance(&request, &page);
        Some(page.items)
    }

    fn advance(&self, request: &PageRequest, page: &SearchPage) -> PagerState {
        match request {
            PageRequest::Cursor { .. } => match (&page.next_cursor, page.has_next_page) {
                (Some(cursor), true) => PagerState::Cursor(cursor.clone()),
                _ => PagerState::Exhausted,
            },
            PageRequest::Offset { page: current, .. } => {
                let max_page = page
                    .total_count
                    .map(|total| Self::max_reachable_page(total, self.per_page));
                match max_page {
                    Some(max) if *current >= max => {
                        if page.total_count.is_some_and(|t| t > SEARCH_RESULT_CAP) {
                            info!(
                                "Reached the {} result cap for '{}' at page {}",
                                SEARCH_RESULT_CAP, self.query, current
                            );
                        }
                        PagerState::Exhausted
                    }
                    None if page.items.len() < self.per_page as usize => PagerState::Exhausted,
                    _ => PagerState::Offset {
                        next_page: current + 1,
                        max_page,
                    },
                }
            }
        }
    }
}
