use thiserror::Error;

/// Everything that can go wrong while mining.
///
/// Rate-limit exhaustion with a known reset time never shows up here; the
/// client sleeps through it. Not-found responses are not errors either, see
/// [`crate::http_client::ApiResponse::NotFound`].
#[derive(Error, Debug)]
pub enum MinerError {
    #[error("GitHub token not provided; set one of: {0}")]
    MissingCredential(String),

    #[error("request to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("rate limited (HTTP {status}) and no reset time was reported")]
    RateLimited { status: u16 },

    #[error("still rate limited (HTTP {status}) after {retries} retries")]
    RetriesExhausted { status: u16, retries: u32 },

    #[error("GitHub API error: {status} {status_text}: {body}")]
    Api {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MinerError>;
