//! Error types and the three-tier failure taxonomy.
//!
//! Every error produced by a pipeline stage can be classified into one of
//! three [`ErrorKind`]s. The orchestrator reads the kind instead of matching
//! on concrete error types:
//!
//! | Kind | Examples | Outcome |
//! |------|----------|---------|
//! | [`ErrorKind::Transient`] | timeouts, 5xx, navigation failures | retried with backoff |
//! | [`ErrorKind::SkipWorthy`] | 4xx during media resolution | article skipped, logged at info |
//! | [`ErrorKind::Fatal`] | retries exhausted, bad selectors | article failed |

use thiserror::Error;

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    SkipWorthy,
    Fatal,
}

/// Implemented by every error type the pipeline propagates.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Failure of a single browser render attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("host could not be resolved: {0}")]
    Unresolvable(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl Classify for FetchError {
    fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout(_) | FetchError::Navigation(_) => ErrorKind::Transient,
            FetchError::Status(code) if *code >= 500 => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }
}

/// Raised by the article fetcher once it gives up on a URL.
#[derive(Debug, Error)]
#[error("could not fetch {url} after {attempts} attempt(s): {source}")]
pub struct ContentFetchError {
    pub url: String,
    pub attempts: usize,
    #[source]
    pub source: FetchError,
}

impl Classify for ContentFetchError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}

/// Errors raised while resolving header media or running the image pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The remote source explicitly refused the request (4xx).
    #[error("{url} rejected the request with status {status}")]
    Rejected { url: String, status: u16 },

    #[error("transient network failure for {url}: {message}")]
    Network { url: String, message: String },

    #[error("remote error for {url}: status {status}")]
    Upstream { url: String, status: u16 },

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("image encode failed: {0}")]
    Encode(String),

    #[error("render failed: {0}")]
    Render(#[from] FetchError),

    #[error("unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl MediaError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => MediaError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            },
            Some(status) => MediaError::Upstream {
                url: url.to_string(),
                status: status.as_u16(),
            },
            None => MediaError::Network {
                url: url.to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl Classify for MediaError {
    fn kind(&self) -> ErrorKind {
        match self {
            MediaError::Rejected { .. } => ErrorKind::SkipWorthy,
            MediaError::Network { .. } => ErrorKind::Transient,
            MediaError::Upstream { status, .. } if *status >= 500 => ErrorKind::Transient,
            MediaError::Render(e) => e.kind(),
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<image::ImageError> for MediaError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Encoding(e) => MediaError::Encode(e.to_string()),
            other => MediaError::Decode(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

impl Classify for ExtractError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}

/// Failure of the persistence collaborator behind the duplicate gate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store data corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Aggregation-level failure surfaced to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] ContentFetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("duplicate lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl Classify for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(e) => e.kind(),
            PipelineError::Extract(e) => e.kind(),
            PipelineError::Media(e) => e.kind(),
            PipelineError::Store(_) => ErrorKind::Fatal,
        }
    }
}
