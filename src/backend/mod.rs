//! Where telemetry ends up and how predicates look for it.

use async_trait::async_trait;
use snafu::Snafu;

use crate::predicate::Query;

pub mod elasticsearch;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use self::elasticsearch::ElasticsearchBackend;
#[cfg(any(test, feature = "test-utils"))]
pub use self::memory::MemoryBackend;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("No Elasticsearch endpoint configured"))]
    MissingEndpoint,
    #[snafu(display("Could not build HTTP client: {}", source))]
    BuildClient { source: reqwest::Error },
    #[snafu(display("Invalid index pattern {:?}: {}", pattern, source))]
    InvalidPattern {
        pattern: String,
        source: url::ParseError,
    },
    #[snafu(display("Request to {} failed: {}", url, source))]
    Request { url: String, source: reqwest::Error },
    #[snafu(display("Request to {} returned {}: {}", url, status, body))]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("Backend unavailable: {}", message))]
    Unavailable { message: String },
    #[snafu(display("No answer before the deadline"))]
    DeadlineExceeded,
}

/// A store of telemetry records that can answer "does anything match?".
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn has_match(&self, query: &Query) -> Result<bool, BackendError>;
}
