//! Error types for endpoint synchronization and backend selection.

/// Boxed error used for transport-level causes.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for load balancer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the load balancer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration has no (or a blank) service name.
    #[error("endpoints: missing service name")]
    MissingServiceName,

    /// The current backend set is empty.
    #[error("endpoints: no endpoints available")]
    NoBackends,

    /// The request never produced an HTTP response (connection refused,
    /// DNS failure, broken stream, client setup).
    #[error("endpoints: GET {url}: {source}")]
    Transport {
        /// URL of the failed request.
        url: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// The API server answered with a non-success status.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A response body or watch event was not valid JSON of the expected shape.
    #[error("endpoints: GET {url}: {source}")]
    Decode {
        /// URL of the request whose body failed to decode.
        url: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A watch stream ended without an error.
    #[error("endpoints watch {url}: stream closed")]
    StreamClosed {
        /// URL of the watch request.
        url: String,
    },

    /// The request was abandoned because shutdown was signalled.
    #[error("endpoints: GET {url}: cancelled")]
    Cancelled {
        /// URL of the abandoned request.
        url: String,
    },
}

impl Error {
    pub(crate) fn transport(url: &str, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn decode(url: &str, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.to_string(),
            source,
        }
    }
}

/// A non-success response from the Kubernetes API and the request that caused it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("endpoints Get {url}: {message} {code}")]
pub struct RemoteError {
    /// URL used.
    pub url: String,
    /// Description of the error.
    pub message: String,
    /// Remote status code.
    pub code: u16,
}
