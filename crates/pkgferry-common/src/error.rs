//! Common error types used throughout pkgferry.
//!
//! Parsing, transport, and protocol failures all funnel into [`Error`]. The
//! variants mirror how callers react: format problems abort extraction,
//! network and API problems are retried, and a stalled protocol asks for the
//! whole upload to be restarted.

/// Common error type for pkgferry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad magic, truncated header, or an entry pointing outside the container.
    #[error("Format error: {0}")]
    Format(String),

    /// A required entry is missing from the container's entry table.
    #[error("Entry not found: {id:#06x}")]
    EntryNotFound {
        /// The entry id (Orbis) or type code (Prospero) that was looked up.
        id: u32,
    },

    /// Embedded JSON could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request never produced a response (connection refused, reset, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The installer answered with a non-success status.
    #[error("API error [{status}]: {message}")]
    Api {
        /// HTTP status code returned by the installer.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A retryable request kept failing until its retry budget ran out.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total attempts made, including the first one.
        attempts: u32,
        /// The last failure observed.
        #[source]
        source: Box<Error>,
    },

    /// The installer stopped announcing chunks before the upload reached 100%.
    #[error("Upload stalled at {progress:.1}%: no new chunks after {retries} retries")]
    ProtocolStall {
        /// Aggregate progress when the stall was declared.
        progress: f64,
        /// Empty listings retried before giving up.
        retries: u32,
    },

    /// A chunk descriptor does not describe a range inside the package.
    #[error("Invalid chunk {key}: bytes {start}..={end} outside package of {size} bytes")]
    InvalidChunk {
        /// Server-issued chunk key.
        key: String,
        /// First byte of the range.
        start: u64,
        /// Last byte of the range (inclusive).
        end: u64,
        /// Total package size.
        size: u64,
    },

    /// The operation was cancelled locally.
    #[error("Upload cancelled")]
    Cancelled,

    /// Configuration could not be loaded or failed validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Format error.
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    /// Create a new Network error.
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new Api error.
    pub fn api<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the upload loop may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Api { .. } | Error::Json(_))
    }

    /// A short suggestion for the person running the upload.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::ProtocolStall { .. } => {
                Some("the installer stopped requesting chunks; retry the whole upload")
            }
            Error::Network(_) => Some("check the connection to the installer"),
            Error::Api { .. } => Some("check that the installer service is running"),
            Error::RetriesExhausted { source, .. } => source.hint(),
            Error::Format(_) | Error::EntryNotFound { .. } => {
                Some("the file does not look like a supported package")
            }
            _ => None,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
