use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Coarse failure classes reported to callers alongside a terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or empty manifest, or no usable variant.
    Manifest,
    /// Manifest or segment retrieval failed.
    Fetch,
    /// The transcoding engine could not be brought up.
    EngineLoad,
    /// The remux run itself failed.
    Transcode,
    /// The job was cancelled by its caller or by shutdown.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manifest => "manifest",
            Self::Fetch => "fetch",
            Self::EngineLoad => "engine_load",
            Self::Transcode => "transcode",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error("HTTP request for {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("failed to load transcoding engine: {reason}")]
    EngineLoad { reason: String },

    #[error("remux failed: {reason}")]
    Transcode { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source: Arc::new(source),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn engine_load(reason: impl Into<String>) -> Self {
        Self::EngineLoad {
            reason: reason.into(),
        }
    }

    pub fn transcode(reason: impl Into<String>) -> Self {
        Self::Transcode {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidUrl { .. } | Self::Manifest { .. } => ErrorKind::Manifest,
            Self::Network { .. } | Self::HttpStatus { .. } => ErrorKind::Fetch,
            Self::EngineLoad { .. } => ErrorKind::EngineLoad,
            Self::Transcode { .. } => ErrorKind::Transcode,
        }
    }

    /// Every failure scoped to a job counts against its attempts, except cancellation.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
