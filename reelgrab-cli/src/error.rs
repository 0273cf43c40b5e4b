use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] reelgrab_engine::DownloadError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{failed} of {total} downloads failed")]
    Failed { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, AppError>;
