use thiserror::Error;

/// Grid file and manifest I/O.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("grid not found: {0}")]
    GridNotFound(String),
}

/// Import validation failures. The messages are shown to users as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("Invalid data format")]
    InvalidFormat,
    #[error("Streams and layout must be arrays")]
    NotArrays,
    #[error("Invalid stream data format")]
    InvalidStream,
    #[error("Invalid layout data format")]
    InvalidLayout,
    #[error("Invalid chat data format")]
    InvalidChat,
}

/// Network enrichment failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response is missing '{0}'")]
    MissingField(&'static str),
    #[error("not a YouTube video url: {0}")]
    NotYouTube(String),
}
