use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document {path} is not valid UTF-8")]
    InvalidEncoding { path: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where API and static route documents are read from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn read_document(&self, path: &str) -> Result<String, DocumentError>;
}
