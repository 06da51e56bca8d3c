use async_trait::async_trait;

use crate::ports::document_source::{DocumentError, DocumentSource};

/// Reads documents from the local file system.
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentSource for FileSystemAdapter {
    async fn read_document(&self, path: &str) -> Result<String, DocumentError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DocumentError::NotFound(path.to_string())
            } else {
                DocumentError::Io {
                    path: path.to_string(),
                    source: e,
                }
            }
        })?;

        String::from_utf8(bytes).map_err(|_| DocumentError::InvalidEncoding {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_read_document() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "openapi: 3.0.0").unwrap();

        let adapter = FileSystemAdapter::new();
        let text = adapter
            .read_document(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(text, "openapi: 3.0.0");
    }

    #[tokio::test]
    async fn test_missing_document() {
        let adapter = FileSystemAdapter::new();
        let err = adapter
            .read_document("/definitely/not/here.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_binary_document() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00]).unwrap();

        let adapter = FileSystemAdapter::new();
        let err = adapter
            .read_document(file.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidEncoding { .. }));
    }
}
