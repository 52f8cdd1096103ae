//! Error types for micadb.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using MicaError.
pub type Result<T> = std::result::Result<T, MicaError>;

/// Errors that can occur in micadb storage operations.
#[derive(Debug, Error)]
pub enum MicaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::INVALID_PAGE_ID;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: MicaError = io_err.into();
        assert!(matches!(err, MicaError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_invalid_page_id_display() {
        let err = MicaError::InvalidPageId(INVALID_PAGE_ID);
        assert_eq!(err.to_string(), "invalid page id: page:invalid");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = MicaError::BufferPoolFull;
        assert_eq!(err.to_string(), "buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MicaError>();
    }
}
