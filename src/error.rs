//! Error taxonomy for the knowledge lifecycle.
//!
//! | Class | Variants | Recovery |
//! |-------|----------|----------|
//! | validation | [`HarnessError::Validation`] | record skipped, batch continues |
//! | storage | `Storage`, `Io`, `Database`, `Serialization`, `Embedding` | surfaced to the caller of the write |
//! | source read | [`HarnessError::SourceRead`] | file skipped and left in the inbox |
//! | scheduler job | [`HarnessError::Job`] | logged at the job boundary, driver continues |

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Source read error: {}: {reason}", path.display())]
    SourceRead { path: PathBuf, reason: String },
    #[error("Job '{job}' failed: {message}")]
    Job { job: String, message: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    /// True for every failure of a durable write or index operation.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            HarnessError::Storage(_)
                | HarnessError::Io(_)
                | HarnessError::Database(_)
                | HarnessError::Serialization(_)
                | HarnessError::Embedding(_)
        )
    }

    pub fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        HarnessError::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::Embedding(err.to_string())
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_class_covers_io_and_db() {
        let io = HarnessError::from(std::io::Error::other("disk full"));
        assert!(io.is_storage());
        assert!(HarnessError::Storage("x".into()).is_storage());
        assert!(!HarnessError::Validation("short".into()).is_storage());
        assert!(!HarnessError::source_read("a.xlsx", "bad zip").is_storage());
    }

    #[test]
    fn source_read_message_names_the_file() {
        let err = HarnessError::source_read("/inbox/q1.xlsx", "invalid zip header");
        assert_eq!(
            err.to_string(),
            "Source read error: /inbox/q1.xlsx: invalid zip header"
        );
    }
}
