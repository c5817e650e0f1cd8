use thiserror::Error;

/// Errors raised while extracting a page model
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// A resource fetch or parse failed
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// A referenced id or path could not be resolved
    #[error("Consistency failure: {0}")]
    Consistency(String),

    /// The diff reported a node kind that contradicts the tracked record at that path
    #[error("Identity map desynchronized at path {path}: expected {expected}, page reported {reported}")]
    Desync {
        path: String,
        expected: String,
        reported: String,
    },

    /// Options were invalid or changed at the wrong time
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to connect to browser: {0}")]
    ConnectionFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Failed to fetch resource: {0}")]
    Fetch(String),

    #[error("Failed to decode browser response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ExtractionError>;

impl ExtractionError {
    /// Whether the extraction may continue after logging this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Extraction(_) | Self::Consistency(_) | Self::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ExtractionError::Consistency("missing".into()).is_recoverable());
        assert!(ExtractionError::Fetch("timeout".into()).is_recoverable());
        assert!(!ExtractionError::Configuration("late".into()).is_recoverable());
        let desync = ExtractionError::Desync {
            path: "0>1".into(),
            expected: "node".into(),
            reported: "shadowRoot".into(),
        };
        assert!(!desync.is_recoverable());
        assert!(desync.to_string().contains("0>1"));
    }
}
