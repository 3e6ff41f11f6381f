use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SplitError {
    #[error("Unsupported or corrupt image: {0}")]
    Decode(String),

    #[error("Failed to encode segment {index}: {reason}")]
    Encode { index: usize, reason: String },

    #[error("No segments selected for export")]
    NoSelection,

    #[error("Export serialization failed: {0}")]
    ExportSerialization(String),

    #[error("Target segment height must be greater than 0 (got {0})")]
    InvalidTargetHeight(u32),

    #[error("Segment {got} arrived out of order (expected {expected})")]
    SegmentOrder { expected: usize, got: usize },

    #[error("Split worker stopped without reporting a result")]
    WorkerLost,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SplitError {
    /// Pipeline errors are never retried automatically; the only recovery is a
    /// fresh `start_split`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SplitError::Io(_))
    }

    /// Errors that end the active split session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SplitError::Decode(_)
                | SplitError::Encode { .. }
                | SplitError::SegmentOrder { .. }
                | SplitError::WorkerLost
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SplitError::NoSelection => ErrorSeverity::Low,
            SplitError::InvalidTargetHeight(_) => ErrorSeverity::Low,
            SplitError::Decode(_) => ErrorSeverity::Medium,
            SplitError::ExportSerialization(_) => ErrorSeverity::Medium,
            SplitError::Configuration(_) => ErrorSeverity::High,
            SplitError::SegmentOrder { .. } => ErrorSeverity::Critical,
            SplitError::WorkerLost => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Short message suitable for showing to the person who started the split.
    pub fn user_message(&self) -> &'static str {
        match self {
            SplitError::Decode(_) => "unsupported or corrupt image",
            SplitError::Encode { .. } => "a segment could not be encoded",
            SplitError::NoSelection => "select at least one segment to export",
            SplitError::ExportSerialization(_) => "the export file could not be created",
            SplitError::InvalidTargetHeight(_) => "segment height must be a positive number",
            SplitError::WorkerLost => "processing stopped unexpectedly",
            _ => "something went wrong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<std::io::Error> for SplitError {
    fn from(err: std::io::Error) -> Self {
        SplitError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SplitError {
    fn from(err: serde_json::Error) -> Self {
        SplitError::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for SplitError {
    fn from(err: zip::result::ZipError) -> Self {
        SplitError::ExportSerialization(err.to_string())
    }
}

impl From<lopdf::Error> for SplitError {
    fn from(err: lopdf::Error) -> Self {
        SplitError::ExportSerialization(err.to_string())
    }
}
