use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    #[error("HSDB responded with {status} for {endpoint}: {body}")]
    HsdbResponseError {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("Failed to retrieve spectrum {id}: {message}")]
    RetrievalError { id: i64, message: String },

    #[error("Failed to download '{url}': {message}")]
    DownloadError { url: String, message: String },

    #[error("Unsupported filetype: {filetype}")]
    UnsupportedFiletypeError { filetype: String },

    #[error("Conversion error: {message}")]
    ConversionError { message: String },

    #[error("Peak detection error: {message}")]
    PeakDetectionError { message: String },

    #[error("Invalid spectrum metadata: {message}")]
    InvalidMetadataError { message: String },

    #[error("Upload error: {message}")]
    UploadError { message: String },

    #[error("THz extraction error: {message}")]
    ThzError { message: String },

    #[error("Task queue error: {message}")]
    QueueError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Data,
    Upstream,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ProcessorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_) | Self::DownloadError { .. } => ErrorCategory::Network,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::AuthenticationError { .. }
            | Self::HsdbResponseError { .. }
            | Self::RetrievalError { .. }
            | Self::UploadError { .. } => ErrorCategory::Upstream,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::UnsupportedFiletypeError { .. }
            | Self::ConversionError { .. }
            | Self::PeakDetectionError { .. }
            | Self::InvalidMetadataError { .. }
            | Self::ThzError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Data,
            Self::IoError(_) | Self::QueueError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Upstream => ErrorSeverity::Medium,
            ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// Transient failures worth another attempt: transport errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            Self::HsdbResponseError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ApiError(_) => "Check network connectivity and that HSDB_URL is reachable",
            Self::AuthenticationError { .. } => {
                "Verify HSDB_EMAIL, HSDB_PASSWORD and HSDB_CLIENT_ID"
            }
            Self::HsdbResponseError { .. } | Self::RetrievalError { .. } => {
                "Make sure the spectrum exists and the account may access it"
            }
            Self::DownloadError { .. } => "Check that the spectrum file is still attached in HSDB",
            Self::UnsupportedFiletypeError { .. } => {
                "Upload the spectrum in one of the supported instrument formats"
            }
            Self::ConversionError { .. } | Self::CsvError(_) => {
                "Inspect the raw file; it does not match its declared format"
            }
            Self::PeakDetectionError { .. } => "The spectrum has no positive intensity values",
            Self::InvalidMetadataError { .. } => "Spectrum metadata must be a JSON object",
            Self::UploadError { .. } => "Retry the processing request later",
            Self::ThzError { .. } => {
                "THz spectra need a reference spectrum and a 'thickness' metadata entry"
            }
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "Fix the configuration file or environment",
            Self::QueueError { .. } => "The processing queue is saturated; retry later",
            Self::IoError(_) => "Check file permissions and available disk space",
            Self::SerializationError(_) | Self::ValidationError { .. } => {
                "Check the input data format"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
            ErrorCategory::Upstream => format!("HSDB problem: {}", self),
            ErrorCategory::System => format!("System problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let server_error = ProcessorError::HsdbResponseError {
            status: 503,
            endpoint: "/api/v1/spectra/1".to_string(),
            body: String::new(),
        };
        let not_found = ProcessorError::HsdbResponseError {
            status: 404,
            endpoint: "/api/v1/spectra/1".to_string(),
            body: String::new(),
        };
        assert!(server_error.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!ProcessorError::ConversionError {
            message: "bad".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_severity_follows_category() {
        let err = ProcessorError::MissingConfigError {
            field: "hsdb.url".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.user_friendly_message().starts_with("Configuration problem"));
    }
}
