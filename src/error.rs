//! Error types for vbit-config
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Registry operations are all-or-nothing: when one of these errors is
//! returned the configuration document reflects no change.

use thiserror::Error;

/// Main error type for vbit-config operations.
#[derive(Error, Debug)]
pub enum VbitError {
    /// Configuration document could not be durably saved
    #[error("updating config file failed: {0}")]
    Persistence(String),

    /// Install spec is missing required fields or points outside the managed root
    #[error("invalid service configuration data: {0}")]
    InvalidSpec(String),

    /// Service name collides with an existing installed entry
    #[error("service name '{0}' already in use")]
    NameInUse(String),

    /// Named service is not in the installed list
    #[error("service '{0}' not found")]
    UnknownService(String),

    /// A dir-type install points at a directory that does not exist
    #[error("directory does not exist: {0}")]
    DirectoryNotFound(String),

    /// External fetch command (git/svn) failed. `code` is -1 when the tool
    /// was terminated by a signal rather than exiting.
    #[error("{tool} failed with exit code {code}: {output}")]
    Fetch {
        tool: String,
        code: i32,
        output: String,
    },

    /// No service is selected in the settings
    #[error("no service is selected")]
    NoSelection,

    /// settings.selected names a service that is no longer installed
    #[error("selected service '{0}' not found")]
    SelectionNotFound(String),

    /// Requested lines-per-field cannot be driven by the configured output
    #[error("unsupported output mode: {0}")]
    UnsupportedMode(String),

    /// Generator, output, or hook process failed
    #[error("subprocess failed: {0}")]
    Subprocess(String),

    /// IO errors (file operations, process spawning, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for vbit-config operations
pub type Result<T> = std::result::Result<T, VbitError>;

impl VbitError {
    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an invalid-spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create an unsupported-mode error
    pub fn unsupported_mode(msg: impl Into<String>) -> Self {
        Self::UnsupportedMode(msg.into())
    }

    /// Create a subprocess error
    pub fn subprocess(msg: impl Into<String>) -> Self {
        Self::Subprocess(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VbitError::NameInUse("teefax".to_string());
        assert_eq!(err.to_string(), "service name 'teefax' already in use");

        let err = VbitError::NoSelection;
        assert_eq!(err.to_string(), "no service is selected");
    }

    #[test]
    fn test_fetch_error_display() {
        let err = VbitError::Fetch {
            tool: "git".to_string(),
            code: 128,
            output: "fatal: repository not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("git"));
        assert!(msg.contains("128"));
        assert!(msg.contains("repository not found"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VbitError = io_err.into();
        assert!(matches!(err, VbitError::Io(_)));
    }
}
