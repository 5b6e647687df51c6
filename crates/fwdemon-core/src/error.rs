//! Error types with structured context
//!
//! Every failure that involves an external tool keeps the command that was run
//! and the combined output it produced, so the final report can show both.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{program}' was not found. Ensure it is installed and in your PATH.")]
    ToolNotFound { program: String },

    #[error("Process error: {message}")]
    Process { message: String },

    // ─────────────────────────────────────────────────────────────
    // Caller Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {message}")]
    Argument { message: String },

    #[error("Resource not found: '{}'", path.display())]
    ResourceNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error(
        "The following error occurred while {message}:\n Command: '{}'\n Error: {}",
        .command.as_deref().unwrap_or("<none>"),
        .output.trim_end()
    )]
    DeviceCommunication {
        message: String,
        command: Option<String>,
        output: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Build / Deploy Errors
    // ─────────────────────────────────────────────────────────────
    #[error(
        "Building firmware failed ({message}):\n Command: '{}'\n - {}",
        .command.as_deref().unwrap_or("<none>"),
        .output.trim_end()
    )]
    Build {
        message: String,
        command: Option<String>,
        output: String,
    },

    #[error("Updating firmware failed:\n - {source}")]
    Deployment {
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn resource_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ResourceNotFound { path: path.into() }
    }

    /// A device failure that was not caused by a specific tool invocation.
    pub fn device(message: impl Into<String>) -> Self {
        Self::DeviceCommunication {
            message: message.into(),
            command: None,
            output: String::new(),
        }
    }

    pub fn device_command(
        message: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::DeviceCommunication {
            message: message.into(),
            command: Some(command.into()),
            output: output.into(),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            command: None,
            output: String::new(),
        }
    }

    pub fn build_command(
        message: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::Build {
            message: message.into(),
            command: Some(command.into()),
            output: output.into(),
        }
    }

    /// Wrap any failure of the deploy sequence. Already-wrapped errors are
    /// passed through so the chain never nests twice.
    pub fn deployment(cause: Error) -> Self {
        match cause {
            Error::Deployment { .. } => cause,
            other => Self::Deployment {
                source: Box::new(other),
            },
        }
    }

    /// The command line of the failed tool invocation, when there was one
    pub fn failed_command(&self) -> Option<&str> {
        match self {
            Error::DeviceCommunication { command, .. } | Error::Build { command, .. } => {
                command.as_deref()
            }
            Error::Deployment { source } => source.failed_command(),
            _ => None,
        }
    }

    /// Check if this error was caused by the caller rather than the device or tools
    pub fn is_argument_error(&self) -> bool {
        match self {
            Error::Argument { .. } => true,
            Error::Deployment { source } => source.is_argument_error(),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_command_display_is_multiline() {
        let err = Error::device_command(
            "starting the session",
            "bash metro_m4.sh metro_m4.log",
            "No device found\n",
        );
        let msg = err.to_string();
        assert!(msg.starts_with("The following error occurred while starting the session:"));
        assert!(msg.contains("\n Command: 'bash metro_m4.sh metro_m4.log'"));
        assert!(msg.ends_with(" Error: No device found"));
    }

    #[test]
    fn test_build_error_display() {
        let err = Error::build_command(
            "toolchain",
            "make BOARD=metro_m4_express",
            "region `FLASH' overflowed",
        );
        let msg = err.to_string();
        assert!(msg.contains("Building firmware failed"));
        assert!(msg.contains("make BOARD=metro_m4_express"));
        assert!(msg.contains("overflowed"));
    }

    #[test]
    fn test_error_without_command() {
        let err = Error::device("no mount path reported");
        assert!(err.to_string().contains("'<none>'"));
        assert!(err.failed_command().is_none());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_deployment_wraps_cause() {
        let err = Error::deployment(Error::resource_not_found("/fw/missing.uf2"));
        assert!(matches!(
            err,
            Error::Deployment { ref source } if matches!(**source, Error::ResourceNotFound { .. })
        ));
        assert!(err.to_string().contains("Updating firmware failed"));
        assert!(err.to_string().contains("/fw/missing.uf2"));
    }

    #[test]
    fn test_deployment_does_not_nest() {
        let once = Error::deployment(Error::device("boom"));
        let twice = Error::deployment(once);
        match twice {
            Error::Deployment { source } => {
                assert!(matches!(*source, Error::DeviceCommunication { .. }))
            }
            other => panic!("expected deployment error, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_command_through_deployment() {
        let err = Error::deployment(Error::device_command("sending", "screen -S x -X kill", ""));
        assert_eq!(err.failed_command(), Some("screen -S x -X kill"));
    }

    #[test]
    fn test_is_argument_error() {
        assert!(Error::argument("bad").is_argument_error());
        assert!(Error::deployment(Error::argument("bad")).is_argument_error());
        assert!(!Error::build("bad").is_argument_error());
    }
}
