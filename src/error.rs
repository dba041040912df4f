use thiserror::Error;

/// Main error type for the overseer supervisor
#[derive(Debug, Error)]
pub enum OverseerError {
    // App-related errors
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("Startup failure for {0}: {1}")]
    StartupFailure(String, String),

    #[error("App {0} is in invalid state for this operation: {1}")]
    InvalidAppState(String, String),

    // Supervisor task errors
    #[error("Supervisor task for {0} is no longer running")]
    SupervisorGone(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Scheduling errors
    #[error("Invalid cron expression '{0}': {1}")]
    SchedulingError(String, String),

    // Log-related errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("Failed to open log file: {0}")]
    LogFileError(String),

    // Signal errors
    #[error("Signal error: {0}")]
    SignalError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for overseer operations
pub type Result<T> = std::result::Result<T, OverseerError>;
