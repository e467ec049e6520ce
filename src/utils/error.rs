use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsmeError {
    #[error("Can't get token.")]
    TokenError,

    #[error("Can not submit login form.")]
    LoginFormError(#[source] reqwest::Error),

    #[error("Login error: Please check your username/password.")]
    LoginError,

    #[error("{message}")]
    PortalError { message: String },

    #[error("{message}")]
    UnexpectedDataError { message: String },

    #[error("{value} was expected to be {expected}")]
    TypeMismatchError { value: String, expected: String },

    #[error("Cannot find the counter id on the consumption page")]
    CounterNotFoundError,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV output error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Unknown provider '{name}'")]
    UnknownProviderError { name: String },

    #[error("Publishing {entity_id} failed with status {status}: {body}")]
    PublishError {
        entity_id: String,
        status: u16,
        body: String,
    },

    #[error("Config entry {entry_id} not found")]
    EntryNotFoundError { entry_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Portal,
    Network,
    Configuration,
    Storage,
    Publishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TsmeError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        TsmeError::UnexpectedDataError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        TsmeError::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TsmeError::TokenError | TsmeError::LoginFormError(_) | TsmeError::LoginError => {
                ErrorCategory::Authentication
            }
            TsmeError::PortalError { .. }
            | TsmeError::UnexpectedDataError { .. }
            | TsmeError::TypeMismatchError { .. }
            | TsmeError::CounterNotFoundError => ErrorCategory::Portal,
            TsmeError::HttpError(_) => ErrorCategory::Network,
            TsmeError::ConfigError { .. }
            | TsmeError::MissingConfigError { .. }
            | TsmeError::InvalidConfigValueError { .. }
            | TsmeError::ConfigValidationError { .. }
            | TsmeError::UnknownProviderError { .. }
            | TsmeError::EntryNotFoundError { .. } => ErrorCategory::Configuration,
            TsmeError::IoError(_) | TsmeError::SerializationError(_) | TsmeError::CsvError(_) => {
                ErrorCategory::Storage
            }
            TsmeError::PublishError { .. } => ErrorCategory::Publishing,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // the portal is flaky; the next poll usually succeeds
            ErrorCategory::Network | ErrorCategory::Portal | ErrorCategory::Publishing => {
                ErrorSeverity::Medium
            }
            ErrorCategory::Authentication | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Storage => ErrorSeverity::Critical,
        }
    }

    /// Errors raised by the portal itself, as opposed to local failures.
    pub fn is_portal_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Authentication | ErrorCategory::Portal | ErrorCategory::Network
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            TsmeError::TokenError => "The login page layout may have changed; retry later",
            TsmeError::LoginError => "Check your username and password on the provider website",
            TsmeError::CounterNotFoundError => "Pass the counter id explicitly with --counter-id",
            TsmeError::UnknownProviderError { .. } => {
                "Run the 'providers' command to list the supported providers"
            }
            TsmeError::PublishError { status: 401, .. } => {
                "Create a new long-lived access token in Home Assistant"
            }
            TsmeError::EntryNotFoundError { .. } => "Run 'tsme-bridge configure' first",
            _ => match self.category() {
                ErrorCategory::Network | ErrorCategory::Portal => {
                    "The provider portal may be unavailable; retry later"
                }
                ErrorCategory::Configuration => "Fix the configuration file and retry",
                ErrorCategory::Storage => "Check file permissions and free disk space",
                ErrorCategory::Publishing => "Check the Home Assistant URL and token",
                ErrorCategory::Authentication => "Check your credentials",
            },
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Authentication => format!("Authentication failed: {}", self),
            ErrorCategory::Portal => format!("The portal returned unusable data: {}", self),
            ErrorCategory::Network => format!("Could not reach the portal: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Storage => format!("Local storage failure: {}", self),
            ErrorCategory::Publishing => format!("Home Assistant rejected the update: {}", self),
        }
    }

    /// Process exit code derived from severity.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, TsmeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_portal_wording() {
        assert_eq!(TsmeError::TokenError.to_string(), "Can't get token.");
        assert_eq!(
            TsmeError::LoginError.to_string(),
            "Login error: Please check your username/password."
        );
        let err = TsmeError::TypeMismatchError {
            value: "\"abc\"".to_string(),
            expected: "number".to_string(),
        };
        assert_eq!(err.to_string(), "\"abc\" was expected to be number");
    }

    #[test]
    fn test_severity_drives_exit_code() {
        assert_eq!(TsmeError::LoginError.exit_code(), 1);
        assert_eq!(TsmeError::unexpected("Cannot read yesterday data").exit_code(), 2);
        let io = TsmeError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.exit_code(), 3);
        assert!(!io.is_portal_error());
        assert!(TsmeError::CounterNotFoundError.is_portal_error());
    }
}
