//! Error types for Deer.
//!
//! Each crate keeps its own detailed error enum; they all funnel into this
//! one at crate boundaries, together with a recovery suggestion where one
//! makes sense.

use thiserror::Error;

/// Result type alias using the Deer [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tool call was rejected before it ran
    #[error("Tool error: {0}")]
    Tool(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    /// A named server or tool does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Run 'deer config validate' to check your configuration"),
            Error::Mcp(_) => Some("Run 'deer mcp status' to check the configured servers"),
            Error::NotFound(_) => Some("Run 'deer mcp list' and 'deer mcp tools' to see what is available"),
            Error::Tool(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_has_suggestion() {
        let err = Error::Config("bad value".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad value");
        assert!(err.recovery_suggestion().unwrap().contains("deer config validate"));
    }

    #[test]
    fn test_suggestions() {
        let err = Error::Mcp("server not found: github".to_string());
        assert_eq!(err.to_string(), "MCP error: server not found: github");
        assert!(err.recovery_suggestion().unwrap().contains("deer mcp status"));

        let err = Error::Tool("invalid arguments: $: expected object, got null".to_string());
        assert!(err.recovery_suggestion().is_none());
    }
}
