use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Error parsing YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Config file '{0}' not found")]
    ConfigNotFound(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("{0}")]
    ExecutionError(String),
    #[error("Execution failed: Memory limit exceeded")]
    MemoryLimitExceeded,
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("{tool} failed: {message}")]
    ToolError { tool: String, message: String },
}

impl HiveError {
    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        HiveError::ToolError {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}
