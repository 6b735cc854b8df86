use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown capability: {name}")]
    UnknownCapability { name: String },

    #[error("Dependency from {from} to {to} would create a cycle")]
    CyclicDependency { from: String, to: String },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker command not available: {0}")]
    WorkerNotAvailable(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Worker pool is full (max: {max})")]
    PoolSaturated { max: usize },

    #[error("Request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
