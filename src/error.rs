use thiserror::Error;

/// Error type for the fallible edges of blocksync: loading block files,
/// parsing configuration and the CLI. The sync core itself never fails,
/// it degrades to no-ops.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("File I/O error: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {context}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse configuration")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid text pattern")]
    Regex(#[from] regex::Error),

    #[error("Invalid block data: {message}")]
    InvalidBlockData { message: String },

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

impl SyncError {
    /// Create a file I/O error
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_block_data(message: impl Into<String>) -> Self {
        Self::InvalidBlockData {
            message: message.into(),
        }
    }

    /// Check if error is recoverable (the host can keep the previous document)
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Json { .. } => true,
            SyncError::InvalidBlockData { .. } => true,
            SyncError::Configuration { .. } => true,
            SyncError::ConfigParse(_) => true,
            SyncError::Io { .. } => false,
            _ => true,
        }
    }
}

/// Result type alias for convenience
pub type SyncResult<T> = Result<T, SyncError>;
