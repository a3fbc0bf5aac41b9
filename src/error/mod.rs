//! Error types for the image migrator
//!
//! Only errors raised before a batch starts (selection, data format and
//! configuration) are fatal. Everything raised while an image is in flight is
//! converted into a failed outcome for that image.

pub mod handlers;

pub type Result<T> = std::result::Result<T, MigratorError>;

#[derive(Debug, thiserror::Error)]
pub enum MigratorError {
    /// Catalog or image list could not produce a work list
    #[error("Selection error: {0}")]
    Selection(String),

    /// Spreadsheet rows could not be turned into images
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// The transfer tool failed to start, exited non-zero or hit the corruption limit
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Token or manifest fetch against the target registry failed
    #[error("Verification error: {0}")]
    Verification(String),

    /// Writing an outcome to disk failed
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query build error: {0}")]
    Query(#[from] sea_query::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MigratorError {
    /// Whether this error stops the whole run rather than a single image.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigratorError::Selection(_) | MigratorError::DataFormat(_) | MigratorError::Config(_)
        )
    }
}

impl From<serde_json::Error> for MigratorError {
    fn from(err: serde_json::Error) -> Self {
        MigratorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MigratorError {
    fn from(err: serde_yaml::Error) -> Self {
        MigratorError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for MigratorError {
    fn from(err: url::ParseError) -> Self {
        MigratorError::Config(format!("invalid url: {}", err))
    }
}

impl From<calamine::Error> for MigratorError {
    fn from(err: calamine::Error) -> Self {
        MigratorError::DataFormat(err.to_string())
    }
}
