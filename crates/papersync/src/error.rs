use thiserror::Error;

#[derive(Error, Debug)]
pub enum PapersyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] crate::api::ApiError),

    #[error("Processing error: {0}")]
    Processing(#[from] crate::processing::ProcessingError),

    #[error("Billing error: {0}")]
    Billing(#[from] crate::billing::BillingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, PapersyncError>;
