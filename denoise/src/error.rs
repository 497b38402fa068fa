use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error("failed to read denoise config: {0}")]
    ConfigRead(String),
    #[error("failed to parse denoise config: {0}")]
    ConfigParse(String),
}
