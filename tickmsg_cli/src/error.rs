use libtickmsg::TickMsgError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid configuration file: {0}")]
    InvalidConfig(#[from] serde_yml::Error),
    #[error("Messaging error: {0}")]
    Messaging(#[from] TickMsgError),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}
