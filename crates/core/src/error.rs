#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid job id '{0}': {1}")]
    InvalidJobId(String, &'static str),

    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
