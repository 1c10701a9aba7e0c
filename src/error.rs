use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("pin config validation error: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("Line not found: {0}")]
    NotFoundLine(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Fixture error: {0}")]
    Fixture(String),
}

impl AppError {
    /// Individual violations of a failed validation, empty for every other kind.
    pub fn violations(&self) -> &[String] {
        match self {
            AppError::Validation(reasons) => reasons,
            _ => &[],
        }
    }
}
