use thiserror::Error;

#[derive(Error, Debug)]
pub enum UndulatorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Fit failed: {0}")]
    FitFailed(String),

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type UndulatorResult<T> = Result<T, UndulatorError>;
