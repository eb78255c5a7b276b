use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrendsError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),
    
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),
    
    #[error("Formula error: {0}")]
    FormulaError(String),
    
    #[error("Invalid property filter: {0}")]
    InvalidProperty(String),
    
    #[error("Event store error: {message}")]
    Store { message: String },
    
    #[error("Slice task failed: {0}")]
    Task(String),
    
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrendsError {
    /// True for errors caused by the request itself rather than a collaborator.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TrendsError::InvalidRange(_)
                | TrendsError::InvalidMetric(_)
                | TrendsError::FormulaError(_)
                | TrendsError::InvalidProperty(_)
        )
    }
}

pub type TrendsResult<T> = Result<T, TrendsError>;
