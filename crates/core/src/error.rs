//! Extraction error type

use std::time::Duration;
use thiserror::Error;

/// Why an extraction did not produce a model result
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("backend configuration error: {0}")]
    BackendConfig(String),

    #[error("backend returned HTTP {status}: {body}")]
    BackendHttp { status: u16, body: String },

    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("could not parse model response: {0}")]
    ResponseParse(String),

    /// A newer request was issued before this one finished
    #[error("request superseded by a newer one")]
    Superseded,
}

impl ExtractionError {
    /// Failures the facade answers with the rule engine instead of reporting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExtractionError::BackendHttp { .. }
                | ExtractionError::Transport(_)
                | ExtractionError::Timeout(_)
                | ExtractionError::ResponseParse(_)
        )
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExtractionError::ResponseParse(e.to_string())
        } else {
            ExtractionError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ExtractionError::Timeout(Duration::from_secs(5)).is_recoverable());
        assert!(ExtractionError::ResponseParse("x".into()).is_recoverable());
        assert!(ExtractionError::BackendHttp {
            status: 502,
            body: String::new()
        }
        .is_recoverable());
        assert!(!ExtractionError::EmptyInput.is_recoverable());
        assert!(!ExtractionError::BackendConfig("no key".into()).is_recoverable());
        assert!(!ExtractionError::Superseded.is_recoverable());
    }
}
