use thiserror::Error;

use crate::error::AppError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("file name has no extension")]
    MissingExtension,
    #[error("extension `{0}` is not allowed")]
    ExtensionNotAllowed(String),
    #[error("file is {size} bytes which exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("detected content type `{detected}` does not match extension `{extension}`")]
    MimeMismatch { extension: String, detected: String },
}

/// Decision of the security gate for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub reason: Option<RejectionReason>,
}

impl ValidationVerdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: RejectionReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self.reason {
            Some(reason) => Err(AppError::ValidationFailed(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_verdict_becomes_validation_error() {
        let verdict = ValidationVerdict::reject(RejectionReason::MissingExtension);
        assert!(!verdict.accepted);
        assert!(matches!(
            verdict.into_result(),
            Err(AppError::ValidationFailed(RejectionReason::MissingExtension))
        ));
        assert!(ValidationVerdict::accept().into_result().is_ok());
    }
}
