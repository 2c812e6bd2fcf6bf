use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriftError {
    #[error("insufficient data: need at least {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl DriftError {
    /// Whether this error must abort the whole monitoring cycle.
    ///
    /// `InsufficientData` is isolated per feature/check and `NotFound` skips
    /// one model version; everything else means the store can't be trusted
    /// for this tick.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            DriftError::StorageUnavailable(_)
                | DriftError::Codec(_)
                | DriftError::InvalidConfiguration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DriftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_fatal_classification() {
        assert!(!DriftError::InsufficientData { needed: 30, got: 0 }.is_cycle_fatal());
        assert!(!DriftError::NotFound("baseline".into()).is_cycle_fatal());
        assert!(DriftError::StorageUnavailable(rusqlite::Error::InvalidQuery).is_cycle_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = DriftError::InsufficientData { needed: 30, got: 4 };
        assert_eq!(
            err.to_string(),
            "insufficient data: need at least 30 samples, got 4"
        );
    }
}
