//! State persistence error types.

/// Errors that can occur while loading or saving watcher state.
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state file: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by a newer version of this crate.
    #[error("Unsupported state version {found} (supported up to {supported})")]
    IncompatibleVersion { found: u32, supported: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_version_display() {
        let err = StateError::IncompatibleVersion {
            found: 3,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported state version 3 (supported up to 1)"
        );
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: StateError = json_err.into();
        assert!(err.to_string().starts_with("Invalid state file"));
    }
}
