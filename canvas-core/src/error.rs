//! Error types for canvas operations.

use thiserror::Error;

/// Result type for canvas operations.
pub type CanvasResult<T> = Result<T, CanvasError>;

/// Errors that can occur in canvas operations.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// Element not found in scene.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// An element with the same key already exists in the scene.
    #[error("Duplicate element key: {0}")]
    DuplicateKey(String),

    /// The prompt was empty once directives and references were stripped.
    #[error("Prompt is empty")]
    EmptyPrompt,

    /// An `@imgN` token does not name any element in the scene.
    #[error("Unresolved image reference: @img{0}")]
    UnresolvedReference(u32),

    /// A size directive could not be parsed.
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    /// The element is already the target of a running generation.
    #[error("Target is busy: {0}")]
    TargetBusy(String),

    /// Scene serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CanvasError {
    /// Returns true for errors caused by user input that should be shown
    /// inline rather than treated as failures.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyPrompt
                | Self::UnresolvedReference(_)
                | Self::InvalidSize(_)
                | Self::TargetBusy(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_classified() {
        assert!(CanvasError::EmptyPrompt.is_input_error());
        assert!(CanvasError::UnresolvedReference(3).is_input_error());
        assert!(CanvasError::InvalidSize("x".into()).is_input_error());
        assert!(CanvasError::TargetBusy("k".into()).is_input_error());
        assert!(!CanvasError::ElementNotFound("k".into()).is_input_error());
        assert!(!CanvasError::DuplicateKey("k".into()).is_input_error());
    }
}
