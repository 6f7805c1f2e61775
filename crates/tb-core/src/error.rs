use thiserror::Error;

/// Boundary error carried across every talebridge operation. Engine-internal
/// failures are converted into this shape at the boundary; they never cross it
/// as panics or foreign error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: String,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
