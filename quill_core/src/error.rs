use thiserror::Error;

/// Field-level input failures. Recovered at the boundary by re-presenting
/// the form; never fatal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("text must not be empty")]
    EmptyText,
}
