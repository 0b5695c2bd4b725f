use thiserror::Error;

/// Errors returned by the mcrelay core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration validation failed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// A do-not-dump region of the given size could not be mapped.
    /// Never fatal: callers fall back to the normal heap path.
    #[error("do-not-dump allocation of {0} bytes failed")]
    NodumpAllocation(usize),
}
