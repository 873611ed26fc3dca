// Error type for identifier encoding and decoding

/// Failures produced by [`crate::IdCodec`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string was not produced by this namespace's encoder.
    ///
    /// Malformed, tampered and wrong-namespace strings are deliberately
    /// indistinguishable.
    #[error("invalid identifier")]
    InvalidIdentifier,

    /// Record keys are non-negative; a negative key has no public form.
    #[error("record key {0} cannot be encoded")]
    NegativeKey(i64),

    #[error("invalid identifier configuration: {0}")]
    InvalidConfig(String),
}
