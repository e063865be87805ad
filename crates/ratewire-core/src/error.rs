use thiserror::Error;

/// Validation and contract errors exposed by `ratewire-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("platform id cannot be empty")]
    EmptyPlatform,
    #[error("platform id length {len} exceeds max {max}")]
    PlatformTooLong { len: usize, max: usize },
    #[error("platform id contains invalid character '{ch}' at index {index}")]
    PlatformInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },
    #[error("ask {ask} must be at least bid {bid} plus the minimum tick")]
    CrossedQuote { bid: f64, ask: f64 },

    #[error("rate name cannot be empty")]
    EmptyRateName,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
