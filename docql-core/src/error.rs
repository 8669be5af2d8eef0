//! Engine error type
//!
//! Every failure raised while compiling or evaluating a query or pipeline is
//! reported as an assertion carrying a descriptive message. Decoding JSON at
//! the host boundary has its own variant so callers can tell bad input text
//! apart from a bad expression.

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Assertion(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

impl EngineError {
    /// Create an assertion error
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Get the error message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Assertion(msg) | Self::InvalidJson(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }
}

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Return early with an assertion error built from a format string.
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::error::EngineError::Assertion(format!($($arg)*)))
    };
}

/// Return early with an assertion error unless the condition holds.
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::error::bail!($($arg)*);
        }
    };
}

pub(crate) use bail;
pub(crate) use ensure;

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(n: i64) -> Result<i64> {
        ensure!(n >= 0, "negative input: {}", n);
        if n > 100 {
            bail!("input too large: {}", n);
        }
        Ok(n)
    }

    #[test]
    fn test_ensure_and_bail() {
        assert_eq!(checked(5), Ok(5));
        assert_eq!(checked(-1).unwrap_err().message(), "negative input: -1");
        assert_eq!(checked(101).unwrap_err().to_string(), "input too large: 101");
    }

    #[test]
    fn test_json_error_conversion() {
        let err: EngineError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, EngineError::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid JSON"));
    }
}
