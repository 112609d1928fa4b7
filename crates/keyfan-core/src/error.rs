use thiserror::Error;

pub type KeyfanResult<T> = Result<T, KeyfanError>;

#[derive(Debug, Error)]
pub enum KeyfanError {
    /// Malformed input rejected before any work starts (empty secret,
    /// zero output length, zero hierarchy dimension).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{table} table has {len} entries, index {index} is out of range")]
    IndexOutOfRange {
        table: &'static str,
        index: usize,
        len: usize,
    },

    #[error("derived key {index} is {actual} bytes, expected {expected}")]
    KeyLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("invalid key: {actual} bytes, expected {expected}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("authentication failed: ciphertext or tag does not verify")]
    Authentication,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KeyfanError {
    /// Errors raised while building the key hierarchy abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KeyfanError::InvalidInput(_)
                | KeyfanError::IndexOutOfRange { .. }
                | KeyfanError::KeyLengthMismatch { .. }
                | KeyfanError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_errors_are_fatal() {
        assert!(KeyfanError::InvalidInput("empty secret".into()).is_fatal());
        assert!(KeyfanError::IndexOutOfRange {
            table: "unit",
            index: 4,
            len: 4
        }
        .is_fatal());
        assert!(!KeyfanError::InvalidKey {
            expected: 32,
            actual: 0
        }
        .is_fatal());
        assert!(!KeyfanError::Authentication.is_fatal());
    }

    #[test]
    fn index_error_names_the_table() {
        let err = KeyfanError::IndexOutOfRange {
            table: "department",
            index: 3,
            len: 2,
        };
        assert_eq!(
            err.to_string(),
            "department table has 2 entries, index 3 is out of range"
        );
    }
}
