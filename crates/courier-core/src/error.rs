use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("key exchange")]
    KeyExchange,
    #[error("decryption")]
    Decryption,
    #[error("signature")]
    Signature,
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("cold tier {0}")]
    ColdTier(String),
    #[error("retry exhausted for {0}")]
    RetryExhausted(String),
    #[error("storage")]
    Storage,
    #[error("validation {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
}
