use crate::types::{ContentType, SendRequest};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty field {0}")]
    Empty(&'static str),
    #[error("too long {0}")]
    TooLong(&'static str),
    #[error("invalid {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_content_bytes: usize,
    pub max_chain_ref_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_content_bytes: 500,
            max_chain_ref_len: 128,
        }
    }
}

pub fn validate_send_request(
    req: &SendRequest,
    sender: &str,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    if req.recipient.trim().is_empty() {
        return Err(ValidationError::Empty("recipient"));
    }
    if req.recipient == sender {
        return Err(ValidationError::Invalid("recipient"));
    }
    if !matches!(req.content_type, ContentType::System) && req.body.is_empty() {
        return Err(ValidationError::Empty("body"));
    }
    if req.body.len() > limits.max_content_bytes {
        return Err(ValidationError::TooLong("body"));
    }
    if let Some(chain_ref) = req.chain_ref.as_ref() {
        if chain_ref.trim().is_empty() {
            return Err(ValidationError::Empty("chain_ref"));
        }
        if chain_ref.len() > limits.max_chain_ref_len {
            return Err(ValidationError::TooLong("chain_ref"));
        }
    }
    if let Some(ttl) = req.ttl_ms {
        if ttl == 0 {
            return Err(ValidationError::Invalid("ttl"));
        }
    }
    Ok(())
}
