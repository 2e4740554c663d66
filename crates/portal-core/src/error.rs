//! Error types for request routing and signing

use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the external signing capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SigningError {
    /// Signer-specific error code, if any
    pub code: Option<String>,
    /// Human-readable description
    pub message: String,
}

impl SigningError {
    /// Create a signing error without a code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Attach a signer-specific error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Errors that can occur while routing a wallet request
#[derive(Debug, Error)]
pub enum Error {
    // ============ Classification Errors ============
    /// Method matches none of the signer, wallet or gateway buckets
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    // ============ Approval Errors ============
    /// Approval required but nothing listens for signing requests
    #[error("No binding for approval of {0}")]
    NoBindingForApproval(String),

    /// The user (or host app) rejected the request
    #[error("User rejected request {0}")]
    UserRejectedRequest(String),

    /// The approval wait ended without a decision
    #[error("Approval cancelled for request {0}")]
    ApprovalCancelled(String),

    // ============ Collaborator Errors ============
    /// Failure from the signing capability, passed through unchanged
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// Chain gateway request failed
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Wallet-config endpoint request failed
    #[error("Wallet endpoint error: {0}")]
    WalletEndpoint(String),

    /// No signing share available
    #[error("Share not found: {0}")]
    ShareNotFound(String),

    // ============ Configuration Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ============ Internal Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Event handler failure
    #[error("Handler error: {0}")]
    Handler(String),
}

impl Error {
    /// Check if this error is an approval outcome rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::UserRejectedRequest(_) | Error::ApprovalCancelled(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Gateway(_) | Error::WalletEndpoint(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
