//! Error taxonomy shared by the wallet session and the ledger reader.
//!
//! Provider errors arrive as duck-typed objects carrying a numeric `code`.
//! They are decoded exactly once, in [`ProviderError::from_rpc_error`], and the
//! original object is kept inside the variant so callers can still inspect it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// EIP-1193 code for "the user rejected the request".
pub const USER_REJECTED_CODE: i64 = 4001;
/// Wallet code for "unrecognized chain id" returned by `wallet_switchEthereumChain`.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Raw error object as reported by a wallet or a JSON-RPC endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// No injected wallet provider was found at call time.
    #[error("no injected wallet provider detected")]
    ProviderMissing,

    /// The wallet does not know the requested chain (code 4902).
    #[error("wallet does not recognize the target network (code {}): {}", .raw.code, .raw.message)]
    NetworkUnrecognized { raw: RpcErrorObject },

    /// The user declined an account or transaction request.
    #[error("request rejected by user (code {}): {}", .raw.code, .raw.message)]
    UserRejected { raw: RpcErrorObject },

    /// Any other provider or RPC failure.
    #[error("provider request failed (code {}): {}", .raw.code, .raw.message)]
    TransportFailure { raw: RpcErrorObject },

    /// The provider answered, but the payload could not be interpreted.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn from_rpc_error(raw: RpcErrorObject) -> Self {
        match raw.code {
            UNRECOGNIZED_CHAIN_CODE => Self::NetworkUnrecognized { raw },
            USER_REJECTED_CODE => Self::UserRejected { raw },
            _ => Self::TransportFailure { raw },
        }
    }

    /// Builds a transport failure that did not come with a provider code.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            raw: RpcErrorObject::new(-32603, message),
        }
    }

    /// The provider's numeric code, preserved unchanged.
    pub fn code(&self) -> Option<i64> {
        self.raw().map(|raw| raw.code)
    }

    pub fn raw(&self) -> Option<&RpcErrorObject> {
        match self {
            Self::NetworkUnrecognized { raw }
            | Self::UserRejected { raw }
            | Self::TransportFailure { raw } => Some(raw),
            Self::ProviderMissing | Self::MalformedResponse(_) => None,
        }
    }

    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Self::UserRejected { .. })
    }
}

/// Failure of the session-scoped key-value store. Never leaves the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("session storage is unavailable: {0}")]
    Unavailable(String),
    #[error("session storage quota exceeded")]
    QuotaExceeded,
}
