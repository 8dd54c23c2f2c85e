use crate::network::ChainFamily;
use std::time::Duration;

/// Error codes a CIP-30 wallet attaches to its `APIError` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum APIErrorCode {
    #[error("Invalid inputs.")]
    InvalidRequest,
    #[error("An error occured during the execution of this API call.")]
    InternalError,
    #[error("The request was denied. The wallet may be disconnected.")]
    Refused,
    /// If this error happens we might need to re-authenticate.
    #[error("The account has changed.")]
    AccountChange,
    #[error("Unknown error code `{0}'")]
    Unknown(i64),
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error, serde::Deserialize,
)]
#[error("{code}. {info}.")]
pub struct APIError {
    pub code: APIErrorCode,
    pub info: String,
}

/// Error object thrown by EIP-1193 (and Solana-style) providers.
///
/// Only the numeric `code` matters to us: `4001` is the standard
/// "user rejected the request" code, shared by most Solana wallets too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error, serde::Deserialize)]
#[error("{message} (code {code})")]
pub struct ProviderRpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ProviderRpcError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;

    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED || self.code == Self::UNAUTHORIZED
    }
}

/// Every decoding strategy failed for a wallet-returned address.
///
/// The original string is kept so the caller can decide whether to carry on
/// with the unvalidated value or abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not decode address `{original}': {reason}")]
pub struct AddressDecodingError {
    pub original: String,
    pub reason: String,
}

impl AddressDecodingError {
    pub(crate) fn new(original: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            reason: reason.into(),
        }
    }

    /// give back the undecoded value as the wallet returned it
    pub fn into_original(self) -> String {
        self.original
    }
}

/// Failures of a protocol adapter, normalized across chain families.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnableError {
    #[error("The user declined the request: {0}")]
    Rejected(String),
    #[error("The wallet provider is not available: {0}")]
    Unavailable(String),
    #[error("The wallet does not implement `{}'", .0.join("', `"))]
    Compliance(Vec<String>),
    #[error("{0}")]
    Internal(String),
}

/// Errors returned by [`ConnectionManager::connect`].
///
/// Every one of them is also published as an `ERROR` event.
///
/// [`ConnectionManager::connect`]: crate::ConnectionManager::connect
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("No {family} wallet `{wallet}' was found")]
    WalletNotFound { wallet: String, family: ChainFamily },
    #[error("Wallet `{wallet}' does not implement `{}'", .missing.join("', `"))]
    ProtocolCompliance { wallet: String, missing: Vec<String> },
    #[error("Wallet `{wallet}' did not answer within {after:?}")]
    ConnectionTimeout { wallet: String, after: Duration },
    #[error("Connection to `{wallet}' was rejected: {reason}")]
    ConnectionRejected { wallet: String, reason: String },
    #[error("A {family} connection is already in progress")]
    ConcurrentConnection { family: ChainFamily },
    #[error(transparent)]
    AddressDecoding(#[from] AddressDecodingError),
    #[error("Gave up on `{wallet}' after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        wallet: String,
        attempts: u32,
        #[source]
        last: Box<ConnectError>,
    },
    #[error("Wallet `{wallet}' failed: {reason}")]
    ProviderFailure { wallet: String, reason: String },
}

impl ConnectError {
    pub(crate) fn from_enable(wallet: &str, error: EnableError) -> Self {
        let wallet = wallet.to_owned();
        match error {
            EnableError::Rejected(reason) => Self::ConnectionRejected { wallet, reason },
            EnableError::Compliance(missing) => Self::ProtocolCompliance { wallet, missing },
            EnableError::Unavailable(reason) | EnableError::Internal(reason) => {
                Self::ProviderFailure { wallet, reason }
            }
        }
    }

    /// Transient failures are worth another attempt. A non-compliant wallet,
    /// a missing wallet or a concurrent call will not get better by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. }
            | Self::ConnectionRejected { .. }
            | Self::AddressDecoding(_)
            | Self::ProviderFailure { .. } => true,
            Self::WalletNotFound { .. }
            | Self::ProtocolCompliance { .. }
            | Self::ConcurrentConnection { .. }
            | Self::MaxRetriesExceeded { .. } => false,
        }
    }

    /// the error that ended the last attempt, looking through
    /// [`ConnectError::MaxRetriesExceeded`]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::MaxRetriesExceeded { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// name of the error class, as published in `ERROR` events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WalletNotFound { .. } => "WalletNotFoundError",
            Self::ProtocolCompliance { .. } => "ProtocolComplianceError",
            Self::ConnectionTimeout { .. } => "ConnectionTimeoutError",
            Self::ConnectionRejected { .. } => "ConnectionRejectedError",
            Self::ConcurrentConnection { .. } => "ConcurrentConnectionError",
            Self::AddressDecoding(_) => "AddressDecodingError",
            Self::MaxRetriesExceeded { .. } => "MaxRetriesExceededError",
            Self::ProviderFailure { .. } => "ProviderFailureError",
        }
    }
}

/// Returned by event handlers to signal they could not process an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Connection store failure: {0}")]
pub struct StoreError(pub String);

impl<'de> serde::Deserialize<'de> for APIErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = APIErrorCode;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "Expecting an integer APIErrorCode")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    -1 => Ok(APIErrorCode::InvalidRequest),
                    -2 => Ok(APIErrorCode::InternalError),
                    -3 => Ok(APIErrorCode::Refused),
                    -4 => Ok(APIErrorCode::AccountChange),
                    unknown => Ok(APIErrorCode::Unknown(unknown)),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let v = i64::try_from(v).map_err(E::custom)?;
                self.visit_i64(v)
            }
        }

        deserializer.deserialize_i64(Visitor)
    }
}
