use crate::network::{ChainFamily, Network};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// The connection of one chain family to one wallet.
///
/// Only the [`ConnectionManager`](crate::ConnectionManager) creates and
/// mutates sessions, callers get copies. When `state` is
/// [`ConnectionState::Connected`] the `canonical_address` is set and passes
/// the address validator of the chain family.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    pub wallet_id: String,
    pub chain_family: ChainFamily,
    pub canonical_address: Option<String>,
    pub network: Option<Network>,
    pub state: ConnectionState,
    /// number of failed attempts of the current (or last) connection
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl ConnectionSession {
    pub(crate) fn connecting(wallet_id: &str, chain_family: ChainFamily) -> Self {
        Self {
            wallet_id: wallet_id.to_owned(),
            chain_family,
            canonical_address: None,
            network: None,
            state: ConnectionState::Connecting,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// One attempt of a connection, out of `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempt {
    pub number: u32,
    pub limit: u32,
}

impl Attempt {
    pub fn first(limit: u32) -> Self {
        Self {
            number: 1,
            limit: limit.max(1),
        }
    }

    /// `None` once every attempt was used
    pub fn next(self) -> Option<Self> {
        (self.number < self.limit).then(|| Self {
            number: self.number + 1,
            ..self
        })
    }

    /// attempts that failed before this one
    pub fn failures(&self) -> u32 {
        self.number - 1
    }
}
