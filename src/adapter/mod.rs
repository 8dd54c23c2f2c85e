/*!
Protocol adapters: one per injected-provider protocol.

Every chain family speaks its own dialect (CIP-30 `enable()`, EIP-1193
`request`, Solana `connect()`). The adapters wrap them behind
[`ProtocolAdapter`] and [`RawApi`] so the [`ConnectionManager`] drives them
all the same way, and normalize the errors the wallets throw into
[`EnableError`].

[`ConnectionManager`]: crate::ConnectionManager
*/

pub mod cip30;
pub mod cip95;
pub mod evm;
pub mod solana;

use crate::{
    address::RawAddress,
    config::BridgeConfig,
    error::{APIError, APIErrorCode, EnableError, ProviderRpcError},
    host::{ListenerGuard, ProviderObject},
    network::{ChainFamily, Network},
};
use serde_json::Value;
use std::rc::Rc;

pub use self::{
    cip30::{Cip30Api, CardanoAdapter},
    cip95::{BridgeApi, BridgeWallet, Cip95Adapter, Cip95Bridge},
    evm::{EvmAdapter, EvmApi},
    solana::{SolanaAdapter, SolanaApi},
};

/// Something the wallet told us after the connection was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// `None` when the wallet no longer exposes any account
    AccountChanged(Option<RawAddress>),
    NetworkChanged(Network),
}

pub type EventSink = Rc<dyn Fn(ProviderEvent)>;

#[async_trait::async_trait(?Send)]
pub trait ProtocolAdapter {
    fn wallet_id(&self) -> &str;

    fn family(&self) -> ChainFamily;

    /// ask the wallet for access, may prompt the user
    async fn enable(&self) -> Result<Box<dyn RawApi>, EnableError>;

    fn supports_disconnect(&self) -> bool {
        false
    }

    async fn disconnect(&self) -> Result<(), EnableError> {
        Ok(())
    }
}

/// The API object a wallet hands over once enabled.
#[async_trait::async_trait(?Send)]
pub trait RawApi {
    /// the post-connection members this API fails to expose
    fn missing_methods(&self) -> Vec<String>;

    /// the negotiation step: every post-connection member is there, or the
    /// whole list of those missing
    fn ensure_complete(&self) -> Result<(), EnableError> {
        let missing = self.missing_methods();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EnableError::Compliance(missing))
        }
    }

    async fn network(&self) -> Result<Network, EnableError>;

    /// the account address, as the wallet returned it
    async fn raw_address(&self) -> Result<RawAddress, EnableError>;

    /// forward the account and network changes of the wallet to `sink` until
    /// the guards are dropped
    fn watch(&self, _sink: EventSink) -> Vec<ListenerGuard> {
        Vec::new()
    }
}

/// build the adapter of the wallet `wallet_id`
pub fn adapter_for(
    family: ChainFamily,
    wallet_id: &str,
    provider: Rc<dyn ProviderObject>,
    bridge: Option<Rc<Cip95Bridge>>,
    config: &BridgeConfig,
) -> Rc<dyn ProtocolAdapter> {
    match family {
        ChainFamily::Cardano => {
            let bridge = bridge.map(|bridge| Cip95Adapter::new(wallet_id, bridge));
            Rc::new(CardanoAdapter::new(wallet_id, provider, bridge))
        }
        ChainFamily::Evm => Rc::new(EvmAdapter::new(wallet_id, provider, config.evm_chains())),
        ChainFamily::Solana => Rc::new(SolanaAdapter::new(wallet_id, provider)),
    }
}

/// the functions of `required` `object` does not expose
pub(crate) fn missing_functions(object: &dyn ProviderObject, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !object.has_function(name))
        .map(|name| (*name).to_owned())
        .collect()
}

/// the entry point of a provider, gone if the extension was disabled since
/// discovery
pub(crate) fn require_function(object: &dyn ProviderObject, name: &str) -> Result<(), EnableError> {
    if object.has_function(name) {
        Ok(())
    } else {
        Err(EnableError::Unavailable(format!("`{name}' is missing")))
    }
}

/// normalize whatever a provider threw
pub(crate) fn enable_error(error: Value) -> EnableError {
    if let Ok(error) = serde_json::from_value::<APIError>(error.clone()) {
        return match error.code {
            APIErrorCode::Refused => EnableError::Rejected(error.info),
            _ => EnableError::Internal(error.to_string()),
        };
    }

    if let Ok(error) = serde_json::from_value::<ProviderRpcError>(error.clone()) {
        return if error.is_user_rejection() {
            EnableError::Rejected(error.message)
        } else {
            EnableError::Internal(error.to_string())
        };
    }

    let message = match &error {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    };
    if looks_like_rejection(&message) {
        EnableError::Rejected(message)
    } else {
        EnableError::Internal(message)
    }
}

fn looks_like_rejection(message: &str) -> bool {
    let message = message.to_lowercase();
    ["reject", "declin", "denied", "cancel"]
        .iter()
        .any(|word| message.contains(word))
}

/// the first non empty string of a JSON array
pub(crate) fn first_address(addresses: &Value) -> Option<String> {
    addresses
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find(|address| !address.is_empty())
        .map(str::to_owned)
}
