use super::{
    EventSink, ProtocolAdapter, ProviderEvent, RawApi, enable_error, missing_functions,
    require_function,
};
use crate::{
    address::RawAddress,
    error::EnableError,
    host::{ListenerGuard, ProviderObject},
    network::{ChainFamily, Network},
};
use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

pub const PROVIDER_FUNCTIONS: [&str; 1] = ["connect"];
pub const REQUIRED_METHODS: [&str; 2] = ["signTransaction", "signMessage"];

/// read a `PublicKey`, either already a string or an object whose
/// `toString()` gives the base58 form
async fn public_key(key: &dyn ProviderObject) -> Option<String> {
    if let Some(Value::String(key)) = key.json() {
        return Some(key);
    }
    let text = key.call("toString", Vec::new()).await.ok()?.json()?;
    text.as_str().map(str::to_owned)
}

pub struct SolanaAdapter {
    wallet_id: String,
    provider: Rc<dyn ProviderObject>,
}

impl SolanaAdapter {
    pub fn new(wallet_id: &str, provider: Rc<dyn ProviderObject>) -> Self {
        Self {
            wallet_id: wallet_id.to_owned(),
            provider,
        }
    }
}

#[async_trait::async_trait(?Send)]
impl ProtocolAdapter for SolanaAdapter {
    fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    async fn enable(&self) -> Result<Box<dyn RawApi>, EnableError> {
        require_function(&*self.provider, "connect")?;

        // a stale grant from a previous page would skip the prompt but may
        // point to another account
        if self.supports_disconnect() {
            if let Err(error) = self.provider.call("disconnect", Vec::new()).await {
                debug!(wallet = %self.wallet_id, %error, "could not reset the wallet permissions");
            }
        }

        let connected = self
            .provider
            .call("connect", Vec::new())
            .await
            .map_err(enable_error)?;

        Ok(Box::new(SolanaApi {
            provider: Rc::clone(&self.provider),
            connected,
        }))
    }

    fn supports_disconnect(&self) -> bool {
        self.provider.has_function("disconnect")
    }

    async fn disconnect(&self) -> Result<(), EnableError> {
        self.provider
            .call("disconnect", Vec::new())
            .await
            .map(|_| ())
            .map_err(enable_error)
    }
}

pub struct SolanaApi {
    provider: Rc<dyn ProviderObject>,
    /// the value `connect()` resolved with, `{ publicKey }` for most wallets
    connected: Rc<dyn ProviderObject>,
}

#[async_trait::async_trait(?Send)]
impl RawApi for SolanaApi {
    fn missing_methods(&self) -> Vec<String> {
        missing_functions(&*self.provider, &REQUIRED_METHODS)
    }

    async fn network(&self) -> Result<Network, EnableError> {
        Ok(Network::Solana)
    }

    async fn raw_address(&self) -> Result<RawAddress, EnableError> {
        for holder in [&self.connected, &self.provider] {
            if let Some(key) = holder.get("publicKey") {
                if let Some(key) = public_key(&*key).await {
                    return Ok(RawAddress::solana(key));
                }
            }
        }

        Err(EnableError::Internal(
            "the wallet exposes no public key".to_owned(),
        ))
    }

    fn watch(&self, sink: EventSink) -> Vec<ListenerGuard> {
        self.provider
            .listen(
                "accountChanged",
                Rc::new(move |key: Value| {
                    let key = key.as_str().map(RawAddress::solana);
                    sink(ProviderEvent::AccountChanged(key))
                }),
            )
            .into_iter()
            .collect()
    }
}
