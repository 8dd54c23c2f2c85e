use super::{
    EventSink, ProtocolAdapter, ProviderEvent, RawApi, enable_error, first_address,
    missing_functions, require_function,
};
use crate::{
    address::RawAddress,
    error::EnableError,
    host::{ListenerGuard, ProviderObject},
    network::{ChainFamily, EvmChainPolicy, Network, parse_chain_id},
};
use serde_json::{Value, json};
use std::rc::Rc;
use tracing::debug;

pub const PROVIDER_FUNCTIONS: [&str; 1] = ["request"];
pub const REQUIRED_METHODS: [&str; 3] = ["request", "on", "removeListener"];

/// EIP-1193 `request({ method })`
async fn request(provider: &dyn ProviderObject, method: &str) -> Result<Value, EnableError> {
    let result = provider
        .call("request", vec![json!({ "method": method })])
        .await
        .map_err(enable_error)?;
    Ok(result.json().unwrap_or(Value::Null))
}

fn chain_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(chain_id) => parse_chain_id(chain_id),
        other => other.as_u64(),
    }
}

pub struct EvmAdapter {
    wallet_id: String,
    provider: Rc<dyn ProviderObject>,
    chains: EvmChainPolicy,
}

impl EvmAdapter {
    pub fn new(wallet_id: &str, provider: Rc<dyn ProviderObject>, chains: EvmChainPolicy) -> Self {
        Self {
            wallet_id: wallet_id.to_owned(),
            provider,
            chains,
        }
    }
}

#[async_trait::async_trait(?Send)]
impl ProtocolAdapter for EvmAdapter {
    fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    async fn enable(&self) -> Result<Box<dyn RawApi>, EnableError> {
        require_function(&*self.provider, "request")?;
        let accounts = request(&*self.provider, "eth_requestAccounts").await?;

        Ok(Box::new(EvmApi {
            provider: Rc::clone(&self.provider),
            chains: self.chains.clone(),
            account: first_address(&accounts),
        }))
    }
}

pub struct EvmApi {
    provider: Rc<dyn ProviderObject>,
    chains: EvmChainPolicy,
    /// first account granted by `eth_requestAccounts`
    account: Option<String>,
}

#[async_trait::async_trait(?Send)]
impl RawApi for EvmApi {
    fn missing_methods(&self) -> Vec<String> {
        missing_functions(&*self.provider, &REQUIRED_METHODS)
    }

    async fn network(&self) -> Result<Network, EnableError> {
        let value = request(&*self.provider, "eth_chainId").await?;
        chain_id(&value)
            .map(|id| self.chains.network(id))
            .ok_or_else(|| EnableError::Internal(format!("invalid chain id `{value}'")))
    }

    async fn raw_address(&self) -> Result<RawAddress, EnableError> {
        if let Some(account) = &self.account {
            return Ok(RawAddress::evm(account.clone()));
        }

        let accounts = request(&*self.provider, "eth_accounts").await?;
        first_address(&accounts)
            .map(RawAddress::evm)
            .ok_or_else(|| EnableError::Internal("the wallet granted no account".to_owned()))
    }

    fn watch(&self, sink: EventSink) -> Vec<ListenerGuard> {
        let accounts = Rc::clone(&sink);
        let accounts_changed = self.provider.listen(
            "accountsChanged",
            Rc::new(move |accounts_value: Value| {
                accounts(ProviderEvent::AccountChanged(
                    first_address(&accounts_value).map(RawAddress::evm),
                ))
            }),
        );

        let chains = self.chains.clone();
        let chain_changed = self.provider.listen(
            "chainChanged",
            Rc::new(move |value: Value| match chain_id(&value) {
                Some(id) => sink(ProviderEvent::NetworkChanged(chains.network(id))),
                None => debug!(%value, "ignoring unexpected chain id"),
            }),
        );

        accounts_changed.into_iter().chain(chain_changed).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::EvmChain,
        testing::{FakeObject, Reply, evm_provider},
    };
    use std::cell::RefCell;

    const ACCOUNT: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

    fn adapter(provider: Rc<FakeObject>) -> EvmAdapter {
        EvmAdapter::new("metamask", provider, EvmChainPolicy::new(["0x89", "0x13881"]))
    }

    #[tokio::test]
    async fn polygon() {
        let provider = evm_provider("isMetaMask", json!([ACCOUNT]), "0x89").build();
        let api = adapter(Rc::clone(&provider)).enable().await.ok().unwrap();

        assert!(api.missing_methods().is_empty());
        assert_eq!(api.raw_address().await.unwrap(), RawAddress::evm(ACCOUNT));
        assert_eq!(
            api.network().await.unwrap(),
            Network::Evm {
                chain_id: 137,
                chain: EvmChain::Polygon
            }
        );
        assert_eq!(
            provider.calls("request")[0],
            [json!({ "method": "eth_requestAccounts" })]
        );
    }

    #[tokio::test]
    async fn user_rejection() {
        let provider = FakeObject::new()
            .function(
                "request",
                Reply::Error(json!({ "code": 4001, "message": "User rejected the request." })),
            )
            .build();

        let error = adapter(provider).enable().await.err().unwrap();
        assert_eq!(
            error,
            EnableError::Rejected("User rejected the request.".to_owned())
        );
    }

    #[tokio::test]
    async fn empty_grant_falls_back_to_accounts() {
        let provider = FakeObject::new()
            .function(
                "request",
                Reply::rpc([
                    ("eth_requestAccounts", Reply::Value(json!([]))),
                    ("eth_accounts", Reply::Value(json!([ACCOUNT]))),
                ]),
            )
            .build();

        let api = adapter(provider).enable().await.ok().unwrap();
        assert_eq!(api.raw_address().await.unwrap(), RawAddress::evm(ACCOUNT));
        assert_eq!(
            api.missing_methods(),
            ["on".to_owned(), "removeListener".to_owned()]
        );
    }

    #[tokio::test]
    async fn forwards_provider_events() {
        let provider = evm_provider("isMetaMask", json!([ACCOUNT]), "0x1").build();
        let api = adapter(Rc::clone(&provider)).enable().await.ok().unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let guards = api.watch(Rc::new(move |event| sink.borrow_mut().push(event)));
        assert_eq!(guards.len(), 2);

        provider.emit("chainChanged", json!("0x13881"));
        provider.emit("accountsChanged", json!([]));

        assert_eq!(
            *events.borrow(),
            [
                ProviderEvent::NetworkChanged(Network::Evm {
                    chain_id: 80001,
                    chain: EvmChain::Polygon
                }),
                ProviderEvent::AccountChanged(None),
            ]
        );

        drop(guards);
        assert_eq!(provider.listener_count("accountsChanged"), 0);
        assert_eq!(provider.listener_count("chainChanged"), 0);
    }
}
