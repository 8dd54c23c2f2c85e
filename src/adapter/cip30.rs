use super::{
    Cip95Adapter, ProtocolAdapter, RawApi, enable_error, first_address, missing_functions,
    require_function,
};
use crate::{
    address::RawAddress,
    error::EnableError,
    host::ProviderObject,
    network::{ChainFamily, Network, NetworkId},
};
use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

/// functions every `window.cardano.<wallet>` object must have
pub const PROVIDER_FUNCTIONS: [&str; 2] = ["enable", "isEnabled"];
/// string properties every `window.cardano.<wallet>` object must have
pub const PROVIDER_PROPERTIES: [&str; 2] = ["apiVersion", "name"];

/// the full API returned by `enable()`
pub const REQUIRED_METHODS: [&str; 10] = [
    "getNetworkId",
    "getUtxos",
    "getBalance",
    "getUsedAddresses",
    "getUnusedAddresses",
    "getChangeAddress",
    "getRewardAddresses",
    "signTx",
    "signData",
    "submitTx",
];

/// check the members a CIP-30 wallet must expose before we even try to
/// enable it
pub fn looks_like_cip30_wallet(provider: &dyn ProviderObject) -> bool {
    missing_functions(provider, &PROVIDER_FUNCTIONS).is_empty()
        && PROVIDER_PROPERTIES
            .iter()
            .all(|property| provider.string(property).is_some())
}

pub struct CardanoAdapter {
    wallet_id: String,
    provider: Rc<dyn ProviderObject>,
    bridge: Option<Cip95Adapter>,
}

impl CardanoAdapter {
    pub fn new(wallet_id: &str, provider: Rc<dyn ProviderObject>, bridge: Option<Cip95Adapter>) -> Self {
        Self {
            wallet_id: wallet_id.to_owned(),
            provider,
            bridge,
        }
    }
}

#[async_trait::async_trait(?Send)]
impl ProtocolAdapter for CardanoAdapter {
    fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Cardano
    }

    async fn enable(&self) -> Result<Box<dyn RawApi>, EnableError> {
        if let Some(bridge) = &self.bridge {
            if let Some(api) = bridge.enable().await? {
                return Ok(Box::new(api));
            }
            debug!(wallet = %self.wallet_id, "falling back to CIP-30");
        }

        require_function(&*self.provider, "enable")?;
        let api = self
            .provider
            .call("enable", Vec::new())
            .await
            .map_err(enable_error)?;

        Ok(Box::new(Cip30Api { api }))
    }
}

/// The object returned by a CIP-30 `enable()`.
pub struct Cip30Api {
    api: Rc<dyn ProviderObject>,
}

impl Cip30Api {
    async fn query(&self, method: &str) -> Result<Value, EnableError> {
        let result = self
            .api
            .call(method, Vec::new())
            .await
            .map_err(enable_error)?;
        Ok(result.json().unwrap_or(Value::Null))
    }
}

#[async_trait::async_trait(?Send)]
impl RawApi for Cip30Api {
    fn missing_methods(&self) -> Vec<String> {
        missing_functions(&*self.api, &REQUIRED_METHODS)
    }

    async fn network(&self) -> Result<Network, EnableError> {
        let id = self.query("getNetworkId").await?;
        id.as_u64()
            .and_then(|id| u8::try_from(id).ok())
            .map(|id| Network::Cardano(NetworkId::from(id)))
            .ok_or_else(|| EnableError::Internal(format!("invalid network id `{id}'")))
    }

    /// used addresses first, then unused addresses, then the change address
    async fn raw_address(&self) -> Result<RawAddress, EnableError> {
        for method in ["getUsedAddresses", "getUnusedAddresses"] {
            if let Some(address) = first_address(&self.query(method).await?) {
                return Ok(RawAddress::cardano(address));
            }
        }

        match self.query("getChangeAddress").await? {
            Value::String(address) if !address.is_empty() => Ok(RawAddress::cardano(address)),
            _ => Err(EnableError::Internal(
                "the wallet returned no address".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeObject, base_address_hex, cip30_api, cip30_wallet};
    use serde_json::json;

    #[test]
    fn pre_connection_members() {
        let wallet = cip30_wallet("eternl", cip30_api(json!([])));
        assert!(looks_like_cip30_wallet(&wallet));

        let no_name = FakeObject::new()
            .value("apiVersion", json!("1.0.0"))
            .returns("enable", json!({}))
            .returns("isEnabled", json!(false));
        assert!(!looks_like_cip30_wallet(&no_name));

        let no_is_enabled = FakeObject::new()
            .value("name", json!("nami"))
            .value("apiVersion", json!("1.0.0"))
            .returns("enable", json!({}));
        assert!(!looks_like_cip30_wallet(&no_is_enabled));
    }

    #[tokio::test]
    async fn address_resolution_order() {
        let used = Rc::new(
            cip30_api(json!([]))
                .returns("getUnusedAddresses", json!(["", "unused"])),
        );
        let api = Cip30Api {
            api: Rc::clone(&used) as Rc<dyn ProviderObject>,
        };
        assert_eq!(api.raw_address().await.unwrap(), RawAddress::cardano("unused"));
        assert_eq!(used.call_count("getChangeAddress"), 0);

        let api = Cip30Api {
            api: cip30_api(json!([])).build(),
        };
        assert_eq!(
            api.raw_address().await.unwrap(),
            RawAddress::cardano(base_address_hex())
        );

        let api = Cip30Api {
            api: cip30_api(json!(["used"])).build(),
        };
        assert_eq!(api.raw_address().await.unwrap(), RawAddress::cardano("used"));
    }

    #[tokio::test]
    async fn missing_api_methods() {
        let api = Cip30Api {
            api: FakeObject::new()
                .returns("getNetworkId", json!(0))
                .returns("getUsedAddresses", json!([]))
                .build(),
        };

        assert_eq!(
            api.missing_methods(),
            [
                "getUtxos",
                "getBalance",
                "getUnusedAddresses",
                "getChangeAddress",
                "getRewardAddresses",
                "signTx",
                "signData",
                "submitTx"
            ]
        );
        assert_eq!(
            api.ensure_complete(),
            Err(EnableError::Compliance(api.missing_methods()))
        );
        assert_eq!(
            api.network().await.unwrap(),
            Network::Cardano(NetworkId::Testing)
        );
    }

    #[tokio::test]
    async fn refused_enable() {
        let wallet = FakeObject::new()
            .value("name", json!("nami"))
            .value("apiVersion", json!("1.0.0"))
            .returns("isEnabled", json!(false))
            .fails("enable", json!({ "code": -3, "info": "user declined" }))
            .build();

        let adapter = CardanoAdapter::new("nami", wallet, None);
        let error = adapter.enable().await.err().unwrap();
        assert_eq!(error, EnableError::Rejected("user declined".to_owned()));
    }

    #[tokio::test]
    async fn uninstalled_since_discovery() {
        let wallet = FakeObject::new()
            .value("name", json!("nami"))
            .value("apiVersion", json!("1.0.0"))
            .build();

        let adapter = CardanoAdapter::new("nami", Rc::clone(&wallet) as Rc<dyn ProviderObject>, None);
        assert!(matches!(
            adapter.enable().await.err(),
            Some(EnableError::Unavailable(_))
        ));
        assert_eq!(wallet.call_count("enable"), 0);
    }
}
