use crate::{
    adapter::{Cip95Bridge, cip30, evm, solana},
    config::BridgeConfig,
    events::{EventBus, EventKind},
    host::{AssetResolver, Host, ProviderObject, Runtime, WalletSource},
    network::ChainFamily,
};
use serde_json::json;
use std::{collections::BTreeMap, rc::Rc, time::Duration};
use tracing::debug;

/// A CIP extension a wallet advertises in `supportedExtensions`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize, serde::Serialize,
)]
pub struct Extension {
    pub cip: u64,
}

impl Extension {
    pub const CIP95: Self = Self { cip: 95 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub struct Capabilities {
    pub cip30: bool,
    pub cip95: bool,
}

/// A wallet found in the page, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletProviderDescriptor {
    /// what to pass to [`ConnectionManager::connect`](crate::ConnectionManager::connect)
    pub id: String,
    pub display_name: String,
    pub chain_family: ChainFamily,
    pub capabilities: Capabilities,
    pub icon_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// `flag` set on an injected EVM provider, and the id we give it
const EVM_FLAGS: [(&str, &str); 4] = [
    ("isMetaMask", "metamask"),
    ("isCoinbaseWallet", "coinbase"),
    ("isRabby", "rabby"),
    ("isBraveWallet", "brave"),
];

const SOLANA_FLAGS: [(&str, &str); 3] = [
    ("isPhantom", "phantom"),
    ("isSolflare", "solflare"),
    ("isBackpack", "backpack"),
];

const DISPLAY_NAMES: [(&str, &str); 7] = [
    ("metamask", "MetaMask"),
    ("coinbase", "Coinbase Wallet"),
    ("rabby", "Rabby"),
    ("brave", "Brave Wallet"),
    ("phantom", "Phantom"),
    ("solflare", "Solflare"),
    ("backpack", "Backpack"),
];

/// check the pre-connection members of a provider
pub fn is_compliant(family: ChainFamily, provider: &dyn ProviderObject) -> bool {
    match family {
        ChainFamily::Cardano => cip30::looks_like_cip30_wallet(provider),
        ChainFamily::Evm => evm::PROVIDER_FUNCTIONS
            .iter()
            .all(|name| provider.has_function(name)),
        ChainFamily::Solana => solana::PROVIDER_FUNCTIONS
            .iter()
            .all(|name| provider.has_function(name)),
    }
}

/// the id of a provider found under the namespace `key`
pub fn provider_id(family: ChainFamily, key: &str, provider: &dyn ProviderObject) -> String {
    let flags: &[(&str, &str)] = match family {
        ChainFamily::Cardano => &[],
        ChainFamily::Evm => &EVM_FLAGS,
        ChainFamily::Solana => &SOLANA_FLAGS,
    };

    flags
        .iter()
        .find(|(flag, _)| provider.flag(flag))
        .map(|(_, id)| (*id).to_owned())
        .unwrap_or_else(|| key.to_owned())
}

fn supports_cip95(provider: &dyn ProviderObject) -> bool {
    provider
        .get("supportedExtensions")
        .and_then(|extensions| extensions.json())
        .and_then(|extensions| serde_json::from_value::<Vec<Extension>>(extensions).ok())
        .is_some_and(|extensions| extensions.contains(&Extension::CIP95))
}

/// Enumerates the wallet providers injected in the page.
///
/// Extensions inject their provider asynchronously, sometimes after the page
/// finished loading, so an empty scan is retried at a fixed interval for a
/// bounded number of times before concluding there is nothing.
pub struct WalletDiscovery {
    source: Rc<dyn WalletSource>,
    runtime: Rc<dyn Runtime>,
    assets: Option<Rc<dyn AssetResolver>>,
    events: Rc<EventBus>,
    bridge: Option<Rc<Cip95Bridge>>,
    poll_interval: Duration,
    polls: u32,
}

impl WalletDiscovery {
    pub fn new(
        host: &Host,
        events: Rc<EventBus>,
        bridge: Option<Rc<Cip95Bridge>>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            source: Rc::clone(&host.source),
            runtime: Rc::clone(&host.runtime),
            assets: host.assets.clone(),
            events,
            bridge,
            poll_interval: config.discovery_poll_interval(),
            polls: config.discovery_polls(),
        }
    }

    /// list the compliant providers of `family`, sorted by id
    ///
    /// Never fails: providers missing a required member are left out and an
    /// empty list means no wallet was found.
    pub async fn discover(&self, family: ChainFamily) -> Vec<WalletProviderDescriptor> {
        let mut found = self.scan(family);
        let mut poll = 0;
        while found.is_empty() && poll < self.polls {
            self.runtime.sleep(self.poll_interval).await;
            found = self.scan(family);
            poll += 1;
        }

        let announced = match (&self.bridge, family) {
            (Some(bridge), ChainFamily::Cardano) if !found.is_empty() => bridge.discover().await,
            _ => Vec::new(),
        };

        let descriptors: Vec<_> = found
            .into_iter()
            .map(|(id, provider)| {
                let bridged = announced.iter().any(|wallet| wallet.id == id);
                self.describe(family, id, &*provider, bridged)
            })
            .collect();

        debug!(%family, wallets = descriptors.len(), "discovery done");
        self.events.emit(
            EventKind::Discovery,
            json!({
                "chainFamily": family,
                "wallets": descriptors.iter().map(|wallet| &wallet.id).collect::<Vec<_>>(),
            }),
        );

        descriptors
    }

    /// the live provider object of the wallet `wallet_id`, polling like
    /// [`WalletDiscovery::discover`] does
    pub async fn find(&self, family: ChainFamily, wallet_id: &str) -> Option<Rc<dyn ProviderObject>> {
        let mut poll = 0;
        loop {
            if let Some(provider) = self.scan(family).remove(wallet_id) {
                return Some(provider);
            }
            if poll >= self.polls {
                return None;
            }
            self.runtime.sleep(self.poll_interval).await;
            poll += 1;
        }
    }

    /// compliant providers by id, first one found wins
    fn scan(&self, family: ChainFamily) -> BTreeMap<String, Rc<dyn ProviderObject>> {
        let mut found = BTreeMap::new();
        for (key, provider) in self.source.injected(family) {
            if !is_compliant(family, &*provider) {
                debug!(%family, key = %key, "skipping provider missing required members");
                continue;
            }
            let id = provider_id(family, &key, &*provider);
            found.entry(id).or_insert(provider);
        }
        found
    }

    fn describe(
        &self,
        family: ChainFamily,
        id: String,
        provider: &dyn ProviderObject,
        bridged: bool,
    ) -> WalletProviderDescriptor {
        let display_name = provider
            .string("name")
            .or_else(|| {
                DISPLAY_NAMES
                    .iter()
                    .find(|(known, _)| *known == id)
                    .map(|(_, name)| (*name).to_owned())
            })
            .unwrap_or_else(|| id.clone());

        let capabilities = match family {
            ChainFamily::Cardano => Capabilities {
                cip30: true,
                cip95: bridged || supports_cip95(provider),
            },
            ChainFamily::Evm | ChainFamily::Solana => Capabilities::default(),
        };

        let icon_ref = provider.string("icon").or_else(|| {
            self.assets
                .as_ref()
                .and_then(|assets| assets.resolve_icon(&id))
        });

        WalletProviderDescriptor {
            display_name,
            chain_family: family,
            capabilities,
            icon_ref,
            api_version: provider.string("apiVersion"),
            id,
        }
    }
}
