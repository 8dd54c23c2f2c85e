/*!

# Wallet connection bridge for Cardano, EVM and Solana wallets

This library is meant to be used by web applications that let their users
connect a browser wallet. It finds the wallets injected in the page, asks
the chosen one for access and hands back a session whose address is
normalized and validated.

## Features

- Discover CIP-30 (and CIP-95 bridged) Cardano wallets, EIP-1193 wallets
  and Solana wallets
- Connect with timeout and bounded retries, one connection per chain family
- Normalize the wallet address (bech32 for Cardano, EIP-55 for EVM, base58
  for Solana)
- Follow account, network and online/offline changes
- Publish every lifecycle step on an [`EventBus`]

## Usage

First list the wallets available:

```no_run
use wallet_connector::{BridgeConfig, ChainFamily, ConnectionManager, ffi};

# async fn test() {
let manager = ConnectionManager::new(ffi::browser_host(), BridgeConfig::default());

for wallet in manager.discover(ChainFamily::Cardano).await {
    println!("Wallet: {} ({})", wallet.display_name, wallet.id);
}
# }
```

Only the wallets exposing the members their protocol requires are listed.
Then connect one of them. The session carries the canonical address:

```no_run
# use wallet_connector::{BridgeConfig, ChainFamily, ConnectionManager, ffi};
#
# async fn test() -> anyhow::Result<()> {
# let manager = ConnectionManager::new(ffi::browser_host(), BridgeConfig::default());
let session = manager.connect("eternl", ChainFamily::Cardano).await?;
println!("connected as {:?}", session.canonical_address);
# Ok(()) }
```

Everything the manager does is also published as an event:

```no_run
# use wallet_connector::{BridgeConfig, ConnectionManager, EventKind, ffi};
# let manager = ConnectionManager::new(ffi::browser_host(), BridgeConfig::default());
manager.events().on(EventKind::Connect, |event| {
    println!("connected: {}", event.data["address"]);
    Ok(())
});
```

The core never touches the browser directly but goes through the traits of
the [`host`] module, the [`ffi`] module implements them with `wasm-bindgen`.

*/

pub mod adapter;
pub mod address;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod ffi;
pub mod host;
mod manager;
pub mod network;
mod session;
#[cfg(test)]
mod testing;

pub use self::{
    address::{AddressType, RawAddress},
    config::BridgeConfig,
    discovery::{Capabilities, WalletDiscovery, WalletProviderDescriptor},
    error::{AddressDecodingError, ConnectError, EnableError, HandlerError, StoreError},
    events::{BridgeEvent, EventBus, EventKind, HandlerId},
    host::{Host, ListenerGuard},
    manager::ConnectionManager,
    network::{ChainFamily, EvmChain, Network, NetworkId},
    session::{ConnectionSession, ConnectionState},
};
