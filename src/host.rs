/*!
Everything the bridge needs from the page it runs in.

The browser globals (`window.cardano`, `window.ethereum`, `postMessage`,
`localStorage`, `setTimeout`...) are only reached through the traits of this
module. The [`ffi`](crate::ffi) module implements them on top of
`wasm-bindgen`; tests implement them with fakes.
*/

use crate::{error::StoreError, network::ChainFamily};
use futures::future::{Either, LocalBoxFuture, select};
use serde_json::Value;
use std::{
    cell::RefCell, collections::HashMap, fmt, future::Future, pin::pin, rc::Rc, time::Duration,
};

/// Unsubscribes a listener when detached or dropped.
///
/// Every subscription made by the bridge (provider events, host messages,
/// online/offline signals) hands one of these back.
#[must_use = "dropping the guard detaches the listener"]
pub struct ListenerGuard {
    detach: Option<Box<dyn FnOnce()>>,
}

impl ListenerGuard {
    pub fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// a guard with nothing to detach
    pub fn noop() -> Self {
        Self { detach: None }
    }

    pub fn detach(mut self) {
        if let Some(detach) = self.detach.take() {
            detach()
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach()
        }
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

pub type Callback = Rc<dyn Fn(Value)>;

/// A handle on a value injected in the page: a wallet provider, the API
/// object returned by `enable()`, or any value one of those returns.
#[async_trait::async_trait(?Send)]
pub trait ProviderObject {
    /// `typeof object[name] === "function"`
    fn has_function(&self, name: &str) -> bool;

    /// `object[name]`, `None` if undefined or null
    fn get(&self, name: &str) -> Option<Rc<dyn ProviderObject>>;

    /// plain data view of this value, `None` if it can't be represented
    fn json(&self) -> Option<Value>;

    /// invoke `object[method](...args)` and await the result if it is a
    /// promise. The error is whatever the provider threw, as JSON.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Rc<dyn ProviderObject>, Value>;

    /// attach an event listener (`object.on(event, callback)`), `None` if
    /// the object is not an event emitter
    fn listen(&self, event: &str, callback: Callback) -> Option<ListenerGuard>;

    fn string(&self, name: &str) -> Option<String> {
        self.get(name)?.json()?.as_str().map(str::to_owned)
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name)
            .and_then(|value| value.json())
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }
}

/// Where the injected providers of a chain family live.
pub trait WalletSource {
    /// the providers currently injected for the family, with the namespace
    /// key they were found under (`window.cardano.<key>`, ...)
    fn injected(&self, family: ChainFamily) -> Vec<(String, Rc<dyn ProviderObject>)>;
}

/// A bidirectional message channel (the page `postMessage` bus).
pub trait MessageChannel {
    fn post(&self, message: Value);

    fn subscribe(&self, callback: Callback) -> ListenerGuard;
}

/// Online/offline signals of the host.
pub trait NetworkMonitor {
    fn is_online(&self) -> bool;

    fn subscribe(&self, callback: Rc<dyn Fn(bool)>) -> ListenerGuard;
}

/// Timers and task spawning of the host event loop.
pub trait Runtime {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Small client side key/value storage (`localStorage`).
pub trait KeyValueStore {
    fn load(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Persistence of the connection history, owned by the application.
#[async_trait::async_trait(?Send)]
pub trait ConnectionStore {
    async fn upsert(
        &self,
        address: &str,
        wallet_type: &str,
        connected: bool,
    ) -> Result<(), StoreError>;

    async fn mark_disconnected(&self, address: &str) -> Result<(), StoreError>;
}

/// Resolves display icons for wallets that don't inject one.
pub trait AssetResolver {
    fn resolve_icon(&self, wallet_id: &str) -> Option<String>;
}

/// In memory [`KeyValueStore`], for hosts without persistent storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

/// The collaborators the bridge is wired to.
#[derive(Clone)]
pub struct Host {
    pub source: Rc<dyn WalletSource>,
    pub runtime: Rc<dyn Runtime>,
    /// message channel of the CIP-95 bridge, if the page has one
    pub channel: Option<Rc<dyn MessageChannel>>,
    pub storage: Rc<dyn KeyValueStore>,
    pub connections: Option<Rc<dyn ConnectionStore>>,
    pub assets: Option<Rc<dyn AssetResolver>>,
}

impl Host {
    pub fn new(source: Rc<dyn WalletSource>, runtime: Rc<dyn Runtime>) -> Self {
        Self {
            source,
            runtime,
            channel: None,
            storage: Rc::new(MemoryStore::default()),
            connections: None,
            assets: None,
        }
    }

    pub fn with_channel(self, channel: Rc<dyn MessageChannel>) -> Self {
        Self {
            channel: Some(channel),
            ..self
        }
    }

    pub fn with_storage(self, storage: Rc<dyn KeyValueStore>) -> Self {
        Self { storage, ..self }
    }

    pub fn with_connection_store(self, connections: Rc<dyn ConnectionStore>) -> Self {
        Self {
            connections: Some(connections),
            ..self
        }
    }

    pub fn with_asset_resolver(self, assets: Rc<dyn AssetResolver>) -> Self {
        Self {
            assets: Some(assets),
            ..self
        }
    }
}

/// race `future` against a timer, `None` if the timer fired first
///
/// The losing future is dropped, which does not cancel whatever the wallet
/// is doing on its side (a popup stays open).
pub(crate) async fn with_timeout<F>(runtime: &dyn Runtime, duration: Duration, future: F) -> Option<F::Output>
where
    F: Future,
{
    let future = pin!(future);
    match select(future, runtime.sleep(duration)).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(((), _)) => None,
    }
}
