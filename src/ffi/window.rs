use super::{JsProvider, from_json, to_json};
use crate::{
    host::{
        Callback, KeyValueStore, ListenerGuard, MessageChannel, NetworkMonitor, ProviderObject,
        Runtime, WalletSource,
    },
    network::ChainFamily,
};
use futures::future::LocalBoxFuture;
use js_sys::{Array, Function, Object, Promise, Reflect};
use serde_json::Value;
use std::{rc::Rc, time::Duration};
use tracing::warn;
use wasm_bindgen::{JsCast, prelude::*};
use wasm_bindgen_futures::JsFuture;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = "setTimeout")]
    fn set_timeout(handler: &Function, timeout: i32) -> JsValue;

    #[wasm_bindgen(catch, js_name = "postMessage")]
    fn post_message(message: &JsValue, target_origin: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(js_name = "addEventListener")]
    fn add_event_listener(kind: &str, listener: &Function);

    #[wasm_bindgen(js_name = "removeEventListener")]
    fn remove_event_listener(kind: &str, listener: &Function);
}

#[wasm_bindgen]
extern "C" {
    #[derive(Clone, Debug)]
    pub type Storage;

    #[wasm_bindgen(method, catch, js_name = "getItem")]
    fn get_item(this: &Storage, key: &str) -> Result<Option<String>, JsValue>;
    #[wasm_bindgen(method, catch, js_name = "setItem")]
    fn set_item(this: &Storage, key: &str, value: &str) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = "removeItem")]
    fn remove_item(this: &Storage, key: &str) -> Result<(), JsValue>;
}

/// `window.<path>`, `None` as soon as one step is undefined
fn lookup(path: &[&str]) -> Option<JsValue> {
    path.iter().try_fold(js_sys::global().into(), |value: JsValue, name| {
        Reflect::get(&value, &JsValue::from_str(name))
            .ok()
            .filter(|value| value.is_object())
    })
}

/// subscribe `listener` to a window event until the guard is dropped
fn listen_window(kind: &'static str, listener: Closure<dyn Fn(JsValue)>) -> ListenerGuard {
    add_event_listener(kind, listener.as_ref().unchecked_ref());
    ListenerGuard::new(move || {
        remove_event_listener(kind, listener.as_ref().unchecked_ref());
        drop(listener);
    })
}

/// The providers injected in `window`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserWalletSource;

impl BrowserWalletSource {
    /// every entry of `window.cardano`
    fn cardano() -> Vec<(String, JsValue)> {
        let Some(cardano) = lookup(&["cardano"]) else {
            return Vec::new();
        };

        Object::entries(cardano.unchecked_ref())
            .iter()
            .filter_map(|entry| {
                let entry: Array = entry.dyn_into().ok()?;
                let key = entry.get(0).as_string()?;
                let provider = entry.get(1);
                provider.is_object().then_some((key, provider))
            })
            .collect()
    }

    /// `window.ethereum`, or each of `window.ethereum.providers` when several
    /// extensions share the namespace
    fn ethereum() -> Vec<(String, JsValue)> {
        let Some(ethereum) = lookup(&["ethereum"]) else {
            return Vec::new();
        };

        let providers = Reflect::get(&ethereum, &JsValue::from_str("providers"))
            .ok()
            .and_then(|providers| providers.dyn_into::<Array>().ok());
        match providers {
            Some(providers) if providers.length() > 0 => providers
                .iter()
                .filter(JsValue::is_object)
                .map(|provider| ("ethereum".to_owned(), provider))
                .collect(),
            _ => vec![("ethereum".to_owned(), ethereum)],
        }
    }

    fn solana() -> Vec<(String, JsValue)> {
        [
            ("phantom", &["phantom", "solana"][..]),
            ("solana", &["solana"]),
            ("solflare", &["solflare"]),
            ("backpack", &["backpack"]),
        ]
        .into_iter()
        .filter_map(|(key, path)| Some((key.to_owned(), lookup(path)?)))
        .collect()
    }
}

impl WalletSource for BrowserWalletSource {
    fn injected(&self, family: ChainFamily) -> Vec<(String, Rc<dyn ProviderObject>)> {
        let found = match family {
            ChainFamily::Cardano => Self::cardano(),
            ChainFamily::Evm => Self::ethereum(),
            ChainFamily::Solana => Self::solana(),
        };

        found
            .into_iter()
            .map(|(key, value)| (key, Rc::new(JsProvider::new(value)) as Rc<dyn ProviderObject>))
            .collect()
    }
}

/// The page `postMessage` bus.
#[derive(Debug, Clone)]
pub struct WindowChannel {
    target_origin: String,
}

impl WindowChannel {
    pub fn new(target_origin: impl Into<String>) -> Self {
        Self {
            target_origin: target_origin.into(),
        }
    }
}

impl Default for WindowChannel {
    fn default() -> Self {
        Self::new("*")
    }
}

impl MessageChannel for WindowChannel {
    fn post(&self, message: Value) {
        let result = from_json(&message)
            .map_err(|error| format!("{error}"))
            .and_then(|message| {
                post_message(&message, &self.target_origin).map_err(|error| format!("{error:?}"))
            });
        if let Err(error) = result {
            warn!(%error, "could not post the message");
        }
    }

    fn subscribe(&self, callback: Callback) -> ListenerGuard {
        let listener = Closure::<dyn Fn(JsValue)>::new(move |event: JsValue| {
            let data = Reflect::get(&event, &JsValue::from_str("data"))
                .ok()
                .and_then(|data| to_json(&data));
            if let Some(data) = data {
                callback(data)
            }
        });
        listen_window("message", listener)
    }
}

/// `navigator.onLine` and the `online`/`offline` window events.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserNetwork;

impl NetworkMonitor for BrowserNetwork {
    fn is_online(&self) -> bool {
        lookup(&["navigator"])
            .and_then(|navigator| Reflect::get(&navigator, &JsValue::from_str("onLine")).ok())
            .and_then(|online| online.as_bool())
            .unwrap_or(true)
    }

    fn subscribe(&self, callback: Rc<dyn Fn(bool)>) -> ListenerGuard {
        let on_offline = Rc::clone(&callback);
        let online = listen_window(
            "online",
            Closure::<dyn Fn(JsValue)>::new(move |_: JsValue| callback(true)),
        );
        let offline = listen_window(
            "offline",
            Closure::<dyn Fn(JsValue)>::new(move |_: JsValue| on_offline(false)),
        );

        ListenerGuard::new(move || {
            drop(online);
            drop(offline);
        })
    }
}

/// `setTimeout` timers, tasks spawned on the page event loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserRuntime;

impl Runtime for BrowserRuntime {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = Promise::new(&mut |resolve, _reject| {
            set_timeout(&resolve, millis);
        });

        Box::pin(async move {
            let _ = JsFuture::from(promise).await;
        })
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task)
    }
}

/// `window.localStorage`. Storage failures (quota, private browsing) are
/// logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct LocalStorage(Storage);

impl LocalStorage {
    /// `None` if the page has no usable `localStorage`
    pub fn new() -> Option<Self> {
        lookup(&["localStorage"]).map(|storage| Self(storage.unchecked_into()))
    }
}

impl KeyValueStore for LocalStorage {
    fn load(&self, key: &str) -> Option<String> {
        self.0.get_item(key).ok().flatten()
    }

    fn store(&self, key: &str, value: &str) {
        if let Err(error) = self.0.set_item(key, value) {
            warn!(key, error = ?error, "could not write to the local storage");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(error) = self.0.remove_item(key) {
            warn!(key, error = ?error, "could not write to the local storage");
        }
    }
}
