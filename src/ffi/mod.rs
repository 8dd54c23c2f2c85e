/*!
Browser implementation of the [`host`](crate::host) traits.

Everything here goes through `js_sys::Reflect` rather than typed bindings:
wallets disagree on which members they inject and we want to check them one
by one instead of failing at the first `undefined`.

```no_run
use wallet_connector::{BridgeConfig, ChainFamily, ConnectionManager, ffi};

# async fn connect() -> anyhow::Result<()> {
let manager = ConnectionManager::new(ffi::browser_host(), BridgeConfig::default());
manager.watch_network(&ffi::BrowserNetwork);

let session = manager.connect("eternl", ChainFamily::Cardano).await?;
# Ok(()) }
```
*/

mod provider;
mod window;

pub use self::{
    provider::JsProvider,
    window::{BrowserNetwork, BrowserRuntime, BrowserWalletSource, LocalStorage, Storage, WindowChannel},
};
use crate::{config::BridgeConfig, host::Host};
use js_sys::Reflect;
use serde::Serialize as _;
use serde_json::{Value, json};
use std::rc::Rc;
use wasm_bindgen::{JsCast, JsValue};

/// plain data view of a JS value, `None` for values JSON can't represent
pub fn to_json(value: &JsValue) -> Option<Value> {
    serde_wasm_bindgen::from_value(value.clone()).ok()
}

/// the JS object of a JSON value, maps become plain objects
pub fn from_json(value: &Value) -> Result<JsValue, Value> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|error| json!({ "message": error.to_string() }))
}

/// whatever a provider threw, as JSON
///
/// `Error` instances keep their `message` (not enumerable, so lost by a plain
/// conversion) and their `code` if any.
pub fn error_to_json(error: &JsValue) -> Value {
    let Some(exception) = error.dyn_ref::<js_sys::Error>() else {
        return to_json(error).unwrap_or_else(|| json!({ "message": format!("{error:?}") }));
    };

    let mut json = to_json(error)
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));
    json["message"] = Value::String(exception.message().into());
    let code = Reflect::get(error, &JsValue::from_str("code"))
        .ok()
        .and_then(|code| to_json(&code))
        .filter(|code| !code.is_null());
    if let Some(code) = code {
        json["code"] = code;
    }
    json
}

/// read a [`BridgeConfig`] from a JS object, missing fields keep their
/// default
pub fn config_from_js(config: JsValue) -> Result<BridgeConfig, serde_wasm_bindgen::Error> {
    if config.is_undefined() || config.is_null() {
        return Ok(BridgeConfig::default());
    }
    serde_wasm_bindgen::from_value(config)
}

/// a [`Host`] wired to the page: injected providers, `postMessage`,
/// `localStorage` when available
pub fn browser_host() -> Host {
    let host = Host::new(Rc::new(BrowserWalletSource), Rc::new(BrowserRuntime))
        .with_channel(Rc::new(WindowChannel::default()));

    match LocalStorage::new() {
        Some(storage) => host.with_storage(Rc::new(storage)),
        None => {
            tracing::debug!("no local storage, falling back to memory");
            host
        }
    }
}
