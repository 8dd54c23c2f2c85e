use super::{error_to_json, from_json, to_json};
use crate::host::{Callback, ListenerGuard, ProviderObject};
use js_sys::{Array, Function, Promise, Reflect};
use serde_json::{Value, json};
use std::rc::Rc;
use tracing::debug;
use wasm_bindgen::{JsCast, prelude::*};
use wasm_bindgen_futures::JsFuture;

/// Any value injected in the page by a wallet extension.
#[derive(Debug, Clone, PartialEq)]
pub struct JsProvider(JsValue);

impl JsProvider {
    pub fn new(value: JsValue) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &JsValue {
        &self.0
    }

    /// `this[name]`, `None` when undefined or null, or when reading it threw
    fn member(&self, name: &str) -> Option<JsValue> {
        Reflect::get(&self.0, &JsValue::from_str(name))
            .ok()
            .filter(|value| !value.is_undefined() && !value.is_null())
    }

    fn function(&self, name: &str) -> Option<Function> {
        self.member(name)?.dyn_into::<Function>().ok()
    }
}

/// What a listener receives. Solana wallets hand over `PublicKey` objects,
/// we want their base58 form.
fn event_payload(value: &JsValue) -> Value {
    let base58 = Reflect::get(value, &JsValue::from_str("toBase58"))
        .ok()
        .and_then(|function| function.dyn_into::<Function>().ok())
        .and_then(|function| function.call0(value).ok())
        .and_then(|key| key.as_string());

    match base58 {
        Some(key) => Value::String(key),
        None => to_json(value).unwrap_or(Value::Null),
    }
}

#[async_trait::async_trait(?Send)]
impl ProviderObject for JsProvider {
    fn has_function(&self, name: &str) -> bool {
        self.function(name).is_some()
    }

    fn get(&self, name: &str) -> Option<Rc<dyn ProviderObject>> {
        self.member(name)
            .map(|value| Rc::new(JsProvider(value)) as Rc<dyn ProviderObject>)
    }

    fn json(&self) -> Option<Value> {
        to_json(&self.0)
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Rc<dyn ProviderObject>, Value> {
        let function = self
            .function(method)
            .ok_or_else(|| json!({ "message": format!("{method} is not a function") }))?;
        let args = args
            .iter()
            .map(from_json)
            .collect::<Result<Array, _>>()?;

        let result = function
            .apply(&self.0, &args)
            .map_err(|error| error_to_json(&error))?;
        let result = match result.dyn_into::<Promise>() {
            Ok(promise) => JsFuture::from(promise)
                .await
                .map_err(|error| error_to_json(&error))?,
            Err(value) => value,
        };

        Ok(Rc::new(JsProvider(result)))
    }

    fn listen(&self, event: &str, callback: Callback) -> Option<ListenerGuard> {
        let on = self.function("on")?;
        let listener = Closure::<dyn Fn(JsValue)>::new(move |value: JsValue| {
            callback(event_payload(&value))
        });

        if let Err(error) = on.call2(
            &self.0,
            &JsValue::from_str(event),
            listener.as_ref().unchecked_ref(),
        ) {
            debug!(event, error = ?error, "could not attach the listener");
            return None;
        }

        let target = self.clone();
        let event = event.to_owned();
        Some(ListenerGuard::new(move || {
            let remove = target
                .function("removeListener")
                .or_else(|| target.function("off"));
            if let Some(remove) = remove {
                let _ = remove.call2(
                    &target.0,
                    &JsValue::from_str(&event),
                    listener.as_ref().unchecked_ref(),
                );
            }
            drop(listener);
        }))
    }
}
