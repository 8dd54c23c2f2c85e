//! Fakes of the host traits, for the unit tests of the crate.

use crate::{
    error::StoreError,
    host::{
        Callback, ConnectionStore, Host, ListenerGuard, MessageChannel, NetworkMonitor,
        ProviderObject, Runtime, WalletSource,
    },
    network::ChainFamily,
};
use futures::future::LocalBoxFuture;
use serde_json::{Value, json};
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

pub(crate) const PAYMENT: &str = "9493315cd92eb5d8c4304e67b7e16ae36d61d34502694657811a2c8e";
pub(crate) const STAKE: &str = "337b62cfff6403a06a3acbc34f8c46003c69fe79a3628cefa9c47251";

/// the bech32 form of [`base_address_hex`]
pub(crate) const BASE_MAINNET: &str = "addr1qx2fxv2umyhttkxyxp8x0dlpdt3k6cwng5pxj3jhsydzer3n0d3vllmyqwsx5wktcd8cc3sq835lu7drv2xwl2wywfgse35a3x";

/// hex bytes of a mainnet base address, as returned by `getUsedAddresses`
pub(crate) fn base_address_hex() -> String {
    format!("01{PAYMENT}{STAKE}")
}

/// What a fake function does when called.
#[derive(Clone)]
pub(crate) enum Reply {
    Value(Value),
    Object(Rc<FakeObject>),
    Error(Value),
    Never,
    After(Duration, Box<Reply>),
    /// EIP-1193 `request`, replies picked by the `method` of the request
    Rpc(Rc<HashMap<String, Reply>>),
}

impl Reply {
    pub fn rpc<'a>(methods: impl IntoIterator<Item = (&'a str, Reply)>) -> Self {
        Reply::Rpc(Rc::new(
            methods
                .into_iter()
                .map(|(method, reply)| (method.to_owned(), reply))
                .collect(),
        ))
    }
}

#[derive(Default)]
pub(crate) struct FakeObject {
    data: Option<Value>,
    properties: HashMap<String, Rc<FakeObject>>,
    functions: HashMap<String, RefCell<VecDeque<Reply>>>,
    calls: RefCell<Vec<(String, Vec<Value>)>>,
    listeners: Rc<RefCell<Vec<(u64, String, Callback)>>>,
    next_listener: Cell<u64>,
}

impl FakeObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(value: Value) -> Self {
        Self {
            data: Some(value),
            ..Self::default()
        }
    }

    pub fn property(mut self, name: &str, object: FakeObject) -> Self {
        self.properties.insert(name.to_owned(), Rc::new(object));
        self
    }

    pub fn value(self, name: &str, value: Value) -> Self {
        self.property(name, FakeObject::data(value))
    }

    /// successive calls get successive replies, the last one repeats
    pub fn replies(mut self, name: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.functions
            .insert(name.to_owned(), RefCell::new(replies.into_iter().collect()));
        self
    }

    pub fn function(self, name: &str, reply: Reply) -> Self {
        self.replies(name, [reply])
    }

    pub fn returns(self, name: &str, value: Value) -> Self {
        self.function(name, Reply::Value(value))
    }

    pub fn returns_object(self, name: &str, object: FakeObject) -> Self {
        self.function(name, Reply::Object(Rc::new(object)))
    }

    pub fn fails(self, name: &str, error: Value) -> Self {
        self.function(name, Reply::Error(error))
    }

    pub fn hangs(self, name: &str) -> Self {
        self.function(name, Reply::Never)
    }

    pub fn build(self) -> Rc<FakeObject> {
        Rc::new(self)
    }

    pub fn calls(&self, name: &str) -> Vec<Vec<Value>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(method, _)| method == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls(name).len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|(_, name, _)| name == event)
            .count()
    }

    /// deliver `value` to the listeners of `event`
    pub fn emit(&self, event: &str, value: Value) {
        let callbacks: Vec<Callback> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, name, _)| name == event)
            .map(|(_, _, callback)| Rc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value.clone())
        }
    }

    fn next_reply(&self, name: &str) -> Option<Reply> {
        let mut replies = self.functions.get(name)?.borrow_mut();
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

async fn play(reply: Reply, args: &[Value]) -> Result<Rc<dyn ProviderObject>, Value> {
    let mut reply = reply;
    loop {
        match reply {
            Reply::Rpc(methods) => {
                let method = args
                    .first()
                    .and_then(|request| request.get("method"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                reply = match methods.get(method) {
                    Some(reply) => reply.clone(),
                    None => Reply::Error(json!({ "code": 4200, "message": "Unsupported method" })),
                };
            }
            Reply::Value(value) => return Ok(Rc::new(FakeObject::data(value))),
            Reply::Object(object) => return Ok(object),
            Reply::Error(error) => return Err(error),
            Reply::Never => futures::future::pending::<()>().await,
            Reply::After(delay, then) => {
                tokio::time::sleep(delay).await;
                reply = *then;
            }
        }
    }
}

#[async_trait::async_trait(?Send)]
impl ProviderObject for FakeObject {
    fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Rc<dyn ProviderObject>> {
        if let Some(object) = self.properties.get(name) {
            return Some(Rc::clone(object) as Rc<dyn ProviderObject>);
        }
        let value = self.data.as_ref()?.get(name)?;
        if value.is_null() {
            return None;
        }
        Some(Rc::new(FakeObject::data(value.clone())))
    }

    fn json(&self) -> Option<Value> {
        self.data.clone()
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Rc<dyn ProviderObject>, Value> {
        self.calls.borrow_mut().push((method.to_owned(), args.clone()));
        let Some(reply) = self.next_reply(method) else {
            return Err(json!({ "message": format!("{method} is not a function") }));
        };
        play(reply, &args).await
    }

    fn listen(&self, event: &str, callback: Callback) -> Option<ListenerGuard> {
        if !self.has_function("on") {
            return None;
        }

        let id = self.next_listener.get() + 1;
        self.next_listener.set(id);
        self.listeners
            .borrow_mut()
            .push((id, event.to_owned(), callback));

        let listeners = Rc::clone(&self.listeners);
        Some(ListenerGuard::new(move || {
            listeners.borrow_mut().retain(|(other, _, _)| *other != id)
        }))
    }
}

/// a CIP-30 wallet whose API answers every required method, `used` being
/// the used addresses it reports
pub(crate) fn cip30_api(used: Value) -> FakeObject {
    FakeObject::new()
        .returns("getNetworkId", json!(1))
        .returns("getUtxos", json!([]))
        .returns("getBalance", json!("00"))
        .returns("getUsedAddresses", used)
        .returns("getUnusedAddresses", json!([]))
        .returns("getChangeAddress", json!(base_address_hex()))
        .returns("getRewardAddresses", json!([]))
        .returns("signTx", json!(""))
        .returns("signData", json!({}))
        .returns("submitTx", json!(""))
}

pub(crate) fn cip30_wallet(name: &str, api: FakeObject) -> FakeObject {
    FakeObject::new()
        .value("name", json!(name))
        .value("apiVersion", json!("1.0.0"))
        .returns("isEnabled", json!(true))
        .returns_object("enable", api)
}

pub(crate) fn evm_provider(flag: &str, accounts: Value, chain_id: &str) -> FakeObject {
    FakeObject::new()
        .value(flag, json!(true))
        .function(
            "request",
            Reply::rpc([
                ("eth_requestAccounts", Reply::Value(accounts.clone())),
                ("eth_accounts", Reply::Value(accounts)),
                ("eth_chainId", Reply::Value(json!(chain_id))),
            ]),
        )
        .returns("on", Value::Null)
        .returns("removeListener", Value::Null)
}

#[derive(Default)]
pub(crate) struct FakeSource {
    providers: RefCell<Vec<(ChainFamily, String, Rc<FakeObject>, usize)>>,
    scans: Cell<usize>,
}

impl FakeSource {
    pub fn inject(&self, family: ChainFamily, key: &str, provider: Rc<FakeObject>) {
        self.inject_after(family, key, provider, 0)
    }

    /// the provider only shows up after `scans` scans missed it
    pub fn inject_after(
        &self,
        family: ChainFamily,
        key: &str,
        provider: Rc<FakeObject>,
        scans: usize,
    ) {
        let scans = self.scans.get() + scans;
        self.providers
            .borrow_mut()
            .push((family, key.to_owned(), provider, scans));
    }

    pub fn scans(&self) -> usize {
        self.scans.get()
    }
}

impl WalletSource for FakeSource {
    fn injected(&self, family: ChainFamily) -> Vec<(String, Rc<dyn ProviderObject>)> {
        let scan = self.scans.get();
        self.scans.set(scan + 1);
        self.providers
            .borrow()
            .iter()
            .filter(|(other, _, _, after)| *other == family && *after <= scan)
            .map(|(_, key, provider, _)| {
                (key.clone(), Rc::clone(provider) as Rc<dyn ProviderObject>)
            })
            .collect()
    }
}

/// Tokio timers. Spawned tasks are queued until [`TestRuntime::run_spawned`].
#[derive(Default)]
pub(crate) struct TestRuntime {
    spawned: RefCell<VecDeque<LocalBoxFuture<'static, ()>>>,
}

impl TestRuntime {
    pub async fn run_spawned(&self) {
        loop {
            let next = self.spawned.borrow_mut().pop_front();
            match next {
                Some(task) => task.await,
                None => break,
            }
        }
    }
}

impl Runtime for TestRuntime {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.spawned.borrow_mut().push_back(task)
    }
}

type Responder = Box<dyn Fn(&Value) -> Option<Value>>;

/// A page message bus: every post is echoed to the subscribers, then the
/// responder may answer it.
#[derive(Default)]
pub(crate) struct FakeChannel {
    subscribers: Rc<RefCell<Vec<(u64, Callback)>>>,
    next: Cell<u64>,
    posted: RefCell<Vec<Value>>,
    responder: RefCell<Option<Responder>>,
}

impl FakeChannel {
    pub fn respond_with(&self, responder: impl Fn(&Value) -> Option<Value> + 'static) {
        *self.responder.borrow_mut() = Some(Box::new(responder));
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn deliver(&self, message: Value) {
        let subscribers: Vec<Callback> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(message.clone())
        }
    }
}

impl MessageChannel for FakeChannel {
    fn post(&self, message: Value) {
        self.posted.borrow_mut().push(message.clone());
        self.deliver(message.clone());

        let response = self
            .responder
            .borrow()
            .as_ref()
            .and_then(|responder| responder(&message));
        if let Some(response) = response {
            self.deliver(response)
        }
    }

    fn subscribe(&self, callback: Callback) -> ListenerGuard {
        let id = self.next.get() + 1;
        self.next.set(id);
        self.subscribers.borrow_mut().push((id, callback));

        let subscribers = Rc::clone(&self.subscribers);
        ListenerGuard::new(move || subscribers.borrow_mut().retain(|(other, _)| *other != id))
    }
}

#[derive(Default)]
pub(crate) struct FakeNetwork {
    offline: Cell<bool>,
    subscribers: Rc<RefCell<Vec<(u64, Rc<dyn Fn(bool)>)>>>,
    next: Cell<u64>,
}

impl FakeNetwork {
    pub fn set_online(&self, online: bool) {
        self.offline.set(!online);
        let subscribers: Vec<_> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(online)
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl NetworkMonitor for FakeNetwork {
    fn is_online(&self) -> bool {
        !self.offline.get()
    }

    fn subscribe(&self, callback: Rc<dyn Fn(bool)>) -> ListenerGuard {
        let id = self.next.get() + 1;
        self.next.set(id);
        self.subscribers.borrow_mut().push((id, callback));

        let subscribers = Rc::clone(&self.subscribers);
        ListenerGuard::new(move || subscribers.borrow_mut().retain(|(other, _)| *other != id))
    }
}

#[derive(Default)]
pub(crate) struct FakeConnectionStore {
    pub failing: Cell<bool>,
    pub upserts: RefCell<Vec<(String, String, bool)>>,
    pub disconnected: RefCell<Vec<String>>,
}

#[async_trait::async_trait(?Send)]
impl ConnectionStore for FakeConnectionStore {
    async fn upsert(
        &self,
        address: &str,
        wallet_type: &str,
        connected: bool,
    ) -> Result<(), StoreError> {
        if self.failing.get() {
            return Err(StoreError("database is down".to_owned()));
        }
        self.upserts
            .borrow_mut()
            .push((address.to_owned(), wallet_type.to_owned(), connected));
        Ok(())
    }

    async fn mark_disconnected(&self, address: &str) -> Result<(), StoreError> {
        if self.failing.get() {
            return Err(StoreError("database is down".to_owned()));
        }
        self.disconnected.borrow_mut().push(address.to_owned());
        Ok(())
    }
}

/// everything a test may want to poke at, wired in a [`Host`]
pub(crate) struct TestHost {
    pub source: Rc<FakeSource>,
    pub runtime: Rc<TestRuntime>,
    pub channel: Rc<FakeChannel>,
    pub store: Rc<FakeConnectionStore>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            source: Rc::new(FakeSource::default()),
            runtime: Rc::new(TestRuntime::default()),
            channel: Rc::new(FakeChannel::default()),
            store: Rc::new(FakeConnectionStore::default()),
        }
    }

    /// a host without CIP-95 message channel
    pub fn host(&self) -> Host {
        Host::new(
            Rc::clone(&self.source) as Rc<dyn WalletSource>,
            Rc::clone(&self.runtime) as Rc<dyn Runtime>,
        )
        .with_connection_store(Rc::clone(&self.store) as Rc<dyn ConnectionStore>)
    }

    pub fn host_with_channel(&self) -> Host {
        self.host()
            .with_channel(Rc::clone(&self.channel) as Rc<dyn MessageChannel>)
    }
}
