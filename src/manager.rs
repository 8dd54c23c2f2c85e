/*!
The connection state machine.

```text
Disconnected ──connect()──▶ Connecting ──▶ Connected
                               │    ▲          │
                    retries    │    │ online   │ disconnect()
                    exhausted  ▼    │          ▼
                             Error ─┴──▶ Disconnected
```

There is at most one session per chain family. `connect()` is single
flight: a second call while one is running fails immediately with
[`ConnectError::ConcurrentConnection`]. Each attempt races the adapter
against the connect timeout; failed attempts are retried after a fixed
delay, except for the failures retrying can't fix (see
[`ConnectError::is_retryable`]).

Every teardown bumps the slot's epoch. An attempt started before a
teardown compares epochs before committing and gives up instead of
resurrecting a session the user disconnected.
*/

use crate::{
    adapter::{self, Cip95Bridge, EventSink, ProtocolAdapter, ProviderEvent, RawApi},
    address,
    config::BridgeConfig,
    discovery::{WalletDiscovery, WalletProviderDescriptor},
    error::{AddressDecodingError, ConnectError},
    events::{EventBus, EventKind},
    host::{Host, ListenerGuard, NetworkMonitor, with_timeout},
    network::{ChainFamily, Network},
    session::{Attempt, ConnectionSession, ConnectionState},
};
use serde_json::json;
use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};
use tracing::{debug, info, warn};

const DISCONNECTED_KEY: &str = "disconnected";
const WALLET_KEY: &str = "wallet";

struct Live {
    adapter: Rc<dyn ProtocolAdapter>,
    guards: Vec<ListenerGuard>,
}

#[derive(Default)]
struct Slot {
    session: Option<ConnectionSession>,
    in_flight: bool,
    live: Option<Live>,
    epoch: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// `connect()`, the session is dropped when it fails
    User,
    /// back online, the session stays in `Error` when it fails
    Reconnect,
}

struct Established {
    api: Box<dyn RawApi>,
    address: String,
    network: Option<Network>,
}

struct Inner {
    config: BridgeConfig,
    host: Host,
    events: Rc<EventBus>,
    bridge: Option<Rc<Cip95Bridge>>,
    discovery: WalletDiscovery,
    slots: RefCell<HashMap<ChainFamily, Slot>>,
    network: RefCell<Option<ListenerGuard>>,
}

/// Clears the in-flight flag of a family when the connection flow ends,
/// whether it completed or its future was dropped.
///
/// A flow that completes leaves its session `Connected`, `Error` or gone. A
/// session still `Connecting` here belongs to a dropped future: it is torn
/// down so the family can connect again.
struct InFlight {
    inner: Weak<Inner>,
    family: ChainFamily,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        let stale = {
            let mut slots = inner.slots.borrow_mut();
            let Some(slot) = slots.get_mut(&self.family) else {
                return;
            };
            slot.in_flight = false;

            let abandoned = slot
                .session
                .as_ref()
                .is_some_and(|session| session.state == ConnectionState::Connecting);
            if !abandoned {
                return;
            }
            debug!(family = %self.family, "connection abandoned");
            slot.epoch += 1;
            slot.session = None;
            slot.live.take()
        };
        drop(stale);
    }
}

/// Owns the sessions of every chain family.
///
/// Cloning is cheap, clones share the same sessions.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Rc<Inner>,
}

impl ConnectionManager {
    pub fn new(host: Host, config: BridgeConfig) -> Self {
        let events = Rc::new(EventBus::new(config.history_limit));
        let bridge = host.channel.as_ref().map(|channel| {
            Rc::new(Cip95Bridge::new(
                Rc::clone(channel),
                Rc::clone(&host.runtime),
                config.bridge_wait(),
            ))
        });
        let discovery = WalletDiscovery::new(&host, Rc::clone(&events), bridge.clone(), &config);

        Self {
            inner: Rc::new(Inner {
                config,
                host,
                events,
                bridge,
                discovery,
                slots: RefCell::new(HashMap::new()),
                network: RefCell::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// the bus every lifecycle event is published on
    pub fn events(&self) -> Rc<EventBus> {
        Rc::clone(&self.inner.events)
    }

    pub async fn discover(&self, family: ChainFamily) -> Vec<WalletProviderDescriptor> {
        self.inner.discovery.discover(family).await
    }

    pub fn session(&self, family: ChainFamily) -> Option<ConnectionSession> {
        self.inner
            .slots
            .borrow()
            .get(&family)
            .and_then(|slot| slot.session.clone())
    }

    pub fn state(&self, family: ChainFamily) -> ConnectionState {
        self.session(family)
            .map(|session| session.state)
            .unwrap_or_default()
    }

    /// the error that ended the last failed connection of the family
    pub fn last_error(&self, family: ChainFamily) -> Option<String> {
        self.inner
            .slots
            .borrow()
            .get(&family)
            .and_then(|slot| slot.last_error.clone())
    }

    /// connect the wallet `wallet_id` of the given family
    ///
    /// Returns the current session without prompting the user if that
    /// wallet is already connected. If another wallet of the family is
    /// connected it is disconnected first.
    pub async fn connect(
        &self,
        wallet_id: &str,
        family: ChainFamily,
    ) -> Result<ConnectionSession, ConnectError> {
        let Some(_in_flight) = self.begin(family) else {
            let error = ConnectError::ConcurrentConnection { family };
            self.report(wallet_id, family, &error);
            return Err(error);
        };

        if let Some(session) = self.session(family) {
            if session.is_connected() && session.wallet_id == wallet_id {
                debug!(wallet = wallet_id, %family, "already connected");
                return Ok(session);
            }
            info!(from = %session.wallet_id, to = wallet_id, %family, "switching wallet");
            self.close(family, false).await;
        }

        self.establish(wallet_id, family, Origin::User).await
    }

    /// Tear down the session of the family. Does nothing if there is none.
    pub async fn disconnect(&self, family: ChainFamily) {
        self.close(family, true).await
    }

    /// reconnect the wallet used last time, unless the user disconnected it
    ///
    /// `None` if there is nothing to restore.
    pub async fn restore(
        &self,
        family: ChainFamily,
    ) -> Option<Result<ConnectionSession, ConnectError>> {
        let storage = &self.inner.host.storage;
        if storage.load(&self.key(family, DISCONNECTED_KEY)).is_some() {
            debug!(%family, "previously disconnected, not restoring");
            return None;
        }
        let wallet = storage.load(&self.key(family, WALLET_KEY))?;

        Some(self.connect(&wallet, family).await)
    }

    /// follow the online/offline signals of `monitor`, replacing any
    /// previous subscription
    pub fn watch_network(&self, monitor: &dyn NetworkMonitor) {
        let inner = Rc::downgrade(&self.inner);
        let guard = monitor.subscribe(Rc::new(move |online| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let runtime = Rc::clone(&inner.host.runtime);
            let manager = ConnectionManager { inner };
            runtime.spawn(Box::pin(async move { manager.on_network_change(online).await }));
        }));

        let previous = self.inner.network.replace(Some(guard));
        drop(previous);
    }

    /// detach every listener: network signals and wallet events
    ///
    /// Sessions are kept as they are, connections still running will not
    /// commit.
    pub fn shutdown(&self) {
        let network = self.inner.network.borrow_mut().take();
        drop(network);

        let live: Vec<Live> = self
            .inner
            .slots
            .borrow_mut()
            .values_mut()
            .filter_map(|slot| {
                slot.epoch += 1;
                slot.live.take()
            })
            .collect();
        drop(live);
    }

    pub(crate) async fn on_network_change(&self, online: bool) {
        info!(online, "network changed");
        self.inner
            .events
            .emit(EventKind::NetworkChange, json!({ "online": online }));
        if !online {
            return;
        }

        for family in ChainFamily::ALL {
            let Some(session) = self.session(family) else {
                continue;
            };
            let Some(_in_flight) = self.begin(family) else {
                debug!(%family, "connection in progress, not reconnecting");
                continue;
            };
            if let Err(error) = self
                .establish(&session.wallet_id, family, Origin::Reconnect)
                .await
            {
                debug!(wallet = %session.wallet_id, %family, %error, "reconnection failed");
            }
        }
    }

    fn key(&self, family: ChainFamily, name: &str) -> String {
        format!("{}:{family}:{name}", self.inner.config.storage_prefix)
    }

    fn begin(&self, family: ChainFamily) -> Option<InFlight> {
        let mut slots = self.inner.slots.borrow_mut();
        let slot = slots.entry(family).or_default();
        if slot.in_flight {
            return None;
        }
        slot.in_flight = true;

        Some(InFlight {
            inner: Rc::downgrade(&self.inner),
            family,
        })
    }

    /// start a new `Connecting` session, returns its epoch
    fn start(&self, wallet_id: &str, family: ChainFamily) -> u64 {
        let (epoch, stale) = {
            let mut slots = self.inner.slots.borrow_mut();
            let slot = slots.entry(family).or_default();
            slot.epoch += 1;
            slot.session = Some(ConnectionSession::connecting(wallet_id, family));
            (slot.epoch, slot.live.take())
        };
        drop(stale);
        epoch
    }

    fn is_current(&self, family: ChainFamily, epoch: u64) -> bool {
        self.inner
            .slots
            .borrow()
            .get(&family)
            .is_some_and(|slot| slot.epoch == epoch && slot.session.is_some())
    }

    /// modify the session of `epoch`, `false` if it was torn down since
    fn update<F>(&self, family: ChainFamily, epoch: u64, update: F) -> bool
    where
        F: FnOnce(&mut ConnectionSession),
    {
        let mut slots = self.inner.slots.borrow_mut();
        match slots.get_mut(&family) {
            Some(Slot {
                session: Some(session),
                epoch: current,
                ..
            }) if *current == epoch => {
                update(session);
                true
            }
            _ => false,
        }
    }

    async fn establish(
        &self,
        wallet_id: &str,
        family: ChainFamily,
        origin: Origin,
    ) -> Result<ConnectionSession, ConnectError> {
        let epoch = self.start(wallet_id, family);

        let Some(provider) = self.inner.discovery.find(family, wallet_id).await else {
            let error = ConnectError::WalletNotFound {
                wallet: wallet_id.to_owned(),
                family,
            };
            return Err(self.give_up(wallet_id, family, epoch, origin, error));
        };
        let adapter = adapter::adapter_for(
            family,
            wallet_id,
            provider,
            self.inner.bridge.clone(),
            &self.inner.config,
        );

        let mut attempt = Attempt::first(self.inner.config.attempts());
        loop {
            if !self.is_current(family, epoch) {
                return Err(self.cancelled(wallet_id, family));
            }

            debug!(
                wallet = wallet_id,
                %family,
                attempt = attempt.number,
                failures = attempt.failures(),
                "connecting"
            );
            let error = match self.attempt(&*adapter, family).await {
                Ok(established) => {
                    return self
                        .commit(wallet_id, family, epoch, adapter, established)
                        .await;
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(self.give_up(wallet_id, family, epoch, origin, error));
            }
            warn!(wallet = wallet_id, %family, attempt = attempt.number, %error, "connection attempt failed");
            self.update(family, epoch, |session| {
                session.retry_count = attempt.number;
                session.last_error = Some(error.to_string());
            });

            match attempt.next() {
                Some(next) => {
                    self.inner
                        .host
                        .runtime
                        .sleep(self.inner.config.retry_delay())
                        .await;
                    attempt = next;
                }
                None => {
                    let error = ConnectError::MaxRetriesExceeded {
                        wallet: wallet_id.to_owned(),
                        attempts: attempt.limit,
                        last: Box::new(error),
                    };
                    return Err(self.give_up(wallet_id, family, epoch, origin, error));
                }
            }
        }
    }

    async fn attempt(
        &self,
        adapter: &dyn ProtocolAdapter,
        family: ChainFamily,
    ) -> Result<Established, ConnectError> {
        let timeout = self.inner.config.connect_timeout();
        with_timeout(&*self.inner.host.runtime, timeout, negotiate(adapter, family))
            .await
            .unwrap_or_else(|| {
                Err(ConnectError::ConnectionTimeout {
                    wallet: adapter.wallet_id().to_owned(),
                    after: timeout,
                })
            })
    }

    async fn commit(
        &self,
        wallet_id: &str,
        family: ChainFamily,
        epoch: u64,
        adapter: Rc<dyn ProtocolAdapter>,
        established: Established,
    ) -> Result<ConnectionSession, ConnectError> {
        if !self.is_current(family, epoch) {
            return Err(self.cancelled(wallet_id, family));
        }

        let guards = established.api.watch(self.sink(family, epoch));
        let session = {
            let mut slots = self.inner.slots.borrow_mut();
            let slot = slots.entry(family).or_default();
            let mut session = slot
                .session
                .take()
                .unwrap_or_else(|| ConnectionSession::connecting(wallet_id, family));
            session.state = ConnectionState::Connected;
            session.canonical_address = Some(established.address.clone());
            session.network = established.network;
            session.last_error = None;

            slot.session = Some(session.clone());
            slot.live = Some(Live { adapter, guards });
            slot.last_error = None;
            session
        };

        info!(wallet = wallet_id, %family, address = %established.address, "connected");
        let storage = &self.inner.host.storage;
        storage.remove(&self.key(family, DISCONNECTED_KEY));
        storage.store(&self.key(family, WALLET_KEY), wallet_id);

        self.inner.events.emit(
            EventKind::Connect,
            json!({
                "walletId": wallet_id,
                "chainFamily": family,
                "address": established.address,
                "network": session.network,
            }),
        );

        if let Some(store) = &self.inner.host.connections {
            if let Err(error) = store.upsert(&established.address, wallet_id, true).await {
                warn!(wallet = wallet_id, %error, "could not record the connection");
            }
        }

        Ok(session)
    }

    fn cancelled(&self, wallet_id: &str, family: ChainFamily) -> ConnectError {
        let error = ConnectError::ConnectionRejected {
            wallet: wallet_id.to_owned(),
            reason: "disconnected while connecting".to_owned(),
        };
        debug!(wallet = wallet_id, %family, "connection cancelled");
        self.report(wallet_id, family, &error);
        error
    }

    fn give_up(
        &self,
        wallet_id: &str,
        family: ChainFamily,
        epoch: u64,
        origin: Origin,
        error: ConnectError,
    ) -> ConnectError {
        let current = self.update(family, epoch, |session| {
            session.state = ConnectionState::Error;
            session.last_error = Some(error.to_string());
        });
        warn!(wallet = wallet_id, %family, %error, "connection failed");

        if current {
            if let Some(slot) = self.inner.slots.borrow_mut().get_mut(&family) {
                slot.last_error = Some(error.to_string());
            }
        }

        // handlers see the session in `Error`
        self.report(wallet_id, family, &error);

        if current && origin == Origin::User {
            let stale = self
                .inner
                .slots
                .borrow_mut()
                .get_mut(&family)
                .filter(|slot| slot.epoch == epoch)
                .and_then(|slot| {
                    slot.session = None;
                    slot.live.take()
                });
            drop(stale);
        }

        error
    }

    fn report(&self, wallet_id: &str, family: ChainFamily, error: &ConnectError) {
        self.inner.events.emit(
            EventKind::Error,
            json!({
                "walletId": wallet_id,
                "chainFamily": family,
                "kind": error.kind(),
                "cause": error.root_cause().kind(),
                "error": error.to_string(),
            }),
        );
    }

    async fn close(&self, family: ChainFamily, by_user: bool) {
        let (session, live) = {
            let mut slots = self.inner.slots.borrow_mut();
            let slot = slots.entry(family).or_default();
            slot.epoch += 1;
            (slot.session.take(), slot.live.take())
        };
        let Some(session) = session else {
            return;
        };

        if let Some(Live { adapter, guards }) = live {
            drop(guards);
            if adapter.supports_disconnect() {
                if let Err(error) = adapter.disconnect().await {
                    warn!(wallet = %session.wallet_id, %error, "the wallet failed to disconnect");
                }
            }
        }

        if by_user {
            self.inner
                .host
                .storage
                .store(&self.key(family, DISCONNECTED_KEY), "true");
        }

        info!(wallet = %session.wallet_id, %family, "disconnected");
        self.inner.events.emit(
            EventKind::Disconnect,
            json!({
                "walletId": session.wallet_id,
                "chainFamily": family,
            }),
        );

        if let (Some(store), Some(address)) =
            (&self.inner.host.connections, &session.canonical_address)
        {
            if let Err(error) = store.mark_disconnected(address).await {
                warn!(wallet = %session.wallet_id, %error, "could not record the disconnection");
            }
        }
    }

    fn sink(&self, family: ChainFamily, epoch: u64) -> EventSink {
        let inner = Rc::downgrade(&self.inner);
        Rc::new(move |event| {
            if let Some(inner) = inner.upgrade() {
                ConnectionManager { inner }.on_provider_event(family, epoch, event)
            }
        })
    }

    fn on_provider_event(&self, family: ChainFamily, epoch: u64, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountChanged(None) => {
                if !self.is_current(family, epoch) {
                    return;
                }
                info!(%family, "the wallet no longer exposes an account");
                let manager = self.clone();
                self.inner
                    .host
                    .runtime
                    .spawn(Box::pin(async move { manager.disconnect(family).await }));
            }
            ProviderEvent::AccountChanged(Some(raw)) => {
                let address = address::normalize(&raw).ok().filter(|canonical| {
                    raw.family == family && address::is_valid_for(family, canonical)
                });
                let Some(address) = address else {
                    warn!(%family, account = %raw.value, "ignoring an account change to an invalid address");
                    return;
                };

                let mut wallet = None;
                self.update(family, epoch, |session| {
                    if session.is_connected() {
                        session.canonical_address = Some(address.clone());
                        wallet = Some(session.wallet_id.clone());
                    }
                });
                let Some(wallet) = wallet else {
                    return;
                };

                info!(wallet = %wallet, %family, %address, "account changed");
                self.inner.events.emit(
                    EventKind::AccountChange,
                    json!({
                        "walletId": wallet,
                        "chainFamily": family,
                        "address": address,
                    }),
                );

                if let Some(store) = self.inner.host.connections.clone() {
                    self.inner.host.runtime.spawn(Box::pin(async move {
                        if let Err(error) = store.upsert(&address, &wallet, true).await {
                            warn!(%wallet, %error, "could not record the account change");
                        }
                    }));
                }
            }
            ProviderEvent::NetworkChanged(network) => {
                let mut wallet = None;
                self.update(family, epoch, |session| {
                    if session.is_connected() {
                        session.network = Some(network);
                        wallet = Some(session.wallet_id.clone());
                    }
                });
                let Some(wallet) = wallet else {
                    return;
                };

                info!(wallet = %wallet, %network, "wallet network changed");
                self.inner.events.emit(
                    EventKind::NetworkChange,
                    json!({
                        "walletId": wallet,
                        "chainFamily": family,
                        "network": network,
                    }),
                );
            }
        }
    }
}

/// enable the wallet and check what it handed over
async fn negotiate(
    adapter: &dyn ProtocolAdapter,
    family: ChainFamily,
) -> Result<Established, ConnectError> {
    let wallet = adapter.wallet_id();
    let api = adapter
        .enable()
        .await
        .map_err(|error| ConnectError::from_enable(wallet, error))?;

    api.ensure_complete()
        .map_err(|error| ConnectError::from_enable(wallet, error))?;

    let raw = api
        .raw_address()
        .await
        .map_err(|error| ConnectError::from_enable(wallet, error))?;
    let address = address::normalize(&raw)?;
    if raw.family != family || !address::is_valid_for(family, &address) {
        return Err(AddressDecodingError::new(raw.value, format!("not a {family} address")).into());
    }

    let network = match api.network().await {
        Ok(network) => Some(network),
        Err(error) => {
            warn!(wallet, %error, "could not read the wallet network");
            None
        }
    };

    Ok(Established {
        api,
        address,
        network,
    })
}
