use crate::error::HandlerError;
use serde_json::{Value, json};
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};
use tracing::warn;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Discovery,
    Connect,
    Disconnect,
    NetworkChange,
    AccountChange,
    Error,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Discovery => "DISCOVERY",
            EventKind::Connect => "CONNECT",
            EventKind::Disconnect => "DISCONNECT",
            EventKind::NetworkChange => "NETWORK_CHANGE",
            EventKind::AccountChange => "ACCOUNT_CHANGE",
            EventKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event published by the bridge. Never modified once emitted.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BridgeEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Rc<dyn Fn(&BridgeEvent) -> Result<(), HandlerError>>;

struct Registration {
    kind: EventKind,
    id: HandlerId,
    handler: Handler,
}

struct Inner {
    handlers: Vec<Registration>,
    history: VecDeque<BridgeEvent>,
    limit: usize,
    next_event: u64,
    next_handler: u64,
}

/// Synchronous, ordered publish/subscribe with a bounded history.
///
/// Handlers are called in registration order, at emit time. A failing
/// handler does not stop the others: its failure is published as an `ERROR`
/// event naming the event it was processing.
pub struct EventBus {
    inner: RefCell<Inner>,
}

impl EventBus {
    pub const DEFAULT_HISTORY: usize = 50;

    pub fn new(limit: usize) -> Self {
        Self {
            inner: RefCell::new(Inner {
                handlers: Vec::new(),
                history: VecDeque::with_capacity(limit),
                limit,
                next_event: 0,
                next_handler: 0,
            }),
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&BridgeEvent) -> Result<(), HandlerError> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_handler += 1;
        let id = HandlerId(inner.next_handler);
        inner.handlers.push(Registration {
            kind,
            id,
            handler: Rc::new(handler),
        });
        id
    }

    /// returns `false` if the handler was not registered for `kind`
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.handlers.len();
        inner
            .handlers
            .retain(|registration| !(registration.kind == kind && registration.id == id));
        inner.handlers.len() != before
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .borrow()
            .handlers
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    pub fn emit(&self, kind: EventKind, data: Value) -> BridgeEvent {
        let event = self.record(kind, data);

        let failures = self.dispatch(&event);
        for (source, error) in failures {
            warn!(event = %source.kind, %error, "event handler failed");
            let failure = self.record(
                EventKind::Error,
                json!({
                    "source": source.kind,
                    "sourceId": source.id,
                    "message": error.to_string(),
                }),
            );
            // a handler failing on the failure report is only logged,
            // otherwise a throwing ERROR handler would loop forever
            for (_, error) in self.dispatch(&failure) {
                warn!(event = %failure.kind, %error, "event handler failed on a handler failure report");
            }
        }

        event
    }

    /// the last events emitted, oldest first
    pub fn history(&self) -> Vec<BridgeEvent> {
        self.inner.borrow().history.iter().cloned().collect()
    }

    fn record(&self, kind: EventKind, data: Value) -> BridgeEvent {
        let mut inner = self.inner.borrow_mut();
        inner.next_event += 1;
        let event = BridgeEvent {
            id: inner.next_event,
            kind,
            data,
        };

        if inner.limit > 0 {
            while inner.history.len() >= inner.limit {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());
        }

        event
    }

    fn dispatch<'a>(&self, event: &'a BridgeEvent) -> Vec<(&'a BridgeEvent, HandlerError)> {
        // handlers may register, remove or emit while we iterate
        let handlers: Vec<Handler> = self
            .inner
            .borrow()
            .handlers
            .iter()
            .filter(|registration| registration.kind == event.kind)
            .map(|registration| Rc::clone(&registration.handler))
            .collect();

        handlers
            .into_iter()
            .filter_map(|handler| handler(event).err())
            .map(|error| (event, error))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HISTORY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventBus")
            .field("handlers", &inner.handlers.len())
            .field("history", &inner.history.len())
            .field("limit", &inner.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::default();
        for n in 0..60 {
            bus.emit(EventKind::Discovery, json!({ "n": n }));
        }

        let history = bus.history();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].data, json!({ "n": 10 }));
        assert_eq!(history[49].data, json!({ "n": 59 }));
        assert!(history.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::default();
        let calls = Rc::new(RefCell::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let calls = Rc::clone(&calls);
            bus.on(EventKind::Connect, move |_| {
                calls.borrow_mut().push(name);
                Ok(())
            });
        }
        let other = Rc::clone(&calls);
        bus.on(EventKind::Disconnect, move |_| {
            other.borrow_mut().push("disconnect");
            Ok(())
        });

        bus.emit(EventKind::Connect, Value::Null);
        assert_eq!(*calls.borrow(), ["first", "second", "third"]);
    }

    #[test]
    fn off_removes_handler() {
        let bus = EventBus::default();
        let count = Rc::new(Cell::new(0));

        let counter = Rc::clone(&count);
        let id = bus.on(EventKind::AccountChange, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        bus.emit(EventKind::AccountChange, Value::Null);

        assert!(bus.off(EventKind::AccountChange, id));
        assert!(!bus.off(EventKind::AccountChange, id));
        bus.emit(EventKind::AccountChange, Value::Null);

        assert_eq!(count.get(), 1);
        assert_eq!(bus.handler_count(EventKind::AccountChange), 0);
    }

    #[test]
    fn failing_error_handler_is_reported() {
        let bus = EventBus::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        bus.on(EventKind::Error, |_| Err("handler exploded".into()));
        let after = Rc::clone(&seen);
        bus.on(EventKind::Error, move |event| {
            after.borrow_mut().push(event.id);
            Ok(())
        });

        let original = bus.emit(EventKind::Error, json!({ "message": "boom" }));

        let history = bus.history();
        assert_eq!(history.len(), 2);
        let secondary = &history[1];
        assert_eq!(secondary.kind, EventKind::Error);
        assert_eq!(secondary.data["source"], json!("ERROR"));
        assert_eq!(secondary.data["sourceId"], json!(original.id));
        assert_eq!(secondary.data["message"], json!("handler exploded"));

        // the second handler saw the original event and the failure report
        assert_eq!(*seen.borrow(), [original.id, secondary.id]);
    }

    #[test]
    fn failing_handler_does_not_stop_others() {
        let bus = EventBus::default();
        let ran = Rc::new(Cell::new(false));

        bus.on(EventKind::Connect, |_| Err("nope".into()));
        let flag = Rc::clone(&ran);
        bus.on(EventKind::Connect, move |_| {
            flag.set(true);
            Ok(())
        });

        bus.emit(EventKind::Connect, Value::Null);

        assert!(ran.get());
        let history = bus.history();
        assert_eq!(history[1].kind, EventKind::Error);
        assert_eq!(history[1].data["source"], json!("CONNECT"));
    }

    #[test]
    fn handler_may_emit() {
        let bus = Rc::new(EventBus::default());

        let inner = Rc::downgrade(&bus);
        bus.on(EventKind::Connect, move |_| {
            if let Some(bus) = inner.upgrade() {
                bus.emit(EventKind::AccountChange, Value::Null);
            }
            Ok(())
        });
        bus.emit(EventKind::Connect, Value::Null);

        let kinds: Vec<_> = bus.history().iter().map(|event| event.kind).collect();
        assert_eq!(kinds, [EventKind::Connect, EventKind::AccountChange]);
    }
}
