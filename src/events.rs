use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::AmoError;
use crate::response::DomainResponse;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeConnect,
    BeforeFetchToken,
    BeforeRefreshToken,
    NewToken,
    CheckToken,
    Connected,
    AuthError,
    Error,
    ExpiresUnknown,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::BeforeConnect,
        EventKind::BeforeFetchToken,
        EventKind::BeforeRefreshToken,
        EventKind::NewToken,
        EventKind::CheckToken,
        EventKind::Connected,
        EventKind::AuthError,
        EventKind::Error,
        EventKind::ExpiresUnknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BeforeConnect => "beforeConnect",
            EventKind::BeforeFetchToken => "beforeFetchToken",
            EventKind::BeforeRefreshToken => "beforeRefreshToken",
            EventKind::NewToken => "newToken",
            EventKind::CheckToken => "checkToken",
            EventKind::Connected => "connected",
            EventKind::AuthError => "authError",
            EventKind::Error => "error",
            EventKind::ExpiresUnknown => "expiresUnknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = AmoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AmoError::UnknownEvent {
                component: "events",
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Empty,
    Flag(bool),
    Response(Box<DomainResponse>),
    Failure {
        message: String,
        code: &'static str,
        data: Option<Value>,
    },
}

impl EventPayload {
    pub fn failure(err: &AmoError) -> Self {
        EventPayload::Failure {
            message: err.to_string(),
            code: err.code(),
            data: err.data().cloned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub payload: EventPayload,
}

/// Shared broadcast channel that components publish lifecycle events to.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Bind the bus to a component and the closed set of events it may emit.
    pub fn emitter(&self, component: &'static str, allowed: &'static [EventKind]) -> Emitter {
        Emitter {
            bus: self.clone(),
            component,
            allowed,
        }
    }
}

/// A component's handle on an [`EventBus`], restricted to its own events.
#[derive(Debug, Clone)]
pub struct Emitter {
    bus: EventBus,
    component: &'static str,
    allowed: &'static [EventKind],
}

impl Emitter {
    pub fn allows(&self, kind: EventKind) -> bool {
        self.allowed.contains(&kind)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish an event. Returns the number of subscribers that received it;
    /// having none is not an error.
    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> Result<usize, AmoError> {
        if !self.allows(kind) {
            return Err(AmoError::UnknownEvent {
                component: self.component,
                name: kind.as_str().to_string(),
            });
        }
        tracing::trace!(component = self.component, event = %kind, "emit");
        Ok(self.bus.tx.send(Event { kind, payload }).unwrap_or(0))
    }

    pub fn emit_named(&self, name: &str, payload: EventPayload) -> Result<usize, AmoError> {
        let kind = name.parse::<EventKind>().map_err(|_| AmoError::UnknownEvent {
            component: self.component,
            name: name.to_string(),
        })?;
        self.emit(kind, payload)
    }
}
