//! Webhook request and normalized event types

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::payments::money::Money;
use crate::payments::types::PaymentMethod;

/// Raw inbound delivery, as received by the HTTP layer.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Provider marker from the route, e.g. `card`
    pub provider: String,
    /// Header names are stored lowercased
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new<I, K, V>(provider: impl Into<String>, headers: I, body: impl Into<Vec<u8>>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            provider: provider.into(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A delivery after verification and parsing. Never persisted.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: PaymentMethod,
    pub event_type: String,
    pub payload: Value,
    pub signature: Option<String>,
    /// Filled in once the owning order is resolved
    pub order_id: Option<Uuid>,
}

/// What the event means for the order, independent of provider vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Funds captured or settlement confirmed
    CaptureCompleted,
    /// Authorized but not yet captured
    Approved,
    /// Payment declined or canceled before capture
    Denied,
    /// Captured funds pulled back (chargeback, returned transfer)
    Reversed,
    Refunded,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CaptureCompleted => "capture_completed",
            EventKind::Approved => "approved",
            EventKind::Denied => "denied",
            EventKind::Reversed => "reversed",
            EventKind::Refunded => "refunded",
            EventKind::Unknown => "unknown",
        }
    }
}

/// Provider event normalized by a `WebhookSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub provider: PaymentMethod,
    pub event_id: Option<String>,
    pub event_type: String,
    pub kind: EventKind,
    /// External references to resolve the order by, most specific first
    pub references: Vec<String>,
    /// Id recorded as the order's payment reference on capture
    pub transaction_id: Option<String>,
    /// Order id embedded in provider metadata
    pub order_hint: Option<Uuid>,
    pub amount: Option<Money>,
    pub refund_id: Option<String>,
    pub reason: Option<String>,
}

impl ProviderEvent {
    pub fn new(provider: PaymentMethod, event_type: impl Into<String>, kind: EventKind) -> Self {
        Self {
            provider,
            event_id: None,
            event_type: event_type.into(),
            kind,
            references: Vec::new(),
            transaction_id: None,
            order_hint: None,
            amount: None,
            refund_id: None,
            reason: None,
        }
    }
}

/// Result reported in the acknowledgement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    /// The order already reflected the event
    Duplicate,
    /// Unknown event type or an event the order cannot act on
    Ignored,
    /// No order matched; logged for manual reconciliation
    Unresolved,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Unresolved => "unresolved",
        }
    }
}

/// Read an optional UUID out of a JSON field.
pub(crate) fn uuid_field(value: Option<&Value>) -> Option<Uuid> {
    value
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}
