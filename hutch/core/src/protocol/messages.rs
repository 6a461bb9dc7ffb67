//! Wire protocol message types
//!
//! Everything that crosses a client socket lives here. Inbound traffic is a
//! closed tagged union over `type` (`sleep`, `wakeup`, `command`, `info`);
//! outbound traffic is either a `state` notification or a `response`. The
//! `sequence` and `animation` payloads are opaque JSON passed through to the
//! device driver unmodified, and `request_id` is an opaque echo token that
//! may be any JSON value.
//!
//! Unknown fields on inbound messages are ignored. An unknown `type`, a line
//! that is not JSON, or a missing required field all surface as a
//! [`ProtocolViolation`] that still carries the `request_id` when one could
//! be salvaged from the line.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Global state
// ============================================================================

/// Global activity mode of the appliance.
///
/// Exactly one value at any instant, owned by the animator task. The wire
/// representation is the lowercase name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimatorState {
    /// Awake and free; ambient info animations may render.
    Idle,
    /// Low-power posture; commands are queued silently.
    Asleep,
    /// A command sequence is being rendered by the device.
    Playing,
}

impl AnimatorState {
    /// Wire string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimatorState::Idle => "idle",
            AnimatorState::Asleep => "asleep",
            AnimatorState::Playing => "playing",
        }
    }
}

impl fmt::Display for AnimatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Command expiration
// ============================================================================

/// Absolute instant after which a queued command is abandoned.
///
/// Clients send ISO-8601 strings. Offset-carrying forms (RFC 3339) are
/// honored as-is; naive forms are interpreted in the daemon's local timezone,
/// which is the clock the on-device clients stamp them with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Expiration(DateTime<Local>);

impl Expiration {
    /// Wrap an already-resolved instant.
    pub fn at(instant: DateTime<Local>) -> Self {
        Expiration(instant)
    }

    /// True once the instant lies strictly in the past.
    pub fn is_past(&self, now: DateTime<Local>) -> bool {
        self.0 < now
    }
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Expiration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_iso8601(&text)
            .map(Expiration)
            .map_err(serde::de::Error::custom)
    }
}

fn parse_iso8601(text: &str) -> Result<DateTime<Local>, String> {
    if let Ok(stamped) = DateTime::parse_from_rfc3339(text) {
        return Ok(stamped.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| format!("unrecognized timestamp {text:?}: {e}"))?;
    match naive.and_local_timezone(Local) {
        chrono::LocalResult::Single(instant) => Ok(instant),
        // DST fold: take the earlier reading.
        chrono::LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        chrono::LocalResult::None => {
            Err(format!("timestamp {text:?} does not exist in the local timezone"))
        }
    }
}

// ============================================================================
// Inbound requests
// ============================================================================

/// A decoded client request.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Put the device into its low-power posture.
    Sleep {
        /// Opaque echo token, returned verbatim on the response.
        request_id: Option<Value>,
    },
    /// Wake the device; drains any commands queued while asleep.
    Wakeup {
        /// Opaque echo token.
        request_id: Option<Value>,
    },
    /// Queue a sequence for playback.
    Command {
        /// Opaque echo token.
        request_id: Option<Value>,
        /// Device-specific animation/audio description, passed through.
        sequence: Value,
        /// Optional absolute expiry, checked lazily at dispatch.
        expiration: Option<Expiration>,
    },
    /// Register, replace, or clear a named ambient animation.
    Info {
        /// Opaque echo token.
        request_id: Option<Value>,
        /// Name of the ambient slot.
        info_id: String,
        /// Animation payload; absent (or JSON null) clears the slot.
        animation: Option<Value>,
    },
}

impl Request {
    /// Echo token carried by this request, if any.
    pub fn request_id(&self) -> Option<&Value> {
        match self {
            Request::Sleep { request_id }
            | Request::Wakeup { request_id }
            | Request::Command { request_id, .. }
            | Request::Info { request_id, .. } => request_id.as_ref(),
        }
    }

    /// Wire name of the request kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Sleep { .. } => "sleep",
            Request::Wakeup { .. } => "wakeup",
            Request::Command { .. } => "command",
            Request::Info { .. } => "info",
        }
    }
}

/// A line that could not be decoded into a [`Request`].
///
/// Carries the `request_id` when the line was at least valid JSON with one,
/// so the error response can still echo it.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{detail}")]
pub struct ProtocolViolation {
    /// Salvaged echo token, if the line was valid JSON carrying one.
    pub request_id: Option<Value>,
    /// Human-readable description of what was wrong with the line.
    pub detail: String,
}

/// Decode one complete line into a typed request.
///
/// Parsing is two-stage: the line is first read as generic JSON so a
/// `request_id` survives even when the typed decode fails, then narrowed to
/// the tagged union.
pub fn parse_request(line: &[u8]) -> Result<Request, ProtocolViolation> {
    let value: Value = serde_json::from_slice(line).map_err(|e| ProtocolViolation {
        request_id: None,
        detail: format!("invalid JSON: {e}"),
    })?;
    let request_id = value
        .get("request_id")
        .filter(|token| !token.is_null())
        .cloned();
    serde_json::from_value(value).map_err(|e| ProtocolViolation {
        request_id,
        detail: e.to_string(),
    })
}

// ============================================================================
// Outbound messages
// ============================================================================

/// Outcome category of a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The request was carried out.
    Ok,
    /// The request failed; `class` says how.
    Error,
    /// A command's expiration passed before dispatch. Not an error.
    Expired,
}

/// Machine-readable failure class carried on error responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The line was not a well-formed request.
    MalformedPacket,
    /// A sleep/wakeup that the current posture rejects.
    InvalidState,
    /// The device driver reported a playback failure.
    DeviceFailure,
}

/// Server → client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current global state, sent on registration and on every transition.
    State {
        /// The committed state.
        state: AnimatorState,
    },
    /// Outcome of exactly one request.
    Response {
        /// Echo token from the request; omitted when it carried none.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
        /// Outcome category.
        status: ResponseStatus,
        /// Failure class, present only when `status` is `error`.
        #[serde(skip_serializing_if = "Option::is_none")]
        class: Option<ErrorClass>,
        /// Optional human-readable detail on errors.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerMessage {
    /// A `state` notification.
    pub fn state(state: AnimatorState) -> Self {
        ServerMessage::State { state }
    }

    /// A successful response.
    pub fn ok(request_id: Option<Value>) -> Self {
        ServerMessage::Response {
            request_id,
            status: ResponseStatus::Ok,
            class: None,
            message: None,
        }
    }

    /// An expired-command response.
    pub fn expired(request_id: Option<Value>) -> Self {
        ServerMessage::Response {
            request_id,
            status: ResponseStatus::Expired,
            class: None,
            message: None,
        }
    }

    /// An error response with class and detail.
    pub fn error(request_id: Option<Value>, class: ErrorClass, detail: impl Into<String>) -> Self {
        ServerMessage::Response {
            request_id,
            status: ResponseStatus::Error,
            class: Some(class),
            message: Some(detail.into()),
        }
    }
}
