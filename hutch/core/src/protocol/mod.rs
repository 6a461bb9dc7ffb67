//! Line-delimited JSON wire protocol
//!
//! The daemon speaks one JSON object per line over TCP: CRLF-terminated on
//! the way out, bare-LF tolerated on the way in. [`line`] handles framing,
//! [`messages`] the typed shapes. Nothing here touches sockets; the server
//! feeds bytes in and ships encoded lines out.

pub mod line;
pub mod messages;

pub use line::{encode, LineDecoder};
pub use messages::{
    parse_request, AnimatorState, ErrorClass, Expiration, ProtocolViolation, Request,
    ResponseStatus, ServerMessage,
};
