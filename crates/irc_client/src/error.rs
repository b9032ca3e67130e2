//! The client-facing error taxonomy (spec.md section 7).
//!
//! Argument/state errors are returned from the public API and never recovered from internally.
//! Protocol violations reported by the *server* are a different thing entirely: `MessageProcessor`
//! catches those itself and turns them into `ClientEvent::ProtocolError` / `ClientEvent::Error`,
//! so they never surface as an `Err` out of the dispatch loop (spec.md section 7's propagation
//! policy).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrcClientError {
    #[error("required argument `{0}` was not provided")]
    ArgumentNull(&'static str),

    #[error("argument `{name}` was malformed: {detail}")]
    Argument { name: &'static str, detail: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport error: {0}")]
    Transport(String),
}
