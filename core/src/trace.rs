//! Debug tracing of individual calls.
//!
//! The `Connector` reports each step of a call to a `TraceSink`, but only when
//! its configuration has `debug` enabled. Credential fields are removed from
//! the parameters before a `Request` event is built.

use serde_json::Value;

use crate::form::Params;

/// One step of a call.
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent<'a> {
    /// Outgoing call, parameters without credentials.
    Request {
        method: &'static str,
        url: &'a str,
        params: &'a Params,
    },
    /// Body exactly as received.
    RawResponse { status: u16, body: &'a str },
    /// Body after JSON decoding.
    Decoded { payload: &'a Value },
}

/// Receives trace events from a `Connector`.
pub trait TraceSink {
    fn record(&self, event: &TraceEvent<'_>);
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: &TraceEvent<'_>) {
        match event {
            TraceEvent::Request {
                method,
                url,
                params,
            } => {
                let fields: Vec<String> = params
                    .iter()
                    .map(|(name, value)| format!("{name}={value:?}"))
                    .collect();
                tracing::debug!(target: "newsletter_core::trace", method, url, params = %fields.join(", "), "request");
            }
            TraceEvent::RawResponse { status, body } => {
                tracing::debug!(target: "newsletter_core::trace", status, body, "raw response");
            }
            TraceEvent::Decoded { payload } => {
                tracing::debug!(target: "newsletter_core::trace", payload = %payload, "decoded");
            }
        }
    }
}
