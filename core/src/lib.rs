//! Synchronous client for the SendGrid newsletter (marketing email) API.
//!
//! # Overview
//! Two layers. `Connector` performs one signed form POST to
//! `<endpoint>/<path>.json` and turns the JSON answer into a `Result`.
//! `NewsletterClient` maps each remote operation (newsletters, recipient
//! lists and their members, identities, newsletter recipients, schedules)
//! to one `Connector` call.
//!
//! # Design
//! - The network sits behind the `Transport` trait; `UreqTransport` is the
//!   blocking default and tests swap in their own.
//! - Failures are always `Err`. The connector also keeps the failure of the
//!   most recent call, readable through `last_error`.
//! - Debug traces go to an injected `TraceSink` and never include the
//!   credential fields.
//!
//! ```no_run
//! use newsletter_core::{Config, NewsletterClient, Recipient};
//!
//! let client = NewsletterClient::new(Config::new("user", "key"));
//! match client.add_email_to_recipient_list("customers", &Recipient::new("a@b.com", "A")) {
//!     Ok(inserted) => println!("inserted {inserted}"),
//!     Err(err) => eprintln!("failed: {err}"),
//! }
//! ```

pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod form;
pub mod http;
pub mod trace;
pub mod types;

pub use client::{NewsletterClient, DEFAULT_NEWSLETTER_NAME, MAX_BATCH_RECIPIENTS};
pub use config::{Config, Credentials, DEFAULT_ENDPOINT};
pub use connector::Connector;
pub use error::ApiError;
pub use form::{ParamValue, Params};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, UreqTransport, USER_AGENT};
pub use trace::{TraceEvent, TraceSink, TracingSink};
pub use types::{Delivery, IdentityDetails, NewsletterContent, Recipient};
