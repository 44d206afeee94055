//! Request shapes for the resource operations.
//!
//! Nothing here is persisted; these types only give names to the groups of
//! fields that several operations share.

use std::num::NonZeroU32;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::form::Params;

/// Content of a newsletter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl NewsletterContent {
    pub(crate) fn apply(&self, params: Params) -> Params {
        params
            .with("subject", &self.subject)
            .with("text", &self.text)
            .with("html", &self.html)
    }
}

/// Sender profile details of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDetails {
    pub name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    /// State code.
    pub state: String,
    pub zip: String,
    /// Country code.
    pub country: String,
}

impl IdentityDetails {
    pub(crate) fn apply(&self, params: Params) -> Params {
        params
            .with("name", &self.name)
            .with("email", &self.email)
            .with("address", &self.address)
            .with("city", &self.city)
            .with("state", &self.state)
            .with("zip", &self.zip)
            .with("country", &self.country)
    }
}

/// One contact of a recipient list.
///
/// `email` and `name` are required by the service; any other columns go in
/// `extra` and are serialized alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Recipient {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }

    /// Add an extra column.
    pub fn with_field(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(column.to_string(), value.into());
        self
    }
}

/// When a scheduled newsletter goes out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Send as soon as possible.
    Now,
    /// Send at a fixed time.
    At(DateTime<FixedOffset>),
    /// Send this many minutes from now.
    After(NonZeroU32),
}

impl Delivery {
    pub(crate) fn apply(&self, params: Params) -> Params {
        match self {
            Delivery::Now => params,
            Delivery::At(at) => params.with("at", at.format("%Y-%m-%d %H:%M:%S %:z").to_string()),
            Delivery::After(minutes) => params.with("after", minutes.get()),
        }
    }
}
