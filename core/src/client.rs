//! Typed operations of the newsletter API.
//!
//! # Design
//! `NewsletterClient` owns a `Connector` and nothing else. Every operation is
//! a mapping from arguments to a `Params` bag plus one relative path, handed
//! to `Connector::post`. The only operation that makes more than one call is
//! `edit_recipient_list_email`, because the service has no edit primitive
//! for list members.

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::connector::Connector;
use crate::error::ApiError;
use crate::form::Params;
use crate::http::{Transport, UreqTransport};
use crate::trace::TraceSink;
use crate::types::{Delivery, IdentityDetails, NewsletterContent};

/// Name the service suggests for newsletters created through the API.
pub const DEFAULT_NEWSLETTER_NAME: &str = "Newsletter Using API";

/// Most list members one `newsletter/lists/email/add` call accepts.
pub const MAX_BATCH_RECIPIENTS: usize = 1000;

/// Client for newsletters, recipient lists, identities and schedules.
pub struct NewsletterClient<T: Transport = UreqTransport> {
    connector: Connector<T>,
}

impl NewsletterClient<UreqTransport> {
    pub fn new(config: Config) -> Self {
        Self {
            connector: Connector::new(config),
        }
    }
}

impl<T: Transport> NewsletterClient<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        Self {
            connector: Connector::with_transport(config, transport),
        }
    }

    /// Replace the sink that receives debug traces.
    pub fn with_sink(self, sink: impl TraceSink + 'static) -> Self {
        Self {
            connector: self.connector.with_sink(sink),
        }
    }

    pub fn connector(&self) -> &Connector<T> {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut Connector<T> {
        &mut self.connector
    }

    /// Failure of the most recent call made by this client.
    pub fn last_error(&self) -> Option<ApiError> {
        self.connector.last_error()
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.connector.last_error_message()
    }

    // -----------------------------------------------------------------------
    // Newsletters
    // -----------------------------------------------------------------------

    /// Create a newsletter sent from `identity`.
    pub fn add_newsletter(
        &self,
        identity: &str,
        name: &str,
        content: &NewsletterContent,
    ) -> Result<Value, ApiError> {
        let params = Params::new().with("identity", identity).with("name", name);
        self.connector.post("newsletter/add", content.apply(params))
    }

    /// Replace identity, name and content of the newsletter `name`.
    pub fn edit_newsletter(
        &self,
        identity: &str,
        name: &str,
        newname: &str,
        content: &NewsletterContent,
    ) -> Result<Value, ApiError> {
        let params = Params::new()
            .with("identity", identity)
            .with("name", name)
            .with("newname", newname);
        self.connector.post("newsletter/edit", content.apply(params))
    }

    pub fn get_newsletter(&self, name: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/get", Params::new().with("name", name))
    }

    /// Succeeds even when no newsletter called `name` exists.
    pub fn delete_newsletter(&self, name: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/delete", Params::new().with("name", name))
    }

    /// All newsletters, or only `name` to check that it exists.
    pub fn list_newsletters(&self, name: Option<&str>) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/list", Params::new().with_opt("name", name))
    }

    // -----------------------------------------------------------------------
    // Recipient lists
    // -----------------------------------------------------------------------

    /// Create a list. `name_column` renames the column holding contact names.
    pub fn add_recipient_list(&self, list: &str, name_column: Option<&str>) -> Result<Value, ApiError> {
        let params = Params::new().with("list", list).with_opt("name", name_column);
        self.connector.post("newsletter/lists/add", params)
    }

    pub fn edit_recipient_list(&self, list: &str, newlist: &str) -> Result<Value, ApiError> {
        let params = Params::new().with("list", list).with("newlist", newlist);
        self.connector.post("newsletter/lists/edit", params)
    }

    /// All lists, or only `list`.
    pub fn get_recipient_list(&self, list: Option<&str>) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/lists/get", Params::new().with_opt("list", list))
    }

    pub fn delete_recipient_list(&self, list: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/lists/delete", Params::new().with("list", list))
    }

    // -----------------------------------------------------------------------
    // List members
    // -----------------------------------------------------------------------

    /// Add one contact to `list`; returns how many records were inserted.
    ///
    /// `record` must serialize to an object with at least `email` and `name`.
    pub fn add_email_to_recipient_list<R>(&self, list: &str, record: &R) -> Result<u64, ApiError>
    where
        R: Serialize + ?Sized,
    {
        let params = Params::new().with("list", list).with("data", to_json(record)?);
        let payload = self.connector.post("newsletter/lists/email/add", params)?;
        count(&payload, "inserted")
    }

    /// Add up to `MAX_BATCH_RECIPIENTS` contacts in one call; returns how many
    /// records were inserted.
    pub fn add_emails_to_recipient_list<R>(&self, list: &str, records: &[R]) -> Result<u64, ApiError>
    where
        R: Serialize,
    {
        if records.len() > MAX_BATCH_RECIPIENTS {
            return Err(ApiError::BatchTooLarge {
                len: records.len(),
                max: MAX_BATCH_RECIPIENTS,
            });
        }
        let data = records
            .iter()
            .map(to_json)
            .collect::<Result<Vec<_>, _>>()?;
        let params = Params::new().with("list", list).with("data", data);
        let payload = self.connector.post("newsletter/lists/email/add", params)?;
        count(&payload, "inserted")
    }

    /// Contacts of `list`, or only the one with `email`.
    pub fn get_recipient_list_emails(&self, list: &str, email: Option<&str>) -> Result<Value, ApiError> {
        let params = Params::new().with("list", list).with_opt("email", email);
        self.connector.post("newsletter/lists/email/get", params)
    }

    /// Remove `email` from `list`; returns how many records were removed,
    /// zero when the contact was not there.
    pub fn delete_email_from_recipient_list(&self, list: &str, email: &str) -> Result<u64, ApiError> {
        let params = Params::new().with("list", list).with("email", email);
        let payload = self.connector.post("newsletter/lists/email/delete", params)?;
        count(&payload, "removed")
    }

    /// Replace the contact `email` of `list` with `record`.
    ///
    /// The service cannot edit a member, so this fetches the current record,
    /// deletes it, and adds `record`. If the add fails the original record is
    /// added back and `ApiError::EditFailed` reports whether that worked.
    ///
    /// This is **not atomic**. If the process stops after the delete and
    /// before the add, the contact stays deleted. Calls must not interleave
    /// with other writes to the same member.
    pub fn edit_recipient_list_email<R>(&self, list: &str, email: &str, record: &R) -> Result<u64, ApiError>
    where
        R: Serialize + ?Sized,
    {
        let existing = self.get_recipient_list_emails(list, Some(email))?;
        let original = first_record(existing).ok_or_else(|| ApiError::MemberNotFound {
            list: list.to_string(),
            email: email.to_string(),
        })?;

        self.delete_email_from_recipient_list(list, email)?;

        match self.add_email_to_recipient_list(list, record) {
            Ok(inserted) => Ok(inserted),
            Err(err) => {
                let restored = match self.add_email_to_recipient_list(list, &original) {
                    Ok(_) => true,
                    Err(restore_err) => {
                        tracing::warn!(list, email, "could not restore list member: {restore_err}");
                        false
                    }
                };
                Err(ApiError::EditFailed {
                    source: Box::new(err),
                    restored,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Identities
    // -----------------------------------------------------------------------

    pub fn add_identity(&self, identity: &str, details: &IdentityDetails) -> Result<Value, ApiError> {
        let params = Params::new().with("identity", identity);
        self.connector
            .post("newsletter/identity/add", details.apply(params))
    }

    /// Rename `identity` to `newidentity` and replace its details.
    pub fn edit_identity(
        &self,
        identity: &str,
        newidentity: &str,
        details: &IdentityDetails,
    ) -> Result<Value, ApiError> {
        let params = Params::new()
            .with("identity", identity)
            .with("newidentity", newidentity);
        self.connector
            .post("newsletter/identity/edit", details.apply(params))
    }

    pub fn get_identity(&self, identity: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/identity/get", Params::new().with("identity", identity))
    }

    /// All identities, or only `identity` to check that it exists.
    pub fn list_identities(&self, identity: Option<&str>) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/identity/list", Params::new().with_opt("identity", identity))
    }

    pub fn delete_identity(&self, identity: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/identity/delete", Params::new().with("identity", identity))
    }

    // -----------------------------------------------------------------------
    // Newsletter recipients
    // -----------------------------------------------------------------------

    /// Attach recipient list `list` to newsletter `name`.
    pub fn add_recipients(&self, name: &str, list: &str) -> Result<Value, ApiError> {
        let params = Params::new().with("name", name).with("list", list);
        self.connector.post("newsletter/recipients/add", params)
    }

    pub fn get_recipients(&self, name: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/recipients/get", Params::new().with("name", name))
    }

    pub fn delete_recipients(&self, name: &str, list: &str) -> Result<Value, ApiError> {
        let params = Params::new().with("name", name).with("list", list);
        self.connector.post("newsletter/recipients/delete", params)
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    pub fn add_schedule(&self, name: &str, delivery: &Delivery) -> Result<Value, ApiError> {
        let params = delivery.apply(Params::new().with("name", name));
        self.connector.post("newsletter/schedule/add", params)
    }

    pub fn get_schedule(&self, name: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/schedule/get", Params::new().with("name", name))
    }

    /// Cancel the scheduled delivery of `name`.
    pub fn delete_schedule(&self, name: &str) -> Result<Value, ApiError> {
        self.connector
            .post("newsletter/schedule/delete", Params::new().with("name", name))
    }
}

fn to_json<R: Serialize + ?Sized>(record: &R) -> Result<String, ApiError> {
    serde_json::to_string(record).map_err(|e| ApiError::Encoding(e.to_string()))
}

/// Read a record count the service reports on a successful write.
fn count(payload: &Value, field: &'static str) -> Result<u64, ApiError> {
    payload
        .get(field)
        .and_then(|value| value.as_u64().or_else(|| value.as_str()?.parse().ok()))
        .ok_or(ApiError::MissingField(field))
}

/// Member lookups answer with an array; a bare object is a single record.
fn first_record(payload: Value) -> Option<Value> {
    match payload {
        Value::Array(records) => records.into_iter().next(),
        Value::Object(map) if !map.is_empty() => Some(Value::Object(map)),
        _ => None,
    }
}
