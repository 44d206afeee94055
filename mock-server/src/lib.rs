//! In-memory imitation of the newsletter API for tests and local runs.
//!
//! Every operation is a form request to `/api/<resource>.json`. The form is
//! read from the body whatever the verb, `GET` and `DELETE` included. Answers
//! follow the shapes of the real service: `{"message":"success"}` for plain writes,
//! `{"inserted":n}` / `{"removed":n}` for member changes, arrays for listings
//! and `{"error":...}` with a 4xx status for failures.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

pub const DEFAULT_API_USER: &str = "test-user";
pub const DEFAULT_API_KEY: &str = "test-key";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Newsletter {
    pub identity: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub lists: Vec<String>,
    pub schedule: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecipientList {
    pub name_column: Option<String>,
    pub members: Vec<Map<String, Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

#[derive(Debug, Default)]
pub struct Store {
    pub newsletters: BTreeMap<String, Newsletter>,
    pub lists: BTreeMap<String, RecipientList>,
    pub identities: BTreeMap<String, Identity>,
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone)]
struct AppState {
    db: Db,
    api_user: Arc<str>,
    api_key: Arc<str>,
}

/// Failure answer: status plus the value of the `error` field.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    error: Value,
}

impl Failure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: Value::String(message.into()),
        }
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

/// Submitted form fields, repeated keys preserved.
pub struct Fields(Vec<(String, String)>);

impl Fields {
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    fn require(&self, name: &str) -> Result<&str, Failure> {
        self.get(name)
            .ok_or_else(|| Failure::bad_request(format!("Missing {name}")))
    }

    /// Values of `name` and of the repeated `name[]` form.
    fn all(&self, name: &str) -> Vec<&str> {
        let repeated = format!("{name}[]");
        self.0
            .iter()
            .filter(|(key, _)| key == name || *key == repeated)
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

pub fn app() -> Router {
    app_with_credentials(DEFAULT_API_USER, DEFAULT_API_KEY)
}

pub fn app_with_credentials(api_user: &str, api_key: &str) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(Store::default())),
        api_user: Arc::from(api_user),
        api_key: Arc::from(api_key),
    };
    Router::new()
        .route("/api/{*path}", any(dispatch))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn dispatch(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, Failure> {
    let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(&body)
        .map_err(|e| Failure::bad_request(format!("Malformed form: {e}")))?;
    let fields = Fields(fields);
    if fields.get("api_user") != Some(&*state.api_user) || fields.get("api_key") != Some(&*state.api_key) {
        tracing::debug!(path = %path, "rejected credentials");
        return Err(Failure {
            status: StatusCode::UNAUTHORIZED,
            error: json!({"code": 401, "message": "Permission denied, wrong credentials"}),
        });
    }

    let resource = path.strip_suffix(".json").ok_or_else(|| Failure {
        status: StatusCode::NOT_FOUND,
        error: Value::String(format!("Unknown format for {path}")),
    })?;

    let mut db = state.db.write().await;
    let result = handle(&mut db, resource, &fields);
    tracing::debug!(resource, ok = result.is_ok(), "handled");
    result.map(Json)
}

fn handle(db: &mut Store, resource: &str, fields: &Fields) -> Result<Value, Failure> {
    match resource {
        "newsletter/add" => add_newsletter(db, fields),
        "newsletter/edit" => edit_newsletter(db, fields),
        "newsletter/get" => get_newsletter(db, fields),
        "newsletter/delete" => {
            db.newsletters.remove(fields.require("name")?);
            Ok(success())
        }
        "newsletter/list" => Ok(names(db.newsletters.keys(), fields.get("name"), "name")),
        "newsletter/lists/add" => add_list(db, fields),
        "newsletter/lists/edit" => edit_list(db, fields),
        "newsletter/lists/get" => {
            let filter = fields.get("list");
            if let Some(list) = filter {
                existing_list(db, list)?;
            }
            Ok(names(db.lists.keys(), filter, "list"))
        }
        "newsletter/lists/delete" => {
            let list = fields.require("list")?;
            db.lists
                .remove(list)
                .map(|_| success())
                .ok_or_else(|| Failure::bad_request("List does not exist"))
        }
        "newsletter/lists/email/add" => add_members(db, fields),
        "newsletter/lists/email/get" => get_members(db, fields),
        "newsletter/lists/email/delete" => delete_members(db, fields),
        "newsletter/identity/add" => add_identity(db, fields),
        "newsletter/identity/edit" => edit_identity(db, fields),
        "newsletter/identity/get" => {
            let name = fields.require("identity")?;
            let identity = db
                .identities
                .get(name)
                .ok_or_else(|| Failure::bad_request("Identity does not exist"))?;
            let mut value = json!(identity);
            value["identity"] = Value::String(name.to_string());
            Ok(value)
        }
        "newsletter/identity/list" => Ok(names(db.identities.keys(), fields.get("identity"), "identity")),
        "newsletter/identity/delete" => {
            let name = fields.require("identity")?;
            db.identities
                .remove(name)
                .map(|_| success())
                .ok_or_else(|| Failure::bad_request("Identity does not exist"))
        }
        "newsletter/recipients/add" => {
            let list = fields.require("list")?.to_string();
            existing_list(db, &list)?;
            let newsletter = existing_newsletter(db, fields.require("name")?)?;
            if !newsletter.lists.contains(&list) {
                newsletter.lists.push(list);
            }
            Ok(success())
        }
        "newsletter/recipients/get" => {
            let newsletter = existing_newsletter(db, fields.require("name")?)?;
            Ok(Value::Array(
                newsletter.lists.iter().map(|list| json!({ "list": list })).collect(),
            ))
        }
        "newsletter/recipients/delete" => {
            let list = fields.require("list")?;
            let newsletter = existing_newsletter(db, fields.require("name")?)?;
            newsletter.lists.retain(|attached| attached != list);
            Ok(success())
        }
        "newsletter/schedule/add" => add_schedule(db, fields),
        "newsletter/schedule/get" => {
            let newsletter = existing_newsletter(db, fields.require("name")?)?;
            newsletter
                .schedule
                .as_ref()
                .map(|date| json!({ "date": date }))
                .ok_or_else(|| Failure::bad_request("Newsletter is not scheduled"))
        }
        "newsletter/schedule/delete" => {
            existing_newsletter(db, fields.require("name")?)?.schedule = None;
            Ok(success())
        }
        other => Err(Failure {
            status: StatusCode::NOT_FOUND,
            error: Value::String(format!("Unknown endpoint {other}")),
        }),
    }
}

fn success() -> Value {
    json!({ "message": "success" })
}

fn names<'a>(keys: impl Iterator<Item = &'a String>, filter: Option<&str>, field: &str) -> Value {
    Value::Array(
        keys.filter(|key| filter.map_or(true, |wanted| wanted == key.as_str()))
            .map(|key| json!({ field: key }))
            .collect(),
    )
}

fn existing_newsletter<'a>(db: &'a mut Store, name: &str) -> Result<&'a mut Newsletter, Failure> {
    db.newsletters
        .get_mut(name)
        .ok_or_else(|| Failure::bad_request("Newsletter does not exist"))
}

fn existing_list<'a>(db: &'a mut Store, list: &str) -> Result<&'a mut RecipientList, Failure> {
    db.lists
        .get_mut(list)
        .ok_or_else(|| Failure::bad_request("List does not exist"))
}

fn add_newsletter(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let identity = fields.require("identity")?;
    let name = fields.require("name")?;
    if !db.identities.contains_key(identity) {
        return Err(Failure::bad_request("Identity does not exist"));
    }
    if db.newsletters.contains_key(name) {
        return Err(Failure::bad_request("Name already exists."));
    }
    let newsletter = Newsletter {
        identity: identity.to_string(),
        subject: fields.require("subject")?.to_string(),
        text: fields.require("text")?.to_string(),
        html: fields.require("html")?.to_string(),
        lists: Vec::new(),
        schedule: None,
    };
    db.newsletters.insert(name.to_string(), newsletter);
    Ok(success())
}

fn edit_newsletter(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let name = fields.require("name")?;
    let newname = fields.require("newname")?;
    if name != newname && db.newsletters.contains_key(newname) {
        return Err(Failure::bad_request("Name already exists."));
    }
    let mut newsletter = db
        .newsletters
        .remove(name)
        .ok_or_else(|| Failure::bad_request("Newsletter does not exist"))?;
    if let Some(identity) = fields.get("identity") {
        newsletter.identity = identity.to_string();
    }
    if let Some(subject) = fields.get("subject") {
        newsletter.subject = subject.to_string();
    }
    if let Some(text) = fields.get("text") {
        newsletter.text = text.to_string();
    }
    if let Some(html) = fields.get("html") {
        newsletter.html = html.to_string();
    }
    db.newsletters.insert(newname.to_string(), newsletter);
    Ok(success())
}

fn get_newsletter(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let name = fields.require("name")?;
    let newsletter = existing_newsletter(db, name)?;
    Ok(json!({
        "name": name,
        "identity": newsletter.identity,
        "subject": newsletter.subject,
        "text": newsletter.text,
        "html": newsletter.html,
        "can_edit": true,
        "type": "html",
    }))
}

fn add_list(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let list = fields.require("list")?;
    if db.lists.contains_key(list) {
        return Err(Failure::bad_request("List already exists"));
    }
    let recipients = RecipientList {
        name_column: fields.get("name").map(str::to_string),
        members: Vec::new(),
    };
    db.lists.insert(list.to_string(), recipients);
    Ok(success())
}

fn edit_list(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let list = fields.require("list")?;
    let newlist = fields.require("newlist")?;
    if db.lists.contains_key(newlist) {
        return Err(Failure::bad_request("List already exists"));
    }
    let recipients = db
        .lists
        .remove(list)
        .ok_or_else(|| Failure::bad_request("List does not exist"))?;
    db.lists.insert(newlist.to_string(), recipients);
    for newsletter in db.newsletters.values_mut() {
        for attached in newsletter.lists.iter_mut().filter(|attached| *attached == list) {
            *attached = newlist.to_string();
        }
    }
    Ok(success())
}

fn add_members(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let list = fields.require("list")?;
    let data = fields.all("data");
    if data.is_empty() {
        return Err(Failure::bad_request("Missing data"));
    }
    if data.len() > 1000 {
        return Err(Failure::bad_request("Too many recipients, max 1000"));
    }

    let mut records = Vec::with_capacity(data.len());
    for raw in data {
        let record: Map<String, Value> =
            serde_json::from_str(raw).map_err(|_| Failure::bad_request("Invalid JSON data"))?;
        let valid_email = record
            .get("email")
            .and_then(Value::as_str)
            .is_some_and(|email| email.contains('@'));
        if !valid_email || !record.contains_key("name") {
            return Err(Failure::bad_request("Invalid email"));
        }
        records.push(record);
    }

    let recipients = existing_list(db, list)?;
    let inserted = records.len();
    for record in records {
        recipients
            .members
            .retain(|member| member.get("email") != record.get("email"));
        recipients.members.push(record);
    }
    Ok(json!({ "inserted": inserted }))
}

fn get_members(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let wanted = fields.all("email");
    let recipients = existing_list(db, fields.require("list")?)?;
    Ok(Value::Array(
        recipients
            .members
            .iter()
            .filter(|member| {
                wanted.is_empty()
                    || member
                        .get("email")
                        .and_then(Value::as_str)
                        .is_some_and(|email| wanted.contains(&email))
            })
            .cloned()
            .map(Value::Object)
            .collect(),
    ))
}

fn delete_members(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let emails = fields.all("email");
    if emails.is_empty() {
        return Err(Failure::bad_request("Missing email"));
    }
    let recipients = existing_list(db, fields.require("list")?)?;
    let before = recipients.members.len();
    recipients.members.retain(|member| {
        !member
            .get("email")
            .and_then(Value::as_str)
            .is_some_and(|email| emails.contains(&email))
    });
    Ok(json!({ "removed": before - recipients.members.len() }))
}

fn identity_from(fields: &Fields) -> Result<Identity, Failure> {
    Ok(Identity {
        name: fields.require("name")?.to_string(),
        email: fields.require("email")?.to_string(),
        address: fields.require("address")?.to_string(),
        city: fields.require("city")?.to_string(),
        state: fields.require("state")?.to_string(),
        zip: fields.require("zip")?.to_string(),
        country: fields.require("country")?.to_string(),
    })
}

fn add_identity(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let name = fields.require("identity")?;
    if db.identities.contains_key(name) {
        return Err(Failure::bad_request("Identity already exists"));
    }
    let identity = identity_from(fields)?;
    db.identities.insert(name.to_string(), identity);
    Ok(success())
}

fn edit_identity(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let name = fields.require("identity")?;
    let newname = fields.get("newidentity").unwrap_or(name);
    if !db.identities.contains_key(name) {
        return Err(Failure::bad_request("Identity does not exist"));
    }
    if name != newname && db.identities.contains_key(newname) {
        return Err(Failure::bad_request("Identity already exists"));
    }
    let identity = identity_from(fields)?;
    db.identities.remove(name);
    db.identities.insert(newname.to_string(), identity);
    for newsletter in db.newsletters.values_mut().filter(|n| n.identity == name) {
        newsletter.identity = newname.to_string();
    }
    Ok(success())
}

fn add_schedule(db: &mut Store, fields: &Fields) -> Result<Value, Failure> {
    let at = fields.get("at").map(str::to_string);
    let after = fields
        .get("after")
        .map(|after| match after.parse::<u32>() {
            Ok(minutes) if minutes > 0 => Ok(format!("+{minutes} minutes")),
            _ => Err(Failure::bad_request("after must be a positive integer")),
        })
        .transpose()?;
    let newsletter = existing_newsletter(db, fields.require("name")?)?;
    if newsletter.lists.is_empty() {
        return Err(Failure::bad_request("Newsletter has no recipients"));
    }
    newsletter.schedule = Some(at.or(after).unwrap_or_else(|| "now".to_string()));
    Ok(success())
}
