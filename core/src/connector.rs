//! Authenticated single-call transport layer.
//!
//! # Design
//! `Connector` owns the configuration, a `Transport` and a trace sink. Each
//! `call` is one request: credentials are injected, the form is encoded, the
//! body is decoded, and the outcome is returned as a `Result`. The most
//! recent failure is also kept in a last-error slot that every call clears
//! before doing anything else, so a stale error never outlives the call that
//! produced it.

use std::cell::RefCell;

use serde_json::Value;

use crate::config::{normalize_endpoint, Config};
use crate::error::ApiError;
use crate::form::{self, Params};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport, UreqTransport};
use crate::trace::{TraceEvent, TraceSink, TracingSink};

/// Form field carrying the account identifier.
pub const API_USER_FIELD: &str = "api_user";
/// Form field carrying the secret key.
pub const API_KEY_FIELD: &str = "api_key";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Issues signed calls against the configured endpoint.
///
/// Not `Sync`: the last-error slot assumes one caller at a time.
pub struct Connector<T: Transport = UreqTransport> {
    config: Config,
    transport: T,
    sink: Box<dyn TraceSink>,
    last_error: RefCell<Option<ApiError>>,
}

impl Connector<UreqTransport> {
    pub fn new(config: Config) -> Self {
        let transport = UreqTransport::new(config.verify_tls);
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Connector<T> {
    pub fn with_transport(mut config: Config, transport: T) -> Self {
        config.endpoint = normalize_endpoint(&config.endpoint);
        Self {
            config,
            transport,
            sink: Box::new(TracingSink),
            last_error: RefCell::new(None),
        }
    }

    /// Replace the sink that receives debug traces.
    pub fn with_sink(mut self, sink: impl TraceSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Point subsequent calls at another deployment.
    pub fn set_endpoint(&mut self, endpoint: &str) {
        self.config.endpoint = normalize_endpoint(endpoint);
    }

    /// Failure of the most recent call, `None` if it succeeded.
    pub fn last_error(&self) -> Option<ApiError> {
        self.last_error.borrow().clone()
    }

    /// Text of the most recent failure; remote errors verbatim.
    pub fn last_error_message(&self) -> Option<String> {
        self.last_error.borrow().as_ref().map(ApiError::message)
    }

    /// `call` with the default `POST` method.
    pub fn post(&self, path: &str, params: Params) -> Result<Value, ApiError> {
        self.call(path, params, HttpMethod::Post)
    }

    /// Perform one call to `<endpoint>/<path>.json`.
    ///
    /// Returns the decoded payload unless the body carries a non-null `error` field,
    /// could not be decoded, or never arrived.
    pub fn call(&self, path: &str, params: Params, method: HttpMethod) -> Result<Value, ApiError> {
        self.last_error.replace(None);
        self.perform(path, params, method).inspect_err(|err| {
            self.last_error.replace(Some(err.clone()));
        })
    }

    fn perform(&self, path: &str, mut params: Params, method: HttpMethod) -> Result<Value, ApiError> {
        let credentials = &self.config.credentials;
        params.remove(API_USER_FIELD);
        params.remove(API_KEY_FIELD);

        let url = format!("{}/{path}.json", self.config.endpoint);
        self.trace(|| TraceEvent::Request {
            method: method.as_str(),
            url: &url,
            params: &params,
        });

        params.insert(API_USER_FIELD, credentials.api_user());
        params.insert(API_KEY_FIELD, credentials.api_key());
        let form = form::encode(&params)?;

        // Every verb carries the form in the body; the URL never holds credentials.
        let request = HttpRequest {
            method,
            url,
            headers: vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())],
            body: Some(form),
        };

        let response = self.transport.execute(&request)?;
        self.trace(|| TraceEvent::RawResponse {
            status: response.status,
            body: &response.body,
        });

        let payload = decode(&response)?;
        self.trace(|| TraceEvent::Decoded { payload: &payload });

        match payload.get("error") {
            Some(error) if !error.is_null() => {
                tracing::debug!(path, "remote error: {error}");
                Err(ApiError::Remote(error.clone()))
            }
            _ => Ok(payload),
        }
    }

    fn trace<'a>(&self, event: impl FnOnce() -> TraceEvent<'a>) {
        if self.config.debug {
            self.sink.record(&event());
        }
    }
}

fn decode(response: &HttpResponse) -> Result<Value, ApiError> {
    if response.body.trim().is_empty() {
        return Err(if response.is_success() {
            ApiError::Decode("empty response body".to_string())
        } else {
            ApiError::Http {
                status: response.status,
                body: String::new(),
            }
        });
    }
    serde_json::from_str(&response.body).map_err(|e| {
        if response.is_success() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Http {
                status: response.status,
                body: response.body.clone(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use crate::trace::recording::RecordingSink;

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn config() -> Config {
        Config::new("acct", "s3cret").with_endpoint("https://api.example.test/api/")
    }

    fn decoded_form(request: &HttpRequest) -> Vec<(String, String)> {
        serde_urlencoded::from_str(request.body.as_deref().unwrap_or_default()).unwrap()
    }

    #[test]
    fn builds_json_url_and_form_body() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|req| {
                req.method == HttpMethod::Post
                    && req.url == "https://api.example.test/api/newsletter/get.json"
                    && req.headers
                        == vec![(
                            "content-type".to_string(),
                            "application/x-www-form-urlencoded".to_string(),
                        )]
                    && decoded_form(req)
                        == vec![
                            ("name".to_string(), "spring".to_string()),
                            ("api_user".to_string(), "acct".to_string()),
                            ("api_key".to_string(), "s3cret".to_string()),
                        ]
            })
            .times(1)
            .returning(|_| Ok(ok(r#"{"name":"spring"}"#)));

        let connector = Connector::with_transport(config(), transport);
        let payload = connector
            .post("newsletter/get", Params::new().with("name", "spring"))
            .unwrap();
        assert_eq!(payload["name"], "spring");
        assert!(connector.last_error().is_none());
    }

    #[test]
    fn caller_cannot_override_credentials() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|req| {
                let form = decoded_form(req);
                form.contains(&("api_user".to_string(), "acct".to_string()))
                    && form.contains(&("api_key".to_string(), "s3cret".to_string()))
                    && !form.iter().any(|(_, v)| v == "forged")
            })
            .returning(|_| Ok(ok(r#"{"message":"success"}"#)));

        let connector = Connector::with_transport(config(), transport);
        let params = Params::new()
            .with("api_user", "forged")
            .with("api_key", "forged")
            .with("name", "n");
        connector.post("newsletter/delete", params).unwrap();
    }

    #[test]
    fn get_and_delete_keep_form_in_body() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|req| {
                req.method == HttpMethod::Get
                    && req.url == "https://api.example.test/api/newsletter/list.json"
                    && decoded_form(req)
                        == vec![
                            ("api_user".to_string(), "acct".to_string()),
                            ("api_key".to_string(), "s3cret".to_string()),
                        ]
            })
            .times(1)
            .returning(|_| Ok(ok("[]")));
        transport
            .expect_execute()
            .withf(|req| {
                req.method == HttpMethod::Delete
                    && !req.url.contains('?')
                    && !req.url.contains("api_key=")
                    && decoded_form(req).contains(&("name".to_string(), "n".to_string()))
            })
            .times(1)
            .returning(|_| Ok(ok(r#"{"message":"success"}"#)));

        let connector = Connector::with_transport(config(), transport);
        let payload = connector
            .call("newsletter/list", Params::new(), HttpMethod::Get)
            .unwrap();
        assert_eq!(payload, serde_json::json!([]));
        connector
            .call("newsletter/delete", Params::new().with("name", "n"), HttpMethod::Delete)
            .unwrap();
    }

    #[test]
    fn null_error_field_is_success() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(ok(r#"{"error":null,"message":"success"}"#)));

        let connector = Connector::with_transport(config(), transport);
        let payload = connector.post("newsletter/delete", Params::new()).unwrap();
        assert_eq!(payload["message"], "success");
        assert!(connector.last_error().is_none());
    }

    #[test]
    fn remote_error_sets_last_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(ok(r#"{"error":"Name already exists."}"#)));

        let connector = Connector::with_transport(config(), transport);
        let err = connector.post("newsletter/add", Params::new()).unwrap_err();
        assert!(err.is_remote());
        assert_eq!(
            connector.last_error_message().as_deref(),
            Some("Name already exists.")
        );
    }

    #[test]
    fn success_clears_previous_error() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ok(r#"{"error":"boom"}"#)));
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ok(r#"{"removed":0}"#)));

        let connector = Connector::with_transport(config(), transport);
        assert!(connector.post("newsletter/delete", Params::new()).is_err());
        assert!(connector.last_error().is_some());

        let payload = connector.post("newsletter/delete", Params::new()).unwrap();
        assert_eq!(payload["removed"], 0);
        assert!(connector.last_error().is_none());
    }

    #[test]
    fn empty_body_is_a_decode_failure() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|_| Ok(ok("")));

        let connector = Connector::with_transport(config(), transport);
        let err = connector.post("newsletter/get", Params::new()).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(connector.last_error(), Some(err));
    }

    #[test]
    fn html_error_page_maps_to_http_error() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|_| {
            Ok(HttpResponse {
                status: 502,
                headers: Vec::new(),
                body: "<html>Bad Gateway</html>".to_string(),
            })
        });

        let connector = Connector::with_transport(config(), transport);
        let err = connector.post("newsletter/get", Params::new()).unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 502, .. }));
    }

    #[test]
    fn json_error_with_failure_status_is_remote() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|_| {
            Ok(HttpResponse {
                status: 401,
                headers: Vec::new(),
                body: r#"{"error":{"code":401,"message":"Bad username / password"}}"#.to_string(),
            })
        });

        let connector = Connector::with_transport(config(), transport);
        let err = connector.post("newsletter/get", Params::new()).unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.message(), "Bad username / password");
    }

    #[test]
    fn transport_failure_is_recorded() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .returning(|_| Err(ApiError::Transport("timed out".to_string())));

        let connector = Connector::with_transport(config(), transport);
        let err = connector.post("newsletter/get", Params::new()).unwrap_err();
        assert_eq!(err, ApiError::Transport("timed out".to_string()));
        assert_eq!(connector.last_error(), Some(err));
    }

    #[test]
    fn set_endpoint_redirects_calls() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|req| req.url == "http://localhost:3000/api/newsletter/get.json")
            .returning(|_| Ok(ok("{}")));

        let mut connector = Connector::with_transport(config(), transport);
        connector.set_endpoint("http://localhost:3000/api/");
        connector.post("newsletter/get", Params::new()).unwrap();
    }

    #[test]
    fn debug_traces_never_contain_credentials() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(ok(r#"{"message":"success"}"#)));

        let sink = RecordingSink::default();
        let events = sink.events.clone();
        let connector =
            Connector::with_transport(config().with_debug(true), transport).with_sink(sink);
        connector
            .post("newsletter/delete", Params::new().with("name", "spring"))
            .unwrap();

        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert!(events[0].contains("spring"));
        assert!(events.iter().all(|e| !e.contains("s3cret") && !e.contains("api_user")));
    }

    #[test]
    fn traces_are_silent_without_debug() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|_| Ok(ok("{}")));

        let sink = RecordingSink::default();
        let events = sink.events.clone();
        let connector = Connector::with_transport(config(), transport).with_sink(sink);
        connector.post("newsletter/get", Params::new()).unwrap();
        assert!(events.borrow().is_empty());
    }
}
