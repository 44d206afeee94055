use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, DEFAULT_API_KEY, DEFAULT_API_USER};
use serde_json::{json, Value};
use tower::{Service, ServiceExt};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Form POST with the default credentials appended.
fn form_request(resource: &str, form: &str) -> Request<String> {
    let credentials = format!("api_user={DEFAULT_API_USER}&api_key={DEFAULT_API_KEY}");
    let body = if form.is_empty() {
        credentials
    } else {
        format!("{form}&{credentials}")
    };
    Request::builder()
        .method("POST")
        .uri(format!("/api/{resource}.json"))
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .unwrap()
}

async fn call<S>(app: &mut S, resource: &str, form: &str) -> (StatusCode, Value)
where
    S: Service<Request<String>, Response = axum::response::Response, Error = std::convert::Infallible>,
{
    let resp = ServiceExt::ready(app)
        .await
        .unwrap()
        .call(form_request(resource, form))
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

// --- auth ---

#[tokio::test]
async fn wrong_credentials_return_401_error_object() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/newsletter/list.json")
                .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body("api_user=someone&api_key=nope".to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], 401);
}

// --- routing ---

#[tokio::test]
async fn unknown_resource_returns_404() {
    let resp = app()
        .oneshot(form_request("newsletter/nothing", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_json_suffix_returns_404() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/newsletter/list")
                .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(format!("api_user={DEFAULT_API_USER}&api_key={DEFAULT_API_KEY}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_and_delete_read_form_from_body() {
    let mut app = app().into_service();
    call(&mut app, "newsletter/lists/add", "list=weekly").await;

    for method in ["GET", "DELETE"] {
        let request = Request::builder()
            .method(method)
            .uri("/api/newsletter/lists/get.json")
            .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!(
                "list=weekly&api_user={DEFAULT_API_USER}&api_key={DEFAULT_API_KEY}"
            ))
            .unwrap();
        let resp = ServiceExt::ready(&mut app)
            .await
            .unwrap()
            .call(request)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{method}");
        assert_eq!(body_json(resp).await, json!([{"list": "weekly"}]), "{method}");
    }
}

// --- newsletters ---

#[tokio::test]
async fn list_newsletters_empty() {
    let resp = app()
        .oneshot(form_request("newsletter/list", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!([]));
}

#[tokio::test]
async fn delete_unknown_newsletter_succeeds() {
    let resp = app()
        .oneshot(form_request("newsletter/delete", "name=ghost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"message": "success"}));
}

#[tokio::test]
async fn add_newsletter_requires_identity() {
    let resp = app()
        .oneshot(form_request(
            "newsletter/add",
            "identity=nobody&name=n&subject=s&text=t&html=h",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await, json!({"error": "Identity does not exist"}));
}

#[tokio::test]
async fn newsletter_lifecycle() {
    let mut app = app().into_service();

    let identity = "identity=sender&name=Sender&email=s%40example.com&address=1+Main+St\
                    &city=Oslo&state=OS&zip=0150&country=NO";
    let (status, _) = call(&mut app, "newsletter/identity/add", identity).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &mut app,
        "newsletter/add",
        "identity=sender&name=spring&subject=Hi&text=Hello&html=%3Cp%3EHello%3C%2Fp%3E",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // duplicate name
    let (status, body) = call(
        &mut app,
        "newsletter/add",
        "identity=sender&name=spring&subject=Hi&text=Hello&html=x",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Name already exists.");

    let (_, body) = call(&mut app, "newsletter/get", "name=spring").await;
    assert_eq!(body["html"], "<p>Hello</p>");
    assert_eq!(body["identity"], "sender");

    let (status, _) = call(
        &mut app,
        "newsletter/edit",
        "identity=sender&name=spring&newname=summer&subject=Yo&text=t&html=h",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&mut app, "newsletter/list", "").await;
    assert_eq!(body, json!([{"name": "summer"}]));

    let (status, _) = call(&mut app, "newsletter/delete", "name=summer").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&mut app, "newsletter/get", "name=summer").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// --- list members ---

#[tokio::test]
async fn member_batch_add_get_delete() {
    let mut app = app().into_service();

    let (status, _) = call(&mut app, "newsletter/lists/add", "list=customers").await;
    assert_eq!(status, StatusCode::OK);

    let a = serde_urlencoded::to_string(vec![("data[]", r#"{"email":"a@b.com","name":"A"}"#)]).unwrap();
    let c = serde_urlencoded::to_string(vec![("data[]", r#"{"email":"c@d.com","name":"C"}"#)]).unwrap();
    let (_, body) = call(
        &mut app,
        "newsletter/lists/email/add",
        &format!("list=customers&{a}&{c}"),
    )
    .await;
    assert_eq!(body, json!({"inserted": 2}));

    let (_, body) = call(
        &mut app,
        "newsletter/lists/email/get",
        "list=customers&email=c%40d.com",
    )
    .await;
    assert_eq!(body, json!([{"email": "c@d.com", "name": "C"}]));

    let (_, body) = call(
        &mut app,
        "newsletter/lists/email/delete",
        "list=customers&email=a%40b.com",
    )
    .await;
    assert_eq!(body, json!({"removed": 1}));

    let (_, body) = call(
        &mut app,
        "newsletter/lists/email/delete",
        "list=customers&email=a%40b.com",
    )
    .await;
    assert_eq!(body, json!({"removed": 0}));
}

#[tokio::test]
async fn member_add_to_unknown_list_fails() {
    let data = serde_urlencoded::to_string(vec![("data", r#"{"email":"a@b.com","name":"A"}"#)]).unwrap();
    let resp = app()
        .oneshot(form_request("newsletter/lists/email/add", &format!("list=none&{data}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "List does not exist");
}

// --- schedules ---

#[tokio::test]
async fn schedule_requires_recipients() {
    let mut app = app().into_service();

    call(
        &mut app,
        "newsletter/identity/add",
        "identity=i&name=n&email=e%40x.com&address=a&city=c&state=s&zip=z&country=c",
    )
    .await;
    call(&mut app, "newsletter/add", "identity=i&name=n&subject=s&text=t&html=h").await;

    let (status, body) = call(&mut app, "newsletter/schedule/add", "name=n&after=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Newsletter has no recipients");

    call(&mut app, "newsletter/lists/add", "list=l").await;
    call(&mut app, "newsletter/recipients/add", "name=n&list=l").await;

    let (status, _) = call(&mut app, "newsletter/schedule/add", "name=n&after=10").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&mut app, "newsletter/schedule/get", "name=n").await;
    assert_eq!(body, json!({"date": "+10 minutes"}));
}
