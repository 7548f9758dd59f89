use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::json;

fn title_of_length(body_length: usize) -> serde_json::Value {
    // `{"title":""}` is 12 bytes.
    json!({ "title": "x".repeat(body_length - 12) })
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let config = indoc! {r#"
        [server.request_size]
        default_max_size = 1024
        routes = []
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.post("/api/workflows", &title_of_length(2000)).await;
    assert_eq!(response.status(), 413);

    let mut body: serde_json::Value = response.json().await.unwrap();
    body["timestamp"] = json!("<timestamp>");

    insta::assert_json_snapshot!(body, @r#"
    {
      "success": false,
      "error": {
        "code": "REQUEST_TOO_LARGE",
        "message": "Request entity too large",
        "details": {
          "requestSize": 2000,
          "maxSize": 1024,
          "sizeExceededBy": 976
        }
      },
      "timestamp": "<timestamp>",
      "version": "0.1.0"
    }
    "#);
}

#[tokio::test]
async fn body_of_exactly_the_limit_is_allowed() {
    let config = indoc! {r#"
        [server.request_size]
        default_max_size = 1024
        routes = []
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.post("/api/workflows", &title_of_length(1024)).await;
    assert_eq!(response.status(), 201);

    let response = server.client.post("/api/workflows", &title_of_length(1025)).await;
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn route_ceilings_take_precedence() {
    let config = indoc! {r#"
        [server.request_size]
        default_max_size = 4096

        [[server.request_size.routes]]
        method = "POST"
        path = "/api/workflows"
        max_size = 256
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.post("/api/workflows", &title_of_length(300)).await;
    assert_eq!(response.status(), 413);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["details"]["maxSize"], 256);
    assert_eq!(body["error"]["details"]["sizeExceededBy"], 44);

    // Other routes fall back to the default ceiling.
    let response = server
        .client
        .post(
            "/api/governance/decisions",
            &json!({
                "requestId": "req-1",
                "decision": "approved",
                "rationale": "x".repeat(1000),
                "approver": "oncall-lead",
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn headers_count_when_configured() {
    let config = indoc! {r#"
        [server.request_size]
        default_max_size = 512
        include_headers = true
        routes = []
    "#};

    let server = TestServer::start(config).await;

    let response = server
        .client
        .request(Method::POST, "/api/workflows")
        .header("X-Incident-Context", "y".repeat(600))
        .json(&json!({ "title": "Short" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 413);

    let body: serde_json::Value = response.json().await.unwrap();
    let request_size = body["error"]["details"]["requestSize"].as_u64().unwrap();
    assert!(request_size > 600, "request size {request_size}");
}

#[tokio::test]
async fn size_guard_disabled() {
    let config = indoc! {r#"
        [server.request_size]
        enabled = false
        default_max_size = 16
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.post("/api/workflows", &title_of_length(2000)).await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn rejected_requests_are_not_counted() {
    let config = indoc! {r#"
        [server.rate_limits.presets.workflow_creation]
        limit = 1

        [server.request_size]
        default_max_size = 1024
        routes = []
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.post("/api/workflows", &title_of_length(2000)).await;
    assert_eq!(response.status(), 413);

    let response = server.client.post("/api/workflows", &title_of_length(100)).await;
    assert_eq!(response.status(), 201);
}
