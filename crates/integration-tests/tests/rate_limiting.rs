use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::json;

fn single_request_window() -> &'static str {
    indoc! {r#"
        [server.rate_limits.presets.standard]
        limit = 1
        window = "60s"
    "#}
}

async fn get_as(server: &TestServer, path: &str, client_address: &str) -> reqwest::Response {
    server
        .client
        .request(Method::GET, path)
        .header("X-Forwarded-For", client_address)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn second_request_in_window_is_rejected() {
    let server = TestServer::start(single_request_window()).await;

    let response = get_as(&server, "/api/workflows", "203.0.113.7").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["ratelimit-limit"], "1");
    assert_eq!(response.headers()["ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("ratelimit-reset"));
    assert!(response.headers().get("x-ratelimit-limit").is_none());

    let response = get_as(&server, "/api/workflows", "203.0.113.7").await;
    assert_eq!(response.status(), 429);
    assert!(response.headers().get("ratelimit-remaining").is_none());

    let retry_after: u64 = response.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after), "retry after {retry_after}");

    let mut body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body["error"]["details"]["retryAfter"], retry_after);
    assert!(body["error"]["details"]["resetTime"].is_string());

    body["timestamp"] = json!("<timestamp>");
    body["version"] = json!("<version>");
    body["error"]["details"]["retryAfter"] = json!("<retry-after>");
    body["error"]["details"]["resetTime"] = json!("<reset-time>");

    insta::assert_json_snapshot!(body, @r#"
    {
      "success": false,
      "error": {
        "code": "RATE_LIMIT_EXCEEDED",
        "message": "Too many requests from this client, please try again later.",
        "details": {
          "limit": 1,
          "windowMs": 60000,
          "retryAfter": "<retry-after>",
          "resetTime": "<reset-time>"
        }
      },
      "timestamp": "<timestamp>",
      "version": "<version>"
    }
    "#);
}

#[tokio::test]
async fn clients_have_independent_quotas() {
    let config = indoc! {r#"
        [server.rate_limits.presets.standard]
        limit = 2
        window = "60s"
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for (client_address, request) in [
        ("192.168.1.1", 1),
        ("192.168.1.1", 2),
        ("192.168.1.1", 3),
        ("192.168.1.2", 1),
        ("192.168.1.2", 2),
    ] {
        let response = get_as(&server, "/api/workflows", client_address).await;

        results.push(json!({
            "client": client_address,
            "request": request,
            "status": response.status().as_u16(),
            "remaining": response
                .headers()
                .get("ratelimit-remaining")
                .map(|value| value.to_str().unwrap()),
        }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "client": "192.168.1.1",
        "request": 1,
        "status": 200,
        "remaining": "1"
      },
      {
        "client": "192.168.1.1",
        "request": 2,
        "status": 200,
        "remaining": "0"
      },
      {
        "client": "192.168.1.1",
        "request": 3,
        "status": 429,
        "remaining": null
      },
      {
        "client": "192.168.1.2",
        "request": 1,
        "status": 200,
        "remaining": "1"
      },
      {
        "client": "192.168.1.2",
        "request": 2,
        "status": 200,
        "remaining": "0"
      }
    ]
    "#);
}

#[tokio::test]
async fn first_forwarded_address_is_the_client() {
    let server = TestServer::start(single_request_window()).await;

    let response = get_as(&server, "/api/workflows", "198.51.100.10, 10.0.0.1").await;
    assert_eq!(response.status(), 200);

    // Same client behind a different proxy.
    let response = get_as(&server, "/api/workflows", "198.51.100.10, 10.0.0.2").await;
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn fingerprint_separates_user_agents() {
    let config = indoc! {r#"
        [server.rate_limits]
        key = "fingerprint"

        [server.rate_limits.presets.standard]
        limit = 1
        window = "60s"
    "#};

    let server = TestServer::start(config).await;

    let send = |user_agent: &'static str| {
        server
            .client
            .request(Method::GET, "/api/workflows")
            .header("X-Forwarded-For", "203.0.113.20")
            .header("User-Agent", user_agent)
            .send()
    };

    assert_eq!(send("incident-console/1.0").await.unwrap().status(), 200);
    assert_eq!(send("incident-cli/3.2").await.unwrap().status(), 200);
    assert_eq!(send("incident-console/1.0").await.unwrap().status(), 429);
}

#[tokio::test]
async fn legacy_headers() {
    let config = indoc! {r#"
        [server.rate_limits]
        legacy_headers = true
    "#};

    let server = TestServer::start(config).await;

    let response = get_as(&server, "/api/workflows", "203.0.113.30").await;
    assert_eq!(response.status(), 200);

    let headers = response.headers();
    assert_eq!(headers["ratelimit-limit"], "100");
    assert_eq!(headers["x-ratelimit-limit"], "100");
    assert_eq!(headers["x-ratelimit-remaining"], "99");

    let reset: u64 = headers["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
    assert!(reset > 1_700_000_000);
}

#[tokio::test]
async fn routes_select_their_preset() {
    let config = indoc! {r#"
        [server.rate_limits.presets.workflow_creation]
        limit = 1
    "#};

    let server = TestServer::start(config).await;

    let create = || {
        server
            .client
            .request(Method::POST, "/api/workflows")
            .header("X-Forwarded-For", "203.0.113.40")
            .json(&json!({ "title": "Disk pressure on ingest nodes" }))
            .send()
    };

    let response = create().await.unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["ratelimit-limit"], "1");

    let response = create().await.unwrap();
    assert_eq!(response.status(), 429);

    // Listing falls through to the standard preset.
    let response = get_as(&server, "/api/workflows", "203.0.113.40").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["ratelimit-limit"], "100");
}

#[tokio::test]
async fn failed_requests_can_be_given_back() {
    let config = indoc! {r#"
        [server.rate_limits.presets.strict]
        limit = 1
        skip_failed_requests = true
    "#};

    let server = TestServer::start(config).await;

    let transition = || {
        server
            .client
            .request(Method::POST, "/api/workflows/missing/transition")
            .header("X-Forwarded-For", "203.0.113.50")
            .json(&json!({ "state": "TRIAGED" }))
            .send()
    };

    for _ in 0..3 {
        let response = transition().await.unwrap();
        assert_eq!(response.status(), 404);
    }
}

#[tokio::test]
async fn unmatched_routes_are_not_limited() {
    let config = indoc! {r#"
        [server.rate_limits.presets.standard]
        limit = 1
        window = "60s"

        [[server.rate_limits.routes]]
        path = "/api/governance/**"
        preset = "standard"
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..3 {
        let response = get_as(&server, "/api/workflows", "203.0.113.60").await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn rate_limiting_disabled() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = false

        [server.rate_limits.presets.standard]
        limit = 1
    "#};

    let server = TestServer::start(config).await;

    let mut success_count = 0;

    for _ in 1..=10 {
        let response = get_as(&server, "/api/workflows", "203.0.113.70").await;

        if response.status() == 200 {
            success_count += 1;
        }

        assert!(response.headers().get("ratelimit-limit").is_none());
    }

    assert_eq!(success_count, 10);
}
