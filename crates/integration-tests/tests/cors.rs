use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;

async fn preflight(server: &TestServer, origin: &str) -> reqwest::Response {
    server
        .client
        .request(Method::OPTIONS, "/api/workflows")
        .header("Origin", origin)
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn development_is_permissive() {
    let server = TestServer::start("").await;

    let response = preflight(&server, "http://localhost:5173").await;
    assert_eq!(response.status(), 200);

    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert!(headers.contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn production_allows_listed_origins() {
    let config = indoc! {r#"
        [server]
        environment = "production"

        [server.security]
        enforce_https = false

        [server.cors]
        allowed_origins = ["https://console.example.com", "https://*.ops.example.com"]
    "#};

    let server = TestServer::start(config).await;

    let response = preflight(&server, "https://console.example.com").await;
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://console.example.com"
    );

    let response = preflight(&server, "https://eu.ops.example.com").await;
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://eu.ops.example.com"
    );

    let response = preflight(&server, "https://attacker.example.net").await;
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn quota_headers_are_exposed() {
    let server = TestServer::start("").await;

    let response = server
        .client
        .request(Method::GET, "/api/workflows")
        .header("Origin", "http://localhost:5173")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let exposed = response.headers()["access-control-expose-headers"].to_str().unwrap();
    insta::assert_snapshot!(
        exposed,
        @"ratelimit-limit,ratelimit-remaining,ratelimit-reset,x-ratelimit-limit,x-ratelimit-remaining,x-ratelimit-reset,retry-after"
    );
}
