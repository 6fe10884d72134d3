use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use stockledger_api::config::AppConfig;
use stockledger_auth::{JwtClaims, PrincipalId, Role};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Same router as prod, in-memory storage, ephemeral port.
        let app = stockledger_api::app::build_app(&AppConfig::in_memory(jwt_secret))
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        roles,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn admin_token() -> String {
    mint_jwt(JWT_SECRET, vec![Role::new("admin")])
}

async fn create_product(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    name: &str,
    safety_stock: i64,
) -> i64 {
    let res = client
        .post(srv.url("/products"))
        .bearer_auth(token)
        .json(&json!({ "name": name, "safety_stock": safety_stock }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["product_id"].as_i64().unwrap()
}

async fn post_movement(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    path: &str,
    product_id: i64,
    location_id: i64,
    quantity: i64,
) -> reqwest::Response {
    client
        .post(srv.url(path))
        .bearer_auth(token)
        .json(&json!({
            "product_id": product_id,
            "location_id": location_id,
            "quantity": quantity,
        }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forged = mint_jwt("another-secret", vec![Role::new("admin")]);
    let res = client
        .get(srv.url("/stock/history/receiving"))
        .bearer_auth(forged)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn principal_context_is_derived_from_token() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = mint_jwt(JWT_SECRET, vec![Role::new("warehouse")]);

    let client = reqwest::Client::new();
    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "warehouse"));
    let perms = body["permissions"].as_array().unwrap();
    assert!(perms.iter().any(|p| p == "stock.ship"));
    assert!(!perms.iter().any(|p| p == "products.write"));
}

#[tokio::test]
async fn receive_then_ship_then_reject_overdraw() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = admin_token();
    let client = reqwest::Client::new();

    let product_id = create_product(&client, &srv, &token, "Widget", 10).await;

    let res = post_movement(&client, &srv, &token, "/stock/receive", product_id, 1, 50).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["old_stock"], 0);
    assert_eq!(body["new_stock"], 50);
    assert_eq!(body["quantity_received"], 50);

    let res = post_movement(&client, &srv, &token, "/stock/ship", product_id, 1, 30).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["old_stock"], 50);
    assert_eq!(body["new_stock"], 20);
    assert_eq!(body["quantity_shipped"], 30);

    let res = post_movement(&client, &srv, &token, "/stock/ship", product_id, 1, 25).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["available"], 20);
    assert_eq!(body["requested"], 25);

    let res = client
        .get(srv.url(&format!("/stock/{product_id}/locations")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total_quantity"], 20);
    assert_eq!(body["balances"], json!([{ "location_id": 1, "quantity": 20 }]));

    // The rejected ship left no ledger entry.
    let res = client
        .get(srv.url("/stock/history/shipping"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["change_type"], "ship");
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["quantity_changed"], 30);
    assert_eq!(body["events"][0]["resulting_quantity"], 20);
}

#[tokio::test]
async fn invalid_requests_map_to_error_kinds() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = admin_token();
    let client = reqwest::Client::new();

    let product_id = create_product(&client, &srv, &token, "Bolt", 0).await;

    let res = post_movement(&client, &srv, &token, "/stock/receive", product_id, 1, 0).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_argument");

    let res = post_movement(&client, &srv, &token, "/stock/receive", 9_999, 1, 5).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Shipping from a location that never received anything.
    let res = post_movement(&client, &srv, &token, "/stock/ship", product_id, 3, 1).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url("/stock/receive"))
        .bearer_auth(&token)
        .json(&json!({ "product_id": product_id, "location_id": 1, "quantity": "lots" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/stock/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/stock/history?change_type=transfer"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/stock/history?change_type=receive&from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/products"))
        .bearer_auth(&token)
        .json(&json!({ "name": "  ", "safety_stock": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/products/not-a-number"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn permissions_gate_each_operation() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let admin = admin_token();
    let viewer = mint_jwt(JWT_SECRET, vec![Role::new("viewer")]);
    let client = reqwest::Client::new();

    let product_id = create_product(&client, &srv, &admin, "Gear", 0).await;

    let res = post_movement(&client, &srv, &viewer, "/stock/receive", product_id, 1, 5).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");

    let res = client
        .post(srv.url("/products"))
        .bearer_auth(&viewer)
        .json(&json!({ "name": "Sprocket" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url("/stock/history?change_type=receiving"))
        .bearer_auth(&viewer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn history_filters_by_product_and_limit() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = admin_token();
    let client = reqwest::Client::new();

    let a = create_product(&client, &srv, &token, "A", 0).await;
    let b = create_product(&client, &srv, &token, "B", 0).await;

    for (product_id, quantity) in [(a, 1), (b, 2), (a, 3), (a, 4)] {
        let res = post_movement(&client, &srv, &token, "/stock/receive", product_id, 1, quantity).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client
        .get(srv.url(&format!("/stock/history/receiving?product_id={a}&limit=2")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["count"], 2);
    let quantities: Vec<i64> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["quantity_changed"].as_i64().unwrap())
        .collect();
    assert_eq!(quantities, vec![1, 3]);
}

#[tokio::test]
async fn stock_levels_and_low_stock_report() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = admin_token();
    let client = reqwest::Client::new();

    let empty = create_product(&client, &srv, &token, "Empty", 5).await;
    let low = create_product(&client, &srv, &token, "Low", 10).await;
    let healthy = create_product(&client, &srv, &token, "Healthy", 10).await;

    post_movement(&client, &srv, &token, "/stock/receive", low, 1, 4).await;
    post_movement(&client, &srv, &token, "/stock/receive", healthy, 1, 6).await;
    post_movement(&client, &srv, &token, "/stock/receive", healthy, 2, 6).await;

    let res = client
        .get(srv.url(&format!("/products/{healthy}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total_quantity"], 12);
    assert_eq!(body["status"], "healthy");

    let res = client
        .get(srv.url("/products/low-stock"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["count"], 2);
    let statuses: Vec<(i64, String)> = body["products"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            (
                p["product_id"].as_i64().unwrap(),
                p["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        statuses,
        vec![(empty, "out_of_stock".to_string()), (low, "low".to_string())]
    );

    let res = client
        .get(srv.url("/products/12345"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ships_never_overdraw() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = admin_token();
    let client = reqwest::Client::new();

    let product_id = create_product(&client, &srv, &token, "Scarce", 0).await;
    let res = post_movement(&client, &srv, &token, "/stock/receive", product_id, 1, 10).await;
    assert_eq!(res.status(), StatusCode::OK);

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let url = srv.url("/stock/ship");
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            client
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "product_id": product_id, "location_id": 1, "quantity": 1 }))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    let mut shipped = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => shipped += 1,
            StatusCode::CONFLICT => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(shipped, 10);
    assert_eq!(rejected, 10);

    let res = client
        .get(srv.url(&format!("/stock/{product_id}/locations")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total_quantity"], 0);
}

#[tokio::test]
async fn committed_movements_are_streamed() {
    let srv = TestServer::spawn(JWT_SECRET).await;
    let token = admin_token();
    let client = reqwest::Client::new();

    let product_id = create_product(&client, &srv, &token, "Streamed", 0).await;

    let mut stream = client
        .get(srv.url("/stream"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let res = post_movement(&client, &srv, &token, "/stock/receive", product_id, 2, 7).await;
    assert_eq!(res.status(), StatusCode::OK);

    let received = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let mut buf = String::new();
        while let Some(chunk) = stream.chunk().await.unwrap() {
            buf.push_str(&String::from_utf8_lossy(&chunk));
            if buf.contains("event: stock.received") && buf.contains("\"quantity_changed\":7") {
                return true;
            }
        }
        false
    })
    .await
    .expect("no stream event within timeout");

    assert!(received);
}
