// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests through the full pipeline: listener, filters, router, handlers.

mod common;

use common::{TestFrontDoor, closed_addr};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_create_service_with_version_prefix() {
    let backend = MockServer::start().await;
    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;

    let response = reqwest::Client::new()
        .post(front.url("/v1.16/services/create"))
        .json(&json!({"id": "svc1", "image": "x"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let record = front.registry.get("svc1").expect("record stored");
    assert_eq!(record.fields.get("image"), Some(&json!("x")));
    assert!(backend.received_requests().await.unwrap().is_empty());

    front.stop().await.unwrap();
}

#[tokio::test]
async fn test_create_service_without_prefix() {
    let backend = MockServer::start().await;
    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;

    let response = reqwest::Client::new()
        .post(front.url("/services/create"))
        .body(r#"{"id":"svc1","image":"x"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(front.registry.get("svc1").unwrap().id, "svc1");
}

#[tokio::test]
async fn test_malformed_service_body_still_created() {
    let backend = MockServer::start().await;
    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;

    let response = reqwest::Client::new()
        .post(front.url("/services/create"))
        .body("not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(front.registry.is_empty());
}

#[tokio::test]
async fn test_unmatched_request_is_proxied() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("[]", "application/json"),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;
    let response = reqwest::get(front.url("/images/json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(response.text().await.unwrap(), "[]");
}

#[tokio::test]
async fn test_proxy_is_byte_transparent() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    let answer: Vec<u8> = payload.iter().rev().copied().collect();

    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1.20/images/load"))
        .and(query_param("quiet", "1"))
        .and(header("x-registry-auth", "e30="))
        .and(header("content-type", "application/x-tar"))
        .and(body_bytes(payload.clone()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-docker-content", "raw")
                .set_body_raw(answer.clone(), "application/octet-stream"),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;
    let response = reqwest::Client::new()
        .post(front.url("/v1.20/images/load?quiet=1"))
        .header("x-registry-auth", "e30=")
        .header("content-type", "application/x-tar")
        .body(payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-docker-content"], "raw");
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(response.bytes().await.unwrap().to_vec(), answer);
}

#[tokio::test]
async fn test_backend_status_is_relayed() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/containers/missing/json"))
        .respond_with(ResponseTemplate::new(404).set_body_string("No such container: missing"))
        .mount(&backend)
        .await;

    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;
    let response = reqwest::get(front.url("/containers/missing/json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.text().await.unwrap(),
        "No such container: missing"
    );
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let backend = closed_addr().await;
    let front = TestFrontDoor::start(&backend, false).await;

    let response = reqwest::get(front.url("/_ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let text = response.text().await.unwrap();
    assert!(text.starts_with("backend error"), "got {text}");

    // The serving loop survives backend failures.
    let again = reqwest::get(front.url("/_ping")).await.unwrap();
    assert_eq!(again.status(), StatusCode::BAD_GATEWAY);

    front.stop().await.unwrap();
}

#[tokio::test]
async fn test_cors_preflight_never_reaches_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&backend)
        .await;

    let front = TestFrontDoor::start(&backend.address().to_string(), true).await;
    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, front.url("/v1.16/containers/json"))
        .header("origin", "http://ui.example")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_cors_headers_added_to_proxied_response() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/containers/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&backend)
        .await;

    let front = TestFrontDoor::start(&backend.address().to_string(), true).await;
    let response = reqwest::Client::new()
        .get(front.url("/containers/json"))
        .header("origin", "http://ui.example")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-methods")
    );
}

#[tokio::test]
async fn test_without_cors_filter_preflight_is_proxied() {
    let backend = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&backend)
        .await;

    let front = TestFrontDoor::start(&backend.address().to_string(), false).await;
    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, front.url("/containers/json"))
        .header("origin", "http://ui.example")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
