//! Integration tests for the HTTPS client against a loopback server
//!
//! The clients run without a TLS context here (the plain-HTTP constructor
//! branch); TLS context construction is covered by the communicator
//! lifecycle tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, RawQuery};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use weft_comlink::{
    CommunicationClient, CommunicationProperties, ComlinkError, CommStatus, HttpMethod,
    HttpsClient, InterfaceProfile, JsonDecoder, MessageMeta, MessageProperties, PayloadResolver,
    ProfileKey, Protocol,
};

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/services/{id}",
            get(|Path(id): Path<String>| async move { Json(json!({ "service": id })) }),
        )
        .route(
            "/echo",
            post(|Json(body): Json<Value>| async move { Json(body) }),
        )
        .route(
            "/query",
            get(|RawQuery(query): RawQuery| async move {
                Json(json!({ "query": query.unwrap_or_default() }))
            }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, Json(json!({ "error": "no such entry" }))) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn http_profile(addr: SocketAddr, path: &str, method: HttpMethod) -> InterfaceProfile {
    InterfaceProfile::new(Protocol::Http)
        .with(ProfileKey::Address, "127.0.0.1")
        .unwrap()
        .with(ProfileKey::Port, addr.port())
        .unwrap()
        .with(ProfileKey::Path, path)
        .unwrap()
        .with(ProfileKey::Method, method)
        .unwrap()
}

fn plain_client(profile: InterfaceProfile) -> HttpsClient {
    HttpsClient::new(
        None,
        None,
        &CommunicationProperties::new("unused.pem", "unused.pem"),
        profile,
        Arc::new(JsonDecoder::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_get_roundtrip_with_path_variables() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/services", HttpMethod::Get));

    let props = MessageProperties::new().with_path_variables(["temperature"]);
    client.send(Some(&props), None).await.unwrap();

    let mut resolver = PayloadResolver::new();
    client.receive(None, &mut resolver).await.unwrap();

    assert!(!resolver.is_client_error());
    assert_eq!(resolver.meta(), Some(&MessageMeta::Http { status: 200 }));
    let body: Value = resolver.value().unwrap().unwrap();
    assert_eq!(body, json!({ "service": "temperature" }));

    client.terminate().await.unwrap();
}

#[tokio::test]
async fn test_post_roundtrip_echoes_payload() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/echo", HttpMethod::Post));

    let payload = json!({ "temp": 21, "room": "1" });
    client.send(None, Some(&payload)).await.unwrap();

    let mut resolver = PayloadResolver::new();
    client.receive(None, &mut resolver).await.unwrap();
    let body: Value = resolver.value().unwrap().unwrap();
    assert_eq!(body, payload);
}

#[tokio::test]
async fn test_second_send_before_receive_fails() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/echo", HttpMethod::Post));
    let payload = json!({ "temp": 1 });

    client.send(None, Some(&payload)).await.unwrap();
    let err = client.send(None, Some(&payload)).await.unwrap_err();
    assert_eq!(err.status(), Some(CommStatus::ProtocolViolation));

    // draining the response re-arms the client
    let mut resolver = PayloadResolver::new();
    client.receive(None, &mut resolver).await.unwrap();
    client.send(None, Some(&payload)).await.unwrap();
}

#[tokio::test]
async fn test_receive_without_send_is_noop() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/echo", HttpMethod::Post));

    let mut resolver = PayloadResolver::new();
    client.receive(None, &mut resolver).await.unwrap();
    assert!(!resolver.is_resolved());
}

#[tokio::test]
async fn test_query_parameters_are_grouped_in_order() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/query", HttpMethod::Get));

    let props = MessageProperties::new()
        .with_query_params(["b", "1", "a", "2", "b", "3"]);
    client.send(Some(&props), None).await.unwrap();

    let mut resolver = PayloadResolver::new();
    client.receive(None, &mut resolver).await.unwrap();
    let body: Value = resolver.value().unwrap().unwrap();
    assert_eq!(body["query"], "b=1&b=3&a=2");
}

#[tokio::test]
async fn test_odd_query_tokens_rejected() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/query", HttpMethod::Get));

    let props = MessageProperties::new().with_query_params(["key-without-value"]);
    let err = client.send(Some(&props), None).await.unwrap_err();
    assert!(matches!(err, ComlinkError::Developer(_)));
}

#[tokio::test]
async fn test_non_success_status_sets_client_error_flag() {
    let addr = spawn_server().await;
    let mut client = plain_client(http_profile(addr, "/missing", HttpMethod::Get));

    client.send(None, None).await.unwrap();
    let mut resolver = PayloadResolver::new();
    client.receive(None, &mut resolver).await.unwrap();

    assert!(resolver.is_client_error());
    assert_eq!(
        resolver.client_error_message(),
        Some("HTTP status code: 404")
    );
    // the error body stays available to the caller
    let body: Value = resolver.value().unwrap().unwrap();
    assert_eq!(body["error"], "no such entry");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_service_unavailable() {
    // bind and drop to get a port that is very likely closed
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = plain_client(http_profile(addr, "/echo", HttpMethod::Get));
    let err = client.send(None, None).await.unwrap_err();
    assert_eq!(err.status(), Some(CommStatus::ServiceUnavailable));
}
