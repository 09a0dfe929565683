//! End-to-end HTTP behavior against a real bound listener: `hyper::body::
//! Incoming` can't be constructed in a unit test, so 404/400/204/HOST_INFO/
//! CORS are only checked here. Promised by `src/http.rs`'s test module.

use oscquery::{Access, ArgumentDescriptor, NodeOpts, OSCQueryService, OSCQueryServiceOptions, OSCType, SimpleType};
use serde_json::Value;
use std::net::Ipv4Addr;

async fn start_service() -> OSCQueryService {
    let options = OSCQueryServiceOptions {
        bind_address: Ipv4Addr::LOCALHOST,
        osc_ip: Ipv4Addr::LOCALHOST,
        ws_ip: Ipv4Addr::LOCALHOST,
        service_name: "test-service".into(),
        ..Default::default()
    };
    OSCQueryService::start(options).await.expect("service should start on ephemeral ports")
}

fn base_url(service: &OSCQueryService) -> String {
    format!("http://{}", service.http_addr())
}

#[tokio::test]
async fn unknown_path_returns_404() {
    let service = start_service().await;
    let resp = reqwest::get(format!("{}/nope", base_url(&service))).await.unwrap();
    assert_eq!(resp.status(), 404);
    service.stop().await;
}

#[tokio::test]
async fn host_info_answers_at_any_path() {
    let service = start_service().await;
    let resp = reqwest::get(format!("{}/anything?HOST_INFO", base_url(&service))).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["OSC_TRANSPORT"], "UDP");
    service.stop().await;
}

#[tokio::test]
async fn root_serializes_added_method() {
    let service = start_service().await;
    service
        .add_method(
            "/foo/bar",
            NodeOpts {
                access: Access::ReadOnly,
                arguments: Some(vec![ArgumentDescriptor::new(OSCType::Simple(SimpleType::Int))]),
                ..Default::default()
            },
        )
        .await;

    let resp = reqwest::get(format!("{}/foo/bar", base_url(&service))).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["FULL_PATH"], "/foo/bar");
    assert_eq!(body["TYPE"], "i");

    let root = reqwest::get(&base_url(&service)).await.unwrap().json::<Value>().await.unwrap();
    assert!(root["CONTENTS"]["foo"]["CONTENTS"]["bar"].is_object());

    service.stop().await;
}

#[tokio::test]
async fn attribute_not_applicable_is_204() {
    let service = start_service().await;
    service.add_method("/container/child", NodeOpts::default()).await;

    let resp = reqwest::get(format!("{}/container?TYPE", base_url(&service))).await.unwrap();
    assert_eq!(resp.status(), 204);

    service.stop().await;
}

#[tokio::test]
async fn unknown_attribute_is_400() {
    let service = start_service().await;
    let resp = reqwest::get(format!("{}/?NOT_A_REAL_ATTRIBUTE", base_url(&service))).await.unwrap();
    assert_eq!(resp.status(), 400);
    service.stop().await;
}

#[tokio::test]
async fn options_gets_cors_preflight() {
    let service = start_service().await;
    let client = reqwest::Client::new();
    let resp = client.request(reqwest::Method::OPTIONS, &base_url(&service)).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    service.stop().await;
}
