//! 管理后台 API 集成测试
//!
//! 使用内存存储和仅记录日志的消息通道构造完整路由，通过 `oneshot` 发送请求。

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use fake::Fake;
use fake::faker::name::en::Name;
use http_body_util::BodyExt;
use rewards_admin_service::{AppState, routes};
use rewards_core::{CoreServices, store::Store, transport::LogTransport};
use rewards_shared::config::AppConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> (Router, CoreServices) {
    let mut config = AppConfig::default();
    config.broadcast.send_delay_ms = 0;
    let core = CoreServices::build(Store::memory(), Arc::new(LogTransport), &config);
    (routes::build_router(AppState::new(core.clone(), 10)), core)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start_user(app: &Router, id: &str) {
    let name: String = Name().fake();
    let (status, body) = send(
        app,
        "POST",
        "/events",
        Some(json!({"type": "start", "user": {"id": id, "name": name}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);
}

#[tokio::test]
async fn test_health_and_request_id() {
    let (app, _) = app();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, body) = send(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["store"], "ok");
}

#[tokio::test]
async fn test_broadcast_lifecycle() {
    let (app, _) = app();
    for id in ["1", "2", "3"] {
        start_user(&app, id).await;
    }

    let (status, body) = send(
        &app,
        "POST",
        "/broadcast",
        Some(json!({"segment": "all", "message": "新品上架"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 3);
    let job_id = body["data"]["jobId"].as_str().unwrap().to_string();

    let mut finished = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&app, "GET", &format!("/broadcast/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["data"]["status"] == "completed" {
            finished = body;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(finished["data"]["sent"], 3);
    assert_eq!(finished["data"]["delivered"], 3);
    assert_eq!(finished["data"]["progress"], 100);

    // 已结束的任务取消无效果
    let (status, body) =
        send(&app, "POST", &format!("/broadcast/{}/cancel", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");

    let (status, body) = send(&app, "GET", "/broadcast", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_broadcast_errors() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/broadcast",
        Some(json!({"segment": "vip", "message": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(&app, "GET", "/broadcast/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "JOB_NOT_FOUND");

    let (status, _) = send(&app, "POST", "/broadcast/missing/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_products_and_claim_via_events() {
    let (app, core) = app();
    start_user(&app, "42").await;

    let (status, _) = send(
        &app,
        "POST",
        "/products",
        Some(json!({"id": "pro-a", "name": "Pro A", "pricing": {"7": 10}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/products/pro-a/items",
        Some(json!({"durationDays": 7, "items": ["AAAA-1111", " ", "BBBB-2222"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["added"], 2);

    let (status, body) = send(
        &app,
        "POST",
        "/products/pro-a/items",
        Some(json!({"durationDays": 30, "items": ["CCCC"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PRICE_NOT_CONFIGURED");

    let claim = json!({"type": "claim_key", "userId": "42", "productId": "pro-a", "durationDays": 7});
    let (_, body) = send(&app, "POST", "/events", Some(claim.clone())).await;
    assert_eq!(body["data"]["success"], false);
    assert_eq!(body["data"]["errorCode"], "INSUFFICIENT_BALANCE");

    let (status, body) = send(
        &app,
        "POST",
        "/users/42/points",
        Some(json!({"delta": 25})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"], 25);

    let (_, body) = send(&app, "POST", "/events", Some(claim)).await;
    assert_eq!(body["data"]["success"], true);
    assert_eq!(core.ledger.balance("42").await.unwrap(), 15);

    let (_, body) = send(&app, "GET", "/products/pro-a/stock", None).await;
    let stock = &body["data"][0];
    assert_eq!(stock["durationDays"], 7);
    assert_eq!(stock["unclaimed"], 1);
    assert_eq!(stock["claimed"], 1);

    let (status, body) = send(&app, "DELETE", "/products/pro-a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deletedItems"], 2);
}

#[tokio::test]
async fn test_stats_and_paginated_listings() {
    let (app, core) = app();
    for id in ["1", "2", "3"] {
        start_user(&app, id).await;
    }
    send(
        &app,
        "POST",
        "/products",
        Some(json!({"id": "pro-a", "name": "Pro A", "pricing": {"7": 10}})),
    )
    .await;
    send(
        &app,
        "POST",
        "/products/pro-a/items",
        Some(json!({"durationDays": 7, "items": ["AAAA", "BBBB", "CCCC"]})),
    )
    .await;
    core.ledger.admin_adjust("2", 10).await.unwrap();
    let claim = json!({"type": "claim_key", "userId": "2", "productId": "pro-a", "durationDays": 7});
    let (_, body) = send(&app, "POST", "/events", Some(claim)).await;
    assert_eq!(body["data"]["success"], true);

    let (status, body) = send(&app, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"];
    assert_eq!(stats["users"]["total"], 3);
    assert_eq!(stats["users"]["active"], 3);
    assert_eq!(stats["users"]["newToday"], 3);
    assert_eq!(stats["keys"]["total"], 3);
    assert_eq!(stats["keys"]["claimed"], 1);
    assert_eq!(stats["keys"]["unclaimed"], 2);
    assert_eq!(stats["keys"]["expired"], 0);
    assert_eq!(stats["keys"]["claimedToday"], 1);
    assert_eq!(stats["products"], 1);

    let (status, body) = send(&app, "GET", "/users?page=1&pageSize=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["totalPages"], 2);

    let (status, body) = send(&app, "GET", "/users?pageSize=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(&app, "GET", "/products/pro-a/items?status=claimed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["claimedBy"], "2");

    let (_, body) = send(
        &app,
        "GET",
        "/products/pro-a/items?status=unclaimed&page=2&pageSize=1",
        None,
    )
    .await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["items"][0]["status"], "unclaimed");

    let (status, body) = send(&app, "GET", "/products/missing/items", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PRODUCT_NOT_FOUND");
}

#[tokio::test]
async fn test_user_management() {
    let (app, _) = app();

    let (status, body) = send(&app, "POST", "/users/7/points", Some(json!({"delta": 5}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "USER_NOT_FOUND");

    start_user(&app, "7").await;
    let (status, body) = send(&app, "POST", "/users/7/points", Some(json!({"delta": -5}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");

    let (status, body) = send(&app, "POST", "/users/8/ban", Some(json!({"banned": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["registered"], false);

    let (_, body) = send(
        &app,
        "POST",
        "/events",
        Some(json!({"type": "start", "user": {"id": "8", "name": "Mallory"}})),
    )
    .await;
    assert_eq!(body["data"]["errorCode"], "USER_BANNED");

    let (status, body) = send(&app, "GET", "/users/8", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isBanned"], true);
}

#[tokio::test]
async fn test_force_end_support_session() {
    let (app, core) = app();
    start_user(&app, "9").await;

    let (status, body) = send(&app, "POST", "/support/9/end", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NO_ACTIVE_SESSION");

    core.support.request_support("9").await.unwrap();
    let (status, body) = send(&app, "POST", "/support/9/end", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["endedBy"], "admin");

    let (status, body) = send(&app, "GET", "/support/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_settings_update() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        "PUT",
        "/settings",
        Some(json!({"maintenanceMode": true, "requiredChannel": "@news"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["maintenanceMode"], true);
    assert_eq!(body["data"]["requiredChannel"], "@news");

    let (status, _) = send(
        &app,
        "PUT",
        "/settings",
        Some(json!({"vipPointsMultiplier": 0.5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(
        &app,
        "POST",
        "/events",
        Some(json!({"type": "balance", "userId": "1"})),
    )
    .await;
    assert_eq!(body["data"]["errorCode"], "MAINTENANCE_MODE");
}
