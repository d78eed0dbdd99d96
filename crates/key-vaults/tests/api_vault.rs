use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use key_vaults::{ApiVault, KeyVault, VaultWrite};
use media_tracks::ContentKey;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use uuid::Uuid;

const TOKEN: &str = "s3cret";

#[derive(Clone, Default)]
struct ApiState {
    keys: Arc<Mutex<HashMap<(String, String), String>>>,
    read_only: bool,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn get_key(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((service, kid)): Path<(String, String)>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.keys.lock().get(&(service, kid)) {
        Some(key) => Json(json!({"code": 0, "content_key": key})).into_response(),
        None => Json(json!({"code": 2, "message": "Key not found"})).into_response(),
    }
}

async fn add_key(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((service, kid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if state.read_only {
        return Json(json!({"code": 3, "message": "read only"})).into_response();
    }
    let key = body["content_key"].as_str().unwrap_or_default().to_string();
    let previous = state.keys.lock().insert((service, kid), key.clone());
    let inserted = usize::from(previous.as_deref() != Some(key.as_str()));
    Json(json!({"code": 0, "inserted": inserted})).into_response()
}

async fn add_keys(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(service): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let mut inserted = 0;
    if let Some(map) = body["content_keys"].as_object() {
        let mut keys = state.keys.lock();
        for (kid, key) in map {
            let key = key.as_str().unwrap_or_default().to_string();
            if keys.insert((service.clone(), kid.clone()), key).is_none() {
                inserted += 1;
            }
        }
    }
    Json(json!({"code": 0, "inserted": inserted})).into_response()
}

async fn serve(state: ApiState) -> String {
    let app = Router::new()
        .route("/{service}/{kid}", get(get_key).post(add_key))
        .route("/{service}", post(add_keys))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn key(hex: &str) -> ContentKey {
    ContentKey::new(hex).unwrap()
}

#[tokio::test]
async fn api_vault_round_trip() {
    let uri = serve(ApiState::default()).await;
    let vault = ApiVault::new("remote", uri, TOKEN).unwrap();
    let kid = Uuid::from_u128(0xb02);

    assert!(vault.get_key(&kid, "EXAMPLE").await.unwrap().is_none());
    let k = key("0123456789abcdef0123456789abcdef");
    assert_eq!(vault.add_key("EXAMPLE", &kid, &k).await.unwrap(), VaultWrite::Stored(1));
    assert_eq!(vault.get_key(&kid, "EXAMPLE").await.unwrap(), Some(k.clone()));
    assert_eq!(vault.add_key("EXAMPLE", &kid, &k).await.unwrap(), VaultWrite::Stored(0));
}

#[tokio::test]
async fn api_vault_bulk_write() {
    let state = ApiState::default();
    let uri = serve(state.clone()).await;
    let vault = ApiVault::new("remote", uri, TOKEN).unwrap();

    let keys = BTreeMap::from([
        (Uuid::from_u128(1), key("11111111111111111111111111111111")),
        (Uuid::from_u128(2), key("00000000000000000000000000000000")),
        (Uuid::from_u128(3), key("33333333333333333333333333333333")),
    ]);
    assert_eq!(vault.add_keys("EXAMPLE", &keys).await.unwrap(), VaultWrite::Stored(2));
    assert_eq!(state.keys.lock().len(), 2);
}

#[tokio::test]
async fn api_vault_refusals_are_typed() {
    let uri = serve(ApiState {
        read_only: true,
        ..Default::default()
    })
    .await;
    let kid = Uuid::from_u128(7);
    let k = key("77777777777777777777777777777777");

    let read_only = ApiVault::new("remote", uri.clone(), TOKEN).unwrap();
    assert_eq!(read_only.add_key("EXAMPLE", &kid, &k).await.unwrap(), VaultWrite::PermissionDenied);

    let bad_token = ApiVault::new("remote", uri, "wrong").unwrap();
    assert_eq!(bad_token.add_key("EXAMPLE", &kid, &k).await.unwrap(), VaultWrite::PermissionDenied);
    assert!(bad_token.get_key(&kid, "EXAMPLE").await.is_err());
}

#[tokio::test]
async fn api_vault_without_write_endpoints_is_unsupported() {
    let app = Router::new().route(
        "/{service}/{kid}",
        get(|| async { Json(json!({"code": 2, "message": "Key not found"})) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let vault = ApiVault::new("lookup", format!("http://{addr}"), TOKEN).unwrap();
    let k = key("77777777777777777777777777777777");
    assert_eq!(
        vault.add_key("EXAMPLE", &Uuid::from_u128(7), &k).await.unwrap(),
        VaultWrite::Unsupported
    );
}
