#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{task::JoinHandle, time::Duration};

/// In-memory JSON document behind a `PATCH /{path}.json` endpoint.
#[derive(Clone, Default)]
pub struct FakeStore {
    pub document: Arc<Mutex<Map<String, Value>>>,
    pub auth_seen: Arc<Mutex<Vec<Option<String>>>>,
    pub fail_with: Option<StatusCode>,
}

impl FakeStore {
    pub fn document(&self) -> Map<String, Value> {
        self.document.lock().unwrap().clone()
    }
}

async fn merge_document(
    State(store): State<FakeStore>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    store.auth_seen.lock().unwrap().push(query.get("auth").cloned());
    if let Some(status) = store.fail_with {
        return (status, Json(serde_json::json!({"error": "Permission denied"})));
    }
    let mut doc = store.document.lock().unwrap();
    for (k, v) in body.iter() {
        doc.insert(k.clone(), v.clone());
    }
    (StatusCode::OK, Json(Value::Object(body)))
}

pub async fn spawn_store(path: &'static str, store: FakeStore) -> (String, JoinHandle<()>) {
    let router = Router::new()
        .route(path, patch(merge_document))
        .with_state(store);
    spawn(router).await
}

/// ThingSpeak style update endpoint recording every query it receives.
#[derive(Clone, Default)]
pub struct FakeMetrics {
    pub requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    pub fail_with: Option<StatusCode>,
}

impl FakeMetrics {
    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }
}

async fn update_channel(
    State(metrics): State<FakeMetrics>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let entry = {
        let mut requests = metrics.requests.lock().unwrap();
        requests.push(query);
        requests.len()
    };
    match metrics.fail_with {
        Some(status) => (status, "error".into()),
        None => (StatusCode::OK, entry.to_string()),
    }
}

pub async fn spawn_metrics(metrics: FakeMetrics) -> (String, JoinHandle<()>) {
    let router = Router::new()
        .route("/update", get(update_channel))
        .with_state(metrics);
    spawn(router).await
}

async fn spawn(router: Router) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // ensure server is ready
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}
