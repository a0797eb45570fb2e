use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
}

/// Upper bound for `/slow/{ms}`, so a bad test cannot hang the server.
pub const MAX_DELAY_MS: u64 = 30_000;

#[derive(Default)]
pub struct Store {
    items: BTreeMap<u64, Item>,
    next_id: u64,
    blobs: HashMap<String, Bytes>,
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", get(get_item))
        .route("/blobs/{name}", get(get_blob).put(put_blob))
        .route("/slow/{ms}", get(slow))
        .route("/status/{code}", get(status))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_items(State(db): State<Db>) -> Json<Vec<Item>> {
    let store = db.read().await;
    Json(store.items.values().cloned().collect())
}

async fn create_item(
    State(db): State<Db>,
    Json(input): Json<CreateItem>,
) -> (StatusCode, Json<Item>) {
    let mut store = db.write().await;
    store.next_id += 1;
    let item = Item {
        id: store.next_id,
        name: input.name,
    };
    store.items.insert(item.id, item.clone());
    info!(id = item.id, "created item");
    (StatusCode::CREATED, Json(item))
}

async fn get_item(State(db): State<Db>, Path(id): Path<u64>) -> Result<Json<Item>, StatusCode> {
    let store = db.read().await;
    store.items.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_blob(
    State(db): State<Db>,
    Path(name): Path<String>,
) -> Result<([(&'static str, &'static str); 1], Bytes), (StatusCode, &'static str)> {
    let store = db.read().await;
    match store.blobs.get(&name) {
        Some(body) => Ok(([("content-type", "application/json")], body.clone())),
        None => Err((StatusCode::NOT_FOUND, "BlobNotFound")),
    }
}

async fn put_blob(
    State(db): State<Db>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    if !headers.contains_key("x-ms-blob-type") {
        return Err((StatusCode::BAD_REQUEST, "MissingRequiredHeader"));
    }
    debug!(%name, bytes = body.len(), "stored blob");
    db.write().await.blobs.insert(name, body);
    Ok(StatusCode::CREATED)
}

async fn slow(Path(ms): Path<u64>) -> Json<Item> {
    tokio::time::sleep(Duration::from_millis(ms.min(MAX_DELAY_MS))).await;
    Json(Item {
        id: ms,
        name: "slow".to_string(),
    })
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, format!("status {code}")),
        Err(_) => (StatusCode::BAD_REQUEST, format!("invalid status {code}")),
    }
}
