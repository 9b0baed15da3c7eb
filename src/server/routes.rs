//! HTTP route handlers for the development server.
//!
//! Every route answers `200 OK` with an [`Envelope`]; failures are carried
//! in its `code` and `message`.

use crate::api::{
    CollectionDescription, CollectionRequest, CollectionStats, CreateCollectionRequest,
    CreateIndexRequest, DescribeIndexRequest, Empty, Envelope, HasResponse, Hit, IndexDescription,
    InsertRequest, InsertResponse, LoadStateResponse, PartitionRequest, SearchBody, API_PREFIX,
};
use crate::error::{Result, WorkflowError};
use crate::server::store::CollectionStore;
use crate::server::AppState;
use axum::{extract::State, response::Json, routing::post, Router};
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

// --- Router ---

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/collections/list", post(list_collections))
        .route("/collections/has", post(has_collection))
        .route("/collections/create", post(create_collection))
        .route("/collections/describe", post(describe_collection))
        .route("/collections/drop", post(drop_collection))
        .route("/collections/load", post(load_collection))
        .route("/collections/release", post(release_collection))
        .route("/collections/get_load_state", post(get_load_state))
        .route("/collections/get_stats", post(get_stats))
        .route("/partitions/create", post(create_partition))
        .route("/partitions/has", post(has_partition))
        .route("/partitions/list", post(list_partitions))
        .route("/indexes/create", post(create_index))
        .route("/indexes/describe", post(describe_index))
        .route("/entities/insert", post(insert_entities))
        .route("/entities/search", post(search_entities));

    Router::new().nest(API_PREFIX, api).with_state(state)
}

// --- Helpers ---

fn read(state: &AppState) -> Result<RwLockReadGuard<'_, CollectionStore>> {
    state
        .store
        .read()
        .map_err(|_| WorkflowError::StorageError("Lock poisoned".to_string()))
}

fn write(state: &AppState) -> Result<RwLockWriteGuard<'_, CollectionStore>> {
    state
        .store
        .write()
        .map_err(|_| WorkflowError::StorageError("Lock poisoned".to_string()))
}

fn respond<T>(result: Result<T>) -> Json<Envelope<T>> {
    match result {
        Ok(data) => Json(Envelope::success(data)),
        Err(e) => {
            warn!(error = %e, "request rejected");
            Json(Envelope::failure(&e))
        }
    }
}

// --- Handlers ---

async fn list_collections(State(state): State<Arc<AppState>>) -> Json<Envelope<Vec<String>>> {
    respond(read(&state).map(|store| store.list()))
}

async fn has_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<HasResponse>> {
    respond(read(&state).map(|store| HasResponse {
        has: store.has(&req.collection_name),
    }))
}

async fn create_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCollectionRequest>,
) -> Json<Envelope<Empty>> {
    let result = write(&state).and_then(|mut store| {
        store.create(&req.collection_name, req.schema, req.params.shards_num)
    });
    if result.is_ok() {
        info!(collection = %req.collection_name, "collection created");
    }
    respond(result.map(|_| Empty::default()))
}

async fn describe_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<CollectionDescription>> {
    respond(read(&state).and_then(|store| store.describe(&req.collection_name)))
}

async fn drop_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<Empty>> {
    let result = write(&state).and_then(|mut store| store.drop_collection(&req.collection_name));
    respond(result.map(|_| Empty::default()))
}

async fn load_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<Empty>> {
    let result = write(&state).and_then(|mut store| store.load(&req.collection_name));
    respond(result.map(|_| Empty::default()))
}

async fn release_collection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<Empty>> {
    let result = write(&state).and_then(|mut store| store.release(&req.collection_name));
    respond(result.map(|_| Empty::default()))
}

async fn get_load_state(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<LoadStateResponse>> {
    respond(read(&state).map(|store| LoadStateResponse {
        load_state: store.load_state(&req.collection_name),
    }))
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<CollectionStats>> {
    respond(read(&state).and_then(|store| store.stats(&req.collection_name)))
}

async fn create_partition(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PartitionRequest>,
) -> Json<Envelope<Empty>> {
    let result = write(&state)
        .and_then(|mut store| store.create_partition(&req.collection_name, &req.partition_name));
    respond(result.map(|_| Empty::default()))
}

async fn has_partition(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PartitionRequest>,
) -> Json<Envelope<HasResponse>> {
    respond(read(&state).and_then(|store| {
        store
            .has_partition(&req.collection_name, &req.partition_name)
            .map(|has| HasResponse { has })
    }))
}

async fn list_partitions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CollectionRequest>,
) -> Json<Envelope<Vec<String>>> {
    respond(read(&state).and_then(|store| store.list_partitions(&req.collection_name)))
}

async fn create_index(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateIndexRequest>,
) -> Json<Envelope<Empty>> {
    let result = write(&state).and_then(|mut store| {
        req.index_params
            .into_iter()
            .try_for_each(|param| store.create_index(&req.collection_name, param))
    });
    respond(result.map(|_| Empty::default()))
}

async fn describe_index(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DescribeIndexRequest>,
) -> Json<Envelope<Vec<IndexDescription>>> {
    respond(read(&state).and_then(|store| store.describe_index(&req.collection_name, &req.index_name)))
}

async fn insert_entities(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InsertRequest>,
) -> Json<Envelope<InsertResponse>> {
    let rows = req.data.len();
    let result = write(&state)
        .and_then(|mut store| store.insert(&req.collection_name, &req.partition_name, req.data));
    if result.is_ok() {
        debug!(collection = %req.collection_name, rows, "rows inserted");
    }
    respond(result)
}

/// Hits of every query go out as one flat list; `topks` tells the client
/// where each query's hits end.
async fn search_entities(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchBody>,
) -> Json<Envelope<Vec<Hit>>> {
    let start = Instant::now();
    let result = read(&state).and_then(|store| store.search(&req));
    debug!(
        collection = %req.collection_name,
        queries = req.data.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "search served"
    );
    let topks: Vec<usize> = result
        .as_ref()
        .map(|per_query| per_query.iter().map(Vec::len).collect())
        .unwrap_or_default();
    let Json(envelope) =
        respond(result.map(|per_query| per_query.into_iter().flatten().collect::<Vec<Hit>>()));
    Json(envelope.with_topks(topks))
}
