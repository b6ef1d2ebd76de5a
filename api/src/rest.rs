use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;

use crate::batching::RollupQueue;
use crate::config::Settings;
use crate::controllers::{data, devices, metadata, root, sensors, sites, Ctx, LookupCtx};
use crate::errors::Result;
use crate::metrics;
use crate::pagination::Params;
use crate::publish::EventPublisher;
use crate::store::{EntityStore, TimeSeriesStore};

/// Everything a request handler needs, shared across the router.
#[derive(Clone)]
pub struct AppState {
    pub entities: Arc<dyn EntityStore>,
    pub series: Arc<dyn TimeSeriesStore>,
    pub events: EventPublisher,
    pub rollups: RollupQueue,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        series: Arc<dyn TimeSeriesStore>,
        events: EventPublisher,
        rollups: RollupQueue,
        settings: Settings,
    ) -> Self {
        Self {
            entities,
            series,
            events,
            rollups,
            settings: Arc::new(settings),
        }
    }
}

type QueryPairs = Query<Vec<(String, String)>>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/metrics", get(get_metrics))
        .route("/sites/", get(list_sites).post(create_site))
        .route("/sites/create", get(site_create_form).post(create_site))
        .route("/sites/:id", get(get_site))
        .route("/sites/:id/edit", get(site_edit_form).post(update_site))
        .route("/sites/:id/summary", get(site_summary))
        .route("/devices/", get(list_devices).post(create_device))
        .route("/devices/create", get(device_create_form).post(create_device))
        .route("/devices/:id", get(get_device))
        .route("/devices/:id/edit", get(device_edit_form).post(update_device))
        .route("/sensors/", get(list_sensors).post(create_sensor))
        .route("/sensors/create", get(sensor_create_form).post(create_sensor))
        .route("/sensors/:id", get(get_sensor))
        .route("/sensors/:id/edit", get(sensor_edit_form).post(update_sensor))
        .route("/scalar_data/", get(data_history).post(create_data))
        .route("/scalar_data/create", get(data_create_form).post(create_data))
        .route("/aggregate_data/", get(aggregate_data))
        .route("/metadata/", get(list_metadata).post(create_metadata))
        .route(
            "/metadata/create",
            get(metadata_create_form).post(create_metadata),
        )
        .route(
            "/metadata/:id",
            get(get_metadata)
                .put(metadata::edit)
                .patch(metadata::edit)
                .delete(metadata::edit),
        )
        .route("/metadata/:id/edit", any(metadata::edit))
        .fallback(unknown_route)
        .method_not_allowed_fallback(unsupported_method)
        .with_state(state)
}

async fn get_metrics() -> String {
    metrics::gather_metrics()
}

async fn unknown_route() -> Response {
    (
        StatusCode::NOT_FOUND,
        [("vary", "Accept")],
        Json(json!({ "message": "No resource at this URL" })),
    )
        .into_response()
}

async fn unsupported_method() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [("vary", "Accept")],
        Json(json!({ "message": "Method not allowed on this resource" })),
    )
        .into_response()
}

async fn get_root(ctx: Ctx) -> Result<Response> {
    root::get(&ctx)
}

// Sites

async fn list_sites(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    sites::list(&state, &ctx, Params::new(query)).await
}

async fn get_site(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    sites::get(&state, &ctx, &id).await
}

async fn site_create_form(ctx: Ctx) -> Result<Response> {
    sites::create_form(&ctx)
}

async fn create_site(
    State(state): State<AppState>,
    ctx: Ctx,
    body: Bytes,
) -> Result<Response> {
    sites::create(&state, &ctx, &body).await
}

async fn site_edit_form(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    sites::edit_form(&state, &ctx, &id).await
}

async fn update_site(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    sites::update(&state, &ctx, &id, &body).await
}

async fn site_summary(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    sites::summary(&state, &ctx, &id).await
}

// Devices

async fn list_devices(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    devices::list(&state, &ctx, Params::new(query)).await
}

async fn get_device(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    devices::get(&state, &ctx, &id).await
}

async fn device_create_form(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    devices::create_form(&state, &ctx, Params::new(query)).await
}

async fn create_device(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
    body: Bytes,
) -> Result<Response> {
    devices::create(&state, &ctx, Params::new(query), &body).await
}

async fn device_edit_form(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    devices::edit_form(&state, &ctx, &id).await
}

async fn update_device(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    devices::update(&state, &ctx, &id, &body).await
}

// Sensors

async fn list_sensors(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    sensors::list(&state, &ctx, Params::new(query)).await
}

async fn get_sensor(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    sensors::get(&state, &ctx, &id).await
}

async fn sensor_create_form(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    sensors::create_form(&state, &ctx, Params::new(query)).await
}

async fn create_sensor(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
    body: Bytes,
) -> Result<Response> {
    sensors::create(&state, &ctx, Params::new(query), &body).await
}

async fn sensor_edit_form(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    sensors::edit_form(&state, &ctx, &id).await
}

async fn update_sensor(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    sensors::update(&state, &ctx, &id, &body).await
}

// Readings and rollups

async fn data_history(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    data::history(&state, &ctx, Params::new(query)).await
}

async fn data_create_form(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    data::create_form(&state, &ctx, Params::new(query)).await
}

async fn create_data(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
    body: Bytes,
) -> Result<Response> {
    data::create(&state, &ctx, Params::new(query), &body).await
}

async fn aggregate_data(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    data::aggregates(&state, &ctx, Params::new(query)).await
}

// Metadata

async fn list_metadata(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    metadata::list(&state, &ctx, Params::new(query)).await
}

async fn get_metadata(
    State(state): State<AppState>,
    LookupCtx(ctx): LookupCtx,
    Path(id): Path<String>,
) -> Result<Response> {
    metadata::get(&state, &ctx, &id).await
}

async fn metadata_create_form(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
) -> Result<Response> {
    metadata::create_form(&state, &ctx, Params::new(query)).await
}

async fn create_metadata(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): QueryPairs,
    body: Bytes,
) -> Result<Response> {
    metadata::create(&state, &ctx, Params::new(query), &body).await
}
