use std::collections::HashSet;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chain_api::batching::{DirtyWeek, RollupQueue};
use chain_api::config::Settings;
use chain_api::memory::{MemoryEntityStore, MemoryTimeSeries};
use chain_api::publish::{EventPublisher, MemoryPublisher};
use chain_api::rest::{create_router, AppState};
use chain_api::rollup;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

const HAL: &str = "application/hal+json";

struct Harness {
    app: Router,
    events: Arc<MemoryPublisher>,
    series: Arc<MemoryTimeSeries>,
    _dirty: mpsc::Receiver<DirtyWeek>,
}

impl Harness {
    fn new() -> Self {
        let events = Arc::new(MemoryPublisher::new());
        let series = Arc::new(MemoryTimeSeries::new());
        let (rollups, dirty) = RollupQueue::channel(1024);
        let state = AppState::new(
            Arc::new(MemoryEntityStore::new()),
            series.clone(),
            EventPublisher::new(events.clone()),
            rollups,
            Settings::default(),
        );
        Self {
            app: create_router(state),
            events,
            series,
            _dirty: dirty,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, accept: Option<&str>) -> Response {
        let mut builder = Request::get(uri).header(header::HOST, "testserver");
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn get_hal(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.get(uri, Some(HAL)).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    async fn post(&self, uri: &str, body: &str) -> Response {
        let request = Request::post(uri)
            .header(header::HOST, "testserver")
            .header(header::ACCEPT, HAL)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: Method, uri: &str, body: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "testserver")
            .header(header::ACCEPT, HAL)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = self.post(uri, &body.to_string()).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Creates a site, a device in it and a scalar sensor on the device.
    async fn sensor_fixture(&self) -> (String, String, String) {
        let (_, site) = self
            .post_json("/sites/create", json!({"name": "Tidmarsh"}))
            .await;
        let site_path = path_of(&site);
        let site_id = site_path.rsplit('/').next().unwrap().to_string();

        let (_, device) = self
            .post_json(
                &format!("/devices/create?site={}", site_id),
                json!({"name": "Node 1"}),
            )
            .await;
        let device_id = path_of(&device).rsplit('/').next().unwrap().to_string();

        let (status, sensor) = self
            .post_json(
                &format!("/sensors/create?device={}", device_id),
                json!({"metric": "temperature", "unit": "celsius"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let sensor_id = path_of(&sensor).rsplit('/').next().unwrap().to_string();
        (site_id, device_id, sensor_id)
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn self_href(doc: &Value) -> &str {
    doc["_links"]["self"]["href"].as_str().unwrap()
}

/// The request path of a HAL document's self link.
fn path_of(doc: &Value) -> String {
    self_href(doc)
        .strip_prefix("http://testserver")
        .unwrap()
        .to_string()
}

fn path_of_href(href: &str) -> String {
    href.strip_prefix("http://testserver").unwrap().to_string()
}

fn an_hour_ago() -> String {
    (Utc::now() - Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[tokio::test]
async fn test_root_links_to_sites() {
    let harness = Harness::new();
    let (status, doc) = harness.get_hal("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        doc["_links"]["ch:sites"]["href"],
        "http://testserver/sites/"
    );
    assert!(doc["_links"]["curies"].is_array());
}

#[tokio::test]
async fn test_site_round_trip() {
    let harness = Harness::new();
    let (status, created) = harness
        .post_json(
            "/sites/create",
            json!({
                "name": "Tidmarsh",
                "geoLocation": {"latitude": 41.9, "longitude": -70.57},
                "rawZmqStream": "tcp://example.com:8372"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, fetched) = harness.get_hal(&path_of(&created)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Tidmarsh");
    assert_eq!(fetched["geoLocation"]["latitude"], 41.9);
    assert_eq!(fetched["rawZmqStream"], "tcp://example.com:8372");
    assert_eq!(fetched, created);

    let site_id = path_of(&created).rsplit('/').next().unwrap().to_string();
    let events = harness.events.messages(&format!("site-{}", site_id));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["name"], "Tidmarsh");
}

#[tokio::test]
async fn test_site_edit_merges_fields() {
    let harness = Harness::new();
    let (_, created) = harness
        .post_json(
            "/sites/create",
            json!({"name": "Old", "geoLocation": {"latitude": 1.0, "longitude": 2.0}}),
        )
        .await;
    let edit = self_href(&created).to_string() + "/edit";

    let (status, updated) = harness
        .post_json(&path_of_href(&edit), json!({"name": "New"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "New");
    assert_eq!(updated["geoLocation"]["longitude"], 2.0);

    let (status, form) = harness.get_hal(&path_of_href(&edit)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(form["properties"]["name"]["default"], "New");
}

#[tokio::test]
async fn test_repeated_gets_are_identical() {
    let harness = Harness::new();
    let (_, site) = harness
        .post_json("/sites/create", json!({"name": "Stable"}))
        .await;
    let path = path_of(&site);
    let first = body_bytes(harness.get(&path, Some(HAL)).await).await;
    let second = body_bytes(harness.get(&path, Some(HAL)).await).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_pagination_partitions_collection() {
    let harness = Harness::new();
    for i in 0..7 {
        harness
            .post_json("/sites/create", json!({"name": format!("Site {}", i)}))
            .await;
    }

    let mut seen = Vec::new();
    let mut next = Some("/sites/?limit=3".to_string());
    let mut pages = 0;
    while let Some(uri) = next {
        let (status, page) = harness.get_hal(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalCount"], 7);
        assert_eq!(page["_links"]["previous"].is_null(), pages == 0, "{}", uri);
        for item in page["_links"]["items"].as_array().unwrap() {
            seen.push(item["href"].as_str().unwrap().to_string());
        }
        next = page["_links"]["next"]["href"].as_str().map(path_of_href);
        pages += 1;
    }

    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 7);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 7);
}

#[tokio::test]
async fn test_filtered_collection_counts() {
    let harness = Harness::new();
    let (site_id, device_id, _) = harness.sensor_fixture().await;
    harness
        .post_json(
            &format!("/sensors/create?device={}", device_id),
            json!({"metric": "humidity", "unit": "percent"}),
        )
        .await;

    let (status, sensors) = harness
        .get_hal(&format!("/sensors/?device={}", device_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sensors["totalCount"], 2);
    assert!(sensors["_links"]["createForm"]["href"].is_string());

    let (_, devices) = harness
        .get_hal(&format!("/devices/?site={}", site_id))
        .await;
    assert_eq!(devices["totalCount"], 1);
    assert_eq!(devices["_embedded"]["items"][0]["name"], "Node 1");
}

#[tokio::test]
async fn test_post_data_publishes_to_every_level() {
    let harness = Harness::new();
    let (site_id, device_id, sensor_id) = harness.sensor_fixture().await;
    harness.events.clear();

    let (status, point) = harness
        .post_json(
            &format!("/scalar_data/create?sensor_id={}", sensor_id),
            json!({"value": "23", "timestamp": an_hour_ago()}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(point["value"].as_f64(), Some(23.0));

    let sensor_href = format!("http://testserver/sensors/{}", sensor_id);
    for topic in [
        format!("site-{}", site_id),
        format!("device-{}", device_id),
        format!("sensor-{}", sensor_id),
    ] {
        let events = harness.events.messages(&topic);
        assert_eq!(events.len(), 1, "one event on {}", topic);
        assert_eq!(events[0]["value"].as_f64(), Some(23.0));
        assert_eq!(events[0]["_links"]["ch:sensor"]["href"], sensor_href);
    }

    let (_, history) = harness
        .get_hal(&format!("/scalar_data/?sensor_id={}", sensor_id))
        .await;
    assert_eq!(history["totalCount"], 1);
    assert_eq!(history["data"][0]["value"].as_f64(), Some(23.0));

    let (_, sensor) = harness.get_hal(&format!("/sensors/{}", sensor_id)).await;
    assert_eq!(sensor["value"].as_f64(), Some(23.0));
}

#[tokio::test]
async fn test_duplicate_reading_is_rejected() {
    let harness = Harness::new();
    let (_, _, sensor_id) = harness.sensor_fixture().await;
    let create = format!("/scalar_data/create?sensor_id={}", sensor_id);
    let at = an_hour_ago();
    harness.events.clear();

    let (status, _) = harness
        .post_json(&create, json!({"value": 1, "timestamp": at}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = harness
        .post_json(&create, json!({"value": 99, "timestamp": at}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (_, history) = harness
        .get_hal(&format!("/scalar_data/?sensor_id={}", sensor_id))
        .await;
    assert_eq!(history["totalCount"], 1);
    assert_eq!(history["data"][0]["value"].as_f64(), Some(1.0));

    let (_, sensor) = harness.get_hal(&format!("/sensors/{}", sensor_id)).await;
    assert_eq!(sensor["value"].as_f64(), Some(1.0));

    let events = harness.events.messages(&format!("sensor-{}", sensor_id));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["value"].as_f64(), Some(1.0));
}

#[tokio::test]
async fn test_failed_publish_keeps_write() {
    let harness = Harness::new();
    let (_, _, sensor_id) = harness.sensor_fixture().await;
    harness.events.set_failing(true);

    let (status, _) = harness
        .post_json(
            &format!("/scalar_data/create?sensor_id={}", sensor_id),
            json!({"value": 4.5, "timestamp": an_hour_ago()}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, history) = harness
        .get_hal(&format!("/scalar_data/?sensor_id={}", sensor_id))
        .await;
    assert_eq!(history["totalCount"], 1);
}

#[tokio::test]
async fn test_list_of_readings() {
    let harness = Harness::new();
    let (_, _, sensor_id) = harness.sensor_fixture().await;
    let base = Utc::now() - Duration::hours(2);
    let body = json!([
        {"value": 1, "timestamp": base.to_rfc3339()},
        {"value": 2, "timestamp": (base + Duration::minutes(1)).to_rfc3339()},
    ]);

    let (status, created) = harness
        .post_json(&format!("/scalar_data/create?sensor_id={}", sensor_id), body)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created.as_array().unwrap().len(), 2);

    let (_, history) = harness
        .get_hal(&format!("/scalar_data/?sensor_id={}", sensor_id))
        .await;
    assert_eq!(history["totalCount"], 2);
    assert_eq!(history["data"][0]["value"].as_f64(), Some(1.0));
}

#[tokio::test]
async fn test_aggregates() {
    let harness = Harness::new();
    let (_, _, sensor_id) = harness.sensor_fixture().await;
    let base = Utc::now() - Duration::hours(1);
    for (minute, value) in [(0, 10.0), (1, 20.0)] {
        let at = base + Duration::minutes(minute);
        harness
            .post_json(
                &format!("/scalar_data/create?sensor_id={}", sensor_id),
                json!({"value": value, "timestamp": at.to_rfc3339()}),
            )
            .await;
    }

    let response = harness
        .get(
            &format!("/aggregate_data/?sensor_id={}&aggtime=1s", sensor_id),
            Some(HAL),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let id: i64 = sensor_id.parse().unwrap();
    let now = Utc::now();
    rollup::refresh(harness.series.as_ref(), id, now - Duration::hours(2), now)
        .await
        .unwrap();

    let (status, doc) = harness
        .get_hal(&format!("/aggregate_data/?sensor_id={}&aggtime=1h", sensor_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["aggtime"], "1h");
    let data = doc["data"].as_array().unwrap();
    assert!(!data.is_empty());
    let count: i64 = data.iter().map(|b| b["count"].as_i64().unwrap()).sum();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_content_negotiation() {
    let harness = Harness::new();

    let response = harness.get("/", Some("foobar")).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert!(body_json(response).await["message"].is_string());

    let response = harness.get("/", Some("foobar, */*")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], HAL);

    let response = harness.get("/", None).await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(response.headers()[header::VARY], "Accept");

    let response = harness.get("/", Some("text/html")).await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    let page = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(page.starts_with("<!DOCTYPE html>"));
}

#[tokio::test]
async fn test_unknown_resources() {
    let harness = Harness::new();
    for uri in ["/sites/99", "/sites/abc", "/devices/4", "/nowhere"] {
        let response = harness.get(uri, Some(HAL)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        assert!(body_json(response).await["message"].is_string());
    }
}

#[tokio::test]
async fn test_unknown_resource_ignores_accept() {
    let harness = Harness::new();
    for uri in ["/sites/99", "/devices/4/edit", "/sensors/7", "/metadata/3"] {
        let response = harness.get(uri, Some("foobar")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }

    let (site_id, _, _) = harness.sensor_fixture().await;
    let response = harness
        .get(&format!("/sites/{}", site_id), Some("foobar"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_device_and_sensor_creation_publish() {
    let harness = Harness::new();
    let (_, site) = harness
        .post_json("/sites/create", json!({"name": "Tidmarsh"}))
        .await;
    let site_id = path_of(&site).rsplit('/').next().unwrap().to_string();
    harness.events.clear();

    let (status, device) = harness
        .post_json(
            &format!("/devices/create?site={}", site_id),
            json!({"name": "Node 1"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let device_id = path_of(&device).rsplit('/').next().unwrap().to_string();
    let site_topic = format!("site-{}", site_id);
    let device_topic = format!("device-{}", device_id);
    assert_eq!(harness.events.messages(&site_topic).len(), 1);
    let events = harness.events.messages(&device_topic);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["name"], "Node 1");

    harness
        .post_json(
            &format!("/sensors/create?device={}", device_id),
            json!({"metric": "temperature", "unit": "celsius"}),
        )
        .await;
    assert_eq!(harness.events.messages(&site_topic).len(), 2);
    let events = harness.events.messages(&device_topic);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["metric"], "temperature");
}

#[tokio::test]
async fn test_deactivation_is_soft() {
    let harness = Harness::new();
    let (site_id, device_id, sensor_id) = harness.sensor_fixture().await;

    let (status, device) = harness
        .post_json(
            &format!("/devices/{}/edit", device_id),
            json!({"active": false}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["active"], false);
    assert_eq!(device["name"], "Node 1");

    let (status, sensor) = harness
        .post_json(
            &format!("/sensors/{}/edit", sensor_id),
            json!({"active": false}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sensor["active"], false);

    let (status, fetched) = harness.get_hal(&format!("/devices/{}", device_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["active"], false);
    let (_, devices) = harness
        .get_hal(&format!("/devices/?site={}", site_id))
        .await;
    assert_eq!(devices["totalCount"], 1);
    let (_, sensors) = harness
        .get_hal(&format!("/sensors/?device={}", device_id))
        .await;
    assert_eq!(sensors["totalCount"], 1);
    assert_eq!(sensors["_embedded"]["items"][0]["active"], false);
}

#[tokio::test]
async fn test_bad_bodies() {
    let harness = Harness::new();
    for body in ["", "{not json", "[]", r#"{"name": ""}"#] {
        let response = harness.post("/sites/create", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{:?}", body);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }
}

#[tokio::test]
async fn test_ambiguous_timestamp_rejected() {
    let harness = Harness::new();
    let (_, _, sensor_id) = harness.sensor_fixture().await;
    let (status, body) = harness
        .post_json(
            &format!("/scalar_data/create?sensor_id={}", sensor_id),
            json!({"value": 1.0, "timestamp": "2015-11-01T01:00:00"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Ambiguous"));
}

#[tokio::test]
async fn test_non_finite_range_rejected() {
    let harness = Harness::new();
    let (_, _, sensor_id) = harness.sensor_fixture().await;
    let response = harness
        .get(
            &format!("/scalar_data/?sensor_id={}&timestamp__gte=NaN", sensor_id),
            Some(HAL),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_presence_sensor_has_no_scalar_data() {
    let harness = Harness::new();
    let (_, device_id, _) = harness.sensor_fixture().await;
    let (status, sensor) = harness
        .post_json(
            &format!("/sensors/create?device={}", device_id),
            json!({"sensor-type": "presence", "metric": "badge", "unit": "id"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sensor["dataType"], "presence");

    let sensor_id = path_of(&sensor).rsplit('/').next().unwrap().to_string();
    let response = harness
        .get(&format!("/scalar_data/?sensor_id={}", sensor_id), Some(HAL))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cache_headers() {
    let harness = Harness::new();
    let (site_id, _, _) = harness.sensor_fixture().await;

    let response = harness
        .get(&format!("/sites/{}/summary", site_id), Some(HAL))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=60");
    let summary = body_json(response).await;
    assert_eq!(summary["devices"][0]["sensors"][0]["metric"], "temperature");

    let response = harness.get(&format!("/sites/{}", site_id), Some(HAL)).await;
    assert!(response.headers().get(header::CACHE_CONTROL).is_none());
}

#[tokio::test]
async fn test_metadata_latest_wins_and_is_immutable() {
    let harness = Harness::new();
    let (site_id, _, _) = harness.sensor_fixture().await;
    let create = format!("/metadata/create?site_id={}", site_id);

    let (status, _) = harness
        .post_json(
            &create,
            json!({"key": "owner", "value": "alice", "timestamp": "2020-01-01T00:00:00Z"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, newer) = harness
        .post_json(
            &create,
            json!({"key": "owner", "value": 7, "timestamp": "2021-01-01T00:00:00Z"}),
        )
        .await;
    harness
        .post_json(
            &create,
            json!({"key": "owner", "value": "carol", "timestamp": "2019-01-01T00:00:00Z"}),
        )
        .await;

    let (status, list) = harness
        .get_hal(&format!("/metadata/?site_id={}", site_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["totalCount"], 1);
    assert_eq!(list["data"][0]["value"], "7");

    let edit = format!("{}/edit", path_of(&newer));
    let response = harness.post(&edit, r#"{"value": "x"}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = harness.get(&edit, Some(HAL)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, record) = harness.get_hal(&path_of(&newer)).await;
    assert_eq!(record["value"], "7");
}

#[tokio::test]
async fn test_metadata_rejects_every_update_method() {
    let harness = Harness::new();
    let (site_id, _, _) = harness.sensor_fixture().await;
    let (_, record) = harness
        .post_json(
            &format!("/metadata/create?site_id={}", site_id),
            json!({"key": "owner", "value": "alice"}),
        )
        .await;
    let path = path_of(&record);
    let edit = format!("{}/edit", path);

    for method in [Method::PUT, Method::PATCH, Method::DELETE] {
        for uri in [&path, &edit] {
            let response = harness
                .request(method.clone(), uri, r#"{"value": "bob"}"#)
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", method, uri);
            assert_eq!(response.headers()[header::VARY], "Accept");
            assert!(body_json(response).await["message"].is_string());
        }
    }

    let (_, fetched) = harness.get_hal(&path).await;
    assert_eq!(fetched["value"], "alice");
}

#[tokio::test]
async fn test_unsupported_method_has_json_body() {
    let harness = Harness::new();
    let (site_id, _, _) = harness.sensor_fixture().await;
    let response = harness
        .request(Method::DELETE, &format!("/sites/{}", site_id), "")
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::VARY], "Accept");
    assert!(body_json(response).await["message"].is_string());
}

#[tokio::test]
async fn test_metadata_requires_one_owner() {
    let harness = Harness::new();
    let response = harness.get("/metadata/", Some(HAL)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = harness.get("/metadata/?site_id=42", Some(HAL)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
