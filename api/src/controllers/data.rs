//! Sensor data history and rollup reads, plus reading ingestion.

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::error;

use super::{devices, sensors, timestamp, Ctx};
use crate::errors::{Error, Result};
use crate::hal::{Document, Link};
use crate::metrics::DATA_POINTS_TOTAL;
use crate::model::{AggWindow, AggregateBucket, Id, ScalarDataPoint, Sensor, SensorType};
use crate::pagination::{href, Params};
use crate::publish::Topic;
use crate::rest::AppState;
use crate::schema::EntityKind;
use crate::store::DataFilter;
use crate::validate::{one_or_many, parse_body, parse_range_param, Fields};

/// Span of a history read when the client gives no lower bound.
const DEFAULT_HISTORY_HOURS: i64 = 6;

const GTE: &str = "timestamp__gte";
const LT: &str = "timestamp__lt";

fn sensor_param(params: &Params) -> Result<Id> {
    params
        .id("sensor_id")?
        .ok_or_else(|| Error::query("sensor_id", "is required"))
}

fn range_param(params: &Params, name: &str) -> Result<Option<DateTime<Utc>>> {
    params
        .get(name)
        .map(|raw| parse_range_param(name, raw))
        .transpose()
}

/// The sensor behind a data endpoint. Only scalar sensors store readings.
async fn scalar_sensor(state: &AppState, id: Id) -> Result<Sensor> {
    let sensor = sensors::load(state, id).await?;
    if sensor.sensor_type != SensorType::Scalar {
        return Err(Error::validation(
            "sensor-type",
            format!("{} sensors have no scalar data", sensor.sensor_type.as_str()),
        ));
    }
    Ok(sensor)
}

/// Query pairs in canonical order: the sensor, then whichever bounds the
/// client supplied, exactly as supplied.
fn echo_filters<'a>(params: &Params, sensor_id: Id, extra: &[&'a str]) -> Vec<(&'a str, String)> {
    let mut pairs = vec![("sensor_id", sensor_id.to_string())];
    for name in extra {
        if let Some(raw) = params.get(name) {
            pairs.push((*name, raw.to_string()));
        }
    }
    pairs
}

fn earlier(ts: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ts.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn window_href(ctx: &Ctx, sensor_id: Id, gte: DateTime<Utc>, lt: DateTime<Utc>) -> String {
    href(
        &ctx.urls.scalar_data(),
        &[
            ("sensor_id", sensor_id.to_string()),
            (GTE, timestamp(gte)),
            (LT, timestamp(lt)),
        ],
    )
}

pub fn point_document(ctx: &Ctx, sensor: &Sensor, point: &ScalarDataPoint) -> Document {
    Document::new(Link::new(ctx.urls.data_of(sensor.id)).titled(format!("{} Data", sensor.metric)))
        .link(
            "ch:sensor",
            Link::new(ctx.urls.sensor(sensor.id)).titled(sensor.metric.clone()),
        )
        .property("value", point.value)
        .property("timestamp", timestamp(point.timestamp))
}

fn bucket_value(bucket: &AggregateBucket) -> Value {
    json!({
        "timestamp": timestamp(bucket.timestamp),
        "min": bucket.min,
        "max": bucket.max,
        "mean": bucket.mean,
        "count": bucket.count,
        "sum": bucket.sum,
    })
}

pub async fn history(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let sensor_id = sensor_param(&params)?;
    let gte = range_param(&params, GTE)?;
    let lt = range_param(&params, LT)?;
    let sensor = scalar_sensor(state, sensor_id).await?;

    let now = Utc::now();
    let lt = lt.unwrap_or(now);
    let gte = gte.unwrap_or_else(|| earlier(lt, Duration::hours(DEFAULT_HISTORY_HOURS)));
    let points = state
        .series
        .get_sensor_data(&DataFilter::between(sensor.id, gte, lt))
        .await?;

    let data: Vec<Value> = points
        .iter()
        .map(|p| json!({"timestamp": timestamp(p.timestamp), "value": p.value}))
        .collect();

    let this = href(
        &ctx.urls.scalar_data(),
        &echo_filters(&params, sensor.id, &[GTE, LT]),
    );
    let mut doc = ctx
        .document(Link::new(this).titled(format!("{} Data", sensor.metric)))
        .link(
            "ch:sensor",
            Link::new(ctx.urls.sensor(sensor.id)).titled(sensor.metric.clone()),
        )
        .link(
            "createForm",
            Link::new(ctx.urls.data_create(sensor.id)).titled("Create Data"),
        );

    let span = lt - gte;
    if span > Duration::zero() {
        if let Some(start) = gte.checked_sub_signed(span) {
            doc = doc.link(
                "previous",
                Link::new(window_href(ctx, sensor.id, start, gte)).titled("Previous Window"),
            );
        }
        if let Some(end) = lt.checked_add_signed(span).filter(|_| lt <= now) {
            doc = doc.link(
                "next",
                Link::new(window_href(ctx, sensor.id, lt, end)).titled("Next Window"),
            );
        }
    }

    let doc = doc
        .property("dataType", sensor.sensor_type.data_type())
        .property("totalCount", data.len())
        .property("data", Value::Array(data));
    ctx.reply(StatusCode::OK, &doc)
}

pub async fn create_form(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let sensor = scalar_sensor(state, sensor_param(&params)?).await?;
    let form = ctx.form(ctx.urls.data_create(sensor.id), EntityKind::ScalarData, None);
    ctx.reply(StatusCode::OK, &form)
}

/// Accepts one reading or a list. Every element is validated before any is
/// stored; each is then stored on its own, so a storage failure for one
/// leaves the others committed (and announced). Readings are write-once: a
/// second reading at an occupied timestamp is rejected and announces nothing.
pub async fn create(state: &AppState, ctx: &Ctx, params: Params, body: &[u8]) -> Result<Response> {
    let sensor_id = sensor_param(&params)?;
    let value = parse_body(body)?;
    let sensor = scalar_sensor(state, sensor_id).await?;
    let device = devices::load(state, sensor.device_id).await?;

    let (items, was_list) = one_or_many(value);
    let now = Utc::now();
    let points = items
        .iter()
        .map(|item| {
            let fields = Fields::new(item)?;
            Ok(ScalarDataPoint {
                site_id: device.site_id,
                device_id: device.id,
                sensor_id: sensor.id,
                value: fields.required_number("value")?,
                timestamp: fields
                    .timestamp("timestamp", state.settings.time_zone)?
                    .unwrap_or(now),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let topics = [
        Topic::Site(device.site_id),
        Topic::Device(device.id),
        Topic::Sensor(sensor.id),
    ];
    let results = state.series.post_batch(&points).await;

    let mut docs = Vec::with_capacity(points.len());
    let mut failure = None;
    for (point, result) in points.iter().zip(results) {
        let error = match result {
            Ok(true) => None,
            Ok(false) => Some(Error::validation(
                "timestamp",
                format!(
                    "sensor {} already has a reading at {}",
                    sensor.id,
                    timestamp(point.timestamp)
                ),
            )),
            Err(e) => Some(e),
        };
        if let Some(e) = error {
            if failure.is_none() {
                failure = Some(e);
            }
            continue;
        }
        DATA_POINTS_TOTAL.inc();
        if let Err(e) = state
            .entities
            .record_reading(sensor.id, point.value, point.timestamp)
            .await
        {
            error!("Failed to update current value of sensor {}: {}", sensor.id, e);
        }
        state.rollups.notify(sensor.id, point.timestamp);

        let doc = point_document(ctx, &sensor, point);
        state.events.publish(&topics, &doc.to_hal());
        docs.push(doc);
    }

    if let Some(e) = failure {
        return Err(e);
    }
    ctx.reply_created(docs, was_list)
}

fn default_span(window: AggWindow) -> Duration {
    match window {
        AggWindow::Hour => Duration::days(1),
        AggWindow::Day => Duration::days(30),
        AggWindow::Week => Duration::weeks(52),
    }
}

/// Stored rollup buckets. The window token is checked before any lookup.
pub async fn aggregates(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let sensor_id = sensor_param(&params)?;
    let window = match params.get("aggtime") {
        None => return Err(Error::query("aggtime", "is required (1h, 1d or 1w)")),
        Some(raw) => raw
            .parse::<AggWindow>()
            .map_err(|reason| Error::query("aggtime", reason))?,
    };
    let gte = range_param(&params, GTE)?;
    let lt = range_param(&params, LT)?;
    let sensor = scalar_sensor(state, sensor_id).await?;

    let lt = lt.unwrap_or_else(Utc::now);
    let gte = gte.unwrap_or_else(|| earlier(lt, default_span(window)));
    let buckets = state
        .series
        .get_aggregates(window, &DataFilter::between(sensor.id, gte, lt))
        .await?;
    let data: Vec<Value> = buckets.iter().map(bucket_value).collect();

    let this = href(
        &ctx.urls.aggregate_data(),
        &echo_filters(&params, sensor.id, &["aggtime", GTE, LT]),
    );
    let doc = ctx
        .document(Link::new(this).titled(format!("{} {} Aggregates", sensor.metric, window)))
        .link(
            "ch:sensor",
            Link::new(ctx.urls.sensor(sensor.id)).titled(sensor.metric.clone()),
        )
        .link(
            "ch:dataHistory",
            Link::new(ctx.urls.data_of(sensor.id)).titled("Data"),
        )
        .property("dataType", sensor.sensor_type.data_type())
        .property("aggtime", window.token())
        .property("totalCount", data.len())
        .property("data", Value::Array(data));
    ctx.reply(StatusCode::OK, &doc)
}
