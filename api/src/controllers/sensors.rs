use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;

use super::{devices, not_found, parse_id, timestamp, Collection, Ctx};
use crate::errors::{Error, Result};
use crate::hal::{Document, Link};
use crate::model::{Device, Id, NewSensor, OwnerRef, Sensor, SensorType};
use crate::pagination::{PageRequest, Params};
use crate::publish::Topic;
use crate::rest::AppState;
use crate::schema::EntityKind;
use crate::validate::{parse_body, Fields};

pub const PAGE_SIZE: usize = 30;

pub fn document(ctx: &Ctx, sensor: &Sensor) -> Document {
    let urls = &ctx.urls;
    ctx.document(Link::new(urls.sensor(sensor.id)).titled(sensor.metric.clone()))
        .link(
            "ch:device",
            Link::new(urls.device(sensor.device_id)).titled("Device"),
        )
        .link(
            "ch:dataHistory",
            Link::new(urls.data_of(sensor.id)).titled("Data"),
        )
        .link(
            "ch:aggregateData",
            Link::new(urls.aggregates_of(sensor.id))
                .titled("Aggregate Data")
                .templated(),
        )
        .link(
            "ch:metadata",
            Link::new(urls.metadata_of(OwnerRef::Sensor(sensor.id))).titled("Metadata"),
        )
        .link(
            "editForm",
            Link::new(urls.sensor_edit(sensor.id)).titled("Edit Sensor"),
        )
        .property("sensor-type", sensor.sensor_type.as_str())
        .property("dataType", sensor.sensor_type.data_type())
        .property("metric", sensor.metric.clone())
        .property("unit", sensor.unit.clone())
        .property("active", sensor.active)
        .property("value", sensor.value.map_or(Value::Null, Value::from))
        .property(
            "updated",
            sensor
                .updated
                .map_or(Value::Null, |ts| Value::from(timestamp(ts))),
        )
}

pub(crate) async fn load(state: &AppState, id: Id) -> Result<Sensor> {
    state
        .entities
        .get_sensor(id)
        .await?
        .ok_or_else(|| not_found("sensor", id))
}

async fn parent_device(state: &AppState, params: &Params) -> Result<Option<Device>> {
    match params.id("device")? {
        Some(device) => Ok(Some(devices::load(state, device).await?)),
        None => Ok(None),
    }
}

async fn required_device(state: &AppState, params: &Params) -> Result<Device> {
    parent_device(state, params)
        .await?
        .ok_or_else(|| Error::query("device", "is required"))
}

/// Sensor changes notify the owning site and device.
fn topics(device: &Device) -> [Topic; 2] {
    [Topic::Site(device.site_id), Topic::Device(device.id)]
}

pub async fn list(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let request = PageRequest::from_params(&params)?;
    let device = parent_device(state, &params).await?.map(|d| d.id);
    let page = state
        .entities
        .list_sensors(device, request.window(PAGE_SIZE))
        .await?;
    let items = page.items.iter().map(|s| document(ctx, s)).collect();

    let collection = Collection {
        path: ctx.urls.sensors(),
        filters: device.map(|d| ("device", d.to_string())).into_iter().collect(),
        request,
        page_size: PAGE_SIZE,
    };
    let mut doc = collection.document(ctx, "Sensors", items, page.total);
    if let Some(device) = device {
        doc = doc
            .link("ch:device", Link::new(ctx.urls.device(device)).titled("Device"))
            .link(
                "createForm",
                Link::new(ctx.urls.sensor_create(device)).titled("Create Sensor"),
            );
    }
    ctx.reply(StatusCode::OK, &doc)
}

pub async fn get(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let sensor = load(state, parse_id(raw_id, "sensor")?).await?;
    ctx.reply(StatusCode::OK, &document(ctx, &sensor))
}

pub async fn create_form(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let device = required_device(state, &params).await?;
    let form = ctx.form(ctx.urls.sensor_create(device.id), EntityKind::Sensor, None);
    ctx.reply(StatusCode::OK, &form)
}

pub async fn create(state: &AppState, ctx: &Ctx, params: Params, body: &[u8]) -> Result<Response> {
    let device = required_device(state, &params).await?;
    let value = parse_body(body)?;
    let fields = Fields::new(&value)?;
    let sensor_type = match fields.string("sensor-type")? {
        Some(raw) => raw
            .parse::<SensorType>()
            .map_err(|reason| Error::validation("sensor-type", reason))?,
        None => SensorType::Scalar,
    };
    let new_sensor = NewSensor {
        device_id: device.id,
        sensor_type,
        metric: fields.required_string("metric")?,
        unit: fields.required_string("unit")?,
        active: fields.boolean("active")?.unwrap_or(true),
    };

    let sensor = state.entities.create_sensor(new_sensor).await?;
    let doc = document(ctx, &sensor);
    state.events.publish(&topics(&device), &doc.to_hal());
    ctx.reply(StatusCode::CREATED, &doc)
}

pub async fn edit_form(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let sensor = load(state, parse_id(raw_id, "sensor")?).await?;
    let current = document(ctx, &sensor).to_flat();
    let form = ctx.form(
        ctx.urls.sensor_edit(sensor.id),
        EntityKind::Sensor,
        Some(&current),
    );
    ctx.reply(StatusCode::OK, &form)
}

/// The variant is fixed at creation; `sensor-type` in an edit is ignored.
pub async fn update(state: &AppState, ctx: &Ctx, raw_id: &str, body: &[u8]) -> Result<Response> {
    let mut sensor = load(state, parse_id(raw_id, "sensor")?).await?;
    let device = devices::load(state, sensor.device_id).await?;
    let value = parse_body(body)?;
    let fields = Fields::new(&value)?;

    if fields.has("metric") {
        sensor.metric = fields.required_string("metric")?;
    }
    if fields.has("unit") {
        sensor.unit = fields.required_string("unit")?;
    }
    if let Some(active) = fields.boolean("active")? {
        sensor.active = active;
    }

    let sensor = state
        .entities
        .update_sensor(&sensor)
        .await?
        .ok_or_else(|| not_found("sensor", sensor.id))?;
    let doc = document(ctx, &sensor);
    state.events.publish(&topics(&device), &doc.to_hal());
    ctx.reply(StatusCode::OK, &doc)
}
