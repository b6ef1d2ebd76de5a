use axum::http::StatusCode;
use axum::response::Response;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use super::{geo_value, not_found, parse_id, timestamp, Collection, Ctx};
use crate::errors::Result;
use crate::hal::{Document, Link};
use crate::model::{NewSite, OwnerRef, Site};
use crate::pagination::{PageRequest, Params, Window};
use crate::publish::Topic;
use crate::rest::AppState;
use crate::schema::EntityKind;
use crate::store::DataFilter;
use crate::validate::{parse_body, Fields};

pub const PAGE_SIZE: usize = 30;

/// How far back the summary's per-sensor readings reach.
const SUMMARY_WINDOW_HOURS: i64 = 6;

pub fn document(ctx: &Ctx, site: &Site) -> Document {
    let urls = &ctx.urls;
    let mut doc = ctx
        .document(Link::new(urls.site(site.id)).titled(site.name.clone()))
        .link(
            "ch:devices",
            Link::new(urls.devices_of(site.id)).titled("Devices"),
        )
        .link(
            "ch:siteSummary",
            Link::new(urls.site_summary(site.id)).titled("Summary"),
        )
        .link(
            "ch:websocketStream",
            Link::new(urls.websocket(site.id)).titled("Websocket Stream"),
        )
        .link(
            "ch:metadata",
            Link::new(urls.metadata_of(OwnerRef::Site(site.id))).titled("Metadata"),
        )
        .link(
            "editForm",
            Link::new(urls.site_edit(site.id)).titled("Edit Site"),
        )
        .property("name", site.name.clone());
    if let Some(stream) = &site.raw_zmq_stream {
        doc = doc
            .link("rawZmqStream", Link::new(stream.clone()).titled("Raw ZMQ Stream"))
            .property("rawZmqStream", stream.clone());
    }
    if let Some(geo) = &site.geo_location {
        doc = doc.property("geoLocation", geo_value(geo));
    }
    doc
}

async fn load(state: &AppState, raw_id: &str) -> Result<Site> {
    let id = parse_id(raw_id, "site")?;
    state
        .entities
        .get_site(id)
        .await?
        .ok_or_else(|| not_found("site", id))
}

/// Accepts both the documented `rawZmqStream` and the older `rawZMQStream`.
fn raw_stream(fields: &Fields<'_>) -> Result<Option<String>> {
    if fields.has("rawZmqStream") {
        fields.uri("rawZmqStream")
    } else {
        fields.uri("rawZMQStream")
    }
}

fn has_raw_stream(fields: &Fields<'_>) -> bool {
    fields.has("rawZmqStream") || fields.has("rawZMQStream")
}

pub async fn list(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let request = PageRequest::from_params(&params)?;
    let page = state.entities.list_sites(request.window(PAGE_SIZE)).await?;
    let items = page.items.iter().map(|site| document(ctx, site)).collect();

    let collection = Collection {
        path: ctx.urls.sites(),
        filters: Vec::new(),
        request,
        page_size: PAGE_SIZE,
    };
    let doc = collection
        .document(ctx, "Sites", items, page.total)
        .link(
            "createForm",
            Link::new(ctx.urls.site_create()).titled("Create Site"),
        );
    ctx.reply(StatusCode::OK, &doc)
}

pub async fn get(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let site = load(state, raw_id).await?;
    ctx.reply(StatusCode::OK, &document(ctx, &site))
}

pub fn create_form(ctx: &Ctx) -> Result<Response> {
    let form = ctx.form(ctx.urls.site_create(), EntityKind::Site, None);
    ctx.reply(StatusCode::OK, &form)
}

pub async fn create(state: &AppState, ctx: &Ctx, body: &[u8]) -> Result<Response> {
    let value = parse_body(body)?;
    let fields = Fields::new(&value)?;
    let new_site = NewSite {
        name: fields.required_string("name")?,
        geo_location: fields.geo_location()?,
        raw_zmq_stream: raw_stream(&fields)?,
    };

    let site = state.entities.create_site(new_site).await?;
    let doc = document(ctx, &site);
    state.events.publish(&[Topic::Site(site.id)], &doc.to_hal());
    ctx.reply(StatusCode::CREATED, &doc)
}

pub async fn edit_form(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let site = load(state, raw_id).await?;
    let current = document(ctx, &site).to_flat();
    let form = ctx.form(ctx.urls.site_edit(site.id), EntityKind::Site, Some(&current));
    ctx.reply(StatusCode::OK, &form)
}

pub async fn update(state: &AppState, ctx: &Ctx, raw_id: &str, body: &[u8]) -> Result<Response> {
    let mut site = load(state, raw_id).await?;
    let value = parse_body(body)?;
    let fields = Fields::new(&value)?;

    if fields.has("name") {
        site.name = fields.required_string("name")?;
    }
    if has_raw_stream(&fields) {
        site.raw_zmq_stream = raw_stream(&fields)?;
    }
    if let Some(geo) = fields.geo_location()? {
        site.geo_location = Some(geo);
    }

    let site = state
        .entities
        .update_site(&site)
        .await?
        .ok_or_else(|| not_found("site", site.id))?;
    let doc = document(ctx, &site);
    state.events.publish(&[Topic::Site(site.id)], &doc.to_hal());
    ctx.reply(StatusCode::OK, &doc)
}

/// Flattened site → devices → sensors tree with each sensor's recent
/// readings. Nested entries carry only an `href`, never link sets.
pub async fn summary(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let site = load(state, raw_id).await?;
    let everything = Window {
        offset: 0,
        size: usize::MAX,
    };
    let lt = Utc::now();
    let gte = lt - Duration::hours(SUMMARY_WINDOW_HOURS);

    let devices = state
        .entities
        .list_devices(Some(site.id), everything)
        .await?
        .items;
    let mut device_values = Vec::with_capacity(devices.len());
    for device in devices {
        let sensors = state
            .entities
            .list_sensors(Some(device.id), everything)
            .await?
            .items;
        let mut sensor_values = Vec::with_capacity(sensors.len());
        for sensor in sensors {
            let data: Vec<Value> = state
                .series
                .get_sensor_data(&DataFilter::between(sensor.id, gte, lt))
                .await?
                .into_iter()
                .map(|p| json!({"timestamp": timestamp(p.timestamp), "value": p.value}))
                .collect();
            sensor_values.push(json!({
                "href": ctx.urls.sensor(sensor.id),
                "metric": sensor.metric,
                "unit": sensor.unit,
                "dataType": sensor.sensor_type.data_type(),
                "value": sensor.value,
                "updated": sensor.updated.map(timestamp),
                "data": data,
            }));
        }

        let mut device_value = json!({
            "href": ctx.urls.device(device.id),
            "name": device.name,
            "active": device.active,
            "sensors": sensor_values,
        });
        for (key, field) in [
            ("description", &device.description),
            ("building", &device.building),
            ("floor", &device.floor),
            ("room", &device.room),
        ] {
            if let Some(field) = field {
                device_value[key] = json!(field);
            }
        }
        device_values.push(device_value);
    }

    let doc = Document::new(
        Link::new(ctx.urls.site_summary(site.id)).titled(format!("{} Summary", site.name)),
    )
    .property("name", site.name.clone())
    .property("devices", Value::Array(device_values));
    ctx.reply_cached(&doc, state.settings.summary_max_age)
}
