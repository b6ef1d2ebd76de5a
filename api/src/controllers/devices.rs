use axum::http::StatusCode;
use axum::response::Response;

use super::{geo_value, not_found, parse_id, Collection, Ctx};
use crate::errors::{Error, Result};
use crate::hal::{Document, Link};
use crate::model::{Device, Id, NewDevice, OwnerRef};
use crate::pagination::{PageRequest, Params};
use crate::publish::Topic;
use crate::rest::AppState;
use crate::schema::EntityKind;
use crate::validate::{parse_body, Fields};

pub const PAGE_SIZE: usize = 30;

fn descriptive(device: &Device) -> [(&'static str, &Option<String>); 4] {
    [
        ("description", &device.description),
        ("building", &device.building),
        ("floor", &device.floor),
        ("room", &device.room),
    ]
}

pub fn document(ctx: &Ctx, device: &Device) -> Document {
    let urls = &ctx.urls;
    let mut doc = ctx
        .document(Link::new(urls.device(device.id)).titled(device.name.clone()))
        .link("ch:site", Link::new(urls.site(device.site_id)).titled("Site"))
        .link(
            "ch:sensors",
            Link::new(urls.sensors_of(device.id)).titled("Sensors"),
        )
        .link(
            "ch:metadata",
            Link::new(urls.metadata_of(OwnerRef::Device(device.id))).titled("Metadata"),
        )
        .link(
            "editForm",
            Link::new(urls.device_edit(device.id)).titled("Edit Device"),
        )
        .property("name", device.name.clone())
        .property("active", device.active);
    for (key, value) in descriptive(device) {
        doc = doc.property_opt(key, value.clone());
    }
    if let Some(geo) = &device.geo_location {
        doc = doc.property("geoLocation", geo_value(geo));
    }
    doc
}

pub(crate) async fn load(state: &AppState, id: Id) -> Result<Device> {
    state
        .entities
        .get_device(id)
        .await?
        .ok_or_else(|| not_found("device", id))
}

/// The `site` query parameter every parented device URL carries.
async fn parent_site(state: &AppState, params: &Params) -> Result<Option<Id>> {
    let Some(site) = params.id("site")? else {
        return Ok(None);
    };
    state
        .entities
        .get_site(site)
        .await?
        .ok_or_else(|| not_found("site", site))?;
    Ok(Some(site))
}

async fn required_site(state: &AppState, params: &Params) -> Result<Id> {
    parent_site(state, params)
        .await?
        .ok_or_else(|| Error::query("site", "is required"))
}

fn topics(device: &Device) -> [Topic; 2] {
    [Topic::Site(device.site_id), Topic::Device(device.id)]
}

pub async fn list(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let request = PageRequest::from_params(&params)?;
    let site = parent_site(state, &params).await?;
    let page = state
        .entities
        .list_devices(site, request.window(PAGE_SIZE))
        .await?;
    let items = page.items.iter().map(|d| document(ctx, d)).collect();

    let collection = Collection {
        path: ctx.urls.devices(),
        filters: site.map(|s| ("site", s.to_string())).into_iter().collect(),
        request,
        page_size: PAGE_SIZE,
    };
    let mut doc = collection.document(ctx, "Devices", items, page.total);
    if let Some(site) = site {
        doc = doc
            .link("ch:site", Link::new(ctx.urls.site(site)).titled("Site"))
            .link(
                "createForm",
                Link::new(ctx.urls.device_create(site)).titled("Create Device"),
            );
    }
    ctx.reply(StatusCode::OK, &doc)
}

pub async fn get(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let device = load(state, parse_id(raw_id, "device")?).await?;
    ctx.reply(StatusCode::OK, &document(ctx, &device))
}

pub async fn create_form(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let site = required_site(state, &params).await?;
    let form = ctx.form(ctx.urls.device_create(site), EntityKind::Device, None);
    ctx.reply(StatusCode::OK, &form)
}

pub async fn create(state: &AppState, ctx: &Ctx, params: Params, body: &[u8]) -> Result<Response> {
    let site_id = required_site(state, &params).await?;
    let value = parse_body(body)?;
    let fields = Fields::new(&value)?;
    let new_device = NewDevice {
        site_id,
        name: fields.required_string("name")?,
        active: fields.boolean("active")?.unwrap_or(true),
        description: fields.string("description")?,
        building: fields.string("building")?,
        floor: fields.string("floor")?,
        room: fields.string("room")?,
        geo_location: fields.geo_location()?,
    };

    let device = state.entities.create_device(new_device).await?;
    let doc = document(ctx, &device);
    state.events.publish(&topics(&device), &doc.to_hal());
    ctx.reply(StatusCode::CREATED, &doc)
}

pub async fn edit_form(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let device = load(state, parse_id(raw_id, "device")?).await?;
    let current = document(ctx, &device).to_flat();
    let form = ctx.form(
        ctx.urls.device_edit(device.id),
        EntityKind::Device,
        Some(&current),
    );
    ctx.reply(StatusCode::OK, &form)
}

pub async fn update(state: &AppState, ctx: &Ctx, raw_id: &str, body: &[u8]) -> Result<Response> {
    let mut device = load(state, parse_id(raw_id, "device")?).await?;
    let value = parse_body(body)?;
    let fields = Fields::new(&value)?;

    if fields.has("name") {
        device.name = fields.required_string("name")?;
    }
    if let Some(active) = fields.boolean("active")? {
        device.active = active;
    }
    for (key, slot) in [
        ("description", &mut device.description),
        ("building", &mut device.building),
        ("floor", &mut device.floor),
        ("room", &mut device.room),
    ] {
        if let Some(text) = fields.string(key)? {
            *slot = Some(text);
        }
    }
    if let Some(geo) = fields.geo_location()? {
        device.geo_location = Some(geo);
    }

    let device = state
        .entities
        .update_device(&device)
        .await?
        .ok_or_else(|| not_found("device", device.id))?;
    let doc = document(ctx, &device);
    state.events.publish(&topics(&device), &doc.to_hal());
    ctx.reply(StatusCode::OK, &doc)
}
