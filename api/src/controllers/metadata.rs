//! Append-only key/value annotations on sites, devices and sensors.
//!
//! There is no update path: every update attempt answers 400 without looking at
//! the request.

use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use serde_json::{json, Value};

use super::{not_found, parse_id, timestamp, Ctx};
use crate::errors::{Error, Result};
use crate::hal::{Document, Link};
use crate::model::{Metadata, NewMetadata, OwnerRef};
use crate::pagination::{href, Params};
use crate::rest::AppState;
use crate::schema::EntityKind;
use crate::validate::{one_or_many, parse_body, Fields};

const OWNER_PARAMS: [&str; 3] = ["site_id", "device_id", "sensor_id"];

fn owner_rel(owner: OwnerRef) -> &'static str {
    match owner {
        OwnerRef::Site(_) => "ch:site",
        OwnerRef::Device(_) => "ch:device",
        OwnerRef::Sensor(_) => "ch:sensor",
    }
}

fn owner_title(owner: OwnerRef) -> &'static str {
    match owner {
        OwnerRef::Site(_) => "Site",
        OwnerRef::Device(_) => "Device",
        OwnerRef::Sensor(_) => "Sensor",
    }
}

/// Exactly one of `site_id`, `device_id` or `sensor_id` names the owner.
fn owner_param(params: &Params) -> Result<OwnerRef> {
    let mut found = None;
    for name in OWNER_PARAMS {
        if let Some(id) = params.id(name)? {
            if found.is_some() {
                return Err(Error::query(name, "only one owner may be given"));
            }
            let kind = name.trim_end_matches("_id");
            found = OwnerRef::from_parts(kind, id);
        }
    }
    found.ok_or_else(|| Error::query("site_id", "one of site_id, device_id or sensor_id is required"))
}

async fn ensure_owner(state: &AppState, owner: OwnerRef) -> Result<()> {
    let exists = match owner {
        OwnerRef::Site(id) => state.entities.get_site(id).await?.is_some(),
        OwnerRef::Device(id) => state.entities.get_device(id).await?.is_some(),
        OwnerRef::Sensor(id) => state.entities.get_sensor(id).await?.is_some(),
    };
    if exists {
        Ok(())
    } else {
        Err(not_found(owner.kind(), owner.id()))
    }
}

pub fn document(ctx: &Ctx, record: &Metadata) -> Document {
    ctx.document(Link::new(ctx.urls.metadata_record(record.id)).titled(record.key.clone()))
        .link(
            owner_rel(record.owner),
            Link::new(ctx.urls.owner(record.owner)).titled(owner_title(record.owner)),
        )
        .property("key", record.key.clone())
        .property("value", record.value.clone())
        .property("timestamp", timestamp(record.timestamp))
}

/// The most recent value of every key for one owner.
pub async fn list(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let owner = owner_param(&params)?;
    ensure_owner(state, owner).await?;
    let records = state.entities.latest_metadata(owner).await?;

    let data: Vec<Value> = records
        .iter()
        .map(|m| {
            json!({
                "href": ctx.urls.metadata_record(m.id),
                "key": m.key,
                "value": m.value,
                "timestamp": timestamp(m.timestamp),
            })
        })
        .collect();
    let items = records
        .iter()
        .map(|m| Link::new(ctx.urls.metadata_record(m.id)).titled(m.key.clone()))
        .collect();

    let this = href(
        &ctx.urls.metadata(),
        &[(
            match owner {
                OwnerRef::Site(_) => "site_id",
                OwnerRef::Device(_) => "device_id",
                OwnerRef::Sensor(_) => "sensor_id",
            },
            owner.id().to_string(),
        )],
    );
    let doc = ctx
        .document(Link::new(this).titled("Metadata"))
        .link(
            owner_rel(owner),
            Link::new(ctx.urls.owner(owner)).titled(owner_title(owner)),
        )
        .link(
            "createForm",
            Link::new(ctx.urls.metadata_create(owner)).titled("Create Metadata"),
        )
        .link_list("items", items)
        .property("totalCount", data.len())
        .property("data", Value::Array(data));
    ctx.reply(StatusCode::OK, &doc)
}

pub async fn get(state: &AppState, ctx: &Ctx, raw_id: &str) -> Result<Response> {
    let id = parse_id(raw_id, "metadata")?;
    let record = state
        .entities
        .get_metadata(id)
        .await?
        .ok_or_else(|| not_found("metadata", id))?;
    ctx.reply(StatusCode::OK, &document(ctx, &record))
}

pub async fn create_form(state: &AppState, ctx: &Ctx, params: Params) -> Result<Response> {
    let owner = owner_param(&params)?;
    ensure_owner(state, owner).await?;
    let form = ctx.form(ctx.urls.metadata_create(owner), EntityKind::Metadata, None);
    ctx.reply(StatusCode::OK, &form)
}

/// Accepts one record or a list. Values are stored as text whatever JSON
/// type they arrive as; a missing timestamp means now.
pub async fn create(state: &AppState, ctx: &Ctx, params: Params, body: &[u8]) -> Result<Response> {
    let owner = owner_param(&params)?;
    let value = parse_body(body)?;
    ensure_owner(state, owner).await?;

    let (items, was_list) = one_or_many(value);
    let now = Utc::now();
    let records = items
        .iter()
        .map(|item| {
            let fields = Fields::new(item)?;
            Ok(NewMetadata {
                owner,
                key: fields.required_string("key")?,
                value: fields
                    .string("value")?
                    .ok_or_else(|| Error::validation("value", "is required"))?,
                timestamp: fields
                    .timestamp("timestamp", state.settings.time_zone)?
                    .unwrap_or(now),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut docs = Vec::with_capacity(records.len());
    for record in records {
        let created = state.entities.create_metadata(record).await?;
        docs.push(document(ctx, &created));
    }
    ctx.reply_created(docs, was_list)
}

/// Any update attempt on a metadata record, whatever the method or body.
pub async fn edit() -> Error {
    Error::ImmutableResourceEdit
}
