//! Resource controllers: validate, mutate, publish, then build a document.
//!
//! Each controller function takes the shared [`AppState`] and a per-request
//! [`Ctx`] (negotiated representation plus absolute URL builder) and returns
//! a finished response or an [`Error`] that renders itself as `{message}`.

pub mod data;
pub mod devices;
pub mod metadata;
pub mod root;
pub mod sensors;
pub mod sites;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use axum::response::Response;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::errors::{Error, Result};
use crate::hal::{render, render_many, Document, Link};
use crate::model::{GeoLocation, Id, OwnerRef};
use crate::negotiate::{negotiate_headers, respond, MediaType};
use crate::pagination::{page_links, PageRequest};
use crate::rest::AppState;
use crate::schema::{schema_for, EntityKind};

/// Builds absolute URLs for one request's host.
#[derive(Debug, Clone)]
pub struct Urls {
    base: String,
    websocket_base: String,
}

impl Urls {
    pub fn new(host: &str, websocket_base: Option<&str>) -> Self {
        let websocket_base = match websocket_base {
            Some(ws) => format!("{}/", ws.trim_end_matches('/')),
            None => format!("ws://{}/ws/", host),
        };
        Self {
            base: format!("http://{}", host),
            websocket_base,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn root(&self) -> String {
        format!("{}/", self.base)
    }

    pub fn sites(&self) -> String {
        format!("{}/sites/", self.base)
    }

    pub fn site_create(&self) -> String {
        format!("{}/sites/create", self.base)
    }

    pub fn site(&self, id: Id) -> String {
        format!("{}/sites/{}", self.base, id)
    }

    pub fn site_edit(&self, id: Id) -> String {
        format!("{}/sites/{}/edit", self.base, id)
    }

    pub fn site_summary(&self, id: Id) -> String {
        format!("{}/sites/{}/summary", self.base, id)
    }

    pub fn websocket(&self, site: Id) -> String {
        format!("{}site-{}", self.websocket_base, site)
    }

    pub fn devices(&self) -> String {
        format!("{}/devices/", self.base)
    }

    pub fn devices_of(&self, site: Id) -> String {
        format!("{}/devices/?site={}", self.base, site)
    }

    pub fn device_create(&self, site: Id) -> String {
        format!("{}/devices/create?site={}", self.base, site)
    }

    pub fn device(&self, id: Id) -> String {
        format!("{}/devices/{}", self.base, id)
    }

    pub fn device_edit(&self, id: Id) -> String {
        format!("{}/devices/{}/edit", self.base, id)
    }

    pub fn sensors(&self) -> String {
        format!("{}/sensors/", self.base)
    }

    pub fn sensors_of(&self, device: Id) -> String {
        format!("{}/sensors/?device={}", self.base, device)
    }

    pub fn sensor_create(&self, device: Id) -> String {
        format!("{}/sensors/create?device={}", self.base, device)
    }

    pub fn sensor(&self, id: Id) -> String {
        format!("{}/sensors/{}", self.base, id)
    }

    pub fn sensor_edit(&self, id: Id) -> String {
        format!("{}/sensors/{}/edit", self.base, id)
    }

    pub fn scalar_data(&self) -> String {
        format!("{}/scalar_data/", self.base)
    }

    pub fn data_of(&self, sensor: Id) -> String {
        format!("{}/scalar_data/?sensor_id={}", self.base, sensor)
    }

    pub fn data_create(&self, sensor: Id) -> String {
        format!("{}/scalar_data/create?sensor_id={}", self.base, sensor)
    }

    pub fn aggregate_data(&self) -> String {
        format!("{}/aggregate_data/", self.base)
    }

    /// RFC 6570 template; clients expand `{&aggtime}`.
    pub fn aggregates_of(&self, sensor: Id) -> String {
        format!("{}/aggregate_data/?sensor_id={}{{&aggtime}}", self.base, sensor)
    }

    pub fn metadata(&self) -> String {
        format!("{}/metadata/", self.base)
    }

    pub fn metadata_of(&self, owner: OwnerRef) -> String {
        format!("{}/metadata/?{}_id={}", self.base, owner.kind(), owner.id())
    }

    pub fn metadata_create(&self, owner: OwnerRef) -> String {
        format!(
            "{}/metadata/create?{}_id={}",
            self.base,
            owner.kind(),
            owner.id()
        )
    }

    pub fn metadata_record(&self, id: Id) -> String {
        format!("{}/metadata/{}", self.base, id)
    }

    pub fn owner(&self, owner: OwnerRef) -> String {
        match owner {
            OwnerRef::Site(id) => self.site(id),
            OwnerRef::Device(id) => self.device(id),
            OwnerRef::Sensor(id) => self.sensor(id),
        }
    }
}

/// Per-request context: the negotiated representation and URL builder.
///
/// As an extractor it rejects an unacceptable Accept header before any other
/// work is done. [`LookupCtx`] defers that check until a reply is rendered.
#[derive(Debug, Clone)]
pub struct Ctx {
    media: Option<MediaType>,
    accept: String,
    pub urls: Urls,
}

impl Ctx {
    pub fn new(parts: &Parts, websocket_base: Option<&str>) -> Self {
        let accept = parts
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Self {
            media: negotiate_headers(&parts.headers).ok(),
            accept,
            urls: Urls::new(request_host(parts), websocket_base),
        }
    }

    /// The negotiated representation, or 406.
    pub fn media(&self) -> Result<MediaType> {
        self.media
            .ok_or_else(|| Error::UnsupportedMediaType(self.accept.clone()))
    }

    /// A new document with the `curies` declaration every resource carries.
    pub fn document(&self, self_link: Link) -> Document {
        Document::new(self_link).curies(self.urls.base())
    }

    pub fn reply(&self, status: StatusCode, doc: &Document) -> Result<Response> {
        let media = self.media()?;
        Ok(respond(status, media, render(doc, media)?, None))
    }

    pub fn reply_cached(&self, doc: &Document, max_age: u32) -> Result<Response> {
        let media = self.media()?;
        Ok(respond(
            StatusCode::OK,
            media,
            render(doc, media)?,
            Some(max_age),
        ))
    }

    /// 201 for a create that took either one object or a list of them.
    pub fn reply_created(&self, mut docs: Vec<Document>, was_list: bool) -> Result<Response> {
        if !was_list {
            if let Some(doc) = docs.pop() {
                return self.reply(StatusCode::CREATED, &doc);
            }
        }
        let media = self.media()?;
        Ok(respond(
            StatusCode::CREATED,
            media,
            render_many(&docs, media)?,
            None,
        ))
    }

    /// A create or edit form: the schema itself, addressed by the form URL.
    pub fn form(&self, href: String, kind: EntityKind, instance: Option<&Value>) -> Document {
        Document::new(Link::new(href)).properties(schema_for(kind, instance))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Ctx {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let ctx = Ctx::new(parts, state.settings.websocket_base.as_deref());
        ctx.media()?;
        Ok(ctx)
    }
}

/// Context for reads of one addressed resource, where an unknown id is
/// reported as 404 whatever the Accept header says.
#[derive(Debug, Clone)]
pub struct LookupCtx(pub Ctx);

#[async_trait]
impl FromRequestParts<AppState> for LookupCtx {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        Ok(LookupCtx(Ctx::new(
            parts,
            state.settings.websocket_base.as_deref(),
        )))
    }
}

/// The Host header, or the URI authority for HTTP/2 requests that carry
/// `:authority` instead.
fn request_host(parts: &Parts) -> &str {
    parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost")
}

/// Parses a path id; anything that is not an id names no resource.
pub fn parse_id(raw: &str, what: &str) -> Result<Id> {
    raw.trim()
        .parse::<Id>()
        .map_err(|_| Error::UnknownResource(format!("{} '{}'", what, raw)))
}

pub fn not_found(what: &str, id: Id) -> Error {
    Error::UnknownResource(format!("{} {}", what, id))
}

pub fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn geo_value(geo: &GeoLocation) -> Value {
    let mut value = json!({
        "latitude": geo.latitude,
        "longitude": geo.longitude,
    });
    if let Some(elevation) = geo.elevation {
        value["elevation"] = json!(elevation);
    }
    value
}

/// A paginated collection: item links, embedded items, `totalCount` and
/// `next`/`previous` links built from exactly the parameters used.
pub struct Collection<'a> {
    pub path: String,
    pub filters: Vec<(&'a str, String)>,
    pub request: PageRequest,
    pub page_size: usize,
}

impl Collection<'_> {
    pub fn document(
        &self,
        ctx: &Ctx,
        title: &str,
        items: Vec<Document>,
        total: usize,
    ) -> Document {
        let links = page_links(
            &self.path,
            &self.filters,
            self.request,
            self.page_size,
            total,
        );
        let item_links = items.iter().map(|doc| doc.self_link().clone()).collect();

        let mut doc = ctx
            .document(Link::new(links.this).titled(title))
            .link_list("items", item_links)
            .property("totalCount", total);
        if let Some(next) = links.next {
            doc = doc.link("next", Link::new(next).titled("Next Page"));
        }
        if let Some(previous) = links.previous {
            doc = doc.link("previous", Link::new(previous).titled("Previous Page"));
        }
        doc.embed("items", items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_urls_use_request_host() {
        let urls = Urls::new("example.com:8080", None);
        assert_eq!(urls.site(3), "http://example.com:8080/sites/3");
        assert_eq!(urls.websocket(3), "ws://example.com:8080/ws/site-3");
        assert_eq!(
            urls.aggregates_of(5),
            "http://example.com:8080/aggregate_data/?sensor_id=5{&aggtime}"
        );
        assert_eq!(
            urls.metadata_of(OwnerRef::Device(2)),
            "http://example.com:8080/metadata/?device_id=2"
        );
    }

    #[test]
    fn test_websocket_base_override() {
        let urls = Urls::new("h", Some("ws://stream.example.com/live"));
        assert_eq!(urls.websocket(1), "ws://stream.example.com/live/site-1");
    }

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_ctx_defers_unacceptable_media() {
        let ctx = Ctx::new(
            &parts(Request::get("/").header(header::ACCEPT, "foobar").body(()).unwrap()),
            None,
        );
        assert!(matches!(ctx.media(), Err(Error::UnsupportedMediaType(_))));

        let ctx = Ctx::new(
            &parts(
                Request::get("/")
                    .header(header::ACCEPT, "foobar, */*")
                    .header(header::HOST, "localhost")
                    .body(())
                    .unwrap(),
            ),
            None,
        );
        assert_eq!(ctx.media().unwrap(), MediaType::Hal);
        assert_eq!(ctx.urls.root(), "http://localhost/");
    }

    #[test]
    fn test_host_falls_back_to_authority() {
        let ctx = Ctx::new(
            &parts(Request::get("https://chain.example.org:8443/sites/").body(()).unwrap()),
            None,
        );
        assert_eq!(ctx.urls.sites(), "http://chain.example.org:8443/sites/");

        let ctx = Ctx::new(&parts(Request::get("/").body(()).unwrap()), None);
        assert_eq!(ctx.urls.root(), "http://localhost/");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("12", "site").unwrap(), 12);
        assert!(matches!(
            parse_id("4NONEXISTANT_RESOURCE", "device"),
            Err(Error::UnknownResource(_))
        ));
    }
}
