use axum::http::StatusCode;
use axum::response::Response;

use super::Ctx;
use crate::errors::Result;
use crate::hal::Link;

pub fn get(ctx: &Ctx) -> Result<Response> {
    let doc = ctx
        .document(Link::new(ctx.urls.root()).titled("Chain API"))
        .link("ch:sites", Link::new(ctx.urls.sites()).titled("Sites"))
        .property("message", "Chain API root; follow ch:sites to navigate");
    ctx.reply(StatusCode::OK, &doc)
}
