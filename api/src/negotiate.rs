//! Content negotiation over the closed set of representations we render.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Hal,
    Json,
    Html,
}

impl MediaType {
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Hal => "application/hal+json",
            MediaType::Json => "application/json",
            MediaType::Html => "text/html",
        }
    }

    fn from_media_range(range: &str) -> Option<Self> {
        match range {
            "application/hal+json" => Some(MediaType::Hal),
            "application/json" => Some(MediaType::Json),
            "text/html" => Some(MediaType::Html),
            // A wildcard means the client takes whatever we prefer, which is HAL.
            "*/*" | "application/*" => Some(MediaType::Hal),
            "text/*" => Some(MediaType::Html),
            _ => None,
        }
    }
}

/// Picks the representation for a request. No Accept header means plain JSON.
pub fn negotiate(accept: Option<&str>) -> Result<MediaType> {
    let accept = match accept.map(str::trim) {
        None | Some("") => return Ok(MediaType::Json),
        Some(accept) => accept,
    };

    parse_accept_header(accept)
        .into_iter()
        .find_map(|(range, _)| MediaType::from_media_range(&range))
        .ok_or_else(|| Error::UnsupportedMediaType(accept.to_string()))
}

pub fn negotiate_headers(headers: &HeaderMap) -> Result<MediaType> {
    let accept = headers
        .get(header::ACCEPT)
        .map(|v| v.to_str().unwrap_or_default());
    negotiate(accept)
}

/// Parse Accept header into (media range, quality) pairs, most preferred first.
/// Ranges with `q=0` are dropped; ties keep their header order.
fn parse_accept_header(accept: &str) -> Vec<(String, f32)> {
    let mut types: Vec<(String, f32)> = accept
        .split(',')
        .filter_map(|part| {
            let mut segments = part.trim().split(';');
            let range = segments.next()?.trim().to_ascii_lowercase();
            if range.is_empty() {
                return None;
            }
            let quality = segments
                .find_map(|seg| seg.trim().strip_prefix("q=")?.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then_some((range, quality))
        })
        .collect();

    types.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    types
}

/// Builds a resource response. Every resource varies on Accept; only
/// designated derived resources pass a `max_age`, everything else carries no
/// Cache-Control header at all.
pub fn respond(
    status: StatusCode,
    media: MediaType,
    body: Vec<u8>,
    max_age: Option<u32>,
) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media.content_type()),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    if let Some(max_age) = max_age {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", max_age)) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSER_TAIL: &str =
        "application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

    #[test]
    fn test_missing_accept_defaults_to_json() {
        assert_eq!(negotiate(None).unwrap(), MediaType::Json);
        assert_eq!(negotiate(Some("  ")).unwrap(), MediaType::Json);
    }

    #[test]
    fn test_exact_types() {
        assert_eq!(
            negotiate(Some("application/hal+json")).unwrap(),
            MediaType::Hal
        );
        assert_eq!(negotiate(Some("application/json")).unwrap(), MediaType::Json);
        assert_eq!(negotiate(Some("text/html")).unwrap(), MediaType::Html);
    }

    #[test]
    fn test_preferred_type_before_browser_tail() {
        let accept = format!("text/html,{}", BROWSER_TAIL);
        assert_eq!(negotiate(Some(&accept)).unwrap(), MediaType::Html);
        let accept = format!("application/json,{}", BROWSER_TAIL);
        assert_eq!(negotiate(Some(&accept)).unwrap(), MediaType::Json);
    }

    #[test]
    fn test_quality_ordering() {
        let accept = "text/html;q=0.5, application/json;q=0.9";
        assert_eq!(negotiate(Some(accept)).unwrap(), MediaType::Json);
    }

    #[test]
    fn test_zero_quality_is_not_acceptable() {
        let result = negotiate(Some("application/json;q=0"));
        assert!(matches!(result, Err(Error::UnsupportedMediaType(_))));
    }

    #[test]
    fn test_unknown_type_without_wildcard_fails() {
        let result = negotiate(Some("foobar"));
        assert!(matches!(result, Err(Error::UnsupportedMediaType(_))));
    }

    #[test]
    fn test_wildcard_selects_hal() {
        assert_eq!(negotiate(Some("foobar, */*")).unwrap(), MediaType::Hal);
    }

    #[test]
    fn test_respond_headers() {
        let response = respond(StatusCode::OK, MediaType::Hal, b"{}".to_vec(), None);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/hal+json"
        );
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Accept");
        assert!(response.headers().get(header::CACHE_CONTROL).is_none());

        let response = respond(StatusCode::OK, MediaType::Json, Vec::new(), Some(60));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "max-age=60"
        );
    }
}
