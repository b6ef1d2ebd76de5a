//! Collection filtering and windowing.
//!
//! Filters are applied first, then the filtered collection is cut into
//! `offset`/`limit` windows. Links are rebuilt from exactly the parameters a
//! request used so that a collection's self link round-trips.

use crate::errors::{Error, Result};
use crate::model::Id;

/// Query-string pairs in the order the client sent them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parses an id-valued filter such as `?site=3`.
    pub fn id(&self, name: &str) -> Result<Option<Id>> {
        self.get(name)
            .map(|raw| {
                raw.trim()
                    .parse::<Id>()
                    .map_err(|_| Error::query(name, format!("'{}' is not an id", raw)))
            })
            .transpose()
    }

    fn count(&self, name: &str) -> Result<Option<usize>> {
        self.get(name)
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::query(name, format!("'{}' is not a count", raw)))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn from_params(params: &Params) -> Result<Self> {
        let limit = params.count("limit")?;
        if limit == Some(0) {
            return Err(Error::query("limit", "must be at least 1"));
        }
        Ok(Self {
            offset: params.count("offset")?,
            limit,
        })
    }

    /// The window to cut; `default_size` only applies without an explicit limit.
    pub fn window(&self, default_size: usize) -> Window {
        Window {
            offset: self.offset.unwrap_or(0),
            size: self.limit.unwrap_or(default_size),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub size: usize,
}

/// One window of a filtered collection plus the collection's full size.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Cuts an already filtered, ordered collection down to one window.
pub fn paginate<T>(items: Vec<T>, window: Window) -> Page<T> {
    let total = items.len();
    let items = items
        .into_iter()
        .skip(window.offset)
        .take(window.size)
        .collect();
    Page { items, total }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLinks {
    pub this: String,
    pub next: Option<String>,
    pub previous: Option<String>,
}

/// Builds `path?filters...` with the pairs percent-encoded in order.
pub fn href(path: &str, pairs: &[(&str, String)]) -> String {
    if pairs.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
    format!("{}?{}", path, query.join("&"))
}

/// Self/next/previous links for one page of a filtered collection.
pub fn page_links(
    path: &str,
    filters: &[(&str, String)],
    request: PageRequest,
    default_size: usize,
    total: usize,
) -> PageLinks {
    let window = request.window(default_size);
    let with_window = |offset: Option<usize>, limit: Option<usize>| {
        let mut pairs = filters.to_vec();
        if let Some(offset) = offset {
            pairs.push(("offset", offset.to_string()));
        }
        if let Some(limit) = limit {
            pairs.push(("limit", limit.to_string()));
        }
        href(path, &pairs)
    };

    let end = window.offset.saturating_add(window.size);
    let next = (end < total).then(|| with_window(Some(end), request.limit));
    // The previous page ends where this one starts, even when the offset is
    // not a multiple of the page size.
    let previous = (window.offset > 0).then(|| {
        let limit = if window.offset < window.size {
            Some(window.offset)
        } else {
            request.limit
        };
        with_window(Some(window.offset - limit.unwrap_or(window.size)), limit)
    });

    PageLinks {
        this: with_window(request.offset, request.limit),
        next,
        previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn params(pairs: &[(&str, &str)]) -> Params {
        Params::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_page_request_parsing() {
        let request = PageRequest::from_params(&params(&[("limit", "20")])).unwrap();
        assert_eq!(request.window(30), Window { offset: 0, size: 20 });

        let request = PageRequest::from_params(&params(&[])).unwrap();
        assert_eq!(request.window(30), Window { offset: 0, size: 30 });

        assert!(PageRequest::from_params(&params(&[("limit", "0")])).is_err());
        assert!(PageRequest::from_params(&params(&[("offset", "-1")])).is_err());
    }

    #[test]
    fn test_explicit_limit_is_not_capped() {
        let items: Vec<usize> = (0..1500).collect();
        let request = PageRequest::from_params(&params(&[("limit", "1000")])).unwrap();
        let page = paginate(items, request.window(30));
        assert_eq!(page.items.len(), 1000);
        assert_eq!(page.total, 1500);
    }

    #[test]
    fn test_self_link_reproduces_parameters() {
        let request = PageRequest::from_params(&params(&[("site", "3"), ("limit", "20")])).unwrap();
        let links = page_links("http://h/devices/", &[("site", "3".to_string())], request, 30, 5);
        assert_eq!(links.this, "http://h/devices/?site=3&limit=20");
        assert_eq!(links.next, None);
        assert_eq!(links.previous, None);
    }

    #[test]
    fn test_previous_page_stops_at_current_offset() {
        let request =
            PageRequest::from_params(&params(&[("offset", "5"), ("limit", "3")])).unwrap();
        let links = page_links("/sites/", &[], request, 30, 10);
        assert_eq!(links.previous.as_deref(), Some("/sites/?offset=2&limit=3"));
        assert_eq!(links.next.as_deref(), Some("/sites/?offset=8&limit=3"));

        let request =
            PageRequest::from_params(&params(&[("offset", "2"), ("limit", "3")])).unwrap();
        let links = page_links("/sites/", &[], request, 30, 10);
        assert_eq!(links.previous.as_deref(), Some("/sites/?offset=0&limit=2"));

        let request = PageRequest::from_params(&params(&[("offset", "4")])).unwrap();
        let links = page_links("/sites/", &[], request, 30, 10);
        assert_eq!(links.previous.as_deref(), Some("/sites/?offset=0&limit=4"));
    }

    #[test]
    fn test_filter_values_are_encoded() {
        assert_eq!(
            href("/d/", &[("timestamp__gte", "2013-01-01T00:00:00+00:00".to_string())]),
            "/d/?timestamp__gte=2013-01-01T00%3A00%3A00%2B00%3A00"
        );
    }

    #[test]
    fn test_pages_partition_collection() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let total: usize = rng.gen_range(0..200);
            let size: usize = rng.gen_range(1..40);
            let items: Vec<usize> = (0..total).collect();

            let mut seen = Vec::new();
            let mut offset = None;
            let mut first = true;
            loop {
                let request = PageRequest {
                    offset,
                    limit: Some(size),
                };
                let page = paginate(items.clone(), request.window(size));
                assert_eq!(page.total, total);
                let links = page_links("/x/", &[], request, size, total);
                if first {
                    assert!(links.previous.is_none());
                    first = false;
                } else {
                    assert!(links.previous.is_some());
                }
                seen.extend(page.items);
                match links.next {
                    Some(next) => {
                        let next_offset = next
                            .split("offset=")
                            .nth(1)
                            .and_then(|s| s.split('&').next())
                            .unwrap()
                            .parse()
                            .unwrap();
                        offset = Some(next_offset);
                    }
                    None => break,
                }
            }
            assert_eq!(seen, items);
        }
    }
}
