//! Transport-independent hypermedia documents and their renderings.
//!
//! Controllers build a [`Document`] (links, embedded documents, plain
//! properties) and hand it to [`render`], which serialises it once for the
//! negotiated [`MediaType`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::negotiate::MediaType;

/// Prefix of the compact URIs naming our link relations (`ch:sites`, ...).
pub const CURIE_PREFIX: &str = "ch";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub templated: bool,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            title: None,
            name: None,
            templated: false,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the href as an RFC 6570 template (e.g. `...{&aggtime}`).
    pub fn templated(mut self) -> Self {
        self.templated = true;
        self
    }
}

/// A relation maps to one link or, for list-valued relations, an ordered list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Rel {
    One(Link),
    Many(Vec<Link>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    self_link: Link,
    links: Vec<(String, Rel)>,
    embedded: Vec<(String, Vec<Document>)>,
    properties: Map<String, Value>,
}

impl Document {
    pub fn new(self_link: Link) -> Self {
        Self {
            self_link,
            links: Vec::new(),
            embedded: Vec::new(),
            properties: Map::new(),
        }
    }

    fn set_rel(&mut self, rel: String, value: Rel) {
        match self.links.iter_mut().find(|(name, _)| *name == rel) {
            Some(slot) => slot.1 = value,
            None => self.links.push((rel, value)),
        }
    }

    pub fn link(mut self, rel: impl Into<String>, link: Link) -> Self {
        self.set_rel(rel.into(), Rel::One(link));
        self
    }

    pub fn link_list(mut self, rel: impl Into<String>, links: Vec<Link>) -> Self {
        self.set_rel(rel.into(), Rel::Many(links));
        self
    }

    /// Adds the `curies` relation declaring the `ch:` namespace.
    pub fn curies(self, docs_base: &str) -> Self {
        let curie = Link::new(format!("{}/rels/{{rel}}", docs_base.trim_end_matches('/')))
            .named(CURIE_PREFIX)
            .templated();
        self.link_list("curies", vec![curie])
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Like [`Document::property`], but leaves the key out entirely for `None`.
    pub fn property_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.property(key, value),
            None => self,
        }
    }

    /// Merges a whole property map, e.g. a form schema.
    pub fn properties(mut self, map: Map<String, Value>) -> Self {
        self.properties.extend(map);
        self
    }

    pub fn embed(mut self, rel: impl Into<String>, documents: Vec<Document>) -> Self {
        let rel = rel.into();
        match self.embedded.iter_mut().find(|(name, _)| *name == rel) {
            Some(slot) => slot.1 = documents,
            None => self.embedded.push((rel, documents)),
        }
        self
    }

    pub fn self_link(&self) -> &Link {
        &self.self_link
    }

    pub fn get_link(&self, rel: &str) -> Option<&Rel> {
        self.links
            .iter()
            .find(|(name, _)| name == rel)
            .map(|(_, rel)| rel)
    }

    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn embedded(&self, rel: &str) -> Option<&[Document]> {
        self.embedded
            .iter()
            .find(|(name, _)| name == rel)
            .map(|(_, docs)| docs.as_slice())
    }

    /// HAL+JSON: `_links`, optional `_embedded`, then the properties.
    pub fn to_hal(&self) -> Value {
        let mut out = Map::new();
        let mut links = Map::new();
        links.insert(
            "self".to_string(),
            serde_json::to_value(&self.self_link).unwrap_or(Value::Null),
        );
        for (rel, link) in &self.links {
            links.insert(rel.clone(), serde_json::to_value(link).unwrap_or(Value::Null));
        }
        out.insert("_links".to_string(), Value::Object(links));
        if !self.embedded.is_empty() {
            let embedded: Map<String, Value> = self
                .embedded
                .iter()
                .map(|(rel, docs)| {
                    (
                        rel.clone(),
                        Value::Array(docs.iter().map(Document::to_hal).collect()),
                    )
                })
                .collect();
            out.insert("_embedded".to_string(), Value::Object(embedded));
        }
        for (key, value) in &self.properties {
            out.insert(key.clone(), value.clone());
        }
        Value::Object(out)
    }

    /// Plain JSON: the properties, the resource's own `href`, and embedded
    /// documents flattened into arrays named after their relation.
    pub fn to_flat(&self) -> Value {
        let mut out = self.properties.clone();
        out.insert(
            "href".to_string(),
            Value::String(self.self_link().href.clone()),
        );
        for (rel, docs) in &self.embedded {
            out.insert(
                rel.clone(),
                Value::Array(docs.iter().map(Document::to_flat).collect()),
            );
        }
        Value::Object(out)
    }

    fn title(&self) -> String {
        let link = &self.self_link;
        link.title.clone().unwrap_or_else(|| link.href.clone())
    }
}

/// Serialises one document for the negotiated representation.
pub fn render(doc: &Document, media: MediaType) -> Result<Vec<u8>> {
    match media {
        MediaType::Hal => Ok(serde_json::to_vec(&doc.to_hal())?),
        MediaType::Json => Ok(serde_json::to_vec(&doc.to_flat())?),
        MediaType::Html => {
            let mut links = vec![("self".to_string(), Rel::One(doc.self_link.clone()))];
            links.extend(doc.links.iter().cloned());
            render_html(&doc.title(), &links, &doc.to_hal())
        }
    }
}

/// Serialises the response to a list-valued POST: a JSON array of documents.
pub fn render_many(docs: &[Document], media: MediaType) -> Result<Vec<u8>> {
    match media {
        MediaType::Hal => Ok(serde_json::to_vec(
            &docs.iter().map(Document::to_hal).collect::<Vec<_>>(),
        )?),
        MediaType::Json => Ok(serde_json::to_vec(
            &docs.iter().map(Document::to_flat).collect::<Vec<_>>(),
        )?),
        MediaType::Html => {
            let hal = Value::Array(docs.iter().map(Document::to_hal).collect());
            render_html(&format!("{} resources", docs.len()), &[], &hal)
        }
    }
}

fn render_html(title: &str, links: &[(String, Rel)], hal: &Value) -> Result<Vec<u8>> {
    let mut anchors = String::new();
    for (rel, value) in links {
        let list = match value {
            Rel::One(link) => std::slice::from_ref(link),
            Rel::Many(links) => links.as_slice(),
        };
        for link in list {
            let label = link.title.as_deref().unwrap_or(&link.href);
            anchors.push_str(&format!(
                "<li>{}: <a href=\"{}\">{}</a></li>\n",
                escape_html(rel),
                escape_html(&link.href),
                escape_html(label)
            ));
        }
    }
    let body = serde_json::to_string_pretty(hal)?;
    let page = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<ul>\n{anchors}</ul>\n<pre>{body}</pre>\n</body>\n</html>",
        title = escape_html(title),
        anchors = anchors,
        body = escape_html(&body),
    );
    Ok(page.into_bytes())
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
