//! JSON-schema form descriptions behind `createForm` and `editForm` links.
//!
//! Both forms share one field table per entity kind. The create form is
//! stateless; the edit form is the same shape with every field's `default`
//! filled from the current instance, recursing into nested objects.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Site,
    Device,
    Sensor,
    ScalarData,
    Metadata,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Site => "Site",
            EntityKind::Device => "Device",
            EntityKind::Sensor => "Sensor",
            EntityKind::ScalarData => "Data",
            EntityKind::Metadata => "Metadata",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Edit,
}

#[derive(Debug, Clone, Copy)]
enum FieldType {
    Text {
        min_length: bool,
        format: Option<&'static str>,
        choices: &'static [&'static str],
    },
    Number,
    Boolean,
    Object {
        fields: &'static [FieldDef],
        required: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Copy)]
struct FieldDef {
    name: &'static str,
    ty: FieldType,
    create_only: bool,
}

impl FieldDef {
    const fn text(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Text {
                min_length: false,
                format: None,
                choices: &[],
            },
            create_only: false,
        }
    }

    const fn non_empty(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Text {
                min_length: true,
                format: None,
                choices: &[],
            },
            create_only: false,
        }
    }

    const fn formatted(name: &'static str, format: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Text {
                min_length: false,
                format: Some(format),
                choices: &[],
            },
            create_only: false,
        }
    }

    const fn number(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Number,
            create_only: false,
        }
    }

    const fn boolean(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Boolean,
            create_only: false,
        }
    }
}

const GEO_LOCATION: FieldDef = FieldDef {
    name: "geoLocation",
    ty: FieldType::Object {
        fields: &[
            FieldDef::number("latitude"),
            FieldDef::number("longitude"),
            FieldDef::number("elevation"),
        ],
        required: &["latitude", "longitude"],
    },
    create_only: false,
};

const SENSOR_TYPE: FieldDef = FieldDef {
    name: "sensor-type",
    ty: FieldType::Text {
        min_length: false,
        format: None,
        choices: &["scalar", "presence"],
    },
    create_only: true,
};

const SITE_FIELDS: &[FieldDef] = &[
    FieldDef::non_empty("name"),
    FieldDef::formatted("rawZmqStream", "uri"),
    GEO_LOCATION,
];

const DEVICE_FIELDS: &[FieldDef] = &[
    FieldDef::non_empty("name"),
    FieldDef::text("description"),
    FieldDef::text("building"),
    FieldDef::text("floor"),
    FieldDef::text("room"),
    FieldDef::boolean("active"),
    GEO_LOCATION,
];

const SENSOR_FIELDS: &[FieldDef] = &[
    SENSOR_TYPE,
    FieldDef::non_empty("metric"),
    FieldDef::non_empty("unit"),
    FieldDef::boolean("active"),
];

const DATA_FIELDS: &[FieldDef] = &[
    FieldDef::number("value"),
    FieldDef::formatted("timestamp", "date-time"),
];

const METADATA_FIELDS: &[FieldDef] = &[
    FieldDef::non_empty("key"),
    FieldDef::text("value"),
    FieldDef::formatted("timestamp", "date-time"),
];

fn table(kind: EntityKind) -> (&'static [FieldDef], &'static [&'static str]) {
    match kind {
        EntityKind::Site => (SITE_FIELDS, &["name"]),
        EntityKind::Device => (DEVICE_FIELDS, &["name"]),
        EntityKind::Sensor => (SENSOR_FIELDS, &["metric", "unit"]),
        EntityKind::ScalarData => (DATA_FIELDS, &["value"]),
        EntityKind::Metadata => (METADATA_FIELDS, &["key", "value"]),
    }
}

/// Schema for `kind`. With no instance this is the create form; with one, the
/// edit form whose defaults are taken from the instance's representation.
pub fn schema_for(kind: EntityKind, instance: Option<&Value>) -> Map<String, Value> {
    let (fields, required) = table(kind);
    let mode = if instance.is_some() {
        Mode::Edit
    } else {
        Mode::Create
    };
    object_schema(None, fields, required, mode, instance)
}

fn object_schema(
    title: Option<&str>,
    fields: &[FieldDef],
    required: &[&str],
    mode: Mode,
    instance: Option<&Value>,
) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    if let Some(title) = title {
        schema.insert("title".to_string(), json!(title));
    }

    let mut properties = Map::new();
    for field in fields {
        if field.create_only && mode == Mode::Edit {
            continue;
        }
        let current = instance
            .and_then(|i| i.get(field.name))
            .filter(|v| !v.is_null());
        properties.insert(field.name.to_string(), field_schema(field, mode, current));
    }
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("required".to_string(), json!(required));
    schema
}

fn field_schema(field: &FieldDef, mode: Mode, current: Option<&Value>) -> Value {
    let mut out = match field.ty {
        FieldType::Object { fields, required } => {
            // Nested objects are always described; only their leaves get defaults.
            let nested = match mode {
                Mode::Edit => Some(current.unwrap_or(&Value::Null)),
                Mode::Create => None,
            };
            return Value::Object(object_schema(
                Some(field.name),
                fields,
                required,
                mode,
                nested,
            ));
        }
        FieldType::Text {
            min_length,
            format,
            choices,
        } => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("string"));
            out.insert("title".to_string(), json!(field.name));
            if min_length {
                out.insert("minLength".to_string(), json!(1));
            }
            if let Some(format) = format {
                out.insert("format".to_string(), json!(format));
            }
            if !choices.is_empty() {
                out.insert("enum".to_string(), json!(choices));
            }
            out
        }
        FieldType::Number => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("number"));
            out.insert("title".to_string(), json!(field.name));
            out
        }
        FieldType::Boolean => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("boolean"));
            out.insert("title".to_string(), json!(field.name));
            out
        }
    };
    if mode == Mode::Edit {
        if let Some(current) = current {
            out.insert("default".to_string(), current.clone());
        }
    }
    Value::Object(out)
}
