//! Field descriptors.

use crate::{
    analysis::Analyzer,
    error::{OdmError, Result},
    schema::Schema,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Date format used for calendar-date fields.
pub const CALENDAR_DATE_FORMAT: &str = "yyyy-MM-dd";

/// Field kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Full-text searchable field.
    Text,
    /// Exact match keyword field.
    Keyword,
    /// Date.
    Date,
    /// Boolean.
    Boolean,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// 16-bit integer.
    Short,
    /// 8-bit integer.
    Byte,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Base64 encoded binary data.
    Binary,
    /// Inner object.
    Object,
    /// Nested object, indexed as a separate hidden document.
    Nested,
    /// Completion suggester.
    Completion,
    /// Integer range.
    IntegerRange,
    /// Float range.
    FloatRange,
    /// Long range.
    LongRange,
    /// Double range.
    DoubleRange,
    /// Date range.
    DateRange,
    /// IP address.
    Ip,
    /// Geo point.
    GeoPoint,
    /// Token count.
    TokenCount,
    /// Search-as-you-type.
    SearchAsYouType,
}

impl FieldKind {
    /// Engine type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Keyword => "keyword",
            FieldKind::Date => "date",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Long => "long",
            FieldKind::Short => "short",
            FieldKind::Byte => "byte",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::Binary => "binary",
            FieldKind::Object => "object",
            FieldKind::Nested => "nested",
            FieldKind::Completion => "completion",
            FieldKind::IntegerRange => "integer_range",
            FieldKind::FloatRange => "float_range",
            FieldKind::LongRange => "long_range",
            FieldKind::DoubleRange => "double_range",
            FieldKind::DateRange => "date_range",
            FieldKind::Ip => "ip",
            FieldKind::GeoPoint => "geo_point",
            FieldKind::TokenCount => "token_count",
            FieldKind::SearchAsYouType => "search_as_you_type",
        }
    }

    /// Whether the kind holds a sub-schema.
    pub fn is_object(&self) -> bool {
        matches!(self, FieldKind::Object | FieldKind::Nested)
    }

    fn range_bound(&self) -> Option<FieldKind> {
        match self {
            FieldKind::IntegerRange => Some(FieldKind::Integer),
            FieldKind::FloatRange => Some(FieldKind::Float),
            FieldKind::LongRange => Some(FieldKind::Long),
            FieldKind::DoubleRange => Some(FieldKind::Double),
            FieldKind::DateRange => Some(FieldKind::Date),
            _ => None,
        }
    }

    // Kinds whose single value may itself be a JSON array.
    fn accepts_array_value(&self) -> bool {
        matches!(self, FieldKind::GeoPoint | FieldKind::Completion)
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor for one schema attribute.
#[derive(Debug, Clone)]
pub struct Field {
    /// Field kind.
    pub kind: FieldKind,
    /// Whether a non-empty value is required before saving.
    pub required: bool,
    /// Whether the field holds zero or more values.
    pub multi: bool,
    /// Sub-schema for object and nested fields.
    pub schema: Option<Arc<Schema>>,
    /// Index-time analyzer.
    pub analyzer: Option<Analyzer>,
    /// Search-time analyzer.
    pub search_analyzer: Option<Analyzer>,
    /// Date format.
    pub format: Option<String>,
    /// Whether to index the field.
    pub index: Option<bool>,
    /// Whether to store the field.
    pub store: Option<bool>,
    /// Null value.
    pub null_value: Option<Value>,
    /// Multi-fields indexed from the same source value.
    pub fields: Vec<(String, Field)>,
    /// Extra mapping parameters passed through verbatim.
    pub params: Map<String, Value>,
}

impl Field {
    /// Create a field of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            multi: false,
            schema: None,
            analyzer: None,
            search_analyzer: None,
            format: None,
            index: None,
            store: None,
            null_value: None,
            fields: Vec::new(),
            params: Map::new(),
        }
    }

    /// Create a new text field.
    pub fn text() -> Self {
        Self::new(FieldKind::Text)
    }

    /// Create a new keyword field.
    pub fn keyword() -> Self {
        Self::new(FieldKind::Keyword)
    }

    /// Create a new date field.
    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    /// Create a date field restricted to calendar dates.
    pub fn calendar_date() -> Self {
        Self::date().format(CALENDAR_DATE_FORMAT)
    }

    /// Create a new boolean field.
    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    /// Create a new integer field.
    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    /// Create a new long field.
    pub fn long() -> Self {
        Self::new(FieldKind::Long)
    }

    /// Create a new float field.
    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    /// Create a new double field.
    pub fn double() -> Self {
        Self::new(FieldKind::Double)
    }

    /// Create a new binary field.
    pub fn binary() -> Self {
        Self::new(FieldKind::Binary)
    }

    /// Create a new completion field.
    pub fn completion() -> Self {
        Self::new(FieldKind::Completion)
    }

    /// Create an object field backed by `schema`.
    pub fn object(schema: Arc<Schema>) -> Self {
        Self {
            schema: Some(schema),
            ..Self::new(FieldKind::Object)
        }
    }

    /// Create a nested field backed by `schema`. Nested fields are multi-valued.
    pub fn nested(schema: Arc<Schema>) -> Self {
        Self {
            schema: Some(schema),
            multi: true,
            ..Self::new(FieldKind::Nested)
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the field as multi-valued.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    /// Set analyzer.
    pub fn analyzer(mut self, analyzer: impl Into<Analyzer>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    /// Set search analyzer.
    pub fn search_analyzer(mut self, analyzer: impl Into<Analyzer>) -> Self {
        self.search_analyzer = Some(analyzer.into());
        self
    }

    /// Set date format.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set whether the field is indexed.
    pub fn indexed(mut self, index: bool) -> Self {
        self.index = Some(index);
        self
    }

    /// Set whether the field is stored.
    pub fn stored(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the value indexed in place of explicit nulls.
    pub fn null_value(mut self, value: Value) -> Self {
        self.null_value = Some(value);
        self
    }

    /// Add a multi-field, e.g. a `raw` keyword under a text field.
    pub fn sub_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Add a raw mapping parameter.
    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Look up a multi-field by name.
    pub fn sub(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub(crate) fn check(&self, name: &str) -> Result<()> {
        if self.kind.is_object() && self.schema.is_none() {
            return Err(OdmError::schema(format!(
                "field '{}' of kind {} needs a nested schema",
                name, self.kind
            )));
        }
        if !self.kind.is_object() && self.schema.is_some() {
            return Err(OdmError::schema(format!(
                "field '{}' of kind {} cannot hold a nested schema",
                name, self.kind
            )));
        }
        for (sub_name, sub) in &self.fields {
            sub.check(&format!("{}.{}", name, sub_name))?;
        }
        Ok(())
    }

    /// Render the mapping entry for this field.
    pub fn to_wire(&self) -> Value {
        let mut field = Map::new();

        field.insert("type".to_string(), json!(self.kind.as_str()));

        if let Some(analyzer) = &self.analyzer {
            field.insert("analyzer".to_string(), json!(analyzer.name()));
        }
        if let Some(search_analyzer) = &self.search_analyzer {
            field.insert("search_analyzer".to_string(), json!(search_analyzer.name()));
        }
        if let Some(format) = &self.format {
            field.insert("format".to_string(), json!(format));
        }
        if let Some(index) = self.index {
            field.insert("index".to_string(), json!(index));
        }
        if let Some(store) = self.store {
            field.insert("store".to_string(), json!(store));
        }
        if let Some(null_value) = &self.null_value {
            field.insert("null_value".to_string(), null_value.clone());
        }
        for (key, value) in &self.params {
            field.insert(key.clone(), value.clone());
        }
        if !self.fields.is_empty() {
            let mut subs = Map::new();
            for (name, sub) in &self.fields {
                subs.insert(name.clone(), sub.to_wire());
            }
            field.insert("fields".to_string(), Value::Object(subs));
        }
        if let Some(schema) = &self.schema
            && let Value::Object(spec) = schema.to_wire_spec()
        {
            field.extend(spec);
        }

        Value::Object(field)
    }

    /// Check a value against kind and multiplicity. `null` always passes.
    pub fn validate(&self, name: &str, value: &Value) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Array(items) if self.multi => {
                for item in items {
                    if item.is_null() {
                        return Err(OdmError::validation(name, "null inside a multi-valued field"));
                    }
                    self.validate_single(name, item)?;
                }
                Ok(())
            }
            Value::Array(_) if !self.kind.accepts_array_value() => Err(OdmError::validation(
                name,
                "field is not multi-valued but got a list",
            )),
            single => self.validate_single(name, single),
        }
    }

    /// Whether the value counts as empty for required checks.
    pub(crate) fn is_empty_value(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => self.kind.is_object() && map.is_empty(),
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    fn validate_single(&self, name: &str, value: &Value) -> Result<()> {
        let ok = match self.kind {
            FieldKind::Text | FieldKind::Keyword | FieldKind::SearchAsYouType => value.is_string(),
            FieldKind::Ip => value
                .as_str()
                .map(|s| s.parse::<std::net::IpAddr>().is_ok())
                .unwrap_or(false),
            FieldKind::Date => is_date(value, self.format.as_deref()),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Integer | FieldKind::TokenCount => in_range(value, i32::MIN as i64, i32::MAX as i64),
            FieldKind::Short => in_range(value, i16::MIN as i64, i16::MAX as i64),
            FieldKind::Byte => in_range(value, i8::MIN as i64, i8::MAX as i64),
            FieldKind::Long => value.is_i64(),
            FieldKind::Float | FieldKind::Double => value.is_number(),
            FieldKind::Binary => value
                .as_str()
                .map(|s| base64::engine::general_purpose::STANDARD.decode(s).is_ok())
                .unwrap_or(false),
            FieldKind::Object | FieldKind::Nested => {
                let Value::Object(map) = value else {
                    return Err(OdmError::validation(name, "expected an object"));
                };
                return match &self.schema {
                    Some(schema) => schema.validate_object(name, map),
                    None => Ok(()),
                };
            }
            FieldKind::Completion => match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                Value::Object(map) => map.contains_key("input"),
                _ => false,
            },
            FieldKind::IntegerRange
            | FieldKind::FloatRange
            | FieldKind::LongRange
            | FieldKind::DoubleRange
            | FieldKind::DateRange => return self.validate_range(name, value),
            FieldKind::GeoPoint => match value {
                Value::String(_) => true,
                Value::Array(items) => items.len() == 2 && items.iter().all(Value::is_number),
                Value::Object(map) => {
                    map.get("lat").is_some_and(Value::is_number)
                        && map.get("lon").is_some_and(Value::is_number)
                }
                _ => false,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(OdmError::validation(
                name,
                format!("{} is not a valid {} value", value, self.kind),
            ))
        }
    }

    fn validate_range(&self, name: &str, value: &Value) -> Result<()> {
        let Value::Object(bounds) = value else {
            return Err(OdmError::validation(name, "range must be an object"));
        };
        if bounds.is_empty() {
            return Err(OdmError::validation(name, "range needs at least one bound"));
        }
        let bound_field = Field {
            format: self.format.clone(),
            ..Field::new(self.kind.range_bound().unwrap_or(FieldKind::Double))
        };
        for (key, bound) in bounds {
            if !matches!(key.as_str(), "gt" | "gte" | "lt" | "lte") {
                return Err(OdmError::validation(name, format!("unknown range bound '{}'", key)));
            }
            bound_field.validate_single(name, bound)?;
        }
        Ok(())
    }
}

fn in_range(value: &Value, min: i64, max: i64) -> bool {
    value.as_i64().is_some_and(|n| n >= min && n <= max)
}

fn is_date(value: &Value, format: Option<&str>) -> bool {
    match (value, format) {
        (Value::String(s), Some(CALENDAR_DATE_FORMAT)) => {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        }
        // Custom engine formats are not interpreted locally.
        (Value::String(_), Some(_)) => true,
        (Value::String(s), None) => {
            chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        }
        (Value::Number(n), _) => n.is_i64(),
        _ => false,
    }
}
