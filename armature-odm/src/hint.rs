//! Field inference from static type annotations.
//!
//! A [`TypeHint`] describes the declared type of an attribute. [`translate`]
//! turns it into a [`Field`] using a fixed table:
//!
//! | hint | kind | notes |
//! |---|---|---|
//! | `Str` | text | |
//! | `Bool` | boolean | |
//! | `Int` | integer | |
//! | `Long` | long | |
//! | `Float` | float | |
//! | `Double` | double | |
//! | `Bytes` | binary | |
//! | `Timestamp` | date | |
//! | `CalendarDate` | date | `format = "yyyy-MM-dd"` |
//! | `Object(schema)` | object | `nested` when wrapped in `List` |
//!
//! Every primitive is required unless wrapped in `Optional`; `List` makes it
//! multi-valued.

use crate::{
    error::{OdmError, Result},
    field::{Field, FieldKind},
    schema::Schema,
};
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// A static type annotation.
#[derive(Debug, Clone)]
pub enum TypeHint {
    /// String.
    Str,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Byte sequence.
    Bytes,
    /// Point in time.
    Timestamp,
    /// Calendar date without a time component.
    CalendarDate,
    /// The absent type, only meaningful inside a `Union`.
    Null,
    /// May be absent.
    Optional(Box<TypeHint>),
    /// Zero or more values.
    List(Box<TypeHint>),
    /// Reference to another schema.
    Object(Arc<Schema>),
    /// One of several types.
    Union(Vec<TypeHint>),
    /// Unconstrained.
    Any,
}

impl TypeHint {
    /// Hint for a Rust type.
    pub fn of<T: Hinted + ?Sized>() -> Self {
        T::type_hint()
    }

    /// Wrap in `Optional`.
    pub fn optional(inner: TypeHint) -> Self {
        TypeHint::Optional(Box::new(inner))
    }

    /// Wrap in `List`.
    pub fn list(inner: TypeHint) -> Self {
        TypeHint::List(Box::new(inner))
    }

    /// Reference a schema.
    pub fn object(schema: Arc<Schema>) -> Self {
        TypeHint::Object(schema)
    }
}

/// Types with a known [`TypeHint`].
pub trait Hinted {
    /// The hint for this type.
    fn type_hint() -> TypeHint;
}

macro_rules! hinted {
    ($hint:expr => $($ty:ty),+) => {
        $(impl Hinted for $ty {
            fn type_hint() -> TypeHint {
                $hint
            }
        })+
    };
}

hinted!(TypeHint::Str => String, str);
hinted!(TypeHint::Bool => bool);
hinted!(TypeHint::Int => i8, i16, i32, u8, u16);
hinted!(TypeHint::Long => i64, u32, u64, isize, usize);
hinted!(TypeHint::Float => f32);
hinted!(TypeHint::Double => f64);
hinted!(TypeHint::Bytes => Binary);
hinted!(TypeHint::Timestamp => chrono::NaiveDateTime);
hinted!(TypeHint::CalendarDate => chrono::NaiveDate);

impl<Tz: chrono::TimeZone> Hinted for chrono::DateTime<Tz> {
    fn type_hint() -> TypeHint {
        TypeHint::Timestamp
    }
}

impl<T: Hinted + ?Sized> Hinted for &T {
    fn type_hint() -> TypeHint {
        T::type_hint()
    }
}

impl<T: Hinted> Hinted for Option<T> {
    fn type_hint() -> TypeHint {
        TypeHint::optional(T::type_hint())
    }
}

impl<T: Hinted> Hinted for Vec<T> {
    fn type_hint() -> TypeHint {
        TypeHint::list(T::type_hint())
    }
}

/// Byte sequence serialized as base64.
///
/// `Vec<u8>` is a list of integers as far as hints go; wrap raw bytes in
/// `Binary` to get a binary field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Binary(pub Vec<u8>);

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Binary)
            .map_err(serde::de::Error::custom)
    }
}

/// Translate a hint into a field descriptor.
pub fn translate(hint: &TypeHint) -> Result<Field> {
    let field = match hint {
        TypeHint::Str => Field::text().required(),
        TypeHint::Bool => Field::boolean().required(),
        TypeHint::Int => Field::integer().required(),
        TypeHint::Long => Field::long().required(),
        TypeHint::Float => Field::float().required(),
        TypeHint::Double => Field::double().required(),
        TypeHint::Bytes => Field::binary().required(),
        TypeHint::Timestamp => Field::date().required(),
        TypeHint::CalendarDate => Field::calendar_date().required(),
        TypeHint::Object(schema) => Field::object(schema.clone()).required(),
        TypeHint::Optional(inner) => {
            let mut field = translate(inner)?;
            field.required = false;
            field
        }
        TypeHint::List(inner) => {
            let mut field = translate(inner)?;
            if field.multi {
                return Err(OdmError::schema("lists of lists cannot be mapped"));
            }
            field.multi = true;
            if field.kind == FieldKind::Object {
                field.kind = FieldKind::Nested;
            }
            field
        }
        TypeHint::Union(members) => translate_union(members)?,
        TypeHint::Null => return Err(OdmError::schema("the null type cannot be mapped on its own")),
        TypeHint::Any => return Err(OdmError::schema("cannot infer a field kind from Any")),
    };
    Ok(field)
}

fn translate_union(members: &[TypeHint]) -> Result<Field> {
    let nullable = members.iter().any(|m| matches!(m, TypeHint::Null));
    let mut resolved: Option<Field> = None;

    for member in members.iter().filter(|m| !matches!(m, TypeHint::Null)) {
        let field = translate(member)?;
        match &mut resolved {
            None => resolved = Some(field),
            Some(first) => {
                if !same_shape(first, &field) {
                    return Err(OdmError::schema(format!(
                        "ambiguous union of {} and {}",
                        first.kind, field.kind
                    )));
                }
                first.required &= field.required;
            }
        }
    }

    let mut field = resolved.ok_or_else(|| OdmError::schema("union has no mappable member"))?;
    if nullable {
        field.required = false;
    }
    Ok(field)
}

fn same_shape(a: &Field, b: &Field) -> bool {
    let same_schema = match (&a.schema, &b.schema) {
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    };
    a.kind == b.kind && a.multi == b.multi && a.format == b.format && same_schema
}

/// One attribute declaration: a name with an inferred and/or explicit field.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Attribute name.
    pub name: String,
    /// Declared type.
    pub hint: Option<TypeHint>,
    /// Explicit descriptor, wins over the hint.
    pub explicit: Option<Field>,
}

impl FieldDecl {
    /// Declare from a hint.
    pub fn hinted(name: impl Into<String>, hint: TypeHint) -> Self {
        Self {
            name: name.into(),
            hint: Some(hint),
            explicit: None,
        }
    }

    /// Declare from a Rust type.
    pub fn typed<T: Hinted + ?Sized>(name: impl Into<String>) -> Self {
        Self::hinted(name, T::type_hint())
    }

    /// Declare with an explicit descriptor only.
    pub fn explicit(name: impl Into<String>, field: Field) -> Self {
        Self {
            name: name.into(),
            hint: None,
            explicit: Some(field),
        }
    }

    /// Override the inferred descriptor.
    pub fn with(mut self, field: Field) -> Self {
        self.explicit = Some(field);
        self
    }

    /// Produce the final descriptor.
    pub fn resolve(&self) -> Result<Field> {
        let field = match (&self.explicit, &self.hint) {
            (Some(field), _) => field.clone(),
            (None, Some(hint)) => translate(hint).map_err(|e| match e {
                OdmError::Schema(msg) => OdmError::schema(format!("field '{}': {}", self.name, msg)),
                other => other,
            })?,
            (None, None) => {
                return Err(OdmError::schema(format!(
                    "field '{}' has neither a type hint nor a field",
                    self.name
                )));
            }
        };
        field.check(&self.name)?;
        Ok(field)
    }
}
