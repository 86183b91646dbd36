//! Conversion between JSON payloads and typed middleware messages.
//!
//! Decoding walks a [`TypeDescriptor`] and switches on each field's
//! [`FieldType`] tag.  Nested composite types are resolved through the
//! [`TypeResolver`] on demand: once per composite field, and once per
//! sequence (not per element).

use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::error::CodecError;
use crate::registry::TypeResolver;
use crate::schema::{FieldType, PrimitiveKind, TypeDescriptor};

// ─────────────────────────────────────────────────────────────────────────────
// Typed values
// ─────────────────────────────────────────────────────────────────────────────

/// A primitive field value, sized to its declared kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Byte(u8),
    Char(u8),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
}

/// Any value a message field can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Primitive(Primitive),
    Message(TypedMessage),
    Sequence(Vec<TypedValue>),
}

/// A fully-typed message instance with fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedMessage {
    type_name: String,
    fields: Vec<(String, TypedValue)>,
}

impl TypedMessage {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field append.
    pub fn with(mut self, name: impl Into<String>, value: TypedValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[(String, TypedValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// Converts JSON objects into [`TypedMessage`]s and back.
#[derive(Clone)]
pub struct MessageCodec {
    resolver: Arc<dyn TypeResolver>,
}

impl MessageCodec {
    pub fn new(resolver: Arc<dyn TypeResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<dyn TypeResolver> {
        &self.resolver
    }

    /// Decode `value` against `descriptor`.
    ///
    /// # Errors
    ///
    /// - [`CodecError::SchemaMismatch`] – the object's key set differs from
    ///   the declared field set (at any nesting level).
    /// - [`CodecError::InvalidPayload`] – a value has the wrong JSON shape or
    ///   is out of range for its primitive kind.
    /// - [`CodecError::TypeNotFound`] – a nested composite type is unknown.
    pub fn decode(
        &self,
        descriptor: &TypeDescriptor,
        value: &Value,
    ) -> Result<TypedMessage, CodecError> {
        let object = value
            .as_object()
            .ok_or_else(|| CodecError::invalid(format!("expected object, found {}", kind_of(value))))?;
        self.decode_object(descriptor, object)
    }

    /// Decode a JSON object against `descriptor`.
    pub fn decode_object(
        &self,
        descriptor: &TypeDescriptor,
        object: &Map<String, Value>,
    ) -> Result<TypedMessage, CodecError> {
        let missing: Vec<String> = descriptor
            .field_names()
            .filter(|name| !object.contains_key(*name))
            .map(str::to_string)
            .collect();
        let unexpected: Vec<String> = object
            .keys()
            .filter(|key| descriptor.field(key).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(CodecError::SchemaMismatch {
                type_name: descriptor.name.clone(),
                path: String::new(),
                missing,
                unexpected,
            });
        }

        let mut message = TypedMessage::new(&descriptor.name);
        for field in &descriptor.fields {
            let raw = &object[&field.name];
            let value = self
                .decode_field(&field.field_type, raw)
                .map_err(|e| e.within(&field.name))?;
            message.fields.push((field.name.clone(), value));
        }
        Ok(message)
    }

    fn decode_field(&self, field_type: &FieldType, raw: &Value) -> Result<TypedValue, CodecError> {
        match field_type {
            FieldType::Primitive(kind) => decode_primitive(*kind, raw, true).map(TypedValue::Primitive),
            FieldType::Composite(type_name) => {
                let nested = self.resolver.resolve(type_name)?;
                self.decode(&nested, raw).map(TypedValue::Message)
            }
            FieldType::PrimitiveSequence(kind) => {
                let items = expect_array(raw)?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        decode_primitive(*kind, item, false)
                            .map(TypedValue::Primitive)
                            .map_err(|e| e.at_index(i))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(TypedValue::Sequence)
            }
            FieldType::CompositeSequence(type_name) => {
                let items = expect_array(raw)?;
                let nested = self.resolver.resolve(type_name)?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.decode(&nested, item)
                            .map(TypedValue::Message)
                            .map_err(|e| e.at_index(i))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(TypedValue::Sequence)
            }
        }
    }

    /// Encode a typed message back to a JSON object, preserving field order.
    ///
    /// Non-finite floats have no JSON form and encode as `null`.
    pub fn encode(message: &TypedMessage) -> Value {
        let object: Map<String, Value> = message
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), Self::encode_value(value)))
            .collect();
        Value::Object(object)
    }

    pub fn encode_value(value: &TypedValue) -> Value {
        match value {
            TypedValue::Primitive(p) => encode_primitive(p),
            TypedValue::Message(m) => Self::encode(m),
            TypedValue::Sequence(items) => {
                Value::Array(items.iter().map(Self::encode_value).collect())
            }
        }
    }
}

fn expect_array(raw: &Value) -> Result<&Vec<Value>, CodecError> {
    raw.as_array()
        .ok_or_else(|| CodecError::invalid(format!("expected array, found {}", kind_of(raw))))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(kind: PrimitiveKind, raw: &Value) -> CodecError {
    CodecError::invalid(format!("expected {kind}, found {raw}"))
}

fn out_of_range(kind: PrimitiveKind, raw: &Value) -> CodecError {
    CodecError::invalid(format!("{raw} is out of range for {kind}"))
}

/// Decode one primitive.
///
/// `coerce_float` lets float fields accept integers and numeric strings; it
/// is only set for scalar fields.
fn decode_primitive(
    kind: PrimitiveKind,
    raw: &Value,
    coerce_float: bool,
) -> Result<Primitive, CodecError> {
    fn unsigned<T: TryFrom<u64>>(kind: PrimitiveKind, raw: &Value) -> Result<T, CodecError> {
        let n = raw.as_u64().ok_or_else(|| match raw.as_i64() {
            Some(_) => out_of_range(kind, raw),
            None => mismatch(kind, raw),
        })?;
        T::try_from(n).map_err(|_| out_of_range(kind, raw))
    }

    fn signed<T: TryFrom<i64>>(kind: PrimitiveKind, raw: &Value) -> Result<T, CodecError> {
        let n = raw.as_i64().ok_or_else(|| match raw.as_u64() {
            Some(_) => out_of_range(kind, raw),
            None => mismatch(kind, raw),
        })?;
        T::try_from(n).map_err(|_| out_of_range(kind, raw))
    }

    let value = match kind {
        PrimitiveKind::Bool => Primitive::Bool(raw.as_bool().ok_or_else(|| mismatch(kind, raw))?),
        PrimitiveKind::Byte => Primitive::Byte(unsigned(kind, raw)?),
        PrimitiveKind::Char => Primitive::Char(unsigned(kind, raw)?),
        PrimitiveKind::UInt8 => Primitive::UInt8(unsigned(kind, raw)?),
        PrimitiveKind::UInt16 => Primitive::UInt16(unsigned(kind, raw)?),
        PrimitiveKind::UInt32 => Primitive::UInt32(unsigned(kind, raw)?),
        PrimitiveKind::UInt64 => Primitive::UInt64(unsigned(kind, raw)?),
        PrimitiveKind::Int8 => Primitive::Int8(signed(kind, raw)?),
        PrimitiveKind::Int16 => Primitive::Int16(signed(kind, raw)?),
        PrimitiveKind::Int32 => Primitive::Int32(signed(kind, raw)?),
        PrimitiveKind::Int64 => Primitive::Int64(signed(kind, raw)?),
        PrimitiveKind::Float32 | PrimitiveKind::Float64 => {
            let f = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) if coerce_float => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| mismatch(kind, raw))?;
            if kind == PrimitiveKind::Float32 {
                if f.is_finite() && f.abs() > f32::MAX as f64 {
                    return Err(out_of_range(kind, raw));
                }
                Primitive::Float32(f as f32)
            } else {
                Primitive::Float64(f)
            }
        }
        PrimitiveKind::String | PrimitiveKind::WString => {
            Primitive::String(raw.as_str().ok_or_else(|| mismatch(kind, raw))?.to_string())
        }
    };
    Ok(value)
}

fn encode_primitive(value: &Primitive) -> Value {
    match value {
        Primitive::Bool(b) => Value::Bool(*b),
        Primitive::Byte(n) | Primitive::Char(n) | Primitive::UInt8(n) => Value::from(*n),
        Primitive::Int8(n) => Value::from(*n),
        Primitive::Int16(n) => Value::from(*n),
        Primitive::UInt16(n) => Value::from(*n),
        Primitive::Int32(n) => Value::from(*n),
        Primitive::UInt32(n) => Value::from(*n),
        Primitive::Int64(n) => Value::from(*n),
        Primitive::UInt64(n) => Value::from(*n),
        Primitive::Float32(f) => float(*f as f64),
        Primitive::Float64(f) => float(*f),
        Primitive::String(s) => Value::String(s.clone()),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
