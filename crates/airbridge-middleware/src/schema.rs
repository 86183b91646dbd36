//! Runtime schema model for middleware interface types.
//!
//! A [`TypeDescriptor`] is the runtime view of one composite message type: its
//! fully-qualified name and the ordered list of its fields.  Every field
//! carries a [`FieldType`] tag that the codec switches over explicitly.

use std::fmt;
use std::sync::Arc;

use crate::error::CodecError;

// ─────────────────────────────────────────────────────────────────────────────
// Type names
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace a type lives in: plain messages, services, or actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Msg,
    Srv,
    Action,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Msg => "msg",
            InterfaceKind::Srv => "srv",
            InterfaceKind::Action => "action",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "msg" => Some(InterfaceKind::Msg),
            "srv" => Some(InterfaceKind::Srv),
            "action" => Some(InterfaceKind::Action),
            _ => None,
        }
    }
}

/// A parsed `<package>/<kind>/<TypeName>` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    pub package: String,
    pub kind: InterfaceKind,
    pub name: String,
}

impl TypeName {
    pub fn new(package: impl Into<String>, kind: InterfaceKind, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            kind,
            name: name.into(),
        }
    }

    /// Parse a qualified type string.
    ///
    /// # Errors
    ///
    /// - [`CodecError::TypeMalformed`] – not exactly three non-empty
    ///   slash-delimited segments.
    /// - [`CodecError::TypeNotFound`] – the middle segment is not one of
    ///   `msg`, `srv`, `action`, so no namespace can hold the type.
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(CodecError::TypeMalformed(raw.to_string()));
        }
        let kind = InterfaceKind::from_segment(segments[1]).ok_or_else(|| {
            CodecError::TypeNotFound {
                type_name: raw.to_string(),
                path: String::new(),
            }
        })?;
        Ok(Self::new(segments[0], kind, segments[2]))
    }

    /// Qualified name of a request/response/goal/... sub-type, e.g.
    /// `std_srvs/srv/SetBool_Request`.
    pub fn part(&self, suffix: &str) -> String {
        format!("{}_{}", self, suffix)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.package, self.kind.as_str(), self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field types
// ─────────────────────────────────────────────────────────────────────────────

/// Primitive field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Byte,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    WString,
}

impl PrimitiveKind {
    /// Look up a primitive by its IDL spelling.
    pub fn from_idl(name: &str) -> Option<Self> {
        let kind = match name {
            "bool" => PrimitiveKind::Bool,
            "byte" => PrimitiveKind::Byte,
            "char" => PrimitiveKind::Char,
            "int8" => PrimitiveKind::Int8,
            "uint8" => PrimitiveKind::UInt8,
            "int16" => PrimitiveKind::Int16,
            "uint16" => PrimitiveKind::UInt16,
            "int32" => PrimitiveKind::Int32,
            "uint32" => PrimitiveKind::UInt32,
            "int64" => PrimitiveKind::Int64,
            "uint64" => PrimitiveKind::UInt64,
            "float32" | "float" => PrimitiveKind::Float32,
            "float64" | "double" => PrimitiveKind::Float64,
            "string" => PrimitiveKind::String,
            "wstring" => PrimitiveKind::WString,
            _ => return None,
        };
        Some(kind)
    }

    pub fn idl_name(&self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::UInt8 => "uint8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::UInt16 => "uint16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::UInt32 => "uint32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::UInt64 => "uint64",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
            PrimitiveKind::String => "string",
            PrimitiveKind::WString => "wstring",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PrimitiveKind::Float32 | PrimitiveKind::Float64)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.idl_name())
    }
}

/// Type tag of a single field.
///
/// Composite references always hold a fully-qualified message name
/// (`pkg/msg/Name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Primitive(PrimitiveKind),
    Composite(String),
    PrimitiveSequence(PrimitiveKind),
    CompositeSequence(String),
}

impl FieldType {
    pub fn is_sequence(&self) -> bool {
        matches!(
            self,
            FieldType::PrimitiveSequence(_) | FieldType::CompositeSequence(_)
        )
    }

    /// The composite type this field refers to, if any.
    pub fn composite(&self) -> Option<&str> {
        match self {
            FieldType::Composite(name) | FieldType::CompositeSequence(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Primitive(p) => write!(f, "{p}"),
            FieldType::Composite(name) => write!(f, "{name}"),
            FieldType::PrimitiveSequence(p) => write!(f, "sequence<{p}>"),
            FieldType::CompositeSequence(name) => write!(f, "sequence<{name}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime description of one composite type.
///
/// Field order matches declaration order in the schema source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Request/response pair of a service type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub request: Arc<TypeDescriptor>,
    pub response: Arc<TypeDescriptor>,
}

/// Goal/result/feedback triple of an action type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: String,
    pub goal: Arc<TypeDescriptor>,
    pub result: Arc<TypeDescriptor>,
    pub feedback: Arc<TypeDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segment_names() {
        let name = TypeName::parse("geometry_msgs/msg/Twist").unwrap();
        assert_eq!(name.package, "geometry_msgs");
        assert_eq!(name.kind, InterfaceKind::Msg);
        assert_eq!(name.name, "Twist");
        assert_eq!(name.to_string(), "geometry_msgs/msg/Twist");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for raw in ["bad_type_no_slashes", "a/b", "a/msg/b/c", "a//B", ""] {
            assert!(
                matches!(TypeName::parse(raw), Err(CodecError::TypeMalformed(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn unknown_kind_is_not_found() {
        assert!(matches!(
            TypeName::parse("std_msgs/widgets/String"),
            Err(CodecError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn part_names_follow_suffix_convention() {
        let name = TypeName::parse("std_srvs/srv/SetBool").unwrap();
        assert_eq!(name.part("Request"), "std_srvs/srv/SetBool_Request");
    }

    #[test]
    fn float_kinds_are_flagged() {
        assert!(PrimitiveKind::Float32.is_float());
        assert!(PrimitiveKind::from_idl("double").unwrap().is_float());
        assert!(!PrimitiveKind::Int64.is_float());
        assert_eq!(PrimitiveKind::from_idl("quaternion"), None);
    }
}
