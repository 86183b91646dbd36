//! Parser for line-oriented interface definitions (`.msg`, `.srv`, `.action`).
//!
//! Each non-empty line declares either a field (`<type> <name> [default]`) or
//! a constant (`<type> <NAME>=<value>`).  Constants and defaults carry no
//! runtime shape and are skipped.  `---` separates the request/response (and
//! goal/result/feedback) sections.

use crate::error::IdlError;
use crate::schema::{FieldDescriptor, FieldType, PrimitiveKind, TypeDescriptor};

const SECTION_SEPARATOR: &str = "---";

/// Split a definition on `---` lines.
pub fn split_sections(text: &str) -> Vec<String> {
    let mut sections = vec![String::new()];
    for line in text.lines() {
        if strip_comment(line).trim() == SECTION_SEPARATOR {
            sections.push(String::new());
        } else if let Some(current) = sections.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    sections
}

/// Parse a single section into a [`TypeDescriptor`] named `qualified_name`.
///
/// `package` resolves short composite references such as `Point` or
/// `Point[]` that name a type from the same package.
pub fn parse_fields(
    qualified_name: &str,
    package: &str,
    text: &str,
) -> Result<TypeDescriptor, IdlError> {
    let mut fields = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let syntax = |reason: String| IdlError::Syntax {
            type_name: qualified_name.to_string(),
            line: idx + 1,
            reason,
        };

        let (type_token, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| syntax(format!("missing field name in `{line}`")))?;
        let rest = rest.trim();

        if is_constant(rest) {
            continue;
        }

        let name = rest.split_whitespace().next().unwrap_or_default();
        if !is_identifier(name) {
            return Err(syntax(format!("invalid field name `{name}`")));
        }
        if fields.iter().any(|f: &FieldDescriptor| f.name == name) {
            return Err(syntax(format!("duplicate field `{name}`")));
        }

        let field_type = parse_type(type_token, package).map_err(syntax)?;
        fields.push(FieldDescriptor::new(name, field_type));
    }
    Ok(TypeDescriptor::new(qualified_name, fields))
}

/// Turn an IDL type token into a [`FieldType`].
///
/// Unbounded (`T[]`), bounded (`T[<=N]`) and fixed (`T[N]`) arrays are all
/// carried as sequences.  String bounds (`string<=N`) are dropped.
pub fn parse_type(token: &str, package: &str) -> Result<FieldType, String> {
    let (base, is_sequence) = match token.find('[') {
        Some(open) => {
            let bound = token[open..]
                .strip_prefix('[')
                .and_then(|b| b.strip_suffix(']'))
                .ok_or_else(|| format!("unterminated array bound in `{token}`"))?;
            let digits = bound.strip_prefix("<=").unwrap_or(bound);
            if !digits.is_empty() && digits.parse::<usize>().is_err() {
                return Err(format!("invalid array bound in `{token}`"));
            }
            (&token[..open], true)
        }
        None => (token, false),
    };

    let base = match base.split_once("<=") {
        Some((inner, _)) => inner,
        None => base,
    };

    if let Some(kind) = PrimitiveKind::from_idl(base) {
        return Ok(if is_sequence {
            FieldType::PrimitiveSequence(kind)
        } else {
            FieldType::Primitive(kind)
        });
    }

    let qualified = qualify_reference(base, package)?;
    Ok(if is_sequence {
        FieldType::CompositeSequence(qualified)
    } else {
        FieldType::Composite(qualified)
    })
}

/// Normalise a composite reference to `pkg/msg/Name`.
fn qualify_reference(base: &str, package: &str) -> Result<String, String> {
    let parts: Vec<&str> = base.split('/').collect();
    let qualified = match parts.as_slice() {
        ["Header"] => "std_msgs/msg/Header".to_string(),
        [name] => format!("{package}/msg/{name}"),
        [pkg, name] => format!("{pkg}/msg/{name}"),
        [pkg, "msg", name] => format!("{pkg}/msg/{name}"),
        _ => return Err(format!("unsupported type reference `{base}`")),
    };
    if qualified.split('/').any(|s| !is_identifier(s)) {
        return Err(format!("unsupported type reference `{base}`"));
    }
    Ok(qualified)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// `NAME=value` or `NAME = value`.
fn is_constant(rest: &str) -> bool {
    match rest.split_once('=') {
        Some((lhs, _)) => is_identifier(lhs.trim()),
        None => false,
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
