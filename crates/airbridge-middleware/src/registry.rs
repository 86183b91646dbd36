//! Type resolution.
//!
//! [`TypeRegistry`] is built once at startup from the built-in catalog plus any
//! schema directories, then shared read-only behind the [`TypeResolver`]
//! trait.  Resolution is a pure lookup; nothing is cached across calls.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::BUILTIN;
use crate::error::{CodecError, IdlError};
use crate::idl;
use crate::schema::{
    ActionDescriptor, InterfaceKind, ServiceDescriptor, TypeDescriptor, TypeName,
};

/// Maps qualified type strings to runtime descriptors.
pub trait TypeResolver: Send + Sync {
    /// Resolve a message type (`pkg/msg/Name`).
    fn resolve(&self, type_name: &str) -> Result<Arc<TypeDescriptor>, CodecError>;

    /// Resolve a service type (`pkg/srv/Name`).
    fn resolve_service(&self, type_name: &str) -> Result<ServiceDescriptor, CodecError>;

    /// Resolve an action type (`pkg/action/Name`).
    fn resolve_action(&self, type_name: &str) -> Result<ActionDescriptor, CodecError>;
}

fn not_found(type_name: &str) -> CodecError {
    CodecError::TypeNotFound {
        type_name: type_name.to_string(),
        path: String::new(),
    }
}

/// In-memory [`TypeResolver`] backed by parsed interface definitions.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    messages: HashMap<String, Arc<TypeDescriptor>>,
    services: HashMap<String, ServiceDescriptor>,
    actions: HashMap<String, ActionDescriptor>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the compiled-in catalog.
    pub fn with_builtin() -> Result<Self, IdlError> {
        let mut registry = Self::new();
        for def in BUILTIN {
            let name = TypeName::new(def.package, def.kind, def.name);
            registry.register(&name, def.text)?;
        }
        Ok(registry)
    }

    /// Register one definition under `name`, dispatching on its kind.
    pub fn register(&mut self, name: &TypeName, text: &str) -> Result<(), IdlError> {
        match name.kind {
            InterfaceKind::Msg => self.register_message(name, text),
            InterfaceKind::Srv => self.register_service(name, text),
            InterfaceKind::Action => self.register_action(name, text),
        }
    }

    pub fn register_message(&mut self, name: &TypeName, text: &str) -> Result<(), IdlError> {
        let qualified = name.to_string();
        let desc = idl::parse_fields(&qualified, &name.package, text)?;
        self.messages.insert(qualified, Arc::new(desc));
        Ok(())
    }

    pub fn register_service(&mut self, name: &TypeName, text: &str) -> Result<(), IdlError> {
        let qualified = name.to_string();
        let sections = expect_sections(&qualified, text, 2)?;
        let request = idl::parse_fields(&name.part("Request"), &name.package, &sections[0])?;
        let response = idl::parse_fields(&name.part("Response"), &name.package, &sections[1])?;
        self.services.insert(
            qualified.clone(),
            ServiceDescriptor {
                name: qualified,
                request: Arc::new(request),
                response: Arc::new(response),
            },
        );
        Ok(())
    }

    pub fn register_action(&mut self, name: &TypeName, text: &str) -> Result<(), IdlError> {
        let qualified = name.to_string();
        let sections = expect_sections(&qualified, text, 3)?;
        let goal = idl::parse_fields(&name.part("Goal"), &name.package, &sections[0])?;
        let result = idl::parse_fields(&name.part("Result"), &name.package, &sections[1])?;
        let feedback = idl::parse_fields(&name.part("Feedback"), &name.package, &sections[2])?;
        self.actions.insert(
            qualified.clone(),
            ActionDescriptor {
                name: qualified,
                goal: Arc::new(goal),
                result: Arc::new(result),
                feedback: Arc::new(feedback),
            },
        );
        Ok(())
    }

    /// Load every `<dir>/<package>/{msg,srv,action}/*.{msg,srv,action}` file.
    ///
    /// Returns the number of definitions registered.  Directories that do not
    /// follow the layout are skipped.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, IdlError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| IdlError::Io { path, source }
        };

        let mut loaded = 0;
        for package in std::fs::read_dir(dir).map_err(io(dir))? {
            let package = package.map_err(io(dir))?;
            let package_path = package.path();
            if !package_path.is_dir() {
                continue;
            }
            let package_name = package.file_name().to_string_lossy().into_owned();

            for kind in [InterfaceKind::Msg, InterfaceKind::Srv, InterfaceKind::Action] {
                let kind_dir = package_path.join(kind.as_str());
                if !kind_dir.is_dir() {
                    continue;
                }
                for entry in std::fs::read_dir(&kind_dir).map_err(io(&kind_dir))? {
                    let path = entry.map_err(io(&kind_dir))?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(kind.as_str()) {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let text = std::fs::read_to_string(&path).map_err(io(&path))?;
                    let name = TypeName::new(&package_name, kind, stem);
                    self.register(&name, &text)?;
                    debug!(type_name = %name, path = %path.display(), "loaded interface definition");
                    loaded += 1;
                }
            }
        }
        Ok(loaded)
    }

    /// Composite references that do not resolve to a registered message.
    ///
    /// The bridge logs these at startup; they only fail at decode time.
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let descriptors = self
            .messages
            .values()
            .map(|d| d.as_ref())
            .chain(self.services.values().flat_map(|s| [&*s.request, &*s.response]))
            .chain(
                self.actions
                    .values()
                    .flat_map(|a| [&*a.goal, &*a.result, &*a.feedback]),
            );

        let mut dangling: Vec<(String, String)> = descriptors
            .flat_map(|desc| {
                desc.fields.iter().filter_map(move |field| {
                    field
                        .field_type
                        .composite()
                        .filter(|target| !self.messages.contains_key(*target))
                        .map(|target| (desc.name.clone(), target.to_string()))
                })
            })
            .collect();
        dangling.sort();
        dangling
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Log a warning per dangling reference.
    pub fn warn_dangling(&self) {
        for (owner, target) in self.dangling_references() {
            warn!(owner = %owner, target = %target, "interface references an unknown type");
        }
    }
}

fn expect_sections(type_name: &str, text: &str, expected: usize) -> Result<Vec<String>, IdlError> {
    let sections = idl::split_sections(text);
    if sections.len() != expected {
        return Err(IdlError::Sections {
            type_name: type_name.to_string(),
            expected,
            found: sections.len(),
        });
    }
    Ok(sections)
}

fn lookup<'a, T>(
    table: &'a HashMap<String, T>,
    type_name: &str,
    kind: InterfaceKind,
) -> Result<&'a T, CodecError> {
    let parsed = TypeName::parse(type_name)?;
    if parsed.kind != kind {
        return Err(not_found(type_name));
    }
    table.get(type_name).ok_or_else(|| not_found(type_name))
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, type_name: &str) -> Result<Arc<TypeDescriptor>, CodecError> {
        lookup(&self.messages, type_name, InterfaceKind::Msg).cloned()
    }

    fn resolve_service(&self, type_name: &str) -> Result<ServiceDescriptor, CodecError> {
        lookup(&self.services, type_name, InterfaceKind::Srv).cloned()
    }

    fn resolve_action(&self, type_name: &str) -> Result<ActionDescriptor, CodecError> {
        lookup(&self.actions, type_name, InterfaceKind::Action).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, PrimitiveKind};

    fn registry() -> TypeRegistry {
        TypeRegistry::with_builtin().unwrap()
    }

    #[test]
    fn builtin_catalog_parses_cleanly() {
        let registry = registry();
        assert!(registry.message_count() > 20);
        assert!(registry.service_count() >= 4);
        assert_eq!(registry.action_count(), 1);
        assert!(registry.dangling_references().is_empty());
    }

    #[test]
    fn resolves_messages_with_ordered_fields() {
        let twist = registry().resolve("geometry_msgs/msg/Twist").unwrap();
        let names: Vec<_> = twist.field_names().collect();
        assert_eq!(names, ["linear", "angular"]);
        assert_eq!(
            twist.fields[0].field_type,
            FieldType::Composite("geometry_msgs/msg/Vector3".into())
        );
    }

    #[test]
    fn malformed_and_missing_types_are_distinguished() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("bad_type_no_slashes"),
            Err(CodecError::TypeMalformed(_))
        ));
        assert!(matches!(
            registry.resolve("nonexistent_pkg/msg/Foo"),
            Err(CodecError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn kind_must_match_the_namespace() {
        let registry = registry();
        assert!(registry.resolve("std_srvs/srv/SetBool").is_err());
        assert!(registry.resolve_service("std_msgs/msg/String").is_err());
        assert!(registry.resolve_action("std_srvs/srv/SetBool").is_err());
    }

    #[test]
    fn service_and_action_parts_are_split() {
        let registry = registry();
        let set_bool = registry.resolve_service("std_srvs/srv/SetBool").unwrap();
        assert_eq!(set_bool.request.name, "std_srvs/srv/SetBool_Request");
        assert_eq!(set_bool.request.fields.len(), 1);
        assert_eq!(set_bool.response.fields.len(), 2);

        let trigger = registry.resolve_service("std_srvs/srv/Trigger").unwrap();
        assert!(trigger.request.fields.is_empty());

        let fib = registry
            .resolve_action("example_interfaces/action/Fibonacci")
            .unwrap();
        assert_eq!(
            fib.result.fields[0].field_type,
            FieldType::PrimitiveSequence(PrimitiveKind::Int32)
        );
    }

    #[test]
    fn service_definition_needs_two_sections() {
        let mut registry = TypeRegistry::new();
        let name = TypeName::parse("pkg/srv/Broken").unwrap();
        let err = registry.register(&name, "int32 a\n").unwrap_err();
        assert!(matches!(err, IdlError::Sections { expected: 2, found: 1, .. }));
    }

    #[test]
    fn loads_schema_directories() {
        let dir = tempfile::tempdir().unwrap();
        let msg_dir = dir.path().join("fleet_msgs").join("msg");
        let srv_dir = dir.path().join("fleet_msgs").join("srv");
        std::fs::create_dir_all(&msg_dir).unwrap();
        std::fs::create_dir_all(&srv_dir).unwrap();
        std::fs::write(msg_dir.join("Waypoint.msg"), "string label\ngeometry_msgs/Pose pose\n")
            .unwrap();
        std::fs::write(msg_dir.join("Route.msg"), "Waypoint[] stops\n").unwrap();
        std::fs::write(msg_dir.join("README.md"), "not a definition").unwrap();
        std::fs::write(srv_dir.join("Dock.srv"), "string station\n---\nbool ok\n").unwrap();

        let mut registry = registry();
        let loaded = registry.load_dir(dir.path()).unwrap();
        assert_eq!(loaded, 3);

        let route = registry.resolve("fleet_msgs/msg/Route").unwrap();
        assert_eq!(
            route.fields[0].field_type,
            FieldType::CompositeSequence("fleet_msgs/msg/Waypoint".into())
        );
        assert!(registry.resolve_service("fleet_msgs/srv/Dock").is_ok());
        assert!(registry.dangling_references().is_empty());
    }

    #[test]
    fn reports_dangling_references() {
        let mut registry = TypeRegistry::new();
        let name = TypeName::parse("pkg/msg/Holder").unwrap();
        registry.register(&name, "Missing thing\n").unwrap();
        assert_eq!(
            registry.dangling_references(),
            vec![("pkg/msg/Holder".to_string(), "pkg/msg/Missing".to_string())]
        );
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let mut registry = TypeRegistry::new();
        let err = registry
            .load_dir(Path::new("/definitely/not/a/schema/dir"))
            .unwrap_err();
        assert!(matches!(err, IdlError::Io { .. }));
    }
}
