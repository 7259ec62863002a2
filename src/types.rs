//! Structural type model built from compiled class metadata.
//!
//! Everything the matcher knows about a class lives here: names, modifiers,
//! declared operations with their parameter types, interfaces and annotations.
//! Type names use the dotted binary form (`com.example.Outer$Inner`), arrays are
//! written with a `[]` suffix and primitives by their Java keyword.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::Result;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

pub const JAVA_LANG_OBJECT: &str = "java.lang.Object";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Class(String),
    Enum { type_name: String, constant: String },
    Annotation(Box<AnnotationInfo>),
    Array(Vec<AnnotationValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationInfo {
    pub type_name: String,
    pub values: Vec<(String, AnnotationValue)>,
}

impl AnnotationInfo {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: AnnotationValue) -> Self {
        self.values.push((name.into(), value));
        self
    }

    pub fn with_string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_value(name, AnnotationValue::String(value.into()))
    }

    pub fn value(&self, name: &str) -> Option<&AnnotationValue> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// String attribute, treating empty strings as absent.
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.value(name)? {
            AnnotationValue::String(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn class_value(&self, name: &str) -> Option<&str> {
        match self.value(name)? {
            AnnotationValue::Class(c) => Some(c.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub access_flags: u16,
    pub parameter_types: Vec<String>,
    pub return_type: String,
    pub exceptions: Vec<String>,
    pub parameter_names: Option<Vec<String>>,
    pub annotations: Vec<AnnotationInfo>,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, access_flags: u16) -> Self {
        Self {
            name: name.into(),
            access_flags,
            parameter_types: Vec::new(),
            return_type: "void".to_string(),
            exceptions: Vec::new(),
            parameter_names: None,
            annotations: Vec::new(),
        }
    }

    pub fn public(name: impl Into<String>) -> Self {
        Self::new(name, ACC_PUBLIC)
    }

    pub fn with_params(mut self, params: &[&str]) -> Self {
        self.parameter_types = params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_param_names(mut self, names: &[&str]) -> Self {
        self.parameter_names = Some(names.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn returning(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn with_annotation(mut self, annotation: AnnotationInfo) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn is_public(&self) -> bool {
        self.access_flags & ACC_PUBLIC != 0
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.access_flags & (ACC_SYNTHETIC | ACC_BRIDGE) != 0
    }

    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn annotation(&self, type_name: &str) -> Option<&AnnotationInfo> {
        self.annotations.iter().find(|a| a.type_name == type_name)
    }

    pub fn same_signature(&self, other: &MethodInfo) -> bool {
        self.name == other.name && self.parameter_types == other.parameter_types
    }

    /// `name(p1,p2)` form used in cache keys and display.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.parameter_types.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub access_flags: u16,
    pub field_type: String,
    pub annotations: Vec<AnnotationInfo>,
}

impl FieldInfo {
    pub fn annotation(&self, type_name: &str) -> Option<&AnnotationInfo> {
        self.annotations.iter().find(|a| a.type_name == type_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub access_flags: u16,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub methods: Vec<MethodInfo>,
    pub fields: Vec<FieldInfo>,
    pub annotations: Vec<AnnotationInfo>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access_flags: ACC_PUBLIC,
            super_name: Some(JAVA_LANG_OBJECT.to_string()),
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        let mut class = Self::new(name);
        class.access_flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        class
    }

    pub fn with_access(mut self, access_flags: u16) -> Self {
        self.access_flags = access_flags;
        self
    }

    pub fn extending(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    pub fn implementing(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_method(mut self, method: MethodInfo) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_field(mut self, name: &str, field_type: &str, annotations: Vec<AnnotationInfo>) -> Self {
        self.fields.push(FieldInfo {
            name: name.to_string(),
            access_flags: ACC_PUBLIC | ACC_STATIC,
            field_type: field_type.to_string(),
            annotations,
        });
        self
    }

    pub fn with_annotation(mut self, annotation: AnnotationInfo) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags & ACC_ABSTRACT != 0
    }

    pub fn is_final(&self) -> bool {
        self.access_flags & ACC_FINAL != 0
    }

    pub fn package(&self) -> &str {
        package_of(&self.name)
    }

    pub fn annotation(&self, type_name: &str) -> Option<&AnnotationInfo> {
        self.annotations.iter().find(|a| a.type_name == type_name)
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotation(type_name).is_some()
    }

    pub fn declares(&self, method: &MethodInfo) -> bool {
        self.methods.iter().any(|m| m.same_signature(method))
    }
}

pub fn package_of(class_name: &str) -> &str {
    class_name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
}

pub fn is_primitive(type_name: &str) -> bool {
    matches!(
        type_name,
        "boolean" | "byte" | "char" | "short" | "int" | "long" | "float" | "double" | "void"
    )
}

/// Lookup of compiled class metadata by binary name.
///
/// `Ok(None)` means the class is not on the classpath; `Err` is reserved for
/// I/O or class format failures.
pub trait ClassSource: Send + Sync {
    fn load_class(&self, name: &str) -> Result<Option<Arc<ClassInfo>>>;
}

/// Class source backed by a map, used for synthetic classes and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClassSource {
    classes: HashMap<String, Arc<ClassInfo>>,
}

impl InMemoryClassSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: ClassInfo) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    pub fn with(mut self, class: ClassInfo) -> Self {
        self.insert(class);
        self
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for InMemoryClassSource {
    fn load_class(&self, name: &str) -> Result<Option<Arc<ClassInfo>>> {
        Ok(self.classes.get(name).cloned())
    }
}

/// Three-valued match outcome; `Maybe` marks a decision that needs a runtime test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fuzzy {
    Yes,
    No,
    Maybe,
}

impl Fuzzy {
    pub fn from_bool(value: bool) -> Self {
        if value { Fuzzy::Yes } else { Fuzzy::No }
    }

    pub fn and(self, other: Fuzzy) -> Fuzzy {
        match (self, other) {
            (Fuzzy::No, _) | (_, Fuzzy::No) => Fuzzy::No,
            (Fuzzy::Yes, Fuzzy::Yes) => Fuzzy::Yes,
            _ => Fuzzy::Maybe,
        }
    }

    pub fn or(self, other: Fuzzy) -> Fuzzy {
        match (self, other) {
            (Fuzzy::Yes, _) | (_, Fuzzy::Yes) => Fuzzy::Yes,
            (Fuzzy::No, Fuzzy::No) => Fuzzy::No,
            _ => Fuzzy::Maybe,
        }
    }

    pub fn not(self) -> Fuzzy {
        match self {
            Fuzzy::Yes => Fuzzy::No,
            Fuzzy::No => Fuzzy::Yes,
            Fuzzy::Maybe => Fuzzy::Maybe,
        }
    }

    pub fn is_possible(self) -> bool {
        self != Fuzzy::No
    }
}

/// Supertype queries over a [`ClassSource`].
///
/// Load failures are logged and treated as missing classes; callers see them
/// as an incomplete hierarchy.
#[derive(Clone, Copy)]
pub struct TypeHierarchy<'a> {
    source: &'a dyn ClassSource,
}

/// Supertypes of a class plus whether every ancestor could be loaded.
#[derive(Debug, Clone, Default)]
pub struct Supertypes {
    pub names: BTreeSet<String>,
    pub complete: bool,
}

impl<'a> TypeHierarchy<'a> {
    pub fn new(source: &'a dyn ClassSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &'a dyn ClassSource {
        self.source
    }

    pub fn load(&self, name: &str) -> Option<Arc<ClassInfo>> {
        match self.source.load_class(name) {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!(
                    target = "aop.types",
                    class = name,
                    error = %err,
                    "failed to load class metadata"
                );
                None
            }
        }
    }

    /// The class itself plus all superclasses and interfaces, transitively.
    pub fn supertypes(&self, name: &str) -> Supertypes {
        let mut names = BTreeSet::new();
        let mut complete = true;
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !names.insert(current.clone()) {
                continue;
            }
            if current == JAVA_LANG_OBJECT {
                continue;
            }
            let Some(class) = self.load(&current) else {
                complete = false;
                continue;
            };
            if let Some(sup) = class.super_name.as_ref() {
                queue.push_back(sup.clone());
            }
            queue.extend(class.interfaces.iter().cloned());
        }
        names.insert(JAVA_LANG_OBJECT.to_string());
        Supertypes { names, complete }
    }

    /// All interfaces implemented by `class`, through superclasses and superinterfaces.
    pub fn interface_closure(&self, class: &ClassInfo) -> Vec<Arc<ClassInfo>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<String> = class.interfaces.iter().cloned().collect();
        let mut superclass = class.super_name.clone();
        let mut visited_supers = HashSet::new();
        while let Some(sup) = superclass.take() {
            if sup == JAVA_LANG_OBJECT || !visited_supers.insert(sup.clone()) {
                break;
            }
            if let Some(info) = self.load(&sup) {
                queue.extend(info.interfaces.iter().cloned());
                superclass = info.super_name.clone();
            }
        }
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(info) = self.load(&name) {
                queue.extend(info.interfaces.iter().cloned());
                out.push(info);
            }
        }
        out
    }

    pub fn implements(&self, class: &ClassInfo, interface: &str) -> bool {
        if class.interfaces.iter().any(|i| i == interface) {
            return true;
        }
        self.supertypes(&class.name).names.contains(interface)
    }

    /// Whether a value of type `from` can be assigned to a variable of type `to`.
    pub fn is_assignable(&self, from: &str, to: &str) -> Fuzzy {
        if from == to {
            return Fuzzy::Yes;
        }
        if is_primitive(from) || is_primitive(to) {
            return Fuzzy::No;
        }
        if let (Some(from_elem), Some(to_elem)) = (from.strip_suffix("[]"), to.strip_suffix("[]")) {
            return self.is_assignable(from_elem, to_elem);
        }
        if to == JAVA_LANG_OBJECT {
            return Fuzzy::Yes;
        }
        if from.ends_with("[]") || to.ends_with("[]") {
            return Fuzzy::from_bool(
                from.ends_with("[]") && matches!(to, "java.lang.Cloneable" | "java.io.Serializable"),
            );
        }
        let supertypes = self.supertypes(from);
        if supertypes.names.contains(to) {
            Fuzzy::Yes
        } else if supertypes.complete {
            Fuzzy::No
        } else {
            Fuzzy::Maybe
        }
    }

    /// Walks `class` and its superclasses (not interfaces), nearest first.
    pub fn superclass_chain(&self, class: &Arc<ClassInfo>) -> Vec<Arc<ClassInfo>> {
        let mut chain = vec![Arc::clone(class)];
        let mut seen = HashSet::from([class.name.clone()]);
        let mut next = class.super_name.clone();
        while let Some(name) = next.take() {
            if name == JAVA_LANG_OBJECT || !seen.insert(name.clone()) {
                break;
            }
            match self.load(&name) {
                Some(info) => {
                    next = info.super_name.clone();
                    chain.push(info);
                }
                None => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> InMemoryClassSource {
        InMemoryClassSource::new()
            .with(ClassInfo::interface("com.example.Service"))
            .with(ClassInfo::interface("com.example.Named").implementing("com.example.Service"))
            .with(ClassInfo::new("com.example.Base").implementing("com.example.Named"))
            .with(ClassInfo::new("com.example.Impl").extending("com.example.Base"))
            .with(ClassInfo::new("com.example.Orphan").extending("com.example.Missing"))
    }

    #[test]
    fn supertypes_follow_superclasses_and_interfaces() {
        let classes = source();
        let hierarchy = TypeHierarchy::new(&classes);
        let supers = hierarchy.supertypes("com.example.Impl");
        assert!(supers.complete);
        for expected in ["com.example.Base", "com.example.Named", "com.example.Service", JAVA_LANG_OBJECT] {
            assert!(supers.names.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn assignability_is_maybe_when_hierarchy_is_incomplete() {
        let classes = source();
        let hierarchy = TypeHierarchy::new(&classes);
        assert_eq!(hierarchy.is_assignable("com.example.Impl", "com.example.Service"), Fuzzy::Yes);
        assert_eq!(hierarchy.is_assignable("com.example.Service", "com.example.Impl"), Fuzzy::No);
        assert_eq!(hierarchy.is_assignable("com.example.Orphan", "com.example.Service"), Fuzzy::Maybe);
        assert_eq!(hierarchy.is_assignable("int", "java.lang.Object"), Fuzzy::No);
        assert_eq!(hierarchy.is_assignable("com.example.Impl[]", "com.example.Base[]"), Fuzzy::Yes);
    }

    #[test]
    fn interface_closure_includes_inherited_interfaces() {
        let classes = source();
        let hierarchy = TypeHierarchy::new(&classes);
        let impl_class = classes.load_class("com.example.Impl").unwrap().unwrap();
        let names: Vec<String> = hierarchy
            .interface_closure(&impl_class)
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["com.example.Named", "com.example.Service"]);
    }

    #[test]
    fn fuzzy_logic_tables() {
        assert_eq!(Fuzzy::Maybe.and(Fuzzy::Yes), Fuzzy::Maybe);
        assert_eq!(Fuzzy::Maybe.and(Fuzzy::No), Fuzzy::No);
        assert_eq!(Fuzzy::Maybe.or(Fuzzy::Yes), Fuzzy::Yes);
        assert_eq!(Fuzzy::Maybe.not(), Fuzzy::Maybe);
        assert!(Fuzzy::Maybe.is_possible());
    }
}
