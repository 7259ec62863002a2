//! Name, type and signature patterns used inside pointcut designators.

use regex::Regex;

use crate::types::{MethodInfo, TypeHierarchy, is_primitive};

/// Types that resolve without an import in Java source.
const JAVA_LANG_TYPES: &[&str] = &[
    "Object",
    "String",
    "Integer",
    "Long",
    "Short",
    "Byte",
    "Character",
    "Boolean",
    "Double",
    "Float",
    "Number",
    "Void",
    "Class",
    "Enum",
    "Iterable",
    "Comparable",
    "CharSequence",
    "Runnable",
    "Throwable",
    "Exception",
    "RuntimeException",
    "Error",
    "IllegalArgumentException",
    "IllegalStateException",
    "UnsupportedOperationException",
    "Deprecated",
    "Override",
];

/// Inner classes are written with `.` in patterns and `$` in binary names.
pub fn normalize(type_name: &str) -> String {
    type_name.replace('$', ".")
}

/// Wrapper type used when a primitive value is boxed.
pub fn boxed(primitive: &str) -> Option<&'static str> {
    Some(match primitive {
        "boolean" => "java.lang.Boolean",
        "byte" => "java.lang.Byte",
        "char" => "java.lang.Character",
        "short" => "java.lang.Short",
        "int" => "java.lang.Integer",
        "long" => "java.lang.Long",
        "float" => "java.lang.Float",
        "double" => "java.lang.Double",
        _ => return None,
    })
}

/// Supertypes of every boxed primitive that code outside the JDK can name.
pub const BOXED_SUPERTYPES: &[&str] = &["java.lang.Object", "java.io.Serializable", "java.lang.Comparable"];

/// Whether a boxed `primitive` value is an instance of `expected`.
pub fn boxed_assignable(primitive: &str, expected: &str) -> bool {
    let Some(wrapper) = boxed(primitive) else {
        return false;
    };
    let numeric = !matches!(primitive, "boolean" | "char");
    expected == wrapper || BOXED_SUPERTYPES.contains(&expected) || (numeric && expected == "java.lang.Number")
}

/// Candidate fully qualified names for a type written in an expression.
///
/// Unqualified names may denote a class in the default package, in the
/// scope's package, or in `java.lang`.
pub fn candidate_names(text: &str, scope_package: &str) -> Vec<String> {
    if is_primitive(text) || text.contains('.') {
        return vec![text.to_string()];
    }
    let mut out = vec![text.to_string()];
    if !scope_package.is_empty() {
        out.push(format!("{scope_package}.{text}"));
    }
    out.push(format!("java.lang.{text}"));
    out
}

/// Resolves an exact type name, preferring candidates present on the classpath.
pub fn resolve_type_name(text: &str, scope_package: &str, hierarchy: &TypeHierarchy<'_>) -> String {
    let candidates = candidate_names(text, scope_package);
    if candidates.len() == 1 {
        return text.to_string();
    }
    if let Some(found) = candidates.iter().find(|c| hierarchy.load(c).is_some()) {
        return found.clone();
    }
    if JAVA_LANG_TYPES.contains(&text) {
        format!("java.lang.{text}")
    } else {
        text.to_string()
    }
}

fn wildcard_regex(text: &str, star: &str) -> Result<Regex, String> {
    let mut out = String::from("^");
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("..") {
            if tail.is_empty() {
                return Err(format!("'{text}' cannot end with '..'"));
            }
            out.push_str(r"\.(?:.*\.)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            out.push_str(star);
            rest = tail;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push_str(&regex::escape(&c.to_string()));
            }
            rest = chars.as_str();
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| e.to_string())
}

#[derive(Debug, Clone)]
enum NameMatcher {
    Any,
    Exact(Vec<String>),
    Wild(Regex),
}

/// A possibly wildcarded, possibly unqualified type name.
#[derive(Debug, Clone)]
pub struct NamePattern {
    text: String,
    matcher: NameMatcher,
}

impl NamePattern {
    pub fn for_type(text: &str, scope_package: &str) -> Result<Self, String> {
        let normalized = normalize(text);
        let matcher = if normalized == "*" {
            NameMatcher::Any
        } else if normalized.contains('*') || normalized.contains("..") {
            NameMatcher::Wild(wildcard_regex(&normalized, r"[^.]*")?)
        } else {
            NameMatcher::Exact(candidate_names(&normalized, scope_package))
        };
        Ok(Self {
            text: text.to_string(),
            matcher,
        })
    }

    pub fn matches(&self, type_name: &str) -> bool {
        let name = normalize(type_name);
        match &self.matcher {
            NameMatcher::Any => true,
            NameMatcher::Exact(candidates) => candidates.iter().any(|c| *c == name),
            NameMatcher::Wild(regex) => regex.is_match(&name),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Member or bean name pattern where `*` matches any run of characters.
#[derive(Debug, Clone)]
pub struct SimplePattern(Option<Regex>);

impl SimplePattern {
    pub fn new(text: &str) -> Result<Self, String> {
        if text == "*" {
            return Ok(Self(None));
        }
        let escaped: Vec<String> = text.split('*').map(regex::escape).collect();
        Regex::new(&format!("^{}$", escaped.join(".*")))
            .map(|r| Self(Some(r)))
            .map_err(|e| e.to_string())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.as_ref().is_none_or(|r| r.is_match(name))
    }
}

#[derive(Debug, Clone)]
pub enum TypePattern {
    Any,
    Named {
        name: NamePattern,
        subtypes: bool,
        dims: usize,
        annotations: Vec<String>,
    },
    Not(Box<TypePattern>),
    And(Box<TypePattern>, Box<TypePattern>),
    Or(Box<TypePattern>, Box<TypePattern>),
}

impl TypePattern {
    /// Parses a single pattern word such as `com.example..*Service+` or `int[]`.
    pub fn from_word(word: &str, scope_package: &str) -> Result<Self, String> {
        let mut base = word;
        let mut dims = 0;
        let mut subtypes = false;
        loop {
            if let Some(stripped) = base.strip_suffix("[]") {
                dims += 1;
                base = stripped;
            } else if let Some(stripped) = base.strip_suffix('+') {
                subtypes = true;
                base = stripped;
            } else {
                break;
            }
        }
        if base.is_empty() || base.contains(['[', ']', '+', '@']) {
            return Err(format!("invalid type pattern '{word}'"));
        }
        if base == "*" && dims == 0 {
            return Ok(TypePattern::Any);
        }
        Ok(TypePattern::Named {
            name: NamePattern::for_type(base, scope_package)?,
            subtypes,
            dims,
            annotations: Vec::new(),
        })
    }

    pub fn with_annotations(self, annotations: Vec<String>) -> Result<Self, String> {
        if annotations.is_empty() {
            return Ok(self);
        }
        match self {
            TypePattern::Any => Ok(TypePattern::Named {
                name: NamePattern::for_type("*", "")?,
                subtypes: false,
                dims: 0,
                annotations,
            }),
            TypePattern::Named {
                name, subtypes, dims, ..
            } => Ok(TypePattern::Named {
                name,
                subtypes,
                dims,
                annotations,
            }),
            _ => Err("annotation patterns apply to a single type".to_string()),
        }
    }

    pub fn matches(&self, type_name: &str, hierarchy: &TypeHierarchy<'_>) -> bool {
        match self {
            TypePattern::Any => true,
            TypePattern::Not(inner) => !inner.matches(type_name, hierarchy),
            TypePattern::And(a, b) => a.matches(type_name, hierarchy) && b.matches(type_name, hierarchy),
            TypePattern::Or(a, b) => a.matches(type_name, hierarchy) || b.matches(type_name, hierarchy),
            TypePattern::Named {
                name,
                subtypes,
                dims,
                annotations,
            } => {
                let mut base = type_name;
                let mut actual_dims = 0;
                while let Some(stripped) = base.strip_suffix("[]") {
                    actual_dims += 1;
                    base = stripped;
                }
                if actual_dims != *dims {
                    return false;
                }
                if !annotations.is_empty() {
                    let Some(class) = hierarchy.load(base) else {
                        return false;
                    };
                    if !annotations.iter().all(|a| class.has_annotation(a)) {
                        return false;
                    }
                }
                if name.matches(base) {
                    return true;
                }
                *subtypes
                    && !is_primitive(base)
                    && hierarchy.supertypes(base).names.iter().any(|s| name.matches(s))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParamPattern {
    Ellipsis,
    Type(TypePattern),
}

pub fn match_params(patterns: &[ParamPattern], types: &[String], hierarchy: &TypeHierarchy<'_>) -> bool {
    match patterns.split_first() {
        None => types.is_empty(),
        Some((ParamPattern::Ellipsis, rest)) => {
            (0..=types.len()).any(|skip| match_params(rest, &types[skip..], hierarchy))
        }
        Some((ParamPattern::Type(pattern), rest)) => match types.split_first() {
            Some((first, tail)) => pattern.matches(first, hierarchy) && match_params(rest, tail, hierarchy),
            None => false,
        },
    }
}

/// The signature part of `execution(...)`.
#[derive(Debug, Clone)]
pub struct MethodPattern {
    /// `(negated, annotation type)`
    pub annotations: Vec<(bool, String)>,
    /// `(negated, access flag)`
    pub modifiers: Vec<(bool, u16)>,
    pub return_type: TypePattern,
    pub declaring_type: Option<TypePattern>,
    pub name: SimplePattern,
    pub params: Vec<ParamPattern>,
    pub throws: Vec<(bool, TypePattern)>,
}

impl MethodPattern {
    /// Matches everything except the declaring type, which needs the class context.
    pub fn matches_signature(&self, method: &MethodInfo, hierarchy: &TypeHierarchy<'_>) -> bool {
        self.modifiers
            .iter()
            .all(|(negated, flag)| (method.access_flags & flag != 0) != *negated)
            && self
                .annotations
                .iter()
                .all(|(negated, annotation)| method.annotation(annotation).is_some() != *negated)
            && self.name.matches(&method.name)
            && self.return_type.matches(&method.return_type, hierarchy)
            && match_params(&self.params, &method.parameter_types, hierarchy)
            && self.throws.iter().all(|(negated, pattern)| {
                let declared = method.exceptions.iter().any(|e| pattern.matches(e, hierarchy));
                declared != *negated
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassInfo, InMemoryClassSource};

    #[test]
    fn package_wildcards() {
        let pattern = NamePattern::for_type("com.example..*Service", "").unwrap();
        assert!(pattern.matches("com.example.OrderService"));
        assert!(pattern.matches("com.example.orders.impl.OrderService"));
        assert!(!pattern.matches("com.examples.OrderService"));
        assert!(!pattern.matches("com.example.OrderServiceImpl"));

        let single = NamePattern::for_type("com.example.*", "").unwrap();
        assert!(single.matches("com.example.A"));
        assert!(!single.matches("com.example.sub.A"));
    }

    #[test]
    fn unqualified_names_resolve_through_scope_and_java_lang() {
        let pattern = NamePattern::for_type("String", "com.example").unwrap();
        assert!(pattern.matches("java.lang.String"));
        let local = NamePattern::for_type("Order", "com.example").unwrap();
        assert!(local.matches("com.example.Order"));
        assert!(!local.matches("com.other.Order"));
    }

    #[test]
    fn inner_class_separators_are_equivalent() {
        let pattern = NamePattern::for_type("com.example.Outer.Inner", "").unwrap();
        assert!(pattern.matches("com.example.Outer$Inner"));
    }

    #[test]
    fn subtype_patterns_use_the_hierarchy() {
        let classes = InMemoryClassSource::new()
            .with(ClassInfo::interface("com.example.Service"))
            .with(ClassInfo::new("com.example.impl.OrderService").implementing("com.example.Service"));
        let hierarchy = TypeHierarchy::new(&classes);

        let plus = TypePattern::from_word("com.example.Service+", "").unwrap();
        assert!(plus.matches("com.example.impl.OrderService", &hierarchy));
        let exact = TypePattern::from_word("com.example.Service", "").unwrap();
        assert!(!exact.matches("com.example.impl.OrderService", &hierarchy));
    }

    #[test]
    fn array_dimensions_must_agree() {
        let classes = InMemoryClassSource::new();
        let hierarchy = TypeHierarchy::new(&classes);
        let pattern = TypePattern::from_word("String[]", "").unwrap();
        assert!(pattern.matches("java.lang.String[]", &hierarchy));
        assert!(!pattern.matches("java.lang.String", &hierarchy));
        assert!(TypePattern::from_word("*", "").unwrap().matches("int", &hierarchy));
    }

    #[test]
    fn ellipsis_matches_any_run_of_parameters() {
        let classes = InMemoryClassSource::new();
        let hierarchy = TypeHierarchy::new(&classes);
        let params = vec![
            ParamPattern::Type(TypePattern::from_word("String", "").unwrap()),
            ParamPattern::Ellipsis,
            ParamPattern::Type(TypePattern::from_word("int", "").unwrap()),
        ];
        let types = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(match_params(&params, &types(&["java.lang.String", "int"]), &hierarchy));
        assert!(match_params(&params, &types(&["java.lang.String", "long", "char", "int"]), &hierarchy));
        assert!(!match_params(&params, &types(&["java.lang.String"]), &hierarchy));
    }

    #[test]
    fn simple_patterns() {
        let pattern = SimplePattern::new("get*").unwrap();
        assert!(pattern.matches("getName"));
        assert!(!pattern.matches("setName"));
        assert!(SimplePattern::new("*").unwrap().matches("anything"));
        assert!(SimplePattern::new("order-service*").unwrap().matches("order-service-v2"));
    }
}
