//! AspectJ pointcut expressions, restricted to what Spring AOP supports and
//! evaluated statically against class metadata.
//!
//! Evaluation is three-valued: designators that depend on runtime values
//! (`args` with a supertype, `bean` without a bean name) answer
//! [`Fuzzy::Maybe`], which callers treat as a possible match.

mod lexer;
mod parser;
pub mod pattern;

pub use parser::{CompileContext, POINTCUT_ANNOTATION, compile_pointcut, compile_type_pattern};
pub use pattern::TypePattern;

use pattern::{BOXED_SUPERTYPES, MethodPattern, SimplePattern, boxed, boxed_assignable};

use crate::types::{ClassInfo, Fuzzy, MethodInfo, TypeHierarchy, is_primitive};

#[derive(Debug, Clone)]
pub enum ArgPattern {
    Ellipsis,
    Any,
    Type(String),
}

#[derive(Debug, Clone)]
pub enum Pointcut {
    And(Box<Pointcut>, Box<Pointcut>),
    Or(Box<Pointcut>, Box<Pointcut>),
    Not(Box<Pointcut>),
    Execution(MethodPattern),
    Within(TypePattern),
    This(String),
    Target(String),
    Args(Vec<ArgPattern>),
    AtAnnotation(String),
    AtWithin(String),
    AtTarget(String),
    AtArgs(Vec<ArgPattern>),
    Bean(SimplePattern),
}

/// A method execution on a candidate bean.
#[derive(Debug, Clone, Copy)]
pub struct Shadow<'a> {
    pub class: &'a ClassInfo,
    pub method: &'a MethodInfo,
    pub bean_name: Option<&'a str>,
}

impl Pointcut {
    pub fn evaluate(&self, shadow: &Shadow<'_>, hierarchy: &TypeHierarchy<'_>) -> Fuzzy {
        match self {
            Pointcut::And(a, b) => {
                let left = a.evaluate(shadow, hierarchy);
                if left == Fuzzy::No {
                    return Fuzzy::No;
                }
                left.and(b.evaluate(shadow, hierarchy))
            }
            Pointcut::Or(a, b) => {
                let left = a.evaluate(shadow, hierarchy);
                if left == Fuzzy::Yes {
                    return Fuzzy::Yes;
                }
                left.or(b.evaluate(shadow, hierarchy))
            }
            // Negating "maybe" stays "maybe": the runtime check could go either way.
            Pointcut::Not(inner) => inner.evaluate(shadow, hierarchy).not(),
            Pointcut::Execution(pattern) => Fuzzy::from_bool(execution_matches(pattern, shadow, hierarchy)),
            Pointcut::Within(pattern) => Fuzzy::from_bool(pattern.matches(&shadow.class.name, hierarchy)),
            Pointcut::This(type_name) | Pointcut::Target(type_name) => {
                hierarchy.is_assignable(&shadow.class.name, type_name)
            }
            Pointcut::Args(patterns) => match_args(patterns, &shadow.method.parameter_types, hierarchy, arg_matches),
            Pointcut::AtAnnotation(annotation) => Fuzzy::from_bool(shadow.method.annotation(annotation).is_some()),
            Pointcut::AtWithin(annotation) | Pointcut::AtTarget(annotation) => {
                Fuzzy::from_bool(shadow.class.has_annotation(annotation))
            }
            Pointcut::AtArgs(patterns) => {
                match_args(patterns, &shadow.method.parameter_types, hierarchy, arg_annotated)
            }
            Pointcut::Bean(pattern) => match shadow.bean_name {
                Some(name) => Fuzzy::from_bool(pattern.matches(name)),
                None => Fuzzy::Maybe,
            },
        }
    }

    pub fn matches(&self, shadow: &Shadow<'_>, hierarchy: &TypeHierarchy<'_>) -> bool {
        self.evaluate(shadow, hierarchy).is_possible()
    }

    /// Whether the outcome depends on the bean name and not only on class and method.
    pub fn uses_bean_name(&self) -> bool {
        match self {
            Pointcut::And(a, b) | Pointcut::Or(a, b) => a.uses_bean_name() || b.uses_bean_name(),
            Pointcut::Not(inner) => inner.uses_bean_name(),
            Pointcut::Bean(_) => true,
            _ => false,
        }
    }
}

fn execution_matches(pattern: &MethodPattern, shadow: &Shadow<'_>, hierarchy: &TypeHierarchy<'_>) -> bool {
    if !pattern.matches_signature(shadow.method, hierarchy) {
        return false;
    }
    let Some(declaring) = pattern.declaring_type.as_ref() else {
        return true;
    };
    if declaring.matches(&shadow.class.name, hierarchy) {
        return true;
    }
    // An overridden method also executes as a join point of every supertype declaring it.
    hierarchy
        .supertypes(&shadow.class.name)
        .names
        .iter()
        .filter(|name| **name != shadow.class.name)
        .any(|name| {
            hierarchy.load(name).is_some_and(|c| c.declares(shadow.method)) && declaring.matches(name, hierarchy)
        })
}

fn match_args(
    patterns: &[ArgPattern],
    types: &[String],
    hierarchy: &TypeHierarchy<'_>,
    check: fn(&str, &str, &TypeHierarchy<'_>) -> Fuzzy,
) -> Fuzzy {
    match patterns.split_first() {
        None => Fuzzy::from_bool(types.is_empty()),
        Some((ArgPattern::Ellipsis, rest)) => (0..=types.len()).fold(Fuzzy::No, |acc, skip| {
            if acc == Fuzzy::Yes {
                acc
            } else {
                acc.or(match_args(rest, &types[skip..], hierarchy, check))
            }
        }),
        Some((pattern, rest)) => {
            let Some((first, tail)) = types.split_first() else {
                return Fuzzy::No;
            };
            let head = match pattern {
                ArgPattern::Type(expected) => check(first, expected, hierarchy),
                _ => Fuzzy::Yes,
            };
            if head == Fuzzy::No {
                return Fuzzy::No;
            }
            head.and(match_args(rest, tail, hierarchy, check))
        }
    }
}

/// Whether an argument declared as `declared` can hold a value of type `expected`.
fn arg_matches(declared: &str, expected: &str, hierarchy: &TypeHierarchy<'_>) -> Fuzzy {
    if declared == expected {
        return Fuzzy::Yes;
    }
    if is_primitive(declared) {
        return Fuzzy::from_bool(boxed_assignable(declared, expected));
    }
    if is_primitive(expected) {
        return if boxed(expected) == Some(declared) {
            Fuzzy::Yes
        } else if BOXED_SUPERTYPES.contains(&declared) || declared == "java.lang.Number" {
            Fuzzy::Maybe
        } else {
            Fuzzy::No
        };
    }
    match hierarchy.is_assignable(declared, expected) {
        // A declared supertype may still carry an instance of the expected type.
        Fuzzy::No if hierarchy.is_assignable(expected, declared).is_possible() => Fuzzy::Maybe,
        other => other,
    }
}

fn arg_annotated(declared: &str, annotation: &str, hierarchy: &TypeHierarchy<'_>) -> Fuzzy {
    if is_primitive(declared) {
        return Fuzzy::No;
    }
    match hierarchy.load(declared) {
        Some(class) if class.has_annotation(annotation) => Fuzzy::Yes,
        Some(class) if class.is_final() => Fuzzy::No,
        _ => Fuzzy::Maybe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AopError;
    use crate::types::{AnnotationInfo, InMemoryClassSource};
    use std::collections::HashMap;

    const SERVICE: &str = "com.example.service.OrderService";

    fn classes() -> InMemoryClassSource {
        InMemoryClassSource::new()
            .with(ClassInfo::interface("com.example.service.Service"))
            .with(
                ClassInfo::new(SERVICE)
                    .implementing("com.example.service.Service")
                    .with_annotation(AnnotationInfo::new("com.example.Monitored"))
                    .with_method(MethodInfo::public("getOrder").with_params(&["long"]).returning("com.example.Order"))
                    .with_method(
                        MethodInfo::public("place")
                            .with_params(&["com.example.Order", "java.lang.String"])
                            .with_annotation(AnnotationInfo::new("com.example.Audited")),
                    ),
            )
            .with(ClassInfo::new("com.example.Order"))
            .with(
                ClassInfo::new("com.example.aspects.Pointcuts")
                    .with_method(MethodInfo::public("services").with_annotation(
                        AnnotationInfo::new(POINTCUT_ANNOTATION)
                            .with_string("value", "within(com.example.service..*)"),
                    ))
                    .with_method(
                        MethodInfo::public("ordered")
                            .with_params(&["com.example.Order"])
                            .with_param_names(&["order"])
                            .with_annotation(
                                AnnotationInfo::new(POINTCUT_ANNOTATION).with_string("value", "args(order,..)"),
                            ),
                    )
                    .with_method(MethodInfo::public("loopA").with_annotation(
                        AnnotationInfo::new(POINTCUT_ANNOTATION).with_string("value", "loopB()"),
                    ))
                    .with_method(MethodInfo::public("loopB").with_annotation(
                        AnnotationInfo::new(POINTCUT_ANNOTATION).with_string("value", "loopA()"),
                    )),
            )
    }

    fn eval(expression: &str, method: &str) -> crate::error::Result<Fuzzy> {
        eval_with(expression, method, HashMap::new(), Some("orderService"))
    }

    fn eval_with(
        expression: &str,
        method: &str,
        bindings: HashMap<String, String>,
        bean_name: Option<&str>,
    ) -> crate::error::Result<Fuzzy> {
        let source = classes();
        let hierarchy = TypeHierarchy::new(&source);
        let cx = CompileContext::new(hierarchy)
            .with_scope("com.example.aspects.Pointcuts")
            .with_bindings(bindings);
        let pointcut = compile_pointcut(expression, &cx)?;
        let class = hierarchy.load(SERVICE).unwrap();
        let method = class.methods.iter().find(|m| m.name == method).unwrap();
        let shadow = Shadow {
            class: &class,
            method,
            bean_name,
        };
        Ok(pointcut.evaluate(&shadow, &hierarchy))
    }

    #[test]
    fn execution_patterns() {
        assert_eq!(eval("execution(* com.example..*.get*(..))", "getOrder").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("execution(* com.example..*.get*(..))", "place").unwrap(), Fuzzy::No);
        assert_eq!(eval("execution(public com.example.Order *(long))", "getOrder").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("execution(void *(com.example.Order, String))", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("execution(* *(com.example.Order))", "place").unwrap(), Fuzzy::No);
        assert_eq!(eval("execution(@com.example.Audited * *(..))", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("execution(!static * *(..))", "place").unwrap(), Fuzzy::Yes);
    }

    #[test]
    fn negation_keeps_maybe_over_incomplete_hierarchy() {
        let source = classes().with(
            ClassInfo::new("com.example.legacy.LegacyService")
                .extending("com.vendor.MissingBase")
                .with_method(MethodInfo::public("run")),
        );
        let hierarchy = TypeHierarchy::new(&source);
        let cx = CompileContext::new(hierarchy);
        let legacy = hierarchy.load("com.example.legacy.LegacyService").unwrap();
        let shadow = Shadow {
            class: &legacy,
            method: &legacy.methods[0],
            bean_name: None,
        };
        let this = compile_pointcut("this(com.example.service.Service)", &cx).unwrap();
        let not_this = compile_pointcut("!this(com.example.service.Service)", &cx).unwrap();
        assert_eq!(this.evaluate(&shadow, &hierarchy), Fuzzy::Maybe);
        assert_eq!(not_this.evaluate(&shadow, &hierarchy), Fuzzy::Maybe);
        assert!(not_this.matches(&shadow, &hierarchy));

        let service = hierarchy.load(SERVICE).unwrap();
        let known = Shadow {
            class: &service,
            method: &service.methods[0],
            bean_name: None,
        };
        assert_eq!(not_this.evaluate(&known, &hierarchy), Fuzzy::No);
    }

    #[test]
    fn declaring_type_includes_interfaces_declaring_the_method() {
        let source = classes().with(
            ClassInfo::interface("com.example.service.Service")
                .with_method(MethodInfo::public("getOrder").with_params(&["long"])),
        );
        let hierarchy = TypeHierarchy::new(&source);
        let pointcut = compile_pointcut(
            "execution(* com.example.service.Service.*(..))",
            &CompileContext::new(hierarchy),
        )
        .unwrap();
        let class = hierarchy.load(SERVICE).unwrap();
        let get = class.methods.iter().find(|m| m.name == "getOrder").unwrap();
        let place = class.methods.iter().find(|m| m.name == "place").unwrap();
        let get = Shadow {
            class: &class,
            method: get,
            bean_name: None,
        };
        let place = Shadow { method: place, ..get };
        assert!(pointcut.matches(&get, &hierarchy));
        assert!(!pointcut.matches(&place, &hierarchy));
    }

    #[test]
    fn boolean_operators_and_word_forms() {
        assert_eq!(
            eval("within(com.example..*) && !execution(* get*(..))", "place").unwrap(),
            Fuzzy::Yes
        );
        assert_eq!(
            eval("within(com.other..*) or execution(* get*(..))", "getOrder").unwrap(),
            Fuzzy::Yes
        );
        assert_eq!(
            eval("not (within(com.example..*) and bean(order*))", "place").unwrap(),
            Fuzzy::No
        );
    }

    #[test]
    fn annotation_designators() {
        assert_eq!(eval("@annotation(com.example.Audited)", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("@annotation(com.example.Audited)", "getOrder").unwrap(), Fuzzy::No);
        assert_eq!(eval("@within(com.example.Monitored)", "getOrder").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("@target(com.example.Missing)", "getOrder").unwrap(), Fuzzy::No);
    }

    #[test]
    fn this_target_and_args_use_assignability() {
        assert_eq!(eval("target(com.example.service.Service)", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("this(com.example.Order)", "place").unwrap(), Fuzzy::No);
        assert_eq!(eval("args(com.example.Order, ..)", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("args(Long)", "getOrder").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("args(*, Object)", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("args()", "place").unwrap(), Fuzzy::No);
    }

    #[test]
    fn bean_without_name_is_undecided() {
        assert_eq!(
            eval_with("bean(order*)", "place", HashMap::new(), None).unwrap(),
            Fuzzy::Maybe
        );
        assert_eq!(eval("bean(payment*)", "place").unwrap(), Fuzzy::No);
    }

    #[test]
    fn bound_formals_take_the_advice_parameter_type() {
        let bindings = HashMap::from([("order".to_string(), "com.example.Order".to_string())]);
        assert_eq!(
            eval_with("execution(* place(..)) && args(order, ..)", "place", bindings.clone(), None).unwrap(),
            Fuzzy::Yes
        );
        assert_eq!(eval_with("args(order)", "getOrder", bindings.clone(), None).unwrap(), Fuzzy::No);
        assert_eq!(eval_with("args(order)", "place", bindings, None).unwrap(), Fuzzy::No);
        let err = eval("args(order, ..)", "place").unwrap_err();
        assert!(matches!(err, AopError::MalformedPointcut { ref reason, .. } if reason.contains("formal unbound")));
    }

    #[test]
    fn named_references_are_inlined() {
        assert_eq!(eval("services() && execution(* place(..))", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("com.example.aspects.Pointcuts.services()", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("ordered(*)", "place").unwrap(), Fuzzy::Yes);
        assert_eq!(eval("ordered(*)", "getOrder").unwrap(), Fuzzy::No);
    }

    #[test]
    fn reference_errors() {
        assert!(matches!(
            eval("missing()", "place").unwrap_err(),
            AopError::MalformedPointcut { ref reason, .. } if reason.contains("can't find referenced pointcut")
        ));
        assert!(matches!(
            eval("com.example.Gone.services()", "place").unwrap_err(),
            AopError::UnresolvedType { ref class_name } if class_name == "com.example.Gone"
        ));
        assert!(matches!(
            eval("loopA()", "place").unwrap_err(),
            AopError::MalformedPointcut { ref reason, .. } if reason.contains("circular")
        ));
    }

    #[test]
    fn rejects_unsupported_and_malformed_expressions() {
        for expression in [
            "call(* *(..))",
            "cflow(execution(* *(..)))",
            "execution(* *(..)",
            "execution(* *(..)) &&",
            "within()",
            "",
            "this(com.example.*)",
        ] {
            assert!(
                matches!(eval(expression, "place"), Err(AopError::MalformedPointcut { .. })),
                "{expression} should be rejected"
            );
        }
    }

    #[test]
    fn type_patterns_for_introductions() {
        let source = classes();
        let hierarchy = TypeHierarchy::new(&source);
        let cx = CompileContext::new(hierarchy);
        let pattern = compile_type_pattern("com.example.service.Service+ && !com.example.Order", &cx).unwrap();
        assert!(pattern.matches(SERVICE, &hierarchy));
        assert!(!pattern.matches("com.example.Order", &hierarchy));
        assert!(compile_type_pattern("com.example.(", &cx).is_err());
    }
}
