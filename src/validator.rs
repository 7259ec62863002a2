use std::collections::HashSet;

use crate::types::{ClassInfo, ClassSource, JAVA_LANG_OBJECT};

pub const ASPECT_ANNOTATION: &str = "org.aspectj.lang.annotation.Aspect";

/// Prefix of members generated by the AspectJ compiler for code-style aspects.
const AJC_MARKER_PREFIX: &str = "ajc$";

/// Per-clauses that depend on the call stack and cannot be modelled statically.
const UNSUPPORTED_PER_CLAUSES: &[&str] = &["percflow(", "percflowbelow("];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotFound(String),
    LoadFailed(String),
    NotAnnotated,
    CodeStyleAspect(String),
    UnsupportedInstantiationModel(String),
    ConcreteAspectSuperclass(String),
    CyclicHierarchy(String),
}

/// Whether `class_name` is an annotation-style aspect usable for static matching.
pub fn is_valid_aspect(class_name: &str, classes: &dyn ClassSource) -> bool {
    match validate_aspect(class_name, classes) {
        Ok(()) => true,
        Err(rejection) => {
            tracing::debug!(
                target = "aop.validator",
                class = class_name,
                reason = ?rejection,
                "class is not a supported aspect"
            );
            false
        }
    }
}

pub fn validate_aspect(class_name: &str, classes: &dyn ClassSource) -> Result<(), Rejection> {
    let class = load(class_name, classes)?;
    if !class.has_annotation(ASPECT_ANNOTATION) {
        return Err(Rejection::NotAnnotated);
    }
    check_class(&class)?;

    let mut seen = HashSet::from([class.name.clone()]);
    let mut next = class.super_name.clone();
    while let Some(super_name) = next.take() {
        if super_name == JAVA_LANG_OBJECT {
            break;
        }
        if !seen.insert(super_name.clone()) {
            return Err(Rejection::CyclicHierarchy(super_name));
        }
        let superclass = load(&super_name, classes)?;
        check_class(&superclass)?;
        if superclass.has_annotation(ASPECT_ANNOTATION) && !superclass.is_abstract() {
            return Err(Rejection::ConcreteAspectSuperclass(super_name));
        }
        next = superclass.super_name.clone();
    }
    Ok(())
}

fn load(class_name: &str, classes: &dyn ClassSource) -> Result<std::sync::Arc<ClassInfo>, Rejection> {
    match classes.load_class(class_name) {
        Ok(Some(class)) => Ok(class),
        Ok(None) => Err(Rejection::NotFound(class_name.to_string())),
        Err(err) => Err(Rejection::LoadFailed(err.to_string())),
    }
}

fn check_class(class: &ClassInfo) -> Result<(), Rejection> {
    if let Some(method) = class.methods.iter().find(|m| m.name.starts_with(AJC_MARKER_PREFIX)) {
        return Err(Rejection::CodeStyleAspect(method.name.clone()));
    }
    if let Some(per_clause) = class.annotation(ASPECT_ANNOTATION).and_then(|a| a.string("value")) {
        let per_clause = per_clause.trim();
        if UNSUPPORTED_PER_CLAUSES.iter().any(|p| per_clause.starts_with(p)) {
            return Err(Rejection::UnsupportedInstantiationModel(per_clause.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ACC_ABSTRACT, ACC_PUBLIC, AnnotationInfo, InMemoryClassSource, MethodInfo};

    fn aspect(name: &str) -> ClassInfo {
        ClassInfo::new(name).with_annotation(AnnotationInfo::new(ASPECT_ANNOTATION))
    }

    #[test]
    fn plain_annotated_class_is_valid() {
        let classes = InMemoryClassSource::new().with(aspect("com.example.Tracing"));
        assert!(is_valid_aspect("com.example.Tracing", &classes));
    }

    #[test]
    fn rejects_missing_annotation_and_missing_class() {
        let classes = InMemoryClassSource::new().with(ClassInfo::new("com.example.Plain"));
        assert_eq!(
            validate_aspect("com.example.Plain", &classes),
            Err(Rejection::NotAnnotated)
        );
        assert!(!is_valid_aspect("com.example.Missing", &classes));
    }

    #[test]
    fn rejects_code_style_aspects() {
        let classes = InMemoryClassSource::new()
            .with(aspect("com.example.Woven").with_method(MethodInfo::public("ajc$perSingletonInstance")));
        assert!(matches!(
            validate_aspect("com.example.Woven", &classes),
            Err(Rejection::CodeStyleAspect(_))
        ));
    }

    #[test]
    fn rejects_cflow_instantiation_models() {
        let per_cflow = ClassInfo::new("com.example.PerFlow").with_annotation(
            AnnotationInfo::new(ASPECT_ANNOTATION).with_string("value", "percflow(execution(* *(..)))"),
        );
        let per_target = ClassInfo::new("com.example.PerTarget").with_annotation(
            AnnotationInfo::new(ASPECT_ANNOTATION).with_string("value", "pertarget(execution(* *(..)))"),
        );
        let classes = InMemoryClassSource::new().with(per_cflow).with(per_target);
        assert!(!is_valid_aspect("com.example.PerFlow", &classes));
        assert!(is_valid_aspect("com.example.PerTarget", &classes));
    }

    #[test]
    fn aspect_superclass_must_be_abstract() {
        let classes = InMemoryClassSource::new()
            .with(aspect("com.example.ConcreteBase"))
            .with(aspect("com.example.Child").extending("com.example.ConcreteBase"))
            .with(aspect("com.example.AbstractBase").with_access(ACC_PUBLIC | ACC_ABSTRACT))
            .with(aspect("com.example.Good").extending("com.example.AbstractBase"))
            .with(ClassInfo::new("com.example.PlainBase"))
            .with(aspect("com.example.OverPlain").extending("com.example.PlainBase"));

        assert_eq!(
            validate_aspect("com.example.Child", &classes),
            Err(Rejection::ConcreteAspectSuperclass("com.example.ConcreteBase".to_string()))
        );
        assert!(is_valid_aspect("com.example.Good", &classes));
        assert!(is_valid_aspect("com.example.OverPlain", &classes));
    }

    #[test]
    fn unresolvable_superclass_is_not_valid() {
        let classes = InMemoryClassSource::new().with(aspect("com.example.Orphan").extending("com.example.Gone"));
        assert_eq!(
            validate_aspect("com.example.Orphan", &classes),
            Err(Rejection::NotFound("com.example.Gone".to_string()))
        );
    }
}
