//! Definitions declared with `@AspectJ` annotations on a compiled aspect class.

use std::collections::HashSet;

use crate::definition::{
    AdviceDefinition, AdviceType, AspectDefinition, DefinitionKind, DefinitionStyle, IntroductionDefinition,
};
use crate::error::{AopError, Result};
use crate::types::{AnnotationInfo, TypeHierarchy};

const ADVICE_ANNOTATIONS: &[(&str, AdviceType)] = &[
    ("org.aspectj.lang.annotation.Before", AdviceType::Before),
    ("org.aspectj.lang.annotation.After", AdviceType::After),
    ("org.aspectj.lang.annotation.AfterReturning", AdviceType::AfterReturning),
    ("org.aspectj.lang.annotation.AfterThrowing", AdviceType::AfterThrowing),
    ("org.aspectj.lang.annotation.Around", AdviceType::Around),
];

pub const DECLARE_PARENTS: &str = "org.aspectj.lang.annotation.DeclareParents";

/// The bean backing an annotation-style aspect.
#[derive(Debug, Clone, Copy)]
pub struct AspectBean<'a> {
    pub name: &'a str,
    pub class_name: &'a str,
    pub resource: &'a str,
    pub line: i64,
    pub proxy_target_class: bool,
}

/// Extracts advice and introductions from `bean`'s class and its superclasses.
///
/// Only an unloadable aspect class is an error; a single unusable annotation
/// is logged and skipped.
pub fn extract(bean: AspectBean<'_>, hierarchy: &TypeHierarchy<'_>) -> Result<Vec<AspectDefinition>> {
    let class = hierarchy
        .load(bean.class_name)
        .ok_or_else(|| AopError::unresolved(bean.class_name))?;

    let definition = |kind| AspectDefinition {
        aspect_bean: bean.name.to_string(),
        aspect_class: bean.class_name.to_string(),
        resource: bean.resource.to_string(),
        line: bean.line,
        proxy_target_class: bean.proxy_target_class,
        style: DefinitionStyle::Annotation,
        kind,
    };

    let mut definitions = Vec::new();
    let mut seen_methods = HashSet::new();
    let mut seen_fields = HashSet::new();
    for owner in hierarchy.superclass_chain(&class) {
        for method in &owner.methods {
            if method.is_initializer() || !seen_methods.insert(method.signature()) {
                continue;
            }
            for (annotation_type, advice_type) in ADVICE_ANNOTATIONS {
                let Some(annotation) = method.annotation(annotation_type) else {
                    continue;
                };
                match advice_from_annotation(annotation, *advice_type) {
                    Some(advice) => definitions.push(definition(DefinitionKind::Advice(AdviceDefinition {
                        method_name: method.name.clone(),
                        parameter_types: method.parameter_types.clone(),
                        ..advice
                    }))),
                    None => tracing::warn!(
                        target = "aop.annotations",
                        class = %owner.name,
                        method = %method.name,
                        annotation = annotation_type,
                        "advice annotation has no pointcut expression"
                    ),
                }
            }
        }

        for field in &owner.fields {
            if !seen_fields.insert(field.name.clone()) {
                continue;
            }
            let Some(annotation) = field.annotation(DECLARE_PARENTS) else {
                continue;
            };
            let Some(types_matching) = annotation.string("value") else {
                tracing::warn!(
                    target = "aop.annotations",
                    class = %owner.name,
                    field = %field.name,
                    "@DeclareParents has no type pattern"
                );
                continue;
            };
            definitions.push(definition(DefinitionKind::Introduction(IntroductionDefinition {
                interface: field.field_type.clone(),
                default_impl: annotation
                    .class_value("defaultImpl")
                    .filter(|c| *c != DECLARE_PARENTS)
                    .map(str::to_string),
                types_matching: types_matching.to_string(),
                field: Some(field.name.clone()),
            })));
        }
    }

    tracing::debug!(
        target = "aop.annotations",
        bean = bean.name,
        class = bean.class_name,
        definitions = definitions.len(),
        "extracted annotation-style definitions"
    );
    Ok(definitions)
}

/// Fills everything but the method identity from the annotation's attributes.
fn advice_from_annotation(annotation: &AnnotationInfo, advice_type: AdviceType) -> Option<AdviceDefinition> {
    let binds_result = matches!(advice_type, AdviceType::AfterReturning | AdviceType::AfterThrowing);
    let pointcut = binds_result
        .then(|| annotation.string("pointcut"))
        .flatten()
        .or_else(|| annotation.string("value"))?;

    Some(AdviceDefinition {
        advice_type,
        method_name: String::new(),
        parameter_types: Vec::new(),
        pointcut: pointcut.to_string(),
        pointcut_ref: None,
        arg_names: annotation.string("argNames").map(split_arg_names),
        returning: (advice_type == AdviceType::AfterReturning)
            .then(|| annotation.string("returning").map(str::to_string))
            .flatten(),
        throwing: (advice_type == AdviceType::AfterThrowing)
            .then(|| annotation.string("throwing").map(str::to_string))
            .flatten(),
    })
}

pub fn split_arg_names(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}
