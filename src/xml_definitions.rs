//! Definitions declared in the `aop` XML namespace of a beans configuration.
//!
//! Two independent passes run over a document: `aop:config` blocks (advisors,
//! aspects, introductions) and `aop:aspectj-autoproxy`, which selects
//! annotation-style aspect beans for the annotation extractor.

use regex::Regex;
use std::sync::Arc;

use crate::annotation_definitions::{self, AspectBean, split_arg_names};
use crate::beans::{BeansConfig, BeansProject, attribute, line_of};
use crate::definition::{
    AdviceDefinition, AdviceType, AspectDefinition, DefinitionKind, DefinitionStyle, IntroductionDefinition,
    NamedPointcut, PointcutScope,
};
use crate::diagnostics::{Diagnostic, classify};
use crate::error::{AopError, Result};
use crate::types::{ClassInfo, TypeHierarchy};
use crate::validator;

pub const AOP_NAMESPACE: &str = "http://www.springframework.org/schema/aop";

struct AdvisorInterface {
    interface: &'static str,
    advice_type: AdviceType,
    method: &'static str,
    parameter_types: &'static [&'static str],
}

const ADVISOR_INTERFACES: &[AdvisorInterface] = &[
    AdvisorInterface {
        interface: "org.aopalliance.intercept.MethodInterceptor",
        advice_type: AdviceType::Around,
        method: "invoke",
        parameter_types: &["org.aopalliance.intercept.MethodInvocation"],
    },
    AdvisorInterface {
        interface: "org.springframework.aop.MethodBeforeAdvice",
        advice_type: AdviceType::Before,
        method: "before",
        parameter_types: &["java.lang.reflect.Method", "java.lang.Object[]", "java.lang.Object"],
    },
    AdvisorInterface {
        interface: "org.springframework.aop.AfterReturningAdvice",
        advice_type: AdviceType::AfterReturning,
        method: "afterReturning",
        parameter_types: &[
            "java.lang.Object",
            "java.lang.reflect.Method",
            "java.lang.Object[]",
            "java.lang.Object",
        ],
    },
    AdvisorInterface {
        interface: "org.springframework.aop.ThrowsAdvice",
        advice_type: AdviceType::AfterThrowing,
        method: "afterThrowing",
        parameter_types: &[
            "java.lang.reflect.Method",
            "java.lang.Object[]",
            "java.lang.Object",
            "java.lang.Exception",
        ],
    },
];

/// Definitions of one resource plus the problems met while extracting them.
#[derive(Debug, Default)]
pub struct Extraction {
    pub definitions: Vec<AspectDefinition>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs both the `aop:config` and the auto-proxy pass over `resource`.
pub fn extract(project: &BeansProject, resource: &str, hierarchy: &TypeHierarchy<'_>) -> Result<Extraction> {
    let config = project
        .config(resource)
        .ok_or_else(|| AopError::Other(format!("unknown configuration {resource}")))?;
    let doc = roxmltree::Document::parse(&config.text).map_err(|e| AopError::Xml {
        resource: resource.to_string(),
        message: e.to_string(),
    })?;

    let mut extractor = Extractor {
        project,
        config,
        doc: &doc,
        hierarchy: *hierarchy,
        out: Extraction::default(),
    };
    for node in doc.descendants().filter(|n| is_aop(*n, "config")) {
        extractor.config_block(node);
    }
    extractor.autoproxy();

    tracing::debug!(
        target = "aop.xml",
        resource,
        definitions = extractor.out.definitions.len(),
        diagnostics = extractor.out.diagnostics.len(),
        "extracted definitions"
    );
    Ok(extractor.out)
}

fn is_aop(node: roxmltree::Node<'_, '_>, local_name: &str) -> bool {
    node.is_element() && node.tag_name().name() == local_name && node.tag_name().namespace() == Some(AOP_NAMESPACE)
}

fn aop_children<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().namespace() == Some(AOP_NAMESPACE))
}

struct Extractor<'a, 'doc, 'input> {
    project: &'a BeansProject,
    config: &'a BeansConfig,
    doc: &'doc roxmltree::Document<'input>,
    hierarchy: TypeHierarchy<'a>,
    out: Extraction,
}

impl<'a, 'doc, 'input> Extractor<'a, 'doc, 'input> {
    fn resource(&self) -> &'a str {
        &self.config.resource
    }

    fn line(&self, node: roxmltree::Node<'_, '_>) -> i64 {
        line_of(self.doc, node)
    }

    fn warn(&mut self, line: i64, message: String) {
        let resource = self.resource();
        tracing::warn!(target = "aop.xml", resource, line, "{message}");
        self.out.diagnostics.push(Diagnostic::warning(resource, line, message));
    }

    fn error(&mut self, err: &AopError, line: i64) {
        let resource = self.resource();
        tracing::warn!(target = "aop.xml", resource, line, error = %err, "extraction failed");
        self.out.diagnostics.push(classify(err, resource, line, None));
    }

    /// Resolves a bean in this configuration or a configuration-set sibling to
    /// its canonical name and class name.
    fn bean_class(&mut self, bean_name: &str, line: i64) -> Option<(String, String)> {
        let Some((config, bean)) = self.project.find_bean(self.resource(), bean_name) else {
            self.warn(line, format!("Bean '{bean_name}' not found"));
            return None;
        };
        let Some(class_name) = config.resolve_class_name(bean) else {
            self.warn(line, format!("Bean '{bean_name}' has no resolvable class"));
            return None;
        };
        Some((bean.name.clone(), class_name))
    }

    fn named_pointcuts(&self, node: roxmltree::Node<'_, '_>) -> Vec<NamedPointcut> {
        aop_children(node)
            .filter(|c| c.tag_name().name() == "pointcut")
            .filter_map(|c| {
                Some(NamedPointcut {
                    id: attribute(c, "id")?.to_string(),
                    expression: attribute(c, "expression")?.to_string(),
                    line: self.line(c),
                })
            })
            .collect()
    }

    fn config_block(&mut self, node: roxmltree::Node<'_, '_>) {
        let proxy_target_class = attribute(node, "proxy-target-class") == Some("true");
        let scope = PointcutScope::new(self.named_pointcuts(node));
        for child in aop_children(node) {
            match child.tag_name().name() {
                "advisor" => self.advisor(child, &scope, proxy_target_class),
                "aspect" => self.aspect(child, &scope, proxy_target_class),
                _ => {}
            }
        }
    }

    fn advisor(&mut self, node: roxmltree::Node<'_, '_>, scope: &PointcutScope, proxy_target_class: bool) {
        let line = self.line(node);
        let Some(advice_ref) = attribute(node, "advice-ref") else {
            self.warn(line, "Advisor without 'advice-ref'".to_string());
            return;
        };
        let pointcut_ref = attribute(node, "pointcut-ref");
        let Some(pointcut) = scope.resolve(attribute(node, "pointcut"), pointcut_ref) else {
            self.warn(line, format!("Unable to resolve pointcut of advisor '{advice_ref}'"));
            return;
        };
        let Some((advice_bean, class_name)) = self.bean_class(advice_ref, line) else {
            return;
        };
        if self.hierarchy.load(&class_name).is_none() {
            self.error(&AopError::unresolved(&class_name), line);
            return;
        }

        let supertypes = self.hierarchy.supertypes(&class_name).names;
        let mut produced = 0;
        for advisor in ADVISOR_INTERFACES.iter().filter(|a| supertypes.contains(a.interface)) {
            produced += 1;
            self.out.definitions.push(AspectDefinition {
                aspect_bean: advice_bean.clone(),
                aspect_class: class_name.clone(),
                resource: self.resource().to_string(),
                line,
                proxy_target_class,
                style: DefinitionStyle::XmlAdvisor,
                kind: DefinitionKind::Advice(AdviceDefinition {
                    advice_type: advisor.advice_type,
                    method_name: advisor.method.to_string(),
                    parameter_types: advisor.parameter_types.iter().map(|p| p.to_string()).collect(),
                    pointcut: pointcut.clone(),
                    pointcut_ref: pointcut_ref.map(str::to_string),
                    arg_names: None,
                    returning: None,
                    throwing: None,
                }),
            });
        }
        if produced == 0 {
            self.warn(
                line,
                format!("Advice bean '{advice_ref}' ({class_name}) implements no supported advice interface"),
            );
        }
    }

    fn aspect(&mut self, node: roxmltree::Node<'_, '_>, root: &PointcutScope, proxy_target_class: bool) {
        let line = self.line(node);
        let Some(bean_ref) = attribute(node, "ref") else {
            self.warn(line, "Aspect without 'ref'".to_string());
            return;
        };
        let Some((aspect_bean, class_name)) = self.bean_class(bean_ref, line) else {
            return;
        };
        let Some(class) = self.hierarchy.load(&class_name) else {
            self.error(&AopError::unresolved(&class_name), line);
            return;
        };
        let scope = root.for_aspect(self.named_pointcuts(node));

        for child in aop_children(node) {
            let child_line = self.line(child);
            let element = child.tag_name().name();
            let kind = if let Some(advice_type) = AdviceType::from_element(element) {
                self.advice(child, child_line, advice_type, &scope, &class)
            } else if element == "declare-parents" {
                self.declare_parents(child, child_line)
            } else {
                continue;
            };
            if let Some(kind) = kind {
                self.out.definitions.push(AspectDefinition {
                    aspect_bean: aspect_bean.clone(),
                    aspect_class: class_name.clone(),
                    resource: self.resource().to_string(),
                    line: child_line,
                    proxy_target_class,
                    style: DefinitionStyle::XmlAspect,
                    kind,
                });
            }
        }
    }

    fn advice(
        &mut self,
        node: roxmltree::Node<'_, '_>,
        line: i64,
        advice_type: AdviceType,
        scope: &PointcutScope,
        class: &Arc<ClassInfo>,
    ) -> Option<DefinitionKind> {
        let Some(method_name) = attribute(node, "method") else {
            self.warn(line, format!("<{}> without 'method'", advice_type.kind().as_str()));
            return None;
        };
        let pointcut_ref = attribute(node, "pointcut-ref");
        let Some(pointcut) = scope.resolve(attribute(node, "pointcut"), pointcut_ref) else {
            self.warn(
                line,
                format!("Unable to resolve pointcut reference '{}'", pointcut_ref.unwrap_or_default()),
            );
            return None;
        };
        let Some(parameter_types) = self.advice_parameter_types(class, method_name) else {
            self.warn(line, format!("Advice method '{method_name}' not found on {}", class.name));
            return None;
        };

        Some(DefinitionKind::Advice(AdviceDefinition {
            advice_type,
            method_name: method_name.to_string(),
            parameter_types,
            pointcut,
            pointcut_ref: pointcut_ref.map(str::to_string),
            arg_names: attribute(node, "arg-names").map(split_arg_names),
            returning: (advice_type == AdviceType::AfterReturning)
                .then(|| attribute(node, "returning").map(str::to_string))
                .flatten(),
            throwing: (advice_type == AdviceType::AfterThrowing)
                .then(|| attribute(node, "throwing").map(str::to_string))
                .flatten(),
        }))
    }

    /// Parameter types of the overload with the fewest parameters, searching superclasses.
    fn advice_parameter_types(
        &self,
        class: &Arc<ClassInfo>,
        method_name: &str,
    ) -> Option<Vec<String>> {
        self.hierarchy
            .superclass_chain(class)
            .iter()
            .flat_map(|c| c.methods.iter())
            .filter(|m| m.name == method_name && !m.is_initializer())
            .min_by_key(|m| m.parameter_types.len())
            .map(|m| m.parameter_types.clone())
    }

    fn declare_parents(&mut self, node: roxmltree::Node<'_, '_>, line: i64) -> Option<DefinitionKind> {
        let (Some(types_matching), Some(interface)) =
            (attribute(node, "types-matching"), attribute(node, "implement-interface"))
        else {
            self.warn(
                line,
                "<declare-parents> requires 'types-matching' and 'implement-interface'".to_string(),
            );
            return None;
        };
        Some(DefinitionKind::Introduction(IntroductionDefinition {
            interface: interface.to_string(),
            default_impl: attribute(node, "default-impl").map(str::to_string),
            types_matching: types_matching.to_string(),
            field: None,
        }))
    }

    fn autoproxy(&mut self) {
        let elements: Vec<_> = self.doc.descendants().filter(|n| is_aop(*n, "aspectj-autoproxy")).collect();
        if elements.is_empty() {
            return;
        }
        let proxy_target_class = elements
            .iter()
            .any(|n| attribute(*n, "proxy-target-class") == Some("true"));
        let includes = self.include_patterns(&elements);

        for bean in self.config.beans.iter().filter(|b| !b.is_abstract) {
            if let Some(patterns) = &includes
                && !patterns.iter().any(|p| p.is_match(&bean.name))
            {
                continue;
            }
            let Some(class_name) = self.config.resolve_class_name(bean) else {
                continue;
            };
            if !validator::is_valid_aspect(&class_name, self.hierarchy.source()) {
                continue;
            }
            let aspect = AspectBean {
                name: &bean.name,
                class_name: &class_name,
                resource: self.resource(),
                line: bean.line,
                proxy_target_class,
            };
            match annotation_definitions::extract(aspect, &self.hierarchy) {
                Ok(definitions) => self.out.definitions.extend(definitions),
                Err(err) => self.error(&err, bean.line),
            }
        }
    }

    /// `None` includes every bean; `Some(empty)` includes none.
    fn include_patterns(&mut self, elements: &[roxmltree::Node<'_, '_>]) -> Option<Vec<Regex>> {
        let includes: Vec<_> = elements
            .iter()
            .flat_map(|n| aop_children(*n).filter(|c| c.tag_name().name() == "include"))
            .collect();
        if includes.is_empty() {
            return None;
        }
        let mut patterns = Vec::new();
        for include in includes {
            let Some(name) = attribute(include, "name") else {
                continue;
            };
            match Regex::new(&format!("^(?:{name})$")) {
                Ok(pattern) => patterns.push(pattern),
                Err(err) => {
                    let line = self.line(include);
                    self.warn(line, format!("Invalid include pattern '{name}': {err}"));
                }
            }
        }
        Some(patterns)
    }
}
