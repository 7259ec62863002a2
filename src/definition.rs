//! Aspect definitions shared by both extractors and the matcher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviceKind {
    Before,
    After,
    AfterReturning,
    AfterThrowing,
    Around,
    DeclareParents,
}

impl AdviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::AfterReturning => "after-returning",
            AdviceKind::AfterThrowing => "after-throwing",
            AdviceKind::Around => "around",
            AdviceKind::DeclareParents => "declare-parents",
        }
    }
}

/// The five kinds that carry an advice operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviceType {
    Before,
    After,
    AfterReturning,
    AfterThrowing,
    Around,
}

impl AdviceType {
    pub fn kind(self) -> AdviceKind {
        match self {
            AdviceType::Before => AdviceKind::Before,
            AdviceType::After => AdviceKind::After,
            AdviceType::AfterReturning => AdviceKind::AfterReturning,
            AdviceType::AfterThrowing => AdviceKind::AfterThrowing,
            AdviceType::Around => AdviceKind::Around,
        }
    }

    /// Maps an `aop:aspect` child element name.
    pub fn from_element(name: &str) -> Option<Self> {
        match name {
            "before" => Some(AdviceType::Before),
            "after" => Some(AdviceType::After),
            "after-returning" => Some(AdviceType::AfterReturning),
            "after-throwing" => Some(AdviceType::AfterThrowing),
            "around" => Some(AdviceType::Around),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionStyle {
    XmlAspect,
    XmlAdvisor,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceDefinition {
    pub advice_type: AdviceType,
    pub method_name: String,
    pub parameter_types: Vec<String>,
    /// Expression text after named-pointcut resolution.
    pub pointcut: String,
    /// Name of the referenced pointcut, when the expression came from one.
    pub pointcut_ref: Option<String>,
    pub arg_names: Option<Vec<String>>,
    pub returning: Option<String>,
    pub throwing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroductionDefinition {
    pub interface: String,
    pub default_impl: Option<String>,
    pub types_matching: String,
    /// Defining field for annotation-style introductions.
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefinitionKind {
    Advice(AdviceDefinition),
    Introduction(IntroductionDefinition),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectDefinition {
    pub aspect_bean: String,
    pub aspect_class: String,
    pub resource: String,
    pub line: i64,
    pub proxy_target_class: bool,
    pub style: DefinitionStyle,
    pub kind: DefinitionKind,
}

/// Identity of a definition within one build pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    pub resource: String,
    pub aspect_bean: String,
    pub line: i64,
    pub member: String,
    pub kind: AdviceKind,
    /// Pointcut or type pattern, plus binding names that shape the compiled matcher.
    pub expression: String,
}

impl AspectDefinition {
    pub fn advice_kind(&self) -> AdviceKind {
        match &self.kind {
            DefinitionKind::Advice(advice) => advice.advice_type.kind(),
            DefinitionKind::Introduction(_) => AdviceKind::DeclareParents,
        }
    }

    pub fn advice(&self) -> Option<&AdviceDefinition> {
        match &self.kind {
            DefinitionKind::Advice(advice) => Some(advice),
            DefinitionKind::Introduction(_) => None,
        }
    }

    pub fn introduction(&self) -> Option<&IntroductionDefinition> {
        match &self.kind {
            DefinitionKind::Introduction(intro) => Some(intro),
            DefinitionKind::Advice(_) => None,
        }
    }

    /// Pointcut expression or introduction type pattern.
    pub fn expression(&self) -> &str {
        match &self.kind {
            DefinitionKind::Advice(advice) => &advice.pointcut,
            DefinitionKind::Introduction(intro) => &intro.types_matching,
        }
    }

    pub fn key(&self) -> DefinitionKey {
        let (member, expression) = match &self.kind {
            DefinitionKind::Advice(advice) => (
                format!("{}({})", advice.method_name, advice.parameter_types.join(",")),
                format!(
                    "{} [{}|{}|{}]",
                    advice.pointcut,
                    advice.arg_names.as_deref().unwrap_or_default().join(","),
                    advice.returning.as_deref().unwrap_or(""),
                    advice.throwing.as_deref().unwrap_or("")
                ),
            ),
            DefinitionKind::Introduction(intro) => (
                format!("{}:{}", intro.field.as_deref().unwrap_or(""), intro.interface),
                intro.types_matching.clone(),
            ),
        };
        DefinitionKey {
            resource: self.resource.clone(),
            aspect_bean: self.aspect_bean.clone(),
            line: self.line,
            member,
            kind: self.advice_kind(),
            expression,
        }
    }
}

/// A named pointcut (`aop:pointcut`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPointcut {
    pub id: String,
    pub expression: String,
    pub line: i64,
}

/// Named pointcuts visible from inside one `aop:config` block.
#[derive(Debug, Clone, Default)]
pub struct PointcutScope {
    root: HashMap<String, NamedPointcut>,
    aspect: HashMap<String, NamedPointcut>,
}

impl PointcutScope {
    pub fn new(root: Vec<NamedPointcut>) -> Self {
        Self {
            root: root.into_iter().map(|p| (p.id.clone(), p)).collect(),
            aspect: HashMap::new(),
        }
    }

    /// Same root pointcuts, with `local` as the aspect-level scope.
    pub fn for_aspect(&self, local: Vec<NamedPointcut>) -> Self {
        Self {
            root: self.root.clone(),
            aspect: local.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Resolution order: inline expression on the element, then aspect scope, then root.
    pub fn resolve(&self, inline: Option<&str>, reference: Option<&str>) -> Option<String> {
        if let Some(expression) = inline {
            return Some(expression.to_string());
        }
        let reference = reference?;
        self.aspect
            .get(reference)
            .or_else(|| self.root.get(reference))
            .map(|p| p.expression.clone())
    }
}
