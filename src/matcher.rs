//! Compiled per-definition matchers.
//!
//! A [`CompiledMatcher`] is built once per definition and build pass. Advice
//! definitions get a kind-specific [`AdviceAdapter`] that validates formal
//! bindings at compile time; introductions compile to a type matcher.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::definition::{AdviceDefinition, AdviceType, AspectDefinition, DefinitionKey, DefinitionKind, DefinitionStyle};
use crate::error::{AopError, Result};
use crate::pointcut::pattern::{boxed, boxed_assignable};
use crate::pointcut::{CompileContext, Pointcut, Shadow, TypePattern, compile_pointcut, compile_type_pattern};
use crate::types::{ClassInfo, JAVA_LANG_OBJECT, MethodInfo, TypeHierarchy, is_primitive};

pub const JOIN_POINT: &str = "org.aspectj.lang.JoinPoint";
pub const PROCEEDING_JOIN_POINT: &str = "org.aspectj.lang.ProceedingJoinPoint";
pub const JOIN_POINT_STATIC_PART: &str = "org.aspectj.lang.JoinPoint$StaticPart";

fn is_join_point(type_name: &str) -> bool {
    matches!(type_name, JOIN_POINT | PROCEEDING_JOIN_POINT | JOIN_POINT_STATIC_PART)
}

#[derive(Debug, Clone)]
pub struct AdviceAdapter {
    pub advice_type: AdviceType,
    /// Declared type of the `returning` formal, for after-returning advice.
    pub returning_type: Option<String>,
}

impl AdviceAdapter {
    fn accepts(&self, method: &MethodInfo, hierarchy: &TypeHierarchy<'_>) -> bool {
        match (self.advice_type, self.returning_type.as_deref()) {
            (AdviceType::AfterReturning, Some(expected)) => {
                return_value_assignable(&method.return_type, expected, hierarchy)
            }
            _ => true,
        }
    }
}

/// Whether some value returned from a method declared to return `declared`
/// could be passed to a `returning` formal of type `expected`.
fn return_value_assignable(declared: &str, expected: &str, hierarchy: &TypeHierarchy<'_>) -> bool {
    if expected == JAVA_LANG_OBJECT {
        return true;
    }
    if declared == "void" {
        return false;
    }
    if is_primitive(declared) {
        return declared == expected || boxed_assignable(declared, expected);
    }
    if is_primitive(expected) {
        return boxed(expected) == Some(declared);
    }
    hierarchy.is_assignable(declared, expected).is_possible() || hierarchy.is_assignable(expected, declared).is_possible()
}

#[derive(Debug, Clone)]
pub enum CompiledMatcher {
    Advice { pointcut: Pointcut, adapter: AdviceAdapter },
    Introduction { types: TypePattern },
}

impl CompiledMatcher {
    pub fn compile(definition: &AspectDefinition, hierarchy: TypeHierarchy<'_>) -> Result<Self> {
        let scope = CompileContext::new(hierarchy).with_scope(definition.aspect_class.clone());
        match &definition.kind {
            DefinitionKind::Introduction(intro) => compile_type_pattern(&intro.types_matching, &scope)
                .map(|types| CompiledMatcher::Introduction { types })
                .map_err(|e| {
                    e.wrap(format!(
                        "compiling type pattern of introduction {} on bean '{}'",
                        intro.interface, definition.aspect_bean
                    ))
                }),
            DefinitionKind::Advice(advice) => {
                let context = || {
                    format!(
                        "building {} matcher for {}.{}",
                        advice.advice_type.kind().as_str(),
                        definition.aspect_bean,
                        advice.method_name
                    )
                };
                let (bindings, returning_type) = bind_formals(definition, advice, &hierarchy).map_err(|e| e.wrap(context()))?;
                let pointcut =
                    compile_pointcut(&advice.pointcut, &scope.with_bindings(bindings)).map_err(|e| e.wrap(context()))?;
                Ok(CompiledMatcher::Advice {
                    pointcut,
                    adapter: AdviceAdapter {
                        advice_type: advice.advice_type,
                        returning_type,
                    },
                })
            }
        }
    }

    pub fn matches_method(&self, shadow: &Shadow<'_>, hierarchy: &TypeHierarchy<'_>) -> bool {
        match self {
            CompiledMatcher::Advice { pointcut, adapter } => {
                adapter.accepts(shadow.method, hierarchy) && pointcut.matches(shadow, hierarchy)
            }
            CompiledMatcher::Introduction { .. } => false,
        }
    }

    /// Method decisions can only be shared between beans of one class when
    /// the pointcut never looks at the bean name.
    pub fn is_bean_independent(&self) -> bool {
        match self {
            CompiledMatcher::Advice { pointcut, .. } => !pointcut.uses_bean_name(),
            CompiledMatcher::Introduction { .. } => true,
        }
    }

    pub fn matches_type(&self, class: &ClassInfo, hierarchy: &TypeHierarchy<'_>) -> bool {
        match self {
            CompiledMatcher::Introduction { types } => types.matches(&class.name, hierarchy),
            CompiledMatcher::Advice { .. } => false,
        }
    }
}

/// Binds formal names to advice parameter types and checks the
/// `returning`/`throwing` names against them.
fn bind_formals(
    definition: &AspectDefinition,
    advice: &AdviceDefinition,
    hierarchy: &TypeHierarchy<'_>,
) -> Result<(HashMap<String, String>, Option<String>)> {
    let params = &advice.parameter_types;
    let expression = advice.pointcut.as_str();

    // Advisors implement framework interfaces with fixed signatures and bind nothing.
    if definition.style == DefinitionStyle::XmlAdvisor {
        return Ok((HashMap::new(), None));
    }

    if advice.advice_type != AdviceType::Around && params.first().is_some_and(|p| p == PROCEEDING_JOIN_POINT) {
        return Err(AopError::malformed(
            expression,
            "ProceedingJoinPoint is only supported for around advice",
        ));
    }

    let names = advice.arg_names.clone().or_else(|| {
        advice_method(definition, advice, hierarchy).and_then(|method| method.parameter_names.clone())
    });

    let mut bindings = HashMap::new();
    if let Some(names) = names {
        let leading_join_point = params.first().is_some_and(|p| is_join_point(p));
        let typed = if names.len() == params.len() {
            &params[..]
        } else if leading_join_point && names.len() + 1 == params.len() {
            &params[1..]
        } else {
            return Err(AopError::malformed(
                expression,
                format!(
                    "argNames specifies {} names but the advice method has {} parameters",
                    names.len(),
                    params.len()
                ),
            ));
        };
        for (name, type_name) in names.into_iter().zip(typed) {
            if !is_join_point(type_name) {
                bindings.insert(name, type_name.clone());
            }
        }
    }

    let returning_type = match advice.returning.as_deref() {
        Some(name) => Some(bindings.remove(name).ok_or_else(|| {
            AopError::malformed(
                expression,
                format!("Returning argument name '{name}' was not bound in advice arguments"),
            )
        })?),
        None => None,
    };
    if let Some(name) = advice.throwing.as_deref() {
        bindings.remove(name).ok_or_else(|| {
            AopError::malformed(
                expression,
                format!("Throwing argument name '{name}' was not bound in advice arguments"),
            )
        })?;
    }
    Ok((bindings, returning_type))
}

fn advice_method(
    definition: &AspectDefinition,
    advice: &AdviceDefinition,
    hierarchy: &TypeHierarchy<'_>,
) -> Option<MethodInfo> {
    let class = hierarchy.load(&definition.aspect_class)?;
    hierarchy.superclass_chain(&class).into_iter().find_map(|c| {
        c.methods
            .iter()
            .find(|m| m.name == advice.method_name && m.parameter_types == advice.parameter_types)
            .cloned()
    })
}

/// A proxied operation together with the class of the hierarchy declaring it.
#[derive(Debug, Clone)]
pub struct EligibleMethod {
    pub declaring_class: Arc<ClassInfo>,
    index: usize,
}

impl EligibleMethod {
    pub fn method(&self) -> &MethodInfo {
        &self.declaring_class.methods[self.index]
    }
}

/// Operations a proxy for `class` could intercept, nearest declaration first.
///
/// Inherited operations count; an override hides the superclass declaration
/// of the same signature. Without `proxy_target_class` the operation must
/// also be declared on an interface the class implements, since only
/// interface methods are proxied.
pub fn eligible_methods(
    class: &Arc<ClassInfo>,
    proxy_target_class: bool,
    hierarchy: &TypeHierarchy<'_>,
) -> Vec<EligibleMethod> {
    let interfaces = if proxy_target_class {
        Vec::new()
    } else {
        hierarchy.interface_closure(class)
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for declaring in hierarchy.superclass_chain(class) {
        for (index, method) in declaring.methods.iter().enumerate() {
            if method.is_initializer() || !seen.insert(method.signature()) {
                continue;
            }
            if !method.is_public() || method.is_static() || method.is_synthetic() {
                continue;
            }
            if proxy_target_class || interfaces.iter().any(|i| i.declares(method)) {
                out.push(EligibleMethod {
                    declaring_class: Arc::clone(&declaring),
                    index,
                });
            }
        }
    }
    out
}

type DecisionKey = (DefinitionKey, String, String);

/// Compiled matchers and match decisions for one build pass.
#[derive(Debug, Default)]
pub struct MatcherCache {
    matchers: HashMap<DefinitionKey, std::result::Result<Arc<CompiledMatcher>, AopError>>,
    decisions: HashMap<DecisionKey, bool>,
}

impl MatcherCache {
    pub fn clear(&mut self) {
        self.matchers.clear();
        self.decisions.clear();
    }

    /// Returns the cached matcher for `definition`, compiling it on first use.
    /// Compile failures are cached too and replayed on later lookups.
    pub fn matcher(&mut self, definition: &AspectDefinition, hierarchy: TypeHierarchy<'_>) -> Result<Arc<CompiledMatcher>> {
        self.matchers
            .entry(definition.key())
            .or_insert_with(|| CompiledMatcher::compile(definition, hierarchy).map(Arc::new))
            .clone()
    }

    pub fn decision(&self, key: &DefinitionKey, class: &str, method: &str) -> Option<bool> {
        self.decisions
            .get(&(key.clone(), class.to_string(), method.to_string()))
            .copied()
    }

    pub fn record(&mut self, key: DefinitionKey, class: &str, method: &str, matched: bool) {
        self.decisions.insert((key, class.to_string(), method.to_string()), matched);
    }

    pub fn compiled_count(&self) -> usize {
        self.matchers.len()
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }
}
