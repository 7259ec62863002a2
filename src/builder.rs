//! Builds the reference model resource by resource.
//!
//! Each resource goes through CLEAR, EXTRACT, WALK-AND-MATCH and PUBLISH.
//! Failures of single definitions or candidates become diagnostics; only
//! cancellation stops a pass.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::beans::BeansProject;
use crate::definition::{AspectDefinition, DefinitionKind};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Severity, classify};
use crate::error::AopError;
use crate::matcher::{CompiledMatcher, eligible_methods};
use crate::model::{AopProject, AopReference, AopReferenceModel, Member};
use crate::pointcut::Shadow;
use crate::resolution::{ProjectContext, ResolutionCache};
use crate::walker::{self, Candidate};
use crate::xml_definitions;

/// Shared cancellation flag, checked before each resource.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait BuildListener: Send + Sync {
    fn resource_rebuilt(
        &self,
        _project: &str,
        _resource: &str,
        _references: &[AopReference],
        _diagnostics: &[Diagnostic],
    ) {
    }

    fn model_changed(&self, _project: &str) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub resource: String,
    pub definitions: usize,
    pub references: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub project: String,
    pub resources: Vec<ResourceReport>,
    pub cancelled: bool,
    pub duration_ms: u128,
}

impl BuildReport {
    pub fn reference_count(&self) -> usize {
        self.resources.iter().map(|r| r.references).sum()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.resources.iter().flat_map(|r| r.diagnostics.iter())
    }
}

pub struct ModelBuilder {
    model: Arc<AopReferenceModel>,
    cache: Arc<ResolutionCache>,
    listeners: Vec<Arc<dyn BuildListener>>,
}

impl ModelBuilder {
    pub fn new(model: Arc<AopReferenceModel>, cache: Arc<ResolutionCache>) -> Self {
        Self {
            model,
            cache,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn BuildListener>) {
        self.listeners.push(listener);
    }

    pub fn model(&self) -> &Arc<AopReferenceModel> {
        &self.model
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Rebuilds every configuration of `beans`, plus resources the model still
    /// holds references for but that are gone from the bean model.
    pub fn build_all(&self, beans: &BeansProject, token: &CancellationToken) -> BuildReport {
        let mut resources: BTreeSet<String> = beans.configs.keys().cloned().collect();
        if let Some(project) = self.model.project(&beans.name) {
            resources.extend(project.resources());
        }
        let resources: Vec<String> = resources.into_iter().collect();
        self.build(beans, &resources, token)
    }

    pub fn build(&self, beans: &BeansProject, resources: &[String], token: &CancellationToken) -> BuildReport {
        let started = Instant::now();
        let project = self.model.project_or_create(&beans.name);
        let mut report = BuildReport {
            project: beans.name.clone(),
            resources: Vec::new(),
            cancelled: false,
            duration_ms: 0,
        };

        let context = match self.cache.context(&beans.name) {
            Ok(context) => {
                context.begin_pass();
                Some(context)
            }
            Err(err) => {
                tracing::error!(target = "aop.builder", project = %beans.name, error = %err, "cannot open class source");
                None
            }
        };

        let mut seen = BTreeSet::new();
        for resource in resources {
            if !seen.insert(resource.as_str()) {
                continue;
            }
            if token.is_cancelled() {
                tracing::info!(target = "aop.builder", project = %beans.name, resource = %resource, "build cancelled");
                report.cancelled = true;
                break;
            }

            project.clear_resource(resource);
            let pass = match &context {
                Some(context) => self.build_resource(beans, resource, context),
                None => ResourcePass::failed(resource, "Unable to open the project's class path"),
            };
            report.resources.push(self.publish(&project, resource, pass));
        }

        if !report.resources.is_empty() {
            for listener in &self.listeners {
                listener.model_changed(&beans.name);
            }
        }

        report.duration_ms = started.elapsed().as_millis();
        tracing::info!(
            target = "aop.builder",
            project = %beans.name,
            resources = report.resources.len(),
            references = report.reference_count(),
            cancelled = report.cancelled,
            duration_ms = report.duration_ms as u64,
            "build pass finished"
        );
        report
    }

    fn build_resource(&self, beans: &BeansProject, resource: &str, context: &ProjectContext) -> ResourcePass {
        let mut pass = ResourcePass::default();
        if beans.config(resource).is_none() {
            tracing::debug!(target = "aop.builder", resource, "resource left the bean model");
            return pass;
        }

        let hierarchy = context.hierarchy();
        let extraction = match xml_definitions::extract(beans, resource, &hierarchy) {
            Ok(extraction) => extraction,
            Err(err) => {
                pass.diagnostics.insert(classify(&err, resource, -1, None));
                return pass;
            }
        };
        pass.diagnostics.extend(extraction.diagnostics);
        pass.definitions = extraction.definitions.len();
        if extraction.definitions.is_empty() {
            return pass;
        }

        let candidates = walker::candidates(beans, resource, &hierarchy);
        for definition in extraction.definitions.into_iter().map(Arc::new) {
            let matcher = match context.matcher(&definition) {
                Ok(matcher) => matcher,
                Err(err) => {
                    tracing::debug!(
                        target = "aop.builder",
                        resource,
                        bean = %definition.aspect_bean,
                        error = %err,
                        "definition skipped"
                    );
                    pass.diagnostics.insert(classify(&err, resource, definition.line, None));
                    continue;
                }
            };
            let aspect = walker::aspect_bean(beans, &definition);
            for candidate in candidates.iter().filter(|c| !c.is_bean(aspect)) {
                match_candidate(context, &definition, &matcher, candidate, &mut pass);
            }
        }
        pass
    }

    fn publish(&self, project: &AopProject, resource: &str, pass: ResourcePass) -> ResourceReport {
        let diagnostics: Vec<Diagnostic> = pass.diagnostics.into_iter().collect();
        for listener in &self.listeners {
            listener.resource_rebuilt(project.name(), resource, &pass.references, &diagnostics);
        }
        let report = ResourceReport {
            resource: resource.to_string(),
            definitions: pass.definitions,
            references: pass.references.len(),
            diagnostics,
        };
        tracing::debug!(
            target = "aop.builder",
            resource,
            definitions = report.definitions,
            references = report.references,
            diagnostics = report.diagnostics.len(),
            "published resource"
        );
        project.publish(resource, pass.references);
        report
    }
}

#[derive(Debug, Default)]
struct ResourcePass {
    definitions: usize,
    references: Vec<AopReference>,
    diagnostics: BTreeSet<Diagnostic>,
}

impl ResourcePass {
    fn failed(resource: &str, message: &str) -> Self {
        let mut pass = Self::default();
        pass.diagnostics.insert(Diagnostic::new(
            Severity::Error,
            DiagnosticKind::Other,
            resource,
            -1,
            message,
        ));
        pass
    }
}

fn match_candidate(
    context: &ProjectContext,
    definition: &Arc<AspectDefinition>,
    matcher: &CompiledMatcher,
    candidate: &Candidate,
    pass: &mut ResourcePass,
) {
    let hierarchy = context.hierarchy();
    let Some(class) = hierarchy.load(&candidate.class_name) else {
        let err = AopError::unresolved(&candidate.class_name);
        pass.diagnostics
            .insert(classify(&err, &candidate.resource, definition.line, Some(candidate.line)));
        return;
    };
    let key = definition.key();

    match &definition.kind {
        DefinitionKind::Advice(advice) => {
            for eligible in eligible_methods(&class, definition.proxy_target_class, &hierarchy) {
                let method = eligible.method();
                let shadow = Shadow {
                    class: &class,
                    method,
                    bean_name: Some(candidate.bean_name.as_str()),
                };
                let matched = if matcher.is_bean_independent() {
                    context.decide(&key, &class.name, &method.signature(), || {
                        matcher.matches_method(&shadow, &hierarchy)
                    })
                } else {
                    matcher.matches_method(&shadow, &hierarchy)
                };
                if matched {
                    pass.references.push(reference(
                        definition,
                        Member::Method {
                            class_name: definition.aspect_class.clone(),
                            name: advice.method_name.clone(),
                            parameter_types: advice.parameter_types.clone(),
                        },
                        Member::Method {
                            class_name: eligible.declaring_class.name.clone(),
                            name: method.name.clone(),
                            parameter_types: method.parameter_types.clone(),
                        },
                        candidate,
                    ));
                }
            }
        }
        DefinitionKind::Introduction(intro) => {
            if context.decide(&key, &class.name, "", || matcher.matches_type(&class, &hierarchy)) {
                let source = match &intro.field {
                    Some(field) => Member::Field {
                        class_name: definition.aspect_class.clone(),
                        name: field.clone(),
                    },
                    None => Member::Type {
                        class_name: intro.interface.clone(),
                    },
                };
                let target = Member::Type {
                    class_name: class.name.clone(),
                };
                pass.references.push(reference(definition, source, target, candidate));
            }
        }
    }
}

fn reference(definition: &Arc<AspectDefinition>, source: Member, target: Member, candidate: &Candidate) -> AopReference {
    AopReference {
        kind: definition.advice_kind(),
        source,
        target,
        definition: Arc::clone(definition),
        resource: definition.resource.clone(),
        target_bean: candidate.bean_name.clone(),
        target_resource: candidate.resource.clone(),
        target_line: candidate.line,
    }
}
