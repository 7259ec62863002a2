//! Project-scoped class resolution contexts, kept in a bounded LRU.
//!
//! A [`ProjectContext`] owns the project's [`ClassSource`] and the pass-scoped
//! matcher caches that depend on it; dropping the context on invalidation
//! drops every compiled matcher derived from stale class metadata.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::definition::{AspectDefinition, DefinitionKey};
use crate::error::Result;
use crate::matcher::{CompiledMatcher, MatcherCache};
use crate::types::{ClassSource, TypeHierarchy};

pub const DEFAULT_MAX_CONTEXTS: usize = 20;

/// Opens the class metadata source of a project (its outputs plus dependencies).
pub trait ClassSourceProvider: Send + Sync {
    fn open(&self, project: &str) -> Result<Arc<dyn ClassSource>>;
}

pub struct ProjectContext {
    project: String,
    classes: Arc<dyn ClassSource>,
    matchers: Mutex<MatcherCache>,
}

impl std::fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let matchers = self.matchers.lock();
        f.debug_struct("ProjectContext")
            .field("project", &self.project)
            .field("compiled", &matchers.compiled_count())
            .field("decisions", &matchers.decision_count())
            .finish()
    }
}

impl ProjectContext {
    pub fn new(project: impl Into<String>, classes: Arc<dyn ClassSource>) -> Self {
        Self {
            project: project.into(),
            classes,
            matchers: Mutex::new(MatcherCache::default()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn classes(&self) -> &dyn ClassSource {
        self.classes.as_ref()
    }

    pub fn hierarchy(&self) -> TypeHierarchy<'_> {
        TypeHierarchy::new(self.classes.as_ref())
    }

    /// Compiled matchers only live for one build pass.
    pub fn begin_pass(&self) {
        self.matchers.lock().clear();
    }

    pub fn matcher(&self, definition: &AspectDefinition) -> Result<Arc<CompiledMatcher>> {
        self.matchers.lock().matcher(definition, self.hierarchy())
    }

    /// Returns the memoized decision for the triple, computing it with `decide` once.
    pub fn decide(&self, key: &DefinitionKey, class: &str, method: &str, decide: impl FnOnce() -> bool) -> bool {
        if let Some(known) = self.matchers.lock().decision(key, class, method) {
            return known;
        }
        let matched = decide();
        self.matchers.lock().record(key.clone(), class, method, matched);
        matched
    }

    pub fn compiled_count(&self) -> usize {
        self.matchers.lock().compiled_count()
    }

    pub fn decision_count(&self) -> usize {
        self.matchers.lock().decision_count()
    }
}

pub struct ResolutionCache {
    provider: Arc<dyn ClassSourceProvider>,
    contexts: Mutex<LruCache<String, Arc<ProjectContext>>>,
}

impl ResolutionCache {
    pub fn new(provider: Arc<dyn ClassSourceProvider>, max_contexts: usize) -> Self {
        let capacity = NonZeroUsize::new(max_contexts).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            contexts: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the project's context, opening its class source on first use.
    pub fn context(&self, project: &str) -> Result<Arc<ProjectContext>> {
        if let Some(context) = self.contexts.lock().get(project) {
            return Ok(Arc::clone(context));
        }

        // Opened outside the lock; catalogs can take a while on large classpaths.
        let classes = self.provider.open(project)?;
        let context = Arc::new(ProjectContext::new(project, classes));

        let mut contexts = self.contexts.lock();
        if let Some(existing) = contexts.get(project) {
            return Ok(Arc::clone(existing));
        }
        if let Some((evicted, _)) = contexts.push(project.to_string(), Arc::clone(&context))
            && evicted != project
        {
            tracing::debug!(
                target = "aop.resolution",
                project = %evicted,
                "evicted least recently used project context"
            );
        }
        Ok(context)
    }

    /// Drops the project's context and every matcher compiled against it.
    pub fn invalidate(&self, project: &str) -> bool {
        let removed = self.contexts.lock().pop(project).is_some();
        if removed {
            tracing::debug!(target = "aop.resolution", project, "invalidated project context");
        }
        removed
    }

    /// Evicts the context of a closed or deleted project immediately.
    pub fn close_project(&self, project: &str) {
        if self.contexts.lock().pop(project).is_some() {
            tracing::debug!(target = "aop.resolution", project, "evicted context of closed project");
        }
    }

    pub fn contains(&self, project: &str) -> bool {
        self.contexts.lock().contains(project)
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.contexts.lock().cap().get()
    }
}
