//! Enumerates the beans a definition may apply to.
//!
//! Walks the origin configuration, inner beans at any depth, and every
//! configuration that shares a configuration set with the origin. Sets are
//! not chained: a configuration only reachable through a sibling's other set
//! is out of view.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::beans::{BeanDefinition, BeansConfig, BeansProject};
use crate::definition::AspectDefinition;
use crate::types::TypeHierarchy;

pub const FACTORY_BEAN: &str = "org.springframework.beans.factory.FactoryBean";

/// A concrete bean whose class is a matching target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub bean_name: String,
    pub resource: String,
    pub line: i64,
    pub class_name: String,
}

impl Candidate {
    /// Whether this is the bean `name` declared in `resource`.
    pub fn is_bean(&self, (resource, name): (&str, &str)) -> bool {
        self.resource == resource && self.bean_name == name
    }
}

/// Resource and canonical name of the bean declaring `definition`.
///
/// Aspects may be referenced by a `name` alias, so the reference is looked up
/// the same way the extractor resolved it.
pub fn aspect_bean<'p>(project: &'p BeansProject, definition: &'p AspectDefinition) -> (&'p str, &'p str) {
    project
        .find_bean(&definition.resource, &definition.aspect_bean)
        .map(|(config, bean)| (config.resource.as_str(), bean.name.as_str()))
        .unwrap_or((definition.resource.as_str(), definition.aspect_bean.as_str()))
}

/// Candidate beans for definitions of `origin`, in walk order.
///
/// Abstract beans (and everything nested in them), beans without a
/// resolvable class name and factory beans are left out.
pub fn candidates(project: &BeansProject, origin: &str, hierarchy: &TypeHierarchy<'_>) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut factory_beans: HashMap<String, bool> = HashMap::new();
    let mut visited_configs = HashSet::new();
    let mut configs: VecDeque<&str> = VecDeque::from([origin]);
    configs.extend(project.siblings(origin));

    while let Some(resource) = configs.pop_front() {
        if !visited_configs.insert(resource) {
            continue;
        }
        let Some(config) = project.config(resource) else {
            tracing::debug!(target = "aop.walker", resource, "configuration not in bean model");
            continue;
        };

        let mut beans: VecDeque<&BeanDefinition> = config.beans.iter().collect();
        while let Some(bean) = beans.pop_front() {
            if bean.is_abstract {
                continue;
            }
            beans.extend(bean.inner_beans.iter());
            let Some(class_name) = config.resolve_class_name(bean) else {
                continue;
            };
            let is_factory = *factory_beans
                .entry(class_name.clone())
                .or_insert_with(|| hierarchy.supertypes(&class_name).names.contains(FACTORY_BEAN));
            if is_factory {
                tracing::trace!(target = "aop.walker", bean = %bean.name, class = %class_name, "skipping factory bean");
                continue;
            }
            out.push(candidate(config, bean, class_name));
        }
    }
    out
}

fn candidate(config: &BeansConfig, bean: &BeanDefinition, class_name: String) -> Candidate {
    Candidate {
        bean_name: bean.name.clone(),
        resource: config.resource.clone(),
        line: bean.line,
        class_name,
    }
}
