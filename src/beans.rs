//! Spring bean configuration model.
//!
//! Parses `<beans>` XML documents into bean definitions with their inner beans,
//! and groups configurations into configuration sets. Only the structure the
//! AOP analysis needs is kept: names, classes, parent chains, abstract flags
//! and declaration lines.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::{AopError, Result};

pub const BEANS_NAMESPACE: &str = "http://www.springframework.org/schema/beans";

/// Elements whose nested `<bean>` children are inner beans of the enclosing bean.
const INNER_BEAN_CONTAINERS: &[&str] = &[
    "property",
    "constructor-arg",
    "list",
    "set",
    "map",
    "entry",
    "key",
    "array",
    "props",
    "value",
    "lookup-method",
    "replaced-method",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeanDefinition {
    pub name: String,
    pub aliases: Vec<String>,
    pub class_name: Option<String>,
    pub parent: Option<String>,
    pub is_abstract: bool,
    pub line: i64,
    pub inner_beans: Vec<BeanDefinition>,
}

impl BeanDefinition {
    pub fn new(name: impl Into<String>, class_name: Option<&str>, line: i64) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            class_name: class_name.map(str::to_string),
            parent: None,
            is_abstract: false,
            line,
            inner_beans: Vec::new(),
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeansConfig {
    pub resource: String,
    pub text: String,
    pub beans: Vec<BeanDefinition>,
}

impl BeansConfig {
    pub fn parse(resource: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let resource = resource.into();
        let text = text.into();
        let doc = roxmltree::Document::parse(&text).map_err(|e| AopError::Xml {
            resource: resource.clone(),
            message: e.to_string(),
        })?;

        let mut beans = Vec::new();
        let mut counter = 0usize;
        collect_top_level(&doc, doc.root_element(), &mut beans, &mut counter);

        Ok(Self { resource, text, beans })
    }

    /// Top-level bean by id, name or alias.
    pub fn bean(&self, name: &str) -> Option<&BeanDefinition> {
        self.beans.iter().find(|b| b.has_name(name))
    }

    /// Resolves the implementation class, following `parent` references inside
    /// this configuration when the bean declares no class itself.
    pub fn resolve_class_name(&self, bean: &BeanDefinition) -> Option<String> {
        let mut current = bean;
        let mut seen = HashSet::new();
        loop {
            if let Some(class) = current.class_name.as_ref() {
                return Some(class.clone());
            }
            let parent = current.parent.as_deref()?;
            if !seen.insert(parent.to_string()) {
                return None;
            }
            current = self.bean(parent)?;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSet {
    pub name: String,
    pub configs: Vec<String>,
}

/// All configurations and configuration sets of one project.
#[derive(Debug, Clone, Default)]
pub struct BeansProject {
    pub name: String,
    pub configs: BTreeMap<String, BeansConfig>,
    pub config_sets: Vec<ConfigSet>,
}

impl BeansProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_config(&mut self, config: BeansConfig) {
        self.configs.insert(config.resource.clone(), config);
    }

    pub fn add_config_set(&mut self, name: impl Into<String>, configs: &[&str]) {
        self.config_sets.push(ConfigSet {
            name: name.into(),
            configs: configs.iter().map(|c| c.to_string()).collect(),
        });
    }

    pub fn config(&self, resource: &str) -> Option<&BeansConfig> {
        self.configs.get(resource)
    }

    pub fn config_sets_containing(&self, resource: &str) -> impl Iterator<Item = &ConfigSet> {
        self.config_sets
            .iter()
            .filter(move |set| set.configs.iter().any(|c| c == resource))
    }

    /// Configurations sharing at least one configuration set with `resource`, in set order.
    pub fn siblings(&self, resource: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for set in self.config_sets_containing(resource) {
            for config in &set.configs {
                if config != resource && !out.contains(&config.as_str()) {
                    out.push(config.as_str());
                }
            }
        }
        out
    }

    /// Looks a top-level bean up in `resource` first, then in its configuration-set siblings.
    pub fn find_bean(&self, resource: &str, name: &str) -> Option<(&BeansConfig, &BeanDefinition)> {
        let local = self.config(resource).and_then(|c| c.bean(name).map(|b| (c, b)));
        local.or_else(|| {
            self.siblings(resource)
                .into_iter()
                .filter_map(|r| self.config(r))
                .find_map(|c| c.bean(name).map(|b| (c, b)))
        })
    }
}

pub(crate) fn line_of(doc: &roxmltree::Document<'_>, node: roxmltree::Node<'_, '_>) -> i64 {
    doc.text_pos_at(node.range().start).row as i64
}

pub(crate) fn attribute<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name).map(str::trim).filter(|v| !v.is_empty())
}

fn is_beans_element(node: roxmltree::Node<'_, '_>, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && matches!(node.tag_name().namespace(), None | Some(BEANS_NAMESPACE))
}

fn collect_top_level(
    doc: &roxmltree::Document<'_>,
    beans_element: roxmltree::Node<'_, '_>,
    out: &mut Vec<BeanDefinition>,
    counter: &mut usize,
) {
    for child in beans_element.children() {
        if is_beans_element(child, "bean") {
            out.push(parse_bean(doc, child, None, counter));
        } else if is_beans_element(child, "beans") {
            collect_top_level(doc, child, out, counter);
        }
    }
}

fn parse_bean(
    doc: &roxmltree::Document<'_>,
    node: roxmltree::Node<'_, '_>,
    outer: Option<&str>,
    counter: &mut usize,
) -> BeanDefinition {
    let class_name = attribute(node, "class").map(str::to_string);
    let mut names: Vec<String> = attribute(node, "name")
        .map(|n| {
            n.split([',', ';', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let name = match attribute(node, "id") {
        Some(id) => id.to_string(),
        None if !names.is_empty() => names.remove(0),
        None => {
            let base = class_name.as_deref().unwrap_or("bean");
            let generated = match outer {
                Some(outer) => format!("{outer}${base}#{counter}"),
                None => format!("{base}#{counter}"),
            };
            *counter += 1;
            generated
        }
    };

    let mut bean = BeanDefinition {
        aliases: names,
        class_name,
        parent: attribute(node, "parent").map(str::to_string),
        is_abstract: attribute(node, "abstract") == Some("true"),
        line: line_of(doc, node),
        inner_beans: Vec::new(),
        name,
    };

    let outer_name = bean.name.clone();
    collect_inner(doc, node, &outer_name, &mut bean.inner_beans, counter);
    bean
}

fn collect_inner(
    doc: &roxmltree::Document<'_>,
    node: roxmltree::Node<'_, '_>,
    outer: &str,
    out: &mut Vec<BeanDefinition>,
    counter: &mut usize,
) {
    for child in node.children().filter(|c| c.is_element()) {
        if is_beans_element(child, "bean") {
            out.push(parse_bean(doc, child, Some(outer), counter));
        } else if INNER_BEAN_CONTAINERS.contains(&child.tag_name().name()) {
            collect_inner(doc, child, outer, out, counter);
        }
    }
}
