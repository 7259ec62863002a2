//! The published AOP reference model: per project, per resource.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::definition::{AdviceKind, AspectDefinition};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "member", rename_all = "snake_case")]
pub enum Member {
    Method {
        class_name: String,
        name: String,
        parameter_types: Vec<String>,
    },
    Field {
        class_name: String,
        name: String,
    },
    Type {
        class_name: String,
    },
}

impl Member {
    pub fn class_name(&self) -> &str {
        match self {
            Member::Method { class_name, .. } | Member::Field { class_name, .. } | Member::Type { class_name } => {
                class_name
            }
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Method {
                class_name,
                name,
                parameter_types,
            } => write!(f, "{class_name}.{name}({})", parameter_types.join(", ")),
            Member::Field { class_name, name } => write!(f, "{class_name}.{name}"),
            Member::Type { class_name } => f.write_str(class_name),
        }
    }
}

/// One advised join point: `source` (advice or introduction) applies to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AopReference {
    pub kind: AdviceKind,
    pub source: Member,
    pub target: Member,
    pub definition: Arc<AspectDefinition>,
    /// Resource whose definitions produced the reference.
    pub resource: String,
    pub target_bean: String,
    pub target_resource: String,
    pub target_line: i64,
}

impl fmt::Display for AopReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} [bean '{}' at {}:{}]",
            self.kind.as_str(),
            self.source,
            self.target,
            self.target_bean,
            self.target_resource,
            self.target_line
        )
    }
}

/// References of one project, bucketed by originating resource.
#[derive(Debug)]
pub struct AopProject {
    name: String,
    references: RwLock<BTreeMap<String, Vec<AopReference>>>,
    open: AtomicBool,
}

impl AopProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: RwLock::new(BTreeMap::new()),
            open: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clear_resource(&self, resource: &str) -> usize {
        self.references.write().remove(resource).map_or(0, |r| r.len())
    }

    /// Replaces the bucket of `resource` in one write.
    pub fn publish(&self, resource: &str, references: Vec<AopReference>) {
        self.references.write().insert(resource.to_string(), references);
    }

    pub fn references(&self, resource: &str) -> Vec<AopReference> {
        self.references.read().get(resource).cloned().unwrap_or_default()
    }

    pub fn all_references(&self) -> Vec<AopReference> {
        self.references.read().values().flatten().cloned().collect()
    }

    pub fn resources(&self) -> Vec<String> {
        self.references.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.references.read().values().map(Vec::len).sum()
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.references.write().clear();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct AopReferenceModel {
    projects: RwLock<BTreeMap<String, Arc<AopProject>>>,
}

impl AopReferenceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self, name: &str) -> Option<Arc<AopProject>> {
        self.projects.read().get(name).cloned()
    }

    pub fn project_or_create(&self, name: &str) -> Arc<AopProject> {
        if let Some(project) = self.project(name) {
            return project;
        }
        Arc::clone(
            self.projects
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AopProject::new(name))),
        )
    }

    pub fn remove_project(&self, name: &str) -> Option<Arc<AopProject>> {
        let removed = self.projects.write().remove(name);
        if let Some(project) = &removed {
            project.close();
        }
        removed
    }

    pub fn projects(&self) -> Vec<String> {
        self.projects.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AdviceDefinition, AdviceType, DefinitionKind, DefinitionStyle};

    fn reference(resource: &str, target_method: &str) -> AopReference {
        let definition = Arc::new(AspectDefinition {
            aspect_bean: "myAspect".to_string(),
            aspect_class: "com.example.MyAspect".to_string(),
            resource: resource.to_string(),
            line: 4,
            proxy_target_class: false,
            style: DefinitionStyle::XmlAspect,
            kind: DefinitionKind::Advice(AdviceDefinition {
                advice_type: AdviceType::Before,
                method_name: "beforeAdvice".to_string(),
                parameter_types: Vec::new(),
                pointcut: "execution(* *(..))".to_string(),
                pointcut_ref: None,
                arg_names: None,
                returning: None,
                throwing: None,
            }),
        });
        AopReference {
            kind: AdviceKind::Before,
            source: Member::Method {
                class_name: "com.example.MyAspect".to_string(),
                name: "beforeAdvice".to_string(),
                parameter_types: Vec::new(),
            },
            target: Member::Method {
                class_name: "com.example.Foo".to_string(),
                name: target_method.to_string(),
                parameter_types: vec!["int".to_string(), "java.lang.String".to_string()],
            },
            definition,
            resource: resource.to_string(),
            target_bean: "myBean".to_string(),
            target_resource: resource.to_string(),
            target_line: 9,
        }
    }

    #[test]
    fn publish_replaces_a_resource_bucket() {
        let model = AopReferenceModel::new();
        let project = model.project_or_create("shop");
        project.publish("a.xml", vec![reference("a.xml", "one"), reference("a.xml", "two")]);
        project.publish("b.xml", vec![reference("b.xml", "three")]);
        assert_eq!(project.count(), 3);

        project.publish("a.xml", vec![reference("a.xml", "four")]);
        assert_eq!(project.references("a.xml").len(), 1);
        assert_eq!(project.count(), 2);

        assert_eq!(project.clear_resource("b.xml"), 1);
        assert_eq!(project.resources(), vec!["a.xml"]);
        assert!(Arc::ptr_eq(&project, &model.project_or_create("shop")));
    }

    #[test]
    fn removed_projects_are_closed() {
        let model = AopReferenceModel::new();
        let project = model.project_or_create("shop");
        project.publish("a.xml", vec![reference("a.xml", "one")]);
        model.remove_project("shop");
        assert!(!project.is_open());
        assert_eq!(project.count(), 0);
        assert!(model.projects().is_empty());
    }

    #[test]
    fn references_render_source_and_target() {
        let text = reference("a.xml", "run").to_string();
        assert_eq!(
            text,
            "before com.example.MyAspect.beforeAdvice() -> com.example.Foo.run(int, java.lang.String) [bean 'myBean' at a.xml:9]"
        );
    }
}
