use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::beans::{BeansConfig, BeansProject};
use crate::cli::Cli;
use crate::resolution::DEFAULT_MAX_CONTEXTS;

pub const MAX_CONTEXTS_ENV: &str = "AOP_MODEL_MAX_CONTEXTS";

/// On-disk project description, as written by the user.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDescriptor {
    pub name: String,
    /// Configuration files, or directories scanned for `*.xml`.
    pub configs: Vec<PathBuf>,
    #[serde(default)]
    pub config_sets: Vec<ConfigSetDescriptor>,
    /// Class directories and jars.
    #[serde(default)]
    pub classpath: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSetDescriptor {
    pub name: String,
    pub configs: Vec<String>,
}

/// A descriptor with its configurations parsed and its paths made absolute.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub descriptor: PathBuf,
    pub beans: BeansProject,
    /// Resource name → configuration file.
    pub config_files: BTreeMap<String, PathBuf>,
    pub classpath: Vec<PathBuf>,
    /// Configurations that could not be parsed, with the reason.
    pub invalid: Vec<(String, String)>,
}

pub fn load_project(descriptor_path: &Path) -> Result<LoadedProject> {
    let text = std::fs::read_to_string(descriptor_path)
        .with_context(|| format!("Failed to read project descriptor: {}", descriptor_path.display()))?;
    let descriptor: ProjectDescriptor = serde_json::from_str(&text)
        .with_context(|| format!("Invalid project descriptor: {}", descriptor_path.display()))?;
    let root = descriptor_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut config_files = BTreeMap::new();
    for config in &descriptor.configs {
        let path = root.join(config);
        if path.is_dir() {
            for file in scan_xml(&path) {
                config_files.insert(resource_name(&root, &file), file);
            }
        } else if path.is_file() {
            config_files.insert(resource_name(&root, &path), path);
        } else {
            anyhow::bail!("Configuration not found: {}", path.display());
        }
    }

    let mut beans = BeansProject::new(descriptor.name.as_str());
    let mut invalid = Vec::new();
    for (resource, path) in &config_files {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        match BeansConfig::parse(resource.as_str(), text) {
            Ok(config) => beans.add_config(config),
            Err(err) => {
                tracing::warn!(target = "aop.config", resource = %resource, error = %err, "skipping configuration");
                invalid.push((resource.clone(), err.to_string()));
            }
        }
    }
    for set in &descriptor.config_sets {
        let configs: Vec<&str> = set.configs.iter().map(String::as_str).collect();
        beans.add_config_set(set.name.as_str(), &configs);
    }

    Ok(LoadedProject {
        descriptor: descriptor_path.to_path_buf(),
        beans,
        config_files,
        classpath: descriptor.classpath.iter().map(|p| root.join(p)).collect(),
        invalid,
    })
}

/// Resource names are descriptor-relative paths with `/` separators.
fn resource_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn scan_xml(dir: &Path) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();
    let mut files: Vec<PathBuf> = walker
        .flatten()
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "xml"))
        .collect();
    files.sort();
    files
}

pub fn resolve_db_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.db.clone() {
        return Ok(p);
    }

    Ok(aop_model_home()?.join("db.lmdb"))
}

/// Resolution cache limit from the environment, falling back to the default.
pub fn max_contexts() -> usize {
    parse_max_contexts(std::env::var(MAX_CONTEXTS_ENV).ok().as_deref())
}

fn parse_max_contexts(value: Option<&str>) -> usize {
    match value.map(str::trim) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(target = "aop.config", value = v, "ignoring invalid {MAX_CONTEXTS_ENV}");
            DEFAULT_MAX_CONTEXTS
        }),
        None => DEFAULT_MAX_CONTEXTS,
    }
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "db lock")?;
    Ok(())
}

fn aop_model_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("aop-model"))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("aop-model-config-{}-{nanos}-{name}", std::process::id()))
    }

    const BEANS: &str = r#"<beans xmlns="http://www.springframework.org/schema/beans"><bean id="a" class="A"/></beans>"#;

    #[test]
    fn loads_descriptor_relative_to_its_directory() -> Result<()> {
        let dir = temp_dir("load");
        std::fs::create_dir_all(dir.join("spring/web"))?;
        std::fs::write(dir.join("spring/app.xml"), BEANS)?;
        std::fs::write(dir.join("spring/web/web.xml"), BEANS)?;
        std::fs::write(dir.join("spring/web/broken.xml"), "<beans>")?;
        std::fs::write(dir.join("spring/web/notes.txt"), "ignored")?;
        std::fs::write(
            dir.join("aop.json"),
            r#"{
                "name": "shop",
                "configs": ["spring"],
                "config_sets": [{"name": "web", "configs": ["spring/app.xml", "spring/web/web.xml"]}],
                "classpath": ["target/classes", "lib/dep.jar"]
            }"#,
        )?;

        let project = load_project(&dir.join("aop.json"))?;
        assert_eq!(project.beans.name, "shop");
        assert_eq!(
            project.config_files.keys().collect::<Vec<_>>(),
            vec!["spring/app.xml", "spring/web/broken.xml", "spring/web/web.xml"]
        );
        assert_eq!(project.beans.configs.len(), 2);
        assert_eq!(project.invalid.len(), 1);
        assert_eq!(project.beans.siblings("spring/app.xml"), vec!["spring/web/web.xml"]);
        assert_eq!(project.classpath[0], dir.join("target/classes"));

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn missing_configuration_is_an_error() -> Result<()> {
        let dir = temp_dir("missing");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("aop.json"), r#"{"name": "x", "configs": ["nope.xml"]}"#)?;
        let err = load_project(&dir.join("aop.json")).unwrap_err();
        assert!(err.to_string().contains("Configuration not found"));
        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn max_contexts_falls_back_on_bad_values() {
        assert_eq!(parse_max_contexts(None), DEFAULT_MAX_CONTEXTS);
        assert_eq!(parse_max_contexts(Some(" 3 ")), 3);
        assert_eq!(parse_max_contexts(Some("many")), DEFAULT_MAX_CONTEXTS);
    }
}
