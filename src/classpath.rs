//! Class lookup over a project's output directories and dependency jars.
//!
//! Opening a classpath catalogs every jar (in parallel) and every class
//! directory into a name → location index; class files are read and decoded
//! lazily on first lookup and memoized for the lifetime of the classpath.

use anyhow::Context;
use ignore::WalkBuilder;
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

use crate::classfile::parse_class;
use crate::error::{AopError, Result};
use crate::resolution::ClassSourceProvider;
use crate::types::{ClassInfo, ClassSource};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassLocation {
    File(PathBuf),
    Jar { jar: PathBuf, entry: String },
}

type JarArchive = ZipArchive<Cursor<Mmap>>;

pub struct ProjectClassPath {
    entries: Vec<PathBuf>,
    index: HashMap<String, ClassLocation>,
    archives: Mutex<HashMap<PathBuf, JarArchive>>,
    loaded: RwLock<HashMap<String, Option<Arc<ClassInfo>>>>,
}

impl std::fmt::Debug for ProjectClassPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectClassPath")
            .field("entries", &self.entries)
            .field("indexed_classes", &self.index.len())
            .finish()
    }
}

impl ProjectClassPath {
    /// Indexes `entries`; earlier entries shadow later ones, as on a JVM classpath.
    pub fn open(entries: &[PathBuf]) -> anyhow::Result<Self> {
        let cataloged: Vec<anyhow::Result<Vec<(String, ClassLocation)>>> = entries
            .par_iter()
            .map(|entry| {
                if entry.is_dir() {
                    Ok(catalog_directory(entry))
                } else if entry.is_file() {
                    catalog_jar(entry)
                } else {
                    tracing::debug!(
                        target = "aop.classpath",
                        entry = %entry.display(),
                        "classpath entry does not exist"
                    );
                    Ok(Vec::new())
                }
            })
            .collect();

        let mut index = HashMap::new();
        for (entry, classes) in entries.iter().zip(cataloged) {
            let classes = classes.with_context(|| format!("Failed to catalog {}", entry.display()))?;
            for (name, location) in classes {
                index.entry(name).or_insert(location);
            }
        }

        tracing::debug!(
            target = "aop.classpath",
            entries = entries.len(),
            classes = index.len(),
            "opened project classpath"
        );

        Ok(Self {
            entries: entries.to_vec(),
            index,
            archives: Mutex::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
        })
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.index.contains_key(class_name)
    }

    pub fn class_count(&self) -> usize {
        self.index.len()
    }

    fn read_bytes(&self, location: &ClassLocation) -> Result<Vec<u8>> {
        match location {
            ClassLocation::File(path) => std::fs::read(path).map_err(|e| AopError::io(path.display(), &e)),
            ClassLocation::Jar { jar, entry } => {
                let mut archives = self.archives.lock();
                if !archives.contains_key(jar) {
                    let archive = open_archive(jar).map_err(|e| AopError::Io {
                        path: jar.display().to_string(),
                        message: format!("{e:#}"),
                    })?;
                    archives.insert(jar.clone(), archive);
                }
                let Some(archive) = archives.get_mut(jar) else {
                    return Err(AopError::Other(format!("jar {} not cached", jar.display())));
                };
                let mut file = archive.by_name(entry).map_err(|e| AopError::Io {
                    path: format!("{}!{entry}", jar.display()),
                    message: e.to_string(),
                })?;
                let mut bytes = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut bytes)
                    .map_err(|e| AopError::io(format!("{}!{entry}", jar.display()), &e))?;
                Ok(bytes)
            }
        }
    }
}

impl ClassSource for ProjectClassPath {
    fn load_class(&self, name: &str) -> Result<Option<Arc<ClassInfo>>> {
        if let Some(cached) = self.loaded.read().get(name) {
            return Ok(cached.clone());
        }
        let Some(location) = self.index.get(name) else {
            self.loaded.write().insert(name.to_string(), None);
            return Ok(None);
        };
        let bytes = self.read_bytes(location)?;
        let class = parse_class(&bytes).map_err(|source| AopError::ClassFormat {
            class_name: name.to_string(),
            source,
        })?;
        let class = Some(Arc::new(class));
        self.loaded.write().insert(name.to_string(), class.clone());
        Ok(class)
    }
}

/// Opens classpaths configured per project.
#[derive(Debug, Default, Clone)]
pub struct ClassPathProvider {
    projects: HashMap<String, Vec<PathBuf>>,
}

impl ClassPathProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_classpath(&mut self, project: impl Into<String>, entries: Vec<PathBuf>) {
        self.projects.insert(project.into(), entries);
    }
}

impl ClassSourceProvider for ClassPathProvider {
    fn open(&self, project: &str) -> Result<Arc<dyn ClassSource>> {
        let entries = self.projects.get(project).cloned().unwrap_or_default();
        let classpath = ProjectClassPath::open(&entries).map_err(|e| AopError::Other(format!("{e:#}")))?;
        Ok(Arc::new(classpath))
    }
}

fn class_path_to_class_name(path: &str) -> Option<String> {
    let stem = path.strip_suffix(".class")?;
    if stem.ends_with("module-info") || stem.ends_with("package-info") {
        return None;
    }
    Some(stem.replace(['/', '\\'], "."))
}

fn open_archive(jar_path: &Path) -> anyhow::Result<JarArchive> {
    let file = File::open(jar_path).with_context(|| format!("Failed to open jar: {}", jar_path.display()))?;
    // SAFETY: The file is opened read-only and the mapping is owned by the archive.
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("Failed to mmap jar: {}", jar_path.display()))?;
    ZipArchive::new(Cursor::new(mmap)).with_context(|| format!("Failed to read zip structure: {}", jar_path.display()))
}

fn catalog_jar(jar_path: &Path) -> anyhow::Result<Vec<(String, ClassLocation)>> {
    let mut archive = open_archive(jar_path)?;
    let mut classes = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let entry_name = entry.name().to_string();
        if let Some(class_name) = class_path_to_class_name(&entry_name) {
            classes.push((
                class_name,
                ClassLocation::Jar {
                    jar: jar_path.to_path_buf(),
                    entry: entry_name,
                },
            ));
        }
    }
    Ok(classes)
}

fn catalog_directory(root: &Path) -> Vec<(String, ClassLocation)> {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    let mut classes = Vec::new();
    for entry in walker.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == "class") {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if let Some(class_name) = class_path_to_class_name(&relative) {
            classes.push((class_name, ClassLocation::File(path.to_path_buf())));
        }
    }
    classes.sort_by(|a, b| a.0.cmp(&b.0));
    classes
}
