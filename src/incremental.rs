//! Change detection between CLI invocations.
//!
//! Configuration files are fingerprinted by content, the classpath by the
//! path, size and modification time of every jar and class file on it, and
//! the configuration-set layout by its serialized form.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::beans::BeansProject;

pub const CLASSPATH_KEY: &str = "classpath";
pub const CONFIG_SETS_KEY: &str = "config_sets";
const CONFIG_KEY_PREFIX: &str = "config:";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Change {
    /// A configuration file was added, edited or removed.
    Config(String),
    /// Configuration sets were added, removed or regrouped, which changes
    /// which beans every definition can see.
    ConfigSets,
    /// A class directory or jar changed; every resolved class may be stale.
    ClassPath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affected {
    pub resources: Vec<String>,
    pub invalidate_classes: bool,
}

/// Resources to rebuild for `changes`.
///
/// A configuration affects itself and every configuration sharing a
/// configuration set with it. Configuration-set and classpath changes affect
/// all of them.
pub fn affected_resources(beans: &BeansProject, changes: &[Change]) -> Affected {
    let mut resources = BTreeSet::new();
    let mut invalidate_classes = false;
    for change in changes {
        match change {
            Change::ClassPath => {
                invalidate_classes = true;
                resources.extend(beans.configs.keys().cloned());
            }
            Change::ConfigSets => resources.extend(beans.configs.keys().cloned()),
            Change::Config(resource) => {
                resources.insert(resource.clone());
                resources.extend(beans.siblings(resource).into_iter().map(str::to_string));
            }
        }
    }
    Affected {
        resources: resources.into_iter().collect(),
        invalidate_classes,
    }
}

/// Content hashes of a project's inputs, keyed as they are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprints {
    entries: BTreeMap<String, String>,
}

impl Fingerprints {
    pub fn compute(beans: &BeansProject, configs: &BTreeMap<String, PathBuf>, classpath: &[PathBuf]) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (resource, path) in configs {
            entries.insert(config_key(resource), hash_file(path)?);
        }
        let layout = serde_json::to_vec(&beans.config_sets).context("Failed to serialize configuration sets")?;
        entries.insert(CONFIG_SETS_KEY.to_string(), hex::encode(Sha256::digest(&layout)));
        entries.insert(CLASSPATH_KEY.to_string(), classpath_fingerprint(classpath));
        Ok(Self { entries })
    }

    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Changes from `previous` to `self`. An empty `previous` reports everything.
    pub fn changes_since(&self, previous: &Fingerprints) -> Vec<Change> {
        let mut changes = BTreeSet::new();
        for (key, hash) in &self.entries {
            if previous.entries.get(key) != Some(hash) {
                changes.insert(change_for(key));
            }
        }
        for key in previous.entries.keys() {
            if !self.entries.contains_key(key) {
                changes.insert(change_for(key));
            }
        }
        changes.into_iter().collect()
    }
}

fn config_key(resource: &str) -> String {
    format!("{CONFIG_KEY_PREFIX}{resource}")
}

fn change_for(key: &str) -> Change {
    match key.strip_prefix(CONFIG_KEY_PREFIX) {
        Some(resource) => Change::Config(resource.to_string()),
        None if key == CONFIG_SETS_KEY => Change::ConfigSets,
        None => Change::ClassPath,
    }
}

pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Hash over the path, size and mtime of every jar and class file on `entries`.
pub fn classpath_fingerprint(entries: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        if entry.is_dir() {
            let mut files: Vec<PathBuf> = WalkBuilder::new(entry)
                .hidden(false)
                .git_ignore(false)
                .git_global(false)
                .git_exclude(false)
                .build()
                .flatten()
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|e| e == "class" || e == "jar"))
                .collect();
            files.sort();
            for file in files {
                hash_stamp(&mut hasher, &file);
            }
        } else {
            hash_stamp(&mut hasher, entry);
        }
    }
    hex::encode(hasher.finalize())
}

fn hash_stamp(hasher: &mut Sha256, path: &Path) {
    let (len, nanos) = match path.metadata() {
        Ok(meta) => {
            let nanos = meta
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos());
            (meta.len(), nanos)
        }
        Err(_) => (0, 0),
    };
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(len.to_le_bytes());
    hasher.update(nanos.to_le_bytes());
}
