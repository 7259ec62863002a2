//! Persistent reference store.
//!
//! LMDB (via heed) keeps the last published bucket of every (project,
//! resource) pair as JSON, together with the input fingerprints the bucket
//! was built from, so a later run only rebuilds what changed.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diagnostics::Diagnostic;
use crate::incremental::Fingerprints;
use crate::model::AopReference;

pub const REFERENCES_DB: &str = "references";
pub const FINGERPRINTS_DB: &str = "fingerprints";

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 8;
const KEY_SEPARATOR: char = '\u{0}';

type StrDb = Database<Str, Str>;

/// What a build published for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    pub references: Vec<AopReference>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct ReferenceStore {
    env: Arc<Env>,
    db_path: PathBuf,
    references: StrDb,
    fingerprints: StrDb,
}

impl ReferenceStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }

        let env = Arc::new(open_env(&db_path)?);
        let mut wtxn = env.write_txn()?;
        let references = env.create_database::<Str, Str>(&mut wtxn, Some(REFERENCES_DB))?;
        let fingerprints = env.create_database::<Str, Str>(&mut wtxn, Some(FINGERPRINTS_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            references,
            fingerprints,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Writes rebuilt resources, drops removed ones and records the
    /// fingerprints of the build in a single transaction.
    pub fn commit_build(
        &self,
        project: &str,
        published: &[(String, StoredResource)],
        removed: &[String],
        fingerprints: &Fingerprints,
    ) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for (resource, stored) in published {
            let value = serde_json::to_string(stored)
                .with_context(|| format!("Failed to encode references of {resource}"))?;
            self.references.put(&mut wtxn, &key(project, resource), &value)?;
        }
        for resource in removed {
            self.references.delete(&mut wtxn, &key(project, resource))?;
        }

        delete_prefix(&self.fingerprints, &mut wtxn, project)?;
        for (name, hash) in fingerprints.entries() {
            self.fingerprints.put(&mut wtxn, &key(project, name), hash)?;
        }
        wtxn.commit()?;
        Ok(())
    }

    pub fn resource(&self, project: &str, resource: &str) -> Result<Option<StoredResource>> {
        let rtxn = self.env.read_txn()?;
        self.references
            .get(&rtxn, &key(project, resource))?
            .map(|json| decode(resource, json))
            .transpose()
    }

    pub fn project_resources(&self, project: &str) -> Result<BTreeMap<String, StoredResource>> {
        let rtxn = self.env.read_txn()?;
        let prefix = project_prefix(project);
        let mut out = BTreeMap::new();
        for item in self.references.prefix_iter(&rtxn, &prefix)? {
            let (k, json) = item?;
            let resource = &k[prefix.len()..];
            out.insert(resource.to_string(), decode(resource, json)?);
        }
        Ok(out)
    }

    pub fn fingerprints(&self, project: &str) -> Result<Fingerprints> {
        let rtxn = self.env.read_txn()?;
        let prefix = project_prefix(project);
        let mut entries = BTreeMap::new();
        for item in self.fingerprints.prefix_iter(&rtxn, &prefix)? {
            let (k, hash) = item?;
            entries.insert(k[prefix.len()..].to_string(), hash.to_string());
        }
        Ok(Fingerprints::from_entries(entries))
    }

    pub fn clear_project(&self, project: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        delete_prefix(&self.references, &mut wtxn, project)?;
        delete_prefix(&self.fingerprints, &mut wtxn, project)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let mut projects = BTreeSet::new();
        let mut resources = 0u64;
        let mut references = 0u64;
        let mut diagnostics = 0u64;
        for item in self.references.iter(&rtxn)? {
            let (k, json) = item?;
            let Some((project, resource)) = k.split_once(KEY_SEPARATOR) else {
                continue;
            };
            projects.insert(project.to_string());
            resources += 1;
            if let Ok(stored) = decode(resource, json) {
                references += stored.references.len() as u64;
                diagnostics += stored.diagnostics.len() as u64;
            }
        }
        Ok(StoreStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            projects: projects.into_iter().collect(),
            resources,
            references,
            diagnostics,
            fingerprints: table_len(&self.fingerprints, &rtxn)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub db_path: String,
    pub projects: Vec<String>,
    pub resources: u64,
    pub references: u64,
    pub diagnostics: u64,
    pub fingerprints: u64,
}

fn key(project: &str, name: &str) -> String {
    format!("{project}{KEY_SEPARATOR}{name}")
}

fn project_prefix(project: &str) -> String {
    format!("{project}{KEY_SEPARATOR}")
}

fn decode(resource: &str, json: &str) -> Result<StoredResource> {
    serde_json::from_str(json).with_context(|| format!("Corrupt stored references for {resource}"))
}

fn delete_prefix(db: &StrDb, wtxn: &mut RwTxn<'_>, project: &str) -> Result<()> {
    let prefix = project_prefix(project);
    let keys: Vec<String> = db
        .prefix_iter(wtxn, &prefix)?
        .map(|item| item.map(|(k, _)| k.to_string()))
        .collect::<heed::Result<_>>()?;
    for k in keys {
        db.delete(wtxn, &k)?;
    }
    Ok(())
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: Default LMDB locking stays on; NO_SUB_DIR keeps --db a single file path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}

fn table_len(db: &StrDb, rtxn: &RoTxn<'_>) -> Result<u64> {
    let mut count = 0u64;
    for item in db.iter(rtxn)? {
        let _ = item?;
        count += 1;
    }
    Ok(count)
}
