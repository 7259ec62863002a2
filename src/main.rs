use anyhow::{Context, Result};
use aop_model::builder::{BuildListener, BuildReport, CancellationToken, ModelBuilder};
use aop_model::classpath::ClassPathProvider;
use aop_model::cli::{Cli, Commands, OutputFormat};
use aop_model::config::{LoadedProject, clear_db, load_project, max_contexts, resolve_db_path};
use aop_model::diagnostics::Diagnostic;
use aop_model::incremental::{Fingerprints, affected_resources};
use aop_model::model::{AopReference, AopReferenceModel};
use aop_model::resolution::ResolutionCache;
use aop_model::store::{ReferenceStore, StoredResource};
use clap::Parser;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.clone() {
        Commands::Clear => {
            let db_path = resolve_db_path(&cli)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let store = ReferenceStore::open(resolve_db_path(&cli)?)?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        Commands::Build {
            descriptor,
            full,
            format,
        } => {
            let store = ReferenceStore::open(resolve_db_path(&cli)?)?;
            let project = load_project(&descriptor)?;
            let report = build(&store, &project, full)?;
            write_report(&report, &project, format)?;
        }
        Commands::Show {
            descriptor,
            resource,
            format,
        } => {
            let store = ReferenceStore::open(resolve_db_path(&cli)?)?;
            show(&store, &descriptor, resource.as_deref(), format)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Keeps what the builder publishes so it can be persisted after the pass.
#[derive(Default)]
struct Published {
    resources: Mutex<Vec<(String, StoredResource)>>,
}

impl BuildListener for Published {
    fn resource_rebuilt(&self, _project: &str, resource: &str, references: &[AopReference], diagnostics: &[Diagnostic]) {
        self.resources.lock().push((
            resource.to_string(),
            StoredResource {
                references: references.to_vec(),
                diagnostics: diagnostics.to_vec(),
            },
        ));
    }
}

fn build(store: &ReferenceStore, project: &LoadedProject, full: bool) -> Result<BuildReport> {
    let name = project.beans.name.as_str();
    let fingerprints = Fingerprints::compute(&project.beans, &project.config_files, &project.classpath)?;
    let previous = if full {
        Fingerprints::default()
    } else {
        store.fingerprints(name)?
    };
    let changes = fingerprints.changes_since(&previous);
    let affected = affected_resources(&project.beans, &changes);
    tracing::info!(
        target = "aop.cli",
        project = name,
        changes = changes.len(),
        resources = affected.resources.len(),
        "computed affected resources"
    );

    let mut provider = ClassPathProvider::new();
    provider.set_classpath(name, project.classpath.clone());
    let cache = Arc::new(ResolutionCache::new(Arc::new(provider), max_contexts()));
    if affected.invalidate_classes {
        cache.invalidate(name);
    }

    let published = Arc::new(Published::default());
    let mut builder = ModelBuilder::new(Arc::new(AopReferenceModel::new()), cache);
    builder.add_listener(published.clone());
    let report = builder.build(&project.beans, &affected.resources, &CancellationToken::new());

    if report.cancelled {
        tracing::warn!(target = "aop.cli", project = name, "build cancelled; store left unchanged");
        return Ok(report);
    }

    let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *published.resources.lock())
        .into_iter()
        .partition(|(resource, _)| !project.config_files.contains_key(resource));
    let removed: Vec<String> = removed.into_iter().map(|(resource, _)| resource).collect();
    store
        .commit_build(name, &kept, &removed, &fingerprints)
        .with_context(|| format!("Failed to persist references of project {name}"))?;
    Ok(report)
}

fn write_report(report: &BuildReport, project: &LoadedProject, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            for (resource, reason) in &project.invalid {
                println!("{resource}: error: {reason}");
            }
            for resource in &report.resources {
                println!(
                    "{}: {} definitions, {} references",
                    resource.resource, resource.definitions, resource.references
                );
                for diagnostic in &resource.diagnostics {
                    println!("  {diagnostic}");
                }
            }
            println!(
                "{}: rebuilt {} resources, {} references in {} ms{}",
                report.project,
                report.resources.len(),
                report.reference_count(),
                report.duration_ms,
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    Ok(())
}

fn show(store: &ReferenceStore, descriptor: &Path, resource: Option<&str>, format: OutputFormat) -> Result<()> {
    let project = load_project(descriptor)?;
    let name = project.beans.name.as_str();
    let resources: BTreeMap<String, StoredResource> = match resource {
        Some(resource) => store
            .resource(name, resource)?
            .map(|stored| BTreeMap::from([(resource.to_string(), stored)]))
            .ok_or_else(|| anyhow::anyhow!("No stored references for {resource} in project {name}"))?,
        None => store.project_resources(name)?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
        OutputFormat::Text => {
            for (resource, stored) in &resources {
                println!("{resource}");
                for reference in &stored.references {
                    println!("  {reference}");
                }
                for diagnostic in &stored.diagnostics {
                    println!("  {diagnostic}");
                }
            }
        }
    }
    Ok(())
}
