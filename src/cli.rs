use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "aop-model")]
#[command(about = "Build the AOP reference model of a Spring project: which advice applies to which bean methods")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Rebuild the model for configurations and classes changed since the last build.
    Build {
        #[arg(value_name = "DESCRIPTOR")]
        descriptor: PathBuf,

        /// Rebuild every configuration regardless of fingerprints.
        #[arg(long)]
        full: bool,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the stored references of a project.
    Show {
        #[arg(value_name = "DESCRIPTOR")]
        descriptor: PathBuf,

        #[arg(short = 'r', long, value_name = "RESOURCE")]
        resource: Option<String>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    Stats,
    Clear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
