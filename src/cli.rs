use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::gate::IncrementalInputs;

#[derive(Debug, Clone, Parser)]
#[command(name = "nb-cluster")]
#[command(about = "Assemble NetBeans module clusters and applications from jar files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "TOKEN")]
    pub branding: Option<String>,

    #[arg(long, global = true, value_name = "DIR")]
    pub netbeans: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub collect_dir: Option<PathBuf>,

    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Classify one jar or manifest file.
    Inspect {
        artifact: PathBuf,

        #[arg(long)]
        dependencies: bool,
    },
    /// Stage module jars into the collect directory.
    Collect {
        #[arg(value_name = "ARTIFACT")]
        artifacts: Vec<PathBuf>,

        #[command(flatten)]
        incremental: IncrementalArgs,
    },
    /// Assemble a cluster from module jars.
    Cluster {
        #[arg(long, value_name = "NAME")]
        name: Option<String>,

        #[arg(long, value_name = "DIR")]
        target: Option<PathBuf>,

        #[arg(value_name = "JAR")]
        jars: Vec<PathBuf>,

        #[command(flatten)]
        incremental: IncrementalArgs,
    },
    /// Build the full application directory.
    App {
        #[command(flatten)]
        incremental: IncrementalArgs,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct IncrementalArgs {
    #[arg(long = "out-of-date", value_name = "NAME")]
    pub out_of_date: Vec<String>,

    #[arg(long = "removed", value_name = "PATH")]
    pub removed: Vec<PathBuf>,
}

impl IncrementalArgs {
    pub fn to_inputs(&self) -> IncrementalInputs {
        IncrementalInputs {
            out_of_date: self.out_of_date.iter().cloned().collect::<HashSet<_>>(),
            removed: self.removed.iter().cloned().collect::<HashSet<_>>(),
        }
    }
}
