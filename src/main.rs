use anyhow::{Context, Result, bail};
use clap::Parser;
use nb_cluster::app::ApplicationBuilder;
use nb_cluster::cli::{Cli, Commands};
use nb_cluster::cluster::ClusterAssembler;
use nb_cluster::collect::{JarCollector, discover_jars, list_jars};
use nb_cluster::config::{AppConfig, resolve_config};
use nb_cluster::manifest::{ClassifyOptions, examine};
use nb_cluster::registry::ModuleRegistry;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.clone() {
        Commands::Inspect {
            artifact,
            dependencies,
        } => {
            let descriptor = examine(&artifact, ClassifyOptions { dependencies })?;
            print_json(&descriptor)?;
        }
        Commands::Collect {
            artifacts,
            incremental,
        } => {
            let config = resolve_config(&cli)?;
            let registry = ModuleRegistry::default();
            let collector = JarCollector::new(&registry, config.platform_modules_dir());
            let report = collector.collect(
                &discover_jars(&artifacts),
                &config.collect_dir(),
                &incremental.to_inputs(),
            )?;
            print_json(&report)?;
        }
        Commands::Cluster {
            name,
            target,
            jars,
            incremental,
        } => {
            let config = resolve_config(&cli)?;
            let name = match name {
                Some(name) => name,
                None => config.branding_token()?.to_string(),
            };
            let target = match target {
                Some(target) => target,
                None => config.output_dir()?,
            };
            let jars = resolve_cluster_jars(&config, jars)?;

            let registry = ModuleRegistry::default();
            let report = ClusterAssembler::new(&registry, &config.overrides).assemble(
                &name,
                &target,
                &jars,
                &incremental.to_inputs(),
            )?;
            print_json(&report)?;
            if report.failed() > 0 {
                bail!("{} module(s) failed to install", report.failed());
            }
        }
        Commands::App { incremental } => {
            let config = resolve_config(&cli)?;
            let registry = ModuleRegistry::default();
            let report =
                ApplicationBuilder::new(&config, &registry).build(&incremental.to_inputs())?;
            print_json(&report)?;
            if report.cluster.failed() > 0 {
                bail!("{} module(s) failed to install", report.cluster.failed());
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Explicit jars win; otherwise everything staged in the collect dir.
fn resolve_cluster_jars(config: &AppConfig, jars: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    if !jars.is_empty() {
        return Ok(discover_jars(&jars));
    }
    let collect_dir = config.collect_dir();
    list_jars(&collect_dir)
        .with_context(|| format!("No jars given and none collected in {}", collect_dir.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_subcommand_parses_incremental_flags() {
        let cli = Cli::parse_from([
            "nb-cluster",
            "cluster",
            "--name",
            "myapp",
            "--out-of-date",
            "a.jar",
            "--out-of-date",
            "b.jar",
            "--removed",
            "/tmp/gone.jar",
            "x.jar",
            "-v",
        ]);
        assert!(cli.verbose);
        let Commands::Cluster {
            name,
            jars,
            incremental,
            ..
        } = cli.command
        else {
            panic!("expected cluster subcommand");
        };
        assert_eq!(name.as_deref(), Some("myapp"));
        assert_eq!(jars, vec![PathBuf::from("x.jar")]);
        let inputs = incremental.to_inputs();
        assert!(inputs.out_of_date.contains("a.jar"));
        assert!(inputs.out_of_date.contains("b.jar"));
        assert!(inputs.removed.contains(&PathBuf::from("/tmp/gone.jar")));
    }

    #[test]
    fn explicit_jars_bypass_collect_dir() -> Result<()> {
        let config = AppConfig {
            collect_dir: Some(PathBuf::from("/nonexistent/cluster-jars")),
            ..AppConfig::default()
        };
        let jars = resolve_cluster_jars(&config, vec![PathBuf::from("a.jar")])?;
        assert_eq!(jars, vec![PathBuf::from("a.jar")]);
        assert!(resolve_cluster_jars(&config, Vec::new()).is_err());
        Ok(())
    }
}
