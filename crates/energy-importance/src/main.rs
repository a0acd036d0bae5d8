use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use energy_importance_core::config::CONFIG_ENV_VAR;
use energy_importance_core::features::{engineer_features, export_features, missing_value_report};
use energy_importance_core::parser::read_energy_csv;
use energy_importance_core::pipeline::ImportancePipeline;
use energy_importance_core::report::{importance_table, missing_values_table, model_summary_table};
use energy_importance_core::PipelineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Feature importance analysis for building energy data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive features, fit the forest, and report feature importance
    Run(RunArgs),
    /// Derive features and write the engineered table only
    Features(FeaturesArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input CSV with date, TARGET_energy, T1..T9 and RH_1..RH_9
    #[arg(short, long)]
    input: PathBuf,
    /// TOML configuration (defaults to $ENERGY_IMPORTANCE_CONFIG when set)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Where to write the bar chart PNG
    #[arg(long)]
    chart: Option<PathBuf>,
    /// Also write the engineered table (.csv or .parquet)
    #[arg(long)]
    features_out: Option<PathBuf>,
    /// Also write the full importance table as JSON
    #[arg(long)]
    importance_json: Option<PathBuf>,
    /// Seed for the split and the forest
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct FeaturesArgs {
    #[arg(short, long)]
    input: PathBuf,
    /// Destination (.csv or .parquet)
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Features(args) => features(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let env_config = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let config = resolve_config(&args, env_config.as_deref())?;
    let pipeline = ImportancePipeline::new(config).context("invalid configuration")?;

    let outcome = pipeline
        .run_csv(&args.input)
        .with_context(|| format!("analysis of {} failed", args.input.display()))?;

    println!("Missing values per column ({} rows):", outcome.missing.total_rows);
    println!("{}", missing_values_table(&outcome.missing));
    println!(
        "Rows: {} read, {} complete, {} train, {} test",
        outcome.rows_in, outcome.rows_retained, outcome.train_rows, outcome.test_rows
    );
    println!("{}", model_summary_table(&outcome.summary));
    println!("Top {} features:", pipeline.config().report.top_n);
    println!(
        "{}",
        importance_table(&outcome.importances, pipeline.config().report.top_n)
    );

    pipeline
        .write_outputs(&outcome)
        .context("failed to write report files")?;
    info!(
        chart = %pipeline.config().report.chart_path.display(),
        "run finished"
    );
    Ok(())
}

fn features(args: FeaturesArgs) -> Result<()> {
    let observations = read_energy_csv(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let engineered = engineer_features(&observations);

    let missing = missing_value_report(&engineered)?;
    println!("{}", missing_values_table(&missing));

    export_features(&engineered, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    Ok(())
}

/// `--config` wins over the environment variable; explicit flags win over
/// whatever the file says.
fn resolve_config(args: &RunArgs, env_config: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match args.config.as_deref().or(env_config) {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(chart) = &args.chart {
        config.report.chart_path = chart.clone();
    }
    if let Some(path) = &args.features_out {
        config.report.features_out = Some(path.clone());
    }
    if let Some(path) = &args.importance_json {
        config.report.importance_json = Some(path.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).expect("arguments should parse");
        match cli.command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_without_config() {
        let args = run_args(&["energy-importance", "run", "--input", "data.csv"]);
        let config = resolve_config(&args, None).expect("config");
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "seed = 7\n[forest]\nn_trees = 12\n").expect("write config");

        let args = run_args(&[
            "energy-importance",
            "run",
            "--input",
            "data.csv",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--seed",
            "99",
            "--chart",
            "out/chart.png",
        ]);
        let config = resolve_config(&args, None).expect("config");

        assert_eq!(config.seed, 99);
        assert_eq!(config.forest.n_trees, 12);
        assert_eq!(config.report.chart_path, PathBuf::from("out/chart.png"));
    }

    #[test]
    fn environment_config_is_used_when_no_flag_given() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.toml");
        std::fs::write(&path, "[split]\ntest_fraction = 0.25\n").expect("write config");

        let args = run_args(&["energy-importance", "run", "-i", "data.csv"]);
        let config = resolve_config(&args, Some(&path)).expect("config");
        assert!((config.split.test_fraction - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn features_requires_output() {
        assert!(Cli::try_parse_from(["energy-importance", "features", "--input", "a.csv"]).is_err());
    }
}
