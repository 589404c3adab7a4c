use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use marble::config::{Settings, TaskConfig};
use marble::llm::ProviderRegistry;
use marble::output::{OutputTarget, ResultWriter};
use marble::runner::{Orchestrator, RunResult};

fn setup_logging(default_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if let Some(path) = log_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let target = Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open log file")?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.init();
    if let Some(path) = log_file {
        info!("Logging initialized, writing to: {}", path.display());
    }
    Ok(())
}

/// Expand config arguments; patterns with glob characters must match something
fn expand_configs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if !pattern.contains(['*', '?', '[']) {
            paths.push(PathBuf::from(pattern));
            continue;
        }
        let before = paths.len();
        for entry in glob::glob(pattern).context(format!("Invalid pattern '{}'", pattern))? {
            paths.push(entry.context(format!("Cannot read match for '{}'", pattern))?);
        }
        if paths.len() == before {
            bail!("No config matches '{}'", pattern);
        }
    }
    Ok(paths)
}

fn load_config(path: &Path, default_model: &str) -> Result<TaskConfig> {
    let config = TaskConfig::load(path).context(format!("Failed to load {}", path.display()))?;
    config
        .validate(default_model)
        .context(format!("Invalid config {}", path.display()))?;
    Ok(config)
}

async fn handle_run_command(
    configs: &[String],
    feedback: bool,
    output: Option<&Path>,
    settings: &Settings,
) -> Result<()> {
    let default_model = settings.llm.default_model.clone();

    // Every config is checked before the first run starts
    let mut planned = Vec::new();
    for path in expand_configs(configs)? {
        let config = load_config(&path, &default_model)?;
        let target = OutputTarget::resolve(&config.output, output)
            .context(format!("Invalid output for {}", path.display()))?;
        planned.push((path, config, target));
    }

    let registry = Arc::new(ProviderRegistry::new(settings.clone()));
    let orchestrator = Orchestrator::new(registry, default_model)?.with_feedback(feedback);
    let writer = ResultWriter::new();

    let total = planned.len();
    let mut failed = 0;
    for (index, (path, config, target)) in planned.iter().enumerate() {
        println!(
            "{} [{}/{}] {} ({})",
            "Running".cyan(),
            index + 1,
            total,
            path.display(),
            config.label()
        );

        let result = orchestrator
            .run(config)
            .await
            .context(format!("Run failed for {}", path.display()))?;
        let written = writer
            .write(&result, target)
            .context(format!("Failed to write result for {}", path.display()))?;

        print_outcome(&result, &written);
        if !result.succeeded() {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} run(s) terminated by failure", failed, total);
    }
    println!("{} {} run(s) finished", "Done:".green(), total);
    Ok(())
}

fn print_outcome(result: &RunResult, written: &Path) {
    let reason = result.termination.reason.to_string();
    let reason = if result.succeeded() { reason.green() } else { reason.red() };
    println!(
        "  {} at turn {}, {} actions, {} tokens -> {}",
        reason,
        result.termination.turn,
        result.transcript.len(),
        result.token_usage,
        written.display()
    );
    if let Some(cause) = &result.failure {
        let agent = cause.agent_id.as_deref().unwrap_or("-");
        println!("  {} {} ({})", "Failure:".red(), cause.message, agent);
    }
    match result.metrics.scorecard() {
        Some(card) => println!(
            "  TS {}  CS {}  judge {}",
            card.task_score, card.coordination_score, card.judge
        ),
        None => println!("  {}", "unscored".yellow()),
    }
}

fn handle_validate_command(configs: &[String], settings: &Settings) -> Result<()> {
    let mut invalid = 0;
    for path in expand_configs(configs)? {
        match load_config(&path, &settings.llm.default_model) {
            Ok(config) => println!("{} {} ({})", "ok".green(), path.display(), config.label()),
            Err(e) => {
                invalid += 1;
                println!("{} {}: {:#}", "invalid".red(), path.display(), e);
            }
        }
    }
    if invalid > 0 {
        bail!("{} invalid config(s)", invalid);
    }
    Ok(())
}

fn handle_summarize_command(results: &Path, field: Option<&str>) -> Result<()> {
    let summary = marble::report::summarize(results, field).context("Failed to summarize results")?;
    print!("{}", summary);
    if !summary.malformed.is_empty() {
        println!("{} {} malformed line(s) skipped", "Warning:".yellow(), summary.malformed.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.settings.as_ref()).context("Failed to load settings")?;
    let level = if cli.is_verbose() { "debug" } else { settings.log_level.as_str() };
    setup_logging(level, cli.log_file()).context("Failed to setup logging")?;

    info!("Starting with settings from: {:?}", cli.settings);

    match &cli.command {
        Commands::Run {
            configs,
            feedback,
            output,
            ..
        } => handle_run_command(configs, *feedback, output.as_deref(), &settings).await,
        Commands::Validate { configs } => handle_validate_command(configs, &settings),
        Commands::Summarize { results, field } => handle_summarize_command(results, field.as_deref()),
    }
}
