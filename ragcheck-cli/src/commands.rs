//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::RunArgs;
use crate::SessionsAction;
use anyhow::Context;
use ragcheck_core::{
    BatchManager, CheckpointState, Dataset, EvalConfig, EvaluationContext, EvaluationReport,
    FileCheckpointStore, HttpScorer, SessionStatus, load_config,
};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, workspace, json).await,
        Commands::Resume {
            session_id,
            dataset,
            endpoint,
        } => handle_resume(&session_id, dataset.as_deref(), endpoint, workspace, json).await,
        Commands::Sessions { action } => handle_sessions(action, workspace, json),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<EvalConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn apply_run_overrides(config: &mut EvalConfig, args: &RunArgs) {
    if let Some(endpoint) = &args.endpoint {
        config.scorer.endpoint = endpoint.clone();
    }
    if let Some(domain) = &args.domain {
        config.strategy.domain = Some(domain.clone());
    }
    if let Some(chunk_size) = args.chunk_size {
        config.batch.chunk_size = chunk_size;
    }
}

fn batch_manager(config: &EvalConfig, workspace: &Path) -> BatchManager {
    let store = FileCheckpointStore::new(config.checkpoint.resolve(workspace));
    BatchManager::new(Arc::new(store), config.clone())
}

fn evaluation_context(config: &EvalConfig) -> EvaluationContext {
    let scorer = HttpScorer::from_config(&config.scorer);
    EvaluationContext::from_config(Arc::new(scorer), config)
}

fn load_dataset(path: &Path, name: Option<String>) -> anyhow::Result<Dataset> {
    let mut dataset = Dataset::load_json(path)
        .with_context(|| format!("Failed to load dataset {}", path.display()))?;
    if let Some(name) = name {
        dataset.name = name;
    }
    Ok(dataset)
}

fn print_report(report: &EvaluationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        report.print_summary();
    }
    Ok(())
}

fn print_state(state: &CheckpointState, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }
    println!("Session: {}", state.session_id);
    println!("Dataset: {}", state.dataset_name);
    println!("Status: {}", state.status);
    println!(
        "Progress: {}/{} records in {} chunks",
        state.completed_items, state.dataset_size, state.chunks_processed
    );
    println!("Errors: {}", state.error_count);
    println!("Started: {}", state.start_time.to_rfc3339());
    println!("Last update: {}", state.last_update.to_rfc3339());
    if let Some(failure) = &state.failure {
        println!("Failure: {failure}");
    }
    if !state.partial_metrics.is_empty() {
        println!();
        println!("Partial metrics:");
        for (metric, mean) in &state.partial_metrics {
            println!("  {metric}: {mean:.3}");
        }
    }
    if let Some(report) = state.final_result.as_ref().or(state.partial_result.as_ref()) {
        report.print_summary();
    }
    Ok(())
}

async fn handle_run(args: RunArgs, workspace: &Path, json: bool) -> anyhow::Result<()> {
    let mut config = load(workspace)?;
    apply_run_overrides(&mut config, &args);
    config.validate()?;

    let dataset = load_dataset(&args.dataset, args.name.clone())?;
    let manager = batch_manager(&config, workspace);
    let ctx = evaluation_context(&config);

    let report = manager
        .evaluate_with_checkpoints(&dataset, &ctx)
        .await
        .context("Evaluation session failed")?;
    print_report(&report, json)
}

async fn handle_resume(
    session_id: &str,
    dataset: Option<&Path>,
    endpoint: Option<String>,
    workspace: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = load(workspace)?;
    if let Some(endpoint) = endpoint {
        config.scorer.endpoint = endpoint;
    }
    config.validate()?;
    let manager = batch_manager(&config, workspace);

    match dataset {
        Some(path) => {
            let dataset = load_dataset(path, None)?;
            let ctx = evaluation_context(&config);
            let report = manager
                .continue_session(session_id, &dataset, &ctx)
                .await
                .with_context(|| format!("Could not continue session {session_id}"))?;
            print_report(&report, json)
        }
        None => {
            let state = manager.resume(session_id)?;
            print_state(&state, json)?;
            if state.status != SessionStatus::Completed && !json {
                println!();
                println!(
                    "Pass --dataset to continue from record {} of {}.",
                    state.completed_items, state.dataset_size
                );
            }
            Ok(())
        }
    }
}

fn handle_sessions(action: SessionsAction, workspace: &Path, json: bool) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let manager = batch_manager(&config, workspace);
    match action {
        SessionsAction::List => {
            let sessions = manager.list_sessions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
                return Ok(());
            }
            if sessions.is_empty() {
                println!("No sessions found.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<20}  {:<9}  {:>11}  {:>6}  UPDATED",
                "SESSION", "DATASET", "STATUS", "PROGRESS", "ERRORS"
            );
            for s in sessions {
                println!(
                    "{:<36}  {:<20}  {:<9}  {:>11}  {:>6}  {}",
                    s.session_id,
                    s.dataset_name,
                    s.status.to_string(),
                    format!("{}/{}", s.completed_items, s.dataset_size),
                    s.error_count,
                    s.last_update.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        SessionsAction::Show { session_id } => {
            let state = manager.resume(&session_id)?;
            print_state(&state, json)
        }
        SessionsAction::Delete { session_id } => {
            manager.delete_session(&session_id)?;
            println!("Deleted session {session_id}");
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".ragcheck");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = EvalConfig::default().to_toml()?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
