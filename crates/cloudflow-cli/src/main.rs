// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! CloudFlow CLI.
//!
//! A thin binary over the engine crates: `validate` parses and checks a
//! JSON workflow blueprint without running it, `run` wires a connected
//! `MockProvider` and an in-memory state store and drives the blueprint to
//! completion. This stands in for the HTTP API surface during local
//! development and integration testing.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudflow_core::{StateManager, StepExecutorRegistry, WorkflowExecutor};
use cloudflow_domain::WorkflowDefinition;
use cloudflow_providers::{MockProvider, Provider};
use cloudflow_state::InMemoryStateStore;
use colored::Colorize;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cloudflow")]
#[command(version, about = "CloudFlow workflow engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow blueprint without running it
    Validate {
        /// Path to a JSON blueprint file
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a workflow blueprint against a mock provider
    Run {
        /// Path to a JSON blueprint file
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string, or a path to a JSON file
        #[arg(short, long)]
        input: Option<String>,

        /// Provider deployment template (JSON); a single no-op compute node
        /// by default
        #[arg(long)]
        template: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cloudflow={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Run { file, input, template } => run_workflow(&file, input.as_deref(), template.as_deref()).await,
    };

    if let Err(err) = result {
        error!("{}", err);
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn load_blueprint(file_path: &str) -> Result<WorkflowDefinition> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("failed to read blueprint file: {}", file_path))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse blueprint JSON: {}", file_path))
}

fn validate_workflow(file_path: &str) -> Result<()> {
    info!(file_path, "validating blueprint");
    println!("{} {}", "Validating blueprint:".cyan().bold(), file_path);

    let definition = load_blueprint(file_path)?;
    definition.validate().with_context(|| "blueprint failed validation")?;

    println!("{}", "✓ blueprint is valid".green().bold());
    println!("  id:    {}", definition.id);
    println!("  name:  {}", definition.name);
    println!("  steps: {}", definition.steps.len());

    Ok(())
}

async fn run_workflow(file_path: &str, input: Option<&str>, template: Option<&str>) -> Result<()> {
    info!(file_path, "running blueprint");
    println!("{} {}", "Running blueprint:".cyan().bold(), file_path);

    let definition = load_blueprint(file_path)?;
    definition.validate().with_context(|| "blueprint failed validation")?;

    let inputs = match input {
        Some(raw) => parse_json_arg(raw)?,
        None => HashMap::new(),
    };
    info!(?inputs, "blueprint inputs");

    let template: Value = match template {
        Some(raw) => serde_json::from_str(raw).with_context(|| "failed to parse --template as JSON")?,
        None => serde_json::json!({ "nodes": [{ "name": "n1", "type": "compute" }] }),
    };

    let provider = MockProvider::new(format!("{}-provider", definition.id));
    provider.connect().await.with_context(|| "provider failed to connect")?;
    let deployment_id = provider
        .create_deployment(&definition.id, &template, &HashMap::new())
        .await
        .with_context(|| "failed to create deployment")?;
    info!(deployment_id, "deployment created");

    let manager = Arc::new(StateManager::new(Arc::new(InMemoryStateStore::new())));
    let registry = Arc::new(StepExecutorRegistry::default_registry());

    let executor = WorkflowExecutor::new(
        definition,
        inputs,
        manager,
        registry,
        Arc::new(provider),
        deployment_id,
    )
    .await
    .with_context(|| "failed to start workflow executor")?;

    println!("{}", "Executing workflow...".cyan());
    let state = executor.execute().await.with_context(|| "workflow execution failed")?;

    if state.is_active() {
        anyhow::bail!("workflow left the active state unexpectedly: {:?}", state.status);
    }

    let banner = if state.error_message.is_none() {
        "✓ workflow completed".green().bold()
    } else {
        "✗ workflow did not complete".red().bold()
    };
    println!("{}", banner);
    println!("\n{}", "Result:".cyan().bold());
    println!("{}", serde_json::to_string_pretty(&state).unwrap_or_else(|_| format!("{:?}", state)));

    Ok(())
}

fn parse_json_arg(raw: &str) -> Result<HashMap<String, Value>> {
    if Path::new(raw).exists() {
        let content = fs::read_to_string(raw).with_context(|| format!("failed to read input file: {}", raw))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse input JSON from file: {}", raw))
    } else {
        serde_json::from_str(raw).with_context(|| "failed to parse --input as JSON")
    }
}
