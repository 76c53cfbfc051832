//! RuleForge CLI — command-line interface for the rule engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use ruleforge_core::config::ConfigurationDocument;
use ruleforge_core::model::{Metadata, RuleBuilder, Status};
use ruleforge_core::recovery::RecoveryConfig;
use ruleforge_core::types::{FactContext, Value};
use ruleforge_core::{Engine, ServiceFacade};
use std::collections::BTreeMap;

#[derive(Parser)]
#[command(name = "ruleforge")]
#[command(about = "RuleForge - a business rule evaluation and classification engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single rule condition against a fact set
    Eval {
        /// Boolean/arithmetic condition expression (e.g. "#amount > 1000")
        #[arg(short, long)]
        condition: String,

        /// Facts as a JSON object
        #[arg(short, long, default_value = "{}")]
        facts: String,

        /// Output format (json, text)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate a configuration document
    Validate {
        /// Configuration file path (.toml or .json)
        file: String,
    },

    /// Run a scenario from a configuration document against a fact set
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: String,

        /// Scenario id to execute
        #[arg(short, long)]
        scenario: String,

        /// Facts as a JSON object
        #[arg(short, long, default_value = "{}")]
        facts: String,
    },

    /// Execute a configured rule chain from a configuration document against a fact set
    Chain {
        /// Configuration file path
        #[arg(short, long)]
        config: String,

        /// Rule chain id to execute
        #[arg(long)]
        chain: String,

        /// Facts as a JSON object
        #[arg(short, long, default_value = "{}")]
        facts: String,
    },

    /// Print instructions for starting the HTTP server
    Serve {
        /// Port the server will listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("ruleforge=debug").init();
    }

    match cli.command {
        Commands::Eval { condition, facts, format } => eval_command(condition, facts, format)?,
        Commands::Validate { file } => validate_command(file)?,
        Commands::Run { config, scenario, facts } => run_command(config, scenario, facts)?,
        Commands::Chain { config, chain, facts } => chain_command(config, chain, facts)?,
        Commands::Serve { port } => serve_command(port),
    }

    Ok(())
}

fn facts_from_json(json: &str) -> Result<FactContext> {
    let object: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(json).with_context(|| format!("invalid facts JSON: {json}"))?;
    let map = object.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect();
    Ok(FactContext::from_map(map))
}

fn eval_command(condition: String, facts: String, format: String) -> Result<()> {
    let ctx = facts_from_json(&facts)?;

    let rule = RuleBuilder::new()
        .id("cli-eval")
        .name("cli evaluation")
        .condition(&condition)
        .message("condition matched")
        .metadata(Metadata {
            created_at: String::new(),
            modified_at: String::new(),
            created_by: "cli".into(),
            status: Status::Active,
            version: "1".into(),
            business_domain: None,
            business_owner: None,
            source_system: None,
            effective_date: None,
            expiration_date: None,
            tags: Vec::new(),
            custom_properties: Default::default(),
        })
        .build()
        .context("invalid rule condition")?;

    let engine = Engine::new(RecoveryConfig::default());
    println!("{} Evaluating condition...", "→".blue());
    let result = engine.execute_rule(&rule, &ctx);

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            let status = if result.triggered { "TRIGGERED".green() } else { "NOT TRIGGERED".yellow() };
            println!("\n{} Evaluation Result", "═".blue().bold());
            println!("{} Status: {}", "▸".blue(), status);
            println!("{} Condition: {}", "▸".blue(), condition);
            println!("{} Outcome: {:?}", "▸".blue(), result.outcome);
            println!("{} Message: {}", "▸".blue(), result.message);
            if let Some(metrics) = &result.metrics {
                println!(
                    "{} Evaluation time: {:.3}ms",
                    "▸".blue(),
                    metrics.elapsed_nanos as f64 / 1_000_000.0
                );
            }
        }
    }

    Ok(())
}

fn validate_command(file: String) -> Result<()> {
    println!("{} Validating {}...", "→".blue(), file);

    let document = if file.ends_with(".json") {
        ConfigurationDocument::load_json(&file)
    } else {
        ConfigurationDocument::load_toml(&file)
    };

    let document = match document {
        Ok(document) => document,
        Err(e) => {
            println!("{} Configuration is invalid:", "✗".red());
            println!("  {e}");
            std::process::exit(1);
        }
    };

    match document.resolve_rules() {
        Ok(rules) => {
            println!("{} Configuration is valid!", "✓".green());
            println!("  Name: {}", document.metadata.name);
            println!("  Version: {}", document.metadata.version);
            println!("  Rules: {}", rules.len());
            println!("  Rule groups: {}", document.rule_groups.len());
            println!("  Rule chains: {}", document.rule_chains.len());
            println!("  Scenarios: {}", document.scenarios.len());
            println!("  Data sources: {}", document.data_sources.len());
        }
        Err(e) => {
            println!("{} Configuration is invalid:", "✗".red());
            println!("  {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn run_command(config: String, scenario: String, facts: String) -> Result<()> {
    println!("{} Loading configuration from {config}...", "→".blue());
    let document = if config.ends_with(".json") {
        ConfigurationDocument::load_json(&config)
    } else {
        ConfigurationDocument::load_toml(&config)
    }
    .with_context(|| format!("failed to load configuration: {config}"))?;

    let facade = ServiceFacade::new(document, RecoveryConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to start service façade: {e}"))?;

    let ctx = facts_from_json(&facts)?;

    println!("{} Running scenario `{scenario}`...", "→".blue());
    let result = facade.run(&scenario, &ctx).map_err(|e| anyhow::anyhow!("scenario run failed: {e}"))?;

    println!("\n{} Scenario Result", "═".blue().bold());
    println!("{} Summary: {}", "▸".blue(), result.summary);
    for stage in &result.stage_results {
        println!("  {} {:?}", stage.stage_id, stage.status);
    }
    if result.requires_review {
        println!("{} Flagged for review: {:?}", "!".yellow(), result.review_flags);
    }

    Ok(())
}

fn chain_command(config: String, chain: String, facts: String) -> Result<()> {
    println!("{} Loading configuration from {config}...", "→".blue());
    let document = if config.ends_with(".json") {
        ConfigurationDocument::load_json(&config)
    } else {
        ConfigurationDocument::load_toml(&config)
    }
    .with_context(|| format!("failed to load configuration: {config}"))?;

    let facade = ServiceFacade::new(document, RecoveryConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to start service façade: {e}"))?;

    let ctx = facts_from_json(&facts)?;

    println!("{} Running rule chain `{chain}`...", "→".blue());
    let result = facade.run_chain(&chain, &ctx).map_err(|e| anyhow::anyhow!("chain run failed: {e}"))?;

    println!("\n{} Chain Result", "═".blue().bold());
    println!("{} Completed: {}", "▸".blue(), result.completed);
    println!("{} Label: {}", "▸".blue(), result.label);
    for step in &result.results {
        println!("  {} {:?}", step.rule_name, step.outcome);
    }
    if let Some(error) = &result.error {
        println!("{} Error: {error}", "✗".red());
    }

    Ok(())
}

fn serve_command(port: u16) {
    println!("{} The HTTP server lives in a separate binary.", "→".blue());
    println!("{} Start it with: BIND_ADDRESS=0.0.0.0:{port} ruleforge-server", "▸".blue());
}
