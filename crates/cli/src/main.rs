//! `flowbridge` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    : start the API server.
//! - `migrate`  : run pending database migrations.
//! - `validate` : validate a workflow JSON file, or every reference workflow.
//! - `run`      : run a reference workflow in-process and print the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use api::{ApiSettings, AppState};
use client::{ClientConfig, CorrelationEnvelope, HttpOrchestrationClient, OrchestrationClient, TaskRequest};
use db::{DomainStore, MemoryStore, PgStore};
use engine::{validate_dag, LocalEngine, LocalEngineConfig, WorkflowCatalog, WorkflowDefinition};
use handlers::HandlerRegistry;

#[derive(Parser)]
#[command(
    name = "flowbridge",
    about = "Reference workflow applications over an orchestration boundary",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
        bind: String,
        /// Postgres URL; records are kept in memory when absent.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        #[arg(long, default_value_t = 10)]
        max_connections: u32,
        /// Remote orchestration service.
        #[arg(long, env = "ORCHESTRATION_URL", default_value = "http://localhost:8080")]
        orchestration_url: String,
        /// Per-request timeout against the orchestration service.
        #[arg(long, env = "ORCHESTRATION_TIMEOUT_SECS", default_value_t = 30)]
        timeout: u64,
        /// Run the reference workflows in-process instead of calling a remote service.
        #[arg(long)]
        local: bool,
        #[arg(long, env = "WORKFLOW_VERSION", default_value = "1.0.0")]
        workflow_version: String,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file, or every reference workflow.
    Validate {
        /// Path to the workflow JSON file.
        path: Option<PathBuf>,
    },
    /// Run a reference workflow locally and print the final task snapshot.
    Run {
        /// `<namespace>/<name>`, e.g. `ecommerce/ecommerce_order_processing`.
        workflow: String,
        /// Task context as a JSON object.
        #[arg(long, default_value = "{}")]
        context: String,
        /// Seed for the handlers' random source.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            database_url,
            max_connections,
            orchestration_url,
            timeout,
            local,
            workflow_version,
        } => {
            let store: Arc<dyn DomainStore> = match database_url {
                Some(url) => {
                    let pool = db::create_pool(&url, max_connections)
                        .await
                        .context("failed to connect to database")?;
                    Arc::new(PgStore::new(pool))
                }
                None => {
                    warn!("DATABASE_URL not set; domain records are kept in memory");
                    Arc::new(MemoryStore::new())
                }
            };

            let client: Arc<dyn OrchestrationClient> = if local {
                info!("Running reference workflows in-process");
                Arc::new(LocalEngine::with_reference_workflows(LocalEngineConfig::default())?)
            } else {
                info!("Using orchestration service at {orchestration_url}");
                Arc::new(HttpOrchestrationClient::new(ClientConfig {
                    base_url: orchestration_url,
                    timeout_secs: timeout,
                })?)
            };

            let state = AppState::new(store, client, ApiSettings { workflow_version });
            info!("Starting API server on {bind}");
            api::serve(&bind, state).await?;
        }
        Command::Migrate { database_url } => {
            let pool = db::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => match path {
            Some(path) => validate_file(&path)?,
            None => validate_reference()?,
        },
        Command::Run { workflow, context, seed } => run_local(&workflow, &context, seed).await?,
    }

    Ok(())
}

fn validate_file(path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;

    match WorkflowDefinition::from_json(&content) {
        Ok(definition) => {
            let order = validate_dag(&definition)?;
            println!("✅ {} is valid. Execution order: {order:?}", definition.qualified_name());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Validation failed: {e}");
            std::process::exit(1);
        }
    }
}

fn validate_reference() -> anyhow::Result<()> {
    let registry = HandlerRegistry::with_reference_handlers();
    let catalog = WorkflowCatalog::with_reference_workflows(&registry)?;

    for definition in catalog.definitions() {
        let order = validate_dag(definition)?;
        println!("✅ {} ({} steps): {order:?}", definition.qualified_name(), order.len());
    }
    Ok(())
}

async fn run_local(workflow: &str, context: &str, seed: Option<u64>) -> anyhow::Result<()> {
    let (namespace, name) = workflow
        .split_once('/')
        .ok_or_else(|| anyhow!("workflow must be <namespace>/<name>, got '{workflow}'"))?;
    let context: serde_json::Value =
        serde_json::from_str(context).context("--context is not valid JSON")?;
    if !context.is_object() {
        bail!("--context must be a JSON object");
    }

    let engine = LocalEngine::with_reference_workflows(LocalEngineConfig {
        seed,
        ..LocalEngineConfig::default()
    })?;
    if engine.catalog().get(namespace, name).is_none() {
        bail!("unknown workflow {namespace}/{name}");
    }

    let run_id = Uuid::new_v4();
    let envelope = CorrelationEnvelope::for_record(run_id, "cli_run", &run_id.to_string(), namespace);
    let snapshot = engine
        .run_to_completion(TaskRequest::new(namespace, name, context, envelope).with_reason("flowbridge run"))
        .await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if !snapshot.status.is_terminal() || snapshot.completed_steps() != snapshot.total_steps {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_workflow_and_context() {
        let cli = Cli::try_parse_from([
            "flowbridge",
            "run",
            "ecommerce/ecommerce_order_processing",
            "--context",
            r#"{"customer_email":"a@b.co"}"#,
            "--seed",
            "7",
        ])
        .unwrap();

        match cli.command {
            Command::Run { workflow, seed, .. } => {
                assert_eq!(workflow, "ecommerce/ecommerce_order_processing");
                assert_eq!(seed, Some(7));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn reference_workflows_validate() {
        validate_reference().unwrap();
    }
}
