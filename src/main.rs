use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use scope_loader::{
    ConfigStore, FileStore, Loader, Plugin, PluginContext, PluginInstance, PluginResolver,
    UpdateOutcome,
};

/// Scope Loader - reconcile a plugin tree against its configuration
#[derive(Parser)]
#[command(name = "scope-loader", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); discovered if omitted
    #[arg(short, long, env = "SCOPE_LOADER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the plugin tree with inert plugins and print it
    Check {
        /// Extra template binding (KEY=VALUE), repeatable
        #[arg(short, long = "env", value_parser = parse_binding)]
        bindings: Vec<(String, String)>,
    },
}

fn parse_binding(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,scope_loader=info",
        1 => "info,scope_loader=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = match cli.config {
        Some(path) => FileStore::open(path)?,
        None => FileStore::discover()
            .ok_or_else(|| anyhow::anyhow!("no scope-loader configuration file found"))?,
    };
    tracing::info!(path = %store.path().display(), "using configuration");

    match cli.command {
        Command::Check { bindings } => check(Arc::new(store), bindings).await,
    }
}

async fn check(store: Arc<dyn ConfigStore>, bindings: Vec<(String, String)>) -> anyhow::Result<()> {
    let mut loader = Loader::new(store, Arc::new(InertResolver))?;
    loader.with_process_env();
    for (key, value) in bindings {
        loader.set_env(key, Value::String(value));
    }

    loader.create_app().await?;
    let tree = loader.tree();
    print!("{}", tree.render(tree.root()));
    println!("{} forks", tree.fork_count());
    Ok(())
}

/// Resolves every name to a plugin that accepts any configuration
struct InertResolver;

#[async_trait]
impl PluginResolver for InertResolver {
    async fn resolve(&self, name: &str) -> Option<String> {
        Some(name.to_string())
    }

    async fn resolve_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        Some(Arc::new(InertPlugin(name.to_string())))
    }
}

struct InertPlugin(String);

impl Plugin for InertPlugin {
    fn name(&self) -> &str {
        &self.0
    }

    fn apply(
        &self,
        _ctx: &PluginContext,
        _config: &Value,
    ) -> scope_loader::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(Inert))
    }
}

struct Inert;

impl PluginInstance for Inert {
    fn update(&mut self, _config: &Value) -> UpdateOutcome {
        UpdateOutcome::Applied
    }
}
