use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use promptcheck_core::{from_async_fn, load_config, Agent, EvaluationRunner, FileCache};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "promptcheck", about = "Evaluate prompts against model providers")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run the full evaluation matrix from a config file
	Run(RunArgs),
	/// Remove all entries from the configured cache
	ClearCache {
		/// YAML evaluation config
		config: PathBuf,
	},
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML evaluation config
	config: PathBuf,

	/// Run only the provider with this id
	#[arg(long)]
	provider: Option<String>,

	/// Force sequential execution with per-case output
	#[arg(long, action = ArgAction::SetTrue)]
	verbose: bool,

	/// Override the configured concurrency ceiling
	#[arg(long)]
	max_concurrent: Option<usize>,

	/// Disable the provider-call cache for this run
	#[arg(long, action = ArgAction::SetTrue)]
	no_cache: bool,

	/// HTTP agent endpoint. Receives { "model": ..., "config": ..., "vars": ... }
	/// via POST and must answer { "output": "<text>" }.
	#[arg(long)]
	http_url: Option<String>,

	/// Write the full results tree as JSON to a file
	#[arg(long)]
	json_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::ClearCache { config } => clear_cache(config)?,
	}
	Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
	let mut config = load_config(&args.config)?;
	if args.no_cache {
		config.cache.enabled = false;
	}

	let agent = match &args.http_url {
		Some(url) => http_agent(url.clone()),
		None => echo_agent(),
	};

	let mut builder = EvaluationRunner::builder()
		.config(config)
		.agent(agent)
		.verbose(args.verbose);
	if let Some(n) = args.max_concurrent {
		builder = builder.max_concurrent(n);
	}
	let runner = builder.build()?;

	let results = runner.run(args.provider.as_deref()).await?;

	println!("{}", results.summary_table());

	if let Some(path) = &args.json_out {
		let serialized = serde_json::to_string_pretty(&results)?;
		std::fs::write(path, serialized)?;
		println!("Results written to {}", path.display());
	}

	if !results.all_passed() {
		std::process::exit(1);
	}
	Ok(())
}

fn clear_cache(config: PathBuf) -> Result<()> {
	let config = load_config(&config)?;
	let cache = FileCache::from_settings(&config.cache);
	let stats = cache.stats();
	cache.clear();
	println!("Cleared {} cached entries from {}", stats.size, stats.cache_file.display());
	Ok(())
}

/// POSTs each unit to an HTTP endpoint and reads back `{ "output": "..." }`.
fn http_agent(url: String) -> Arc<dyn Agent> {
	from_async_fn(move |provider, vars| {
		let url = url.clone();
		async move {
			let client = reqwest::Client::new();
			let resp = client
				.post(&url)
				.json(&json!({
					"model": provider.model,
					"config": provider.config,
					"vars": vars,
				}))
				.send()
				.await?;
			let status = resp.status();
			let body = resp.json::<serde_json::Value>().await?;
			if !status.is_success() {
				anyhow::bail!("HTTP {}: {}", status.as_u16(), body);
			}
			body.get("output")
				.and_then(serde_json::Value::as_str)
				.map(str::to_string)
				.ok_or_else(|| anyhow::anyhow!("agent response missing 'output' field: {}", body))
		}
	})
}

/// Fallback agent for dry runs: echoes the variable bindings as JSON.
fn echo_agent() -> Arc<dyn Agent> {
	from_async_fn(|_provider, vars| async move {
		Ok(serde_json::Value::Object(vars).to_string())
	})
}
