//! Modelprint CLI - identify model files and images from the command line.
//!
//! Reports are written to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use modelprint_core::{
    AssetFile, AssetPipeline, CancellationToken, FingerprintEngine, LocalFile, LocalMetadata,
    Platform, PipelineConfig, ResolveMode,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "modelprint")]
#[command(about = "Fingerprint AI model files and fuse their metadata")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute content fingerprints only
    Fingerprint {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Extract embedded metadata, query registries and fuse the results
    Inspect(InspectArgs),
}

#[derive(ClapArgs, Debug)]
struct InspectArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Registries to query
    #[arg(long, value_enum, default_value_t = ResolveArg::All)]
    resolve: ResolveArg,

    /// Files processed concurrently
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Do not download preview images
    #[arg(long)]
    no_previews: bool,

    /// Civitai API token
    #[arg(long, env = "MODELPRINT_CIVITAI_TOKEN", hide_env_values = true)]
    civitai_token: Option<String>,

    /// HuggingFace access token
    #[arg(long, env = "MODELPRINT_HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ResolveArg {
    None,
    Civitai,
    Huggingface,
    All,
}

impl From<ResolveArg> for ResolveMode {
    fn from(arg: ResolveArg) -> Self {
        match arg {
            ResolveArg::None => ResolveMode::Skip,
            ResolveArg::Civitai => ResolveMode::Single(Platform::Civitai),
            ResolveArg::Huggingface => ResolveMode::Single(Platform::HuggingFace),
            ResolveArg::All => ResolveMode::All,
        }
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Command::Inspect(inspect) = &args.command {
        if inspect.civitai_token.is_some() {
            config.registry.civitai_token = inspect.civitai_token.clone();
        }
        if inspect.hf_token.is_some() {
            config.registry.huggingface_token = inspect.hf_token.clone();
        }
        if inspect.no_previews {
            config.registry.fetch_previews = false;
        }
    }

    config.validate()?;
    Ok(config)
}

/// Open every path, logging the ones that cannot be read.
async fn open_all(paths: &[PathBuf]) -> (Vec<Arc<dyn AssetFile>>, usize) {
    let mut files: Vec<Arc<dyn AssetFile>> = Vec::with_capacity(paths.len());
    let mut failed = 0;
    for path in paths {
        match LocalFile::open(path).await {
            Ok(file) => files.push(Arc::new(file)),
            Err(e) => {
                error!("{}", e);
                failed += 1;
            }
        }
    }
    (files, failed)
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

async fn run_fingerprint(config: &PipelineConfig, paths: &[PathBuf], pretty: bool) -> Result<usize> {
    let engine = FingerprintEngine::new(config.fingerprint.clone());
    let (files, failed) = open_all(paths).await;

    let mut results = Vec::with_capacity(files.len());
    for file in &files {
        let fingerprint = engine.fingerprint(file.as_ref()).await;
        results.push(json!({
            "file_name": file.name(),
            "size": file.size(),
            "fingerprint": fingerprint,
        }));
    }

    print_json(&Value::Array(results), pretty)?;
    Ok(failed)
}

async fn run_inspect(config: &PipelineConfig, inspect: &InspectArgs, pretty: bool) -> Result<usize> {
    let pipeline = AssetPipeline::new(config)?;
    let (files, failed) = open_all(&inspect.files).await;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling registry lookups");
            on_interrupt.cancel();
        }
    });

    let reports = pipeline
        .process_batch(files, inspect.resolve.into(), &cancel, inspect.concurrency)
        .await;

    let mut output = Vec::with_capacity(reports.len());
    for report in &reports {
        let mut value = serde_json::to_value(report)?;
        if let LocalMetadata::Container(header) = &report.local {
            value["tensor_summary"] = json!({
                "tensor_count": header.tensor_count(),
                "total_tensor_bytes": header.total_tensor_bytes(),
            });
        }
        output.push(value);
    }

    print_json(&Value::Array(output), pretty)?;
    Ok(failed)
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn command_paths(command: &Command) -> &[PathBuf] {
    match command {
        Command::Fingerprint { files } => files,
        Command::Inspect(inspect) => &inspect.files,
    }
}

fn config_source(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_json);

    let config = load_config(&args)?;
    info!(
        "Config from {}; files: {}",
        config_source(args.config.as_deref()),
        display_paths(command_paths(&args.command))
    );

    let failed = match &args.command {
        Command::Fingerprint { files } => run_fingerprint(&config, files, args.pretty).await?,
        Command::Inspect(inspect) => run_inspect(&config, inspect, args.pretty).await?,
    };

    if failed > 0 {
        anyhow::bail!("{} file(s) could not be read", failed);
    }
    Ok(())
}
