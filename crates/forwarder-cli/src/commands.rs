//! CLI command definitions and handlers

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use forwarder_core::{ForwarderSettings, StreamCategory, StreamRegistry};
use forwarder_observability::{routes, ForwarderHealth};
use forwarder_streaming::{
    ConsumerFactory, DecodeFailurePolicy, ForwarderOptions, ForwarderStats, ForwardingLoop,
    RedisCache, RedisTaskQueue, ShutdownFlag,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Main CLI structure
#[derive(Parser)]
#[command(name = "ingest-forwarder")]
#[command(about = "Forwards ingest events from Kafka into the preprocessing pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a forwarding consumer until interrupted
    Run(RunArgs),

    /// Print the topic and cluster a category resolves to
    Resolve {
        /// Stream category
        #[arg(short, long, value_parser = parse_category)]
        category: StreamCategory,

        /// Settings file (JSON)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
}

/// Arguments of the `run` command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stream category to consume
    #[arg(short, long, value_parser = parse_category)]
    pub category: StreamCategory,

    /// Consumer group used for offset tracking
    #[arg(short = 'g', long, default_value = "ingest-consumer")]
    pub consumer_group: String,

    /// Maximum messages per poll and commit
    #[arg(long, default_value = "100")]
    pub commit_batch_size: usize,

    /// Maximum seconds a poll waits for messages
    #[arg(long, default_value = "1.0")]
    pub max_batch_time: f64,

    /// Settings file (JSON)
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Override the Redis URL from the settings file
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Override the task queue from the settings file
    #[arg(long)]
    pub task_queue: Option<String>,

    /// Handling of undecodable messages
    #[arg(long, default_value = "fail")]
    pub on_decode_error: DecodeErrorArg,

    /// Address to serve /health and /metrics on
    #[arg(long)]
    pub health_addr: Option<SocketAddr>,
}

/// Decode failure policy options
#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum DecodeErrorArg {
    Fail,
    Skip,
}

impl From<DecodeErrorArg> for DecodeFailurePolicy {
    fn from(arg: DecodeErrorArg) -> Self {
        match arg {
            DecodeErrorArg::Fail => DecodeFailurePolicy::Fail,
            DecodeErrorArg::Skip => DecodeFailurePolicy::SkipAndLog,
        }
    }
}

fn parse_category(value: &str) -> Result<StreamCategory, String> {
    value.parse().map_err(|e: forwarder_core::ConfigurationError| e.to_string())
}

/// Command execution result
pub struct CommandResult {
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Load the settings file, or the defaults when none is given
pub fn load_settings(path: Option<&Path>) -> Result<ForwarderSettings> {
    match path {
        Some(path) => ForwarderSettings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(ForwarderSettings::default()),
    }
}

/// Execute CLI commands
#[derive(Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, command: Commands) -> Result<CommandResult> {
        match command {
            Commands::Run(args) => self.run(args).await,
            Commands::Resolve { category, settings } => self.resolve(category, settings.as_deref()),
        }
    }

    fn resolve(&self, category: StreamCategory, settings: Option<&Path>) -> Result<CommandResult> {
        let settings = load_settings(settings)?;
        let stream = StreamRegistry::new(settings.kafka).resolve(category)?;

        Ok(CommandResult {
            message: format!("{} -> {} on {}", category, stream.topic, stream.cluster),
            data: Some(serde_json::to_value(&stream)?),
        })
    }

    async fn run(&self, args: RunArgs) -> Result<CommandResult> {
        let mut settings = load_settings(args.settings.as_deref())?;
        if let Some(url) = args.redis_url {
            settings.redis.url = url;
        }
        if let Some(queue) = args.task_queue {
            settings.redis.task_queue = queue;
        }

        let options = ForwarderOptions::from_settings(&settings)
            .with_commit_batch_size(args.commit_batch_size)
            .with_max_batch_time_secs(args.max_batch_time)?
            .with_decode_policy(args.on_decode_error.into());
        options.validate()?;

        let cache = RedisCache::connect(&settings.redis.url)
            .await
            .context("connecting to the staging cache")?;
        let scheduler = RedisTaskQueue::connect(&settings.redis.url, settings.redis.task_queue.clone())
            .await
            .context("connecting to the task queue")?;
        let consumer = ConsumerFactory::from_settings(&settings.kafka)
            .create(&args.consumer_group, args.category)?;

        let shutdown = ShutdownFlag::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current batch");
                signal.request();
            }
        });

        let stats = Arc::new(ForwarderStats::new());
        if let Some(addr) = args.health_addr {
            let monitor = Arc::new(ForwarderHealth::new(Arc::clone(&stats)));
            tokio::spawn(async move {
                if let Err(e) = routes::serve(addr, monitor).await {
                    error!("Health endpoint failed: {}", e);
                }
            });
        }

        let summary = ForwardingLoop::new(consumer, Arc::new(cache), Arc::new(scheduler), options)
            .with_shutdown(shutdown)
            .with_stats(stats)
            .run()
            .await?;

        Ok(CommandResult {
            message: format!(
                "Forwarded {} messages in {} batches",
                summary.messages_forwarded, summary.batches_committed
            ),
            data: Some(serde_json::to_value(&summary)?),
        })
    }
}
