use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use terrex_model::{SceneStatus, SensorFamily};

#[derive(Parser, Debug)]
#[command(name = "terrexctl", version)]
#[command(about = "Operate the Terrex production orchestrator")]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, global = true, env = "TERREX_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Env file to load instead of ./.env
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one reconciliation pass
    Reconcile {
        /// Restrict requester-scoped sub-passes to one user
        #[arg(long)]
        requester: Option<String>,
    },
    /// Resubmit scenes whose cluster job vanished, sampling the listing twice
    ResubmitOrphans,
    /// Send every queued or processing scene back to submitted
    ResetProcessing,
    /// Kill a requester's cluster jobs and resubmit their scenes
    KillJobs {
        #[arg(long)]
        requester: String,
    },
    /// Purge expired orders now, ignoring the shared lease
    Purge,
    /// Place a self-service order from a JSON request file
    Submit {
        /// `{"requester", "email", "scenes": [{"name", "sensor"}], ...}`
        request: PathBuf,
    },
    /// Cancel an order
    Cancel { orderid: String },
    /// Per-scene operations used by the processing tier
    #[command(subcommand)]
    Scene(SceneCommand),
    /// Inspect the processing queue
    #[command(subcommand)]
    Process(ProcessCommand),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone)]
pub struct SceneRef {
    pub orderid: String,
    pub name: String,
}

#[derive(Subcommand, Debug)]
pub enum SceneCommand {
    /// Show the stored scene
    Show {
        #[command(flatten)]
        scene: SceneRef,
    },
    /// Record a finished product
    Complete {
        #[command(flatten)]
        scene: SceneRef,
        #[arg(long)]
        location: String,
        #[arg(long, default_value = "")]
        checksum: String,
        /// File holding the processing log
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Route a processing failure through the error classifier
    Error {
        #[command(flatten)]
        scene: SceneRef,
        #[arg(long, conflicts_with = "log_file")]
        log: Option<String>,
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Mark a scene unavailable
    Unavailable {
        #[command(flatten)]
        scene: SceneRef,
        #[arg(long)]
        note: String,
    },
    /// Schedule a retry
    Retry {
        #[command(flatten)]
        scene: SceneRef,
        /// Seconds until the retry matures
        #[arg(long, default_value_t = 3600)]
        after_secs: u64,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Update status and processing location of a running scene
    Status {
        #[command(flatten)]
        scene: SceneRef,
        #[arg(long)]
        status: Option<SceneStatus>,
        #[arg(long)]
        location: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProcessCommand {
    /// List oncache scenes ready to run, oldest order first
    List {
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long = "sensor")]
        sensors: Vec<SensorFamily>,
        #[arg(long)]
        requester: Option<String>,
    },
    /// Mark scenes as queued under a cluster job
    Queue {
        /// `<orderid>/<scene>` pairs
        #[arg(required = true, value_parser = parse_pair)]
        scenes: Vec<(String, String)>,
        #[arg(long)]
        location: String,
        #[arg(long)]
        job: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets masked
    Print,
    /// Load and validate, then exit
    Check,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('/') {
        Some((orderid, scene)) if !orderid.is_empty() && !scene.is_empty() => {
            Ok((orderid.to_string(), scene.to_string()))
        }
        _ => Err(format!("expected <orderid>/<scene>, got {raw:?}")),
    }
}
