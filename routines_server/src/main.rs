use anyhow::Context;
use clap::Parser;
use routines_common::logging::init_logging;
use routines_server::{
    CONFIG_ENV, ConfigFile, MemoryLimit, ServerConfig, TaskRegistry, demo, start_server,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Runs registered routines and streams their progress over HTTP.
///
/// Settings come from the built-in defaults, then the config file, then these
/// flags.
#[derive(Parser, Debug)]
#[command(name = "routines_server")]
#[command(version, about)]
struct Args {
    /// Address to bind the HTTP server. Port 0 picks a free port.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// TOML config file with [defaults] and [actions.<action>] tables.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Register the demo routines.
    #[arg(long)]
    demo: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to a rolling file in the user cache directory instead of stderr.
    #[arg(long)]
    log_to_file: bool,

    /// Output chunks a run may queue before it waits for the client.
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Execution-time ceiling every run starts from, in seconds. 0 is unlimited.
    #[arg(long)]
    ambient_exec_time: Option<u64>,

    /// Memory ceiling every run starts from, such as 128M or -1 for unlimited.
    #[arg(long, allow_hyphen_values = true)]
    ambient_memory_limit: Option<MemoryLimit>,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(secs) = self.ambient_exec_time {
            config.ambient_exec_time_secs = secs;
        }
        if let Some(limit) = self.ambient_memory_limit {
            config.ambient_memory_limit = limit;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging("routines_server", &args.log_level, args.log_to_file)?;

    let file = ConfigFile::discover(args.config.as_deref()).context("Failed to load config")?;
    let mut config = ServerConfig::default();
    let mut with_demo = args.demo;
    if let Some(file) = &file {
        config.apply_file(file);
        with_demo |= file.demo.unwrap_or(false);
    }
    args.apply(&mut config);

    let mut builder = TaskRegistry::builder();
    if with_demo {
        builder = demo::register(builder);
    }
    let registry = builder.build()?;
    if registry.is_empty() {
        tracing::warn!("No routines registered. Start with --demo to try the sample routines.");
    }

    tracing::info!(
        bind_addr = %config.bind_addr,
        tasks = registry.len(),
        "Starting routines server"
    );
    start_server(config, Arc::new(registry)).await?;
    Ok(())
}
