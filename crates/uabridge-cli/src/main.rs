//! Command-line interface for uabridge.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uabridge_commands::{Bridge, ExecuteOptions};
use uabridge_core::config::env_vars;
use uabridge_devices::{ProfileRegistry, SimulatedTransport};

use crate::config::BridgeConfig;

/// uabridge - run device commands against OPC-UA servers.
#[derive(Parser, Debug)]
#[command(name = "uabridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file.
    #[arg(short, long, global = true, default_value = "config/uabridge.toml")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a device command and print the result as JSON.
    Exec {
        /// Device name.
        device: String,
        /// Command name.
        command: String,
        /// JSON arguments; present means `set`, absent means `get`.
        #[arg(short, long)]
        args: Option<String>,
        /// Bypass the result cache.
        #[arg(short, long)]
        immediate: bool,
        /// Deadline for the whole command, in milliseconds.
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Run the command this many times in a row.
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// List configured devices.
    Devices,
    /// List configured profiles and their commands.
    Profiles,
    /// Validate the configuration and exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    match args.command {
        Command::Exec {
            device,
            command,
            args: arguments,
            immediate,
            deadline_ms,
            repeat,
        } => {
            let arguments = arguments
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--args is not valid JSON")?;
            let options = ExecuteOptions {
                immediate,
                deadline: deadline_ms.map(Duration::from_millis),
            };
            run_exec(config, &device, &command, arguments, options, repeat).await
        }
        Command::Devices => {
            list_devices(&config);
            Ok(())
        }
        Command::Profiles => {
            list_profiles(&config);
            Ok(())
        }
        Command::Check => {
            println!(
                "Configuration OK: {} profile(s), {} device(s), endpoint {}",
                config.profiles.len(),
                config.devices.len(),
                config.transport.endpoint
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "uabridge=debug,uabridge_commands=debug,uabridge_devices=debug"
    } else {
        "warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // Logs go to stderr so command output on stdout stays machine-readable
    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn build_bridge(config: BridgeConfig) -> Result<Bridge> {
    let registry = Arc::new(ProfileRegistry::new());
    for profile in config.profiles {
        registry.register_profile(profile).await?;
    }
    for device in config.devices {
        registry.register_device(device).await?;
    }

    let transport = Arc::new(SimulatedTransport::from_config(
        &config.transport.endpoint,
        &config.simulation,
    ));
    tracing::info!(endpoint = %config.transport.endpoint, "Using simulated transport");

    let bridge = Bridge::start(config.dispatcher, config.coordinator, registry, transport).await?;
    Ok(bridge)
}

async fn run_exec(
    config: BridgeConfig,
    device: &str,
    command: &str,
    arguments: Option<serde_json::Value>,
    options: ExecuteOptions,
    repeat: u32,
) -> Result<()> {
    let bridge = build_bridge(config).await?;

    for _ in 0..repeat.max(1) {
        let response = bridge
            .execute(device, command, arguments.as_ref(), options)
            .await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    let dropped = bridge.shutdown().await?;
    if dropped > 0 {
        tracing::warn!(dropped, "Discarded queued messages at shutdown");
    }
    Ok(())
}

fn list_devices(config: &BridgeConfig) {
    for device in &config.devices {
        println!(
            "{:<20} {:<16} {:<32} {:?}",
            device.name, device.profile, device.endpoint, device.admin_state
        );
    }
}

fn list_profiles(config: &BridgeConfig) {
    for profile in &config.profiles {
        println!("{} ({} objects)", profile.name, profile.objects.len());
        for command in &profile.commands {
            let objects = |ops: &[uabridge_devices::ResourceOperation]| {
                ops.iter()
                    .map(|op| op.object.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            println!(
                "  {:<16} get [{}] set [{}]",
                command.name,
                objects(&command.get),
                objects(&command.set)
            );
        }
    }
}
