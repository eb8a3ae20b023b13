//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    poll: PollInfo,
    devices: Vec<DeviceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct PollInfo {
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    failure_threshold: u32,
}

#[derive(Serialize)]
struct DeviceInfo {
    id: String,
    driver: String,
    poll_interval_ms: u64,
    base_topic: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    initial_commands: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    read_commands: Vec<String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let config_info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&config_info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &contracts::LoggerBlueprint, args: &InfoArgs) -> ConfigInfo {
    let devices = blueprint
        .devices
        .iter()
        .map(|d| {
            let (columns, initial_commands, read_commands) = if args.devices {
                (
                    d.column_names.clone(),
                    d.initial_commands.clone(),
                    d.read_commands.clone(),
                )
            } else {
                (Vec::new(), Vec::new(), Vec::new())
            };
            DeviceInfo {
                id: d.id.clone(),
                driver: format!("{:?}", d.driver),
                poll_interval_ms: d.poll_interval_ms,
                base_topic: d.base_topic.clone(),
                columns,
                initial_commands,
                read_commands,
            }
        })
        .collect();

    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        poll: PollInfo {
            backoff_base_ms: blueprint.poll.backoff_base_ms,
            backoff_max_ms: blueprint.poll.backoff_max_ms,
            failure_threshold: blueprint.poll.failure_threshold,
        },
        devices,
        sinks,
    }
}

fn print_config_info(blueprint: &contracts::LoggerBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Lab Logger Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⚙️  Retry Policy");
    println!("   ├─ Backoff base: {} ms", blueprint.poll.backoff_base_ms);
    println!("   ├─ Backoff max: {} ms", blueprint.poll.backoff_max_ms);
    println!(
        "   └─ Failure threshold: {}",
        blueprint.poll.failure_threshold
    );

    println!("\n🔬 Devices ({})", blueprint.devices.len());
    for (i, device) in blueprint.devices.iter().enumerate() {
        let is_last = i == blueprint.devices.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({:?}, every {} ms)",
            prefix, device.id, device.driver, device.poll_interval_ms
        );

        if args.devices {
            println!(
                "   {}  ├─ columns: {}",
                child_prefix,
                device.column_names.join(", ")
            );
            println!(
                "   {}  ├─ read: {}",
                child_prefix,
                device.read_commands.join(" ; ")
            );
            println!("   {}  └─ topic: {}", child_prefix, device.base_topic);
        } else {
            println!(
                "   {}  └─ {} channels -> {}",
                child_prefix,
                device.column_names.len(),
                device.base_topic
            );
        }
    }

    if !blueprint.sinks.is_empty() {
        println!("\n📤 Sinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            let is_last = i == blueprint.sinks.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            if args.sinks {
                println!(
                    "   {} {} ({:?}, queue {})",
                    prefix, sink.name, sink.sink_type, sink.queue_capacity
                );
            } else {
                println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
            }
        }
    }

    println!();
}
