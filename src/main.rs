//! dcagent CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use dcagent::prelude::*;

/// Industrial data-collection agent.
#[derive(Parser, Debug)]
#[command(name = "dcagent", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent from a configuration file
    Run {
        /// Path to the TOML configuration
        config: PathBuf,

        /// Restrict to these driver ids (default: all enabled drivers)
        #[arg(long = "driver")]
        drivers: Vec<String>,
    },

    /// List supported protocols
    ListProtocols,

    /// Print an example configuration
    Example,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, drivers } => {
            if let Err(e) = run(config, drivers).await {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::ListProtocols => list_protocols(),
        Commands::Example => print_example(),
    }
}

async fn run(config: PathBuf, drivers: Vec<String>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let registry = DriverRegistry::with_builtin();
    let store = FileConfigStore::from_path(&config)?;
    let sink = Arc::new(MemorySink::new());

    let manager = DriverManager::load(&registry, &store, sink, &drivers).await?;
    if manager.is_empty() {
        error!("no drivers loaded, check the configuration");
        return Ok(());
    }

    manager.start_all().await;
    info!(drivers = manager.len(), "agent running, ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AgentError::Config(format!("signal handler: {}", e)))?;

    info!("shutting down");
    manager.stop_all().await;
    Ok(())
}

fn list_protocols() {
    let registry = DriverRegistry::with_builtin();

    println!("Supported protocols:");
    for protocol in registry.protocols() {
        println!("  {}", protocol);
    }
}

fn print_example() {
    println!(
        r#"# dcagent configuration

[[drivers]]
id = "plc1"
name = "Line 1 PLC"
url = "s7://192.168.0.10:102?rack=0&slot=1&interval=1000"

[[tags]]
driver_id = "plc1"
name = "motor_running"
address = "DB1.DBX0.3"
datatype = "bool"

[[tags]]
driver_id = "plc1"
name = "motor_cmd"
address = "Q5.2"
datatype = "bool"
writable = true

[[tags]]
driver_id = "plc1"
name = "line_speed"
address = "DB1.DBW16"
datatype = "uint16"

[[tags]]
driver_id = "plc1"
name = "temperature"
address = "DB1.DBD32"
datatype = "float32"

[[tags]]
driver_id = "plc1"
name = "batch_label"
address = "DB2.STRING10(20)"
datatype = "string"
writable = true
"#
    );
}
