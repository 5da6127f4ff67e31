// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use herd::commands;
use herd::config::Config;
use herd::view::FleetView;
use herd_proto::topic::TopicSpace;
use herd_proto::transport::{Broker, MqttTransport};

#[derive(Parser)]
#[command(name = "herd", version, about = "Fleet client for G-code printers exposed over an MQTT bus.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List all currently known devices.
    List {
        /// Device selector; `*` is a wildcard, `provider/device` scopes it.
        hint: Option<String>,
    },
    /// Send a G-code file to every matched device.
    Send {
        /// Path to the G-code file.
        file: PathBuf,
        /// Device selector.
        hint: Option<String>,
    },
    /// Inspect or assign device and provider aliases.
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
    /// Show the sensor readings of matched devices.
    Sr {
        /// Device selector.
        hint: Option<String>,
    },
}

#[derive(clap::Subcommand)]
enum AliasAction {
    /// List all known aliases.
    List,
    /// Assign an alias; omit ALIAS to remove it.
    #[command(subcommand)]
    Set(AliasTarget),
}

#[derive(clap::Subcommand)]
enum AliasTarget {
    /// Alias a daemon (provider).
    Provider { hint: String, alias: Option<String> },
    /// Alias a single device.
    Device { hint: String, alias: Option<String> },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let filter = tracing_subscriber::EnvFilter::try_new(&cli.config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let client_id = format!("herd-{}", Uuid::new_v4().simple());
    let transport = Arc::new(MqttTransport::connect(&cli.config.broker_config(&client_id))?);
    let view = FleetView::new(
        Arc::clone(&transport) as Arc<dyn Broker>,
        TopicSpace::new(cli.config.prefix.clone()),
        Duration::from_millis(cli.config.print_timeout_ms),
    );

    view.start(&transport);
    transport.start()?;

    // Retained messages carry the fleet state; give them a moment to land.
    std::thread::sleep(Duration::from_millis(cli.config.settle_ms));

    let resolve = cli.config.resolve_aliases();
    let code = match &cli.command {
        Commands::List { hint } => {
            commands::list::run(&view, hint.as_deref().unwrap_or("*"), resolve)
        }
        Commands::Send { file, hint } => {
            commands::send::run(&view, file, hint.as_deref().unwrap_or("*"), resolve)
        }
        Commands::Alias { action } => match action {
            AliasAction::List => commands::alias::list(&view),
            AliasAction::Set(AliasTarget::Provider { hint, alias }) => {
                commands::alias::set_provider(&view, hint, alias.as_deref())
            }
            AliasAction::Set(AliasTarget::Device { hint, alias }) => {
                commands::alias::set_device(&view, hint, alias.as_deref())
            }
        },
        Commands::Sr { hint } => commands::sr::run(&view, hint.as_deref().unwrap_or("*"), resolve),
    };

    view.stop();
    transport.stop();
    Ok(code)
}
