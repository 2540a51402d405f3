// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use adbflow::parser::{focused_component, parse_size_arg};
use adbflow::{
    Adb, AdbBridge, CheckerRegistry, Command, Device, DeviceConfig, DispatchOutcome, Rect2,
    TaskFlow, Vector2,
};
use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adbflow")]
#[command(about = "Drive Android devices with scripted input flows", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the adb binary
    #[arg(long, env = "ADB_PATH", default_value = "adb", global = true)]
    adb: PathBuf,

    /// Target device serial (defaults to the first connected device)
    #[arg(short, long, env = "ANDROID_SERIAL", global = true)]
    serial: Option<String>,

    /// Resolution coordinates are authored against
    #[arg(long, value_parser = parse_size_arg, default_value = "1280x720", global = true)]
    command_resolution: Vector2,

    /// Verify the device is connected before each command
    #[arg(long, global = true)]
    check_connected: bool,

    /// Timeout for a single adb invocation, in seconds
    #[arg(long, global = true)]
    adb_timeout: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached devices
    Devices,
    /// Run a JSON flow description
    Run {
        flow: PathBuf,
        /// Task to start from (defaults to the first task)
        #[arg(long)]
        start: Option<String>,
    },
    /// Tap a point, jittered inside an optional area
    Tap {
        x: i32,
        y: i32,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Swipe between two points
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        /// Gesture duration in milliseconds
        #[arg(long, default_value_t = 500)]
        duration: u64,
    },
    /// Send a key event code
    Key { code: i32 },
    /// Type text
    Text { content: String },
    /// Show the focused window
    Activity,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "adbflow=info",
        1 => "adbflow=debug",
        _ => "adbflow=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn select_device(adb: &Adb, serial: Option<&str>) -> Result<Arc<Device>> {
    let device = adb
        .device(serial)
        .await
        .context("Failed to list devices")?;
    match device {
        Some(device) => Ok(device),
        None => match serial {
            Some(serial) => bail!("Device '{}' not found", serial),
            None => bail!("No connected device found"),
        },
    }
}

async fn send(device: &Device, command: Command) -> Result<()> {
    let command = command
        .with_pre_delay(Duration::ZERO)
        .with_post_delay(Duration::ZERO);
    match device.issue_command(command).await? {
        DispatchOutcome::Finished => Ok(()),
        DispatchOutcome::CheckFailed => bail!("Command check failed"),
        DispatchOutcome::Disconnected => bail!("Device {} is not connected", device.serial()),
    }
}

async fn run_flow(device: Arc<Device>, path: PathBuf, start: Option<String>) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl-C, stopping after the current task...");
        s.store(true, Ordering::SeqCst);
    })?;

    let registry = CheckerRegistry::with_builtins();
    let flow = TaskFlow::from_path(device, &path, &registry)
        .with_context(|| format!("Failed to load flow '{}'", path.display()))?
        .with_stop_flag(stop);

    info!(flow = %path.display(), tasks = flow.tasks().len(), "running flow");
    flow.run(start.as_deref()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut bridge = AdbBridge::new(cli.adb.clone());
    if let Some(secs) = cli.adb_timeout {
        bridge = bridge.with_timeout(Duration::from_secs(secs));
    }
    let config = DeviceConfig {
        command_resolution: cli.command_resolution,
        auto_check_connected: cli.check_connected,
        ..DeviceConfig::default()
    };
    let adb = Adb::new(Arc::new(bridge)).with_device_config(config);

    let serial = cli.serial.as_deref();

    match cli.command {
        Commands::Devices => {
            let devices = adb.list_devices().await.context("Failed to list devices")?;
            for entry in devices {
                let state = if entry.connected { "connected" } else { "offline" };
                println!("{}\t{}", entry.serial, state);
            }
        }
        Commands::Run { flow, start } => {
            let device = select_device(&adb, serial).await?;
            run_flow(device, flow, start).await?
        }
        Commands::Tap { x, y, width, height } => {
            let device = select_device(&adb, serial).await?;
            let rect = Rect2 { x, y, width, height };
            send(&device, Command::tap(rect)).await?
        }
        Commands::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration,
        } => {
            let device = select_device(&adb, serial).await?;
            let command = Command::swipe(Rect2::point(x1, y1), Rect2::point(x2, y2))
                .with_duration(Duration::from_millis(duration));
            send(&device, command).await?
        }
        Commands::Key { code } => {
            let device = select_device(&adb, serial).await?;
            send(&device, Command::key_event(code)).await?
        }
        Commands::Text { content } => {
            let device = select_device(&adb, serial).await?;
            send(&device, Command::text(content)).await?
        }
        Commands::Activity => {
            let device = select_device(&adb, serial).await?;
            let focus = device.current_activity().await?;
            match focused_component(&focus) {
                Some(component) => println!("{}", component),
                None => println!("{}", focus),
            }
        }
    }

    Ok(())
}
