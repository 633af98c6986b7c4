use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rig_bus::LocalBus;
use rig_client::{PollOutcome, RigClient, RigConfig};
use rig_core::{CameraId, DisplayPosition, PortNumber, TestReport};
use rig_store::{ConsoleSnapshot, ConsoleStore, DurableStorage, FileBackend, PortConfig};
use tracing::{debug, info};

use crate::config::Config;
use crate::session::ConsoleSession;

#[derive(Parser, Debug)]
#[command(name = "rig-console")]
#[command(about = "Operator console for the remote-control tester rig")]
pub struct Cli {
    /// Backend base URL; the scheme may be omitted
    #[arg(long, env = "RIG_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// Directory holding persisted port and camera settings
    #[arg(long, env = "RIG_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Directory captured frames are written to
    #[arg(long, env = "RIG_CAPTURE_DIR", global = true)]
    pub capture_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the rig and print state changes until Ctrl-C
    Watch,
    /// List serial devices the backend can see
    Ports,
    /// Connect a port, optionally selecting its device and baud rate first
    Connect {
        port: PortNumber,
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long)]
        baud: Option<u32>,
    },
    /// Close a port
    Disconnect { port: PortNumber },
    /// Send a raw command to a port
    Send {
        port: PortNumber,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Start the button test on a port
    StartTest { port: PortNumber },
    /// Start calibration on a port
    Calibrate { port: PortNumber },
    /// Exchange the cameras shown at two display positions
    Swap { a: DisplayPosition, b: DisplayPosition },
    /// Rotate a camera a quarter turn clockwise
    Rotate { camera: CameraId },
    /// Save a still frame from a camera
    Capture { camera: CameraId },
    /// Print the latest test report
    Report,
    /// Print backend reachability and the persisted layout
    Status,
    /// Start the automated sequence on one side of the rig
    StartProcess {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        side: u8,
    },
    /// Stop the automated sequence
    Stop,
    /// Trigger the emergency stop
    Emergency,
    /// Home the camera axis
    Home,
    /// Reset one of the controller boards
    ResetBoard {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        board: u8,
    },
    /// Print the day's approved and rejected counters
    Counters,
}

impl Cli {
    /// Flags win over the environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.backend_url {
            config.backend_url = url.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(dir) = &self.capture_dir {
            config.capture_dir = dir.clone();
        }
    }
}

pub fn open_session(config: &Config) -> Result<ConsoleSession> {
    let rig_config = RigConfig::new(&config.backend_url)
        .context("invalid backend url")?
        .with_request_timeout(config.request_timeout);
    let client = RigClient::new(rig_config).context("failed to build HTTP client")?;
    let backend = FileBackend::open(&config.state_dir)
        .with_context(|| format!("failed to open state dir {}", config.state_dir.display()))?;
    let storage = DurableStorage::new(Arc::new(backend), Arc::new(LocalBus::new()));
    let store = Arc::new(ConsoleStore::load(storage));
    debug!(
        backend = %client.config().base_url(),
        state_dir = %config.state_dir.display(),
        "console session opened"
    );
    Ok(ConsoleSession::new(client, store, config.capture_dir.clone()))
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let mut session = open_session(&config)?;
    match cli.command {
        Commands::Watch => watch(&mut session, &config).await?,
        Commands::Ports => {
            for port in session.refresh_ports().await? {
                println!("{}\t{}", port.device, port.description);
            }
        }
        Commands::Connect { port, device, baud } => {
            if let Some(device) = device {
                session.select_device(port, &device)?;
            }
            if let Some(baud) = baud {
                session.set_baud_rate(port, baud)?;
            }
            println!("{}", render_port(&session.connect_port(port).await?));
        }
        Commands::Disconnect { port } => {
            println!("{}", render_port(&session.disconnect_port(port).await?));
        }
        Commands::Send { port, command } => {
            session.send_command(port, &command.join(" ")).await?;
        }
        Commands::StartTest { port } => {
            session.start_test(port).await?;
        }
        Commands::Calibrate { port } => {
            session.start_calibration(port).await?;
        }
        Commands::Swap { a, b } => {
            session.swap_cameras(a, b)?;
            println!("{}", render_slots(&session.snapshot()));
        }
        Commands::Rotate { camera } => {
            session.rotate_camera(camera)?;
            println!("{}", render_slots(&session.snapshot()));
        }
        Commands::Capture { camera } => {
            let path = session.capture_frame(camera).await?;
            println!("{}", path.display());
        }
        Commands::Report => match session.client().poll_report().await {
            PollOutcome::Fresh(report) => println!("{}", render_report(&report)),
            PollOutcome::Degraded(reason) | PollOutcome::Unreachable(reason) => {
                bail!("no report available: {reason}")
            }
        },
        Commands::Status => {
            let online = session.client().poll_status().await;
            let snapshot = session.snapshot();
            match online {
                PollOutcome::Fresh(()) => println!("backend: online"),
                PollOutcome::Degraded(reason) | PollOutcome::Unreachable(reason) => {
                    println!("backend: offline ({reason})")
                }
            }
            for config in snapshot.ports.iter() {
                println!("{}", render_port(config));
            }
            println!("{}", render_slots(&snapshot));
        }
        Commands::StartProcess { side } => {
            session.start_process(side).await?;
        }
        Commands::Stop => {
            session.stop_process().await?;
        }
        Commands::Emergency => {
            session.emergency_stop().await?;
        }
        Commands::Home => {
            session.home_camera().await?;
        }
        Commands::ResetBoard { board } => {
            session.reset_board(board).await?;
        }
        Commands::Counters => {
            let counters = session.production_counters().await?;
            println!("approved: {}", counters.approved);
            println!("rejected: {}", counters.rejected);
        }
    }
    if let Some(message) = session.snapshot().message {
        println!("{message}");
    }
    Ok(())
}

async fn watch(session: &mut ConsoleSession, config: &Config) -> Result<()> {
    let mut updates = session.subscribe();
    let mut previous = updates.borrow_and_update().clone();
    println!("{}", render_slots(&previous));

    session.start_polling(config.cadence);
    info!(backend = %config.backend_url, "watching rig, press Ctrl-C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = updates.borrow_and_update().clone();
                for line in describe_changes(&previous, &next) {
                    println!("{line}");
                }
                previous = next;
            }
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }
    session.stop_polling();
    Ok(())
}

/// Human-readable lines for everything that differs between two snapshots.
pub fn describe_changes(previous: &ConsoleSnapshot, next: &ConsoleSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    if previous.server_status != next.server_status {
        lines.push(format!("backend: {:?}", next.server_status).to_lowercase());
    }
    if previous.message != next.message {
        if let Some(message) = &next.message {
            lines.push(message.to_string());
        }
    }
    if previous.report != next.report {
        if let Some(report) = &next.report {
            lines.push(render_report(report));
        }
    }
    if previous.layout != next.layout || previous.rotations != next.rotations {
        lines.push(render_slots(next));
    }
    for (before, after) in previous.ports.iter().zip(next.ports.iter()) {
        if before != after {
            lines.push(render_port(after));
        }
    }
    for camera in CameraId::all() {
        let link = next.camera_link(camera);
        if previous.camera_link(camera) != link {
            let state = match (link.connected, link.has_frame) {
                (true, true) => "streaming",
                (true, false) => "connected, no frame",
                (false, _) => "disconnected",
            };
            lines.push(format!("camera {camera}: {state}"));
        }
    }
    lines
}

pub fn render_slots(snapshot: &ConsoleSnapshot) -> String {
    let slots: Vec<String> = snapshot
        .slots()
        .iter()
        .map(|slot| {
            format!(
                "[{}] camera {} {}",
                slot.display_position, slot.camera_id, slot.rotation
            )
        })
        .collect();
    slots.join("  ")
}

pub fn render_port(config: &PortConfig) -> String {
    let device = if config.has_device() {
        config.selected_device_path.as_str()
    } else {
        "-"
    };
    let state = if config.connected {
        "connected"
    } else {
        "disconnected"
    };
    format!(
        "port {}: {device} @ {} baud, {state}",
        config.port_number, config.baud_rate
    )
}

pub fn render_report(report: &TestReport) -> String {
    let mut out = format!(
        "report: {} approved, {} rejected, {} total",
        report.summary.approved, report.summary.rejected, report.summary.total
    );
    for (control, buttons) in &report.controls {
        let verdict = if report.control_passed(*control) {
            "PASS"
        } else {
            "FAIL"
        };
        out.push_str(&format!("\n  control {control}: {verdict}"));
        for button in buttons {
            let mark = if button.approved { "ok" } else { "x" };
            out.push_str(&format!("\n    {mark} {}", button.button));
        }
    }
    out
}
