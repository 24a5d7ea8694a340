//! `milight`: send commands to a Milight V6 bridge.
//!
//! ```text
//! milight --bridge-id ACCF23F57AD4 --host 192.168.1.40 --zone 1 on
//! milight --config bridge.yaml --bulb rgbw brightness 40
//! milight --config bridge.yaml monitor
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{select, Receiver};
use milight_protocol::bulb::{category, BulbCommand, BulbType, CommandKind};
use milight_session::{
    BridgeSessionManager, DatagramSink, QueueItem, QueuedSend, SessionConfig, SessionError,
    SessionObserver, SessionState,
};
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "milight")]
#[command(about = "Control lights through a Milight V6 bridge", long_about = None)]
struct Cli {
    /// YAML session config; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bridge MAC, e.g. ACCF23F57AD4
    #[arg(long)]
    bridge_id: Option<String>,

    /// Bridge address (broadcast when omitted)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Bridge UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Bridge password as four hex digits
    #[arg(long, value_parser = parse_password)]
    password: Option<[u8; 2]>,

    /// Bulb family
    #[arg(short, long, value_enum, default_value_t = Bulb::RgbCw)]
    bulb: Bulb,

    /// Zone (0 addresses all zones)
    #[arg(short, long, default_value_t = 1)]
    zone: u8,

    /// Seconds to wait for the session
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Bulb {
    /// Lamp built into the bridge
    Bridge,
    /// RGBW bulbs
    Rgbw,
    /// RGB + cold/warm white bulbs
    RgbCw,
}

impl From<Bulb> for BulbType {
    fn from(bulb: Bulb) -> Self {
        match bulb {
            Bulb::Bridge => BulbType::BridgeLamp,
            Bulb::Rgbw => BulbType::Rgbw,
            Bulb::RgbCw => BulbType::RgbCw,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Switch on
    On,
    /// Switch off
    Off,
    /// Night light
    Night,
    /// White mode
    White,
    /// Brightness in percent
    Brightness { value: u8 },
    /// Hue (0-255)
    Hue { value: u8 },
    /// Saturation in percent
    Saturation { value: u8 },
    /// Color temperature in percent
    Temperature { value: u8 },
    /// Pair the bulb with the zone (power it on right before)
    Link,
    /// Unpair the bulb from the zone (power it on right before)
    Unlink,
    /// Keep the session open and log state changes until Ctrl+C
    Monitor,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("no bridge id: pass --bridge-id or --config")]
    MissingBridgeId,

    #[error("no session with bridge within {0} s")]
    Timeout(u64),
}

fn parse_password(s: &str) -> Result<[u8; 2], String> {
    let bytes = hex::decode(s.replace(':', "")).map_err(|e| e.to_string())?;
    <[u8; 2]>::try_from(bytes.as_slice()).map_err(|_| "expected two bytes".to_string())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<SessionConfig, CliError> {
    let mut config = match (&cli.config, &cli.bridge_id) {
        (Some(path), _) => SessionConfig::load(path)?,
        (None, Some(bridge_id)) => SessionConfig::new(bridge_id.clone()),
        (None, None) => return Err(CliError::MissingBridgeId),
    };
    if let Some(bridge_id) = &cli.bridge_id {
        config.bridge_id = bridge_id.clone();
    }
    if let Some(host) = cli.host {
        config = config.with_host(host);
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(password) = cli.password {
        config = config.with_password(password);
    }
    Ok(config)
}

fn bulb_command(command: &Command) -> Option<BulbCommand> {
    Some(match *command {
        Command::On => BulbCommand::On,
        Command::Off => BulbCommand::Off,
        Command::Night => BulbCommand::NightMode,
        Command::White => BulbCommand::White,
        Command::Brightness { value } => BulbCommand::Brightness(value),
        Command::Hue { value } => BulbCommand::Hue(value),
        Command::Saturation { value } => BulbCommand::Saturation(value),
        Command::Temperature { value } => BulbCommand::ColorTemperature(value),
        Command::Link | Command::Unlink | Command::Monitor => return None,
    })
}

fn wait_until_valid(
    states: &Receiver<(SessionState, SocketAddr)>,
    timeout: u64,
) -> Result<SocketAddr, CliError> {
    let deadline = Instant::now() + Duration::from_secs(timeout);
    loop {
        let left = deadline
            .checked_duration_since(Instant::now())
            .ok_or(CliError::Timeout(timeout))?;
        match states.recv_timeout(left) {
            Ok((state, addr)) if state.is_valid() => return Ok(addr),
            Ok((state, _)) => debug!("session {}", state),
            Err(_) => return Err(CliError::Timeout(timeout)),
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let bulb = BulbType::from(cli.bulb);

    let (states_tx, states) = crossbeam_channel::unbounded();
    let observer: Arc<dyn SessionObserver> =
        Arc::new(move |state: SessionState, addr: SocketAddr| {
            let _ = states_tx.send((state, addr));
        });
    let manager = BridgeSessionManager::new(&config, observer)?;
    manager.start()?;

    if let Command::Monitor = cli.command {
        return monitor(&manager, &states);
    }

    let bridge_addr = wait_until_valid(&states, cli.timeout)?;
    info!("session {} with {} at {}", manager.session(), manager.bridge_id(), bridge_addr);

    let item = match bulb_command(&cli.command) {
        Some(command) => {
            let frame = manager.make_bulb_command(bulb, cli.zone, command)?;
            QueueItem::repeatable(bridge_addr, category(bulb, cli.zone, command.kind()), frame)
        }
        None => {
            let link = matches!(cli.command, Command::Link);
            let frame = manager.make_link(bulb.type_byte(), cli.zone, link);
            QueueItem::non_repeatable(
                bridge_addr,
                category(bulb, cli.zone, CommandKind::Power),
                frame,
            )
        }
    };

    let sink: Arc<dyn DatagramSink> = manager.socket();
    let queue = QueuedSend::from_config(sink, &config);
    queue.start()?;
    queue.enqueue(item)?;
    while !queue.is_empty() {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(config.delay());
    info!("sent to {} zone {}", bulb.name(), cli.zone);

    queue.close();
    manager.close();
    Ok(())
}

fn monitor(
    manager: &BridgeSessionManager,
    states: &Receiver<(SessionState, SocketAddr)>,
) -> Result<(), CliError> {
    let (stop_tx, stop) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    info!("monitoring {}, Ctrl+C to stop", manager.bridge_id());
    loop {
        let event = select! {
            recv(stop) -> _ => None,
            recv(states) -> state => state.ok(),
        };
        match event {
            Some((SessionState::ValidKeepAlive, _)) => debug!("keep-alive confirmed"),
            Some((state, addr)) => info!("{} ({})", state, addr),
            None => break,
        }
    }
    manager.close();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
