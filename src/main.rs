//! Sensor node: host simulation entry point.
//!
//! Runs the measurement loop against simulated hardware, in real time.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HostBoard: HostClock · HostRtc · NvsAdapter · DirCard         │
//! │             LoopbackRadio · MemFlasher · simulated sensors     │
//! │  SimPin (PIR, feeders) · SimOneWire (probe) · LogEventSink     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            MeasurementLoop (pure logic)                │    │
//! │  │  FSM · timers · PIR filter · codec · SD log · update   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  PollScheduler: radio pump · measurement loop · console        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Console commands (`date`, `log`, `dir`, `tree`, `mode`, `provision`)
//! are read line by line from stdin.
#![deny(unused_must_use)]

use std::cell::RefCell;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use log::{info, warn};

use sensornode::adapters::card::DirCard;
use sensornode::adapters::hardware::{HostBoard, SimOneWire, SimPin};
use sensornode::adapters::log_sink;
use sensornode::adapters::nvs::NvsAdapter;
use sensornode::adapters::radio::LoopbackRadio;
use sensornode::app::commands::{self, ConsoleCommand};
use sensornode::app::ports::{ConfigError, ConfigPort};
use sensornode::app::service::MeasurementLoop;
use sensornode::config::NodeConfig;
use sensornode::error::Error;
use sensornode::fsm::StateId;
use sensornode::measurement::Format;
use sensornode::provisioning::ProvisioningRecord;
use sensornode::scheduler::{PollScheduler, Pollable};
use sensornode::sensors::probe::Probe;

type NodeLoop = MeasurementLoop<HostBoard, SimPin, SimOneWire>;

#[derive(Debug, Parser)]
#[command(version, about = "LoRaWAN sensor node, host simulation")]
struct Args {
    /// JSON node config; falls back to the one saved in NVS, then defaults.
    #[arg(long, env = "SENSORNODE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory standing in for the SD card.  Missing = no card.
    #[arg(long, default_value = "sdcard")]
    card: PathBuf,

    /// NVS backing file.  Without it the store lives in memory.
    #[arg(long)]
    nvs: Option<PathBuf>,

    /// Provision the radio with this DevEUI (16 hex digits, MSB first).
    #[arg(long)]
    dev_eui: Option<String>,

    /// Simulated DS18B20 reading in °C (format 0x23).
    #[arg(long, default_value_t = 21.0)]
    probe_celsius: f32,
}

// ── Pollables ─────────────────────────────────────────────────

/// The loop as one scheduler slot; the console borrows it between polls.
struct LoopTask<'a>(&'a RefCell<NodeLoop>);

impl Pollable for LoopTask<'_> {
    fn name(&self) -> &'static str {
        "measurement-loop"
    }

    fn poll(&mut self) {
        self.0.borrow_mut().poll();
    }
}

/// Executes console lines fed by the stdin reader thread.
struct Console<'a> {
    lp: &'a RefCell<NodeLoop>,
    lines: Receiver<String>,
    open: bool,
}

impl Pollable for Console<'_> {
    fn name(&self) -> &'static str {
        "console"
    }

    fn poll(&mut self) {
        if !self.open {
            return;
        }
        loop {
            let line = match self.lines.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let mut lp = self.lp.borrow_mut();
            let reply = ConsoleCommand::parse(&line).and_then(|cmd| commands::execute(&mut *lp, cmd));
            match reply {
                Ok(reply) => println!("{reply}"),
                Err(e) => println!("? {e}"),
            }
        }
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ── Setup ─────────────────────────────────────────────────────

fn load_config(args: &Args, nvs: &NvsAdapter) -> Result<NodeConfig> {
    if let Some(path) = &args.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config = NodeConfig::from_json(&text)
            .map_err(Error::from)
            .with_context(|| format!("invalid config: {}", path.display()))?;
        info!("Config loaded from {}", path.display());
        return Ok(config);
    }
    match nvs.load() {
        Ok(config) => {
            info!("Config loaded from NVS");
            Ok(config)
        }
        Err(ConfigError::NotFound) => Ok(NodeConfig::default()),
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            Ok(NodeConfig::default())
        }
    }
}

fn parse_dev_eui(text: &str) -> Result<[u8; 8]> {
    let text = text.trim();
    if text.len() != 16 || !text.is_ascii() {
        return Err(anyhow!("DevEUI must be 16 hex digits"));
    }
    let mut eui = [0u8; 8];
    for (i, byte) in eui.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&text[2 * i..2 * i + 2], 16)
            .with_context(|| format!("bad DevEUI: {text}"))?;
    }
    // stored in wire order
    eui.reverse();
    Ok(eui)
}

fn install_logger() -> Result<()> {
    log_sink::init(log_sink::DebugFlags::DEFAULT).map_err(|e| anyhow!("failed to install logger: {e}"))
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    install_logger()?;

    let mut nvs = match &args.nvs {
        Some(path) => NvsAdapter::open(path),
        None => NvsAdapter::new(),
    };
    let config = load_config(&args, &nvs)?;
    log_sink::set_mask(config.debug_mask);

    info!("╔══════════════════════════════════════╗");
    info!("║  Sensor node v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    if let Some(text) = &args.dev_eui {
        let record = ProvisioningRecord {
            dev_eui: parse_dev_eui(text)?,
            ..ProvisioningRecord::load(&nvs).unwrap_or_default()
        };
        record
            .save(&mut nvs)
            .map_err(|e| anyhow!("{e}"))
            .context("failed to store provisioning record")?;
    }
    let provisioned = ProvisioningRecord::load(&nvs).is_some();
    if !provisioned {
        warn!("not provisioned: uplinks disabled, logging to SD only");
    }
    if let Err(e) = nvs.save(&config) {
        warn!("config not saved to NVS: {}", e);
    }

    // ── Board ─────────────────────────────────────────────────
    let radio = LoopbackRadio::new(provisioned);
    let mut radio_pump = radio.pump();
    let board = HostBoard::new(nvs, DirCard::new(&args.card), radio);

    let probe = (config.format == Format::Probe)
        .then(|| Probe::new(SimOneWire::with_probe(args.probe_celsius)));
    let pir = SimPin::new(false);
    let feeders = [SimPin::new(true), SimPin::new(true)];

    let lp = RefCell::new(MeasurementLoop::new(config, board, pir, feeders, probe));
    {
        let mut lp = lp.borrow_mut();
        lp.begin();
        lp.request_active(true);
    }

    // ── Scheduler ─────────────────────────────────────────────
    let mut loop_task = LoopTask(&lp);
    let mut console = Console {
        lp: &lp,
        lines: spawn_stdin_reader(),
        open: true,
    };
    let mut sched = PollScheduler::new();
    for item in [
        &mut radio_pump as &mut dyn Pollable,
        &mut loop_task,
        &mut console,
    ] {
        if sched.register(item).is_none() {
            return Err(anyhow!("scheduler full"));
        }
    }

    info!("System ready. Entering poll loop.");
    loop {
        sched.poll();

        let lp = lp.borrow();
        if lp.hw().resets() > 0 {
            info!("reset requested after {} polls, exiting", lp.poll_count());
            return Ok(());
        }
        if lp.state() == StateId::Final {
            info!("measurement loop stopped");
            return Ok(());
        }
        if lp.config().idle_sleep_ms == 0 {
            // no nap in the loop: keep the host responsive
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }
}
