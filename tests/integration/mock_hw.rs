//! Mock board for integration tests.
//!
//! Implements every port on one object with a shared, test-controlled
//! clock.  Records every LED change, uplink, sleep and card write so tests
//! can assert on the full history without real peripherals.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use sensornode::adapters::flasher::MemFlasher;
use sensornode::adapters::hardware::{SimOneWire, SimPin};
use sensornode::app::events::LoopEvent;
use sensornode::app::ports::{
    BoardPort, CardError, CardPort, ClockError, ClockPort, DirEntry, DownloadClient, EnvSensorPort,
    EventSink, FirmwarePort, ImageKind, IndicatorPort, LedPattern, LightSensorPort, PowerPort,
    RtcPort, StorageError, StoragePort, UplinkDone, UplinkPort,
};
use sensornode::app::service::MeasurementLoop;
use sensornode::config::NodeConfig;
use sensornode::error::SensorError;
use sensornode::measurement::{Env, Light};
use sensornode::sensors::probe::Probe;

pub type TestLoop = MeasurementLoop<MockBoard, SimPin, SimOneWire>;

/// RTC reading at clock 0.
pub fn rtc_base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 7)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap()
}

// ── MockBoard ─────────────────────────────────────────────────

pub struct MockBoard {
    pub clock: Rc<Cell<u32>>,
    /// `None` models a flat RTC battery.
    pub rtc: Option<NaiveDateTime>,

    pub env: Option<Env>,
    pub light: Option<Light>,
    /// Conversion time of the light sensor; `u32::MAX` never finishes.
    pub light_delay_ms: u32,
    light_started: Option<u32>,
    pub vbat: f32,
    pub vbus: f32,
    pub boots: u32,

    pub leds: Vec<LedPattern>,
    pub light_sleeps: Vec<u32>,
    pub deep_sleeps: Vec<u32>,
    pub resets: u32,
    pub lptim_reconfigs: u32,

    pub provisioned: bool,
    pub accept_uplinks: bool,
    pub time_critical: bool,
    pub uplinks: Vec<(Vec<u8>, bool, u8)>,
    pending: Option<UplinkDone>,
    pub rejoins: u32,
    pub provisioning_windows: Vec<u32>,

    pub card_present: bool,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub card_sessions: u32,
    /// `card_end` calls, including after a failed `card_begin`.
    pub card_ends: u32,
    /// Removals fail with `IoError`, like a write-protected card.
    pub card_write_protected: bool,
    card_open: bool,

    pub flasher: MemFlasher,
    pub nvs: RefCell<BTreeMap<String, Vec<u8>>>,
}

#[allow(dead_code)]
impl MockBoard {
    pub fn new() -> Self {
        Self {
            clock: Rc::new(Cell::new(0)),
            rtc: Some(rtc_base()),
            env: Some(Env {
                temperature: 22.5,
                pressure: 1001.0,
                humidity: 55.0,
            }),
            light: Some(Light {
                ir: 0.0,
                white: 812.0,
                uv: 0.0,
            }),
            light_delay_ms: 0,
            light_started: None,
            vbat: 3.9,
            vbus: 0.0,
            boots: 7,
            leds: Vec::new(),
            light_sleeps: Vec::new(),
            deep_sleeps: Vec::new(),
            resets: 0,
            lptim_reconfigs: 0,
            provisioned: true,
            accept_uplinks: true,
            time_critical: false,
            uplinks: Vec::new(),
            pending: None,
            rejoins: 0,
            provisioning_windows: Vec::new(),
            card_present: true,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            card_sessions: 0,
            card_ends: 0,
            card_write_protected: false,
            card_open: false,
            flasher: MemFlasher::new(),
            nvs: RefCell::new(BTreeMap::new()),
        }
    }

    /// Raise the completion signal of the uplink in flight.
    pub fn complete_uplink(&mut self, success: bool) -> bool {
        match self.pending.take() {
            Some(done) => {
                done.signal(success);
                true
            }
            None => false,
        }
    }

    pub fn uplink_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_led(&self) -> Option<LedPattern> {
        self.leds.last().copied()
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for MockBoard {
    fn now_ms(&self) -> u32 {
        self.clock.get()
    }

    fn now_us(&self) -> u32 {
        self.clock.get().wrapping_mul(1000)
    }

    fn advance_ms(&mut self, ms: u32) {
        self.clock.set(self.clock.get().wrapping_add(ms));
    }
}

impl RtcPort for MockBoard {
    fn rtc_now(&mut self) -> Result<NaiveDateTime, ClockError> {
        let base = self.rtc.ok_or(ClockError::NotSet)?;
        Ok(base + TimeDelta::milliseconds(i64::from(self.clock.get())))
    }

    fn rtc_set(&mut self, t: NaiveDateTime) -> Result<(), ClockError> {
        self.rtc = Some(t - TimeDelta::milliseconds(i64::from(self.clock.get())));
        Ok(())
    }
}

impl BoardPort for MockBoard {
    fn battery_voltage(&mut self) -> f32 {
        self.vbat
    }

    fn system_voltage(&mut self) -> Option<f32> {
        None
    }

    fn bus_voltage(&mut self) -> f32 {
        self.vbus
    }

    fn boot_count(&self) -> Option<u32> {
        Some(self.boots)
    }
}

impl EnvSensorPort for MockBoard {
    fn env_begin(&mut self) -> bool {
        self.env.is_some()
    }

    fn read_env(&mut self) -> Result<Env, SensorError> {
        self.env.ok_or(SensorError::NotPresent)
    }
}

impl LightSensorPort for MockBoard {
    fn light_begin(&mut self) -> bool {
        self.light.is_some()
    }

    fn light_start(&mut self) {
        self.light_started = Some(self.clock.get());
    }

    fn light_ready(&mut self) -> bool {
        let now = self.clock.get();
        self.light_delay_ms != u32::MAX
            && self
                .light_started
                .is_some_and(|t| now.wrapping_sub(t) >= self.light_delay_ms)
    }

    fn light_read(&mut self) -> Light {
        self.light.unwrap_or_default()
    }

    fn light_stop(&mut self) {
        self.light_started = None;
    }
}

impl PowerPort for MockBoard {
    fn prepare_sleep(&mut self) {}

    fn recover_from_sleep(&mut self) {}

    fn light_sleep(&mut self, ms: u32) {
        self.light_sleeps.push(ms);
    }

    fn deep_sleep(&mut self, secs: u32) {
        self.deep_sleeps.push(secs);
    }

    fn system_reset(&mut self) {
        self.resets += 1;
    }

    fn reconfigure_lptim(&mut self) {
        self.lptim_reconfigs += 1;
    }
}

impl IndicatorPort for MockBoard {
    fn set_led(&mut self, pattern: LedPattern) {
        self.leds.push(pattern);
    }
}

impl UplinkPort for MockBoard {
    fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    fn send_uplink(&mut self, payload: &[u8], confirmed: bool, port: u8, done: UplinkDone) -> bool {
        if !self.accept_uplinks || self.pending.is_some() {
            return false;
        }
        self.uplinks.push((payload.to_vec(), confirmed, port));
        self.pending = Some(done);
        true
    }

    fn radio_poll(&mut self) {}

    fn has_time_critical_jobs(&self, _within_ms: u32) -> bool {
        self.time_critical
    }

    fn rejoin(&mut self) {
        self.rejoins += 1;
    }

    fn open_provisioning_window(&mut self, secs: u32) {
        self.provisioning_windows.push(secs);
    }
}

// ── In-memory SD card ─────────────────────────────────────────

impl CardPort for MockBoard {
    fn card_begin(&mut self) -> Result<(), CardError> {
        if !self.card_present {
            return Err(CardError::NotPresent);
        }
        self.card_sessions += 1;
        self.card_open = true;
        Ok(())
    }

    fn card_end(&mut self) {
        self.card_ends += 1;
        self.card_open = false;
    }

    fn card_exists(&mut self, path: &str) -> bool {
        self.card_open && (self.files.contains_key(path) || self.dirs.contains(path))
    }

    fn card_mkdir(&mut self, path: &str) -> Result<(), CardError> {
        if !self.card_open {
            return Err(CardError::NotPresent);
        }
        self.dirs.insert(path.to_string());
        Ok(())
    }

    fn card_append(&mut self, path: &str, data: &[u8]) -> Result<(), CardError> {
        if !self.card_open {
            return Err(CardError::NotPresent);
        }
        self.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn card_read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, CardError> {
        if !self.card_open {
            return Err(CardError::NotPresent);
        }
        let file = self.files.get(path).ok_or(CardError::NotFound)?;
        let start = (offset as usize).min(file.len());
        let n = buf.len().min(file.len() - start);
        buf[..n].copy_from_slice(&file[start..start + n]);
        Ok(n)
    }

    fn card_remove(&mut self, path: &str) -> Result<(), CardError> {
        if !self.card_open {
            return Err(CardError::NotPresent);
        }
        if self.card_write_protected {
            return Err(CardError::IoError);
        }
        self.files.remove(path).map(|_| ()).ok_or(CardError::NotFound)
    }

    fn card_list(&mut self, path: &str) -> Result<Vec<DirEntry>, CardError> {
        if !self.card_open {
            return Err(CardError::NotPresent);
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let mut out = Vec::new();
        for dir in &self.dirs {
            if let Some(name) = dir.strip_prefix(&prefix).filter(|n| !n.contains('/')) {
                out.push(DirEntry {
                    name: name.to_string(),
                    is_dir: true,
                    size: 0,
                });
            }
        }
        for (file, data) in &self.files {
            if let Some(name) = file.strip_prefix(&prefix).filter(|n| !n.contains('/')) {
                out.push(DirEntry {
                    name: name.to_string(),
                    is_dir: false,
                    size: data.len() as u64,
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

impl FirmwarePort for MockBoard {
    fn download_start(&mut self, kind: ImageKind) -> bool {
        self.flasher.download_start(kind)
    }

    fn download_poll(&mut self, client: &mut dyn DownloadClient) {
        self.flasher.download_poll(client);
    }
}

// ── MockNvs (on the board) ────────────────────────────────────

impl StoragePort for MockBoard {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let k = format!("{}::{}", namespace, key);
        match self.nvs.borrow().get(&k) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let k = format!("{}::{}", namespace, key);
        self.nvs.borrow_mut().insert(k, data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.nvs.borrow_mut().remove(&format!("{}::{}", namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.nvs
            .borrow()
            .contains_key(&format!("{}::{}", namespace, key))
    }
}

// ── RecordingSink ─────────────────────────────────────────────

/// Event sink whose history stays readable after the loop takes it.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<LoopEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoopEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&LoopEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn contains(&self, event: &LoopEvent) -> bool {
        self.events.borrow().iter().any(|e| e == event)
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &LoopEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

// ── Harness ───────────────────────────────────────────────────

/// Loop, clock handle and event history for one scenario.
pub struct Harness {
    pub lp: TestLoop,
    pub clock: Rc<Cell<u32>>,
    pub sink: RecordingSink,
    pub pir: SimPin,
    pub feeders: [SimPin; 2],
}

#[allow(dead_code)]
impl Harness {
    /// Config tuned for deterministic timing: no idle naps.
    pub fn config() -> NodeConfig {
        NodeConfig {
            idle_sleep_ms: 0,
            ..NodeConfig::default()
        }
    }

    pub fn new(config: NodeConfig, board: MockBoard) -> Self {
        Self::with_probe(config, board, None)
    }

    pub fn with_probe(config: NodeConfig, board: MockBoard, probe: Option<SimOneWire>) -> Self {
        let clock = board.clock.clone();
        let sink = RecordingSink::new();
        let pir = SimPin::new(false);
        let feeders = [SimPin::new(true), SimPin::new(true)];
        let lp = MeasurementLoop::new(
            config,
            board,
            pir.clone(),
            [feeders[0].clone(), feeders[1].clone()],
            probe.map(Probe::new),
        )
        .with_sink(sink.clone());
        Self {
            lp,
            clock,
            sink,
            pir,
            feeders,
        }
    }

    pub fn now(&self) -> u32 {
        self.clock.get()
    }

    /// Set the clock to `t` and poll once.
    pub fn poll_at(&mut self, t: u32) {
        self.clock.set(t);
        self.lp.poll();
    }

    /// Advance the clock by `ms` and poll once.
    pub fn step(&mut self, ms: u32) {
        let t = self.clock.get().wrapping_add(ms);
        self.poll_at(t);
    }

    pub fn hw(&self) -> &MockBoard {
        self.lp.hw()
    }

    pub fn hw_mut(&mut self) -> &mut MockBoard {
        self.lp.hw_mut()
    }
}
