//! Host board: bridges the simulated peripherals to the port traits.
//!
//! [`HostBoard`] owns every adapter the measurement loop needs and
//! implements all the ports, so it satisfies [`Platform`] through the
//! blanket impl.  This is the only module of the binary that decides what
//! "hardware" looks like on the host:
//!
//! - clock and RTC from [`super::time`], NVS from [`super::nvs`];
//! - the SD card is a host directory ([`super::card`]);
//! - the radio is the [`LoopbackRadio`], the flasher a [`MemFlasher`];
//! - BME280 and Si1133 readings are fixed values the caller can replace;
//! - sleeps really block the thread, so the loop runs in real time.
//!
//! [`SimPin`] and [`SimOneWire`] stand in for the PIR/feeder GPIOs and
//! the probe bus; their handles can be cloned and driven from outside.
//!
//! [`Platform`]: crate::app::ports::Platform

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

use chrono::NaiveDateTime;
use embedded_hal::digital::{ErrorType, InputPin};
use log::{debug, info, warn};

use super::card::DirCard;
use super::flasher::MemFlasher;
use super::nvs::NvsAdapter;
use super::radio::LoopbackRadio;
use super::time::{HostClock, HostRtc};
use crate::app::ports::{
    BoardPort, CardError, CardPort, ClockError, ClockPort, DirEntry, DownloadClient, EnvSensorPort,
    FirmwarePort, ImageKind, IndicatorPort, LedPattern, LightSensorPort, OneWireBus, PowerPort,
    RtcPort, StorageError, StoragePort, UplinkDone, UplinkPort,
};
use crate::error::SensorError;
use crate::measurement::{Env, Light};
use crate::sensors::probe::DS18B20_FAMILY;

const BOARD_NAMESPACE: &str = "board";
const BOOT_KEY: &str = "boots";

/// Si1133 one-shot conversion time.
pub const LIGHT_CONVERSION_MS: u32 = 50;

/// Readings the simulated board reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimReadings {
    /// `None` models an absent BME280.
    pub env: Option<Env>,
    /// `None` models an absent Si1133.
    pub light: Option<Light>,
    pub vbat: f32,
    pub vcc: f32,
    pub vbus: f32,
}

impl Default for SimReadings {
    fn default() -> Self {
        Self {
            env: Some(Env {
                temperature: 21.5,
                pressure: 1013.25,
                humidity: 45.0,
            }),
            light: Some(Light {
                ir: 0.0,
                white: 420.0,
                uv: 0.0,
            }),
            vbat: 3.9,
            vcc: 3.3,
            vbus: 0.0,
        }
    }
}

pub struct HostBoard {
    clock: HostClock,
    rtc: HostRtc,
    nvs: NvsAdapter,
    card: DirCard,
    radio: LoopbackRadio,
    flasher: MemFlasher,
    readings: SimReadings,
    boots: u32,
    light_started: Option<u32>,
    led: LedPattern,
    resets: u32,
}

impl HostBoard {
    /// Assemble the board and bump the persistent boot counter.
    pub fn new(nvs: NvsAdapter, card: DirCard, radio: LoopbackRadio) -> Self {
        let mut board = Self {
            clock: HostClock::new(),
            rtc: HostRtc::from_system_time(),
            nvs,
            card,
            radio,
            flasher: MemFlasher::new(),
            readings: SimReadings::default(),
            boots: 0,
            light_started: None,
            led: LedPattern::Off,
            resets: 0,
        };
        board.boots = board.bump_boot_count();
        info!("HostBoard: boot #{}", board.boots);
        board
    }

    #[must_use]
    pub fn with_rtc(mut self, rtc: HostRtc) -> Self {
        self.rtc = rtc;
        self
    }

    #[must_use]
    pub fn with_readings(mut self, readings: SimReadings) -> Self {
        self.readings = readings;
        self
    }

    pub fn readings_mut(&mut self) -> &mut SimReadings {
        &mut self.readings
    }

    pub fn radio(&self) -> &LoopbackRadio {
        &self.radio
    }

    pub fn flasher(&self) -> &MemFlasher {
        &self.flasher
    }

    pub fn led(&self) -> LedPattern {
        self.led
    }

    /// `system_reset` calls so far.  The host cannot reset itself, so the
    /// binary watches this and exits instead.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn bump_boot_count(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        let prev = match self.nvs.read(BOARD_NAMESPACE, BOOT_KEY, &mut buf) {
            Ok(4) => u32::from_le_bytes(buf),
            _ => 0,
        };
        let next = prev.wrapping_add(1);
        if let Err(e) = self.nvs.write(BOARD_NAMESPACE, BOOT_KEY, &next.to_le_bytes()) {
            warn!("HostBoard: boot count not saved: {}", e);
        }
        next
    }
}

// ── Time ──────────────────────────────────────────────────────

impl ClockPort for HostBoard {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    fn now_us(&self) -> u32 {
        self.clock.now_us()
    }

    fn advance_ms(&mut self, ms: u32) {
        self.clock.advance_ms(ms);
    }
}

impl RtcPort for HostBoard {
    fn rtc_now(&mut self) -> Result<NaiveDateTime, ClockError> {
        self.rtc.rtc_now()
    }

    fn rtc_set(&mut self, t: NaiveDateTime) -> Result<(), ClockError> {
        info!("RTC set to {}", t);
        self.rtc.rtc_set(t)
    }
}

// ── Sensors ───────────────────────────────────────────────────

impl BoardPort for HostBoard {
    fn battery_voltage(&mut self) -> f32 {
        self.readings.vbat
    }

    fn system_voltage(&mut self) -> Option<f32> {
        Some(self.readings.vcc)
    }

    fn bus_voltage(&mut self) -> f32 {
        self.readings.vbus
    }

    fn boot_count(&self) -> Option<u32> {
        Some(self.boots)
    }
}

impl EnvSensorPort for HostBoard {
    fn env_begin(&mut self) -> bool {
        self.readings.env.is_some()
    }

    fn read_env(&mut self) -> Result<Env, SensorError> {
        self.readings.env.ok_or(SensorError::NotPresent)
    }
}

impl LightSensorPort for HostBoard {
    fn light_begin(&mut self) -> bool {
        self.readings.light.is_some()
    }

    fn light_start(&mut self) {
        self.light_started = Some(self.clock.now_ms());
    }

    fn light_ready(&mut self) -> bool {
        self.readings.light.is_some()
            && self
                .light_started
                .is_some_and(|t| self.clock.now_ms().wrapping_sub(t) >= LIGHT_CONVERSION_MS)
    }

    fn light_read(&mut self) -> Light {
        self.readings.light.unwrap_or_default()
    }

    fn light_stop(&mut self) {
        self.light_started = None;
    }
}

// ── Power and LED ─────────────────────────────────────────────

impl PowerPort for HostBoard {
    fn prepare_sleep(&mut self) {}

    fn recover_from_sleep(&mut self) {}

    fn light_sleep(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn deep_sleep(&mut self, secs: u32) {
        info!("deep sleep for {} secs", secs);
        std::thread::sleep(Duration::from_secs(u64::from(secs)));
    }

    fn system_reset(&mut self) {
        warn!("system reset requested");
        self.resets += 1;
    }

    fn reconfigure_lptim(&mut self) {
        debug!("LPTIM reconfigured");
    }
}

impl IndicatorPort for HostBoard {
    fn set_led(&mut self, pattern: LedPattern) {
        if pattern != self.led {
            debug!("LED: {:?}", pattern);
        }
        self.led = pattern;
    }
}

// ── Radio ─────────────────────────────────────────────────────

impl UplinkPort for HostBoard {
    fn is_provisioned(&self) -> bool {
        self.radio.is_provisioned()
    }

    fn send_uplink(&mut self, payload: &[u8], confirmed: bool, port: u8, done: UplinkDone) -> bool {
        self.radio.send(payload, confirmed, port, done)
    }

    fn radio_poll(&mut self) {
        self.radio.poll();
    }

    fn has_time_critical_jobs(&self, within_ms: u32) -> bool {
        self.radio.has_time_critical_jobs(within_ms)
    }

    fn rejoin(&mut self) {
        self.radio.rejoin();
    }

    fn open_provisioning_window(&mut self, secs: u32) {
        self.radio.open_provisioning_window(secs);
    }
}

// ── Storage ───────────────────────────────────────────────────

impl CardPort for HostBoard {
    fn card_begin(&mut self) -> Result<(), CardError> {
        self.card.card_begin()
    }

    fn card_end(&mut self) {
        self.card.card_end();
    }

    fn card_exists(&mut self, path: &str) -> bool {
        self.card.card_exists(path)
    }

    fn card_mkdir(&mut self, path: &str) -> Result<(), CardError> {
        self.card.card_mkdir(path)
    }

    fn card_append(&mut self, path: &str, data: &[u8]) -> Result<(), CardError> {
        self.card.card_append(path, data)
    }

    fn card_read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, CardError> {
        self.card.card_read_at(path, offset, buf)
    }

    fn card_remove(&mut self, path: &str) -> Result<(), CardError> {
        self.card.card_remove(path)
    }

    fn card_list(&mut self, path: &str) -> Result<Vec<DirEntry>, CardError> {
        self.card.card_list(path)
    }
}

impl FirmwarePort for HostBoard {
    fn download_start(&mut self, kind: ImageKind) -> bool {
        self.flasher.download_start(kind)
    }

    fn download_poll(&mut self, client: &mut dyn DownloadClient) {
        self.flasher.download_poll(client);
    }
}

impl StoragePort for HostBoard {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.nvs.read(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.nvs.write(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.nvs.delete(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.nvs.exists(namespace, key)
    }
}

// ── Simulated GPIO and OneWire ────────────────────────────────

/// Input pin whose level is set through a shared handle.
#[derive(Clone, Default)]
pub struct SimPin {
    level: Rc<Cell<bool>>,
}

impl SimPin {
    pub fn new(high: bool) -> Self {
        Self {
            level: Rc::new(Cell::new(high)),
        }
    }

    pub fn set_high(&self, high: bool) {
        self.level.set(high);
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.level.get())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.level.get())
    }
}

#[derive(Debug)]
struct ProbeSim {
    powered: bool,
    /// `None` models an empty bus.
    address: Option<[u8; 8]>,
    connected: bool,
    raw: i16,
    resolution: u8,
    conversions: u32,
}

/// OneWire bus with a single simulated DS18B20.
#[derive(Clone)]
pub struct SimOneWire {
    state: Rc<RefCell<ProbeSim>>,
}

impl SimOneWire {
    /// A bus with one probe reading `celsius`.
    pub fn with_probe(celsius: f32) -> Self {
        let bus = Self {
            state: Rc::new(RefCell::new(ProbeSim {
                powered: false,
                address: Some([DS18B20_FAMILY, 0x5E, 0x17, 0x02, 0x00, 0x00, 0x00, 0x9A]),
                connected: true,
                raw: 0,
                resolution: 0,
                conversions: 0,
            })),
        };
        bus.set_celsius(celsius);
        bus
    }

    pub fn empty() -> Self {
        let bus = Self::with_probe(0.0);
        bus.state.borrow_mut().address = None;
        bus
    }

    pub fn set_celsius(&self, celsius: f32) {
        // scratchpad units are 1/16 °C, reported to the driver as 1/128 °C
        self.state.borrow_mut().raw = ((celsius * 16.0).round() as i16).saturating_mul(8);
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    pub fn is_powered(&self) -> bool {
        self.state.borrow().powered
    }

    pub fn conversions(&self) -> u32 {
        self.state.borrow().conversions
    }
}

impl OneWireBus for SimOneWire {
    fn set_power(&mut self, on: bool) {
        self.state.borrow_mut().powered = on;
    }

    fn first_device(&mut self) -> Option<[u8; 8]> {
        let st = self.state.borrow();
        if st.powered && st.connected { st.address } else { None }
    }

    fn set_resolution(&mut self, addr: &[u8; 8], bits: u8) -> Result<(), SensorError> {
        let mut st = self.state.borrow_mut();
        if !st.powered || st.address != Some(*addr) {
            return Err(SensorError::BusError);
        }
        st.resolution = bits;
        Ok(())
    }

    fn request_conversion(&mut self, addr: &[u8; 8]) -> Result<(), SensorError> {
        let mut st = self.state.borrow_mut();
        if !st.powered || !st.connected || st.address != Some(*addr) {
            return Err(SensorError::BusError);
        }
        st.conversions += 1;
        Ok(())
    }

    fn read_raw(&mut self, addr: &[u8; 8]) -> Result<i16, SensorError> {
        let st = self.state.borrow();
        if !st.powered || !st.connected || st.address != Some(*addr) {
            return Err(SensorError::Disconnected);
        }
        Ok(st.raw)
    }
}
