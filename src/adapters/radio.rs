//! Loopback LoRaWAN radio for the host simulation.
//!
//! Uplinks are "transmitted" by logging their hex dump; the completion
//! signal is raised after a fixed airtime, from [`RadioPump::poll`] or
//! from [`UplinkPort::radio_poll`].  Handles are cheap clones sharing one
//! state, so the board and the scheduler's pump see the same MAC.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::info;

use crate::app::ports::UplinkDone;
use crate::codec::to_hex;
use crate::scheduler::Pollable;

/// Simulated time on air plus RX windows.
pub const DEFAULT_AIRTIME: Duration = Duration::from_millis(1500);

struct Pending {
    done: UplinkDone,
    due: Instant,
}

struct RadioState {
    provisioned: bool,
    airtime: Duration,
    pending: Option<Pending>,
    sent: Vec<Vec<u8>>,
    joins: u32,
    provisioning_until: Option<Instant>,
}

#[derive(Clone)]
pub struct LoopbackRadio {
    state: Rc<RefCell<RadioState>>,
}

impl LoopbackRadio {
    pub fn new(provisioned: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(RadioState {
                provisioned,
                airtime: DEFAULT_AIRTIME,
                pending: None,
                sent: Vec::new(),
                joins: 0,
                provisioning_until: None,
            })),
        }
    }

    #[must_use]
    pub fn with_airtime(self, airtime: Duration) -> Self {
        self.state.borrow_mut().airtime = airtime;
        self
    }

    /// Payloads sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.borrow().sent.clone()
    }

    pub fn joins(&self) -> u32 {
        self.state.borrow().joins
    }

    pub fn is_provisioned(&self) -> bool {
        self.state.borrow().provisioned
    }

    pub fn provisioning_open(&self) -> bool {
        self.state
            .borrow()
            .provisioning_until
            .is_some_and(|t| Instant::now() < t)
    }

    pub fn send(&self, payload: &[u8], confirmed: bool, port: u8, done: UplinkDone) -> bool {
        let mut st = self.state.borrow_mut();
        if !st.provisioned || st.pending.is_some() {
            return false;
        }
        info!(
            "radio: port {} {}: {}",
            port,
            if confirmed { "confirmed" } else { "unconfirmed" },
            to_hex(payload)
        );
        st.sent.push(payload.to_vec());
        st.pending = Some(Pending {
            done,
            due: Instant::now() + st.airtime,
        });
        true
    }

    /// Complete the pending uplink once its airtime has passed.
    pub fn poll(&self) {
        let mut st = self.state.borrow_mut();
        if st.pending.as_ref().is_some_and(|p| Instant::now() >= p.due) {
            if let Some(p) = st.pending.take() {
                p.done.signal(true);
            }
        }
        if st.provisioning_until.is_some_and(|t| Instant::now() >= t) {
            st.provisioning_until = None;
            info!("radio: provisioning window closed");
        }
    }

    pub fn has_time_critical_jobs(&self, within_ms: u32) -> bool {
        let horizon = Instant::now() + Duration::from_millis(u64::from(within_ms));
        self.state
            .borrow()
            .pending
            .as_ref()
            .is_some_and(|p| p.due <= horizon)
    }

    pub fn rejoin(&self) {
        let mut st = self.state.borrow_mut();
        st.joins += 1;
        // a pending uplink is lost with the session
        if let Some(p) = st.pending.take() {
            p.done.signal(false);
        }
        info!("radio: rejoin #{}", st.joins);
    }

    pub fn open_provisioning_window(&self, secs: u32) {
        self.state.borrow_mut().provisioning_until =
            Some(Instant::now() + Duration::from_secs(u64::from(secs)));
        info!("radio: provisioning window open for {} secs", secs);
    }

    /// Pump for the scheduler.
    pub fn pump(&self) -> RadioPump {
        RadioPump { radio: self.clone() }
    }
}

/// Scheduler-side handle that drives the MAC.
pub struct RadioPump {
    radio: LoopbackRadio,
}

impl Pollable for RadioPump {
    fn name(&self) -> &'static str {
        "radio"
    }

    fn poll(&mut self) {
        self.radio.poll();
    }
}
