//! Pellet feeder counters.
//!
//! Each feeder's dispense switch pulls its pin low once per pellet.  The
//! poll loop edge-detects high→low transitions and counts them into a
//! saturating 8-bit "recent" counter and a 32-bit running total.
//! `read_and_reset` captures both and clears only "recent".

use embedded_hal::digital::InputPin;
use log::warn;

use crate::measurement::{NUM_FEEDERS, PelletReading};

#[derive(Debug, Clone, Copy, Default)]
struct FeederState {
    last_high: bool,
    recent: u8,
    total: u32,
}

/// Edge counter for [`NUM_FEEDERS`] feeder pins.
pub struct PelletFeeder<P> {
    pins: [P; NUM_FEEDERS],
    state: [FeederState; NUM_FEEDERS],
    warned: bool,
}

impl<P: InputPin> PelletFeeder<P> {
    pub fn new(pins: [P; NUM_FEEDERS]) -> Self {
        Self {
            pins,
            state: [FeederState::default(); NUM_FEEDERS],
            warned: false,
        }
    }

    /// Latch the current pin levels so the first poll does not count a
    /// spurious edge.
    pub fn begin(&mut self) {
        for i in 0..NUM_FEEDERS {
            let level = self.read_pin(i).unwrap_or(true);
            self.state[i].last_high = level;
        }
    }

    /// Sample every feeder pin and count falling edges.
    pub fn poll(&mut self) {
        for i in 0..NUM_FEEDERS {
            let Some(level) = self.read_pin(i) else {
                continue;
            };
            let st = &mut self.state[i];
            if st.last_high && !level {
                st.recent = st.recent.saturating_add(1);
                st.total = st.total.saturating_add(1);
            }
            st.last_high = level;
        }
    }

    /// Capture both counters for every feeder and clear the recent counts.
    pub fn read_and_reset(&mut self) -> [PelletReading; NUM_FEEDERS] {
        let mut out = [PelletReading::default(); NUM_FEEDERS];
        for (reading, st) in out.iter_mut().zip(self.state.iter_mut()) {
            *reading = PelletReading {
                recent: st.recent,
                total: st.total,
            };
            st.recent = 0;
        }
        out
    }

    /// Counters without clearing anything.
    pub fn peek(&self) -> [PelletReading; NUM_FEEDERS] {
        self.state.map(|st| PelletReading {
            recent: st.recent,
            total: st.total,
        })
    }

    fn read_pin(&mut self, i: usize) -> Option<bool> {
        match self.pins[i].is_high() {
            Ok(level) => Some(level),
            Err(_) => {
                if !self.warned {
                    warn!("pellet feeder {}: pin read failed", i);
                    self.warned = true;
                }
                None
            }
        }
    }
}
