//! Cooperative poll scheduler.
//!
//! The node has no threads.  Everything that needs CPU time (the radio
//! MAC, the measurement loop, the console) implements [`Pollable`] and is
//! registered with one [`PollScheduler`], which the main loop drives.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        main loop                             │
//! │                                                              │
//! │      PollScheduler::poll()                                   │
//! │        │                                                     │
//! │        ├──▶ slot 0  radio pump          (MAC timers, RX)     │
//! │        ├──▶ slot 1  measurement loop    (FSM, timers, nap)   │
//! │        └──▶ slot 2  console             (command lines)      │
//! │                                                              │
//! │      registration order = poll order                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use heapless::Vec;
use log::{info, warn};

/// Something that wants CPU time on every pass of the main loop.
pub trait Pollable {
    /// Label used in logs.
    fn name(&self) -> &'static str {
        "pollable"
    }

    /// Do a bounded amount of work and return.
    fn poll(&mut self);
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of registered pollables (stack-allocated).
pub const MAX_POLLABLES: usize = 4;

/// Bookkeeping for one registration.
struct Slot<'a> {
    item: &'a mut dyn Pollable,
    polls: u64,
}

/// The poll scheduler.
///
/// Holds borrowed pollables in a fixed-capacity list and polls them in
/// registration order.
pub struct PollScheduler<'a> {
    slots: Vec<Slot<'a>, MAX_POLLABLES>,
    /// Global enable flag.
    enabled: bool,
    passes: u64,
}

impl Default for PollScheduler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PollScheduler<'a> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            enabled: true,
            passes: 0,
        }
    }

    /// Register a pollable.  Returns the slot index, or `None` if full.
    pub fn register(&mut self, item: &'a mut dyn Pollable) -> Option<usize> {
        let name = item.name();
        match self.slots.push(Slot { item, polls: 0 }) {
            Ok(()) => {
                let slot = self.slots.len() - 1;
                info!("Scheduler: registered '{}' at slot {}", name, slot);
                Some(slot)
            }
            Err(_) => {
                warn!("Scheduler: no slot for '{}'", name);
                None
            }
        }
    }

    /// Enable or disable the entire scheduler.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Poll every registered item once, in registration order.
    pub fn poll(&mut self) {
        if !self.enabled {
            return;
        }
        self.passes += 1;
        for slot in &mut self.slots {
            slot.item.poll();
            slot.polls += 1;
        }
    }

    /// Number of registered items.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Completed passes over the list.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Times the item in `slot` was polled.
    pub fn polls(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|s| s.polls)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
