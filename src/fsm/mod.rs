//! Table-driven state machine for the measurement loop.
//!
//! One row of plain `fn` pointers per state:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StateTable<C>                                               │
//! │  ┌──────────┬───────────┬──────────┬───────────────────────┐ │
//! │  │ StateId   │ on_enter  │ on_exit  │ on_update             │ │
//! │  ├──────────┼───────────┼──────────┼───────────────────────┤ │
//! │  │ Initial   │ fn(ctx)   │ fn(ctx)  │ fn(ctx) -> Option<>   │ │
//! │  │ Inactive  │ fn(ctx)   │ fn(ctx)  │ fn(ctx) -> Option<>   │ │
//! │  │ …         │           │          │                       │ │
//! │  │ Final     │ fn(ctx)   │ fn(ctx)  │ fn(ctx) -> Option<>   │ │
//! │  └──────────┴───────────┴──────────┴───────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each evaluation calls `on_update` for the **current** state.  If it
//! returns `Some(next_id)`, the engine runs `on_exit` for the current
//! state, then `on_enter` for the next, updates the current pointer and
//! evaluates again, until a state returns `None`.  A state therefore sees
//! its entry action and its first update in the same evaluation.  All
//! functions receive `&mut C`, the loop's context.

pub mod context;
pub mod states;

use core::fmt;

use log::{info, trace, warn};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Enumeration of all measurement-loop states.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Initial = 0,
    Inactive = 1,
    Warmup = 2,
    TprobePowerOn = 3,
    TprobeMeasuring = 4,
    Measure = 5,
    Transmit = 6,
    WriteFile = 7,
    TryToUpdate = 8,
    TryToMigrate = 9,
    AwaitCard = 10,
    Sleeping = 11,
    RebootForUpdate = 12,
    Final = 13,
}

impl StateId {
    /// Number of states, the length of the state table.
    pub const COUNT: usize = 14;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Initial,
        Self::Inactive,
        Self::Warmup,
        Self::TprobePowerOn,
        Self::TprobeMeasuring,
        Self::Measure,
        Self::Transmit,
        Self::WriteFile,
        Self::TryToUpdate,
        Self::TryToMigrate,
        Self::AwaitCard,
        Self::Sleeping,
        Self::RebootForUpdate,
        Self::Final,
    ];

    /// Convert an index back to `StateId`.  Panics on out-of-range in
    /// debug builds; returns `Final` in release.
    pub fn from_index(idx: usize) -> Self {
        match Self::ALL.get(idx) {
            Some(id) => *id,
            None => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Final
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Inactive => "Inactive",
            Self::Warmup => "Warmup",
            Self::TprobePowerOn => "TprobePowerOn",
            Self::TprobeMeasuring => "TprobeMeasuring",
            Self::Measure => "Measure",
            Self::Transmit => "Transmit",
            Self::WriteFile => "WriteFile",
            Self::TryToUpdate => "TryToUpdate",
            Self::TryToMigrate => "TryToMigrate",
            Self::AwaitCard => "AwaitCard",
            Self::Sleeping => "Sleeping",
            Self::RebootForUpdate => "RebootForUpdate",
            Self::Final => "Final",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Entry or exit action, run once per transition.
pub type StateActionFn<C> = fn(&mut C);

/// Update handler.  `Some(next)` leaves the state, `None` stays.
pub type StateUpdateFn<C> = fn(&mut C) -> Option<StateId>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// One row of the state table.  The table is a fixed array indexed by
/// [`StateId`], so there is no heap and no `dyn`.
pub struct StateDescriptor<C> {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn<C>>,
    pub on_exit: Option<StateActionFn<C>>,
    pub on_update: StateUpdateFn<C>,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// Upper bound on transitions within one evaluation.  Every cycle in the
/// table passes through a state that waits, so this only trips on a bug.
const MAX_TRANSITIONS_PER_EVAL: usize = 2 * StateId::COUNT;

/// The finite state machine engine.
///
/// Owns the state table (array of [`StateDescriptor`]) and threads a
/// mutable context `C` through every handler call.
pub struct Fsm<C> {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor<C>; StateId::COUNT],
    /// Index of the currently active state.
    current: usize,
    running: bool,
    /// Transitions taken since construction.
    transitions: u64,
}

impl<C> Fsm<C> {
    /// The table must list the states in `StateId` order.
    pub fn new(table: [StateDescriptor<C>; StateId::COUNT], initial: StateId) -> Self {
        debug_assert!(
            table.iter().enumerate().all(|(i, d)| d.id as usize == i),
            "state table out of order"
        );
        Self {
            table,
            current: initial as usize,
            running: false,
            transitions: 0,
        }
    }

    /// Run the initial `on_enter` for the starting state, then evaluate.
    /// Call once after construction.
    pub fn start(&mut self, ctx: &mut C) {
        info!("FSM start: {}", self.table[self.current].name);
        self.running = true;
        trace!("enter {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
        self.eval(ctx);
    }

    /// Evaluate until the current state settles.  Returns whether the
    /// state changed.
    pub fn eval(&mut self, ctx: &mut C) -> bool {
        if !self.running {
            return false;
        }
        let before = self.current;
        for _ in 0..MAX_TRANSITIONS_PER_EVAL {
            match (self.table[self.current].on_update)(ctx) {
                Some(next) if next as usize != self.current => self.transition(next, ctx),
                _ => return self.current != before,
            }
        }
        warn!(
            "FSM did not settle after {} transitions, stopped in {}",
            MAX_TRANSITIONS_PER_EVAL, self.table[self.current].name
        );
        self.current != before
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Total transitions taken.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut C) {
        let next_idx = next_id as usize;

        info!("FSM transition: {} -> {}", self.table[self.current].name, self.table[next_idx].name);

        // Exit current state
        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.transitions += 1;

        // Enter new state
        trace!("enter {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
