//! Inbound console commands.
//!
//! These represent actions requested by a person at the serial console.
//! [`ConsoleCommand::parse`] turns one input line into a command and
//! [`execute`] runs it against a [`MeasurementLoop`].  None of them touch
//! the FSM; they read or set the clock, the log mask, the card and the
//! radio through the board's ports.

use core::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use embedded_hal::digital::InputPin;

use crate::adapters::log_sink;
use crate::app::ports::{CardError, ClockError, DirEntry, OneWireBus, Platform};
use crate::app::service::MeasurementLoop;

/// Provisioning window when `provision` is given no argument.
pub const DEFAULT_PROVISION_SECS: u32 = 60;

/// Deepest directory level `tree` descends into.
const MAX_TREE_DEPTH: usize = 8;

/// Commands accepted at the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the RTC, or set it from an ISO-8601 argument.
    Date(Option<String>),
    /// Print the log mask, or set it.
    Log(Option<u32>),
    /// List one SD directory.
    Dir(Option<String>),
    /// List an SD directory recursively.
    Tree(Option<String>),
    /// Show the loop mode, or reconfigure the low-power timer (`lptim`).
    Mode(Option<String>),
    /// Open a provisioning window for the given seconds.
    Provision(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    UnknownCommand,
    InvalidParameter,
    Clock(ClockError),
    Card(CardError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::Clock(e) => write!(f, "clock: {e}"),
            Self::Card(e) => write!(f, "card: {e}"),
        }
    }
}

impl core::error::Error for CommandError {}

impl From<ClockError> for CommandError {
    fn from(e: ClockError) -> Self {
        Self::Clock(e)
    }
}

impl From<CardError> for CommandError {
    fn from(e: CardError) -> Self {
        Self::Card(e)
    }
}

/// One line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub depth: usize,
    pub entry: DirEntry,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Date(NaiveDateTime),
    LogMask(u32),
    Listing(Vec<ListingEntry>),
    Mode { active: bool, tx_cycle_secs: u32, tx_cycle_count: u32 },
    Done,
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%SZ")),
            Self::LogMask(mask) => write!(f, "0x{mask:x}"),
            Self::Listing(entries) => {
                for e in entries {
                    let indent = "  ".repeat(e.depth);
                    if e.entry.is_dir {
                        writeln!(f, "{indent}{}/", e.entry.name)?;
                    } else {
                        writeln!(f, "{indent}{:<16} {:>10}", e.entry.name, e.entry.size)?;
                    }
                }
                Ok(())
            }
            Self::Mode {
                active,
                tx_cycle_secs,
                tx_cycle_count,
            } => write!(
                f,
                "{} tx cycle {} secs, {} fast uplinks left",
                if *active { "active" } else { "inactive" },
                tx_cycle_secs,
                tx_cycle_count
            ),
            Self::Done => Ok(()),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Parsing
// ───────────────────────────────────────────────────────────────

impl ConsoleCommand {
    /// Parse one console line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::UnknownCommand)?;
        let arg = words.next().map(str::to_owned);
        if words.next().is_some() {
            return Err(CommandError::InvalidParameter);
        }

        match name {
            "date" => Ok(Self::Date(arg)),
            "log" => arg
                .map(|a| parse_mask(&a))
                .transpose()
                .map(Self::Log),
            "dir" => Ok(Self::Dir(arg)),
            "tree" => Ok(Self::Tree(arg)),
            "mode" => Ok(Self::Mode(arg)),
            "provision" => match arg {
                None => Ok(Self::Provision(DEFAULT_PROVISION_SECS)),
                Some(a) => a
                    .parse()
                    .map(Self::Provision)
                    .map_err(|_| CommandError::InvalidParameter),
            },
            _ => Err(CommandError::UnknownCommand),
        }
    }
}

/// Decimal or `0x` hex.
fn parse_mask(s: &str) -> Result<u32, CommandError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| CommandError::InvalidParameter)
}

/// Apply an ISO-8601 date, time or date-time to `current`.  A time must
/// end in `Z`; the part not given keeps the value from `current`.
pub fn parse_date_arg(arg: &str, current: Option<NaiveDateTime>) -> Result<NaiveDateTime, CommandError> {
    let (date_part, time_part) = match arg.split_once('T') {
        Some((d, t)) => (Some(d), Some(t)),
        None if arg.contains(':') => (None, Some(arg)),
        None => (Some(arg), None),
    };

    let date = match date_part {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| CommandError::InvalidParameter)?,
        None => current.ok_or(CommandError::Clock(ClockError::NotSet))?.date(),
    };
    let time = match time_part {
        Some(t) => {
            let t = t.strip_suffix('Z').ok_or(CommandError::InvalidParameter)?;
            NaiveTime::parse_from_str(t, "%H:%M:%S").map_err(|_| CommandError::InvalidParameter)?
        }
        None => current.map_or(NaiveTime::MIN, |c| c.time()),
    };
    Ok(date.and_time(time))
}

// ───────────────────────────────────────────────────────────────
// Execution
// ───────────────────────────────────────────────────────────────

/// Run `cmd` against the loop's board.
pub fn execute<P, I, B>(
    lp: &mut MeasurementLoop<P, I, B>,
    cmd: ConsoleCommand,
) -> Result<CommandReply, CommandError>
where
    P: Platform,
    I: InputPin,
    B: OneWireBus,
{
    match cmd {
        ConsoleCommand::Date(None) => Ok(CommandReply::Date(lp.hw_mut().rtc_now()?)),
        ConsoleCommand::Date(Some(arg)) => {
            let current = lp.hw_mut().rtc_now().ok();
            let t = parse_date_arg(&arg, current)?;
            lp.hw_mut().rtc_set(t)?;
            Ok(CommandReply::Date(t))
        }
        ConsoleCommand::Log(None) => Ok(CommandReply::LogMask(log_sink::mask())),
        ConsoleCommand::Log(Some(mask)) => {
            log_sink::set_mask(mask);
            Ok(CommandReply::LogMask(mask))
        }
        ConsoleCommand::Dir(path) => list(lp.hw_mut(), path.as_deref(), false),
        ConsoleCommand::Tree(path) => list(lp.hw_mut(), path.as_deref(), true),
        ConsoleCommand::Mode(None) => {
            let (tx_cycle_secs, tx_cycle_count) = lp.tx_cycle();
            Ok(CommandReply::Mode {
                active: lp.is_active(),
                tx_cycle_secs,
                tx_cycle_count,
            })
        }
        ConsoleCommand::Mode(Some(arg)) if arg == "lptim" => {
            lp.hw_mut().reconfigure_lptim();
            Ok(CommandReply::Done)
        }
        ConsoleCommand::Mode(Some(_)) => Err(CommandError::InvalidParameter),
        ConsoleCommand::Provision(secs) => {
            lp.hw_mut().open_provisioning_window(secs);
            Ok(CommandReply::Done)
        }
    }
}

fn list<P: Platform>(hw: &mut P, path: Option<&str>, recursive: bool) -> Result<CommandReply, CommandError> {
    if let Err(e) = hw.card_begin() {
        hw.card_end();
        return Err(e.into());
    }
    let mut out = Vec::new();
    let result = walk(hw, path.unwrap_or(""), 0, recursive, &mut out);
    hw.card_end();
    result.map(|()| CommandReply::Listing(out))
}

fn walk<P: Platform>(
    hw: &mut P,
    path: &str,
    depth: usize,
    recursive: bool,
    out: &mut Vec<ListingEntry>,
) -> Result<(), CommandError> {
    for entry in hw.card_list(path)? {
        let child = if path.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", path.trim_end_matches('/'), entry.name)
        };
        let descend = recursive && entry.is_dir && depth < MAX_TREE_DEPTH;
        out.push(ListingEntry { depth, entry });
        if descend {
            walk(hw, &child, depth + 1, recursive, out)?;
        }
    }
    Ok(())
}
