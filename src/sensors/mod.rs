//! Sensor drivers owned by the measurement loop.
//!
//! | Driver   | Input                         | Output                          |
//! |----------|-------------------------------|---------------------------------|
//! | `pir`    | digital PIR pin               | filtered activity in [-1, 1]    |
//! | `pellet` | two feeder switch pins        | recent / total pellet counts    |
//! | `probe`  | OneWire bus (DS18B20)         | probe temperature, °C           |
//!
//! The board-level sensors (BME280, Si1133, battery/bus ADC, RTC) are
//! reached through the port traits in [`crate::app::ports`]; the drivers
//! here hold state the loop must keep between polls.

pub mod pellet;
pub mod pir;
pub mod probe;
