//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements                | Connects to                   |
//! |-------------|---------------------------|-------------------------------|
//! | `card`      | CardPort                  | host directory as SD card     |
//! | `flasher`   | FirmwarePort              | in-memory image slot          |
//! | `hardware`  | every port (`Platform`)   | the adapters below, sim data  |
//! |             | InputPin, OneWireBus      | `SimPin`, `SimOneWire`        |
//! | `log_sink`  | EventSink, `log::Log`     | stderr, runtime mask          |
//! | `nvs`       | ConfigPort                | JSON file / in-memory store   |
//! |             | StoragePort               |                               |
//! | `radio`     | UplinkPort (via hardware) | loopback LoRaWAN MAC          |
//! | `time`      | ClockPort, RtcPort        | `std::time`, chrono           |

pub mod card;
pub mod flasher;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod radio;
pub mod time;
