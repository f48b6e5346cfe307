//! Compile-time device configuration.
//!
//! All tunables live here so a board variant is a one-file change. Values
//! mirror the deployed hardware: four TRIAC channels on 50 Hz mains.

/// Number of physical TRIAC output channels.
pub const NUM_CHANNELS: usize = 4;

// ---------------------------------------------------------------------------
// AC phase control
// ---------------------------------------------------------------------------

/// One mains half-cycle at 50 Hz, in microseconds.
pub const HALF_CYCLE_US: u32 = 10_000;

/// Minimum safe gate delay after a zero-cross, in microseconds.
pub const MIN_DELAY_US: u32 = 100;

/// Gate delay of the dimmest visible level (level 1), in microseconds.
pub const MAX_DIM_DELAY_US: u32 = 8_500;

/// TRIAC gate pulse width, in microseconds.
pub const TRIAC_PULSE_US: u32 = 500;

/// Top engine brightness level; inputs are quantized to `0..=MAX_LEVEL`.
pub const MAX_LEVEL: u8 = 9;

/// Zero-cross debounce window, in microseconds.
///
/// Must stay above the ~1.5 ms opto pulse width so the trailing edge of one
/// zero-cross pulse cannot double-trigger the ISR.
pub const ZC_DEBOUNCE_US: u64 = 3_000;

/// Channels whose delays land within this window of the fire target share a
/// single gate pulse instead of re-arming the timer.
pub const FIRE_FUSE_US: u32 = 10;

/// Zero-cross silence after which the safety watchdog forces all outputs off.
pub const ZC_LOST_TIMEOUT_US: u64 = 100_000;

// ---------------------------------------------------------------------------
// Schedule player
// ---------------------------------------------------------------------------

/// Maximum number of queued timed frames.
pub const SCHEDULE_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Network identity and endpoints
// ---------------------------------------------------------------------------

/// Device identity reported in the heartbeat and used as the MQTT client id.
pub const DEVICE_ID: &str = "esp_livingroom_1";

/// Firmware version reported in the heartbeat.
pub const FIRMWARE_VERSION: &str = "1.0.0";

pub const WIFI_SSID: &str = "dimmer-lan";
pub const WIFI_PASSWORD: &str = "change-me";

/// UDP port for the fast (low-latency) brightness stream.
pub const UDP_PORT: u16 = 5000;

/// Fast-stream silence after which the arbiter falls back out of FAST mode.
pub const UDP_TIMEOUT_MS: u64 = 3_000;

/// Accept raw channel bytes when a datagram fails LED v1 validation.
pub const FAST_RAW_FALLBACK: bool = true;

pub const MQTT_BROKER_HOST: &str = "192.168.1.10";
pub const MQTT_BROKER_PORT: u16 = 1883;

pub const MQTT_TOPIC_SET_STATIC: &str = "lights/room1/esp_dimmer_1/set_static";
pub const MQTT_TOPIC_SET_PLAN: &str = "lights/room1/esp_dimmer_1/set_plan";
pub const MQTT_TOPIC_HEARTBEAT: &str = "lights/room1/esp_dimmer_1/heartbeat";

/// Fixed backoff between broker reconnect attempts.
pub const MQTT_RECONNECT_INTERVAL_MS: u64 = 5_000;

/// Heartbeat publish period while the session is up.
pub const HEARTBEAT_PERIOD_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Time synchronization
// ---------------------------------------------------------------------------

/// NTP server candidates, tried in order. UTC only; plan timestamps are UTC.
pub const NTP_SERVERS: [&str; 2] = ["pool.ntp.org", "time.nist.gov"];

/// Wall-clock readings below this are treated as unsynced garbage
/// (2024-01-01T00:00:00Z).
pub const TIME_VALID_EPOCH_S: u64 = 1_704_067_200;

/// [`TIME_VALID_EPOCH_S`] in milliseconds.
pub const TIME_VALID_EPOCH_MS: u64 = TIME_VALID_EPOCH_S * 1000;

/// Interval between SNTP re-queries once synced, in seconds.
pub const SNTP_RESYNC_INTERVAL_S: u64 = 900;
