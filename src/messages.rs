//! JSON message layer for the broker topics.
//!
//! Parses the two inbound payloads (static setpoint, brightness plan) and
//! serializes the outbound heartbeat. Pure codec logic over
//! `serde-json-core`. No transport, no logging; callers drop-and-log on
//! error per the device's error policy.
//!
//! Plan payloads come in three recognized shapes:
//!
//! * canonical (`format_version: 2`): `steps` of absolute-`ts_ms` frames,
//!   ready to queue;
//! * `commands`: each entry carries an absolute `timestamp` (seconds) or a
//!   relative `duration_ms` chained from `base_timestamp` (seconds) or the
//!   current wall-clock;
//! * legacy: a `sequence` of frames at a fixed `interval_ms` from
//!   `timestamp` (seconds), replacing the whole schedule.
//!
//! Unknown `format_version` values are rejected rather than guessed at.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::NUM_CHANNELS;
use crate::schedule::TimedFrame;
use crate::ChannelFrame;

/// Most steps a single plan payload can deliver. Bounded by the 4 KiB MQTT
/// receive buffer; a payload that large cannot carry more steps than this.
pub const MAX_PLAN_STEPS: usize = 96;

/// Most channel values a wire array may carry before parsing fails. Servers
/// may send more channels than the device has, within reason.
pub const MAX_WIRE_CHANNELS: usize = 16;

type WireValues = Vec<u8, MAX_WIRE_CHANNELS>;

// ---------------------------------------------------------------------------
// Static setpoint (set_static topic)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StaticDoc {
    values: WireValues,
}

/// Parse a `{"values":[...]}` static setpoint.
///
/// Short arrays are zero-padded to the channel count, long ones truncated.
/// Malformed JSON, a missing key, or an empty array yields `None`.
pub fn parse_static(payload: &[u8]) -> Option<ChannelFrame> {
    let (doc, _) = serde_json_core::from_slice::<StaticDoc>(payload).ok()?;
    if doc.values.is_empty() {
        return None;
    }
    let mut frame = [0u8; NUM_CHANNELS];
    for (slot, value) in frame.iter_mut().zip(doc.values.iter()) {
        *slot = *value;
    }
    Some(frame)
}

// ---------------------------------------------------------------------------
// Brightness plan (set_plan topic)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PlanStep {
    #[serde(default)]
    ts_ms: Option<u64>,
    #[serde(default)]
    values: Option<WireValues>,
}

#[derive(Deserialize)]
struct PlanCommand {
    /// Absolute execution time in seconds since the epoch.
    #[serde(default)]
    timestamp: Option<u64>,
    /// Relative offset chained from the previous command.
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    values: Option<WireValues>,
}

#[derive(Deserialize)]
struct PlanDoc {
    #[serde(default)]
    format_version: Option<u32>,
    #[serde(default)]
    steps: Option<Vec<PlanStep, MAX_PLAN_STEPS>>,
    #[serde(default)]
    commands: Option<Vec<PlanCommand, MAX_PLAN_STEPS>>,
    /// Seconds since the epoch; base for `duration_ms` chaining.
    #[serde(default)]
    base_timestamp: Option<u64>,
    #[serde(default)]
    sequence: Option<Vec<WireValues, MAX_PLAN_STEPS>>,
    /// Seconds since the epoch; start of a legacy sequence.
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    interval_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlanError {
    /// Payload is not valid JSON or exceeds the parse bounds.
    Json,
    /// A `format_version` the firmware does not understand.
    UnsupportedVersion(u32),
    /// No recognized plan section, or every step failed validation.
    Empty,
}

/// A parsed plan ready for the schedule player.
#[derive(Debug, PartialEq)]
pub struct PlanUpdate {
    pub steps: Vec<TimedFrame, MAX_PLAN_STEPS>,
    /// Legacy sequences replace the whole schedule instead of merging.
    pub replace: bool,
}

/// Parse a plan payload. `now_ms` anchors relative commands when the payload
/// carries no `base_timestamp`.
pub fn parse_plan(payload: &[u8], now_ms: u64) -> Result<PlanUpdate, PlanError> {
    let (doc, _) = serde_json_core::from_slice::<PlanDoc>(payload).map_err(|_| PlanError::Json)?;

    if let Some(version) = doc.format_version {
        if version != 2 {
            return Err(PlanError::UnsupportedVersion(version));
        }
        let steps = doc.steps.ok_or(PlanError::Empty)?;
        let mut out = Vec::new();
        for step in &steps {
            let (Some(ts_ms), Some(wire)) = (step.ts_ms, step.values.as_ref()) else {
                continue;
            };
            if let Some(values) = take_channels(wire) {
                let _ = out.push(TimedFrame { ts_ms, values });
            }
        }
        return finish(out, false);
    }

    if let Some(commands) = doc.commands {
        let mut cursor = doc.base_timestamp.map(|s| s * 1000).unwrap_or(now_ms);
        let mut out = Vec::new();
        for command in &commands {
            let ts_ms = if let Some(secs) = command.timestamp {
                secs * 1000
            } else if let Some(duration) = command.duration_ms {
                cursor += duration;
                cursor
            } else {
                continue;
            };
            let Some(wire) = command.values.as_ref() else {
                continue;
            };
            if let Some(values) = take_channels(wire) {
                let _ = out.push(TimedFrame { ts_ms, values });
            }
        }
        return finish(out, false);
    }

    if let Some(sequence) = doc.sequence {
        let (Some(start_s), Some(interval_ms)) = (doc.timestamp, doc.interval_ms) else {
            return Err(PlanError::Empty);
        };
        let mut ts_ms = start_s * 1000;
        let mut out = Vec::new();
        for row in &sequence {
            let Some(values) = take_channels(row) else {
                continue;
            };
            let _ = out.push(TimedFrame { ts_ms, values });
            ts_ms += interval_ms;
        }
        return finish(out, true);
    }

    Err(PlanError::Empty)
}

fn finish(
    steps: Vec<TimedFrame, MAX_PLAN_STEPS>,
    replace: bool,
) -> Result<PlanUpdate, PlanError> {
    if steps.is_empty() {
        return Err(PlanError::Empty);
    }
    Ok(PlanUpdate { steps, replace })
}

/// Accept arrays carrying at least the device's channel count; use the first
/// `NUM_CHANNELS` entries and reject shorter ones.
fn take_channels(values: &WireValues) -> Option<ChannelFrame> {
    if values.len() < NUM_CHANNELS {
        return None;
    }
    let mut frame = [0u8; NUM_CHANNELS];
    frame.copy_from_slice(&values[..NUM_CHANNELS]);
    Some(frame)
}

// ---------------------------------------------------------------------------
// Heartbeat (heartbeat topic)
// ---------------------------------------------------------------------------

/// Device heartbeat published while the broker session is up.
#[derive(Serialize)]
pub struct Heartbeat<'a> {
    pub device_id: &'a str,
    /// Seconds since boot.
    pub uptime: u64,
    pub firmware: &'a str,
    pub ip: &'a str,
    /// Active mode name: `"STATIC"`, `"PLANNED"`, or `"FAST"`.
    pub mode: &'a str,
}

/// Serialize a heartbeat into `buf`, returning the number of bytes written.
pub fn serialize_heartbeat(heartbeat: &Heartbeat<'_>, buf: &mut [u8]) -> Option<usize> {
    serde_json_core::to_slice(heartbeat, buf).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- static setpoint --

    #[test]
    fn static_payload_parses() {
        let frame = parse_static(br#"{"values":[255,128,0,50]}"#).unwrap();
        assert_eq!(frame, [255, 128, 0, 50]);
    }

    #[test]
    fn static_short_array_zero_pads() {
        let frame = parse_static(br#"{"values":[7,8]}"#).unwrap();
        assert_eq!(frame, [7, 8, 0, 0]);
    }

    #[test]
    fn static_long_array_truncates() {
        let frame = parse_static(br#"{"values":[1,2,3,4,5,6]}"#).unwrap();
        assert_eq!(frame, [1, 2, 3, 4]);
    }

    #[test]
    fn static_rejects_empty_and_malformed() {
        assert!(parse_static(br#"{"values":[]}"#).is_none());
        assert!(parse_static(br#"{"brightness":5}"#).is_none());
        assert!(parse_static(b"not json").is_none());
    }

    // -- plan: format_version 2 --

    #[test]
    fn v2_plan_queues_absolute_steps() {
        let payload = br#"{"format_version":2,"steps":[{"ts_ms":1704067201000,"values":[0,0,0,0]},{"ts_ms":1704067201100,"values":[25,25,25,25]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert!(!update.replace);
        assert_eq!(update.steps.len(), 2);
        assert_eq!(update.steps[0].ts_ms, 1_704_067_201_000);
        assert_eq!(update.steps[0].values, [0, 0, 0, 0]);
        assert_eq!(update.steps[1].ts_ms, 1_704_067_201_100);
        assert_eq!(update.steps[1].values, [25, 25, 25, 25]);
    }

    #[test]
    fn v2_plan_skips_short_value_arrays() {
        let payload = br#"{"format_version":2,"steps":[{"ts_ms":1000,"values":[1,2]},{"ts_ms":2000,"values":[1,2,3,4]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps.len(), 1);
        assert_eq!(update.steps[0].ts_ms, 2000);
    }

    #[test]
    fn v2_plan_uses_first_n_of_wider_arrays() {
        let payload = br#"{"format_version":2,"steps":[{"ts_ms":1000,"values":[1,2,3,4,5,6,7,8]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps[0].values, [1, 2, 3, 4]);
    }

    #[test]
    fn v2_plan_skips_steps_missing_fields() {
        let payload = br#"{"format_version":2,"steps":[{"values":[1,2,3,4]},{"ts_ms":2000},{"ts_ms":3000,"values":[5,6,7,8]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps.len(), 1);
        assert_eq!(update.steps[0].ts_ms, 3000);
    }

    #[test]
    fn command_with_bad_values_still_advances_the_cursor() {
        // The second command chains from where the first would have landed.
        let payload = br#"{"base_timestamp":100,"commands":[{"duration_ms":500,"values":[1,2]},{"duration_ms":250,"values":[2,2,2,2]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps.len(), 1);
        assert_eq!(update.steps[0].ts_ms, 100_750);
    }

    #[test]
    fn unknown_format_version_is_rejected() {
        let payload = br#"{"format_version":3,"steps":[{"ts_ms":1000,"values":[1,2,3,4]}]}"#;
        assert_eq!(
            parse_plan(payload, 0),
            Err(PlanError::UnsupportedVersion(3))
        );
    }

    #[test]
    fn v2_plan_with_no_usable_steps_is_empty() {
        let payload = br#"{"format_version":2,"steps":[{"ts_ms":1000,"values":[1]}]}"#;
        assert_eq!(parse_plan(payload, 0), Err(PlanError::Empty));
    }

    // -- plan: commands --

    #[test]
    fn commands_with_absolute_timestamps() {
        let payload =
            br#"{"commands":[{"timestamp":1704067201,"values":[10,20,30,40]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps.len(), 1);
        assert_eq!(update.steps[0].ts_ms, 1_704_067_201_000);
        assert_eq!(update.steps[0].values, [10, 20, 30, 40]);
    }

    #[test]
    fn commands_chain_durations_from_base_timestamp() {
        let payload = br#"{"base_timestamp":1704067200,"commands":[{"duration_ms":500,"values":[1,1,1,1]},{"duration_ms":250,"values":[2,2,2,2]}]}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps[0].ts_ms, 1_704_067_200_500);
        assert_eq!(update.steps[1].ts_ms, 1_704_067_200_750);
    }

    #[test]
    fn commands_chain_from_wall_clock_without_base() {
        let payload = br#"{"commands":[{"duration_ms":100,"values":[1,1,1,1]}]}"#;
        let update = parse_plan(payload, 5_000).unwrap();
        assert_eq!(update.steps[0].ts_ms, 5_100);
    }

    #[test]
    fn commands_without_any_time_reference_are_skipped() {
        let payload = br#"{"commands":[{"values":[1,1,1,1]}]}"#;
        assert_eq!(parse_plan(payload, 0), Err(PlanError::Empty));
    }

    // -- plan: legacy sequence --

    #[test]
    fn legacy_sequence_expands_at_fixed_interval_and_replaces() {
        let payload = br#"{"sequence":[[1,1,1,1],[2,2,2,2],[3,3,3,3]],"timestamp":1704067200,"interval_ms":100}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert!(update.replace);
        assert_eq!(update.steps.len(), 3);
        assert_eq!(update.steps[0].ts_ms, 1_704_067_200_000);
        assert_eq!(update.steps[1].ts_ms, 1_704_067_200_100);
        assert_eq!(update.steps[2].ts_ms, 1_704_067_200_200);
    }

    #[test]
    fn legacy_sequence_invalid_rows_do_not_advance_time() {
        let payload = br#"{"sequence":[[1,1],[2,2,2,2]],"timestamp":100,"interval_ms":100}"#;
        let update = parse_plan(payload, 0).unwrap();
        assert_eq!(update.steps.len(), 1);
        assert_eq!(update.steps[0].ts_ms, 100_000);
        assert_eq!(update.steps[0].values, [2, 2, 2, 2]);
    }

    #[test]
    fn legacy_sequence_requires_timestamp_and_interval() {
        let payload = br#"{"sequence":[[1,1,1,1]]}"#;
        assert_eq!(parse_plan(payload, 0), Err(PlanError::Empty));
    }

    #[test]
    fn plan_without_recognized_section_is_empty() {
        assert_eq!(
            parse_plan(br#"{"base_timestamp":100}"#, 0),
            Err(PlanError::Empty)
        );
    }

    #[test]
    fn plan_malformed_json_errors() {
        assert_eq!(parse_plan(b"{{{", 0), Err(PlanError::Json));
    }

    // -- heartbeat --

    #[test]
    fn heartbeat_serializes_all_fields() {
        let heartbeat = Heartbeat {
            device_id: "esp_livingroom_1",
            uptime: 321,
            firmware: "1.0.0",
            ip: "192.168.1.42",
            mode: "PLANNED",
        };
        let mut buf = [0u8; 256];
        let len = serialize_heartbeat(&heartbeat, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""device_id":"esp_livingroom_1""#));
        assert!(json.contains(r#""uptime":321"#));
        assert!(json.contains(r#""firmware":"1.0.0""#));
        assert!(json.contains(r#""ip":"192.168.1.42""#));
        assert!(json.contains(r#""mode":"PLANNED""#));
    }
}
