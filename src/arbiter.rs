//! Mode arbiter: decides which brightness source drives the engine.
//!
//! Three producers of wildly different rates feed the device: a retained
//! static value (≤1 Hz), the schedule player (~10 Hz), and the fast UDP
//! stream (~60 Hz). Exactly one is active at a time. Static messages are an
//! operator override and force STATIC immediately; fast packets preempt
//! everything while flowing and fall back (static → planned → dark) after
//! [`UDP_TIMEOUT_MS`](crate::config::UDP_TIMEOUT_MS) of silence.
//!
//! Every setter returns the quantized level frame to push into the engine,
//! or `None` when nothing needs applying, either because the producer is
//! not the active mode, or because the mapped levels match what was last
//! applied (change detection keeps redundant writes out of the ISR path).

use crate::config::{MAX_LEVEL, NUM_CHANNELS, UDP_TIMEOUT_MS};
use crate::{ChannelFrame, LevelFrame};

/// Which producer currently drives the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    Static,
    Planned,
    Fast,
}

impl ControlMode {
    /// Wire-format name, as reported in the heartbeat.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Static => "STATIC",
            ControlMode::Planned => "PLANNED",
            ControlMode::Fast => "FAST",
        }
    }
}

/// Quantize a 0–255 brightness value to an engine level (0–9).
pub fn quantize(value: u8) -> u8 {
    (value as u16 * MAX_LEVEL as u16 / 255) as u8
}

/// Quantize a full frame.
pub fn quantize_frame(frame: &ChannelFrame) -> LevelFrame {
    let mut levels = [0u8; NUM_CHANNELS];
    for (level, value) in levels.iter_mut().zip(frame.iter()) {
        *level = quantize(*value);
    }
    levels
}

pub struct ModeArbiter {
    mode: ControlMode,
    static_frame: ChannelFrame,
    planned_frame: ChannelFrame,
    fast_frame: ChannelFrame,
    current: ChannelFrame,
    has_static: bool,
    has_planned: bool,
    last_fast_ms: u64,
    last_applied: Option<LevelFrame>,
}

impl ModeArbiter {
    pub const fn new() -> Self {
        Self {
            mode: ControlMode::Static,
            static_frame: [0; NUM_CHANNELS],
            planned_frame: [0; NUM_CHANNELS],
            fast_frame: [0; NUM_CHANNELS],
            current: [0; NUM_CHANNELS],
            has_static: false,
            has_planned: false,
            last_fast_ms: 0,
            last_applied: None,
        }
    }

    /// Static setpoint received. Forces STATIC mode from any prior mode.
    pub fn set_static(&mut self, frame: ChannelFrame) -> Option<LevelFrame> {
        self.static_frame = frame;
        self.has_static = true;
        self.mode = ControlMode::Static;
        self.current = frame;
        self.apply()
    }

    /// Planned frame from the schedule player. Caches always; drives the
    /// engine only while PLANNED is the active mode.
    pub fn set_planned(&mut self, frame: ChannelFrame) -> Option<LevelFrame> {
        self.planned_frame = frame;
        self.has_planned = true;
        if self.mode != ControlMode::Planned {
            return None;
        }
        self.current = frame;
        self.apply()
    }

    /// Fast-stream frame received at `now_ms`. Switches to FAST and applies.
    pub fn set_fast(&mut self, frame: ChannelFrame, now_ms: u64) -> Option<LevelFrame> {
        self.fast_frame = frame;
        self.last_fast_ms = now_ms;
        self.mode = ControlMode::Fast;
        self.current = frame;
        self.apply()
    }

    /// Switch to `mode` and apply its cached frame. No-op when already there.
    pub fn force_mode(&mut self, mode: ControlMode) -> Option<LevelFrame> {
        if self.mode == mode {
            return None;
        }
        self.mode = mode;
        self.current = match mode {
            ControlMode::Static => self.static_frame,
            ControlMode::Planned => self.planned_frame,
            ControlMode::Fast => self.fast_frame,
        };
        self.apply()
    }

    /// Fast-stream timeout check; call once per cooperative tick.
    ///
    /// After [`UDP_TIMEOUT_MS`] without a fast packet the arbiter leaves FAST
    /// mode: back to the static frame if one was ever set, else the planned
    /// frame, else STATIC with all channels dark.
    pub fn poll_timeout(&mut self, now_ms: u64) -> Option<LevelFrame> {
        if self.mode != ControlMode::Fast {
            return None;
        }
        if now_ms.wrapping_sub(self.last_fast_ms) <= UDP_TIMEOUT_MS {
            return None;
        }

        if self.has_static {
            self.mode = ControlMode::Static;
            self.current = self.static_frame;
        } else if self.has_planned {
            self.mode = ControlMode::Planned;
            self.current = self.planned_frame;
        } else {
            self.mode = ControlMode::Static;
            self.current = [0; NUM_CHANNELS];
        }
        self.apply()
    }

    /// Quantize the current frame, suppressing writes that would not change
    /// the engine state.
    fn apply(&mut self) -> Option<LevelFrame> {
        let levels = quantize_frame(&self.current);
        if self.last_applied == Some(levels) {
            return None;
        }
        self.last_applied = Some(levels);
        Some(levels)
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// The frame most recently handed to the engine (0–255 domain).
    pub fn current_frame(&self) -> ChannelFrame {
        self.current
    }

    pub fn has_static(&self) -> bool {
        self.has_static
    }

    pub fn has_planned(&self) -> bool {
        self.has_planned
    }

    /// Mean of the current frame, for the status report.
    pub fn average_brightness(&self) -> u8 {
        let sum: u16 = self.current.iter().map(|v| *v as u16).sum();
        (sum / NUM_CHANNELS as u16) as u8
    }
}

impl Default for ModeArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_reference_points() {
        assert_eq!(quantize(255), 9);
        assert_eq!(quantize(128), 4);
        assert_eq!(quantize(50), 1);
        assert_eq!(quantize(0), 0);
    }

    #[test]
    fn static_applies_quantized_levels() {
        let mut arbiter = ModeArbiter::new();
        let levels = arbiter.set_static([255, 128, 0, 50]).unwrap();
        assert_eq!(levels, [9, 4, 0, 1]);
        assert_eq!(arbiter.mode(), ControlMode::Static);
        assert_eq!(arbiter.current_frame(), [255, 128, 0, 50]);
    }

    #[test]
    fn repeated_equal_frames_are_suppressed() {
        let mut arbiter = ModeArbiter::new();
        assert!(arbiter.set_static([10; NUM_CHANNELS]).is_some());
        assert!(arbiter.set_static([10; NUM_CHANNELS]).is_none());
        // A frame mapping to the same levels is also suppressed.
        assert!(arbiter.set_static([11; NUM_CHANNELS]).is_none());
        // A level-changing frame goes through.
        assert!(arbiter.set_static([200; NUM_CHANNELS]).is_some());
    }

    #[test]
    fn planned_only_drives_in_planned_mode() {
        let mut arbiter = ModeArbiter::new();
        assert!(arbiter.set_planned([100; NUM_CHANNELS]).is_none());
        assert!(arbiter.has_planned());
        assert_eq!(arbiter.mode(), ControlMode::Static);

        assert!(arbiter.force_mode(ControlMode::Planned).is_some());
        assert_eq!(arbiter.current_frame(), [100; NUM_CHANNELS]);
        // Now planned frames apply directly.
        let levels = arbiter.set_planned([255; NUM_CHANNELS]).unwrap();
        assert_eq!(levels, [9; NUM_CHANNELS]);
    }

    #[test]
    fn force_mode_to_same_mode_is_noop() {
        let mut arbiter = ModeArbiter::new();
        assert!(arbiter.force_mode(ControlMode::Static).is_none());
    }

    #[test]
    fn fast_preempts_and_times_out_to_static() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_static([10; NUM_CHANNELS]);

        let levels = arbiter.set_fast([255; NUM_CHANNELS], 1_000).unwrap();
        assert_eq!(levels, [9; NUM_CHANNELS]);
        assert_eq!(arbiter.mode(), ControlMode::Fast);

        // Still inside the timeout window.
        assert!(arbiter.poll_timeout(1_000 + UDP_TIMEOUT_MS).is_none());
        assert_eq!(arbiter.mode(), ControlMode::Fast);

        // Silence expired: back to the static frame.
        let levels = arbiter.poll_timeout(1_000 + UDP_TIMEOUT_MS + 1).unwrap();
        assert_eq!(arbiter.mode(), ControlMode::Static);
        assert_eq!(levels, quantize_frame(&[10; NUM_CHANNELS]));
    }

    #[test]
    fn fast_timeout_falls_back_to_planned_when_no_static() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_planned([60; NUM_CHANNELS]);
        arbiter.set_fast([200; NUM_CHANNELS], 0);

        let levels = arbiter.poll_timeout(UDP_TIMEOUT_MS + 1).unwrap();
        assert_eq!(arbiter.mode(), ControlMode::Planned);
        assert_eq!(levels, quantize_frame(&[60; NUM_CHANNELS]));
    }

    #[test]
    fn fast_timeout_goes_dark_without_any_cache() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_fast([200; NUM_CHANNELS], 0);

        let levels = arbiter.poll_timeout(UDP_TIMEOUT_MS + 1).unwrap();
        assert_eq!(arbiter.mode(), ControlMode::Static);
        assert_eq!(levels, [0; NUM_CHANNELS]);
    }

    #[test]
    fn static_overrides_fast_immediately() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_fast([200; NUM_CHANNELS], 0);
        assert_eq!(arbiter.mode(), ControlMode::Fast);

        assert!(arbiter.set_static([30; NUM_CHANNELS]).is_some());
        assert_eq!(arbiter.mode(), ControlMode::Static);
    }

    #[test]
    fn continued_fast_packets_keep_fast_alive() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_fast([100; NUM_CHANNELS], 0);
        arbiter.set_fast([110; NUM_CHANNELS], 2_000);
        // The window is measured from the newest packet.
        assert!(arbiter.poll_timeout(4_000).is_none());
        assert_eq!(arbiter.mode(), ControlMode::Fast);
    }

    #[test]
    fn poll_timeout_outside_fast_is_inert() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_static([50; NUM_CHANNELS]);
        assert!(arbiter.poll_timeout(1_000_000).is_none());
        assert_eq!(arbiter.mode(), ControlMode::Static);
    }

    #[test]
    fn average_brightness_reports_mean() {
        let mut arbiter = ModeArbiter::new();
        arbiter.set_static([0, 100, 100, 0]);
        assert_eq!(arbiter.average_brightness(), 50);
    }

    #[test]
    fn mode_strings_match_wire_format() {
        assert_eq!(ControlMode::Static.as_str(), "STATIC");
        assert_eq!(ControlMode::Planned.as_str(), "PLANNED");
        assert_eq!(ControlMode::Fast.as_str(), "FAST");
    }

    #[test]
    fn planned_flow_reaches_engine_levels() {
        use crate::engine::Engine;
        use crate::schedule::{SchedulePlayer, TimedFrame};

        fn apply_to(engine: &mut Engine, levels: Option<LevelFrame>) {
            if let Some(levels) = levels {
                for (channel, level) in levels.iter().enumerate() {
                    engine.set_channel_level(channel, *level);
                }
            }
        }

        let mut player = SchedulePlayer::new();
        let mut arbiter = ModeArbiter::new();
        let mut engine = Engine::new();

        // Plan ingress: queue two steps, force PLANNED.
        player.add(TimedFrame {
            ts_ms: 1_704_067_201_000,
            values: [0, 0, 0, 0],
        });
        player.add(TimedFrame {
            ts_ms: 1_704_067_201_100,
            values: [255, 128, 0, 50],
        });
        apply_to(&mut engine, arbiter.force_mode(ControlMode::Planned));

        // Tick between the two steps: the first frame drives the output.
        let frame = player.current_frame(1_704_067_201_050).unwrap();
        assert_eq!(frame, [0, 0, 0, 0]);
        apply_to(&mut engine, arbiter.set_planned(frame));
        assert_eq!(engine.levels(), [0, 0, 0, 0]);

        // Tick after the second step.
        let frame = player.current_frame(1_704_067_201_150).unwrap();
        assert_eq!(frame, [255, 128, 0, 50]);
        apply_to(&mut engine, arbiter.set_planned(frame));
        assert_eq!(engine.levels(), [9, 4, 0, 1]);
        assert_eq!(arbiter.mode(), ControlMode::Planned);
        assert_eq!(arbiter.current_frame(), [255, 128, 0, 50]);
    }
}
