//! Interrupt-driven AC phase-control engine.
//!
//! Pure state machine with no hardware dependency. The firmware binary owns the
//! gate pins and the one-shot firing timer; its zero-cross and timer ISRs feed
//! timestamps in and execute whatever this module hands back ([`TimerCmd`],
//! [`FireGroup`]). That keeps every microsecond-critical decision unit-testable
//! on the host.
//!
//! Timeline of one half-cycle: the debounced zero-cross edge clears all
//! `fired` flags and arms the timer for the smallest pending gate delay. Each
//! timer fire drives every channel within [`FIRE_FUSE_US`](crate::config::FIRE_FUSE_US)
//! of the target in a single pulse, then re-arms for the next-dimmest group
//! until nothing is left to fire.

use crate::config::{
    FIRE_FUSE_US, HALF_CYCLE_US, MAX_DIM_DELAY_US, MAX_LEVEL, MIN_DELAY_US, NUM_CHANNELS,
    ZC_DEBOUNCE_US, ZC_LOST_TIMEOUT_US,
};

/// Gate delay assigned to a channel at level 0. Beyond the half-cycle, so the
/// channel is never considered for firing.
pub const OFF_DELAY_US: u32 = HALF_CYCLE_US + 2_000;

/// Smallest interval the one-shot timer is armed for.
const MIN_ARM_US: u32 = 10;

/// Convert a brightness level (0–9) into a gate delay after the zero-cross.
///
/// Level 0 maps past the half-cycle (never fires), level 9 to the minimum
/// safe delay, and levels 1–8 linearly across
/// `[MIN_DELAY_US ..= MAX_DIM_DELAY_US]`. Strictly monotone: a brighter
/// channel always fires earlier.
pub fn level_to_delay_us(level: u8) -> u32 {
    if level == 0 {
        return OFF_DELAY_US;
    }
    if level >= MAX_LEVEL {
        return MIN_DELAY_US;
    }
    let span = MAX_DIM_DELAY_US - MIN_DELAY_US;
    MIN_DELAY_US + (MAX_LEVEL - level) as u32 * span / MAX_LEVEL as u32
}

/// What the ISR should do with the one-shot firing timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerCmd {
    /// Arm the one-shot timer to fire in `delta_us` microseconds.
    Arm { delta_us: u32 },
    /// Nothing left to fire this half-cycle.
    Disarm,
}

/// One gate pulse event: which channels to drive high, and the delay (from
/// the zero-cross) this event represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FireGroup {
    /// Delay from the zero-cross this group fires at, in microseconds.
    pub target_delay_us: u32,
    /// Channels to pulse together.
    pub channels: [bool; NUM_CHANNELS],
}

/// Outcome of the cooperative safety watchdog tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogEvent {
    /// Zero-cross signal present, nothing to do.
    Healthy,
    /// Signal just went missing: caller must drive all outputs low and
    /// disarm the timer.
    SignalLost,
    /// Signal returned after an emergency shutoff; normal operation resumes
    /// on the next zero-cross.
    SignalRecovered,
}

/// Per-channel phase-control state.
///
/// Shared between the ISRs and the cooperative loop; callers are responsible
/// for wrapping it in a critical section (single-word reads and multi-word
/// snapshots both happen under the same lock, so no torn state is possible).
pub struct Engine {
    levels: [u8; NUM_CHANNELS],
    delays_us: [u32; NUM_CHANNELS],
    fired: [bool; NUM_CHANNELS],
    last_zc_us: u64,
    last_fire_delay_us: u32,
    zc_healthy: bool,
    emergency: bool,
}

impl Engine {
    pub const fn new() -> Self {
        Self {
            levels: [0; NUM_CHANNELS],
            delays_us: [OFF_DELAY_US; NUM_CHANNELS],
            fired: [false; NUM_CHANNELS],
            last_zc_us: 0,
            last_fire_delay_us: 0,
            zc_healthy: true,
            emergency: false,
        }
    }

    /// Set one channel's brightness level (clamped to 0–9). Out-of-range
    /// channels are ignored. Never fails; the new delay takes effect from the
    /// next scheduling decision.
    pub fn set_channel_level(&mut self, channel: usize, level: u8) {
        if channel >= NUM_CHANNELS {
            return;
        }
        let level = level.min(MAX_LEVEL);
        self.levels[channel] = level;
        self.delays_us[channel] = level_to_delay_us(level);
    }

    /// Set every channel to the same brightness level.
    pub fn set_all_levels(&mut self, level: u8) {
        for channel in 0..NUM_CHANNELS {
            self.set_channel_level(channel, level);
        }
    }

    /// Zero-cross edge at `now_us`.
    ///
    /// Returns `None` when the edge is debounced away or an emergency
    /// shutoff is latched (the timestamp is still recorded in the latter
    /// case, so the watchdog can observe the signal returning). Otherwise
    /// returns the timer command starting the new half-cycle.
    pub fn on_zero_cross(&mut self, now_us: u64) -> Option<TimerCmd> {
        let elapsed = now_us.wrapping_sub(self.last_zc_us);
        if elapsed < ZC_DEBOUNCE_US {
            return None;
        }

        self.last_zc_us = now_us;
        self.zc_healthy = true;
        self.fired = [false; NUM_CHANNELS];
        self.last_fire_delay_us = 0;

        if self.emergency {
            // Recovery is the watchdog's call, not the ISR's.
            return None;
        }
        Some(self.schedule_next())
    }

    /// Find the next pending gate delay and produce the timer command for it.
    ///
    /// Does not advance `last_fire_delay_us`; that happens only after the
    /// pulse in [`finish_fire`](Self::finish_fire), so channels with equal or
    /// near-equal delays end up in one [`FireGroup`].
    fn schedule_next(&self) -> TimerCmd {
        let mut next: Option<u32> = None;
        for channel in 0..NUM_CHANNELS {
            let delay = self.delays_us[channel];
            if !self.fired[channel] && delay < HALF_CYCLE_US {
                next = Some(match next {
                    Some(best) if best <= delay => best,
                    _ => delay,
                });
            }
        }

        match next {
            None => TimerCmd::Disarm,
            Some(target) => {
                let delta = if target > self.last_fire_delay_us {
                    target - self.last_fire_delay_us
                } else {
                    // Already at or past the target; fire as soon as the
                    // timer allows.
                    1
                };
                TimerCmd::Arm {
                    delta_us: delta.max(MIN_ARM_US),
                }
            }
        }
    }

    /// Timer fired: compute which channels to pulse now.
    ///
    /// Re-derives the target from current state (levels may have changed
    /// since the timer was armed) and fuses every unfired channel within
    /// `FIRE_FUSE_US` of it into one group, marking them fired. Returns
    /// `None` when nothing is pending; the caller disarms the timer.
    pub fn begin_fire(&mut self) -> Option<FireGroup> {
        let mut target: Option<u32> = None;
        for channel in 0..NUM_CHANNELS {
            let delay = self.delays_us[channel];
            if !self.fired[channel] && delay < HALF_CYCLE_US {
                target = Some(match target {
                    Some(best) if best <= delay => best,
                    _ => delay,
                });
            }
        }
        let target = target?;

        let mut channels = [false; NUM_CHANNELS];
        for channel in 0..NUM_CHANNELS {
            if !self.fired[channel] && self.delays_us[channel] <= target + FIRE_FUSE_US {
                channels[channel] = true;
                self.fired[channel] = true;
            }
        }

        Some(FireGroup {
            target_delay_us: target,
            channels,
        })
    }

    /// Gate pulse done: record the fire time and schedule the rest of the
    /// half-cycle. Must be called with the `target_delay_us` of the group
    /// returned by [`begin_fire`](Self::begin_fire), after the pulse.
    pub fn finish_fire(&mut self, target_delay_us: u32) -> TimerCmd {
        self.last_fire_delay_us = target_delay_us;
        self.schedule_next()
    }

    /// Cooperative safety watchdog. Call from the main loop, not the ISRs.
    ///
    /// Latches an emergency shutoff when the zero-cross has been silent for
    /// [`ZC_LOST_TIMEOUT_US`]; clears it once edges are flowing again.
    /// Recovery is decided here and only here; the ISRs never touch the
    /// emergency latch.
    pub fn check_watchdog(&mut self, now_us: u64) -> WatchdogEvent {
        let elapsed = now_us.wrapping_sub(self.last_zc_us);
        if elapsed > ZC_LOST_TIMEOUT_US {
            if self.zc_healthy {
                self.zc_healthy = false;
                self.emergency = true;
                return WatchdogEvent::SignalLost;
            }
        } else if !self.zc_healthy || self.emergency {
            self.zc_healthy = true;
            self.emergency = false;
            return WatchdogEvent::SignalRecovered;
        }
        WatchdogEvent::Healthy
    }

    pub fn is_zero_cross_healthy(&self) -> bool {
        self.zc_healthy
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    /// Timestamp of the last accepted zero-cross edge, in microseconds.
    pub fn last_zero_cross_us(&self) -> u64 {
        self.last_zc_us
    }

    /// Delay of the last gate pulse in the current half-cycle.
    pub fn last_fire_delay_us(&self) -> u32 {
        self.last_fire_delay_us
    }

    pub fn channel_level(&self, channel: usize) -> u8 {
        self.levels.get(channel).copied().unwrap_or(0)
    }

    pub fn channel_delay_us(&self, channel: usize) -> u32 {
        self.delays_us.get(channel).copied().unwrap_or(0)
    }

    /// Snapshot of all channel levels, for the status report.
    pub fn levels(&self) -> [u8; NUM_CHANNELS] {
        self.levels
    }

    /// Snapshot of all channel delays, for the status report.
    pub fn delays_us(&self) -> [u32; NUM_CHANNELS] {
        self.delays_us
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
