//! Rate feedback from the measured USB frame period.
//!
//! A free-running counter is clocked by the audio master clock and captured on every
//! USB start-of-frame. The number of counter ticks over a window of 32 frames is the
//! ratio between the local audio clock and the host's frame clock, which the host
//! uses to adjust the number of samples it sends per frame.
use crate::{FEEDBACK_PACKET_SIZE, FEEDBACK_WINDOW_FRAMES};

/// A snapshot taken by the frame capture interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameTick {
    /// The captured counter value.
    pub counter: u32,
    /// Set when the interrupt was caused by a start-of-frame trigger (not just a counter overflow).
    pub triggered: bool,
}

impl FrameTick {
    pub const fn new(counter: u32) -> Self {
        Self {
            counter,
            triggered: true,
        }
    }
}

/// Encodes a counter delta, accumulated over the feedback window, as 10.14 value.
///
/// The counter runs at 256 fs, so 8 bits of the delta are fractional. With 32 frames per window,
/// another 5 bits are fractional, yielding 19.13. One shift left gives the 10.14 full-speed format.
pub fn encode_10_14(accumulated_delta: u64) -> [u8; FEEDBACK_PACKET_SIZE] {
    let value = ((accumulated_delta << 1) & 0xFF_FFFF) as u32;

    [value as u8, (value >> 8) as u8, (value >> 16) as u8]
}

/// Forward distance between two counter readings, for a counter that wraps at `modulus`.
pub fn forward_delta(last: u32, now: u32, modulus: u64) -> u64 {
    if now >= last {
        (now - last) as u64
    } else {
        modulus - last as u64 + now as u64
    }
}

pub struct FeedbackGenerator {
    counter_modulus: u64,
    capturing: bool,
    baseline_pending: bool,
    last_counter: u32,
    accumulated_delta: u64,
    interval_count: u8,
    value: [u8; FEEDBACK_PACKET_SIZE],
    valid: bool,
}

impl FeedbackGenerator {
    pub const fn new(counter_modulus: u64) -> Self {
        Self {
            counter_modulus,
            capturing: false,
            baseline_pending: true,
            last_counter: 0,
            accumulated_delta: 0,
            interval_count: 0,
            value: [0; FEEDBACK_PACKET_SIZE],
            valid: false,
        }
    }

    /// Resets the measurement and starts counting frames.
    pub fn start_capture(&mut self) {
        self.last_counter = 0;
        self.accumulated_delta = 0;
        self.baseline_pending = true;
        self.interval_count = 0;
        self.value = [0; FEEDBACK_PACKET_SIZE];
        self.valid = false;
        self.capturing = true;
    }

    /// Stops counting frames and invalidates the feedback value.
    pub fn stop_capture(&mut self) {
        self.capturing = false;
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The number of intervals accumulated in the current window (0..32).
    pub fn interval_count(&self) -> u8 {
        self.interval_count
    }

    /// The most recent feedback value, if a full window was measured since capture start.
    pub fn value(&self) -> Option<[u8; FEEDBACK_PACKET_SIZE]> {
        self.valid.then_some(self.value)
    }

    /// Processes one frame tick. Returns the new feedback value, when a window completes.
    pub fn on_frame_tick(&mut self, tick: FrameTick) -> Option<[u8; FEEDBACK_PACKET_SIZE]> {
        if !self.capturing || !tick.triggered {
            return None;
        }

        if self.baseline_pending {
            self.baseline_pending = false;
            self.last_counter = tick.counter;
            return None;
        }

        self.accumulated_delta += forward_delta(self.last_counter, tick.counter, self.counter_modulus);
        self.last_counter = tick.counter;

        if self.interval_count == FEEDBACK_WINDOW_FRAMES - 1 {
            self.value = encode_10_14(self.accumulated_delta);
            self.accumulated_delta = 0;
            self.interval_count = 0;
            self.valid = true;

            Some(self.value)
        } else {
            self.interval_count += 1;
            None
        }
    }
}
