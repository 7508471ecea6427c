#![cfg_attr(not(test), no_std)]

// Must come first, so that the logging macros are visible to all other modules.
mod fmt;

pub mod app;
pub mod events;
pub mod feedback;
pub mod pump;
pub mod queue;
pub mod session;
pub mod uac1;
pub mod usb_audio;

pub use events::{EventBus, Events};
pub use session::{AudioSettings, Session};

use static_assertions::const_assert;

pub const SAMPLE_RATE_HZ: u32 = 48_000;
pub const INPUT_CHANNEL_COUNT: usize = 2;

pub const SAMPLE_BIT_COUNT: usize = 16;
pub const SAMPLE_SIZE: usize = SAMPLE_BIT_COUNT / 8;

// Stereo frames per 1 ms USB full-speed frame.
pub const SAMPLES_PER_FRAME: usize = SAMPLE_RATE_HZ as usize / 1000;

// Nominal size of the audio samples per 1 ms.
pub const USB_PACKET_SIZE: usize = SAMPLES_PER_FRAME * INPUT_CHANNEL_COUNT * SAMPLE_SIZE;

// Because of rate feedback, the host may send one additional stereo sample per frame.
pub const USB_MAX_PACKET_SIZE: usize = USB_PACKET_SIZE + 4;

// Elastic queue between USB reception and the pump.
pub const QUEUE_SIZE: usize = 4 * USB_MAX_PACKET_SIZE;

// Output double buffer, two halves of 1 ms each (in 16 bit words).
pub const OUTPUT_BUFFER_SAMPLE_COUNT: usize = SAMPLES_PER_FRAME * INPUT_CHANNEL_COUNT * 2;
pub const HALF_BUFFER_SAMPLE_COUNT: usize = OUTPUT_BUFFER_SAMPLE_COUNT / 2;

// A new feedback value is computed every 32 frames (32 ms at full-speed).
pub const FEEDBACK_WINDOW_FRAMES: u8 = 32;
pub const FEEDBACK_PACKET_SIZE: usize = 3;

// Volume settings are 8q8 values in units of dB.
pub const VOLUME_STEPS_PER_DB: i16 = 256;
pub const MIN_VOLUME_8Q8_DB: i16 = -96 * VOLUME_STEPS_PER_DB;
pub const MAX_VOLUME_8Q8_DB: i16 = 0;
pub const VOLUME_RESOLUTION_8Q8_DB: i16 = VOLUME_STEPS_PER_DB / 2;

// Channel number that addresses all channels of the feature unit at once.
pub const MASTER_CHANNEL: u8 = 0xFF;

const_assert!(USB_PACKET_SIZE == 192);
const_assert!(QUEUE_SIZE >= 2 * USB_MAX_PACKET_SIZE + HALF_BUFFER_SAMPLE_COUNT * SAMPLE_SIZE);
const_assert!(HALF_BUFFER_SAMPLE_COUNT * SAMPLE_SIZE == USB_PACKET_SIZE);

/// Identity of the audio function on the bus, and of the frame counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// The audio control interface (mute and volume requests).
    pub control_interface: u8,
    /// The audio streaming interface (alternate setting 1 starts playback).
    pub streaming_interface: u8,
    /// The feature unit that owns mute and volume controls.
    pub feature_unit_id: u8,
    /// Isochronous OUT endpoint for audio samples.
    pub streaming_endpoint: u8,
    /// Isochronous IN endpoint for rate feedback.
    pub feedback_endpoint: u8,
    /// The frame counter wraps at this value (2^32 for a 32 bit timer).
    pub counter_modulus: u64,
}

impl DeviceConfig {
    pub const fn new() -> Self {
        Self {
            control_interface: 0,
            streaming_interface: 1,
            feature_unit_id: 2,
            streaming_endpoint: 0x01,
            feedback_endpoint: 0x81,
            counter_modulus: 1 << 32,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}
