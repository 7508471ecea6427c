//! The audio session, shared between interrupt handlers and tasks.
//!
//! All state that is touched from more than one context lives in a single blocking mutex and is only
//! accessed within short critical sections. Nothing in here waits while holding the lock.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::events::{EventBus, Events};
use crate::feedback::{FeedbackGenerator, FrameTick};
use crate::pump::HalfConsumed;
use crate::queue::ElasticQueue;
use crate::{DeviceConfig, FEEDBACK_PACKET_SIZE, INPUT_CHANNEL_COUNT, QUEUE_SIZE};

/// Channel mute states and volumes, as set by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioSettings {
    /// Channel mute states (left, right).
    pub is_muted: [bool; INPUT_CHANNEL_COUNT],
    /// Channel volume levels in 8.8 format (in dB).
    pub volume_8q8_db: [i16; INPUT_CHANNEL_COUNT],
}

impl AudioSettings {
    pub const fn new() -> Self {
        Self {
            is_muted: [false; INPUT_CHANNEL_COUNT],
            volume_8q8_db: [0; INPUT_CHANNEL_COUNT],
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// What to send on the feedback endpoint in the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transmission {
    Feedback([u8; FEEDBACK_PACKET_SIZE]),
    ZeroLength,
}

struct State {
    playback: bool,
    usb_configured: bool,
    settings: AudioSettings,
    feedback: FeedbackGenerator,
    queue: ElasticQueue<QUEUE_SIZE>,
}

pub struct Session<'d> {
    config: &'d DeviceConfig,
    events: EventBus,
    pump: Signal<CriticalSectionRawMutex, HalfConsumed>,
    state: Mutex<CriticalSectionRawMutex, RefCell<State>>,
}

impl<'d> Session<'d> {
    pub const fn new(config: &'d DeviceConfig) -> Self {
        Self {
            config,
            events: EventBus::new(),
            pump: Signal::new(),
            state: Mutex::new(RefCell::new(State {
                playback: false,
                usb_configured: false,
                settings: AudioSettings::new(),
                feedback: FeedbackGenerator::new(config.counter_modulus),
                queue: ElasticQueue::new(),
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    pub fn config(&self) -> &'d DeviceConfig {
        self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_playing(&self) -> bool {
        self.with(|state| state.playback)
    }

    /// Starts playback. Returns `false`, if playback was already active.
    pub fn start_playback(&self) -> bool {
        let started = self.with(|state| {
            if state.playback {
                return false;
            }

            state.playback = true;
            state.queue.clear();
            true
        });

        if started {
            debug!("Playback started");
            self.events.broadcast(Events::PLAYBACK);
        }

        started
    }

    /// Stops playback, drops queued audio and invalidates feedback. Returns `false`, if playback was not active.
    ///
    /// Safe to call from interrupt context.
    pub fn stop_playback(&self) -> bool {
        let stopped = self.with(|state| {
            if !state.playback {
                return false;
            }

            state.playback = false;
            state.queue.clear();
            state.feedback.stop_capture();
            true
        });

        if stopped {
            debug!("Playback stopped");
            self.events.broadcast(Events::PLAYBACK);
        }

        stopped
    }

    pub fn is_usb_configured(&self) -> bool {
        self.with(|state| state.usb_configured)
    }

    /// Records a change of the bus state (reset, address, configuration, suspend).
    pub fn usb_state_changed(&self, configured: bool) {
        self.with(|state| state.usb_configured = configured);
        self.events.broadcast(Events::USB_STATE);
    }

    pub fn start_capture(&self) {
        self.with(|state| state.feedback.start_capture());
    }

    pub fn stop_capture(&self) {
        self.with(|state| state.feedback.stop_capture());
    }

    pub fn is_feedback_valid(&self) -> bool {
        self.with(|state| state.feedback.is_valid())
    }

    /// Handles the frame capture interrupt.
    pub fn on_frame_tick(&self, tick: FrameTick) {
        if let Some(value) = self.with(|state| state.feedback.on_frame_tick(tick)) {
            trace!("New feedback value: {:?}", value);
        }
    }

    /// The feedback packet for the current frame, or `None` if nothing may be sent.
    pub fn transmission(&self) -> Option<Transmission> {
        self.with(|state| {
            if !state.playback {
                return None;
            }

            Some(match state.feedback.value() {
                Some(value) => Transmission::Feedback(value),
                None => Transmission::ZeroLength,
            })
        })
    }

    /// Queues received audio bytes. Returns the number of bytes accepted.
    pub fn enqueue(&self, data: &[u8]) -> usize {
        let (accepted, playing) = self.with(|state| {
            if !state.playback {
                return (0, false);
            }
            (state.queue.write(data), true)
        });

        if playing && accepted < data.len() {
            trace!("Queue overflow, dropped {} bytes", data.len() - accepted);
        }

        accepted
    }

    /// Number of audio bytes waiting for the pump.
    pub fn queued(&self) -> usize {
        self.with(|state| state.queue.len())
    }

    /// Fills all of `out` from the queue, or nothing if not enough data is available.
    pub fn dequeue_exact(&self, out: &mut [u8]) -> bool {
        self.with(|state| state.queue.read_exact(out))
    }

    pub fn settings(&self) -> AudioSettings {
        self.with(|state| state.settings)
    }

    pub(crate) fn update_settings(&self, f: impl FnOnce(&mut AudioSettings)) -> AudioSettings {
        self.with(|state| {
            f(&mut state.settings);
            state.settings
        })
    }

    /// Called when the output peripheral has consumed one half of its buffer. Resumes the pump.
    pub fn half_consumed(&self, consumed: HalfConsumed) {
        self.pump.signal(consumed);
    }

    pub(crate) async fn wait_half_consumed(&self) -> HalfConsumed {
        self.pump.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: DeviceConfig = DeviceConfig::new();

    fn feed_window(session: &Session) {
        for tick in 0..=32u32 {
            session.on_frame_tick(FrameTick::new(tick * 12_288));
        }
    }

    #[test]
    fn transitions_are_idempotent() {
        let session = Session::new(&CONFIG);

        assert!(session.start_playback());
        assert!(!session.start_playback());
        assert_eq!(session.events().take(), Events::PLAYBACK);

        assert!(session.stop_playback());
        assert_eq!(session.events().take(), Events::PLAYBACK);
        assert!(!session.stop_playback());
        assert!(session.events().take().is_empty());
        assert!(!session.is_playing());
    }

    #[test]
    fn nothing_is_sent_or_queued_while_stopped() {
        let session = Session::new(&CONFIG);

        assert_eq!(session.transmission(), None);
        assert_eq!(session.enqueue(&[1, 2, 3, 4]), 0);
        assert_eq!(session.queued(), 0);
    }

    #[test]
    fn feedback_is_sent_once_valid() {
        let session = Session::new(&CONFIG);
        session.start_playback();
        session.start_capture();

        assert_eq!(session.transmission(), Some(Transmission::ZeroLength));

        feed_window(&session);
        assert!(session.is_feedback_valid());

        let expected = 48u32 << 14;
        assert_eq!(
            session.transmission(),
            Some(Transmission::Feedback([
                expected as u8,
                (expected >> 8) as u8,
                (expected >> 16) as u8
            ]))
        );
    }

    #[test]
    fn restart_is_clean() {
        let session = Session::new(&CONFIG);
        session.start_playback();
        session.start_capture();
        feed_window(&session);
        session.enqueue(&[0x11; 100]);

        session.stop_playback();
        session.start_playback();
        session.start_capture();

        assert_eq!(session.queued(), 0);
        assert!(!session.is_feedback_valid());
        assert_eq!(session.transmission(), Some(Transmission::ZeroLength));

        for tick in 0..32u32 {
            session.on_frame_tick(FrameTick::new(tick * 12_288));
            assert!(!session.is_feedback_valid());
        }
        session.on_frame_tick(FrameTick::new(32 * 12_288));
        assert!(session.is_feedback_valid());
    }

    #[test]
    fn usb_state_is_broadcast() {
        let session = Session::new(&CONFIG);
        session.usb_state_changed(true);

        assert!(session.is_usb_configured());
        assert_eq!(session.events().take(), Events::USB_STATE);
    }
}
