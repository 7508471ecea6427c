//! The application control loop.
//!
//! Reacts to the event bus: brings the audio output up or down with playback, and forwards mute, volume and
//! bus state to the board.
use core::future::Future;

use crate::events::Events;
use crate::session::Session;

/// The board side of the audio path.
pub trait AudioBackend {
    type Error;

    /// Starts streaming the output double buffer.
    fn start_output(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    fn stop_output(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Takes the external DAC out of reset, or otherwise enables it.
    fn start_codec(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    fn stop_codec(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Channel mute states (left, right).
    fn set_mute(&mut self, is_muted: [bool; 2]) -> impl Future<Output = Result<(), Self::Error>>;

    /// Channel volumes (left, right) in 8.8 format (in dB).
    fn set_volume(&mut self, volume_8q8_db: [i16; 2]) -> impl Future<Output = Result<(), Self::Error>>;

    /// The device is (or is no longer) configured by the host.
    fn usb_state(&mut self, configured: bool) -> impl Future<Output = Result<(), Self::Error>>;
}

pub struct Controller<'d, B: AudioBackend> {
    session: &'d Session<'d>,
    backend: B,
    running: bool,
}

impl<'d, B: AudioBackend> Controller<'d, B> {
    pub fn new(session: &'d Session<'d>, backend: B) -> Self {
        Self {
            session,
            backend,
            running: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the audio output is up.
    pub fn is_running(&self) -> bool {
        self.running
    }

    // Output first, so that the DAC sees a valid clock when it leaves reset.
    async fn start(&mut self) {
        if self.backend.start_output().await.is_err() {
            warn!("Failed to start audio output");
        }
        self.session.start_capture();
        if self.backend.start_codec().await.is_err() {
            warn!("Failed to start codec");
        }

        self.running = true;
        info!("Audio output started");
    }

    async fn stop(&mut self) {
        if self.backend.stop_codec().await.is_err() {
            warn!("Failed to stop codec");
        }
        self.session.stop_capture();
        if self.backend.stop_output().await.is_err() {
            warn!("Failed to stop audio output");
        }

        self.running = false;
        info!("Audio output stopped");
    }

    /// Handles one batch of events.
    pub async fn handle(&mut self, events: Events) {
        if events.contains(Events::USB_STATE) {
            let configured = self.session.is_usb_configured();
            if self.backend.usb_state(configured).await.is_err() {
                warn!("Failed to report USB state");
            }
        }

        // Events coalesce, so a stop and start may arrive at once. The output is always restarted.
        if events.contains(Events::PLAYBACK) {
            if self.running {
                self.stop().await;
            }

            if self.session.is_playing() {
                self.start().await;
            }
        }

        if events.contains(Events::MUTE) {
            let settings = self.session.settings();
            if self.backend.set_mute(settings.is_muted).await.is_err() {
                warn!("Failed to set mute state");
            }
        }

        if events.contains(Events::VOLUME) {
            let settings = self.session.settings();
            if self.backend.set_volume(settings.volume_8q8_db).await.is_err() {
                warn!("Failed to set volume");
            }
        }
    }

    pub async fn run(&mut self) -> ! {
        loop {
            let events = self.session.events().wait().await;
            trace!("Events: {}", events.bits());

            self.handle(events).await;
        }
    }
}
