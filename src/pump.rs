//! Refills the output double buffer from the elastic queue.
//!
//! The output peripheral streams the double buffer in a circle. Whenever it has consumed one half, it
//! resumes the pump (via [`Session::half_consumed`]), which writes fresh samples into that half while the
//! peripheral reads the other one.
//!
//! If the queue does not hold enough data for a full half, the half is left as it is. This is an audible
//! glitch of one half buffer, but keeps the latency bounded.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::session::Session;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    First,
    Second,
}

impl Half {
    pub const fn index(self) -> usize {
        match self {
            Half::First => 0,
            Half::Second => 1,
        }
    }

    pub const fn other(self) -> Half {
        match self {
            Half::First => Half::Second,
            Half::Second => Half::First,
        }
    }
}

/// Notification from the output peripheral: `half` was consumed and may be rewritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HalfConsumed {
    pub half: Half,
    /// Number of 16 bit samples in the half.
    pub sample_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Refill {
    Filled,
    Underrun,
}

/// The output double buffer: two equally sized halves of 16 bit samples.
///
/// Written by the pump, read by the output peripheral. Each access copies one half within a short critical
/// section.
pub struct OutputBuffer<const HALF: usize> {
    halves: Mutex<CriticalSectionRawMutex, RefCell<[[u16; HALF]; 2]>>,
}

impl<const HALF: usize> Default for OutputBuffer<HALF> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const HALF: usize> OutputBuffer<HALF> {
    /// A silent buffer.
    pub const fn new() -> Self {
        Self {
            halves: Mutex::new(RefCell::new([[0; HALF]; 2])),
        }
    }

    /// A copy of one half.
    pub fn half(&self, half: Half) -> [u16; HALF] {
        self.halves.lock(|halves| halves.borrow()[half.index()])
    }

    fn store(&self, half: Half, samples: &[u16]) {
        self.halves.lock(|halves| {
            halves.borrow_mut()[half.index()][..samples.len()].copy_from_slice(samples);
        });
    }
}

pub struct Pump<'d, const HALF: usize> {
    session: &'d Session<'d>,
    output: &'d OutputBuffer<HALF>,
    /// Raw little-endian samples, taken from the queue.
    staging: [[u8; 2]; HALF],
    underrun_count: u32,
}

impl<'d, const HALF: usize> Pump<'d, HALF> {
    pub fn new(session: &'d Session<'d>, output: &'d OutputBuffer<HALF>) -> Self {
        Self {
            session,
            output,
            staging: [[0; 2]; HALF],
            underrun_count: 0,
        }
    }

    /// The number of halves that were left untouched for lack of data.
    pub fn underrun_count(&self) -> u32 {
        self.underrun_count
    }

    /// Refills a consumed half, if the queue holds enough data. Never waits.
    pub fn refill(&mut self, consumed: HalfConsumed) -> Refill {
        let sample_count = consumed.sample_count.min(HALF);
        let frames = &mut self.staging[..sample_count];

        if !self.session.dequeue_exact(frames.as_flattened_mut()) {
            self.underrun_count = self.underrun_count.wrapping_add(1);
            trace!("Underrun in {:?} half", consumed.half);
            return Refill::Underrun;
        }

        let mut samples = [0u16; HALF];
        for (sample, bytes) in samples.iter_mut().zip(frames.iter()) {
            *sample = u16::from_le_bytes(*bytes);
        }
        self.output.store(consumed.half, &samples[..sample_count]);

        Refill::Filled
    }

    /// Suspends until the next half was consumed, then refills it.
    pub async fn resume(&mut self) -> Refill {
        let consumed = self.session.wait_half_consumed().await;
        self.refill(consumed)
    }

    pub async fn run(&mut self) -> ! {
        info!("Pump started with {} samples per half", HALF);

        loop {
            if self.resume().await == Refill::Underrun {
                debug!("{} underruns so far", self.underrun_count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::select::{select, Either};
    use embassy_futures::{block_on, yield_now};

    use super::*;
    use crate::DeviceConfig;

    const CONFIG: DeviceConfig = DeviceConfig::new();

    fn consumed(half: Half) -> HalfConsumed {
        HalfConsumed { half, sample_count: 4 }
    }

    #[test]
    fn refills_exactly_one_half() {
        let session = Session::new(&CONFIG);
        let output = OutputBuffer::new();
        session.start_playback();
        session.enqueue(&[1, 0, 2, 0, 3, 0, 4, 0, 5, 0]);

        let mut pump: Pump<4> = Pump::new(&session, &output);
        assert_eq!(pump.refill(consumed(Half::Second)), Refill::Filled);

        assert_eq!(output.half(Half::Second), [1, 2, 3, 4]);
        assert_eq!(output.half(Half::First), [0; 4]);
        assert_eq!(session.queued(), 2);
    }

    #[test]
    fn underrun_leaves_half_untouched() {
        let session = Session::new(&CONFIG);
        let output = OutputBuffer::new();
        session.start_playback();
        session.enqueue(&[0x34, 0x12, 0x78, 0x56, 0xBC, 0x9A, 0xF0, 0xDE]);

        let mut pump: Pump<4> = Pump::new(&session, &output);
        assert_eq!(pump.refill(consumed(Half::First)), Refill::Filled);
        assert_eq!(output.half(Half::First), [0x1234, 0x5678, 0x9ABC, 0xDEF0]);

        session.enqueue(&[0xFF; 7]);
        assert_eq!(pump.refill(consumed(Half::First)), Refill::Underrun);
        assert_eq!(output.half(Half::First), [0x1234, 0x5678, 0x9ABC, 0xDEF0]);
        assert_eq!(session.queued(), 7);
        assert_eq!(pump.underrun_count(), 1);
    }

    #[test]
    fn resumes_once_per_notification() {
        let session = Session::new(&CONFIG);
        let output = OutputBuffer::new();
        session.start_playback();
        session.enqueue(&[0xAA; 32]);

        let mut pump: Pump<4> = Pump::new(&session, &output);

        // A second notification before the pump ran replaces the first one.
        session.half_consumed(consumed(Half::First));
        session.half_consumed(consumed(Half::Second));

        assert_eq!(block_on(pump.resume()), Refill::Filled);
        assert_eq!(output.half(Half::Second), [0xAAAA; 4]);
        assert_eq!(output.half(Half::First), [0; 4]);
        assert_eq!(session.queued(), 24);
    }

    #[test]
    fn run_follows_the_output_through_an_underrun() {
        let session = Session::new(&CONFIG);
        let output = OutputBuffer::new();
        session.start_playback();

        let mut pump: Pump<4> = Pump::new(&session, &output);

        let peripheral = async {
            session.enqueue(&[0x11; 8]);
            session.half_consumed(consumed(Half::First));
            yield_now().await;
            assert_eq!(output.half(Half::First), [0x1111; 4]);

            // Not enough data for the second half.
            session.enqueue(&[0x22; 6]);
            session.half_consumed(consumed(Half::Second));
            yield_now().await;
            assert_eq!(output.half(Half::Second), [0; 4]);
            assert_eq!(session.queued(), 6);

            session.enqueue(&[0x33; 10]);
            session.half_consumed(consumed(Half::First));
            yield_now().await;
            assert_eq!(output.half(Half::First), [0x2222, 0x2222, 0x2222, 0x3333]);

            session.half_consumed(consumed(Half::Second));
            yield_now().await;
            assert_eq!(output.half(Half::Second), [0x3333; 4]);
            assert_eq!(session.queued(), 0);
        };

        match block_on(select(pump.run(), peripheral)) {
            Either::First(never) => never,
            Either::Second(()) => {}
        }
        assert_eq!(pump.underrun_count(), 1);
    }

    #[test]
    fn sample_count_is_limited_to_the_half() {
        let session = Session::new(&CONFIG);
        let output = OutputBuffer::new();
        session.start_playback();
        session.enqueue(&[0x01; 64]);

        let mut pump: Pump<4> = Pump::new(&session, &output);
        let refill = pump.refill(HalfConsumed {
            half: Half::First,
            sample_count: 100,
        });

        assert_eq!(refill, Refill::Filled);
        assert_eq!(output.half(Half::First), [0x0101; 4]);
        assert_eq!(session.queued(), 56);
    }
}
