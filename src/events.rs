//! Event flags, broadcast to the application control loop.
use core::cell::Cell;
use core::future::poll_fn;
use core::ops::{BitOr, BitOrAssign};
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::AtomicWaker;

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Events(u8);

impl Events {
    pub const NONE: Events = Events(0);
    pub const PLAYBACK: Events = Events(1 << 1);
    pub const MUTE: Events = Events(1 << 2);
    pub const VOLUME: Events = Events(1 << 3);
    pub const USB_STATE: Events = Events(1 << 4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

/// Pending event flags with a single listener.
///
/// Broadcasting may happen from interrupt context. Flags accumulate until the listener takes them.
pub struct EventBus {
    pending: Mutex<CriticalSectionRawMutex, Cell<Events>>,
    waker: AtomicWaker,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(Events::NONE)),
            waker: AtomicWaker::new(),
        }
    }

    pub fn broadcast(&self, events: Events) {
        self.pending.lock(|pending| pending.set(pending.get() | events));
        self.waker.wake();
    }

    /// Gets and clears all pending flags.
    pub fn take(&self) -> Events {
        self.pending.lock(|pending| pending.replace(Events::NONE))
    }

    /// Waits for at least one flag, then gets and clears all pending flags.
    pub async fn wait(&self) -> Events {
        poll_fn(|context| {
            self.waker.register(context.waker());

            let events = self.take();
            if events.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(events)
            }
        })
        .await
    }
}
