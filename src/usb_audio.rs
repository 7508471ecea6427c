//! Endpoint handlers of the speaker function.
//!
//! Once per frame, the feedback endpoint sends the current feedback value (or a zero-length packet, while
//! the value is not valid yet), and the streaming endpoint moves the received audio packet into the
//! elastic queue. Both only work while playback is active.
use embassy_futures::yield_now;
use embassy_usb::driver::{EndpointError, EndpointIn, EndpointOut};

use crate::session::{Session, Transmission};
use crate::USB_MAX_PACKET_SIZE;

/// The streaming session ended, because the endpoint was disabled or playback stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => {
                warn!("Buffer overflow");
                Disconnected {}
            }
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Sends feedback packets to the host, as long as playback is active.
pub async fn feedback_handler<E: EndpointIn>(session: &Session<'_>, endpoint: &mut E) -> Result<(), Disconnected> {
    loop {
        match session.transmission().ok_or(Disconnected {})? {
            Transmission::Feedback(value) => endpoint.write(&value).await?,
            Transmission::ZeroLength => endpoint.write(&[]).await?,
        }
    }
}

/// Moves received audio packets into the elastic queue.
///
/// Packets that exceed the receive window are dropped. While playback is stopped, packets are read, but
/// not queued.
pub async fn stream_handler<E: EndpointOut>(session: &Session<'_>, endpoint: &mut E) -> Result<(), Disconnected> {
    let mut usb_data = [0u8; USB_MAX_PACKET_SIZE];

    loop {
        match endpoint.read(&mut usb_data).await {
            Ok(data_size) => {
                session.enqueue(&usb_data[..data_size]);
            }
            Err(EndpointError::BufferOverflow) => {
                debug!("Audio packet exceeds {} bytes, skipped.", USB_MAX_PACKET_SIZE);
            }
            Err(EndpointError::Disabled) => return Err(Disconnected {}),
        }
    }
}

pub async fn feedback_loop<E: EndpointIn>(session: &Session<'_>, mut endpoint: E) -> ! {
    loop {
        endpoint.wait_enabled().await;
        debug!("Feedback endpoint enabled");

        _ = feedback_handler(session, &mut endpoint).await;

        // The endpoint may still be enabled, while playback stops.
        yield_now().await;
    }
}

pub async fn streaming_loop<E: EndpointOut>(session: &Session<'_>, mut endpoint: E) -> ! {
    loop {
        endpoint.wait_enabled().await;
        debug!("Streaming endpoint enabled");

        _ = stream_handler(session, &mut endpoint).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use embassy_futures::block_on;
    use embassy_usb::driver::{Direction, Endpoint, EndpointAddress, EndpointInfo, EndpointType};

    use super::*;
    use crate::feedback::FrameTick;
    use crate::DeviceConfig;

    const CONFIG: DeviceConfig = DeviceConfig::new();

    fn info(direction: Direction, max_packet_size: u16) -> EndpointInfo {
        EndpointInfo {
            addr: EndpointAddress::from_parts(1, direction),
            ep_type: EndpointType::Isochronous,
            max_packet_size,
            interval_ms: 1,
        }
    }

    /// Accepts a number of packets, then reports being disabled.
    struct FakeIn {
        info: EndpointInfo,
        remaining: usize,
        packets: Vec<Vec<u8>>,
    }

    impl FakeIn {
        fn new(remaining: usize) -> Self {
            Self {
                info: info(Direction::In, 3),
                remaining,
                packets: Vec::new(),
            }
        }
    }

    impl Endpoint for FakeIn {
        fn info(&self) -> &EndpointInfo {
            &self.info
        }

        async fn wait_enabled(&mut self) {}
    }

    impl EndpointIn for FakeIn {
        async fn write(&mut self, buf: &[u8]) -> Result<(), EndpointError> {
            if self.remaining == 0 {
                return Err(EndpointError::Disabled);
            }

            self.remaining -= 1;
            self.packets.push(buf.to_vec());
            Ok(())
        }
    }

    /// Delivers prepared read results, then reports being disabled.
    struct FakeOut {
        info: EndpointInfo,
        reads: VecDeque<Result<Vec<u8>, EndpointError>>,
    }

    impl Endpoint for FakeOut {
        fn info(&self) -> &EndpointInfo {
            &self.info
        }

        async fn wait_enabled(&mut self) {}
    }

    impl EndpointOut for FakeOut {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, EndpointError> {
            match self.reads.pop_front() {
                Some(Ok(packet)) => {
                    buf[..packet.len()].copy_from_slice(&packet);
                    Ok(packet.len())
                }
                Some(Err(error)) => Err(error),
                None => Err(EndpointError::Disabled),
            }
        }
    }

    #[test]
    fn feedback_is_zero_length_until_valid() {
        let session = Session::new(&CONFIG);
        session.start_playback();
        session.start_capture();

        let mut endpoint = FakeIn::new(3);
        assert_eq!(block_on(feedback_handler(&session, &mut endpoint)), Err(Disconnected {}));
        assert_eq!(endpoint.packets, vec![Vec::<u8>::new(); 3]);

        for tick in 0..=32u32 {
            session.on_frame_tick(FrameTick::new(tick * 12_288));
        }

        let mut endpoint = FakeIn::new(2);
        assert_eq!(block_on(feedback_handler(&session, &mut endpoint)), Err(Disconnected {}));
        assert_eq!(endpoint.packets, vec![vec![0x00, 0x00, 0x0C]; 2]);
    }

    #[test]
    fn no_feedback_while_stopped() {
        let session = Session::new(&CONFIG);

        let mut endpoint = FakeIn::new(10);
        assert_eq!(block_on(feedback_handler(&session, &mut endpoint)), Err(Disconnected {}));
        assert!(endpoint.packets.is_empty());
    }

    #[test]
    fn received_packets_are_queued() {
        let session = Session::new(&CONFIG);
        session.start_playback();

        let mut endpoint = FakeOut {
            info: info(Direction::Out, USB_MAX_PACKET_SIZE as u16),
            reads: VecDeque::from([
                Ok(vec![0x11; 192]),
                Err(EndpointError::BufferOverflow),
                Ok(vec![0x22; 196]),
            ]),
        };

        assert_eq!(block_on(stream_handler(&session, &mut endpoint)), Err(Disconnected {}));
        assert_eq!(session.queued(), 388);
    }

    #[test]
    fn received_packets_are_dropped_while_stopped() {
        let session = Session::new(&CONFIG);

        let mut endpoint = FakeOut {
            info: info(Direction::Out, USB_MAX_PACKET_SIZE as u16),
            reads: VecDeque::from([Ok(vec![0x11; 192])]),
        };

        assert_eq!(block_on(stream_handler(&session, &mut endpoint)), Err(Disconnected {}));
        assert_eq!(session.queued(), 0);
    }
}
