use embassy_usb::control::{InResponse, OutResponse, Request};
use embassy_usb::types::InterfaceNumber;
use embassy_usb::Handler;
use usb_audio_i2s::feedback::FrameTick;
use usb_audio_i2s::pump::{Half, HalfConsumed, OutputBuffer, Pump, Refill};
use usb_audio_i2s::session::Transmission;
use usb_audio_i2s::uac1::ControlPlane;
use usb_audio_i2s::*;

const CONFIG: DeviceConfig = DeviceConfig::new();

// bmRequestType for class requests to an interface.
const CLASS_INTERFACE_OUT: u8 = 0x21;
const CLASS_INTERFACE_IN: u8 = 0xA1;

fn feature_unit_setup(request_type: u8, request: u8, control: u8, channel: u8, length: u16) -> Request {
    let length = length.to_le_bytes();
    Request::parse(&[
        request_type,
        request,
        channel,
        control,
        CONFIG.control_interface,
        CONFIG.feature_unit_id,
        length[0],
        length[1],
    ])
}

fn get(plane: &mut ControlPlane, request: u8, control: u8, channel: u8, length: u16) -> Option<Vec<u8>> {
    let setup = feature_unit_setup(CLASS_INTERFACE_IN, request, control, channel, length);
    let mut buf = [0u8; 64];

    match plane.control_in(setup, &mut buf) {
        Some(InResponse::Accepted(data)) => Some(data.to_vec()),
        _ => None,
    }
}

fn half(sample_count: usize) -> HalfConsumed {
    HalfConsumed {
        half: Half::First,
        sample_count,
    }
}

#[test]
fn volume_requests_round_trip() {
    let session = Session::new(&CONFIG);
    let mut plane = ControlPlane::new(&session);

    let volume = (-10i16 * 256).to_le_bytes();
    let setup = feature_unit_setup(CLASS_INTERFACE_OUT, 0x01, 0x02, 1, 2);
    assert_eq!(plane.control_out(setup, &volume), Some(OutResponse::Accepted));
    assert_eq!(session.events().take(), Events::VOLUME);

    assert_eq!(get(&mut plane, 0x81, 0x02, 1, 2), Some(volume.to_vec()));
    assert_eq!(get(&mut plane, 0x82, 0x02, 1, 2), Some((-96i16 * 256).to_le_bytes().to_vec()));
    assert_eq!(get(&mut plane, 0x83, 0x02, 1, 2), Some(vec![0, 0]));
    assert_eq!(get(&mut plane, 0x84, 0x02, 1, 2), Some(vec![128, 0]));

    // Mute has no range.
    assert_eq!(get(&mut plane, 0x82, 0x01, 1, 1), None);
}

#[test]
fn master_mute_request() {
    let session = Session::new(&CONFIG);
    let mut plane = ControlPlane::new(&session);

    let setup = feature_unit_setup(CLASS_INTERFACE_OUT, 0x01, 0x01, 0xFF, 3);
    assert_eq!(plane.control_out(setup, &[0, 1, 0]), Some(OutResponse::Accepted));

    assert_eq!(session.settings().is_muted, [true, false]);
    assert_eq!(session.events().take(), Events::MUTE);
}

#[test]
fn mute_limit_writes_are_accepted() {
    let session = Session::new(&CONFIG);
    let mut plane = ControlPlane::new(&session);

    for request in [0x02, 0x03, 0x04] {
        let setup = feature_unit_setup(CLASS_INTERFACE_OUT, request, 0x01, 1, 1);
        assert_eq!(plane.control_out(setup, &[1]), Some(OutResponse::Accepted));
    }

    assert_eq!(session.settings().is_muted, [false, false]);
    assert!(session.events().take().is_empty());
}

#[test]
fn requests_to_other_entities_stall() {
    let session = Session::new(&CONFIG);
    let mut plane = ControlPlane::new(&session);

    let setup = Request::parse(&[CLASS_INTERFACE_IN, 0x81, 0x01, 0x02, CONFIG.control_interface, 0x05, 0x02, 0x00]);
    let mut buf = [0u8; 64];
    assert!(plane.control_in(setup, &mut buf).is_none());
}

#[test]
fn playback_lifecycle() {
    let session = Session::new(&CONFIG);
    let mut plane = ControlPlane::new(&session);
    let output: OutputBuffer<HALF_BUFFER_SAMPLE_COUNT> = OutputBuffer::new();
    let mut pump = Pump::new(&session, &output);

    plane.configured(true);
    plane.set_alternate_setting(InterfaceNumber(CONFIG.streaming_interface), 1);
    assert!(session.is_playing());
    assert_eq!(session.events().take(), Events::USB_STATE | Events::PLAYBACK);

    session.start_capture();
    assert_eq!(session.transmission(), Some(Transmission::ZeroLength));

    // Two frames of audio, slightly more than one half buffer each.
    assert_eq!(session.enqueue(&[0x01; USB_PACKET_SIZE]), USB_PACKET_SIZE);
    assert_eq!(session.enqueue(&[0x02; USB_MAX_PACKET_SIZE]), USB_MAX_PACKET_SIZE);

    assert_eq!(pump.refill(half(HALF_BUFFER_SAMPLE_COUNT)), Refill::Filled);
    assert_eq!(output.half(Half::First), [0x0101; HALF_BUFFER_SAMPLE_COUNT]);
    assert_eq!(pump.refill(half(HALF_BUFFER_SAMPLE_COUNT)), Refill::Filled);
    assert_eq!(pump.refill(half(HALF_BUFFER_SAMPLE_COUNT)), Refill::Underrun);
    assert_eq!(session.queued(), 4);

    // The 32 bit capture counter wraps within the window.
    let start = u32::MAX - 15 * 12_289;
    for tick in 0..=32u32 {
        session.on_frame_tick(FrameTick::new(start.wrapping_add(tick * 12_289)));
    }
    assert_eq!(
        session.transmission(),
        Some(Transmission::Feedback([0x40, 0x00, 0x0C]))
    );

    // Stopping twice only reports once, and leaves nothing behind.
    plane.set_alternate_setting(InterfaceNumber(CONFIG.streaming_interface), 0);
    plane.set_alternate_setting(InterfaceNumber(CONFIG.streaming_interface), 0);
    assert!(!session.is_playing());
    assert_eq!(session.events().take(), Events::PLAYBACK);
    assert_eq!(session.queued(), 0);
    assert!(!session.is_feedback_valid());
    assert_eq!(session.transmission(), None);

    // A restart does not replay stale data or feedback.
    plane.set_alternate_setting(InterfaceNumber(CONFIG.streaming_interface), 1);
    session.start_capture();
    assert_eq!(session.queued(), 0);
    assert_eq!(session.transmission(), Some(Transmission::ZeroLength));
}
