//! USB Audio Class 1.0 speaker function
//!
//! Based on "Universal Serial Bus Device Class Definition for Audio Devices", Release 1.0.
//!
//! A single output streaming interface with 16 bit stereo PCM at 48 kHz, an asynchronous isochronous data
//! endpoint and an explicit feedback endpoint. Mute and volume live in a feature unit between the USB
//! streaming input terminal and the speaker output terminal.
use core::mem::MaybeUninit;

use embassy_usb::descriptor::{SynchronizationType, UsageType};
use embassy_usb::driver::{Driver, Endpoint, EndpointType};
use embassy_usb::Builder;

use crate::session::Session;
use crate::{FEEDBACK_PACKET_SIZE, INPUT_CHANNEL_COUNT, SAMPLE_BIT_COUNT, SAMPLE_RATE_HZ, SAMPLE_SIZE, USB_MAX_PACKET_SIZE};

mod class_codes;
use class_codes::*;

pub mod control;
pub use control::ControlPlane;

/// Arbitrary unique identifier for the input terminal
const INPUT_TERMINAL_ID: u8 = 0x01;

/// Arbitrary unique identifier for the output terminal
const OUTPUT_TERMINAL_ID: u8 = 0x03;

/// Left and right front channels.
const CHANNEL_CONFIG: u16 = 0x0003;

/// Feedback bRefresh [UAC 3.7.2.2]
///
/// A new feedback value is available every 2^(10 - P) frames. The bRefresh field reports the exponent (10 - P)
/// to the host, ranging from 1 (2 ms) to 9 (512 ms).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackRefreshPeriod {
    Period2ms = 1,
    Period4ms = 2,
    Period8ms = 3,
    Period16ms = 4,
    Period32ms = 5,
    Period64ms = 6,
    Period128ms = 7,
    Period256ms = 8,
    Period512ms = 9,
}

impl FeedbackRefreshPeriod {
    /// The number of frames between feedback updates.
    pub const fn frame_count(self) -> usize {
        1 << (self as u8)
    }
}

impl From<FeedbackRefreshPeriod> for u8 {
    fn from(p: FeedbackRefreshPeriod) -> u8 {
        p as u8
    }
}

/// The refresh period that matches the feedback measurement window.
pub const FEEDBACK_REFRESH_PERIOD: FeedbackRefreshPeriod = FeedbackRefreshPeriod::Period32ms;

static_assertions::const_assert!(FEEDBACK_REFRESH_PERIOD.frame_count() == crate::FEEDBACK_WINDOW_FRAMES as usize);

/// Internal state for the speaker function
pub struct State<'d> {
    control: MaybeUninit<ControlPlane<'d>>,
}

impl<'d> Default for State<'d> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d> State<'d> {
    pub const fn new() -> Self {
        Self {
            control: MaybeUninit::uninit(),
        }
    }
}

/// The endpoints of the speaker function.
pub struct Speaker<'d, D: Driver<'d>> {
    /// Isochronous OUT endpoint for audio samples.
    pub stream: D::EndpointOut,
    /// Isochronous IN endpoint for rate feedback.
    pub feedback: D::EndpointIn,
}

impl<'d, D: Driver<'d>> Speaker<'d, D> {
    /// Adds the speaker function to the device and registers the control plane as request handler.
    ///
    /// Interface and endpoint numbers are assigned by the builder. They should match the session's
    /// [`DeviceConfig`](crate::DeviceConfig), which is checked here.
    pub fn new(builder: &mut Builder<'d, D>, state: &'d mut State<'d>, session: &'d Session<'d>) -> Self {
        let config = session.config();
        let mut func = builder.function(AUDIO_FUNCTION, FUNCTION_SUBCLASS_UNDEFINED, PROTOCOL_NONE);

        // Audio control interface (mandatory) [UAC 4.3.1]
        let mut interface = func.interface();
        let control_interface: u8 = interface.interface_number().into();
        let streaming_interface = control_interface + 1;
        let mut alt = interface.alt_setting(USB_AUDIO_CLASS, USB_AUDIOCONTROL_SUBCLASS, PROTOCOL_NONE, None);

        // Terminal topology:
        // Input terminal (USB stream) -> Feature unit (mute and volume) -> Output terminal (speaker)

        // Input Terminal Descriptor [UAC 4.3.2.1]
        let input_terminal_descriptor = [
            INPUT_TERMINAL,    // bDescriptorSubtype
            INPUT_TERMINAL_ID, // bTerminalID
            TERMINAL_USB_STREAMING as u8,
            (TERMINAL_USB_STREAMING >> 8) as u8, // wTerminalType
            0x00,                                // bAssocTerminal (none)
            INPUT_CHANNEL_COUNT as u8,           // bNrChannels
            CHANNEL_CONFIG as u8,
            (CHANNEL_CONFIG >> 8) as u8, // wChannelConfig
            0x00,                        // iChannelNames (none)
            0x00,                        // iTerminal (none)
        ];

        // Feature Unit Descriptor [UAC 4.3.2.5]
        // Mute and volume, for the master channel and for each logical channel.
        let controls = MUTE_CONTROL_BIT | VOLUME_CONTROL_BIT;
        let feature_unit_descriptor = [
            FEATURE_UNIT,             // bDescriptorSubtype
            config.feature_unit_id,   // bUnitID
            INPUT_TERMINAL_ID,        // bSourceID
            0x01,                     // bControlSize (one byte per channel)
            controls,                 // bmaControls(0), master
            controls,                 // bmaControls(1), left
            controls,                 // bmaControls(2), right
            0x00,                     // iFeature (none)
        ];

        // Output Terminal Descriptor [UAC 4.3.2.2]
        let output_terminal_descriptor = [
            OUTPUT_TERMINAL,    // bDescriptorSubtype
            OUTPUT_TERMINAL_ID, // bTerminalID
            TERMINAL_OUT_SPEAKER as u8,
            (TERMINAL_OUT_SPEAKER >> 8) as u8, // wTerminalType
            0x00,                              // bAssocTerminal (none)
            config.feature_unit_id,            // bSourceID
            0x00,                              // iTerminal (none)
        ];

        // Class-specific AC Interface Descriptor [UAC 4.3.2]
        // The total length covers the header and all unit and terminal descriptors.
        const DESCRIPTOR_HEADER_SIZE: usize = 2;
        const INTERFACE_DESCRIPTOR_SIZE: usize = 7;

        let total_descriptor_length = DESCRIPTOR_HEADER_SIZE
            + INTERFACE_DESCRIPTOR_SIZE
            + DESCRIPTOR_HEADER_SIZE
            + input_terminal_descriptor.len()
            + DESCRIPTOR_HEADER_SIZE
            + feature_unit_descriptor.len()
            + DESCRIPTOR_HEADER_SIZE
            + output_terminal_descriptor.len();

        let interface_descriptor: [u8; INTERFACE_DESCRIPTOR_SIZE] = [
            HEADER_SUBTYPE, // bDescriptorSubtype (Header)
            ADC_VERSION as u8,
            (ADC_VERSION >> 8) as u8, // bcdADC
            total_descriptor_length as u8,
            (total_descriptor_length >> 8) as u8, // wTotalLength
            0x01,                                 // bInCollection (1 streaming interface)
            streaming_interface,                  // baInterfaceNr
        ];

        alt.descriptor(CS_INTERFACE, &interface_descriptor);
        alt.descriptor(CS_INTERFACE, &input_terminal_descriptor);
        alt.descriptor(CS_INTERFACE, &feature_unit_descriptor);
        alt.descriptor(CS_INTERFACE, &output_terminal_descriptor);

        // Audio streaming interface, zero bandwidth [UAC 4.5.1]
        let mut interface = func.interface();
        let alt = interface.alt_setting(USB_AUDIO_CLASS, USB_AUDIOSTREAMING_SUBCLASS, PROTOCOL_NONE, None);
        drop(alt);

        // Audio streaming interface, operational [UAC 4.5.1]
        let mut alt = interface.alt_setting(USB_AUDIO_CLASS, USB_AUDIOSTREAMING_SUBCLASS, PROTOCOL_NONE, None);

        alt.descriptor(
            CS_INTERFACE,
            &[
                AS_GENERAL,        // bDescriptorSubtype
                INPUT_TERMINAL_ID, // bTerminalLink
                0x00,              // bDelay (none)
                PCM as u8,
                (PCM >> 8) as u8, // wFormatTag (PCM format)
            ],
        );

        // Type I format descriptor [Audio Data Formats 2.2.5]
        alt.descriptor(
            CS_INTERFACE,
            &[
                FORMAT_TYPE,               // bDescriptorSubtype
                FORMAT_TYPE_I,             // bFormatType
                INPUT_CHANNEL_COUNT as u8, // bNrChannels
                SAMPLE_SIZE as u8,         // bSubframeSize
                SAMPLE_BIT_COUNT as u8,    // bBitResolution
                0x01,                      // bSamFreqType (one discrete rate)
                SAMPLE_RATE_HZ as u8,
                (SAMPLE_RATE_HZ >> 8) as u8,
                (SAMPLE_RATE_HZ >> 16) as u8, // tSamFreq
            ],
        );

        let stream = alt.alloc_endpoint_out(EndpointType::Isochronous, USB_MAX_PACKET_SIZE as u16, 1);
        let feedback = alt.alloc_endpoint_in(EndpointType::Isochronous, FEEDBACK_PACKET_SIZE as u16, 1);

        // Write the descriptor for the streaming endpoint, after knowing the address of the feedback endpoint.
        alt.endpoint_descriptor(
            stream.info(),
            SynchronizationType::Asynchronous,
            UsageType::DataEndpoint,
            &[
                0x00,                        // bRefresh (0)
                feedback.info().addr.into(), // bSynchAddress (the feedback endpoint)
            ],
        );

        alt.descriptor(
            CS_ENDPOINT,
            &[
                AS_GENERAL, // bDescriptorSubtype (General)
                0x00,       // bmAttributes (no sampling frequency control)
                0x00,       // bLockDelayUnits (undefined)
                0x00,
                0x00, // wLockDelay (0)
            ],
        );

        // The feedback endpoint descriptor must follow the streaming endpoint descriptor.
        alt.endpoint_descriptor(
            feedback.info(),
            SynchronizationType::NoSynchronization,
            UsageType::FeedbackEndpoint,
            &[
                FEEDBACK_REFRESH_PERIOD.into(), // bRefresh
                0x00,                           // bSynchAddress (none)
            ],
        );

        // Free up the builder.
        drop(func);

        let stream_address: u8 = stream.info().addr.into();
        let feedback_address: u8 = feedback.info().addr.into();
        if control_interface != config.control_interface
            || streaming_interface != config.streaming_interface
            || stream_address != config.streaming_endpoint
            || feedback_address != config.feedback_endpoint
        {
            warn!(
                "Speaker allocated at interfaces {}/{}, endpoints {}/{}, which differs from the device configuration",
                control_interface,
                streaming_interface,
                stream_address,
                feedback_address
            );
        }

        let control = state.control.write(ControlPlane::new(session));
        builder.handler(control);

        Speaker { stream, feedback }
    }
}
