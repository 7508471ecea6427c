//! Codes from "Universal Serial Bus Device Class Definition for Audio Devices", Release 1.0, Appendix A.
#![allow(unused)]

// Audio interface class, subclass and protocol codes [UAC A.1 - A.3]
pub const USB_AUDIO_CLASS: u8 = 0x01;
pub const USB_AUDIOCONTROL_SUBCLASS: u8 = 0x01;
pub const USB_AUDIOSTREAMING_SUBCLASS: u8 = 0x02;
pub const PROTOCOL_NONE: u8 = 0x00;

// Interface association (function) codes
pub const AUDIO_FUNCTION: u8 = USB_AUDIO_CLASS;
pub const FUNCTION_SUBCLASS_UNDEFINED: u8 = 0x00;

// Class-specific descriptor types [UAC A.4]
pub const CS_INTERFACE: u8 = 0x24;
pub const CS_ENDPOINT: u8 = 0x25;

// Audio control interface descriptor subtypes [UAC A.5]
pub const HEADER_SUBTYPE: u8 = 0x01;
pub const INPUT_TERMINAL: u8 = 0x02;
pub const OUTPUT_TERMINAL: u8 = 0x03;
pub const FEATURE_UNIT: u8 = 0x06;

// Audio streaming interface descriptor subtypes [UAC A.6]
pub const AS_GENERAL: u8 = 0x01;
pub const FORMAT_TYPE: u8 = 0x02;

// Format type codes [Audio Data Formats A.1.1, A.1.2]
pub const FORMAT_TYPE_I: u8 = 0x01;
pub const PCM: u16 = 0x0001;

// Audio class specification release number
pub const ADC_VERSION: u16 = 0x0100;

// Terminal types [Terminal Types 2.1, 2.3]
pub const TERMINAL_USB_STREAMING: u16 = 0x0101;
pub const TERMINAL_OUT_SPEAKER: u16 = 0x0301;

// Class-specific request codes [UAC A.9]
pub const SET_CUR: u8 = 0x01;
pub const SET_MIN: u8 = 0x02;
pub const SET_MAX: u8 = 0x03;
pub const SET_RES: u8 = 0x04;
pub const GET_CUR: u8 = 0x81;
pub const GET_MIN: u8 = 0x82;
pub const GET_MAX: u8 = 0x83;
pub const GET_RES: u8 = 0x84;

// Feature unit control selectors [UAC A.10.2]
pub const FU_CONTROL_UNDEFINED: u8 = 0x00;
pub const MUTE_CONTROL: u8 = 0x01;
pub const VOLUME_CONTROL: u8 = 0x02;

// Feature unit bmaControls bits [UAC 4.3.2.5]
pub const MUTE_CONTROL_BIT: u8 = 1 << 0;
pub const VOLUME_CONTROL_BIT: u8 = 1 << 1;
